//! Path validation: confine file tools to the project workspace.

use std::path::{Component, Path, PathBuf};

/// Error returned when path validation fails.
#[derive(Debug, thiserror::Error)]
pub enum PathValidationError {
    #[error("Path '{path}' is outside the workspace")]
    OutsideWorkspace { path: String },

    #[error("Path traversal detected in '{path}'")]
    PathTraversal { path: String },

    #[error("Empty path")]
    Empty,

    #[error("Failed to canonicalize path '{path}': {reason}")]
    CanonicalizeFailed { path: String, reason: String },
}

/// Resolve a tool-supplied path.
///
/// With a workspace, relative paths are joined onto it and the result must
/// stay inside it (symlinks are resolved for the part that exists). Without
/// one, the path is returned as given. `..` components are always rejected.
pub fn resolve_in_workspace(
    workspace: Option<&Path>,
    requested: &str,
) -> Result<PathBuf, PathValidationError> {
    if requested.trim().is_empty() {
        return Err(PathValidationError::Empty);
    }

    let input = Path::new(requested);
    if input.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(PathValidationError::PathTraversal {
            path: requested.into(),
        });
    }

    let Some(root) = workspace else {
        return Ok(input.to_path_buf());
    };

    let joined = if input.is_absolute() {
        input.to_path_buf()
    } else {
        root.join(input)
    };

    let canonical_root = canonicalize_existing(root, requested)?;
    let canonical = canonicalize_existing(&joined, requested)?;

    if canonical.starts_with(&canonical_root) {
        Ok(canonical)
    } else {
        Err(PathValidationError::OutsideWorkspace {
            path: requested.into(),
        })
    }
}

/// Canonicalize the longest existing ancestor of `path` and re-append the
/// components that do not exist yet (files about to be written).
fn canonicalize_existing(path: &Path, original: &str) -> Result<PathBuf, PathValidationError> {
    let mut existing = path.to_path_buf();
    let mut missing = Vec::new();
    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent.to_path_buf();
            }
            _ => return Ok(path.to_path_buf()),
        }
    }

    let mut canonical =
        existing
            .canonicalize()
            .map_err(|e| PathValidationError::CanonicalizeFailed {
                path: original.into(),
                reason: e.to_string(),
            })?;
    for name in missing.into_iter().rev() {
        canonical.push(name);
    }
    Ok(canonical)
}
