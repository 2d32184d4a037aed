//! Skill catalog with per-agent assignment.
//!
//! A skill is a named block of instructions appended to an agent's system
//! prompt. Skills can be registered directly or loaded from markdown files
//! with a `---` frontmatter header:
//!
//! ```text
//! ---
//! name: rust-review
//! description: Review Rust changes
//! category: review
//! required_tools: file_read, shell
//! ---
//! Run `cargo clippy` before commenting.
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skill {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub content: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub required_tools: Vec<String>,
}

impl Skill {
    /// Parse a skill from markdown with frontmatter. The id defaults to the
    /// name. Returns `None` without a closing `---` or a `name`.
    pub fn parse(content: &str) -> Option<Skill> {
        let trimmed = content.trim().trim_start_matches('\u{feff}');
        let mut lines = trimmed.lines();
        if lines.next()?.trim() != "---" {
            return None;
        }

        let mut header = Vec::new();
        let mut body = Vec::new();
        let mut closed = false;
        for line in lines {
            if closed {
                body.push(line);
            } else if line.trim() == "---" {
                closed = true;
            } else {
                header.push(line);
            }
        }
        if !closed {
            return None;
        }

        let mut skill = Skill {
            id: String::new(),
            name: String::new(),
            description: String::new(),
            content: body.join("\n").trim().to_string(),
            category: String::new(),
            required_tools: Vec::new(),
        };
        for line in header {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim().to_string();
            match key.trim() {
                "id" => skill.id = value,
                "name" => skill.name = value,
                "description" => skill.description = value,
                "category" => skill.category = value,
                "required_tools" => {
                    skill.required_tools = value
                        .split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect();
                }
                _ => {}
            }
        }

        if skill.name.is_empty() {
            return None;
        }
        if skill.id.is_empty() {
            skill.id = skill.name.clone();
        }
        Some(skill)
    }
}

#[derive(Default)]
pub struct SkillManager {
    skills: RwLock<HashMap<String, Skill>>,
    assignments: RwLock<HashMap<String, Vec<String>>>,
}

impl SkillManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a skill by id.
    pub fn register(&self, skill: Skill) {
        debug!(skill = %skill.id, "Registered skill");
        self.skills
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(skill.id.clone(), skill);
    }

    /// Register every `*.md` file in `dir` that parses as a skill.
    /// Returns how many were loaded; a missing directory loads nothing.
    pub fn load_dir(&self, dir: &Path) -> usize {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return 0;
        };
        let mut loaded = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            match std::fs::read_to_string(&path).ok().as_deref().and_then(Skill::parse) {
                Some(skill) => {
                    self.register(skill);
                    loaded += 1;
                }
                None => warn!(path = %path.display(), "Skipping unparseable skill file"),
            }
        }
        loaded
    }

    pub fn get(&self, id: &str) -> Option<Skill> {
        self.skills
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// All skills, sorted by name.
    pub fn list(&self) -> Vec<Skill> {
        let mut skills: Vec<Skill> = self
            .skills
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        skills.sort_by(|a, b| a.name.cmp(&b.name));
        skills
    }

    /// Give `agent_id` a registered skill. False when the skill is unknown.
    pub fn assign(&self, agent_id: &str, skill_id: &str) -> bool {
        if self.get(skill_id).is_none() {
            return false;
        }
        let mut assignments = self.assignments.write().unwrap_or_else(PoisonError::into_inner);
        let assigned = assignments.entry(agent_id.to_string()).or_default();
        if !assigned.iter().any(|s| s == skill_id) {
            assigned.push(skill_id.to_string());
        }
        true
    }

    pub fn unassign(&self, agent_id: &str, skill_id: &str) -> bool {
        let mut assignments = self.assignments.write().unwrap_or_else(PoisonError::into_inner);
        let Some(assigned) = assignments.get_mut(agent_id) else {
            return false;
        };
        let before = assigned.len();
        assigned.retain(|s| s != skill_id);
        before != assigned.len()
    }

    /// The agent's skills in assignment order. Skills removed from the
    /// catalog since assignment are skipped.
    pub fn skills_for_agent(&self, agent_id: &str) -> Vec<Skill> {
        let ids = self
            .assignments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(agent_id)
            .cloned()
            .unwrap_or_default();
        ids.iter().filter_map(|id| self.get(id)).collect()
    }

    /// The `## Skills` prompt section for an agent, or an empty string.
    pub fn prompt_for_agent(&self, agent_id: &str) -> String {
        let skills = self.skills_for_agent(agent_id);
        if skills.is_empty() {
            return String::new();
        }
        let mut prompt = String::from("## Skills\n");
        for skill in skills {
            prompt.push_str(&format!("\n### {}\n", skill.name));
            if !skill.description.is_empty() {
                prompt.push_str(&format!("{}\n", skill.description));
            }
            if !skill.required_tools.is_empty() {
                prompt.push_str(&format!("Tools: {}\n", skill.required_tools.join(", ")));
            }
            prompt.push_str(&format!("\n{}\n", skill.content));
        }
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REVIEW: &str = "---\nname: rust-review\ndescription: Review Rust changes\n\
                          category: review\nrequired_tools: file_read, shell\n---\n\
                          Run clippy before commenting.\n";

    #[test]
    fn parses_frontmatter() {
        let skill = Skill::parse(REVIEW).unwrap();
        assert_eq!(skill.id, "rust-review");
        assert_eq!(skill.description, "Review Rust changes");
        assert_eq!(skill.required_tools, vec!["file_read", "shell"]);
        assert_eq!(skill.content, "Run clippy before commenting.");
    }

    #[test]
    fn rejects_missing_name_or_header() {
        assert!(Skill::parse("no header").is_none());
        assert!(Skill::parse("---\ndescription: x\n---\nbody").is_none());
        assert!(Skill::parse("---\nname: x\nbody without close").is_none());
    }

    #[test]
    fn prompt_lists_assigned_skills_only() {
        let manager = SkillManager::new();
        manager.register(Skill::parse(REVIEW).unwrap());
        manager.register(Skill {
            id: "deploy".into(),
            name: "deploy".into(),
            description: String::new(),
            content: "Ask for approval first.".into(),
            category: String::new(),
            required_tools: vec![],
        });

        assert!(manager.prompt_for_agent("a1").is_empty());
        assert!(manager.assign("a1", "rust-review"));
        assert!(!manager.assign("a1", "unknown"));

        let prompt = manager.prompt_for_agent("a1");
        assert!(prompt.starts_with("## Skills\n"));
        assert!(prompt.contains("### rust-review"));
        assert!(prompt.contains("Tools: file_read, shell"));
        assert!(!prompt.contains("deploy"));

        assert!(manager.unassign("a1", "rust-review"));
        assert!(manager.prompt_for_agent("a1").is_empty());
    }

    #[test]
    fn loads_markdown_files_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("review.md"), REVIEW).unwrap();
        std::fs::write(dir.path().join("broken.md"), "nothing here").unwrap();
        std::fs::write(dir.path().join("notes.txt"), REVIEW).unwrap();

        let manager = SkillManager::new();
        assert_eq!(manager.load_dir(dir.path()), 1);
        assert_eq!(manager.list().len(), 1);
        assert_eq!(manager.load_dir(&dir.path().join("missing")), 0);
    }
}
