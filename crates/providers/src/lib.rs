//! Provider plumbing for Ratchet.
//!
//! Concrete model backends live outside this workspace. This crate holds the
//! alias registry the agent loop resolves providers through, and the
//! scripted provider registered under the `mock` kind.

pub mod registry;
pub mod scripted;

pub use registry::{ProviderRegistry, build_from_config};
pub use scripted::{ScriptStep, ScriptedProvider, text_response, tool_call_response};
