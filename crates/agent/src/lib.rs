//! The agent execution core of Ratchet.
//!
//! An agent works a task in a bounded **think → act → observe** cycle:
//!
//! 1. **Prologue**: system prompt (plus skills and recalled memory) and the task
//! 2. **Think**: call the provider, compacting the context first when needed
//! 3. **Act**: run the requested tools, waiting on approval and human gates
//! 4. **Observe**: feed results back, watch for loops, journal every message
//!
//! The cycle ends when the model answers without tool calls, the iteration
//! bound is reached, or a terminal outcome (loop detected, approval timeout,
//! expired request, provider failure) stops it.

pub mod context;
pub mod dispatcher;
pub mod gate_tools;
pub mod loop_detector;
pub mod loop_runner;
pub mod runner;
pub mod services;
pub mod skills;
pub mod transcript;

pub use context::ContextManager;
pub use dispatcher::Dispatcher;
pub use gate_tools::register_gate_tools;
pub use loop_detector::{LoopDetector, LoopVerdict};
pub use loop_runner::{AgentLoop, StepOutcome, TaskInput};
pub use runner::TaskRunner;
pub use services::{AgentServices, ContainerManager};
pub use skills::{Skill, SkillManager};
pub use transcript::{TranscriptEntry, TranscriptRecorder};
