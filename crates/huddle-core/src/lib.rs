//! # Huddle Core
//!
//! Deterministic data model and navigation logic for the Huddle runtime.
//!
//! This crate contains:
//! - Playbook / Step definitions with hierarchical positions
//! - StepGraph navigation (sequences, loops, conditionals)
//! - CallStack tracking of in-progress playbook invocations
//! - Variable store with change history and artifact indexing
//! - SessionLog, the append-only execution transcript
//!
//! This crate does NOT care about:
//! - How steps are executed (LLM, code, human)
//! - Message transport or scheduling
//! - Which agent owns the data

pub mod callstack;
pub mod graph;
pub mod log;
pub mod types;
pub mod variables;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::callstack::{CallStack, CallStackFrame};
    pub use crate::graph::{GraphError, StepGraph};
    pub use crate::log::{render_value, LogEntry, SessionLog};
    pub use crate::types::{
        AgentId, Endpoint, MeetingId, Message, MessageKind, Playbook, PositionError, Step,
        StepKind, StepPosition,
    };
    pub use crate::variables::{Artifact, Variable, VariableChange, VariableStore};
}

// Re-export key types at crate root
pub use callstack::{CallStack, CallStackFrame};
pub use graph::{GraphError, StepGraph};
pub use log::{render_value, LogEntry, SessionLog};
pub use types::{
    AgentId, Endpoint, MeetingId, Message, MessageKind, Playbook, PositionError, Step, StepKind,
    StepPosition,
};
pub use variables::{Artifact, Variable, VariableChange, VariableStore};
