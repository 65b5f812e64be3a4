//! # Huddle Runtime
//!
//! Tokio-based coordination layer for Huddle agents.
//!
//! This crate provides:
//! - Mailbox: per-source inbound queues with a buffering/release policy
//! - Meeting subsystem: owner-managed multi-party sessions
//! - Agent orchestrator: the execute_playbook state machine
//! - Program: agent ownership, routing, and lifecycle
//!
//! All agents run as concurrent tasks inside one process; shared state
//! is single-writer per agent task, so there is no locking beyond the
//! routing table.

mod agent;
mod executor;
mod mailbox;
mod meeting;
mod orchestrator;
mod program;
mod registry;

pub use agent::Agent;
pub use executor::{Directive, ExecutorError, NoopStepExecutor, StepExecutor, StepRequest};
pub use mailbox::{Mailbox, MailboxError, SharedMailbox, Source, WaitSource};
pub use meeting::{Meeting, MeetingError, MeetingManager, MeetingMessage, MeetingRegistry};
pub use orchestrator::{Orchestrator, OrchestratorError, PlaybookOutcome};
pub use program::{AgentSpec, Program, ProgramError, Router};
pub use registry::{CallRequest, CapabilityRegistry, PlaybookHandle};
