//! Step execution seam.
//!
//! The orchestrator walks the step graph; deciding what a step *means*
//! is delegated through [`StepExecutor`]. Implementations range from a
//! model-backed interpreter to the deterministic [`NoopStepExecutor`]
//! used in tests. The executor answers with directives; it never
//! mutates runtime state itself.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use huddle_core::types::{AgentId, Endpoint, MeetingId, StepKind, StepPosition};

use crate::mailbox::WaitSource;

/// Everything an executor may need to interpret one step.
#[derive(Debug, Clone)]
pub struct StepRequest {
    /// Agent executing the step
    pub agent: AgentId,
    /// Playbook the step belongs to
    pub playbook: String,
    /// Position within the playbook
    pub position: StepPosition,
    /// Structural kind of the step
    pub kind: StepKind,
    /// The step's instruction text
    pub instruction: String,
    /// Where control lands if this loop header decides to exit
    pub loop_exit: Option<StepPosition>,
    /// The paired else branch, when this step is a conditional
    pub else_branch: Option<StepPosition>,
    /// The join step past this conditional and its else branch
    pub join: Option<StepPosition>,
    /// Current call stack, innermost last, `playbook:position` labels
    pub call_stack: Vec<String>,
    /// Snapshot of the variable store (artifacts appear as references)
    pub variables: Value,
    /// Rendered session transcript so far
    pub transcript: String,
}

/// What the executor wants the orchestrator to do next.
///
/// A step may yield several directives; they are applied in order. When
/// none of them moves the position, the orchestrator follows the step
/// graph's default successor.
#[derive(Debug, Clone)]
pub enum Directive {
    /// Jump to an explicit position. Loop exits and branch choices use
    /// the `loop_exit`/`else_branch`/`join` positions carried by the
    /// request.
    AdvanceTo(StepPosition),
    /// Write a variable
    SetVariable { name: String, value: Value },
    /// Call another playbook, local or cross-agent (`Klass.Name` form)
    CallPlaybook {
        target: String,
        args: Value,
        result_var: Option<String>,
    },
    /// Send a message
    Say { target: Endpoint, content: String },
    /// Block on the mailbox for the given source
    Wait { source: WaitSource },
    /// Open a meeting and wait for the required attendees
    CreateMeeting {
        topic: String,
        invitees: Vec<Endpoint>,
        required: Vec<Endpoint>,
    },
    /// Broadcast into an owned meeting
    Broadcast { meeting_id: MeetingId, text: String },
    /// Finish the current playbook with a value
    Return(Value),
    /// Finish the current playbook with a recoverable failure
    Fail(String),
}

/// Step execution errors
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("step executor failed at {position}: {reason}")]
    Backend {
        position: StepPosition,
        reason: String,
    },
}

/// Interprets one step at a time on behalf of the orchestrator.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute_step(&self, request: StepRequest) -> Result<Vec<Directive>, ExecutorError>;
}

/// Executor that emits no directives, letting every step fall through
/// to its graph successor. Useful as a traversal baseline in tests.
#[derive(Debug, Default)]
pub struct NoopStepExecutor;

#[async_trait]
impl StepExecutor for NoopStepExecutor {
    async fn execute_step(&self, _request: StepRequest) -> Result<Vec<Directive>, ExecutorError> {
        Ok(Vec::new())
    }
}
