//! CallStack - ordered frames of in-progress playbook invocations

use tracing::Span;

use crate::types::StepPosition;

/// Record of one in-progress playbook invocation.
///
/// A frame is exclusively owned by one call stack; it is created on
/// playbook entry, advanced as steps execute, and destroyed on return.
#[derive(Debug, Clone)]
pub struct CallStackFrame {
    /// Name of the playbook being executed
    pub playbook: String,
    /// Position of the step currently executing
    pub position: StepPosition,
    /// Trace handle for this invocation
    pub span: Span,
}

impl CallStackFrame {
    /// Create a frame positioned at a playbook's entry step
    pub fn new(playbook: impl Into<String>, position: StepPosition) -> Self {
        let playbook = playbook.into();
        let span = tracing::info_span!("playbook", name = %playbook);
        Self {
            playbook,
            position,
            span,
        }
    }

    /// Move the frame to a new step position
    pub fn advance_to(&mut self, position: StepPosition) {
        self.position = position;
    }

    /// `"playbook:position"` label used in traces and variable history
    pub fn trace_label(&self) -> String {
        format!("{}:{}", self.playbook, self.position)
    }
}

/// Ordered frame list; the tail is the active invocation.
///
/// An empty stack is the valid terminal state meaning "nothing left to
/// execute", not an error.
#[derive(Debug, Clone, Default)]
pub struct CallStack {
    frames: Vec<CallStackFrame>,
}

impl CallStack {
    /// Create an empty (idle) call stack
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a frame for a playbook entry
    pub fn push(&mut self, frame: CallStackFrame) {
        self.frames.push(frame);
    }

    /// Pop the active frame on playbook return
    pub fn pop(&mut self) -> Option<CallStackFrame> {
        self.frames.pop()
    }

    /// The active frame, when any
    pub fn peek(&self) -> Option<&CallStackFrame> {
        self.frames.last()
    }

    /// Mutable access to the active frame
    pub fn peek_mut(&mut self) -> Option<&mut CallStackFrame> {
        self.frames.last_mut()
    }

    /// Current nesting depth
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Whether the agent is idle
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Ordered `"playbook:position"` labels, entry-most first
    pub fn to_trace(&self) -> Vec<String> {
        self.frames.iter().map(|f| f.trace_label()).collect()
    }
}
