//! Core type definitions

mod message;
mod playbook;
mod step;

pub use message::{AgentId, Endpoint, MeetingId, Message, MessageKind, EOM_SENTINEL};
pub use playbook::Playbook;
pub use step::{PositionError, Step, StepKind, StepPosition};
