//! Message model and in-process wire format
//!
//! Meeting control flows over plain text recognized by prefix match:
//! - `MEETING:<id>:<payload>` for broadcast content
//! - `JOINED meeting <id>` / `REJECTED meeting <id>` / `ENDED meeting <id>`
//!   for lifecycle tokens, intercepted before reaching playbook-visible
//!   buffers
//! - `INVITE meeting <id>: <topic>` for invitations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Type alias for agent ids
pub type AgentId = String;

/// Type alias for meeting ids
pub type MeetingId = u64;

/// End-of-message sentinel body. Forces immediate buffer release and is
/// never surfaced as content.
pub const EOM_SENTINEL: &str = "<<EOM>>";

/// A message endpoint: the human channel, a specific agent, or a meeting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Endpoint {
    /// The human operator channel
    Human,
    /// A specific agent by id
    Agent(AgentId),
    /// A meeting; routed to the meeting's owner
    Meeting(MeetingId),
}

impl Endpoint {
    /// Attribution label used for transcript lines, `Sender(id)` style.
    pub fn attribution(&self) -> String {
        match self {
            Endpoint::Human => "Human(user)".to_string(),
            Endpoint::Agent(id) => format!("Agent({})", id),
            Endpoint::Meeting(id) => format!("Meeting({})", id),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Human => write!(f, "human"),
            Endpoint::Agent(id) => write!(f, "{}", id),
            Endpoint::Meeting(id) => write!(f, "meeting-{}", id),
        }
    }
}

/// An immutable routed message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message id
    pub id: Uuid,
    /// Originating endpoint
    pub sender: Endpoint,
    /// Destination endpoint
    pub recipient: Endpoint,
    /// Plain-text body (wire format applies, see module docs)
    pub body: String,
    /// Meeting this message belongs to, when any
    #[serde(default)]
    pub meeting_id: Option<MeetingId>,
    /// Creation timestamp
    pub timestamp: DateTime<Utc>,
    /// Correlates a reply with the request that caused it
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl Message {
    /// Create an ordinary chat message
    pub fn chat(sender: Endpoint, recipient: Endpoint, body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
            recipient,
            body: body.into(),
            meeting_id: None,
            timestamp: Utc::now(),
            correlation_id: None,
        }
    }

    /// Create the end-of-message sentinel
    pub fn end_of_messages(sender: Endpoint, recipient: Endpoint) -> Self {
        Self::chat(sender, recipient, EOM_SENTINEL)
    }

    /// Create a meeting broadcast message
    pub fn meeting_broadcast(
        sender: Endpoint,
        recipient: Endpoint,
        meeting_id: MeetingId,
        payload: impl AsRef<str>,
    ) -> Self {
        let mut message = Self::chat(
            sender,
            recipient,
            format!("MEETING:{}:{}", meeting_id, payload.as_ref()),
        );
        message.meeting_id = Some(meeting_id);
        message
    }

    /// Create a meeting invitation
    pub fn meeting_invite(
        sender: Endpoint,
        recipient: Endpoint,
        meeting_id: MeetingId,
        topic: impl AsRef<str>,
    ) -> Self {
        let mut message = Self::chat(
            sender,
            recipient,
            format!("INVITE meeting {}: {}", meeting_id, topic.as_ref()),
        );
        message.meeting_id = Some(meeting_id);
        message
    }

    /// Create a `JOINED` lifecycle token
    pub fn meeting_joined(sender: Endpoint, recipient: Endpoint, meeting_id: MeetingId) -> Self {
        let mut message = Self::chat(sender, recipient, format!("JOINED meeting {}", meeting_id));
        message.meeting_id = Some(meeting_id);
        message
    }

    /// Create a `REJECTED` lifecycle token
    pub fn meeting_rejected(sender: Endpoint, recipient: Endpoint, meeting_id: MeetingId) -> Self {
        let mut message = Self::chat(sender, recipient, format!("REJECTED meeting {}", meeting_id));
        message.meeting_id = Some(meeting_id);
        message
    }

    /// Create an `ENDED` lifecycle token
    pub fn meeting_ended(sender: Endpoint, recipient: Endpoint, meeting_id: MeetingId) -> Self {
        let mut message = Self::chat(sender, recipient, format!("ENDED meeting {}", meeting_id));
        message.meeting_id = Some(meeting_id);
        message
    }

    /// Attach a correlation id
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Whether this message is the end-of-message sentinel
    pub fn is_sentinel(&self) -> bool {
        self.body == EOM_SENTINEL
    }

    /// Classify the body against the wire format
    pub fn kind(&self) -> MessageKind {
        MessageKind::classify(&self.body)
    }
}

/// Wire-format classification of a message body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    /// Ordinary content
    Chat,
    /// End-of-message sentinel
    EndOfMessages,
    /// Meeting broadcast content
    MeetingBroadcast {
        meeting_id: MeetingId,
        payload: String,
    },
    /// Meeting invitation
    MeetingInvite { meeting_id: MeetingId, topic: String },
    /// Invitee accepted
    MeetingJoined { meeting_id: MeetingId },
    /// Invitee declined
    MeetingRejected { meeting_id: MeetingId },
    /// Participant left
    MeetingEnded { meeting_id: MeetingId },
}

impl MessageKind {
    /// Classify a body by prefix match. Unparseable meeting prefixes fall
    /// back to `Chat` rather than failing.
    pub fn classify(body: &str) -> MessageKind {
        if body == EOM_SENTINEL {
            return MessageKind::EndOfMessages;
        }
        if let Some(rest) = body.strip_prefix("MEETING:") {
            if let Some((id, payload)) = rest.split_once(':') {
                if let Ok(meeting_id) = id.parse::<MeetingId>() {
                    return MessageKind::MeetingBroadcast {
                        meeting_id,
                        payload: payload.to_string(),
                    };
                }
            }
            return MessageKind::Chat;
        }
        if let Some(rest) = body.strip_prefix("INVITE meeting ") {
            if let Some((id, topic)) = rest.split_once(": ") {
                if let Ok(meeting_id) = id.parse::<MeetingId>() {
                    return MessageKind::MeetingInvite {
                        meeting_id,
                        topic: topic.to_string(),
                    };
                }
            }
            return MessageKind::Chat;
        }
        if let Some(rest) = body.strip_prefix("JOINED meeting ") {
            if let Ok(meeting_id) = rest.trim().parse::<MeetingId>() {
                return MessageKind::MeetingJoined { meeting_id };
            }
        }
        if let Some(rest) = body.strip_prefix("REJECTED meeting ") {
            if let Ok(meeting_id) = rest.trim().parse::<MeetingId>() {
                return MessageKind::MeetingRejected { meeting_id };
            }
        }
        if let Some(rest) = body.strip_prefix("ENDED meeting ") {
            if let Ok(meeting_id) = rest.trim().parse::<MeetingId>() {
                return MessageKind::MeetingEnded { meeting_id };
            }
        }
        MessageKind::Chat
    }

    /// Whether this is a lifecycle control token that must never reach
    /// playbook-visible buffers.
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            MessageKind::EndOfMessages
                | MessageKind::MeetingJoined { .. }
                | MessageKind::MeetingRejected { .. }
                | MessageKind::MeetingEnded { .. }
        )
    }
}
