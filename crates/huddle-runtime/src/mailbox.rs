//! Mailbox - per-source inbound queues with a buffering/release policy
//!
//! `deliver` enqueues per source and signals the waiter; `wait_for` is
//! the sole consumption path. Release policy:
//! - specific agent, human, or wildcard source: release as soon as a
//!   qualifying message arrives, a qualifying sentinel arrives, or the
//!   buffering window has elapsed since the first qualifying buffered
//!   message
//! - meeting source: never release on arrival alone; wait the full
//!   window so multi-party chatter accumulates into one batch
//! - a sentinel forces immediate release of waits matching its own
//!   source and is discarded; it never pre-empts waits on other sources
//!
//! A fired program-wide cancellation token aborts the wait with
//! [`MailboxError::Terminated`] instead of hanging.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use huddle_core::types::{AgentId, Endpoint, MeetingId, Message};

/// Shared handle to one agent's mailbox
pub type SharedMailbox = Arc<Mailbox>;

/// A distinguishable message source: the human channel, a specific
/// agent, or a meeting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Source {
    Human,
    Agent(AgentId),
    Meeting(MeetingId),
}

impl Source {
    /// Classify a message into its queue. Meeting-tagged messages are
    /// keyed by meeting regardless of who sent them.
    pub fn of(message: &Message) -> Source {
        if let Some(meeting_id) = message.meeting_id {
            return Source::Meeting(meeting_id);
        }
        match &message.sender {
            Endpoint::Human => Source::Human,
            Endpoint::Agent(id) => Source::Agent(id.clone()),
            Endpoint::Meeting(id) => Source::Meeting(*id),
        }
    }
}

/// What a `wait_for` call is waiting on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitSource {
    /// Messages from the human channel
    Human,
    /// Messages from one specific agent
    Agent(AgentId),
    /// Messages belonging to one meeting
    Meeting(MeetingId),
    /// Any inbound message
    Any,
}

impl WaitSource {
    fn matches(&self, source: &Source) -> bool {
        match self {
            WaitSource::Any => true,
            WaitSource::Human => *source == Source::Human,
            WaitSource::Agent(id) => matches!(source, Source::Agent(s) if s == id),
            WaitSource::Meeting(id) => matches!(source, Source::Meeting(s) if s == id),
        }
    }
}

/// Errors surfaced by `wait_for`
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MailboxError {
    /// The program-wide completion signal fired while waiting.
    #[error("program terminated while waiting for messages")]
    Terminated,
}

#[derive(Debug)]
struct Buffered {
    message: Message,
    seq: u64,
    at: Instant,
}

#[derive(Debug, Default)]
struct MailboxState {
    queues: HashMap<Source, VecDeque<Buffered>>,
    sentinels: HashSet<Source>,
    next_seq: u64,
}

impl MailboxState {
    /// Consume pending sentinels matching `spec`. A sentinel only ever
    /// releases waits on its own source.
    fn take_sentinel(&mut self, spec: &WaitSource) -> bool {
        let before = self.sentinels.len();
        self.sentinels.retain(|source| !spec.matches(source));
        self.sentinels.len() != before
    }

    fn first_matching_at(&self, spec: &WaitSource) -> Option<Instant> {
        self.queues
            .iter()
            .filter(|(source, queue)| spec.matches(source) && !queue.is_empty())
            .filter_map(|(_, queue)| queue.front().map(|b| b.at))
            .min()
    }

    fn drain_matching(&mut self, spec: &WaitSource) -> Vec<Message> {
        let mut drained: Vec<(u64, Message)> = Vec::new();
        self.queues.retain(|source, queue| {
            if spec.matches(source) {
                drained.extend(queue.drain(..).map(|b| (b.seq, b.message)));
                false
            } else {
                true
            }
        });
        drained.sort_by_key(|(seq, _)| *seq);
        drained.into_iter().map(|(_, message)| message).collect()
    }
}

/// One agent's inbound mailbox
#[derive(Debug)]
pub struct Mailbox {
    owner: AgentId,
    state: Mutex<MailboxState>,
    notify: Notify,
    cancel: CancellationToken,
}

impl Mailbox {
    /// Create a mailbox bound to the program-wide cancellation token
    pub fn new(owner: impl Into<AgentId>, cancel: CancellationToken) -> Self {
        Self {
            owner: owner.into(),
            state: Mutex::new(MailboxState::default()),
            notify: Notify::new(),
            cancel: cancel.clone(),
        }
    }

    /// Owning agent id
    pub fn owner(&self) -> &AgentId {
        &self.owner
    }

    /// Enqueue a message and signal any waiter. Fire-and-forget: a full
    /// or unwatched mailbox is not an error.
    pub async fn deliver(&self, message: Message) {
        {
            let mut state = self.state.lock().await;
            if message.is_sentinel() {
                state.sentinels.insert(Source::of(&message));
            } else {
                let source = Source::of(&message);
                let seq = state.next_seq;
                state.next_seq += 1;
                tracing::debug!(
                    owner = %self.owner,
                    source = ?source,
                    seq,
                    "mailbox delivery"
                );
                state.queues.entry(source).or_default().push_back(Buffered {
                    message,
                    seq,
                    at: Instant::now(),
                });
            }
        }
        self.notify.notify_waiters();
    }

    /// Number of buffered messages, across all sources
    pub async fn buffered(&self) -> usize {
        let state = self.state.lock().await;
        state.queues.values().map(|q| q.len()).sum()
    }

    /// Wait for messages from `spec`, honoring the buffering policy.
    ///
    /// Suspends only the calling task. Returns the qualifying messages
    /// in arrival order; non-qualifying messages stay buffered for
    /// later waits. A consumed sentinel may yield an empty batch.
    pub async fn wait_for(
        &self,
        spec: &WaitSource,
        window: Duration,
    ) -> Result<Vec<Message>, MailboxError> {
        let meeting_wait = matches!(spec, WaitSource::Meeting(_));
        loop {
            if self.cancel.is_cancelled() {
                return Err(MailboxError::Terminated);
            }

            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let deadline = {
                let mut state = self.state.lock().await;
                if state.take_sentinel(spec) {
                    return Ok(state.drain_matching(spec));
                }
                match state.first_matching_at(spec) {
                    Some(first_at) => {
                        let elapsed = first_at.elapsed();
                        if !meeting_wait || elapsed >= window {
                            return Ok(state.drain_matching(spec));
                        }
                        Some(first_at + window)
                    }
                    None => None,
                }
            };

            match deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                        _ = self.cancel.cancelled() => return Err(MailboxError::Terminated),
                    }
                }
                None => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = self.cancel.cancelled() => return Err(MailboxError::Terminated),
                    }
                }
            }
        }
    }
}
