//! Meeting subsystem - owner-managed multi-party sessions
//!
//! A meeting is owned by the agent that created it and mutated only by
//! that agent's task. Participants never touch the shared history; they
//! receive pushed copies through their mailboxes, so no locks are
//! needed.
//!
//! Join policy: invitees answer an invitation with explicit
//! `JOINED`/`REJECTED` tokens. There is no auto-accept path.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::time::Instant;

use huddle_core::types::{AgentId, Endpoint, MeetingId, Message, MessageKind};

use crate::mailbox::{Mailbox, MailboxError, WaitSource};
use crate::program::Router;

/// Issues monotonically increasing meeting ids, shared program-wide.
#[derive(Debug)]
pub struct MeetingRegistry {
    next_id: AtomicU64,
}

impl MeetingRegistry {
    /// Create a registry starting at id 1
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate the next meeting id
    pub fn allocate(&self) -> MeetingId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for MeetingRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// One entry in a meeting's shared history
#[derive(Debug, Clone)]
pub struct MeetingMessage {
    /// Who said it
    pub sender: Endpoint,
    /// What was said (untagged payload)
    pub text: String,
    /// When it was appended
    pub at: DateTime<Utc>,
}

/// An owner-managed multi-party session.
///
/// The owner is implicit: it holds the history directly and is not
/// listed in `participants`, so distribution never echoes back to it.
#[derive(Debug)]
pub struct Meeting {
    /// Meeting id
    pub id: MeetingId,
    /// Owning agent id
    pub owner: AgentId,
    /// Topic line shared with invitees
    pub topic: String,
    /// Joined participants (excluding the owner)
    pub participants: BTreeSet<Endpoint>,
    /// Invited but not yet joined
    pub pending_invites: BTreeSet<Endpoint>,
    history: Vec<MeetingMessage>,
    last_read: HashMap<Endpoint, usize>,
}

impl Meeting {
    /// Ordered message history
    pub fn history(&self) -> &[MeetingMessage] {
        &self.history
    }

    /// Last-delivered history index for a participant
    pub fn last_read(&self, participant: &Endpoint) -> usize {
        self.last_read.get(participant).copied().unwrap_or(0)
    }
}

/// Meeting subsystem errors
#[derive(Debug, Error)]
pub enum MeetingError {
    #[error("unknown meeting {0}")]
    UnknownMeeting(MeetingId),
    #[error("meeting {id} timed out waiting for attendees: {}", .missing.join(", "))]
    AttendeeTimeout {
        id: MeetingId,
        missing: Vec<String>,
    },
    #[error(transparent)]
    Terminated(#[from] MailboxError),
}

/// Per-owner meeting manager. Lives inside the owning agent's task.
pub struct MeetingManager {
    owner: AgentId,
    registry: Arc<MeetingRegistry>,
    router: Router,
    meetings: HashMap<MeetingId, Meeting>,
}

impl MeetingManager {
    /// Create a manager for one owner
    pub fn new(owner: impl Into<AgentId>, registry: Arc<MeetingRegistry>, router: Router) -> Self {
        Self {
            owner: owner.into(),
            registry,
            router,
            meetings: HashMap::new(),
        }
    }

    /// Look up an owned meeting
    pub fn get(&self, id: MeetingId) -> Option<&Meeting> {
        self.meetings.get(&id)
    }

    /// Whether this manager owns the meeting
    pub fn owns(&self, id: MeetingId) -> bool {
        self.meetings.contains_key(&id)
    }

    /// Create a meeting, recording pending invitations. Invitees are not
    /// notified until [`MeetingManager::send_invitations`] or
    /// [`MeetingManager::invite`].
    pub async fn create(&mut self, topic: impl Into<String>, invitees: Vec<Endpoint>) -> MeetingId {
        let id = self.registry.allocate();
        let owner_endpoint = Endpoint::Agent(self.owner.clone());
        let pending: BTreeSet<Endpoint> = invitees
            .into_iter()
            .filter(|e| *e != owner_endpoint)
            .collect();
        self.router.register_meeting(id, self.owner.clone()).await;
        self.meetings.insert(
            id,
            Meeting {
                id,
                owner: self.owner.clone(),
                topic: topic.into(),
                participants: BTreeSet::new(),
                pending_invites: pending,
                history: Vec::new(),
                last_read: HashMap::new(),
            },
        );
        tracing::debug!(owner = %self.owner, meeting = id, "meeting created");
        id
    }

    /// Invite one endpoint. Idempotent: already-joined or already-invited
    /// targets are skipped without a duplicate invitation.
    pub async fn invite(&mut self, id: MeetingId, invitee: Endpoint) -> Result<(), MeetingError> {
        let meeting = self
            .meetings
            .get_mut(&id)
            .ok_or(MeetingError::UnknownMeeting(id))?;
        if meeting.participants.contains(&invitee) {
            return Ok(());
        }
        let already_invited = !meeting.pending_invites.insert(invitee.clone());
        if already_invited {
            return Ok(());
        }
        let topic = meeting.topic.clone();
        self.router
            .route(Message::meeting_invite(
                Endpoint::Agent(self.owner.clone()),
                invitee,
                id,
                topic,
            ))
            .await;
        Ok(())
    }

    /// Send the invitation message to every pending invitee.
    pub async fn send_invitations(&mut self, id: MeetingId) -> Result<(), MeetingError> {
        let meeting = self
            .meetings
            .get(&id)
            .ok_or(MeetingError::UnknownMeeting(id))?;
        let topic = meeting.topic.clone();
        let pending: Vec<Endpoint> = meeting.pending_invites.iter().cloned().collect();
        for invitee in pending {
            self.router
                .route(Message::meeting_invite(
                    Endpoint::Agent(self.owner.clone()),
                    invitee,
                    id,
                    &topic,
                ))
                .await;
        }
        Ok(())
    }

    /// Process one inbound message against owned meetings.
    ///
    /// Lifecycle tokens update the participant/pending sets and return
    /// `None` so they never reach the step executor. Broadcast content
    /// is appended to history, redistributed, and returned for the
    /// transcript. Anything else passes through untouched.
    pub async fn handle_message(
        &mut self,
        message: &Message,
    ) -> Result<Option<String>, MeetingError> {
        match message.kind() {
            MessageKind::MeetingJoined { meeting_id } => {
                let meeting = self
                    .meetings
                    .get_mut(&meeting_id)
                    .ok_or(MeetingError::UnknownMeeting(meeting_id))?;
                if meeting.pending_invites.remove(&message.sender) {
                    meeting
                        .last_read
                        .insert(message.sender.clone(), meeting.history.len());
                    meeting.participants.insert(message.sender.clone());
                    tracing::debug!(meeting = meeting_id, who = %message.sender, "joined");
                } else if !meeting.participants.contains(&message.sender) {
                    tracing::warn!(
                        meeting = meeting_id,
                        who = %message.sender,
                        "uninvited join ignored"
                    );
                }
                Ok(None)
            }
            MessageKind::MeetingRejected { meeting_id } => {
                let meeting = self
                    .meetings
                    .get_mut(&meeting_id)
                    .ok_or(MeetingError::UnknownMeeting(meeting_id))?;
                meeting.pending_invites.remove(&message.sender);
                tracing::debug!(meeting = meeting_id, who = %message.sender, "rejected");
                Ok(None)
            }
            MessageKind::MeetingEnded { meeting_id } => {
                let meeting = self
                    .meetings
                    .get_mut(&meeting_id)
                    .ok_or(MeetingError::UnknownMeeting(meeting_id))?;
                meeting.participants.remove(&message.sender);
                meeting.last_read.remove(&message.sender);
                Ok(None)
            }
            MessageKind::MeetingBroadcast {
                meeting_id,
                payload,
            } => {
                if !self.owns(meeting_id) {
                    // Participant side: the copy is already ours to read.
                    return Ok(Some(payload));
                }
                self.append(meeting_id, message.sender.clone(), &payload)?;
                self.distribute(meeting_id).await?;
                Ok(Some(payload))
            }
            _ => Ok(Some(message.body.clone())),
        }
    }

    /// Broadcast text into a meeting on behalf of `sender`.
    pub async fn broadcast(
        &mut self,
        id: MeetingId,
        sender: Endpoint,
        text: impl AsRef<str>,
    ) -> Result<(), MeetingError> {
        self.append(id, sender, text.as_ref())?;
        self.distribute(id).await
    }

    /// End a meeting: notify every participant, then drop it.
    pub async fn end(&mut self, id: MeetingId) -> Result<(), MeetingError> {
        let meeting = self
            .meetings
            .remove(&id)
            .ok_or(MeetingError::UnknownMeeting(id))?;
        for participant in meeting.participants {
            self.router
                .route(Message::meeting_ended(
                    Endpoint::Agent(self.owner.clone()),
                    participant,
                    id,
                ))
                .await;
        }
        Ok(())
    }

    fn append(&mut self, id: MeetingId, sender: Endpoint, text: &str) -> Result<(), MeetingError> {
        let meeting = self
            .meetings
            .get_mut(&id)
            .ok_or(MeetingError::UnknownMeeting(id))?;
        meeting.history.push(MeetingMessage {
            sender,
            text: text.to_string(),
            at: Utc::now(),
        });
        Ok(())
    }

    /// Delta-based fan-out: each participant receives only the unread
    /// tail of the history, minus its own messages, and its last-read
    /// index advances to the history length.
    async fn distribute(&mut self, id: MeetingId) -> Result<(), MeetingError> {
        let mut outbound = Vec::new();
        {
            let meeting = self
                .meetings
                .get_mut(&id)
                .ok_or(MeetingError::UnknownMeeting(id))?;
            let history_len = meeting.history.len();
            for participant in meeting.participants.iter() {
                let from = meeting.last_read.get(participant).copied().unwrap_or(0);
                for entry in &meeting.history[from..] {
                    if entry.sender == *participant {
                        continue;
                    }
                    outbound.push(Message::meeting_broadcast(
                        entry.sender.clone(),
                        participant.clone(),
                        id,
                        &entry.text,
                    ));
                }
            }
            let participants: Vec<Endpoint> = meeting.participants.iter().cloned().collect();
            for participant in participants {
                meeting.last_read.insert(participant, history_len);
            }
        }
        for message in outbound {
            self.router.route(message).await;
        }
        Ok(())
    }

    /// Block until all required attendees have joined, or fail after
    /// `timeout` naming the missing ones. Built on the owning agent's
    /// mailbox wait; join/reject tokens arriving meanwhile are absorbed.
    pub async fn wait_for_attendees(
        &mut self,
        id: MeetingId,
        required: &[Endpoint],
        timeout: Duration,
        mailbox: &Mailbox,
        window: Duration,
    ) -> Result<(), MeetingError> {
        let deadline = Instant::now() + timeout;
        loop {
            let missing = self.missing_attendees(id, required)?;
            if missing.is_empty() {
                return Ok(());
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(MeetingError::AttendeeTimeout { id, missing });
            }

            match tokio::time::timeout(
                remaining,
                mailbox.wait_for(&WaitSource::Meeting(id), window),
            )
            .await
            {
                Err(_) => {
                    let missing = self.missing_attendees(id, required)?;
                    if missing.is_empty() {
                        return Ok(());
                    }
                    return Err(MeetingError::AttendeeTimeout { id, missing });
                }
                Ok(Err(e)) => return Err(MeetingError::from(e)),
                Ok(Ok(batch)) => {
                    for message in batch {
                        self.handle_message(&message).await?;
                    }
                }
            }
        }
    }

    fn missing_attendees(
        &self,
        id: MeetingId,
        required: &[Endpoint],
    ) -> Result<Vec<String>, MeetingError> {
        let meeting = self
            .meetings
            .get(&id)
            .ok_or(MeetingError::UnknownMeeting(id))?;
        Ok(required
            .iter()
            .filter(|r| !meeting.participants.contains(r))
            .map(|r| r.to_string())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::Mailbox;
    use crate::program::Router;
    use tokio_util::sync::CancellationToken;

    fn agent(id: &str) -> Endpoint {
        Endpoint::Agent(id.to_string())
    }

    async fn manager_with_router() -> (MeetingManager, Router) {
        let router = Router::new();
        let manager = MeetingManager::new(
            "owner-1",
            Arc::new(MeetingRegistry::new()),
            router.clone(),
        );
        (manager, router)
    }

    #[tokio::test]
    async fn test_registry_ids_are_monotonic() {
        let registry = MeetingRegistry::new();
        let a = registry.allocate();
        let b = registry.allocate();
        let c = registry.allocate();
        assert!(a < b && b < c);
    }

    #[tokio::test]
    async fn test_create_records_pending_without_notifying() {
        let (mut manager, router) = manager_with_router().await;
        let cancel = CancellationToken::new();
        let b_mailbox = Arc::new(Mailbox::new("b", cancel.clone()));
        router.register_agent("b".to_string(), b_mailbox.clone()).await;

        let id = manager.create("standup", vec![agent("b")]).await;
        let meeting = manager.get(id).expect("meeting");
        assert!(meeting.pending_invites.contains(&agent("b")));
        assert_eq!(b_mailbox.buffered().await, 0);

        manager.send_invitations(id).await.expect("invitations");
        assert_eq!(b_mailbox.buffered().await, 1);
    }

    #[tokio::test]
    async fn test_invite_is_idempotent() {
        let (mut manager, router) = manager_with_router().await;
        let cancel = CancellationToken::new();
        let b_mailbox = Arc::new(Mailbox::new("b", cancel.clone()));
        router.register_agent("b".to_string(), b_mailbox.clone()).await;

        let id = manager.create("standup", vec![]).await;
        manager.invite(id, agent("b")).await.expect("invite");
        manager.invite(id, agent("b")).await.expect("re-invite");
        assert_eq!(b_mailbox.buffered().await, 1);

        // Joined targets are skipped too.
        let join = Message::meeting_joined(agent("b"), agent("owner-1"), id);
        manager.handle_message(&join).await.expect("join");
        manager.invite(id, agent("b")).await.expect("post-join invite");
        assert_eq!(b_mailbox.buffered().await, 1);
    }

    #[tokio::test]
    async fn test_lifecycle_tokens_update_sets_and_stay_hidden() {
        let (mut manager, _router) = manager_with_router().await;
        let id = manager.create("sync", vec![agent("b"), agent("c")]).await;

        let join = Message::meeting_joined(agent("b"), agent("owner-1"), id);
        assert_eq!(manager.handle_message(&join).await.expect("join"), None);
        let reject = Message::meeting_rejected(agent("c"), agent("owner-1"), id);
        assert_eq!(manager.handle_message(&reject).await.expect("reject"), None);

        let meeting = manager.get(id).expect("meeting");
        assert!(meeting.participants.contains(&agent("b")));
        assert!(meeting.pending_invites.is_empty());

        let leave = Message::meeting_ended(agent("b"), agent("owner-1"), id);
        assert_eq!(manager.handle_message(&leave).await.expect("leave"), None);
        assert!(manager.get(id).expect("meeting").participants.is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_delivers_unread_tail_in_order() {
        let (mut manager, router) = manager_with_router().await;
        let cancel = CancellationToken::new();
        let b_mailbox = Arc::new(Mailbox::new("b", cancel.clone()));
        router.register_agent("b".to_string(), b_mailbox.clone()).await;

        let id = manager.create("retro", vec![agent("b")]).await;
        let join = Message::meeting_joined(agent("b"), agent("owner-1"), id);
        manager.handle_message(&join).await.expect("join");

        manager
            .broadcast(id, agent("owner-1"), "x")
            .await
            .expect("broadcast x");
        manager
            .broadcast(id, agent("owner-1"), "y")
            .await
            .expect("broadcast y");

        let batch = b_mailbox
            .wait_for(&WaitSource::Meeting(id), Duration::from_millis(10))
            .await
            .expect("wait");
        let bodies: Vec<String> = batch.iter().map(|m| m.body.clone()).collect();
        assert_eq!(
            bodies,
            vec![format!("MEETING:{}:x", id), format!("MEETING:{}:y", id)]
        );
        assert_eq!(
            manager.get(id).expect("meeting").last_read(&agent("b")),
            2
        );
    }

    #[tokio::test]
    async fn test_broadcast_excludes_the_sender() {
        let (mut manager, router) = manager_with_router().await;
        let cancel = CancellationToken::new();
        let b_mailbox = Arc::new(Mailbox::new("b", cancel.clone()));
        let c_mailbox = Arc::new(Mailbox::new("c", cancel.clone()));
        router.register_agent("b".to_string(), b_mailbox.clone()).await;
        router.register_agent("c".to_string(), c_mailbox.clone()).await;

        let id = manager.create("sync", vec![agent("b"), agent("c")]).await;
        for who in ["b", "c"] {
            let join = Message::meeting_joined(agent(who), agent("owner-1"), id);
            manager.handle_message(&join).await.expect("join");
        }

        // b speaks: c hears it, b does not hear itself.
        let from_b = Message::meeting_broadcast(agent("b"), agent("owner-1"), id, "hello all");
        let surfaced = manager.handle_message(&from_b).await.expect("broadcast");
        assert_eq!(surfaced, Some("hello all".to_string()));
        assert_eq!(b_mailbox.buffered().await, 0);
        assert_eq!(c_mailbox.buffered().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attendee_wait_succeeds_when_all_join() {
        let (mut manager, _router) = manager_with_router().await;
        let cancel = CancellationToken::new();
        let mailbox = Arc::new(Mailbox::new("owner-1", cancel.clone()));

        let id = manager.create("kickoff", vec![agent("b")]).await;
        mailbox
            .deliver(Message::meeting_joined(agent("b"), agent("owner-1"), id))
            .await;

        manager
            .wait_for_attendees(
                id,
                &[agent("b")],
                Duration::from_secs(10),
                &mailbox,
                Duration::from_secs(1),
            )
            .await
            .expect("attendees");
        assert!(manager.get(id).expect("meeting").participants.contains(&agent("b")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attendee_timeout_names_missing() {
        let (mut manager, _router) = manager_with_router().await;
        let cancel = CancellationToken::new();
        let mailbox = Arc::new(Mailbox::new("owner-1", cancel.clone()));

        let id = manager.create("kickoff", vec![agent("b"), agent("c")]).await;
        mailbox
            .deliver(Message::meeting_joined(agent("b"), agent("owner-1"), id))
            .await;

        let result = manager
            .wait_for_attendees(
                id,
                &[agent("b"), agent("c")],
                Duration::from_secs(5),
                &mailbox,
                Duration::from_secs(1),
            )
            .await;
        match result {
            Err(MeetingError::AttendeeTimeout { missing, .. }) => {
                assert_eq!(missing, vec!["c".to_string()]);
            }
            other => panic!("expected attendee timeout, got {:?}", other.map(|_| ())),
        }
    }
}
