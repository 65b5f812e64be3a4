//! Agent orchestrator - the execute_playbook state machine.
//!
//! The orchestrator owns one agent's mutable execution state (call
//! stack, variables, transcript) and walks playbook step graphs,
//! delegating step interpretation to a [`StepExecutor`] and applying the
//! directives it answers with. Playbook failures are values; the only
//! abort path is program termination.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use huddle_config::RuntimeConfig;
use huddle_core::graph::{GraphError, StepGraph};
use huddle_core::log::render_value;
use huddle_core::types::{AgentId, Endpoint, Message, MessageKind, Playbook, StepKind};
use huddle_core::{Artifact, CallStack, CallStackFrame, SessionLog, VariableStore};

use crate::executor::{Directive, ExecutorError, StepExecutor, StepRequest};
use crate::mailbox::{MailboxError, SharedMailbox, WaitSource};
use crate::meeting::{MeetingError, MeetingManager};
use crate::registry::CapabilityRegistry;
use crate::program::Router;

/// How a playbook invocation ended. Both variants are ordinary data a
/// calling playbook can react to.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybookOutcome {
    /// The playbook returned a value (possibly null)
    Returned(Value),
    /// The playbook failed; the reason is surfaced to the caller
    Failed(String),
}

/// Fatal orchestrator errors. Everything recoverable travels as a
/// [`PlaybookOutcome::Failed`] instead.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("unknown playbook {0}")]
    UnknownPlaybook(String),
    #[error("invalid playbook structure: {0}")]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error("program terminated")]
    Terminated,
}

impl From<MailboxError> for OrchestratorError {
    fn from(_: MailboxError) -> Self {
        OrchestratorError::Terminated
    }
}

/// Per-agent playbook execution engine.
pub struct Orchestrator {
    agent: AgentId,
    klass: String,
    playbooks: HashMap<String, Playbook>,
    executor: Arc<dyn StepExecutor>,
    mailbox: SharedMailbox,
    router: Router,
    meetings: MeetingManager,
    capabilities: CapabilityRegistry,
    config: RuntimeConfig,
    cancel: CancellationToken,
    variables: VariableStore,
    call_stack: CallStack,
    log: SessionLog,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        agent: impl Into<AgentId>,
        klass: impl Into<String>,
        playbooks: Vec<Playbook>,
        executor: Arc<dyn StepExecutor>,
        mailbox: SharedMailbox,
        router: Router,
        meetings: MeetingManager,
        capabilities: CapabilityRegistry,
        config: RuntimeConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            agent: agent.into(),
            klass: klass.into(),
            playbooks: playbooks.into_iter().map(|p| (p.name.clone(), p)).collect(),
            executor,
            mailbox,
            router,
            meetings,
            capabilities,
            config,
            cancel,
            variables: VariableStore::new(),
            call_stack: CallStack::new(),
            log: SessionLog::new(),
        }
    }

    /// Owning agent id
    pub fn agent(&self) -> &AgentId {
        &self.agent
    }

    /// Agent class name
    pub fn klass(&self) -> &str {
        &self.klass
    }

    /// Names of playbooks callable by other agents
    pub fn public_playbooks(&self) -> Vec<String> {
        self.playbooks
            .values()
            .filter(|p| p.public)
            .map(|p| p.name.clone())
            .collect()
    }

    /// The execution transcript so far
    pub fn log(&self) -> &SessionLog {
        &self.log
    }

    /// The agent's variable store
    pub fn variables(&self) -> &VariableStore {
        &self.variables
    }

    /// The current call stack
    pub fn call_stack(&self) -> &CallStack {
        &self.call_stack
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run one playbook to completion.
    ///
    /// A frame is pushed for the invocation and popped on the way out,
    /// whatever the outcome. The only `Err` paths are termination and
    /// infrastructure faults; a misbehaving playbook comes back as
    /// [`PlaybookOutcome::Failed`].
    pub async fn execute_playbook(
        &mut self,
        name: &str,
        args: Value,
    ) -> Result<PlaybookOutcome, OrchestratorError> {
        let graph = self
            .playbooks
            .get_mut(name)
            .ok_or_else(|| OrchestratorError::UnknownPlaybook(name.to_string()))?
            .graph()?;
        let entry = graph.entry().position.clone();
        self.call_stack
            .push(CallStackFrame::new(name, entry.clone()));
        self.bind_args(&args);
        tracing::info!(agent = %self.agent, playbook = name, "playbook started");

        let result = self.run(name, &graph).await;
        self.call_stack.pop();
        match &result {
            Ok(PlaybookOutcome::Returned(_)) => {
                tracing::info!(agent = %self.agent, playbook = name, "playbook returned")
            }
            Ok(PlaybookOutcome::Failed(reason)) => {
                tracing::warn!(agent = %self.agent, playbook = name, reason, "playbook failed")
            }
            Err(e) => {
                tracing::warn!(agent = %self.agent, playbook = name, error = %e, "playbook aborted")
            }
        }
        result
    }

    /// Bind call arguments as variables: object fields become one
    /// variable each, any other non-null value binds as `input`.
    fn bind_args(&mut self, args: &Value) {
        let origin = self.origin();
        match args {
            Value::Null => {}
            Value::Object(map) => {
                for (key, value) in map {
                    self.variables.set(key.clone(), value.clone(), origin.clone());
                }
            }
            other => self.variables.set("input", other.clone(), origin),
        }
    }

    fn origin(&self) -> String {
        self.call_stack
            .peek()
            .map(|f| f.trace_label())
            .unwrap_or_else(|| self.agent.clone())
    }

    async fn run(
        &mut self,
        playbook: &str,
        graph: &Arc<StepGraph>,
    ) -> Result<PlaybookOutcome, OrchestratorError> {
        let mut position = graph.entry().position.clone();
        loop {
            if self.cancel.is_cancelled() {
                return Err(OrchestratorError::Terminated);
            }
            let step = match graph.get(&position) {
                Some(step) => step.clone(),
                None => {
                    return Ok(PlaybookOutcome::Failed(format!(
                        "step {} disappeared from {}",
                        position, playbook
                    )))
                }
            };
            if let Some(frame) = self.call_stack.peek_mut() {
                frame.advance_to(position.clone());
            }
            tracing::debug!(
                agent = %self.agent,
                playbook,
                position = %position,
                kind = %step.kind,
                "executing step"
            );

            // Notes are documentation; they land in the transcript
            // without consulting the executor.
            if step.kind == StepKind::Note {
                self.log.append_note(step.text.clone());
                match graph.get_next(&position) {
                    Some(next) => {
                        position = next.position.clone();
                        continue;
                    }
                    None => return Ok(PlaybookOutcome::Returned(Value::Null)),
                }
            }

            let request = StepRequest {
                agent: self.agent.clone(),
                playbook: playbook.to_string(),
                position: position.clone(),
                kind: step.kind,
                instruction: step.text.clone(),
                loop_exit: graph.loop_exit(&position).map(|s| s.position.clone()),
                else_branch: graph.else_of(&position).map(|s| s.position.clone()),
                join: graph.join_of(&position).map(|s| s.position.clone()),
                call_stack: self.call_stack.to_trace(),
                variables: self.variables.snapshot(),
                transcript: self.log.render(),
            };
            let directives = self.executor.execute_step(request).await?;

            let mut moved = None;
            let mut finished = None;
            let mut waited = false;
            for directive in directives {
                if finished.is_some() {
                    break;
                }
                match directive {
                    Directive::AdvanceTo(target) => {
                        if graph.contains(&target) {
                            moved = Some(target);
                        } else {
                            finished = Some(PlaybookOutcome::Failed(format!(
                                "cannot advance to unknown step {}",
                                target
                            )));
                        }
                    }
                    Directive::SetVariable { name, value } => {
                        let origin = self.origin();
                        self.variables.set(name, value, origin);
                    }
                    Directive::CallPlaybook {
                        target,
                        args,
                        result_var,
                    } => {
                        let outcome = self.call_playbook(&target, args).await?;
                        self.record_outcome(&target, outcome, result_var.as_deref());
                    }
                    Directive::Say { target, content } => {
                        self.log.append_message(
                            Endpoint::Agent(self.agent.clone()).attribution(),
                            &content,
                        );
                        self.router
                            .route(Message::chat(
                                Endpoint::Agent(self.agent.clone()),
                                target,
                                content,
                            ))
                            .await;
                    }
                    Directive::Wait { source } => {
                        waited = true;
                        let batch = self
                            .mailbox
                            .wait_for(&source, self.config.buffer_window())
                            .await?;
                        self.absorb(batch).await?;
                    }
                    Directive::CreateMeeting {
                        topic,
                        invitees,
                        required,
                    } => {
                        let id = self.meetings.create(topic, invitees).await;
                        if let Err(e) = self.meetings.send_invitations(id).await {
                            finished = Some(PlaybookOutcome::Failed(e.to_string()));
                            continue;
                        }
                        let attended = self
                            .meetings
                            .wait_for_attendees(
                                id,
                                &required,
                                self.config.attendee_timeout(),
                                self.mailbox.as_ref(),
                                self.config.buffer_window(),
                            )
                            .await;
                        match attended {
                            Ok(()) => {
                                let origin = self.origin();
                                self.variables.set("meeting_id", Value::from(id), origin);
                                self.log.append_note(format!("meeting {} open", id));
                            }
                            Err(MeetingError::Terminated(_)) => {
                                return Err(OrchestratorError::Terminated)
                            }
                            Err(e) => finished = Some(PlaybookOutcome::Failed(e.to_string())),
                        }
                    }
                    Directive::Broadcast { meeting_id, text } => {
                        match self
                            .meetings
                            .broadcast(meeting_id, Endpoint::Agent(self.agent.clone()), &text)
                            .await
                        {
                            Ok(()) => self.log.append_message(
                                Endpoint::Agent(self.agent.clone()).attribution(),
                                &text,
                            ),
                            Err(MeetingError::Terminated(_)) => {
                                return Err(OrchestratorError::Terminated)
                            }
                            Err(e) => finished = Some(PlaybookOutcome::Failed(e.to_string())),
                        }
                    }
                    Directive::Return(value) => {
                        finished = Some(PlaybookOutcome::Returned(value));
                    }
                    Directive::Fail(reason) => {
                        finished = Some(PlaybookOutcome::Failed(reason));
                    }
                }
            }

            if let Some(outcome) = finished {
                return Ok(outcome);
            }
            if let Some(target) = moved {
                position = target;
                continue;
            }
            // A yield step suspends even when the executor gave no
            // explicit wait directive.
            if step.kind == StepKind::Yield && !waited {
                let batch = self
                    .mailbox
                    .wait_for(&WaitSource::Any, self.config.buffer_window())
                    .await?;
                self.absorb(batch).await?;
            }
            if step.kind == StepKind::Return {
                return Ok(PlaybookOutcome::Returned(Value::Null));
            }
            match graph.get_next(&position) {
                Some(next) => position = next.position.clone(),
                None => return Ok(PlaybookOutcome::Returned(Value::Null)),
            }
        }
    }

    /// Dispatch a playbook call: local by bare name, otherwise resolved
    /// through the capability registry. An unresolvable target or an
    /// exceeded call depth is a failed outcome for the caller, not an
    /// abort.
    async fn call_playbook(
        &mut self,
        target: &str,
        args: Value,
    ) -> Result<PlaybookOutcome, OrchestratorError> {
        let (klass, name) = CapabilityRegistry::parse_target(target);
        self.log.append_call(name, &call_args(&args));

        if self.call_stack.depth() >= self.config.max_call_depth {
            return Ok(PlaybookOutcome::Failed(format!(
                "call depth limit {} reached calling {}",
                self.config.max_call_depth, target
            )));
        }

        if klass.is_none() && self.playbooks.contains_key(name) {
            let name = name.to_string();
            return self.call_local(name, args).await;
        }

        match self.capabilities.resolve(klass, name).await {
            Some(handle) if handle.agent == self.agent => {
                // Calling through our own queue would deadlock; run it
                // in place instead.
                let name = handle.playbook.clone();
                self.call_local(name, args).await
            }
            Some(handle) => {
                tracing::debug!(
                    agent = %self.agent,
                    target = %target,
                    resolved = %handle.agent,
                    "cross-agent call"
                );
                Ok(handle.call(args).await)
            }
            None => Ok(PlaybookOutcome::Failed(format!(
                "no agent provides playbook {}",
                target
            ))),
        }
    }

    fn call_local(
        &mut self,
        name: String,
        args: Value,
    ) -> Pin<Box<dyn Future<Output = Result<PlaybookOutcome, OrchestratorError>> + Send + '_>>
    {
        Box::pin(async move { self.execute_playbook(&name, args).await })
    }

    /// Record a call result in the transcript and variable store. A
    /// returned value whose rendering exceeds the inline threshold is
    /// wrapped as an artifact: named after `result_var` when one was
    /// given, content-derived otherwise.
    fn record_outcome(&mut self, target: &str, outcome: PlaybookOutcome, result_var: Option<&str>) {
        let (_, name) = CapabilityRegistry::parse_target(target);
        match outcome {
            PlaybookOutcome::Failed(reason) => {
                self.log.append_result(name, format!("failed: {}", reason));
                if let Some(var) = result_var {
                    let origin = self.origin();
                    self.variables
                        .set(var, serde_json::json!({ "error": reason }), origin);
                }
            }
            PlaybookOutcome::Returned(value) => {
                let rendered = if value.is_null() {
                    "ok".to_string()
                } else {
                    render_value(&value)
                };
                if rendered.chars().count() > self.config.artifact_inline_threshold {
                    let artifact_name = result_var
                        .map(str::to_string)
                        .unwrap_or_else(|| Artifact::derived_name(&rendered));
                    let artifact =
                        Artifact::new(artifact_name, format!("result of {}()", name), rendered);
                    let reference = artifact.reference();
                    self.variables.store_artifact(artifact);
                    self.log.append_result(name, reference);
                } else {
                    if let Some(var) = result_var {
                        let origin = self.origin();
                        self.variables.set(var, value, origin);
                    }
                    self.log.append_result(name, rendered);
                }
            }
        }
    }

    /// Fold a released mailbox batch into meeting state and the
    /// transcript. Lifecycle tokens never surface as content.
    async fn absorb(&mut self, batch: Vec<Message>) -> Result<(), OrchestratorError> {
        for message in batch {
            let owned = message
                .meeting_id
                .map(|id| self.meetings.owns(id))
                .unwrap_or(false);
            let surfaced = if owned {
                match self.meetings.handle_message(&message).await {
                    Ok(surfaced) => surfaced,
                    Err(MeetingError::Terminated(_)) => return Err(OrchestratorError::Terminated),
                    Err(e) => {
                        tracing::warn!(agent = %self.agent, error = %e, "meeting message dropped");
                        None
                    }
                }
            } else {
                match message.kind() {
                    MessageKind::MeetingEnded { meeting_id } => {
                        self.log.append_note(format!("meeting {} ended", meeting_id));
                        None
                    }
                    MessageKind::MeetingJoined { .. } | MessageKind::MeetingRejected { .. } => None,
                    MessageKind::EndOfMessages => None,
                    MessageKind::MeetingBroadcast { payload, .. } => Some(payload),
                    _ => Some(message.body.clone()),
                }
            };
            if let Some(text) = surfaced {
                self.log.append_message(message.sender.attribution(), text);
            }
        }
        Ok(())
    }
}

fn call_args(args: &Value) -> Vec<Value> {
    match args {
        Value::Null => Vec::new(),
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}
