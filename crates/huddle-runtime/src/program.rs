//! Program - agent ownership, message routing, and lifecycle.
//!
//! A program owns every agent, the routing table, the shared registries,
//! and the cancellation token that shuts the whole thing down. Routing
//! is fire-and-forget: a message to a missing destination is logged and
//! dropped, never an error for the sender.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use huddle_config::HuddleConfig;
use huddle_core::graph::GraphError;
use huddle_core::types::{AgentId, Endpoint, MeetingId, Message, Playbook};

use crate::agent::Agent;
use crate::executor::StepExecutor;
use crate::mailbox::{Mailbox, SharedMailbox};
use crate::meeting::{MeetingManager, MeetingRegistry};
use crate::orchestrator::{Orchestrator, PlaybookOutcome};
use crate::registry::CapabilityRegistry;

#[derive(Debug, Default)]
struct RouterInner {
    agents: RwLock<HashMap<AgentId, SharedMailbox>>,
    meetings: RwLock<HashMap<MeetingId, AgentId>>,
    human: RwLock<Option<mpsc::UnboundedSender<Message>>>,
}

/// Shared routing table: agent mailboxes, meeting ownership, and the
/// outbound human channel.
#[derive(Debug, Clone, Default)]
pub struct Router {
    inner: Arc<RouterInner>,
}

impl Router {
    /// Create an empty router
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent's mailbox
    pub async fn register_agent(&self, id: AgentId, mailbox: SharedMailbox) {
        self.inner.agents.write().await.insert(id, mailbox);
    }

    /// Record which agent owns a meeting
    pub async fn register_meeting(&self, id: MeetingId, owner: AgentId) {
        self.inner.meetings.write().await.insert(id, owner);
    }

    /// Attach the outbound human channel
    pub async fn set_human_channel(&self, tx: mpsc::UnboundedSender<Message>) {
        *self.inner.human.write().await = Some(tx);
    }

    /// Deliver a message to its recipient. Fire-and-forget: unknown
    /// destinations are dropped with a warning.
    pub async fn route(&self, mut message: Message) {
        match message.recipient.clone() {
            Endpoint::Human => {
                let human = self.inner.human.read().await;
                match human.as_ref() {
                    Some(tx) => {
                        let _ = tx.send(message);
                    }
                    None => tracing::debug!("no human channel attached; message dropped"),
                }
            }
            Endpoint::Agent(id) => {
                let agents = self.inner.agents.read().await;
                match agents.get(&id) {
                    Some(mailbox) => mailbox.deliver(message).await,
                    None => tracing::warn!(target_agent = %id, "message to unknown agent dropped"),
                }
            }
            Endpoint::Meeting(id) => {
                if message.meeting_id.is_none() {
                    message.meeting_id = Some(id);
                }
                let owner = self.inner.meetings.read().await.get(&id).cloned();
                match owner {
                    Some(owner) => {
                        let agents = self.inner.agents.read().await;
                        match agents.get(&owner) {
                            Some(mailbox) => mailbox.deliver(message).await,
                            None => {
                                tracing::warn!(meeting = id, owner = %owner, "meeting owner has no mailbox")
                            }
                        }
                    }
                    None => tracing::warn!(meeting = id, "message to unknown meeting dropped"),
                }
            }
        }
    }
}

/// Blueprint for one agent: its class and the playbooks it carries.
#[derive(Debug, Clone)]
pub struct AgentSpec {
    /// Agent class name, unique within a program
    pub klass: String,
    /// The agent's playbooks
    pub playbooks: Vec<Playbook>,
}

impl AgentSpec {
    /// Create a spec
    pub fn new(klass: impl Into<String>, playbooks: Vec<Playbook>) -> Self {
        Self {
            klass: klass.into(),
            playbooks,
        }
    }
}

/// Program construction and lifecycle errors. All of these are fatal:
/// a program with a bad shape never starts.
#[derive(Debug, Error)]
pub enum ProgramError {
    #[error("a program needs at least one agent")]
    NoAgents,
    #[error("agent class {0} has no playbooks")]
    NoPlaybooks(String),
    #[error("duplicate agent class {0}")]
    DuplicateAgentClass(String),
    #[error("unknown agent class {0}")]
    UnknownAgentClass(String),
    #[error("invalid playbook {klass}/{playbook}: {source}")]
    Graph {
        klass: String,
        playbook: String,
        #[source]
        source: GraphError,
    },
}

/// Top-level container: owns agents, registries, routing, and the
/// program-wide cancellation token.
pub struct Program {
    config: HuddleConfig,
    executor: Arc<dyn StepExecutor>,
    router: Router,
    capabilities: CapabilityRegistry,
    meeting_registry: Arc<MeetingRegistry>,
    cancel: CancellationToken,
    agents: HashMap<AgentId, Agent>,
    classes: HashSet<String>,
    next_agent: u64,
    human_rx: Option<mpsc::UnboundedReceiver<Message>>,
}

impl Program {
    /// Build a program from agent specs. Every playbook graph is
    /// validated up front; a structurally broken playbook fails
    /// construction rather than its first execution.
    pub async fn new(
        config: HuddleConfig,
        executor: Arc<dyn StepExecutor>,
        specs: Vec<AgentSpec>,
    ) -> Result<Self, ProgramError> {
        if specs.is_empty() {
            return Err(ProgramError::NoAgents);
        }

        let router = Router::new();
        let (human_tx, human_rx) = mpsc::unbounded_channel();
        router.set_human_channel(human_tx).await;

        let mut program = Self {
            config,
            executor,
            router,
            capabilities: CapabilityRegistry::new(),
            meeting_registry: Arc::new(MeetingRegistry::new()),
            cancel: CancellationToken::new(),
            agents: HashMap::new(),
            classes: HashSet::new(),
            next_agent: 1,
            human_rx: Some(human_rx),
        };
        for spec in specs {
            program.create_agent(spec).await?;
        }
        Ok(program)
    }

    /// Create one agent from a spec and wire it into the routing table
    /// and capability registry.
    pub async fn create_agent(&mut self, spec: AgentSpec) -> Result<AgentId, ProgramError> {
        if spec.playbooks.is_empty() {
            return Err(ProgramError::NoPlaybooks(spec.klass));
        }
        if !self.classes.insert(spec.klass.clone()) {
            return Err(ProgramError::DuplicateAgentClass(spec.klass));
        }

        let mut playbooks = spec.playbooks;
        for playbook in &mut playbooks {
            playbook.graph().map_err(|source| ProgramError::Graph {
                klass: spec.klass.clone(),
                playbook: playbook.name.clone(),
                source,
            })?;
        }

        let id = format!("{}-{}", spec.klass.to_lowercase(), self.next_agent);
        self.next_agent += 1;

        let mailbox = Arc::new(Mailbox::new(id.clone(), self.cancel.clone()));
        self.router.register_agent(id.clone(), mailbox.clone()).await;

        let (call_tx, call_rx) = mpsc::unbounded_channel();
        let meetings = MeetingManager::new(
            id.clone(),
            self.meeting_registry.clone(),
            self.router.clone(),
        );
        let orchestrator = Orchestrator::new(
            id.clone(),
            spec.klass.clone(),
            playbooks,
            self.executor.clone(),
            mailbox,
            self.router.clone(),
            meetings,
            self.capabilities.clone(),
            self.config.runtime.clone(),
            self.cancel.clone(),
        );
        self.capabilities
            .register(
                id.clone(),
                spec.klass.clone(),
                orchestrator.public_playbooks(),
                call_tx,
            )
            .await;

        self.agents.insert(id.clone(), Agent::new(orchestrator, call_rx));
        tracing::info!(agent = %id, klass = %spec.klass, "agent created");
        Ok(id)
    }

    /// Ids of agents still held by the program
    pub fn agent_ids(&self) -> Vec<AgentId> {
        self.agents.keys().cloned().collect()
    }

    /// Take one agent out for driving or spawning
    pub fn take_agent(&mut self, id: &str) -> Option<Agent> {
        self.agents.remove(id)
    }

    /// Take every remaining agent, typically to spawn their run loops
    pub fn take_agents(&mut self) -> Vec<Agent> {
        self.agents.drain().map(|(_, agent)| agent).collect()
    }

    /// Receiver of messages addressed to the human. Yields once.
    pub fn human_messages(&mut self) -> Option<mpsc::UnboundedReceiver<Message>> {
        self.human_rx.take()
    }

    /// The shared routing table
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// The program-wide cancellation token
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Route an arbitrary message (fire-and-forget)
    pub async fn route_message(&self, message: Message) {
        self.router.route(message).await;
    }

    /// Deliver a human chat line to an agent
    pub async fn send_human_message(&self, agent: &str, body: impl Into<String>) {
        self.router
            .route(Message::chat(
                Endpoint::Human,
                Endpoint::Agent(agent.to_string()),
                body,
            ))
            .await;
    }

    /// Signal that the human is done typing, releasing any buffering wait
    pub async fn end_of_human_messages(&self, agent: &str) {
        self.router
            .route(Message::end_of_messages(
                Endpoint::Human,
                Endpoint::Agent(agent.to_string()),
            ))
            .await;
    }

    /// Invoke a public playbook on an agent of the given class, waiting
    /// for its outcome. The target agent must be running via
    /// [`Agent::run`] (or about to be) for the call to complete.
    pub async fn start_playbook(
        &self,
        klass: &str,
        playbook: &str,
        args: Value,
    ) -> Result<PlaybookOutcome, ProgramError> {
        if !self.classes.contains(klass) {
            return Err(ProgramError::UnknownAgentClass(klass.to_string()));
        }
        match self.capabilities.resolve(Some(klass), playbook).await {
            Some(handle) => Ok(handle.call(args).await),
            None => Ok(PlaybookOutcome::Failed(format!(
                "no public playbook {} on class {}",
                playbook, klass
            ))),
        }
    }

    /// Fire the program-wide cancellation token. Suspended waits abort
    /// and agent run loops drain out.
    pub fn shutdown(&self) {
        tracing::info!("program shutting down");
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{Directive, ExecutorError, NoopStepExecutor, StepExecutor, StepRequest};
    use async_trait::async_trait;
    use huddle_core::types::{Step, StepPosition};
    use serde_json::json;

    fn pos(raw: &str) -> StepPosition {
        StepPosition::parse(raw).expect("position")
    }

    fn linear_playbook(name: &str, texts: &[&str]) -> Playbook {
        let steps = texts
            .iter()
            .enumerate()
            .map(|(i, text)| Step::sequential(pos(&format!("{:02}", i + 1)), *text))
            .collect();
        Playbook::with_steps(name, steps)
    }

    struct ScriptedExecutor {
        script: HashMap<(String, String), Vec<Directive>>,
    }

    impl ScriptedExecutor {
        fn new() -> Self {
            Self {
                script: HashMap::new(),
            }
        }

        fn on(mut self, playbook: &str, position: &str, directives: Vec<Directive>) -> Self {
            self.script
                .insert((playbook.to_string(), position.to_string()), directives);
            self
        }
    }

    #[async_trait]
    impl StepExecutor for ScriptedExecutor {
        async fn execute_step(
            &self,
            request: StepRequest,
        ) -> Result<Vec<Directive>, ExecutorError> {
            Ok(self
                .script
                .get(&(request.playbook.clone(), request.position.to_string()))
                .cloned()
                .unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn test_program_requires_agents() {
        let result = Program::new(
            HuddleConfig::default(),
            Arc::new(NoopStepExecutor),
            Vec::new(),
        )
        .await;
        assert!(matches!(result, Err(ProgramError::NoAgents)));
    }

    #[tokio::test]
    async fn test_agent_without_playbooks_rejected() {
        let result = Program::new(
            HuddleConfig::default(),
            Arc::new(NoopStepExecutor),
            vec![AgentSpec::new("Idle", Vec::new())],
        )
        .await;
        assert!(matches!(result, Err(ProgramError::NoPlaybooks(klass)) if klass == "Idle"));
    }

    #[tokio::test]
    async fn test_duplicate_class_rejected() {
        let spec = || AgentSpec::new("Worker", vec![linear_playbook("Main", &["go"])]);
        let result = Program::new(
            HuddleConfig::default(),
            Arc::new(NoopStepExecutor),
            vec![spec(), spec()],
        )
        .await;
        assert!(matches!(
            result,
            Err(ProgramError::DuplicateAgentClass(klass)) if klass == "Worker"
        ));
    }

    #[tokio::test]
    async fn test_broken_playbook_fails_construction() {
        // The first step must be top-level.
        let broken = Playbook::with_steps("Main", vec![Step::sequential(pos("01.01"), "lost")]);
        let result = Program::new(
            HuddleConfig::default(),
            Arc::new(NoopStepExecutor),
            vec![AgentSpec::new("Worker", vec![broken])],
        )
        .await;
        assert!(matches!(result, Err(ProgramError::Graph { .. })));
    }

    #[tokio::test]
    async fn test_start_playbook_on_unknown_class() {
        let program = Program::new(
            HuddleConfig::default(),
            Arc::new(NoopStepExecutor),
            vec![AgentSpec::new(
                "Worker",
                vec![linear_playbook("Main", &["go"])],
            )],
        )
        .await
        .expect("program");
        let result = program.start_playbook("Nobody", "Main", Value::Null).await;
        assert!(matches!(result, Err(ProgramError::UnknownAgentClass(_))));
    }

    #[tokio::test]
    async fn test_cross_agent_call_end_to_end() {
        let executor = ScriptedExecutor::new()
            .on(
                "Main",
                "01",
                vec![Directive::CallPlaybook {
                    target: "Helper.Answer".to_string(),
                    args: json!(["ultimate question"]),
                    result_var: Some("answer".to_string()),
                }],
            )
            .on("Main", "02", vec![Directive::Return(json!("done"))])
            .on("Answer", "01", vec![Directive::Return(json!(42))]);

        let mut program = Program::new(
            HuddleConfig::default(),
            Arc::new(executor),
            vec![
                AgentSpec::new("Coordinator", vec![linear_playbook("Main", &["ask", "wrap"])]),
                AgentSpec::new(
                    "Helper",
                    vec![linear_playbook("Answer", &["answer"]).with_public(true)],
                ),
            ],
        )
        .await
        .expect("program");

        let mut coordinator = program.take_agent("coordinator-1").expect("coordinator");
        let helper = program.take_agent("helper-2").expect("helper");
        let helper_task = tokio::spawn(helper.run());

        let outcome = coordinator
            .run_playbook("Main", Value::Null)
            .await
            .expect("run");
        assert_eq!(outcome, PlaybookOutcome::Returned(json!("done")));
        assert_eq!(coordinator.variables().get("answer"), Some(&json!(42)));
        let transcript = coordinator.log().render();
        assert!(transcript.contains("call Answer(\"ultimate question\")"));
        assert!(transcript.contains("Answer() → 42"));

        program.shutdown();
        helper_task.await.expect("helper task");
    }

    #[tokio::test]
    async fn test_private_playbooks_are_not_callable_across_agents() {
        let program = Program::new(
            HuddleConfig::default(),
            Arc::new(NoopStepExecutor),
            vec![AgentSpec::new(
                "Helper",
                vec![linear_playbook("Secret", &["hidden"])],
            )],
        )
        .await
        .expect("program");

        let outcome = program
            .start_playbook("Helper", "Secret", Value::Null)
            .await
            .expect("start");
        assert!(matches!(outcome, PlaybookOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_say_to_human_reaches_outbox() {
        let executor = ScriptedExecutor::new().on(
            "Main",
            "01",
            vec![
                Directive::Say {
                    target: Endpoint::Human,
                    content: "all finished".to_string(),
                },
                Directive::Return(Value::Null),
            ],
        );
        let mut program = Program::new(
            HuddleConfig::default(),
            Arc::new(executor),
            vec![AgentSpec::new(
                "Worker",
                vec![linear_playbook("Main", &["report"])],
            )],
        )
        .await
        .expect("program");

        let mut outbox = program.human_messages().expect("outbox");
        let mut worker = program.take_agent("worker-1").expect("worker");
        worker.run_playbook("Main", Value::Null).await.expect("run");

        let message = outbox.recv().await.expect("message");
        assert_eq!(message.body, "all finished");
        assert_eq!(message.sender, Endpoint::Agent("worker-1".to_string()));
    }

    #[tokio::test]
    async fn test_router_and_mailboxes_are_debug_formattable() {
        let router = Router::new();
        let mailbox = Arc::new(Mailbox::new("a1", CancellationToken::new()));
        router.register_agent("a1".to_string(), mailbox).await;
        let rendered = format!("{:?}", router);
        assert!(rendered.contains("Router"));
    }

    #[tokio::test]
    async fn test_route_to_unknown_agent_is_dropped() {
        let router = Router::new();
        // No panic, no error: fire-and-forget.
        router
            .route(Message::chat(
                Endpoint::Human,
                Endpoint::Agent("ghost".to_string()),
                "anyone there?",
            ))
            .await;
    }
}
