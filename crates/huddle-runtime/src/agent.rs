//! Agent - one orchestrator plus its cross-agent call queue.

use serde_json::Value;
use tokio::sync::mpsc;

use huddle_core::types::AgentId;
use huddle_core::{SessionLog, VariableStore};

use crate::orchestrator::{Orchestrator, OrchestratorError, PlaybookOutcome};
use crate::registry::CallRequest;

/// A runnable agent. Created by [`crate::Program`]; drive it directly
/// with [`Agent::run_playbook`] or spawn [`Agent::run`] to serve
/// cross-agent calls.
pub struct Agent {
    id: AgentId,
    klass: String,
    orchestrator: Orchestrator,
    calls: mpsc::UnboundedReceiver<CallRequest>,
}

impl Agent {
    pub(crate) fn new(orchestrator: Orchestrator, calls: mpsc::UnboundedReceiver<CallRequest>) -> Self {
        Self {
            id: orchestrator.agent().clone(),
            klass: orchestrator.klass().to_string(),
            orchestrator,
            calls,
        }
    }

    /// Agent id
    pub fn id(&self) -> &AgentId {
        &self.id
    }

    /// Agent class
    pub fn klass(&self) -> &str {
        &self.klass
    }

    /// The execution transcript
    pub fn log(&self) -> &SessionLog {
        self.orchestrator.log()
    }

    /// The agent's variable store
    pub fn variables(&self) -> &VariableStore {
        self.orchestrator.variables()
    }

    /// Run one playbook to completion on the calling task.
    pub async fn run_playbook(
        &mut self,
        name: &str,
        args: Value,
    ) -> Result<PlaybookOutcome, OrchestratorError> {
        self.orchestrator.execute_playbook(name, args).await
    }

    /// Serve queued cross-agent calls until the program terminates or
    /// every caller handle is dropped. Calls run one at a time; each
    /// reply is best-effort since the caller may have gone away.
    pub async fn run(mut self) {
        let cancel = self.orchestrator.cancel_token().clone();
        loop {
            let request = tokio::select! {
                _ = cancel.cancelled() => break,
                request = self.calls.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };
            let outcome = match self
                .orchestrator
                .execute_playbook(&request.playbook, request.args)
                .await
            {
                Ok(outcome) => outcome,
                Err(OrchestratorError::Terminated) => break,
                Err(e) => PlaybookOutcome::Failed(e.to_string()),
            };
            let _ = request.reply.send(outcome);
        }
        tracing::debug!(agent = %self.id, "agent task stopped");
    }
}
