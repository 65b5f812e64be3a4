//! Capability registry for cross-agent playbook calls.
//!
//! Every agent publishes its class name and public playbooks here at
//! startup. Callers resolve a `Klass.Playbook` target to a typed
//! [`PlaybookHandle`] and invoke it over an mpsc/oneshot pair; there is
//! no string-matched dispatch at the receiving end. A target that
//! resolves to nothing is a recoverable failure for the calling
//! playbook, never a fatal error.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, RwLock};

use huddle_core::types::AgentId;

use crate::orchestrator::PlaybookOutcome;

/// One queued cross-agent invocation, serviced by the target agent's
/// own task between (or after) its local playbook runs.
#[derive(Debug)]
pub struct CallRequest {
    /// Public playbook name on the target agent
    pub playbook: String,
    /// Call arguments
    pub args: Value,
    /// Reply channel; dropped silently if the caller went away
    pub reply: oneshot::Sender<PlaybookOutcome>,
}

/// A resolved, invocable reference to one public playbook.
#[derive(Debug, Clone)]
pub struct PlaybookHandle {
    /// Target agent id
    pub agent: AgentId,
    /// Target agent class
    pub klass: String,
    /// Playbook name on the target
    pub playbook: String,
    tx: mpsc::UnboundedSender<CallRequest>,
}

impl PlaybookHandle {
    /// Invoke the playbook and wait for its outcome.
    ///
    /// An unreachable target (agent task gone, reply dropped) comes back
    /// as a failed outcome so the caller's playbook can recover.
    pub async fn call(&self, args: Value) -> PlaybookOutcome {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = CallRequest {
            playbook: self.playbook.clone(),
            args,
            reply: reply_tx,
        };
        if self.tx.send(request).is_err() {
            return PlaybookOutcome::Failed(format!("agent {} is unavailable", self.agent));
        }
        match reply_rx.await {
            Ok(outcome) => outcome,
            Err(_) => PlaybookOutcome::Failed(format!(
                "agent {} dropped the call to {}",
                self.agent, self.playbook
            )),
        }
    }
}

#[derive(Debug)]
struct Capability {
    klass: String,
    playbooks: HashSet<String>,
    tx: mpsc::UnboundedSender<CallRequest>,
}

/// Program-wide map from agent class and playbook name to call handles.
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    inner: Arc<RwLock<HashMap<AgentId, Capability>>>,
}

impl CapabilityRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish an agent's class and public playbooks.
    pub async fn register(
        &self,
        agent: impl Into<AgentId>,
        klass: impl Into<String>,
        playbooks: impl IntoIterator<Item = String>,
        tx: mpsc::UnboundedSender<CallRequest>,
    ) {
        let agent = agent.into();
        let capability = Capability {
            klass: klass.into(),
            playbooks: playbooks.into_iter().collect(),
            tx,
        };
        tracing::debug!(agent = %agent, klass = %capability.klass, "capability registered");
        self.inner.write().await.insert(agent, capability);
    }

    /// Remove an agent's capabilities (shutdown path).
    pub async fn unregister(&self, agent: &str) {
        self.inner.write().await.remove(agent);
    }

    /// Resolve a `Klass.Playbook` target, or a bare playbook name.
    ///
    /// With a klass, only exact class matches are considered first; if
    /// none exposes the playbook, any agent exposing it is accepted as a
    /// fallback. Bare names scan every agent directly.
    pub async fn resolve(&self, klass: Option<&str>, playbook: &str) -> Option<PlaybookHandle> {
        let agents = self.inner.read().await;
        if let Some(klass) = klass {
            for (agent, capability) in agents.iter() {
                if capability.klass == klass && capability.playbooks.contains(playbook) {
                    return Some(handle(agent, capability, playbook));
                }
            }
        }
        for (agent, capability) in agents.iter() {
            if capability.playbooks.contains(playbook) {
                return Some(handle(agent, capability, playbook));
            }
        }
        None
    }

    /// Split a call target into its optional klass and playbook parts.
    pub fn parse_target(target: &str) -> (Option<&str>, &str) {
        match target.split_once('.') {
            Some((klass, playbook)) if !klass.is_empty() && !playbook.is_empty() => {
                (Some(klass), playbook)
            }
            _ => (None, target),
        }
    }
}

fn handle(agent: &str, capability: &Capability, playbook: &str) -> PlaybookHandle {
    PlaybookHandle {
        agent: agent.to_string(),
        klass: capability.klass.clone(),
        playbook: playbook.to_string(),
        tx: capability.tx.clone(),
    }
}
