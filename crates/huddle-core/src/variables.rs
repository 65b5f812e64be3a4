//! Variable store - named mutable bindings with change history
//!
//! Large produced values are wrapped as [`Artifact`]s by the
//! orchestrator (never by the store itself) so the transcript handed to
//! the step executor stays small while the content remains addressable.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One recorded assignment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableChange {
    /// Value assigned
    pub value: Value,
    /// Originating call-stack position, `"playbook:position"`
    pub origin: String,
    /// Assignment timestamp
    pub at: DateTime<Utc>,
}

/// A named mutable binding with ordered history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variable {
    /// Binding name
    pub name: String,
    /// Current value
    pub value: Value,
    /// Ordered assignment history, oldest first
    pub history: Vec<VariableChange>,
}

/// A large value kept out of the transcript, addressed by a short name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// Short addressable name
    pub name: String,
    /// One-line summary shown in the transcript
    pub summary: String,
    /// Full content
    pub content: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    /// Create an artifact
    pub fn new(
        name: impl Into<String>,
        summary: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            summary: summary.into(),
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    /// Stable content-derived short name, used when the caller supplied
    /// no explicit destination variable.
    pub fn derived_name(content: &str) -> String {
        let hash = blake3::hash(content.as_bytes());
        format!("art-{}", &hash.to_hex().as_str()[..8])
    }

    /// Transcript reference, `$name (summary)`
    pub fn reference(&self) -> String {
        format!("${} ({})", self.name, self.summary)
    }
}

/// Store for one agent's variables and artifacts.
///
/// Never shared across agents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariableStore {
    variables: HashMap<String, Variable>,
    artifacts: HashMap<String, Artifact>,
}

impl VariableStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a value and append a history entry tagged with the
    /// originating call-stack position.
    pub fn set(&mut self, name: impl Into<String>, value: Value, origin: impl Into<String>) {
        let name = name.into();
        let change = VariableChange {
            value: value.clone(),
            origin: origin.into(),
            at: Utc::now(),
        };
        match self.variables.get_mut(&name) {
            Some(variable) => {
                variable.value = value;
                variable.history.push(change);
            }
            None => {
                self.variables.insert(
                    name.clone(),
                    Variable {
                        name,
                        value,
                        history: vec![change],
                    },
                );
            }
        }
    }

    /// Current value of a variable
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.variables.get(name).map(|v| &v.value)
    }

    /// Full variable record including history
    pub fn get_variable(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    /// Index an artifact by name
    pub fn store_artifact(&mut self, artifact: Artifact) {
        self.artifacts.insert(artifact.name.clone(), artifact);
    }

    /// Look up an artifact by name
    pub fn artifact(&self, name: &str) -> Option<&Artifact> {
        self.artifacts.get(name)
    }

    /// Number of variables
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    /// Whether the store holds no variables
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Current values as a JSON object, for step-executor requests.
    /// Artifacts appear as their transcript references.
    pub fn snapshot(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (name, variable) in &self.variables {
            map.insert(name.clone(), variable.value.clone());
        }
        for (name, artifact) in &self.artifacts {
            map.insert(name.clone(), Value::String(artifact.reference()));
        }
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_records_history_with_origin() {
        let mut store = VariableStore::new();
        store.set("city", json!("Lisbon"), "Main:01");
        store.set("city", json!("Porto"), "Main:02");

        assert_eq!(store.get("city"), Some(&json!("Porto")));
        let variable = store.get_variable("city").expect("variable");
        assert_eq!(variable.history.len(), 2);
        assert_eq!(variable.history[0].origin, "Main:01");
        assert_eq!(variable.history[0].value, json!("Lisbon"));
        assert_eq!(variable.history[1].origin, "Main:02");
    }

    #[test]
    fn test_derived_artifact_name_is_stable() {
        let a = Artifact::derived_name("same content");
        let b = Artifact::derived_name("same content");
        let c = Artifact::derived_name("other content");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("art-"));
        assert_eq!(a.len(), "art-".len() + 8);
    }

    #[test]
    fn test_snapshot_includes_artifact_references() {
        let mut store = VariableStore::new();
        store.set("count", json!(3), "Main:01");
        store.store_artifact(Artifact::new("art-ab12cd34", "long report", "x".repeat(500)));

        let snapshot = store.snapshot();
        assert_eq!(snapshot["count"], json!(3));
        assert_eq!(
            snapshot["art-ab12cd34"],
            json!("$art-ab12cd34 (long report)")
        );
    }
}
