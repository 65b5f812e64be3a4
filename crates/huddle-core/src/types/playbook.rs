//! Playbook - a named, step-structured procedure belonging to an agent

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::graph::{GraphError, StepGraph};

use super::step::Step;

/// A named ordered list of steps plus visibility metadata.
///
/// The navigable [`StepGraph`] is a derived index: it is built lazily on
/// first access and invalidated whenever a step is inserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playbook {
    /// Playbook name, unique within its agent
    pub name: String,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// Whether other agents may call this playbook
    #[serde(default)]
    pub public: bool,
    steps: Vec<Step>,
    #[serde(skip)]
    graph: Option<Arc<StepGraph>>,
}

impl Playbook {
    /// Create an empty playbook
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            public: false,
            steps: Vec::new(),
            graph: None,
        }
    }

    /// Create a playbook from an already-parsed step list
    pub fn with_steps(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            public: false,
            steps,
            graph: None,
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Mark the playbook callable by other agents
    pub fn with_public(mut self, public: bool) -> Self {
        self.public = public;
        self
    }

    /// Ordered step list
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Append a step, invalidating the cached graph
    pub fn push_step(&mut self, step: Step) {
        self.graph = None;
        self.steps.push(step);
    }

    /// Insert a step at `index`, invalidating the cached graph
    pub fn insert_step(&mut self, index: usize, step: Step) {
        self.graph = None;
        self.steps.insert(index, step);
    }

    /// The navigable step graph, built on demand.
    pub fn graph(&mut self) -> Result<Arc<StepGraph>, GraphError> {
        if let Some(graph) = &self.graph {
            return Ok(graph.clone());
        }
        let graph = Arc::new(StepGraph::build(&self.steps)?);
        self.graph = Some(graph.clone());
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::step::StepPosition;

    fn pos(raw: &str) -> StepPosition {
        StepPosition::parse(raw).expect("position")
    }

    #[test]
    fn test_graph_is_cached_until_insertion() {
        let mut playbook = Playbook::with_steps(
            "Main",
            vec![
                Step::sequential(pos("01"), "greet"),
                Step::sequential(pos("02"), "ask"),
            ],
        );
        let first = playbook.graph().expect("graph");
        let second = playbook.graph().expect("graph");
        assert!(Arc::ptr_eq(&first, &second));

        playbook.push_step(Step::sequential(pos("03"), "close"));
        let third = playbook.graph().expect("graph");
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(third.len(), 3);
    }
}
