//! StepGraph - navigable index over a playbook's step list
//!
//! The graph is derived from a flat, ordered, position-annotated step
//! list. It resolves:
//! - parent/child links from hierarchical positions
//! - flat-order successor links between siblings
//! - loop edges: the loop body re-enters its header, the header carries
//!   an exit edge past the loop
//! - conditional edges: a conditional pairs with an immediately
//!   following same-level else, both branches converging at one join step
//!
//! Malformed nesting is a fatal build-time error; navigation itself never
//! fails.

use std::collections::HashMap;

use thiserror::Error;

use crate::types::{PositionError, Step, StepKind, StepPosition};

/// Fatal errors raised while building a step graph
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("playbook has no steps")]
    Empty,
    #[error(transparent)]
    Position(#[from] PositionError),
    #[error("duplicate step position '{0}'")]
    DuplicatePosition(StepPosition),
    #[error("entry step '{0}' must be top-level")]
    NestedEntry(StepPosition),
    #[error("step '{0}' is out of document order")]
    OutOfOrder(StepPosition),
    #[error("step '{0}' has no parent step in the list")]
    OrphanStep(StepPosition),
    #[error("step '{child}' nested under non-container '{kind}' step '{parent}'")]
    UnexpectedChild {
        parent: StepPosition,
        child: StepPosition,
        kind: StepKind,
    },
    #[error("'{kind}' step '{position}' has no nested body")]
    MissingBody {
        position: StepPosition,
        kind: StepKind,
    },
    #[error("else step '{0}' does not follow a conditional at the same level")]
    DanglingElse(StepPosition),
}

#[derive(Debug)]
struct Node {
    step: Step,
    parent: Option<StepPosition>,
    children: Vec<StepPosition>,
    next_sibling: Option<StepPosition>,
}

/// Navigable graph over one playbook's steps
#[derive(Debug)]
pub struct StepGraph {
    nodes: HashMap<StepPosition, Node>,
    order: Vec<StepPosition>,
    entry: StepPosition,
}

impl StepGraph {
    /// Build a graph from a flat ordered step list.
    pub fn build(steps: &[Step]) -> Result<Self, GraphError> {
        let first = steps.first().ok_or(GraphError::Empty)?;
        if first.position.depth() != 1 {
            return Err(GraphError::NestedEntry(first.position.clone()));
        }

        let mut nodes: HashMap<StepPosition, Node> = HashMap::new();
        let mut order: Vec<StepPosition> = Vec::with_capacity(steps.len());
        let mut top_level: Vec<StepPosition> = Vec::new();

        for step in steps {
            let position = step.position.clone();
            if nodes.contains_key(&position) {
                return Err(GraphError::DuplicatePosition(position));
            }
            if let Some(previous) = order.last() {
                if *previous >= position {
                    return Err(GraphError::OutOfOrder(position));
                }
            }

            let parent = position.parent();
            if let Some(parent_position) = &parent {
                let parent_node = nodes
                    .get_mut(parent_position)
                    .ok_or_else(|| GraphError::OrphanStep(position.clone()))?;
                if !parent_node.step.kind.permits_children() {
                    return Err(GraphError::UnexpectedChild {
                        parent: parent_position.clone(),
                        child: position.clone(),
                        kind: parent_node.step.kind,
                    });
                }
                parent_node.children.push(position.clone());
            } else {
                top_level.push(position.clone());
            }

            order.push(position.clone());
            nodes.insert(
                position,
                Node {
                    step: step.clone(),
                    parent,
                    children: Vec::new(),
                    next_sibling: None,
                },
            );
        }

        // Container steps must own a body.
        for node in nodes.values() {
            if node.step.kind.permits_children() && node.children.is_empty() {
                return Err(GraphError::MissingBody {
                    position: node.step.position.clone(),
                    kind: node.step.kind,
                });
            }
        }

        // Sibling links, plus conditional/else pairing checks.
        let sibling_lists: Vec<Vec<StepPosition>> = std::iter::once(top_level)
            .chain(nodes.values().map(|n| n.children.clone()))
            .collect();
        for siblings in &sibling_lists {
            for (index, position) in siblings.iter().enumerate() {
                if let Some(next) = siblings.get(index + 1) {
                    if let Some(node) = nodes.get_mut(position) {
                        node.next_sibling = Some(next.clone());
                    }
                }
                let kind = nodes
                    .get(position)
                    .map(|n| n.step.kind)
                    .unwrap_or_default();
                if kind == StepKind::Else {
                    let preceded_by_conditional = index
                        .checked_sub(1)
                        .and_then(|i| siblings.get(i))
                        .and_then(|p| nodes.get(p))
                        .map(|n| n.step.kind == StepKind::Conditional)
                        .unwrap_or(false);
                    if !preceded_by_conditional {
                        return Err(GraphError::DanglingElse(position.clone()));
                    }
                }
            }
        }

        let entry = first.position.clone();
        Ok(Self {
            nodes,
            order,
            entry,
        })
    }

    /// The single entry step
    pub fn entry(&self) -> &Step {
        &self.nodes[&self.entry].step
    }

    /// Number of steps in the graph
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// A built graph always holds at least the entry step.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Look up a step by position
    pub fn get(&self, position: &StepPosition) -> Option<&Step> {
        self.nodes.get(position).map(|n| &n.step)
    }

    /// Whether a position exists in the graph
    pub fn contains(&self, position: &StepPosition) -> bool {
        self.nodes.contains_key(position)
    }

    /// Parent step of a position
    pub fn parent_of(&self, position: &StepPosition) -> Option<&Step> {
        let parent = self.nodes.get(position)?.parent.as_ref()?;
        self.get(parent)
    }

    /// Child steps of a position, in document order
    pub fn children_of(&self, position: &StepPosition) -> Vec<&Step> {
        self.nodes
            .get(position)
            .map(|n| n.children.iter().filter_map(|c| self.get(c)).collect())
            .unwrap_or_default()
    }

    /// Steps in document order
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.order.iter().filter_map(move |p| self.get(p))
    }

    /// Default next step from `position`.
    ///
    /// Resolution order: body entry for container steps, explicit sibling
    /// edge, loop re-entry when the body is exhausted, convergence past
    /// the enclosing conditional/else pair at branch end, flat-order
    /// successor otherwise. Branch selection at a conditional is a
    /// runtime decision; callers taking the untaken path use
    /// [`StepGraph::else_of`] / [`StepGraph::join_of`], and loop exit is
    /// [`StepGraph::loop_exit`].
    pub fn get_next(&self, position: &StepPosition) -> Option<&Step> {
        let node = self.nodes.get(position)?;
        if node.step.kind.permits_children() {
            if let Some(first_child) = node.children.first() {
                return self.get(first_child);
            }
        }
        let successor = self.successor_of(position)?;
        self.get(&successor)
    }

    /// The step control reaches when a loop header decides to exit.
    pub fn loop_exit(&self, header: &StepPosition) -> Option<&Step> {
        if self.nodes.get(header)?.step.kind != StepKind::Loop {
            return None;
        }
        let successor = self.successor_of(header)?;
        self.get(&successor)
    }

    /// The else step paired with a conditional, when present.
    pub fn else_of(&self, conditional: &StepPosition) -> Option<&Step> {
        let node = self.nodes.get(conditional)?;
        if node.step.kind != StepKind::Conditional {
            return None;
        }
        let sibling = node.next_sibling.as_ref()?;
        let sibling_node = self.nodes.get(sibling)?;
        if sibling_node.step.kind == StepKind::Else {
            Some(&sibling_node.step)
        } else {
            None
        }
    }

    /// The join step where both branches of a conditional reconverge.
    pub fn join_of(&self, conditional: &StepPosition) -> Option<&Step> {
        if self.nodes.get(conditional)?.step.kind != StepKind::Conditional {
            return None;
        }
        let successor = self.successor_of(conditional)?;
        self.get(&successor)
    }

    /// Structural successor: next sibling, else climb. Falling off a loop
    /// body re-enters the header; falling off a conditional or else body
    /// continues past the pair.
    fn successor_of(&self, position: &StepPosition) -> Option<StepPosition> {
        let mut current = position.clone();
        loop {
            let node = self.nodes.get(&current)?;
            if let Some(sibling) = &node.next_sibling {
                let sibling_kind = self.nodes.get(sibling)?.step.kind;
                // The else paired with this conditional belongs to the
                // untaken path; continue past it to the join step.
                if sibling_kind == StepKind::Else && node.step.kind == StepKind::Conditional {
                    current = sibling.clone();
                    continue;
                }
                return Some(sibling.clone());
            }
            match &node.parent {
                Some(parent) => {
                    let parent_node = self.nodes.get(parent)?;
                    if parent_node.step.kind == StepKind::Loop {
                        // Loop body exhausted: edge back to the header.
                        return Some(parent.clone());
                    }
                    current = parent.clone();
                }
                None => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(raw: &str) -> StepPosition {
        StepPosition::parse(raw).expect("position")
    }

    fn next_pos(graph: &StepGraph, from: &str) -> String {
        graph
            .get_next(&pos(from))
            .map(|s| s.position.to_string())
            .unwrap_or_else(|| "-".to_string())
    }

    fn linear_steps() -> Vec<Step> {
        vec![
            Step::sequential(pos("01"), "greet the user"),
            Step::sequential(pos("02"), "collect the request"),
            Step::returning(pos("03"), "return the summary"),
        ]
    }

    #[test]
    fn test_linear_navigation() {
        let graph = StepGraph::build(&linear_steps()).expect("graph");
        assert_eq!(graph.entry().position, pos("01"));
        assert_eq!(next_pos(&graph, "01"), "02");
        assert_eq!(next_pos(&graph, "02"), "03");
        assert!(graph.get_next(&pos("03")).is_none());
    }

    #[test]
    fn test_loop_edges() {
        let steps = vec![
            Step::sequential(pos("01"), "prepare"),
            Step::looping(pos("02"), "for each item"),
            Step::sequential(pos("02.01"), "process item"),
            Step::sequential(pos("02.02"), "record result"),
            Step::sequential(pos("03"), "wrap up"),
        ];
        let graph = StepGraph::build(&steps).expect("graph");
        // Header enters its body; body exhaustion re-enters the header.
        assert_eq!(next_pos(&graph, "02"), "02.01");
        assert_eq!(next_pos(&graph, "02.01"), "02.02");
        assert_eq!(next_pos(&graph, "02.02"), "02");
        // The header's exit edge redirects past the loop.
        assert_eq!(
            graph.loop_exit(&pos("02")).expect("exit").position,
            pos("03")
        );
    }

    #[test]
    fn test_conditional_else_convergence() {
        let steps = vec![
            Step::sequential(pos("01"), "inspect input"),
            Step::conditional(pos("02"), "if the input is valid"),
            Step::sequential(pos("02.01"), "handle the valid case"),
            Step::else_branch(pos("03"), "otherwise"),
            Step::sequential(pos("03.01"), "ask for a correction"),
            Step::sequential(pos("04"), "continue"),
        ];
        let graph = StepGraph::build(&steps).expect("graph");
        // Taken branch enters the conditional body and converges past
        // the pair.
        assert_eq!(next_pos(&graph, "02"), "02.01");
        assert_eq!(next_pos(&graph, "02.01"), "04");
        // Untaken path goes through the else body to the same join step.
        assert_eq!(graph.else_of(&pos("02")).expect("else").position, pos("03"));
        assert_eq!(next_pos(&graph, "03"), "03.01");
        assert_eq!(next_pos(&graph, "03.01"), "04");
        assert_eq!(graph.join_of(&pos("02")).expect("join").position, pos("04"));
    }

    #[test]
    fn test_conditional_without_else_converges() {
        let steps = vec![
            Step::conditional(pos("01"), "if anything is pending"),
            Step::sequential(pos("01.01"), "flush it"),
            Step::sequential(pos("02"), "report"),
        ];
        let graph = StepGraph::build(&steps).expect("graph");
        assert_eq!(next_pos(&graph, "01.01"), "02");
        assert!(graph.else_of(&pos("01")).is_none());
        assert_eq!(graph.join_of(&pos("01")).expect("join").position, pos("02"));
    }

    #[test]
    fn test_loop_as_last_step_of_branch() {
        let steps = vec![
            Step::conditional(pos("01"), "if there is a backlog"),
            Step::looping(pos("01.01"), "for each backlog item"),
            Step::sequential(pos("01.01.01"), "drain item"),
            Step::else_branch(pos("02"), "otherwise"),
            Step::sequential(pos("02.01"), "idle"),
            Step::sequential(pos("03"), "done"),
        ];
        let graph = StepGraph::build(&steps).expect("graph");
        assert_eq!(next_pos(&graph, "01.01.01"), "01.01");
        // Exiting the loop at branch end skips the untaken else.
        assert_eq!(
            graph.loop_exit(&pos("01.01")).expect("exit").position,
            pos("03")
        );
    }

    #[test]
    fn test_nested_loops_reenter_outer_header() {
        let steps = vec![
            Step::looping(pos("01"), "outer"),
            Step::looping(pos("01.01"), "inner"),
            Step::sequential(pos("01.01.01"), "work"),
            Step::sequential(pos("02"), "after"),
        ];
        let graph = StepGraph::build(&steps).expect("graph");
        assert_eq!(next_pos(&graph, "01.01.01"), "01.01");
        // Inner loop exit lands back on the outer header.
        assert_eq!(
            graph.loop_exit(&pos("01.01")).expect("exit").position,
            pos("01")
        );
        assert_eq!(graph.loop_exit(&pos("01")).expect("exit").position, pos("02"));
    }

    #[test]
    fn test_traversal_visits_every_step_once_with_bounded_loops() {
        let steps = vec![
            Step::sequential(pos("01"), "start"),
            Step::looping(pos("02"), "repeat twice"),
            Step::sequential(pos("02.01"), "body"),
            Step::conditional(pos("03"), "if flagged"),
            Step::sequential(pos("03.01"), "flagged path"),
            Step::else_branch(pos("04"), "otherwise"),
            Step::sequential(pos("04.01"), "default path"),
            Step::sequential(pos("05"), "finish"),
        ];
        let graph = StepGraph::build(&steps).expect("graph");

        let iterations = 2usize;
        let mut visits: HashMap<String, usize> = HashMap::new();
        let mut header_entries = 0usize;
        let mut current = graph.entry().position.clone();
        loop {
            *visits.entry(current.to_string()).or_default() += 1;
            let step = graph.get(&current).expect("step");
            let next = match step.kind {
                StepKind::Loop => {
                    header_entries += 1;
                    if header_entries > iterations {
                        graph.loop_exit(&current)
                    } else {
                        graph.get_next(&current)
                    }
                }
                // Walk the untaken branch too so every step is covered.
                StepKind::Conditional => graph.else_of(&current).or_else(|| graph.get_next(&current)),
                _ => graph.get_next(&current),
            };
            match next {
                Some(step) => current = step.position.clone(),
                None => break,
            }
        }

        // Loop body ran once per iteration, the header once more for the
        // exit check; everything outside the loop exactly once, except
        // the flagged branch skipped by the else choice.
        assert_eq!(visits.get("01"), Some(&1));
        assert_eq!(visits.get("02"), Some(&(iterations + 1)));
        assert_eq!(visits.get("02.01"), Some(&iterations));
        assert_eq!(visits.get("03"), Some(&1));
        assert_eq!(visits.get("04"), Some(&1));
        assert_eq!(visits.get("04.01"), Some(&1));
        assert_eq!(visits.get("05"), Some(&1));
        assert_eq!(visits.get("03.01"), None);
    }

    #[test]
    fn test_build_rejects_empty_list() {
        assert!(matches!(StepGraph::build(&[]), Err(GraphError::Empty)));
    }

    #[test]
    fn test_build_rejects_orphan_and_duplicates() {
        let orphan = vec![
            Step::sequential(pos("01"), "a"),
            Step::sequential(pos("02.01"), "nested under nothing"),
        ];
        assert!(matches!(
            StepGraph::build(&orphan),
            Err(GraphError::OrphanStep(_))
        ));

        let duplicate = vec![
            Step::sequential(pos("01"), "a"),
            Step::sequential(pos("01"), "a again"),
        ];
        assert!(matches!(
            StepGraph::build(&duplicate),
            Err(GraphError::OutOfOrder(_)) | Err(GraphError::DuplicatePosition(_))
        ));
    }

    #[test]
    fn test_build_rejects_malformed_nesting() {
        // A child under a plain sequential step.
        let unexpected = vec![
            Step::sequential(pos("01"), "plain"),
            Step::sequential(pos("01.01"), "nested"),
        ];
        assert!(matches!(
            StepGraph::build(&unexpected),
            Err(GraphError::UnexpectedChild { .. })
        ));

        // A loop with no body.
        let bodyless = vec![
            Step::looping(pos("01"), "loop over nothing"),
            Step::sequential(pos("02"), "after"),
        ];
        assert!(matches!(
            StepGraph::build(&bodyless),
            Err(GraphError::MissingBody { .. })
        ));

        // An else with no matching conditional.
        let dangling = vec![
            Step::sequential(pos("01"), "plain"),
            Step::else_branch(pos("02"), "otherwise"),
            Step::sequential(pos("02.01"), "body"),
        ];
        assert!(matches!(
            StepGraph::build(&dangling),
            Err(GraphError::DanglingElse(_))
        ));
    }

    #[test]
    fn test_build_rejects_nested_entry_and_disorder() {
        let nested_entry = vec![Step::sequential(pos("01.01"), "nested first")];
        assert!(matches!(
            StepGraph::build(&nested_entry),
            Err(GraphError::NestedEntry(_))
        ));

        let disorder = vec![
            Step::sequential(pos("02"), "b"),
            Step::sequential(pos("01"), "a"),
        ];
        assert!(matches!(
            StepGraph::build(&disorder),
            Err(GraphError::OutOfOrder(_))
        ));
    }
}
