//! Step type definitions
//!
//! A Step is the atomic addressable unit of a Playbook. Its hierarchical
//! position encodes nesting: `"01.02"` is the second child of the first
//! top-level step.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Error raised for step positions that do not parse as dotted numbers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("malformed step position '{0}'")]
pub struct PositionError(pub String);

/// Hierarchical step position, e.g. `"01"`, `"01.02"`, `"02.01.03"`.
///
/// Ordering is component-wise, which matches document order: `01.02`
/// sorts before `01.02.01`, which sorts before `01.03`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepPosition(Vec<u32>);

impl StepPosition {
    /// Parse a dotted position string.
    pub fn parse(input: &str) -> Result<Self, PositionError> {
        let components: Result<Vec<u32>, _> = input
            .split('.')
            .map(|part| {
                if part.is_empty() {
                    return Err(PositionError(input.to_string()));
                }
                part.parse::<u32>()
                    .map_err(|_| PositionError(input.to_string()))
            })
            .collect();
        let components = components?;
        if components.is_empty() {
            return Err(PositionError(input.to_string()));
        }
        Ok(Self(components))
    }

    /// Top-level position with a single component.
    pub fn root(index: u32) -> Self {
        Self(vec![index])
    }

    /// Position of the `index`-th child under this position.
    pub fn child(&self, index: u32) -> Self {
        let mut components = self.0.clone();
        components.push(index);
        Self(components)
    }

    /// Parent position, or `None` for top-level steps.
    pub fn parent(&self) -> Option<StepPosition> {
        if self.0.len() <= 1 {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    /// Nesting depth (1 for top-level steps).
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Whether this position is a strict ancestor of `other`.
    pub fn is_ancestor_of(&self, other: &StepPosition) -> bool {
        other.0.len() > self.0.len() && other.0[..self.0.len()] == self.0[..]
    }

    /// Raw numeric components.
    pub fn components(&self) -> &[u32] {
        &self.0
    }
}

impl fmt::Display for StepPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.0.iter().map(|c| format!("{:02}", c)).collect();
        write!(f, "{}", rendered.join("."))
    }
}

impl Serialize for StepPosition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for StepPosition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        StepPosition::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Step kind - distinguishes control semantics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Ordinary step, executed in document order
    #[default]
    Sequential,
    /// Loop header; its children form the loop body
    Loop,
    /// Conditional header; its children form the taken branch
    Conditional,
    /// Alternative branch of the immediately preceding conditional
    Else,
    /// Suspend and wait for inbound messages
    Yield,
    /// Leave the current playbook, optionally with a value
    Return,
    /// Non-executable annotation; navigation treats it as sequential
    Note,
}

impl StepKind {
    /// Whether steps of this kind may own nested child steps.
    pub fn permits_children(&self) -> bool {
        matches!(self, StepKind::Loop | StepKind::Conditional | StepKind::Else)
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StepKind::Sequential => "sequential",
            StepKind::Loop => "loop",
            StepKind::Conditional => "conditional",
            StepKind::Else => "else",
            StepKind::Yield => "yield",
            StepKind::Return => "return",
            StepKind::Note => "note",
        };
        write!(f, "{}", label)
    }
}

/// A single step in a playbook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Hierarchical position within the playbook
    pub position: StepPosition,
    /// Control-flow kind
    #[serde(default)]
    pub kind: StepKind,
    /// Instruction text handed to the step executor
    pub text: String,
}

impl Step {
    /// Create a step of an arbitrary kind
    pub fn new(position: StepPosition, kind: StepKind, text: impl Into<String>) -> Self {
        Self {
            position,
            kind,
            text: text.into(),
        }
    }

    /// Create a sequential step
    pub fn sequential(position: StepPosition, text: impl Into<String>) -> Self {
        Self::new(position, StepKind::Sequential, text)
    }

    /// Create a loop header step
    pub fn looping(position: StepPosition, text: impl Into<String>) -> Self {
        Self::new(position, StepKind::Loop, text)
    }

    /// Create a conditional header step
    pub fn conditional(position: StepPosition, text: impl Into<String>) -> Self {
        Self::new(position, StepKind::Conditional, text)
    }

    /// Create an else-branch step
    pub fn else_branch(position: StepPosition, text: impl Into<String>) -> Self {
        Self::new(position, StepKind::Else, text)
    }

    /// Create a yield step
    pub fn yielding(position: StepPosition, text: impl Into<String>) -> Self {
        Self::new(position, StepKind::Yield, text)
    }

    /// Create a return step
    pub fn returning(position: StepPosition, text: impl Into<String>) -> Self {
        Self::new(position, StepKind::Return, text)
    }
}
