//! SessionLog - append-only execution transcript
//!
//! The transcript is consumed two ways: rendered as the next step
//! request's context, and read by external tracing. Entries are never
//! mutated or removed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const MAX_LINE_CHARS: usize = 2_000;

fn truncate_for_log(input: &str, max_chars: usize) -> String {
    let char_count = input.chars().count();
    if char_count <= max_chars {
        return input.to_string();
    }
    let mut preview: String = input.chars().take(max_chars).collect();
    preview.push_str(&format!("... [truncated, total_chars={}]", char_count));
    preview
}

/// Render a JSON value the way it reads in a transcript: bare strings
/// stay bare, everything else is compact JSON.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// One transcript entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogEntry {
    /// Attributed inbound or outbound message line
    Message {
        speaker: String,
        content: String,
        at: DateTime<Utc>,
    },
    /// A playbook call with rendered arguments
    Call {
        playbook: String,
        args: String,
        at: DateTime<Utc>,
    },
    /// A playbook result, `"Q() → ok"` or an artifact reference
    Result {
        playbook: String,
        rendered: String,
        at: DateTime<Utc>,
    },
    /// Free-form execution note
    Note { content: String, at: DateTime<Utc> },
}

impl LogEntry {
    fn render(&self) -> String {
        match self {
            LogEntry::Message {
                speaker, content, ..
            } => format!("{}: {}", speaker, content),
            LogEntry::Call { playbook, args, .. } => format!("call {}({})", playbook, args),
            LogEntry::Result {
                playbook, rendered, ..
            } => format!("{}() → {}", playbook, rendered),
            LogEntry::Note { content, .. } => content.clone(),
        }
    }
}

/// Append-only audit trail for one agent's execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionLog {
    entries: Vec<LogEntry>,
}

impl SessionLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an attributed message line
    pub fn append_message(&mut self, speaker: impl Into<String>, content: impl Into<String>) {
        self.entries.push(LogEntry::Message {
            speaker: speaker.into(),
            content: truncate_for_log(&content.into(), MAX_LINE_CHARS),
            at: Utc::now(),
        });
    }

    /// Append a structured call entry
    pub fn append_call(&mut self, playbook: impl Into<String>, args: &[Value]) {
        let rendered: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        self.entries.push(LogEntry::Call {
            playbook: playbook.into(),
            args: truncate_for_log(&rendered.join(", "), MAX_LINE_CHARS),
            at: Utc::now(),
        });
    }

    /// Append a result entry; `rendered` is the return value or an
    /// artifact reference
    pub fn append_result(&mut self, playbook: impl Into<String>, rendered: impl Into<String>) {
        self.entries.push(LogEntry::Result {
            playbook: playbook.into(),
            rendered: truncate_for_log(&rendered.into(), MAX_LINE_CHARS),
            at: Utc::now(),
        });
    }

    /// Append a free-form note
    pub fn append_note(&mut self, content: impl Into<String>) {
        self.entries.push(LogEntry::Note {
            content: truncate_for_log(&content.into(), MAX_LINE_CHARS),
            at: Utc::now(),
        });
    }

    /// All entries, oldest first
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render the transcript handed to the step executor
    pub fn render(&self) -> String {
        let lines: Vec<String> = self.entries.iter().map(|e| e.render()).collect();
        lines.join("\n")
    }
}
