//! # Huddle Config
//!
//! Unified single-file configuration management for Huddle.
//! A single `huddle.yaml` configures runtime timing, artifact handling,
//! and observability settings.

mod loader;

pub use loader::{load_config, ConfigError};

use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration schema for Huddle.
#[derive(Debug, Clone, Deserialize)]
pub struct HuddleConfig {
    /// Config schema version.
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

fn default_version() -> u32 {
    1
}

impl Default for HuddleConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            app: AppConfig::default(),
            runtime: RuntimeConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_env")]
    pub environment: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            environment: default_env(),
        }
    }
}

fn default_app_name() -> String {
    "huddle".to_string()
}

fn default_env() -> String {
    "development".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Mailbox buffering window in milliseconds.
    #[serde(default = "default_buffer_window_ms")]
    pub buffer_window_ms: u64,
    /// How long a meeting waits for its required attendees, in
    /// milliseconds.
    #[serde(default = "default_attendee_timeout_ms")]
    pub attendee_timeout_ms: u64,
    /// Serialized results longer than this many characters become
    /// artifacts.
    #[serde(default = "default_artifact_inline_threshold")]
    pub artifact_inline_threshold: usize,
    /// Maximum nested playbook-call depth before a call fails.
    #[serde(default = "default_max_call_depth")]
    pub max_call_depth: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            buffer_window_ms: default_buffer_window_ms(),
            attendee_timeout_ms: default_attendee_timeout_ms(),
            artifact_inline_threshold: default_artifact_inline_threshold(),
            max_call_depth: default_max_call_depth(),
        }
    }
}

impl RuntimeConfig {
    /// Mailbox buffering window as a [`Duration`]
    pub fn buffer_window(&self) -> Duration {
        Duration::from_millis(self.buffer_window_ms)
    }

    /// Attendee-wait timeout as a [`Duration`]
    pub fn attendee_timeout(&self) -> Duration {
        Duration::from_millis(self.attendee_timeout_ms)
    }
}

fn default_buffer_window_ms() -> u64 {
    5_000
}

fn default_attendee_timeout_ms() -> u64 {
    30_000
}

fn default_artifact_inline_threshold() -> usize {
    80
}

fn default_max_call_depth() -> usize {
    16
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
