//! Configuration types for stepflow.
//!
//! `StepflowConfig` represents the top-level `stepflow.toml` that controls
//! engine safeguards and the HTTP listener.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration. All fields have sensible defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepflowConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Engine safeguards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Per-step timeout applied to every node callable.
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: f64,

    /// Global ceiling on node invocations per run.
    #[serde(default = "default_max_steps")]
    pub max_steps: u64,

    /// Live buffer per run for log stream subscribers.
    #[serde(default = "default_stream_capacity")]
    pub stream_capacity: usize,
}

fn default_step_timeout_secs() -> f64 {
    30.0
}

fn default_max_steps() -> u64 {
    10_000
}

fn default_stream_capacity() -> usize {
    256
}

impl EngineConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.step_timeout_secs.max(0.0))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            step_timeout_secs: default_step_timeout_secs(),
            max_steps: default_max_steps(),
            stream_capacity: default_stream_capacity(),
        }
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}
