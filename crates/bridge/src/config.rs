//! Configuration loading from TOML.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use protocol::{DEFAULT_TIMEOUT, HostConfig, HostLink};
use serde::Deserialize;
use thiserror::Error;

use crate::session::{DEFAULT_INSTRUCTIONS, SessionConfig};
use crate::tools::ToolBridge;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    pub session: SessionSettings,
    pub bridge: BridgeSettings,
    /// Scripting host to spawn, if tools live in another process.
    pub host: Option<HostSettings>,
}

/// Session defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionSettings {
    pub default_instructions: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            default_instructions: DEFAULT_INSTRUCTIONS.to_string(),
        }
    }
}

/// Tool dispatch settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeSettings {
    /// Upper bound on a single tool call, in milliseconds. Unbounded if unset.
    pub call_timeout_ms: Option<u64>,
}

/// How to start a scripting host.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostSettings {
    #[serde(default = "default_host_name")]
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub request_timeout_ms: Option<u64>,
}

fn default_host_name() -> String {
    "host".to_string()
}

impl HostSettings {
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TIMEOUT)
    }

    pub fn host_config(&self) -> HostConfig {
        HostConfig {
            name: self.name.clone(),
            command: self.command.clone(),
            args: self.args.clone(),
            env: self.env.clone(),
        }
    }

    /// Spawn the host process.
    pub async fn spawn(&self) -> protocol::Result<HostLink> {
        Ok(HostLink::spawn(self.host_config())
            .await?
            .with_timeout(self.request_timeout()))
    }
}

impl BridgeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bridge.call_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid("bridge.call_timeout_ms must be positive".into()));
        }
        if let Some(host) = &self.host {
            if host.command.trim().is_empty() {
                return Err(ConfigError::Invalid("host.command is empty".into()));
            }
            if host.request_timeout_ms == Some(0) {
                return Err(ConfigError::Invalid("host.request_timeout_ms must be positive".into()));
            }
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.bridge.call_timeout_ms.map(Duration::from_millis)
    }

    /// An empty bridge with the configured call timeout.
    pub fn tool_bridge(&self) -> ToolBridge {
        match self.call_timeout() {
            Some(timeout) => ToolBridge::new().with_call_timeout(timeout),
            None => ToolBridge::new(),
        }
    }

    /// Session settings with the configured default instructions.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            default_instructions: self.session.default_instructions.clone(),
            ..SessionConfig::default()
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}
