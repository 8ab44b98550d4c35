//! Server launch configuration and resource limits.
//!
//! Deserializable from TOML via `toml`/`serde`, with `Default` impls
//! covering everything a caller doesn't set explicitly.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// This client only drives a server over its stdio streams; `start_server`
/// refuses to launch when this is anything other than `Stdio`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Stdio,
    Tcp,
}

impl Default for ConnectionType {
    fn default() -> Self {
        ConnectionType::Stdio
    }
}

/// Inputs the lifecycle controller needs to spawn and initialize a
/// server; binary discovery and argv assembly are the caller's
/// responsibility, not this type's.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerLaunchConfig {
    pub server_name: String,
    pub command: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub project_directory: PathBuf,
    #[serde(default)]
    pub initialization_options: Option<Value>,
    #[serde(default)]
    pub settings: Option<Value>,
    #[serde(default)]
    pub connection_type: ConnectionType,
    /// Keep the stderr log file around after shutdown instead of deleting it.
    #[serde(default)]
    pub server_keep_logfiles: bool,
}

impl ServerLaunchConfig {
    pub fn new(server_name: impl Into<String>, command: Vec<String>, project_directory: impl AsRef<Path>) -> Self {
        Self {
            server_name: server_name.into(),
            command,
            args: Vec::new(),
            env: HashMap::new(),
            project_directory: project_directory.as_ref().to_path_buf(),
            initialization_options: None,
            settings: None,
            connection_type: ConnectionType::Stdio,
            server_keep_logfiles: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Capacity of the bounded, drop-oldest server-notification queue.
    pub max_queued_notifications: usize,
    pub response_timeout_ms: u64,
    pub initialize_timeout_ms: u64,
    /// How long `await_server_connection` waits for the transport to come up.
    pub connection_timeout_ms: u64,
    /// How long shutdown waits for the subprocess to exit on its own before
    /// escalating to a kill.
    pub shutdown_join_timeout_ms: u64,
}

impl ResourceLimits {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn initialize_timeout(&self) -> Duration {
        Duration::from_millis(self.initialize_timeout_ms)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn shutdown_join_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_join_timeout_ms)
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_queued_notifications: crate::queue::DEFAULT_CAPACITY,
            response_timeout_ms: 30_000,
            initialize_timeout_ms: 30_000,
            connection_timeout_ms: 5_000,
            shutdown_join_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub resource_limits: ResourceLimits,
}

impl Config {
    /// Loads configuration from a TOML file, falling back to defaults
    /// for anything the file doesn't set, and to an all-default `Config`
    /// if the file doesn't exist at all.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }
}
