//! Client configuration
//!
//! A TOML file (default `~/.config/triallink/config.toml`) describes how to
//! launch the tool server; credential environment variables are overlaid on
//! top so secrets stay out of the file. Secret values are never logged in
//! full, only presence and length.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::rpc::transport::{redact_env, SpawnConfig};

/// Environment variables the AACT server consumes, and the local variables
/// they are sourced from.
const CREDENTIAL_MAP: &[(&str, &str)] = &[
    ("AACT_DB_USER", "DB_USER"),
    ("AACT_DB_PASSWORD", "DB_PASSWORD"),
];

const DEFAULT_HANDSHAKE_MS: u64 = 30_000;
const DEFAULT_CALL_MS: u64 = 60_000;
const DEFAULT_STOP_GRACE_MS: u64 = 3_000;

/// How to launch the external tool server.
#[derive(Clone, Default)]
pub struct ServerConfig {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Overlaid onto the inherited environment; treated as credentials.
    pub env: HashMap<String, String>,
}

impl ServerConfig {
    /// The clinical-trials database server the project was built around:
    /// `uvx mcp-server-aact` with credentials mapped from the local
    /// `AACT_DB_*` variables.
    pub fn aact() -> Self {
        let mut config = Self {
            command: "uvx".to_string(),
            args: vec!["mcp-server-aact".to_string()],
            cwd: None,
            env: HashMap::new(),
        };
        config.apply_credential_env();
        config
    }

    /// Overlay credential variables from the process environment. Set
    /// variables win over anything already present in `env`.
    pub fn apply_credential_env(&mut self) {
        for (source, target) in CREDENTIAL_MAP {
            if let Ok(value) = std::env::var(source) {
                self.env.insert(target.to_string(), value);
            }
        }
    }

    pub(crate) fn spawn_config(&self) -> SpawnConfig {
        SpawnConfig {
            command: self.command.clone(),
            args: self.args.clone(),
            cwd: self.cwd.clone(),
            env: self.env.clone(),
        }
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("command", &self.command)
            .field("args", &self.args)
            .field("cwd", &self.cwd)
            .field("env", &redact_env(&self.env))
            .finish()
    }
}

/// Full client configuration: server launch plus timeouts.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server: ServerConfig,
    pub handshake_timeout: Duration,
    pub call_timeout: Duration,
    pub stop_grace: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            handshake_timeout: Duration::from_millis(DEFAULT_HANDSHAKE_MS),
            call_timeout: Duration::from_millis(DEFAULT_CALL_MS),
            stop_grace: Duration::from_millis(DEFAULT_STOP_GRACE_MS),
        }
    }
}

impl ClientConfig {
    /// Load from the given file, or the default location, falling back to
    /// the AACT defaults when no file exists. Credential environment
    /// variables are overlaid in every case.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => default_config_path(),
        };

        let mut config = match path {
            Some(ref path) if path.exists() => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                let file: ConfigFile = toml::from_str(&raw)
                    .with_context(|| format!("failed to parse {}", path.display()))?;
                file.into_config()
            }
            _ => Self {
                server: ServerConfig::aact(),
                ..Self::default()
            },
        };

        config.server.apply_credential_env();
        Ok(config)
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("triallink").join("config.toml"))
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    server: ServerFile,
    #[serde(default)]
    timeouts: TimeoutsFile,
}

#[derive(Debug, Deserialize)]
struct ServerFile {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    cwd: Option<PathBuf>,
    #[serde(default)]
    env: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct TimeoutsFile {
    handshake_ms: Option<u64>,
    call_ms: Option<u64>,
    stop_grace_ms: Option<u64>,
}

impl ConfigFile {
    fn into_config(self) -> ClientConfig {
        ClientConfig {
            server: ServerConfig {
                command: self.server.command,
                args: self.server.args,
                cwd: self.server.cwd,
                env: self.server.env,
            },
            handshake_timeout: Duration::from_millis(
                self.timeouts.handshake_ms.unwrap_or(DEFAULT_HANDSHAKE_MS),
            ),
            call_timeout: Duration::from_millis(self.timeouts.call_ms.unwrap_or(DEFAULT_CALL_MS)),
            stop_grace: Duration::from_millis(
                self.timeouts.stop_grace_ms.unwrap_or(DEFAULT_STOP_GRACE_MS),
            ),
        }
    }
}
