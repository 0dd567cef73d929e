// ABOUTME: Configuration parsing from TOML file with environment variable overrides
// ABOUTME: Covers the relay listener, its API token, and the built-in adapter settings
use anyhow::{Context, Result};
use coder_agent::AdaptersConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "headless-coder.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub adapters: AdaptersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_relay_host")]
    pub host: String,
    #[serde(default = "default_relay_port")]
    pub port: u16,
    /// Bearer token required on /api/acp routes when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: default_relay_host(),
            port: default_relay_port(),
            api_token: None,
        }
    }
}

fn default_relay_host() -> String {
    "127.0.0.1".to_string()
}

fn default_relay_port() -> u16 {
    8000
}

impl Config {
    /// Load configuration with environment variable overrides.
    ///
    /// The file is `path` if given, else `HEADLESS_CODER_CONFIG`, else
    /// `headless-coder.toml` in the working directory. A missing default file is not an
    /// error; an explicitly named one is.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("HEADLESS_CODER_CONFIG").ok().map(PathBuf::from));

        let mut config = match explicit {
            Some(path) => Self::from_file(&path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Config::default(),
        };

        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str::<Config>(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(val) = std::env::var("HEADLESS_CODER_HOST") {
            self.relay.host = val;
        }
        if let Ok(val) = std::env::var("HEADLESS_CODER_PORT") {
            self.relay.port = val.parse().with_context(|| {
                format!("HEADLESS_CODER_PORT must be a valid port number, got: {}", val)
            })?;
        }
        if let Ok(val) = std::env::var("ACP_TOKEN") {
            self.relay.api_token = Some(val);
        }
        if let Ok(val) = std::env::var("HEADLESS_CODER_GRACE_MS") {
            self.adapters.cancel_grace_ms = Some(val.parse().with_context(|| {
                format!("HEADLESS_CODER_GRACE_MS must be a number of milliseconds, got: {}", val)
            })?);
        }
        if let Ok(val) = std::env::var("CLAUDE_BINARY") {
            self.adapters.claude.binary = val;
        }
        if let Ok(val) = std::env::var("CODEX_BINARY") {
            self.adapters.codex.binary = val;
        }
        if let Ok(val) = std::env::var("GEMINI_BINARY") {
            self.adapters.gemini.binary = val;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        // An empty token means auth is off, not "match the empty string"
        if self
            .relay
            .api_token
            .as_deref()
            .is_some_and(|t| t.trim().is_empty())
        {
            self.relay.api_token = None;
        }
        if self.relay.host.trim().is_empty() {
            anyhow::bail!("relay.host must not be empty");
        }
        for (name, binary) in [
            ("claude", &self.adapters.claude.binary),
            ("codex", &self.adapters.codex.binary),
            ("gemini", &self.adapters.gemini.binary),
        ] {
            if binary.trim().is_empty() {
                anyhow::bail!("adapters.{}.binary must not be empty", name);
            }
        }
        Ok(())
    }

    /// Socket address string for the relay listener
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.relay.host, self.relay.port)
    }
}
