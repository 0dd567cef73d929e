// ABOUTME: Per-adapter settings for the built-in CLI backends.
// ABOUTME: Deserializes as the [adapters] table of the host application's config file.

use crate::backends::claude::ClaudeConfig;
use crate::backends::codex::CodexConfig;
use crate::backends::gemini::GeminiConfig;
use serde::{Deserialize, Serialize};

/// Settings for the built-in CLI adapters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdaptersConfig {
    /// Grace period applied to every adapter, overriding per-adapter values
    #[serde(default)]
    pub cancel_grace_ms: Option<u64>,
    #[serde(default)]
    pub claude: ClaudeConfig,
    #[serde(default)]
    pub codex: CodexConfig,
    #[serde(default)]
    pub gemini: GeminiConfig,
}

impl AdaptersConfig {
    pub fn claude(&self) -> ClaudeConfig {
        let mut config = self.claude.clone();
        if let Some(ms) = self.cancel_grace_ms {
            config.cancel_grace_ms = ms;
        }
        config
    }

    pub fn codex(&self) -> CodexConfig {
        let mut config = self.codex.clone();
        if let Some(ms) = self.cancel_grace_ms {
            config.cancel_grace_ms = ms;
        }
        config
    }

    pub fn gemini(&self) -> GeminiConfig {
        let mut config = self.gemini.clone();
        if let Some(ms) = self.cancel_grace_ms {
            config.cancel_grace_ms = ms;
        }
        config
    }
}
