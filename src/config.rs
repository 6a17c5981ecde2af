//! Engine configuration, loaded from TOML.
//!
//! Every section has serde defaults, so an empty file (or no file) yields a
//! working configuration. Bounds are checked by [`EngineConfig::validate`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::provider::ollama::OllamaConfig;
use crate::provider::pubmed::PubMedConfig;

/// Result type for configuration loading.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Top-level configuration for a [`WorkflowEngine`](crate::workflow::WorkflowEngine).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Data directory for the durable store. `None` for memory-only mode.
    pub data_dir: Option<PathBuf>,
    /// Reasoning loop bounds.
    pub react: ReactConfig,
    /// Per-call timeouts and suppression policy.
    pub limits: CallLimits,
    /// Event stream shaping.
    pub stream: StreamConfig,
    /// Ollama generation backend (CLI only).
    pub ollama: OllamaConfig,
    /// PubMed literature search (CLI only).
    pub pubmed: PubMedConfig,
}

/// Bounds for one think→act→observe loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReactConfig {
    /// Maximum THINK phases before a forced finish.
    pub max_iterations: usize,
    /// Most recent (thought, action, observation) tuples rendered into a prompt.
    pub history_limit: usize,
    /// Corrective re-prompts after unparsable generation output.
    pub corrective_retries: usize,
}

impl Default for ReactConfig {
    fn default() -> Self {
        Self {
            max_iterations: 6,
            history_limit: 8,
            corrective_retries: 1,
        }
    }
}

/// Timeouts applied independently to every external call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallLimits {
    pub tool_timeout_ms: u64,
    pub generation_timeout_ms: u64,
    /// Timeouts on one tool after which that tool is suppressed for the run.
    pub timeout_strike_limit: u32,
}

impl Default for CallLimits {
    fn default() -> Self {
        Self {
            tool_timeout_ms: 30_000,
            generation_timeout_ms: 120_000,
            timeout_strike_limit: 2,
        }
    }
}

impl CallLimits {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_timeout_ms)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_millis(self.generation_timeout_ms)
    }
}

/// Event stream shaping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Capacity of the per-session event channel.
    pub event_buffer: usize,
    /// Characters per `token` event when releasing the final answer.
    pub token_chunk_chars: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            event_buffer: 256,
            token_chunk_chars: 50,
        }
    }
}

impl EngineConfig {
    /// Load from a TOML file and validate.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml_str(&content, &path.display().to_string())
    }

    /// Parse from TOML text. `origin` names the source in error messages.
    pub fn from_toml_str(content: &str, origin: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject bounds that would stall or disable the engine.
    pub fn validate(&self) -> ConfigResult<()> {
        let checks = [
            (self.react.max_iterations == 0, "react.max_iterations must be > 0"),
            (self.react.history_limit == 0, "react.history_limit must be > 0"),
            (self.limits.tool_timeout_ms == 0, "limits.tool_timeout_ms must be > 0"),
            (
                self.limits.generation_timeout_ms == 0,
                "limits.generation_timeout_ms must be > 0",
            ),
            (
                self.limits.timeout_strike_limit == 0,
                "limits.timeout_strike_limit must be > 0",
            ),
            (self.stream.event_buffer == 0, "stream.event_buffer must be > 0"),
            (
                self.stream.token_chunk_chars == 0,
                "stream.token_chunk_chars must be > 0",
            ),
            (
                self.pubmed.enabled && self.pubmed.timeout_secs == 0,
                "pubmed.timeout_secs must be > 0",
            ),
        ];
        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, message)) => Err(ConfigError::Invalid {
                message: (*message).to_string(),
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.react.corrective_retries, 1);
        assert_eq!(config.stream.token_chunk_chars, 50);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            "[react]\nmax_iterations = 3\n\n[limits]\ntool_timeout_ms = 500\n",
            "inline",
        )
        .unwrap();
        assert_eq!(config.react.max_iterations, 3);
        assert_eq!(config.react.history_limit, 8);
        assert_eq!(config.limits.tool_timeout(), Duration::from_millis(500));
        assert_eq!(config.limits.timeout_strike_limit, 2);
    }

    #[test]
    fn zero_bound_rejected() {
        let err = EngineConfig::from_toml_str("[react]\nhistory_limit = 0\n", "inline")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn pubmed_section_overrides_base_url() {
        let config = EngineConfig::from_toml_str(
            "[pubmed]\nbase_url = \"http://127.0.0.1:8080/eutils\"\n",
            "inline",
        )
        .unwrap();
        assert!(config.pubmed.enabled);
        assert_eq!(config.pubmed.base_url, "http://127.0.0.1:8080/eutils");

        let err = EngineConfig::from_toml_str("[pubmed]\ntimeout_secs = 0\n", "inline").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn malformed_toml_rejected() {
        let err = EngineConfig::from_toml_str("[react\n", "inline").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[stream]\nevent_buffer = 16\n").unwrap();
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.stream.event_buffer, 16);
    }
}
