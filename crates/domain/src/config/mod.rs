mod channel;
mod chat;
mod llm;
mod observability;
mod relay;
mod server;
mod transcript;

pub use channel::*;
pub use chat::*;
pub use llm::*;
pub use observability::*;
pub use relay::*;
pub use server::*;
pub use transcript::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub transcript: TranscriptConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Read a secret from the environment variable `name`.
///
/// Unset, non-UTF-8 and empty values all count as missing.
pub fn read_secret(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl ConfigError {
    fn error(field: &str, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: &str, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Only structural problems are errors.  Missing credentials are
    /// warnings: the gateway still boots so the widget stays usable, and the
    /// affected path degrades to apology messages.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError::error("server.port", "port must be greater than 0"));
        }
        if self.server.host.is_empty() {
            errors.push(ConfigError::error("server.host", "host must not be empty"));
        }

        if self.chat.max_message_chars == 0 {
            errors.push(ConfigError::error(
                "chat.max_message_chars",
                "must be greater than 0",
            ));
        }
        if self.chat.handoff_timeout_ms == 0 {
            errors.push(ConfigError::error(
                "chat.handoff_timeout_ms",
                "must be greater than 0",
            ));
        }
        if self.chat.welcome_message.trim().is_empty() {
            errors.push(ConfigError::error(
                "chat.welcome_message",
                "must not be empty",
            ));
        }

        if self.relay.poll_page_size == 0 {
            errors.push(ConfigError::error(
                "relay.poll_page_size",
                "must be greater than 0",
            ));
        }
        if self.relay.max_entries == Some(0) {
            errors.push(ConfigError::error(
                "relay.max_entries",
                "must be greater than 0 when set",
            ));
        }
        if self.relay.max_entries.is_none() && self.relay.max_age_secs.is_none() {
            errors.push(ConfigError::warning(
                "relay",
                "neither max_entries nor max_age_secs is set; relay memory is unbounded",
            ));
        }

        if self.channel.channel_id.is_empty() {
            errors.push(ConfigError::warning(
                "channel.channel_id",
                "no agent channel configured; hand-off requests will fail",
            ));
        }
        if self.channel.signature_tolerance_secs == 0 {
            errors.push(ConfigError::error(
                "channel.signature_tolerance_secs",
                "must be greater than 0",
            ));
        }
        if read_secret(&self.channel.signing_secret_env).is_none() {
            errors.push(ConfigError::warning(
                "channel.signing_secret_env",
                format!(
                    "env var {} is not set; all inbound webhooks will be rejected",
                    self.channel.signing_secret_env
                ),
            ));
        }

        if self.transcript.backend == TranscriptBackend::Airtable {
            if self.transcript.base_id.is_empty() {
                errors.push(ConfigError::error(
                    "transcript.base_id",
                    "base_id is required for the airtable backend",
                ));
            }
            if self.transcript.table.is_empty() {
                errors.push(ConfigError::error(
                    "transcript.table",
                    "table is required for the airtable backend",
                ));
            }
        }

        if !(0.0..=1.0).contains(&self.observability.sample_rate) {
            errors.push(ConfigError::warning(
                "observability.sample_rate",
                format!(
                    "{} is outside 0.0..=1.0; using {}",
                    self.observability.sample_rate,
                    self.observability.sample_ratio()
                ),
            ));
        }

        if self.llm.providers.is_empty() {
            errors.push(ConfigError::warning(
                "llm.providers",
                "no AI providers configured; AI-mode replies will fall back to the apology message",
            ));
        }
        for (i, p) in self.llm.providers.iter().enumerate() {
            if p.base_url.is_empty() {
                errors.push(ConfigError::error(
                    &format!("llm.providers[{i}].base_url"),
                    "base_url must not be empty",
                ));
            }
        }

        errors
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn errors_only(cfg: &Config) -> Vec<ConfigError> {
        cfg.validate()
            .into_iter()
            .filter(|e| e.severity == ConfigSeverity::Error)
            .collect()
    }

    #[test]
    fn default_config_has_no_errors() {
        assert!(errors_only(&Config::default()).is_empty());
    }

    #[test]
    fn zero_port_is_an_error() {
        let mut cfg = Config::default();
        cfg.server.port = 0;
        let errs = errors_only(&cfg);
        assert!(errs.iter().any(|e| e.field == "server.port"));
    }

    #[test]
    fn airtable_backend_requires_base_and_table() {
        let mut cfg = Config::default();
        cfg.transcript.backend = TranscriptBackend::Airtable;
        cfg.transcript.base_id.clear();
        cfg.transcript.table.clear();
        let errs = errors_only(&cfg);
        assert!(errs.iter().any(|e| e.field == "transcript.base_id"));
        assert!(errs.iter().any(|e| e.field == "transcript.table"));
    }

    #[test]
    fn unbounded_relay_is_a_warning() {
        let mut cfg = Config::default();
        cfg.relay.max_entries = None;
        cfg.relay.max_age_secs = None;
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|e| e.field == "relay" && e.severity == ConfigSeverity::Warning));
    }

    #[test]
    fn out_of_range_sample_rate_is_a_warning() {
        let mut cfg = Config::default();
        cfg.observability.sample_rate = 2.0;
        assert!(errors_only(&cfg).is_empty());
        assert!(cfg
            .validate()
            .iter()
            .any(|e| e.field == "observability.sample_rate" && e.severity == ConfigSeverity::Warning));
    }

    #[test]
    fn display_includes_tag_and_field() {
        let e = ConfigError::error("chat.max_message_chars", "must be greater than 0");
        assert_eq!(
            e.to_string(),
            "[ERROR] chat.max_message_chars: must be greater than 0"
        );
    }
}
