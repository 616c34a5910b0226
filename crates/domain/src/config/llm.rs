use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AI responder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Registered providers.  The first one (or `default_provider`) answers
    /// AI-mode messages.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub default_provider: Option<String>,
    #[serde(default = "d_system_prompt")]
    pub system_prompt: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default = "d_max_tokens")]
    pub max_tokens: Option<u32>,
    /// Number of most recent conversation messages sent with each request.
    #[serde(default = "d_history")]
    pub history_limit: usize,
    #[serde(default = "d_20000u")]
    pub timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            default_provider: None,
            system_prompt: d_system_prompt(),
            temperature: None,
            max_tokens: d_max_tokens(),
            history_limit: d_history(),
            timeout_ms: 20_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub kind: ProviderKind,
    pub base_url: String,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub default_model: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenaiCompat,
    AzureOpenai,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    /// Header name (e.g. "Authorization", "api-key").
    #[serde(default)]
    pub header: Option<String>,
    /// Header value prefix (e.g. "Bearer ").
    #[serde(default)]
    pub prefix: Option<String>,
    /// Env var containing the key.
    #[serde(default)]
    pub env: Option<String>,
    /// Direct key (for config-only setups; prefer env).
    #[serde(default)]
    pub key: Option<String>,
}

// ── serde default helpers ───────────────────────────────────────────

fn d_system_prompt() -> String {
    "You are the customer assistant for a media digitization service that converts \
     photos, slides, negatives, film reels and video tapes to digital files. Answer \
     questions about services, pricing, turnaround and shipping briefly and politely. \
     If you are unsure, suggest talking to a human agent."
        .into()
}
fn d_max_tokens() -> Option<u32> {
    Some(400)
}
fn d_history() -> usize {
    20
}
fn d_20000u() -> u64 {
    20_000
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_parses_from_toml() {
        let toml_str = r#"
            [[providers]]
            id = "openai"
            kind = "openai_compat"
            base_url = "https://api.openai.com/v1"
            default_model = "gpt-4o-mini"
            auth = { env = "OPENAI_API_KEY" }
        "#;
        let cfg: LlmConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.providers.len(), 1);
        let p = &cfg.providers[0];
        assert_eq!(p.kind, ProviderKind::OpenaiCompat);
        assert_eq!(p.auth.env.as_deref(), Some("OPENAI_API_KEY"));
        assert_eq!(cfg.history_limit, 20);
    }

    #[test]
    fn azure_kind_parses() {
        let kind: ProviderKind = serde_json::from_str("\"azure_openai\"").unwrap();
        assert_eq!(kind, ProviderKind::AzureOpenai);
    }
}
