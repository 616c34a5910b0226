use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent channel (Slack-style Web API + Events API)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where hand-off threads are opened and how inbound events are verified.
///
/// The bot token and signing secret are never stored in the file; only the
/// names of the environment variables holding them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Web API base URL (override for tests / proxies).
    #[serde(default = "d_api_base")]
    pub api_base_url: String,
    /// The fixed channel that receives hand-off threads.
    #[serde(default)]
    pub channel_id: String,
    /// The bridge's own bot user id.  Events authored by it are dropped to
    /// avoid echo loops (events carrying any `bot_id` are dropped as well).
    #[serde(default)]
    pub bot_user_id: Option<String>,
    #[serde(default = "d_bot_token_env")]
    pub bot_token_env: String,
    #[serde(default = "d_signing_secret_env")]
    pub signing_secret_env: String,
    /// Replay window for inbound webhooks.
    #[serde(default = "d_300")]
    pub signature_tolerance_secs: u64,
    #[serde(default = "d_10000")]
    pub request_timeout_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            api_base_url: d_api_base(),
            channel_id: String::new(),
            bot_user_id: None,
            bot_token_env: d_bot_token_env(),
            signing_secret_env: d_signing_secret_env(),
            signature_tolerance_secs: 300,
            request_timeout_ms: 10_000,
        }
    }
}

fn d_api_base() -> String {
    "https://slack.com/api".into()
}
fn d_bot_token_env() -> String {
    "SLACK_BOT_TOKEN".into()
}
fn d_signing_secret_env() -> String {
    "SLACK_SIGNING_SECRET".into()
}
fn d_300() -> u64 {
    300
}
fn d_10000() -> u64 {
    10_000
}
