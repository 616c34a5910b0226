//! Outbound Web API client.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;

use hd_domain::config::ChannelConfig;
use hd_domain::error::{Error, Result};
use hd_domain::trace::TraceEvent;

const PROVIDER: &str = "slack";

/// Posts into the agent channel.
#[async_trait]
pub trait AgentChannel: Send + Sync {
    /// Post a new top-level message announcing a hand-off and return the
    /// thread id that later replies are grouped under.
    async fn open_thread(&self, summary: &str, session_id: &str) -> Result<String>;

    /// Post `text` inside an existing thread.
    async fn post_customer_message(&self, thread_id: &str, text: &str) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Slack-style implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `chat.postMessage` client bound to one channel.
pub struct SlackChannel {
    http: reqwest::Client,
    api_base_url: String,
    channel_id: String,
    bot_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    ts: Option<String>,
}

impl SlackChannel {
    /// `bot_token = None` keeps the gateway bootable; every post then fails
    /// with `not_authed` like the provider would.
    pub fn new(cfg: &ChannelConfig, bot_token: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.request_timeout_ms))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            http,
            api_base_url: cfg.api_base_url.trim_end_matches('/').to_owned(),
            channel_id: cfg.channel_id.clone(),
            bot_token,
        })
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Post `text`, optionally as a thread reply.  Returns the message `ts`.
    async fn post_message(&self, text: &str, thread_ts: Option<&str>) -> Result<String> {
        let token = self.bot_token.as_deref().ok_or_else(|| Error::Provider {
            provider: PROVIDER.into(),
            message: "not_authed".into(),
        })?;

        let mut payload = serde_json::json!({
            "channel": self.channel_id,
            "text": text,
            "unfurl_links": false,
        });
        if let Some(ts) = thread_ts {
            payload["thread_ts"] = ts.into();
        }

        let start = Instant::now();
        let result = self.send(token, &payload).await;

        TraceEvent::ChannelPost {
            channel: self.channel_id.clone(),
            thread_id: thread_ts.map(str::to_owned),
            ok: result.is_ok(),
            duration_ms: start.elapsed().as_millis() as u64,
        }
        .emit();

        result
    }

    async fn send(&self, token: &str, payload: &serde_json::Value) -> Result<String> {
        let resp = self
            .http
            .post(format!("{}/chat.postMessage", self.api_base_url))
            .bearer_auth(token)
            .json(payload)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let body = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(Error::Provider {
                provider: PROVIDER.into(),
                message: format!("HTTP {} - {}", status.as_u16(), body),
            });
        }

        let parsed: PostMessageResponse = serde_json::from_str(&body).map_err(|e| {
            Error::Provider {
                provider: PROVIDER.into(),
                message: format!("unparseable response: {e}"),
            }
        })?;
        if !parsed.ok {
            return Err(Error::Provider {
                provider: PROVIDER.into(),
                message: parsed.error.unwrap_or_else(|| "unknown_error".into()),
            });
        }
        parsed.ts.ok_or_else(|| Error::Provider {
            provider: PROVIDER.into(),
            message: "response missing ts".into(),
        })
    }
}

#[async_trait]
impl AgentChannel for SlackChannel {
    async fn open_thread(&self, summary: &str, session_id: &str) -> Result<String> {
        let text = thread_opening_text(summary, session_id);
        let ts = self.post_message(&text, None).await?;
        tracing::info!(session_id, thread_id = %ts, "agent thread opened");
        Ok(ts)
    }

    async fn post_customer_message(&self, thread_id: &str, text: &str) -> Result<()> {
        self.post_message(&format!("Customer: {text}"), Some(thread_id))
            .await
            .map(|_| ())
    }
}

/// Text of the thread root announcing a hand-off.
pub fn thread_opening_text(summary: &str, session_id: &str) -> String {
    let summary = if summary.trim().is_empty() {
        "(the customer has not written anything yet)"
    } else {
        summary
    };
    format!(
        "New chat hand-off request (session {session_id}). Reply in this thread to answer the customer.\n\n{summary}"
    )
}

fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}
