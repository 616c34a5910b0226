//! HTTP client for the gateway's widget endpoints, plus the relay poll
//! loop.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use hd_domain::chat::{Message, RelayEntry, Session};
use hd_domain::error::{Error, Result};

use super::state::Widget;
use crate::runtime::Reply;

/// Response to a customer message.
#[derive(Debug, Clone, Deserialize)]
pub struct Sent {
    pub message: Message,
    pub reply: Reply,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Created {
    session: Session,
    is_new: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HandedOff {
    thread_id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct Ingested {
    message: Message,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Polled {
    pub messages: Vec<RelayEntry>,
    pub has_more: bool,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
}

#[derive(Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: String,
}

impl GatewayClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }

    /// Open `session_id`, or a new session when `None`.
    pub async fn create_session(&self, session_id: Option<&str>) -> Result<(Session, bool)> {
        let created: Created = self
            .sessions(serde_json::json!({ "action": "create", "sessionId": session_id }))
            .await?;
        Ok((created.session, created.is_new))
    }

    pub async fn send_message(&self, session_id: &str, content: &str) -> Result<Sent> {
        self.sessions(serde_json::json!({
            "action": "addMessage",
            "sessionId": session_id,
            "message": { "sender": "customer", "content": content },
        }))
        .await
    }

    /// Request a hand-off and return the agent thread id.
    pub async fn request_handoff(&self, session_id: &str) -> Result<String> {
        let done: HandedOff = self
            .sessions(serde_json::json!({ "action": "handoff", "sessionId": session_id }))
            .await?;
        Ok(done.thread_id)
    }

    pub async fn end_session(&self, session_id: &str) -> Result<()> {
        self.sessions::<serde_json::Value>(serde_json::json!({
            "action": "end",
            "sessionId": session_id,
        }))
        .await
        .map(|_| ())
    }

    /// Record a polled agent reply in the session.  The gateway reads the
    /// content from its own relay buffer; only the id travels.
    pub async fn add_agent_message(&self, session_id: &str, entry: &RelayEntry) -> Result<Message> {
        let ingested: Ingested = self
            .sessions(serde_json::json!({
                "action": "addMessage",
                "sessionId": session_id,
                "message": {
                    "sender": "agent",
                    "relayId": entry.id,
                    "threadId": entry.thread_id,
                },
            }))
            .await?;
        Ok(ingested.message)
    }

    pub async fn poll(&self, thread_id: &str, last_seen: Option<u64>) -> Result<Polled> {
        let mut req = self
            .http
            .get(format!("{}/api/relay", self.base_url))
            .query(&[("threadId", thread_id)]);
        if let Some(id) = last_seen {
            req = req.query(&[("lastMessageId", id.to_string())]);
        }
        let resp = req.send().await.map_err(from_reqwest)?;
        decode(resp).await
    }

    async fn sessions<T: DeserializeOwned>(&self, body: serde_json::Value) -> Result<T> {
        let resp = self
            .http
            .post(format!("{}/api/sessions", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;
        decode(resp).await
    }
}

/// Decode a 2xx body, or turn the gateway's error body back into the
/// matching [`Error`].
async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    let text = resp.text().await.map_err(from_reqwest)?;
    if status.is_success() {
        return Ok(serde_json::from_str(&text)?);
    }

    let message = serde_json::from_str::<ErrorBody>(&text)
        .ok()
        .and_then(|b| b.error)
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
    Err(match status {
        StatusCode::BAD_REQUEST => Error::Validation(message),
        StatusCode::NOT_FOUND => Error::SessionNotFound(message),
        StatusCode::CONFLICT => Error::InvalidState(message),
        StatusCode::UNAUTHORIZED => Error::Auth(message),
        _ => Error::Provider {
            provider: "gateway".into(),
            message,
        },
    })
}

fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Poll loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Poll the relay every `interval` while the widget is with an agent.
///
/// New agent entries are recorded in the session through the gateway,
/// rendered into `widget`, and sent on `out`.  The loop ends when
/// `cancel` fires or the widget stops asking to poll.  Poll and ingest
/// errors from the network or a 5xx are logged and retried on the next
/// tick; a reply the gateway refuses (4xx) is skipped.
pub async fn run_poll_loop(
    client: GatewayClient,
    widget: Arc<Mutex<Widget>>,
    interval: Duration,
    cancel: CancellationToken,
    out: mpsc::UnboundedSender<Message>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        // Drain every page the buffer already holds.
        loop {
            let Some(target) = widget.lock().poll_target() else {
                return;
            };
            let page = match client.poll(&target.thread_id, target.last_seen).await {
                Ok(page) => page,
                Err(e) => {
                    tracing::warn!(thread_id = %target.thread_id, error = %e, "relay poll failed");
                    break;
                }
            };

            // Only replies the gateway recorded are shown.  On a downstream
            // failure the page stops there and the entry is retried next tick.
            let pending = widget.lock().poll_received(&page.messages);
            let mut stalled_at = None;
            for entry in pending {
                match client.add_agent_message(&target.session_id, &entry).await {
                    Ok(message) => {
                        let fresh = widget.lock().delivered(entry.id, &message);
                        if fresh && out.send(message).is_err() {
                            return;
                        }
                    }
                    Err(e) if e.is_downstream() => {
                        tracing::warn!(
                            entry_id = entry.id,
                            error = %e,
                            "could not record agent reply, will retry"
                        );
                        stalled_at = Some(entry.id);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(entry_id = entry.id, error = %e, "agent reply refused, skipping");
                        widget.lock().skipped(entry.id);
                    }
                }
            }

            let resume = match stalled_at {
                Some(stalled) => page
                    .messages
                    .iter()
                    .map(|e| e.id)
                    .take_while(|&id| id < stalled)
                    .last(),
                None => page.messages.last().map(|e| e.id),
            };
            if let Some(id) = resume {
                widget.lock().advance_cursor(id);
            }

            if stalled_at.is_some() || !page.has_more || cancel.is_cancelled() {
                break;
            }
        }
    }
}
