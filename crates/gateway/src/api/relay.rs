//! Relay poll and ingest endpoints.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::response::Json;
use serde::Deserialize;
use serde_json::Value;

use hd_domain::chat::validate_content;

use super::error::ApiError;
use crate::runtime::NewRelayEntry;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollQuery {
    #[serde(default)]
    pub thread_id: Option<String>,
    /// Kept as a string: browsers send `"null"` or `"relay-12"` as often
    /// as a bare id, and anything unparseable is an unknown cursor.
    #[serde(default)]
    pub last_message_id: Option<String>,
}

/// `GET /api/relay?threadId=…&lastMessageId=…`
pub async fn poll(
    State(state): State<AppState>,
    query: Result<Query<PollQuery>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(q) = query?;
    let thread_id = q
        .thread_id
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::bad_request("threadId is required"))?;

    let cursor = q.last_message_id.as_deref().and_then(parse_cursor);
    let page = state.relay.poll(thread_id, cursor);

    Ok(Json(serde_json::json!({
        "success": true,
        "messages": page.entries,
        "hasMore": page.has_more,
    })))
}

fn parse_cursor(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    raw.strip_prefix("relay-").unwrap_or(raw).parse().ok()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestBody {
    pub thread_id: String,
    pub content: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub is_from_agent: bool,
}

/// `POST /api/relay`
pub async fn ingest(
    State(state): State<AppState>,
    body: Result<Json<IngestBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = body?;
    let thread_id = body.thread_id.trim();
    if thread_id.is_empty() {
        return Err(ApiError::bad_request("threadId is required"));
    }
    let content = validate_content(&body.content, state.config.chat.max_message_chars)?;

    let entry = state.relay.store(
        thread_id,
        NewRelayEntry {
            content,
            timestamp: chrono::Utc::now(),
            is_from_agent: body.is_from_agent,
            sender: None,
            session_id: body.session_id,
            signed: false,
        },
    );

    Ok(Json(serde_json::json!({
        "success": true,
        "message": entry,
    })))
}
