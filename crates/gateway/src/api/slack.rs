//! Agent channel webhook intake.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};

use hd_channel::signature::{SIGNATURE_HEADER, TIMESTAMP_HEADER};
use hd_channel::Inbound;
use hd_domain::error::Error;

use crate::runtime::NewRelayEntry;
use crate::state::AppState;

/// `POST /api/slack/events`
///
/// The signature is checked over the raw body before anything is parsed.
/// Accepted thread replies land in the relay buffer; everything else that
/// verifies, redeliveries included, is acknowledged with `{"ok":true}` so
/// the provider does not retry it.
pub async fn events(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let header_str = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let now = chrono::Utc::now().timestamp();

    let inbound = state.intake.handle(
        &body,
        header_str(SIGNATURE_HEADER),
        header_str(TIMESTAMP_HEADER),
        now,
    );

    match inbound {
        Ok(Inbound::Challenge(challenge)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain")],
            challenge,
        )
            .into_response(),
        Ok(Inbound::Reply(reply)) => {
            let entry = state.relay.store(
                &reply.thread_id,
                NewRelayEntry {
                    content: reply.text,
                    timestamp: reply.timestamp,
                    is_from_agent: true,
                    sender: reply.user,
                    session_id: None,
                    signed: true,
                },
            );
            tracing::info!(thread_id = %entry.thread_id, entry_id = entry.id, "agent reply relayed");
            ack()
        }
        Ok(Inbound::Ignored(_)) => ack(),
        Err(Error::Auth(reason)) => {
            tracing::warn!(reason = %reason, "webhook rejected");
            (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({ "ok": false, "error": "invalid request signature" })),
            )
                .into_response()
        }
        Err(e) => {
            tracing::warn!(error = %e, "malformed webhook body");
            (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "ok": false, "error": "malformed event body" })),
            )
                .into_response()
        }
    }
}

fn ack() -> Response {
    Json(serde_json::json!({ "ok": true })).into_response()
}
