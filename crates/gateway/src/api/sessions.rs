//! Session endpoints used by the widget.
//!
//! `POST|PUT /api/sessions` takes an `action`-tagged body so the widget
//! has one endpoint for every session operation.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use serde_json::Value;

use hd_sessions::parse_transcript;

use super::error::ApiError;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request bodies
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum SessionAction {
    #[serde(rename_all = "camelCase")]
    Create {
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        initial_message: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    AddMessage {
        session_id: String,
        message: MessagePayload,
    },
    #[serde(rename_all = "camelCase")]
    Handoff { session_id: String },
    #[serde(rename_all = "camelCase")]
    End { session_id: String },
}

/// A message submitted through `addMessage`, tagged by its author.
#[derive(Debug, Deserialize)]
#[serde(tag = "sender", rename_all = "lowercase")]
pub enum MessagePayload {
    Customer {
        content: String,
    },
    /// An agent reply the widget received from the relay poll, named by
    /// its relay id.  Content comes from the buffered entry, never from
    /// the request.
    #[serde(rename_all = "camelCase")]
    Agent { relay_id: u64, thread_id: String },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `POST|PUT /api/sessions`
pub async fn dispatch(
    State(state): State<AppState>,
    body: Result<Json<SessionAction>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(action) = body?;
    let orch = &state.orchestrator;

    let body = match action {
        SessionAction::Create {
            session_id,
            initial_message,
        } => {
            let (session, is_new) = orch
                .start_session(session_id.as_deref(), initial_message.as_deref())
                .await?;
            serde_json::json!({
                "success": true,
                "session": session,
                "isNew": is_new,
            })
        }

        SessionAction::AddMessage {
            session_id,
            message: MessagePayload::Customer { content },
        } => {
            let outcome = orch.submit_customer_message(&session_id, &content).await?;
            serde_json::json!({
                "success": true,
                "message": outcome.customer,
                "reply": outcome.reply,
            })
        }

        SessionAction::AddMessage {
            session_id,
            message: MessagePayload::Agent { relay_id, thread_id },
        } => {
            let entry = state
                .relay
                .get(&thread_id, relay_id)
                .filter(|e| e.is_from_agent)
                .ok_or_else(|| {
                    ApiError::new(
                        StatusCode::NOT_FOUND,
                        format!("no agent reply {relay_id} in thread {thread_id}"),
                    )
                })?;
            let message = orch.ingest_agent_reply(&session_id, &entry).await?;
            serde_json::json!({
                "success": true,
                "message": message,
            })
        }

        SessionAction::Handoff { session_id } => match orch.request_handoff(&session_id).await {
            Ok(handoff) => serde_json::json!({
                "success": true,
                "threadId": handoff.thread_id,
                "session": handoff.session,
            }),
            Err(e) if e.is_downstream() => {
                tracing::warn!(session_id = %session_id, error = %e, "hand-off failed");
                return Err(ApiError::downstream(
                    state.config.chat.handoff_failed_message.clone(),
                ));
            }
            Err(e) => return Err(e.into()),
        },

        SessionAction::End { session_id } => {
            let session = orch.end_session(&session_id).await?;
            serde_json::json!({
                "success": true,
                "session": session,
            })
        }
    };

    Ok(Json(body))
}

/// `GET /api/sessions/:id`
///
/// The in-memory snapshot plus whatever the transcript store holds.  A
/// store failure is logged and reported as a missing transcript.
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let orch = &state.orchestrator;
    let session = orch.snapshot(&session_id)?;

    let transcript = match orch.transcript(&session_id).await {
        Ok(Some(record)) => serde_json::json!({
            "status": record.status,
            "threadId": record.thread_id,
            "lines": parse_transcript(&record.transcript),
            "raw": record.transcript,
        }),
        Ok(None) => Value::Null,
        Err(e) => {
            tracing::warn!(session_id = %session_id, error = %e, "transcript fetch failed");
            Value::Null
        }
    };

    Ok(Json(serde_json::json!({
        "success": true,
        "session": session,
        "transcript": transcript,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_parse_from_wire() {
        let a: SessionAction = serde_json::from_str(
            r#"{"action":"create","sessionId":"s1","initialMessage":"Hi"}"#,
        )
        .unwrap();
        assert!(matches!(
            a,
            SessionAction::Create { session_id: Some(ref id), initial_message: Some(_) } if id == "s1"
        ));

        let a: SessionAction = serde_json::from_str(
            r#"{"action":"addMessage","sessionId":"s1","message":{"sender":"customer","content":"hello"}}"#,
        )
        .unwrap();
        assert!(matches!(
            a,
            SessionAction::AddMessage { message: MessagePayload::Customer { .. }, .. }
        ));

        let a: SessionAction = serde_json::from_str(
            r#"{"action":"addMessage","sessionId":"s1","message":{"sender":"agent","relayId":3,"threadId":"T1","content":"On it"}}"#,
        )
        .unwrap();
        assert!(matches!(
            a,
            SessionAction::AddMessage { message: MessagePayload::Agent { relay_id: 3, .. }, .. }
        ));
    }

    #[test]
    fn unknown_action_is_rejected() {
        assert!(serde_json::from_str::<SessionAction>(r#"{"action":"delete","sessionId":"s1"}"#).is_err());
    }
}
