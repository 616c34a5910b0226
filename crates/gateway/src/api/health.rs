use axum::extract::State;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

/// `GET /health`: liveness plus a few gauges.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let orch = &state.orchestrator;
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": orch.sessions().len(),
        "relay": {
            "threads": state.relay.thread_count(),
            "entries": state.relay.entry_count(),
        },
        "transcriptBackend": orch.transcript_backend(),
        "llmProviders": state.llm.list_providers(),
    }))
}
