pub mod error;
pub mod health;
pub mod relay;
pub mod sessions;
pub mod slack;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the API router.
///
/// The widget endpoints (`/api/sessions`, `/api/relay`) are public by
/// nature; the webhook authenticates each request by signature.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        // Agent channel webhook
        .route("/api/slack/events", post(slack::events))
        // Relay poll / ingest
        .route("/api/relay", get(relay::poll).post(relay::ingest))
        // Sessions
        .route(
            "/api/sessions",
            post(sessions::dispatch).put(sessions::dispatch),
        )
        .route("/api/sessions/:id", get(sessions::get_session))
}
