use std::sync::Arc;

use hd_channel::EventIntake;
use hd_domain::config::Config;
use hd_providers::ProviderRegistry;

use crate::runtime::{Orchestrator, RelayBuffer};

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Session state machine and transcript writes.
    pub orchestrator: Arc<Orchestrator>,
    /// Agent replies waiting for the widget to poll them.
    pub relay: Arc<RelayBuffer>,
    /// Webhook signature check and event classification.
    pub intake: Arc<EventIntake>,
    pub llm: Arc<ProviderRegistry>,
}
