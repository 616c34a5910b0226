//! AppState construction and background-task spawning extracted from `main.rs`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use hd_channel::{AgentChannel, EventFilter, EventIntake, SignatureVerifier, SlackChannel};
use hd_domain::config::{read_secret, Config, ConfigSeverity, TranscriptBackend};
use hd_providers::ProviderRegistry;
use hd_sessions::{MemoryTranscriptStore, RestTranscriptStore, SessionStore, TranscriptStore, TranscriptWriter};

use crate::runtime::{Orchestrator, RelayBuffer, Responder};
use crate::state::AppState;

/// External collaborators of the gateway.  Built from config by
/// [`build_app_state`]; tests supply their own.
pub struct Components {
    pub transcript_store: Arc<dyn TranscriptStore>,
    pub channel: Arc<dyn AgentChannel>,
    pub llm: Arc<ProviderRegistry>,
    pub signing_secret: Option<String>,
}

/// Validate config, initialize every subsystem and return a fully-wired
/// [`AppState`].
pub fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Transcript store ─────────────────────────────────────────────
    let transcript_store = transcript_store(&config)?;
    tracing::info!(backend = transcript_store.backend(), "transcript store ready");

    // ── Agent channel ────────────────────────────────────────────────
    let bot_token = read_secret(&config.channel.bot_token_env);
    if bot_token.is_none() {
        tracing::warn!(
            env = %config.channel.bot_token_env,
            "agent channel token not set; hand-offs will fail"
        );
    }
    let channel: Arc<dyn AgentChannel> = Arc::new(
        SlackChannel::new(&config.channel, bot_token).context("initializing agent channel")?,
    );
    tracing::info!(channel = %config.channel.channel_id, "agent channel client ready");

    // ── LLM providers ────────────────────────────────────────────────
    let llm = Arc::new(ProviderRegistry::from_config(&config.llm));
    tracing::info!(providers = llm.len(), "LLM provider registry ready");

    // ── Webhook signing secret ───────────────────────────────────────
    let signing_secret = read_secret(&config.channel.signing_secret_env);
    if signing_secret.is_none() {
        tracing::warn!(
            env = %config.channel.signing_secret_env,
            "signing secret not set; every channel webhook will be rejected"
        );
    }

    Ok(assemble(
        config,
        Components {
            transcript_store,
            channel,
            llm,
            signing_secret,
        },
    ))
}

fn transcript_store(config: &Config) -> anyhow::Result<Arc<dyn TranscriptStore>> {
    let cfg = &config.transcript;
    if cfg.backend == TranscriptBackend::Memory {
        return Ok(Arc::new(MemoryTranscriptStore::new()));
    }

    match read_secret(&cfg.api_key_env) {
        Some(key) => Ok(Arc::new(
            RestTranscriptStore::new(cfg, key).context("initializing transcript store")?,
        )),
        None => {
            tracing::warn!(
                env = %cfg.api_key_env,
                "transcript store key not set; transcripts are kept in memory only"
            );
            Ok(Arc::new(MemoryTranscriptStore::new()))
        }
    }
}

/// Wire components into an [`AppState`].
pub fn assemble(config: Arc<Config>, parts: Components) -> AppState {
    let sessions = Arc::new(SessionStore::new());
    let transcripts = Arc::new(TranscriptWriter::new(parts.transcript_store));
    let responder = Responder::new(parts.llm.default_provider(), &config.llm);
    let orchestrator = Arc::new(Orchestrator::new(
        sessions,
        transcripts,
        parts.channel,
        responder,
        config.chat.clone(),
    ));

    let relay = Arc::new(RelayBuffer::new(&config.relay));
    let intake = Arc::new(EventIntake::new(
        SignatureVerifier::new(parts.signing_secret, config.channel.signature_tolerance_secs),
        EventFilter::new(
            config.channel.channel_id.clone(),
            config.channel.bot_user_id.clone(),
        ),
    ));

    AppState {
        config,
        orchestrator,
        relay,
        intake,
        llm: parts.llm,
    }
}

/// Spawn the long-running background tokio tasks (relay pruning, idle
/// session collection).
///
/// Call this **after** [`build_app_state`] when running the HTTP server.
pub fn spawn_background_tasks(state: &AppState) {
    // ── Periodic relay pruning ───────────────────────────────────────
    {
        let relay = state.relay.clone();
        let every = Duration::from_secs(state.config.relay.prune_interval_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                relay.prune_expired();
            }
        });
    }

    // ── Periodic idle session collection ─────────────────────────────
    if let Some(minutes) = state.config.chat.session_idle_minutes.filter(|m| *m > 0) {
        let orchestrator = state.orchestrator.clone();
        let max_idle = chrono::Duration::minutes(i64::from(minutes));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(300));
            loop {
                interval.tick().await;
                let removed = orchestrator.collect_idle(max_idle);
                if removed > 0 {
                    tracing::info!(removed, "idle sessions collected");
                }
            }
        });
    }
}
