use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation behaviour
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Customer-facing texts and limits for the chat widget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "d_welcome")]
    pub welcome_message: String,
    /// Shown when the AI responder or the agent channel fails.
    #[serde(default = "d_apology")]
    pub apology_message: String,
    /// Shown when a hand-off attempt fails and the session stays with the AI.
    #[serde(default = "d_handoff_failed")]
    pub handoff_failed_message: String,
    #[serde(default = "d_1000")]
    pub max_message_chars: usize,
    /// Upper bound on the channel call that opens a hand-off thread.
    #[serde(default = "d_15000")]
    pub handoff_timeout_ms: u64,
    /// In-memory sessions idle longer than this are dropped.  `None` keeps
    /// them for the process lifetime.
    #[serde(default = "d_idle")]
    pub session_idle_minutes: Option<u32>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            welcome_message: d_welcome(),
            apology_message: d_apology(),
            handoff_failed_message: d_handoff_failed(),
            max_message_chars: 1000,
            handoff_timeout_ms: 15_000,
            session_idle_minutes: d_idle(),
        }
    }
}

fn d_welcome() -> String {
    "Hi! I can answer questions about digitizing your photos, slides, film and tapes. \
     Ask away, or request a human agent at any time."
        .into()
}
fn d_apology() -> String {
    "Sorry, something went wrong on our side. Please try again in a moment.".into()
}
fn d_handoff_failed() -> String {
    "We couldn't reach a human agent right now. You can keep chatting with the \
     assistant or try again shortly."
        .into()
}
fn d_1000() -> usize {
    1000
}
fn d_15000() -> u64 {
    15_000
}
fn d_idle() -> Option<u32> {
    Some(240)
}
