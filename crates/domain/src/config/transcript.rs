use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transcript store (tabular record API)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptBackend {
    /// Airtable-style REST API (one record per session).
    Airtable,
    /// Process memory only.  Useful for development and tests; nothing
    /// survives a restart.
    #[default]
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptConfig {
    #[serde(default)]
    pub backend: TranscriptBackend,
    #[serde(default = "d_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub base_id: String,
    #[serde(default = "d_table")]
    pub table: String,
    #[serde(default = "d_api_key_env")]
    pub api_key_env: String,
    /// Column names in the table.
    #[serde(default)]
    pub fields: TranscriptFields,
    #[serde(default = "d_8000")]
    pub timeout_ms: u64,
    /// Retries on 5xx / timeouts (4xx is never retried).
    #[serde(default = "d_2")]
    pub max_retries: u32,
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            backend: TranscriptBackend::Memory,
            base_url: d_base_url(),
            base_id: String::new(),
            table: d_table(),
            api_key_env: d_api_key_env(),
            fields: TranscriptFields::default(),
            timeout_ms: 8_000,
            max_retries: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptFields {
    #[serde(default = "d_session_field")]
    pub session: String,
    #[serde(default = "d_transcript_field")]
    pub transcript: String,
    #[serde(default = "d_status_field")]
    pub status: String,
    #[serde(default = "d_thread_field")]
    pub thread: String,
}

impl Default for TranscriptFields {
    fn default() -> Self {
        Self {
            session: d_session_field(),
            transcript: d_transcript_field(),
            status: d_status_field(),
            thread: d_thread_field(),
        }
    }
}

fn d_base_url() -> String {
    "https://api.airtable.com/v0".into()
}
fn d_table() -> String {
    "Chat Sessions".into()
}
fn d_api_key_env() -> String {
    "AIRTABLE_API_KEY".into()
}
fn d_session_field() -> String {
    "Session ID".into()
}
fn d_transcript_field() -> String {
    "Transcript".into()
}
fn d_status_field() -> String {
    "Status".into()
}
fn d_thread_field() -> String {
    "Thread".into()
}
fn d_8000() -> u64 {
    8_000
}
fn d_2() -> u32 {
    2
}
