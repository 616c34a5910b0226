//! Durable transcript records.
//!
//! One record per session, keyed by session id, holding the newline-joined
//! transcript text plus the session's status and agent thread.  The REST
//! backend talks to an Airtable-style table API; the in-memory backend is
//! used for local development and tests.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};

use hd_domain::chat::{Session, SessionMode};
use hd_domain::config::{TranscriptConfig, TranscriptFields};
use hd_domain::error::{Error, Result};
use hd_domain::trace::TraceEvent;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Record types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Value written to the record's status field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordStatus {
    #[serde(rename = "AI")]
    Ai,
    #[serde(rename = "Human")]
    Human,
    #[serde(rename = "Ended")]
    Ended,
}

impl RecordStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordStatus::Ai => "AI",
            RecordStatus::Human => "Human",
            RecordStatus::Ended => "Ended",
        }
    }

    pub fn of(session: &Session) -> Self {
        if !session.is_active() {
            return RecordStatus::Ended;
        }
        match session.mode {
            SessionMode::Ai => RecordStatus::Ai,
            SessionMode::Human => RecordStatus::Human,
        }
    }
}

/// A stored transcript record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptRecord {
    pub session_id: String,
    pub transcript: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Abstraction over the transcript record store.
///
/// Callers are responsible for ordering: concurrent `append`s for the same
/// session may interleave unless serialized (see `TranscriptWriter`).
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    /// Short backend name for logs and the health endpoint.
    fn backend(&self) -> &'static str;

    /// Create the session's record with its first line.
    async fn create(&self, session_id: &str, first_line: &str) -> Result<()>;

    /// Fetch the session's record, if any.
    async fn fetch(&self, session_id: &str) -> Result<Option<TranscriptRecord>>;

    /// Append one line.  Creates the record when it does not exist yet so a
    /// lost `create` does not lose every later line too.
    async fn append(&self, session_id: &str, line: &str) -> Result<()>;

    /// Update the status field, and the thread field when `thread_id` is set.
    async fn set_status(
        &self,
        session_id: &str,
        status: RecordStatus,
        thread_id: Option<&str>,
    ) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory backend
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct MemoryTranscriptStore {
    records: RwLock<HashMap<String, TranscriptRecord>>,
}

impl MemoryTranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transcript lines for a session (empty when unknown).
    pub fn lines(&self, session_id: &str) -> Vec<String> {
        self.records
            .read()
            .get(session_id)
            .map(|r| r.transcript.lines().map(str::to_owned).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TranscriptStore for MemoryTranscriptStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn create(&self, session_id: &str, first_line: &str) -> Result<()> {
        let mut records = self.records.write();
        records
            .entry(session_id.to_owned())
            .or_insert_with(|| TranscriptRecord {
                session_id: session_id.to_owned(),
                transcript: first_line.to_owned(),
                status: Some(RecordStatus::Ai.as_str().to_owned()),
                thread_id: None,
            });
        Ok(())
    }

    async fn fetch(&self, session_id: &str) -> Result<Option<TranscriptRecord>> {
        Ok(self.records.read().get(session_id).cloned())
    }

    async fn append(&self, session_id: &str, line: &str) -> Result<()> {
        let mut records = self.records.write();
        let record = records
            .entry(session_id.to_owned())
            .or_insert_with(|| TranscriptRecord {
                session_id: session_id.to_owned(),
                transcript: String::new(),
                status: None,
                thread_id: None,
            });
        record.transcript = join_line(&record.transcript, line);
        Ok(())
    }

    async fn set_status(
        &self,
        session_id: &str,
        status: RecordStatus,
        thread_id: Option<&str>,
    ) -> Result<()> {
        let mut records = self.records.write();
        let record = records
            .get_mut(session_id)
            .ok_or_else(|| Error::TranscriptStore(format!("no record for {session_id}")))?;
        record.status = Some(status.as_str().to_owned());
        if let Some(t) = thread_id {
            record.thread_id = Some(t.to_owned());
        }
        Ok(())
    }
}

fn join_line(existing: &str, line: &str) -> String {
    if existing.is_empty() {
        line.to_owned()
    } else {
        format!("{existing}\n{line}")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// REST backend (Airtable-style)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// REST client for an Airtable-style table.
///
/// Records are located with a `filterByFormula` lookup on the session
/// field and updated with `PATCH`.  Transient (5xx / timeout) failures are
/// retried with exponential back-off.
#[derive(Debug, Clone)]
pub struct RestTranscriptStore {
    http: Client,
    table_url: String,
    api_key: String,
    fields: TranscriptFields,
    max_retries: u32,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    records: Vec<RawRecord>,
}

#[derive(Debug, Deserialize)]
struct RawRecord {
    id: String,
    #[serde(default)]
    fields: serde_json::Map<String, serde_json::Value>,
}

impl RestTranscriptStore {
    pub fn new(cfg: &TranscriptConfig, api_key: String) -> Result<Self> {
        if cfg.base_id.is_empty() || cfg.table.is_empty() {
            return Err(Error::Config(
                "transcript.base_id and transcript.table are required".into(),
            ));
        }
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        let table_url = format!(
            "{}/{}/{}",
            cfg.base_url.trim_end_matches('/'),
            cfg.base_id,
            urlencoding::encode(&cfg.table)
        );

        Ok(Self {
            http,
            table_url,
            api_key,
            fields: cfg.fields.clone(),
            max_retries: cfg.max_retries,
        })
    }

    fn record_url(&self, record_id: &str) -> String {
        format!("{}/{}", self.table_url, record_id)
    }

    // ── retry engine ─────────────────────────────────────────────────

    /// Execute a request with retry + exponential back-off.
    ///
    /// * Retries on 5xx, 429 and transport errors.
    /// * Does **not** retry on other 4xx.
    /// * Emits a `TraceEvent::TranscriptStoreCall` after every attempt.
    async fn execute_with_retry(
        &self,
        endpoint: &str,
        build_request: impl Fn() -> RequestBuilder,
    ) -> Result<Response> {
        let mut last_err: Option<Error> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = Duration::from_millis(100 * 2u64.pow(attempt - 1));
                tokio::time::sleep(backoff).await;
            }

            let start = Instant::now();
            let rb = build_request().bearer_auth(&self.api_key);
            let result = rb.send().await;
            let duration_ms = start.elapsed().as_millis() as u64;

            match result {
                Ok(resp) => {
                    let status = resp.status();
                    TraceEvent::TranscriptStoreCall {
                        endpoint: endpoint.to_owned(),
                        status: status.as_u16(),
                        duration_ms,
                    }
                    .emit();

                    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                        let body = resp.text().await.unwrap_or_default();
                        last_err = Some(Error::TranscriptStore(format!(
                            "{endpoint} returned {status}: {body}"
                        )));
                        continue;
                    }

                    if status.is_client_error() {
                        let body = resp.text().await.unwrap_or_default();
                        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                            return Err(Error::Auth(format!(
                                "{endpoint} auth failed ({status}): {body}"
                            )));
                        }
                        return Err(Error::TranscriptStore(format!(
                            "{endpoint} returned {status}: {body}"
                        )));
                    }

                    return Ok(resp);
                }
                Err(e) => {
                    TraceEvent::TranscriptStoreCall {
                        endpoint: endpoint.to_owned(),
                        status: e.status().map(|s| s.as_u16()).unwrap_or(0),
                        duration_ms,
                    }
                    .emit();
                    last_err = Some(from_reqwest(e));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            Error::TranscriptStore(format!("{endpoint}: all retries exhausted"))
        }))
    }

    // ── record helpers ───────────────────────────────────────────────

    async fn find(&self, session_id: &str) -> Result<Option<RawRecord>> {
        let formula = format!(
            "{{{}}}='{}'",
            self.fields.session,
            session_id.replace('\\', "\\\\").replace('\'', "\\'")
        );
        let resp = self
            .execute_with_retry("GET records", || {
                self.http
                    .get(&self.table_url)
                    .query(&[("filterByFormula", formula.as_str()), ("maxRecords", "1")])
            })
            .await?;

        let body = resp.text().await.map_err(from_reqwest)?;
        let list: ListResponse = serde_json::from_str(&body).map_err(|e| {
            Error::TranscriptStore(format!("failed to parse record list: {e}: {body}"))
        })?;
        Ok(list.records.into_iter().next())
    }

    async fn insert(&self, fields: serde_json::Value) -> Result<()> {
        let body = serde_json::json!({ "fields": fields, "typecast": true });
        self.execute_with_retry("POST records", || {
            self.http.post(&self.table_url).json(&body)
        })
        .await?;
        Ok(())
    }

    async fn patch(&self, record_id: &str, fields: serde_json::Value) -> Result<()> {
        let url = self.record_url(record_id);
        let body = serde_json::json!({ "fields": fields, "typecast": true });
        self.execute_with_retry("PATCH record", || self.http.patch(&url).json(&body))
            .await?;
        Ok(())
    }

    fn to_record(&self, session_id: &str, raw: &RawRecord) -> TranscriptRecord {
        let text = |name: &str| {
            raw.fields
                .get(name)
                .and_then(|v| v.as_str())
                .map(str::to_owned)
        };
        TranscriptRecord {
            session_id: session_id.to_owned(),
            transcript: text(&self.fields.transcript).unwrap_or_default(),
            status: text(&self.fields.status),
            thread_id: text(&self.fields.thread),
        }
    }
}

#[async_trait]
impl TranscriptStore for RestTranscriptStore {
    fn backend(&self) -> &'static str {
        "airtable"
    }

    async fn create(&self, session_id: &str, first_line: &str) -> Result<()> {
        let mut fields = serde_json::Map::new();
        fields.insert(self.fields.session.clone(), session_id.into());
        fields.insert(self.fields.transcript.clone(), first_line.into());
        fields.insert(self.fields.status.clone(), RecordStatus::Ai.as_str().into());
        self.insert(fields.into()).await
    }

    async fn fetch(&self, session_id: &str) -> Result<Option<TranscriptRecord>> {
        Ok(self
            .find(session_id)
            .await?
            .map(|raw| self.to_record(session_id, &raw)))
    }

    async fn append(&self, session_id: &str, line: &str) -> Result<()> {
        match self.find(session_id).await? {
            Some(raw) => {
                let existing = self.to_record(session_id, &raw).transcript;
                let mut fields = serde_json::Map::new();
                fields.insert(
                    self.fields.transcript.clone(),
                    join_line(&existing, line).into(),
                );
                self.patch(&raw.id, fields.into()).await
            }
            None => {
                tracing::debug!(session_id, "transcript record missing, creating on append");
                let mut fields = serde_json::Map::new();
                fields.insert(self.fields.session.clone(), session_id.into());
                fields.insert(self.fields.transcript.clone(), line.into());
                self.insert(fields.into()).await
            }
        }
    }

    async fn set_status(
        &self,
        session_id: &str,
        status: RecordStatus,
        thread_id: Option<&str>,
    ) -> Result<()> {
        let raw = self
            .find(session_id)
            .await?
            .ok_or_else(|| Error::TranscriptStore(format!("no record for {session_id}")))?;
        let mut fields = serde_json::Map::new();
        fields.insert(self.fields.status.clone(), status.as_str().into());
        if let Some(t) = thread_id {
            fields.insert(self.fields.thread.clone(), t.into());
        }
        self.patch(&raw.id, fields.into()).await
    }
}

/// Convert a `reqwest::Error` into a domain `Error`.
fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
