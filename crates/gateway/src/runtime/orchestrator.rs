//! Session orchestrator.
//!
//! Owns the AI ⇄ HUMAN state machine.  A session starts in AI mode; a
//! hand-off flips it to HUMAN with no thread (pending), opens an agent
//! thread, and either records the thread id or rolls back to AI.  While
//! pending, customer submissions are rejected so nothing is routed to a
//! thread that does not exist yet.
//!
//! Every message append follows the same order:
//!
//! 1. reserve the session's transcript slot,
//! 2. push the message onto the session under the store's write lock,
//! 3. write the transcript line through the slot.
//!
//! Slots are FIFO per session, so the transcript order matches the
//! session order even when appends race.  Transcript failures are logged
//! and never surface to the caller.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use hd_channel::AgentChannel;
use hd_domain::chat::{
    validate_content, Message, RelayEntry, Sender, Session, SessionMode, SessionStatus,
};
use hd_domain::config::ChatConfig;
use hd_domain::error::{Error, Result};
use hd_domain::trace::TraceEvent;
use hd_sessions::{RecordStatus, SessionStore, TranscriptRecord, TranscriptWriter};

use super::responder::Responder;

const MAX_SESSION_ID_LEN: usize = 128;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outcomes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What happened after a customer message was accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Reply {
    /// The assistant answered; the answer is already in the session.
    Ai { message: Message },
    /// The message was posted to the agent thread.
    #[serde(rename_all = "camelCase")]
    Forwarded { thread_id: String },
    /// The downstream call failed.  The notice is shown to the customer
    /// but is not part of the conversation.
    Degraded { notice: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOutcome {
    pub customer: Message,
    pub reply: Reply,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Handoff {
    pub thread_id: String,
    pub session: Session,
}

enum Route {
    Ai(Vec<Message>),
    Agent(String),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Orchestrator {
    sessions: Arc<SessionStore>,
    transcripts: Arc<TranscriptWriter>,
    channel: Arc<dyn AgentChannel>,
    responder: Responder,
    chat: ChatConfig,
}

impl Orchestrator {
    pub fn new(
        sessions: Arc<SessionStore>,
        transcripts: Arc<TranscriptWriter>,
        channel: Arc<dyn AgentChannel>,
        responder: Responder,
        chat: ChatConfig,
    ) -> Self {
        Self {
            sessions,
            transcripts,
            channel,
            responder,
            chat,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn transcript_backend(&self) -> &'static str {
        self.transcripts.store().backend()
    }

    pub fn provider_id(&self) -> Option<&str> {
        self.responder.provider_id()
    }

    // ── lifecycle ────────────────────────────────────────────────────

    /// Return the session `requested_id`, creating it if needed.
    ///
    /// Returns `(session, is_new)`.  An existing session is returned
    /// untouched and nothing is written.  A new one starts `(AI, ACTIVE)`
    /// with a welcome message (or `initial_message`) as its first line.
    pub async fn start_session(
        &self,
        requested_id: Option<&str>,
        initial_message: Option<&str>,
    ) -> Result<(Session, bool)> {
        let session_id = match requested_id.map(str::trim).filter(|s| !s.is_empty()) {
            Some(id) => {
                check_session_id(id)?;
                id.to_owned()
            }
            None => uuid::Uuid::new_v4().to_string(),
        };

        if let Some(existing) = self.sessions.get(&session_id) {
            emit_started(&session_id, false);
            return Ok((existing, false));
        }

        let welcome_text = initial_message
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(self.chat.welcome_message.as_str());
        let welcome = Message::new(Sender::Ai, welcome_text);

        let slot = self.transcripts.reserve(&session_id).await?;
        let (session, is_new) = self
            .sessions
            .insert_if_absent(Session::new(&session_id, welcome.clone()));
        if is_new {
            self.persist(&session_id, "create", slot.create(&welcome))
                .await;
        }

        emit_started(&session_id, is_new);
        Ok((session, is_new))
    }

    /// Mark the session ENDED.  Ending an ended session is a no-op.
    pub async fn end_session(&self, session_id: &str) -> Result<Session> {
        self.snapshot(session_id)?;
        let slot = self.transcripts.reserve(session_id).await?;

        let (session, changed) = self.sessions.update(session_id, |s| {
            if !s.is_active() {
                return Ok((s.clone(), false));
            }
            s.status = SessionStatus::Ended;
            s.updated_at = Utc::now();
            Ok((s.clone(), true))
        })?;

        if changed {
            TraceEvent::SessionEnded {
                session_id: session_id.to_owned(),
                messages: session.messages.len(),
            }
            .emit();
            self.persist(
                session_id,
                "status",
                slot.set_status(RecordStatus::Ended, session.agent_thread_id.as_deref()),
            )
            .await;
        }
        Ok(session)
    }

    pub fn snapshot(&self, session_id: &str) -> Result<Session> {
        self.sessions
            .get(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_owned()))
    }

    /// The stored transcript record, straight from the backend.
    pub async fn transcript(&self, session_id: &str) -> Result<Option<TranscriptRecord>> {
        self.transcripts.store().fetch(session_id).await
    }

    /// Drop sessions idle for longer than `max_idle`.  Returns how many
    /// were removed.
    pub fn collect_idle(&self, max_idle: chrono::Duration) -> usize {
        let removed = self.sessions.collect_idle(max_idle, Utc::now());
        for id in &removed {
            self.transcripts.forget(id);
        }
        removed.len()
    }

    // ── customer path ────────────────────────────────────────────────

    /// Accept a customer message and route it by mode.
    ///
    /// Rejections (empty, too long, unknown session, ended session,
    /// pending hand-off) leave the session and the transcript untouched.
    /// Once accepted, the message stays appended whatever happens
    /// downstream.
    pub async fn submit_customer_message(
        &self,
        session_id: &str,
        text: &str,
    ) -> Result<SubmitOutcome> {
        let content = validate_content(text, self.chat.max_message_chars)?;
        accepts_customer(&self.snapshot(session_id)?)?;

        let slot = self.transcripts.reserve(session_id).await?;
        let customer = Message::new(Sender::Customer, content);
        let route = self.sessions.update(session_id, |s| {
            accepts_customer(s)?;
            s.push(customer.clone());
            Ok(match (s.mode, &s.agent_thread_id) {
                (SessionMode::Human, Some(thread)) => Route::Agent(thread.clone()),
                _ => Route::Ai(s.messages.clone()),
            })
        })?;
        emit_appended(session_id, &customer);
        self.persist(session_id, "append", slot.append(&customer))
            .await;

        let reply = match route {
            Route::Ai(history) => self.ai_reply(session_id, &history).await,
            Route::Agent(thread_id) => {
                self.forward(session_id, thread_id, &customer.content)
                    .await
            }
        };
        Ok(SubmitOutcome { customer, reply })
    }

    async fn ai_reply(&self, session_id: &str, history: &[Message]) -> Reply {
        let text = match self.responder.reply(history).await {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => {
                tracing::warn!(session_id, "assistant returned an empty reply");
                return self.degraded();
            }
            Err(e) => {
                tracing::warn!(session_id, error = %e, "assistant reply failed");
                return self.degraded();
            }
        };

        let message = Message::new(Sender::Ai, text);
        match self.append(session_id, message.clone()).await {
            Ok(()) => Reply::Ai { message },
            Err(e) => {
                tracing::warn!(session_id, error = %e, "could not record assistant reply");
                self.degraded()
            }
        }
    }

    async fn forward(&self, session_id: &str, thread_id: String, content: &str) -> Reply {
        match self.channel.post_customer_message(&thread_id, content).await {
            Ok(()) => Reply::Forwarded { thread_id },
            Err(e) => {
                tracing::warn!(session_id, thread_id = %thread_id, error = %e, "forward to agent thread failed");
                self.degraded()
            }
        }
    }

    fn degraded(&self) -> Reply {
        Reply::Degraded {
            notice: self.chat.apology_message.clone(),
        }
    }

    /// Append `message` with no precondition beyond the session existing.
    async fn append(&self, session_id: &str, message: Message) -> Result<()> {
        let slot = self.transcripts.reserve(session_id).await?;
        self.sessions.update(session_id, |s| {
            s.push(message.clone());
            Ok(())
        })?;
        emit_appended(session_id, &message);
        self.persist(session_id, "append", slot.append(&message))
            .await;
        Ok(())
    }

    // ── hand-off ─────────────────────────────────────────────────────

    /// Move an `(AI, ACTIVE)` session to a human agent.
    ///
    /// The mode flips to HUMAN before the channel call, which blocks
    /// concurrent hand-offs and customer submissions.  When the thread
    /// cannot be opened within the hand-off timeout the session is rolled
    /// back to AI and the downstream error is returned.
    pub async fn request_handoff(&self, session_id: &str) -> Result<Handoff> {
        let (summary, customer_messages) = self.sessions.update(session_id, |s| {
            if !s.is_active() {
                return Err(Error::InvalidState("session has ended".into()));
            }
            if s.mode != SessionMode::Ai {
                return Err(Error::InvalidState(match s.agent_thread_id {
                    Some(_) => "session is already with a human agent".into(),
                    None => "a hand-off is already in progress".into(),
                }));
            }
            s.mode = SessionMode::Human;
            s.agent_thread_id = None;
            s.updated_at = Utc::now();
            Ok((s.customer_summary(), s.customer_messages().count()))
        })?;

        TraceEvent::HandoffRequested {
            session_id: session_id.to_owned(),
            customer_messages,
        }
        .emit();

        let start = Instant::now();
        let timeout = Duration::from_millis(self.chat.handoff_timeout_ms);
        let opened = match tokio::time::timeout(
            timeout,
            self.channel.open_thread(&summary, session_id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "agent channel did not answer within {} ms",
                timeout.as_millis()
            ))),
        };

        let thread_id = match opened {
            Ok(thread_id) => thread_id,
            Err(e) => {
                self.roll_back(session_id, &e);
                return Err(e);
            }
        };

        let session = self.sessions.update(session_id, |s| {
            s.agent_thread_id = Some(thread_id.clone());
            s.updated_at = Utc::now();
            Ok(s.clone())
        })?;

        TraceEvent::HandoffCompleted {
            session_id: session_id.to_owned(),
            thread_id: thread_id.clone(),
            duration_ms: start.elapsed().as_millis() as u64,
        }
        .emit();

        let slot = self.transcripts.reserve(session_id).await?;
        self.persist(
            session_id,
            "status",
            slot.set_status(RecordStatus::Human, Some(&thread_id)),
        )
        .await;

        Ok(Handoff { thread_id, session })
    }

    fn roll_back(&self, session_id: &str, cause: &Error) {
        let rolled_back = self.sessions.update(session_id, |s| {
            if s.mode == SessionMode::Human && s.agent_thread_id.is_none() {
                s.mode = SessionMode::Ai;
                s.updated_at = Utc::now();
            }
            Ok(())
        });
        if let Err(e) = rolled_back {
            tracing::warn!(session_id, error = %e, "hand-off rollback found no session");
        }

        tracing::warn!(session_id, error = %cause, "hand-off failed, back to assistant");
        TraceEvent::HandoffRolledBack {
            session_id: session_id.to_owned(),
            reason: cause.to_string(),
        }
        .emit();
    }

    // ── agent path ───────────────────────────────────────────────────

    /// Append an agent reply delivered through the relay buffer.
    ///
    /// The session must be HUMAN with an open thread, and `entry` must
    /// belong to that thread.  Submitting the same relay id again returns
    /// the message already recorded.
    pub async fn ingest_agent_reply(&self, session_id: &str, entry: &RelayEntry) -> Result<Message> {
        if entry.content.trim().is_empty() {
            return Err(Error::Validation("agent reply must not be empty".into()));
        }
        accepts_agent(&self.snapshot(session_id)?, &entry.thread_id)?;

        let slot = self.transcripts.reserve(session_id).await?;
        let message = Message::from_relay(entry);
        // A widget retrying after a lost response gets the recorded copy.
        let recorded = self.sessions.update(session_id, |s| {
            accepts_agent(s, &entry.thread_id)?;
            if let Some(known) = s.messages.iter().find(|m| m.id == message.id) {
                return Ok(Some(known.clone()));
            }
            s.push(message.clone());
            Ok(None)
        })?;
        if let Some(known) = recorded {
            return Ok(known);
        }
        emit_appended(session_id, &message);
        self.persist(session_id, "append", slot.append(&message))
            .await;
        Ok(message)
    }

    // ── helpers ──────────────────────────────────────────────────────

    async fn persist(&self, session_id: &str, op: &str, write: impl Future<Output = Result<()>>) {
        if let Err(e) = write.await {
            tracing::warn!(session_id, op, error = %e, "transcript write failed");
        }
    }
}

fn accepts_customer(s: &Session) -> Result<()> {
    if !s.is_active() {
        return Err(Error::InvalidState("session has ended".into()));
    }
    if s.mode == SessionMode::Human && s.agent_thread_id.is_none() {
        return Err(Error::InvalidState("a hand-off is in progress".into()));
    }
    Ok(())
}

fn accepts_agent(s: &Session, thread_id: &str) -> Result<()> {
    if !s.is_active() {
        return Err(Error::InvalidState("session has ended".into()));
    }
    if s.mode != SessionMode::Human {
        return Err(Error::InvalidState("session is not with a human agent".into()));
    }
    if s.agent_thread_id.as_deref() != Some(thread_id) {
        return Err(Error::InvalidState("thread does not belong to this session".into()));
    }
    Ok(())
}

fn check_session_id(id: &str) -> Result<()> {
    if id.len() > MAX_SESSION_ID_LEN {
        return Err(Error::Validation(format!(
            "session id longer than {MAX_SESSION_ID_LEN} bytes"
        )));
    }
    if id.chars().any(char::is_control) {
        return Err(Error::Validation("session id contains control characters".into()));
    }
    Ok(())
}

fn emit_started(session_id: &str, is_new: bool) {
    TraceEvent::SessionStarted {
        session_id: session_id.to_owned(),
        is_new,
    }
    .emit();
}

fn emit_appended(session_id: &str, message: &Message) {
    TraceEvent::MessageAppended {
        session_id: session_id.to_owned(),
        message_id: message.id.clone(),
        sender: message.sender.as_str().to_owned(),
        chars: message.content.chars().count(),
    }
    .emit();
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hd_domain::config::LlmConfig;
    use hd_providers::{ChatRequest, ChatResponse, LlmProvider};
    use hd_sessions::{parse_transcript, MemoryTranscriptStore, TranscriptStore};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // ── fakes ────────────────────────────────────────────────────────

    #[derive(Default)]
    struct FakeChannel {
        fail_open: bool,
        fail_post: bool,
        open_delay: Option<Duration>,
        opened: Mutex<Vec<(String, String)>>,
        posted: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl AgentChannel for FakeChannel {
        async fn open_thread(&self, summary: &str, session_id: &str) -> Result<String> {
            if let Some(delay) = self.open_delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_open {
                return Err(Error::Provider {
                    provider: "slack".into(),
                    message: "channel_not_found".into(),
                });
            }
            self.opened
                .lock()
                .push((summary.to_owned(), session_id.to_owned()));
            Ok("1700000000.000100".into())
        }

        async fn post_customer_message(&self, thread_id: &str, text: &str) -> Result<()> {
            if self.fail_post {
                return Err(Error::Http("connection reset".into()));
            }
            self.posted
                .lock()
                .push((thread_id.to_owned(), text.to_owned()));
            Ok(())
        }
    }

    struct FakeProvider {
        answer: Option<&'static str>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmProvider for FakeProvider {
        async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.answer {
                Some(text) => Ok(ChatResponse {
                    content: format!("{text} ({} msgs)", req.messages.len()),
                    usage: None,
                    model: "fake".into(),
                    finish_reason: Some("stop".into()),
                }),
                None => Err(Error::Provider {
                    provider: "fake".into(),
                    message: "HTTP 500 - boom".into(),
                }),
            }
        }

        fn provider_id(&self) -> &str {
            "fake"
        }
    }

    struct Harness {
        orch: Arc<Orchestrator>,
        channel: Arc<FakeChannel>,
        provider: Arc<FakeProvider>,
        store: Arc<MemoryTranscriptStore>,
    }

    /// Transcript backend that is down for every write.
    struct FailingStore;

    #[async_trait]
    impl TranscriptStore for FailingStore {
        fn backend(&self) -> &'static str {
            "failing"
        }

        async fn create(&self, _session_id: &str, _first_line: &str) -> Result<()> {
            Err(Error::TranscriptStore("HTTP 503 - unavailable".into()))
        }

        async fn fetch(&self, _session_id: &str) -> Result<Option<TranscriptRecord>> {
            Ok(None)
        }

        async fn append(&self, _session_id: &str, _line: &str) -> Result<()> {
            Err(Error::TranscriptStore("HTTP 503 - unavailable".into()))
        }

        async fn set_status(
            &self,
            _session_id: &str,
            _status: RecordStatus,
            _thread_id: Option<&str>,
        ) -> Result<()> {
            Err(Error::TranscriptStore("HTTP 503 - unavailable".into()))
        }
    }

    fn harness_with(channel: FakeChannel, answer: Option<&'static str>, chat: ChatConfig) -> Harness {
        let store = Arc::new(MemoryTranscriptStore::new());
        let (orch, channel, provider) =
            orchestrator_on(store.clone(), channel, answer, chat);
        Harness {
            orch,
            channel,
            provider,
            store,
        }
    }

    fn orchestrator_on(
        store: Arc<dyn TranscriptStore>,
        channel: FakeChannel,
        answer: Option<&'static str>,
        chat: ChatConfig,
    ) -> (Arc<Orchestrator>, Arc<FakeChannel>, Arc<FakeProvider>) {
        let channel = Arc::new(channel);
        let provider = Arc::new(FakeProvider {
            answer,
            calls: AtomicUsize::new(0),
        });
        let writer = Arc::new(TranscriptWriter::new(store));
        let responder = Responder::new(
            Some(provider.clone() as Arc<dyn LlmProvider>),
            &LlmConfig::default(),
        );
        let orch = Arc::new(Orchestrator::new(
            Arc::new(SessionStore::new()),
            writer,
            channel.clone(),
            responder,
            chat,
        ));
        (orch, channel, provider)
    }

    fn harness() -> Harness {
        harness_with(FakeChannel::default(), Some("We scan slides"), ChatConfig::default())
    }

    fn relay_entry(id: u64, thread_id: &str, text: &str) -> RelayEntry {
        RelayEntry {
            id,
            thread_id: thread_id.into(),
            content: text.into(),
            timestamp: Utc::now(),
            is_from_agent: true,
            sender: Some("U0AGENT".into()),
            session_id: None,
        }
    }

    async fn handed_off(h: &Harness) -> String {
        h.orch.start_session(Some("s1"), None).await.unwrap();
        h.orch
            .submit_customer_message("s1", "I have 200 slides")
            .await
            .unwrap();
        h.orch.request_handoff("s1").await.unwrap().thread_id
    }

    // ── start / end ──────────────────────────────────────────────────

    #[tokio::test]
    async fn new_session_is_ai_active_with_welcome() {
        let h = harness();
        let (s, is_new) = h.orch.start_session(Some("s1"), None).await.unwrap();
        assert!(is_new);
        assert_eq!(s.mode, SessionMode::Ai);
        assert_eq!(s.status, SessionStatus::Active);
        assert_eq!(s.messages.len(), 1);
        assert_eq!(s.messages[0].sender, Sender::Ai);
        assert_eq!(h.store.lines("s1").len(), 1);
    }

    #[tokio::test]
    async fn starting_an_existing_session_changes_nothing() {
        let h = harness();
        h.orch.start_session(Some("s1"), None).await.unwrap();
        h.orch.submit_customer_message("s1", "hello").await.unwrap();

        let (s, is_new) = h
            .orch
            .start_session(Some("s1"), Some("different welcome"))
            .await
            .unwrap();
        assert!(!is_new);
        assert_eq!(s.messages.len(), 3);
        assert_eq!(h.store.lines("s1").len(), 3);
    }

    #[tokio::test]
    async fn initial_message_replaces_welcome() {
        let h = harness();
        let (s, _) = h
            .orch
            .start_session(None, Some("Hello from the pricing page"))
            .await
            .unwrap();
        assert_eq!(s.messages[0].content, "Hello from the pricing page");
        assert!(!s.session_id.is_empty());
    }

    #[tokio::test]
    async fn oversized_session_id_is_rejected() {
        let h = harness();
        let id = "x".repeat(MAX_SESSION_ID_LEN + 1);
        let err = h.orch.start_session(Some(&id), None).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn end_session_blocks_further_submissions_and_handoffs() {
        let h = harness();
        h.orch.start_session(Some("s1"), None).await.unwrap();
        let ended = h.orch.end_session("s1").await.unwrap();
        assert_eq!(ended.status, SessionStatus::Ended);

        let err = h.orch.submit_customer_message("s1", "hi").await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        let err = h.orch.request_handoff("s1").await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));

        let record = h.store.fetch("s1").await.unwrap().unwrap();
        assert_eq!(record.status.as_deref(), Some("Ended"));
        // Ending twice is harmless.
        h.orch.end_session("s1").await.unwrap();
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let h = harness();
        assert!(matches!(
            h.orch.submit_customer_message("nope", "hi").await.unwrap_err(),
            Error::SessionNotFound(_)
        ));
        assert!(matches!(
            h.orch.request_handoff("nope").await.unwrap_err(),
            Error::SessionNotFound(_)
        ));
        assert!(matches!(
            h.orch.end_session("nope").await.unwrap_err(),
            Error::SessionNotFound(_)
        ));
    }

    // ── AI path ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn ai_mode_appends_customer_then_assistant() {
        let h = harness();
        h.orch.start_session(Some("s1"), None).await.unwrap();
        let out = h
            .orch
            .submit_customer_message("s1", "  How much for slides?  ")
            .await
            .unwrap();

        assert_eq!(out.customer.content, "How much for slides?");
        let Reply::Ai { message } = out.reply else {
            panic!("expected assistant reply");
        };
        assert!(message.content.starts_with("We scan slides"));

        let s = h.orch.snapshot("s1").unwrap();
        let senders: Vec<_> = s.messages.iter().map(|m| m.sender).collect();
        assert_eq!(senders, [Sender::Ai, Sender::Customer, Sender::Ai]);

        let lines = parse_transcript(&h.store.lines("s1").join("\n"));
        let contents: Vec<_> = lines.iter().map(|l| l.content.as_str()).collect();
        let expected: Vec<_> = s.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, expected);
    }

    #[tokio::test]
    async fn provider_failure_keeps_customer_message_and_degrades() {
        let h = harness_with(FakeChannel::default(), None, ChatConfig::default());
        h.orch.start_session(Some("s1"), None).await.unwrap();
        let out = h.orch.submit_customer_message("s1", "hello").await.unwrap();

        match out.reply {
            Reply::Degraded { notice } => assert_eq!(notice, ChatConfig::default().apology_message),
            other => panic!("expected degraded reply, got {other:?}"),
        }
        let s = h.orch.snapshot("s1").unwrap();
        assert_eq!(s.customer_messages().count(), 1);
        assert_eq!(s.messages.len(), 2);
    }

    #[tokio::test]
    async fn rejected_messages_leave_no_trace() {
        let h = harness();
        h.orch.start_session(Some("s1"), None).await.unwrap();

        let too_long = "a".repeat(1001);
        for text in ["", "   ", too_long.as_str()] {
            let err = h.orch.submit_customer_message("s1", text).await.unwrap_err();
            assert!(matches!(err, Error::Validation(_)));
        }
        assert_eq!(h.orch.snapshot("s1").unwrap().messages.len(), 1);
        assert_eq!(h.store.lines("s1").len(), 1);
        assert_eq!(h.provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn message_at_length_limit_is_accepted() {
        let h = harness();
        h.orch.start_session(Some("s1"), None).await.unwrap();
        let text = "a".repeat(1000);
        h.orch.submit_customer_message("s1", &text).await.unwrap();
    }

    // ── hand-off ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn handoff_opens_thread_with_customer_summary() {
        let h = harness();
        h.orch.start_session(Some("s1"), None).await.unwrap();
        h.orch.submit_customer_message("s1", "I have 200 slides").await.unwrap();
        h.orch.submit_customer_message("s1", "And some negatives").await.unwrap();

        let handoff = h.orch.request_handoff("s1").await.unwrap();
        assert_eq!(handoff.thread_id, "1700000000.000100");
        assert_eq!(handoff.session.mode, SessionMode::Human);
        assert_eq!(
            handoff.session.agent_thread_id.as_deref(),
            Some("1700000000.000100")
        );

        let opened = h.channel.opened.lock().clone();
        assert_eq!(
            opened,
            [(
                "I have 200 slides\n\nAnd some negatives".to_owned(),
                "s1".to_owned()
            )]
        );

        let record = h.store.fetch("s1").await.unwrap().unwrap();
        assert_eq!(record.status.as_deref(), Some("Human"));
        assert_eq!(record.thread_id.as_deref(), Some("1700000000.000100"));
    }

    #[tokio::test]
    async fn failed_handoff_rolls_back_to_ai() {
        let channel = FakeChannel {
            fail_open: true,
            ..Default::default()
        };
        let h = harness_with(channel, Some("ok"), ChatConfig::default());
        h.orch.start_session(Some("s1"), None).await.unwrap();

        let err = h.orch.request_handoff("s1").await.unwrap_err();
        assert!(err.is_downstream());

        let s = h.orch.snapshot("s1").unwrap();
        assert_eq!(s.mode, SessionMode::Ai);
        assert!(s.agent_thread_id.is_none());

        // The session keeps working with the assistant.
        let out = h.orch.submit_customer_message("s1", "still there?").await.unwrap();
        assert!(matches!(out.reply, Reply::Ai { .. }));
    }

    #[tokio::test]
    async fn handoff_timeout_rolls_back() {
        let channel = FakeChannel {
            open_delay: Some(Duration::from_millis(200)),
            ..Default::default()
        };
        let chat = ChatConfig {
            handoff_timeout_ms: 20,
            ..ChatConfig::default()
        };
        let h = harness_with(channel, Some("ok"), chat);
        h.orch.start_session(Some("s1"), None).await.unwrap();

        let err = h.orch.request_handoff("s1").await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(h.orch.snapshot("s1").unwrap().mode, SessionMode::Ai);
    }

    #[tokio::test]
    async fn second_handoff_is_rejected() {
        let h = harness();
        handed_off(&h).await;
        let err = h.orch.request_handoff("s1").await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        assert_eq!(h.channel.opened.lock().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_handoffs_open_one_thread() {
        let channel = FakeChannel {
            open_delay: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let h = harness_with(channel, Some("ok"), ChatConfig::default());
        h.orch.start_session(Some("s1"), None).await.unwrap();

        let (a, b) = tokio::join!(h.orch.request_handoff("s1"), h.orch.request_handoff("s1"));
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        assert_eq!(h.channel.opened.lock().len(), 1);
    }

    #[tokio::test]
    async fn submission_during_pending_handoff_is_rejected() {
        let channel = FakeChannel {
            open_delay: Some(Duration::from_millis(100)),
            ..Default::default()
        };
        let h = harness_with(channel, Some("ok"), ChatConfig::default());
        h.orch.start_session(Some("s1"), None).await.unwrap();

        let handoff = h.orch.request_handoff("s1");
        let submit = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            h.orch.submit_customer_message("s1", "are you there?").await
        };
        let (handoff, submit) = tokio::join!(handoff, submit);

        handoff.unwrap();
        assert!(matches!(submit.unwrap_err(), Error::InvalidState(_)));
        assert_eq!(h.orch.snapshot("s1").unwrap().messages.len(), 1);
        assert!(h.channel.posted.lock().is_empty());
    }

    // ── human path ───────────────────────────────────────────────────

    #[tokio::test]
    async fn human_mode_forwards_without_assistant() {
        let h = harness();
        let thread = handed_off(&h).await;
        let calls_before = h.provider.calls.load(Ordering::SeqCst);

        let out = h
            .orch
            .submit_customer_message("s1", "Can you do 8mm film?")
            .await
            .unwrap();
        match out.reply {
            Reply::Forwarded { thread_id } => assert_eq!(thread_id, thread),
            other => panic!("expected forward, got {other:?}"),
        }
        assert_eq!(h.provider.calls.load(Ordering::SeqCst), calls_before);
        assert_eq!(
            h.channel.posted.lock().clone(),
            [(thread, "Can you do 8mm film?".to_owned())]
        );
    }

    #[tokio::test]
    async fn forward_failure_still_records_customer_message() {
        let channel = FakeChannel {
            fail_post: true,
            ..Default::default()
        };
        let h = harness_with(channel, Some("ok"), ChatConfig::default());
        handed_off(&h).await;
        let before = h.orch.snapshot("s1").unwrap().messages.len();

        let out = h.orch.submit_customer_message("s1", "hello?").await.unwrap();
        assert!(matches!(out.reply, Reply::Degraded { .. }));

        let s = h.orch.snapshot("s1").unwrap();
        assert_eq!(s.messages.len(), before + 1);
        assert_eq!(s.messages.last().unwrap().sender, Sender::Customer);
    }

    #[tokio::test]
    async fn agent_reply_is_appended_with_relay_id() {
        let h = harness();
        let thread = handed_off(&h).await;

        let msg = h
            .orch
            .ingest_agent_reply("s1", &relay_entry(7, &thread, "Yes, we do 8mm"))
            .await
            .unwrap();
        assert_eq!(msg.id, "relay-7");
        assert_eq!(msg.sender, Sender::Agent);

        let last = h.store.lines("s1").last().cloned().unwrap();
        assert!(last.contains("Human Agent: Yes, we do 8mm"));
    }

    #[tokio::test]
    async fn agent_reply_for_other_thread_is_rejected() {
        let h = harness();
        handed_off(&h).await;
        let err = h
            .orch
            .ingest_agent_reply("s1", &relay_entry(1, "1700000999.000000", "wrong thread"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn agent_reply_in_ai_mode_is_rejected() {
        let h = harness();
        h.orch.start_session(Some("s1"), None).await.unwrap();
        let err = h
            .orch
            .ingest_agent_reply("s1", &relay_entry(1, "1700000000.000100", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn repeated_relay_id_returns_the_recorded_reply() {
        let h = harness();
        let thread = handed_off(&h).await;
        let entry = relay_entry(7, &thread, "Yes, we do 8mm");

        let first = h.orch.ingest_agent_reply("s1", &entry).await.unwrap();
        let again = h.orch.ingest_agent_reply("s1", &entry).await.unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(first.timestamp, again.timestamp);

        let s = h.orch.snapshot("s1").unwrap();
        assert_eq!(s.messages.iter().filter(|m| m.id == "relay-7").count(), 1);
        let agent_lines = h
            .store
            .lines("s1")
            .iter()
            .filter(|l| l.contains("Human Agent:"))
            .count();
        assert_eq!(agent_lines, 1);
    }

    // ── transcript outage ────────────────────────────────────────────

    #[tokio::test]
    async fn transcript_outage_does_not_fail_the_conversation() {
        let (orch, channel, provider) = orchestrator_on(
            Arc::new(FailingStore),
            FakeChannel::default(),
            Some("We scan slides"),
            ChatConfig::default(),
        );

        let (s, is_new) = orch.start_session(Some("s1"), None).await.unwrap();
        assert!(is_new);
        assert_eq!(s.messages.len(), 1);

        let out = orch
            .submit_customer_message("s1", "I have 200 slides")
            .await
            .unwrap();
        assert!(matches!(out.reply, Reply::Ai { .. }));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        let handoff = orch.request_handoff("s1").await.unwrap();
        assert_eq!(channel.opened.lock().len(), 1);

        let s = orch.snapshot("s1").unwrap();
        assert_eq!(s.mode, SessionMode::Human);
        assert_eq!(s.status, SessionStatus::Active);
        assert_eq!(s.agent_thread_id.as_deref(), Some(handoff.thread_id.as_str()));
        let senders: Vec<_> = s.messages.iter().map(|m| m.sender).collect();
        assert_eq!(senders, [Sender::Ai, Sender::Customer, Sender::Ai]);
    }

    #[tokio::test]
    async fn transcript_outage_still_records_agent_replies_in_session() {
        let (orch, _channel, _provider) = orchestrator_on(
            Arc::new(FailingStore),
            FakeChannel::default(),
            Some("We scan slides"),
            ChatConfig::default(),
        );
        orch.start_session(Some("s1"), None).await.unwrap();
        let thread = orch.request_handoff("s1").await.unwrap().thread_id;

        let msg = orch
            .ingest_agent_reply("s1", &relay_entry(3, &thread, "Hello, I'm here"))
            .await
            .unwrap();
        assert_eq!(msg.id, "relay-3");
        assert_eq!(orch.snapshot("s1").unwrap().messages.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_keep_transcript_order() {
        let h = harness_with(FakeChannel::default(), None, ChatConfig::default());
        h.orch.start_session(Some("s1"), None).await.unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..10 {
            let orch = h.orch.clone();
            tasks.spawn(async move {
                orch.submit_customer_message("s1", &format!("msg {i}")).await
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap().unwrap();
        }

        let s = h.orch.snapshot("s1").unwrap();
        let in_session: Vec<_> = s.messages.iter().map(|m| m.content.clone()).collect();
        let in_transcript: Vec<_> = parse_transcript(&h.store.lines("s1").join("\n"))
            .into_iter()
            .map(|l| l.content)
            .collect();
        assert_eq!(in_session, in_transcript);
    }

    #[tokio::test]
    async fn collect_idle_drops_old_sessions() {
        let h = harness();
        h.orch.start_session(Some("s1"), None).await.unwrap();
        assert_eq!(h.orch.collect_idle(chrono::Duration::hours(1)), 0);
        assert_eq!(h.orch.collect_idle(chrono::Duration::seconds(-1)), 1);
        assert!(h.orch.sessions().is_empty());
    }
}
