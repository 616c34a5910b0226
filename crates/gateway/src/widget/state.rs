//! Widget state machine.
//!
//! Pure and synchronous: the REPL and the poll loop feed it results from
//! the gateway and ask it what to do next.  Nothing here performs I/O.

use std::collections::HashSet;

use hd_domain::chat::{relay_message_id, Message, RelayEntry, Session, SessionMode};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Poll cursor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Forward-only relay cursor with id-based deduplication.
///
/// The cursor only moves past entries the caller has finished with, so an
/// entry whose ingest failed is fetched again on the next tick.  Ids
/// already seen are filtered out, which matters after a cursor reset,
/// when the buffer hands back everything it still retains.
#[derive(Debug, Default, Clone)]
pub struct PollCursor {
    last_seen: Option<u64>,
    seen: HashSet<u64>,
}

impl PollCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_seen(&self) -> Option<u64> {
        self.last_seen
    }

    /// Mark `id` as delivered without moving the cursor.
    pub fn mark_seen(&mut self, id: u64) {
        self.seen.insert(id);
    }

    pub fn is_seen(&self, id: u64) -> bool {
        self.seen.contains(&id)
    }

    /// Move the cursor to `id`.  Never moves backwards.
    pub fn advance(&mut self, id: u64) {
        self.last_seen = Some(self.last_seen.map_or(id, |last| last.max(id)));
    }

    /// Forget the position but keep the seen set.
    pub fn reset(&mut self) {
        self.last_seen = None;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Widget
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No session yet.
    Closed,
    /// Talking to the assistant.
    Assistant,
    /// Hand-off requested; waiting for the gateway to answer.
    HandingOff,
    /// Talking to a human agent in `thread_id`.
    Agent,
    /// Session ended; nothing more can be sent.
    Ended,
}

/// What the poll loop should fetch next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTarget {
    pub session_id: String,
    pub thread_id: String,
    pub last_seen: Option<u64>,
}

#[derive(Debug)]
pub struct Widget {
    phase: Phase,
    session_id: Option<String>,
    thread_id: Option<String>,
    cursor: PollCursor,
    messages: Vec<Message>,
    rendered: HashSet<String>,
}

impl Default for Widget {
    fn default() -> Self {
        Self::new()
    }
}

impl Widget {
    pub fn new() -> Self {
        Self {
            phase: Phase::Closed,
            session_id: None,
            thread_id: None,
            cursor: PollCursor::new(),
            messages: Vec::new(),
            rendered: HashSet::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Adopt a session returned by the gateway.  Returns the messages not
    /// rendered before.
    pub fn opened(&mut self, session: &Session) -> Vec<Message> {
        self.session_id = Some(session.session_id.clone());
        self.thread_id = session.agent_thread_id.clone();
        self.phase = if !session.is_active() {
            Phase::Ended
        } else {
            match (session.mode, &session.agent_thread_id) {
                (SessionMode::Human, Some(_)) => Phase::Agent,
                (SessionMode::Human, None) => Phase::HandingOff,
                (SessionMode::Ai, _) => Phase::Assistant,
            }
        };

        // Agent replies already in the session must not be ingested again
        // when the relay replays them.
        for m in &session.messages {
            if let Some(id) = m.id.strip_prefix("relay-").and_then(|n| n.parse().ok()) {
                self.cursor.mark_seen(id);
            }
        }

        session
            .messages
            .iter()
            .filter(|m| self.render(m))
            .cloned()
            .collect()
    }

    /// Record `message` as shown.  Returns `false` when it already was.
    pub fn render(&mut self, message: &Message) -> bool {
        if !self.rendered.insert(message.id.clone()) {
            return false;
        }
        self.messages.push(message.clone());
        true
    }

    pub fn can_send(&self) -> bool {
        matches!(self.phase, Phase::Assistant | Phase::Agent)
    }

    /// Enter the hand-off wait.  Only valid while talking to the assistant.
    pub fn begin_handoff(&mut self) -> Result<(), &'static str> {
        match self.phase {
            Phase::Assistant => {
                self.phase = Phase::HandingOff;
                Ok(())
            }
            Phase::Agent | Phase::HandingOff => Err("already connected to a human agent"),
            Phase::Closed => Err("no session open"),
            Phase::Ended => Err("session has ended"),
        }
    }

    pub fn handoff_succeeded(&mut self, thread_id: String) {
        self.phase = Phase::Agent;
        self.thread_id = Some(thread_id);
        self.cursor.reset();
    }

    pub fn handoff_failed(&mut self) {
        if self.phase == Phase::HandingOff {
            self.phase = Phase::Assistant;
        }
    }

    pub fn ended(&mut self) {
        self.phase = Phase::Ended;
    }

    pub fn closed(&mut self) {
        self.phase = Phase::Closed;
    }

    /// Where to poll next, or `None` when polling should stop.
    pub fn poll_target(&self) -> Option<PollTarget> {
        if self.phase != Phase::Agent {
            return None;
        }
        Some(PollTarget {
            session_id: self.session_id.clone()?,
            thread_id: self.thread_id.clone()?,
            last_seen: self.cursor.last_seen(),
        })
    }

    /// Agent entries of one poll page that still need ingesting, in page
    /// order.  Entries for another thread are dropped.  Nothing is marked
    /// here; see [`Widget::delivered`] and [`Widget::advance_cursor`].
    pub fn poll_received(&self, entries: &[RelayEntry]) -> Vec<RelayEntry> {
        let thread = self.thread_id.as_deref();
        entries
            .iter()
            .filter(|e| e.is_from_agent && Some(e.thread_id.as_str()) == thread)
            .filter(|e| !self.cursor.is_seen(e.id))
            .filter(|e| !self.rendered.contains(&relay_message_id(e.id)))
            .cloned()
            .collect()
    }

    /// The gateway recorded relay entry `entry_id` as `message`.  Returns
    /// `true` when the message is new on screen.
    pub fn delivered(&mut self, entry_id: u64, message: &Message) -> bool {
        self.cursor.mark_seen(entry_id);
        self.render(message)
    }

    /// Give up on relay entry `entry_id` without showing it.
    pub fn skipped(&mut self, entry_id: u64) {
        self.cursor.mark_seen(entry_id);
    }

    /// Resume the next poll after `id`.
    pub fn advance_cursor(&mut self, id: u64) {
        self.cursor.advance(id);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
