//! Conversation model shared by the orchestrator, the relay buffer and the
//! widget client.
//!
//! A [`Session`] is one customer conversation.  It starts in
//! [`SessionMode::Ai`] and moves to [`SessionMode::Human`] at most once, when
//! a hand-off to the agent channel succeeds.  Its `messages` are append-only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Enums
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which path serves the customer's next message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionMode {
    Ai,
    Human,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Active,
    Ended,
}

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Sender {
    Customer,
    Ai,
    Agent,
}

impl Sender {
    /// Human-readable label used in transcript lines.
    pub fn label(self) -> &'static str {
        match self {
            Sender::Customer => "Customer",
            Sender::Ai => "AI Assistant",
            Sender::Agent => "Human Agent",
        }
    }

    /// Inverse of [`Sender::label`].
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "Customer" => Some(Sender::Customer),
            "AI Assistant" => Some(Sender::Ai),
            "Human Agent" => Some(Sender::Agent),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Sender::Customer => "customer",
            Sender::Ai => "ai",
            Sender::Agent => "agent",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One turn in the conversation.  Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub content: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a message stamped with the local clock and a fresh UUID.
    pub fn new(sender: Sender, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            sender,
            timestamp: Utc::now(),
        }
    }

    /// Convert a relay entry into an agent message.
    ///
    /// The message id is derived from the relay id so a client can match
    /// rendered messages against polled entries.  The timestamp is the
    /// local ingestion time; the provider's timestamp stays on the entry.
    pub fn from_relay(entry: &RelayEntry) -> Self {
        Self {
            id: relay_message_id(entry.id),
            content: entry.content.clone(),
            sender: Sender::Agent,
            timestamp: Utc::now(),
        }
    }
}

/// Message id used for agent messages built from relay entry `entry_id`.
pub fn relay_message_id(entry_id: u64) -> String {
    format!("relay-{entry_id}")
}

/// Trim `text` and check it against the content bounds.
///
/// Returns the trimmed content.  Length is counted in Unicode scalar
/// values, so a 1000-character limit admits 1000 emoji as well as 1000
/// ASCII letters.
pub fn validate_content(text: &str, max_chars: usize) -> Result<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation("message must not be empty".into()));
    }
    let chars = trimmed.chars().count();
    if chars > max_chars {
        return Err(Error::Validation(format!(
            "message is {chars} characters, the maximum is {max_chars}"
        )));
    }
    Ok(trimmed.to_owned())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Relay entry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A transient record bridging the agent channel to the widget.
///
/// Relay entries live only in process memory.  The transcript store is the
/// durable record; these are a transport aid for the poll endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayEntry {
    /// Process-lifetime-unique, monotonically increasing.
    pub id: u64,
    pub thread_id: String,
    pub content: String,
    /// Event timestamp reported by the channel provider.
    pub timestamp: DateTime<Utc>,
    pub is_from_agent: bool,
    /// Provider user id of the author, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One customer conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub mode: SessionMode,
    pub status: SessionStatus,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_thread_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// A fresh `(AI, ACTIVE)` session whose first message is `welcome`.
    pub fn new(session_id: impl Into<String>, welcome: Message) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            mode: SessionMode::Ai,
            status: SessionStatus::Active,
            messages: vec![welcome],
            agent_thread_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Append a message.  There is deliberately no way to remove or
    /// reorder messages.
    pub fn push(&mut self, message: Message) {
        self.updated_at = Utc::now();
        self.messages.push(message);
    }

    pub fn customer_messages(&self) -> impl Iterator<Item = &Message> {
        self.messages
            .iter()
            .filter(|m| m.sender == Sender::Customer)
    }

    /// Hand-off summary: customer-authored messages in chronological
    /// order, separated by blank lines.
    pub fn customer_summary(&self) -> String {
        self.customer_messages()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_at_limit_is_accepted() {
        let text = "a".repeat(1000);
        assert_eq!(validate_content(&text, 1000).unwrap().len(), 1000);
    }

    #[test]
    fn content_one_over_limit_is_rejected() {
        let text = "a".repeat(1001);
        let err = validate_content(&text, 1000).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn whitespace_only_content_is_rejected() {
        assert!(validate_content("   \n\t", 1000).is_err());
    }

    #[test]
    fn content_is_trimmed_before_counting() {
        let text = format!("  {}  ", "é".repeat(10));
        assert_eq!(validate_content(&text, 10).unwrap(), "é".repeat(10));
    }

    #[test]
    fn labels_round_trip() {
        for sender in [Sender::Customer, Sender::Ai, Sender::Agent] {
            assert_eq!(Sender::from_label(sender.label()), Some(sender));
        }
        assert_eq!(Sender::from_label("Robot"), None);
    }

    #[test]
    fn summary_uses_only_customer_messages_in_order() {
        let mut s = Session::new("s1", Message::new(Sender::Ai, "Hi! How can I help?"));
        s.push(Message::new(Sender::Customer, "I have 200 slides"));
        s.push(Message::new(Sender::Ai, "We can scan those."));
        s.push(Message::new(Sender::Customer, "What about negatives?"));

        assert_eq!(s.customer_summary(), "I have 200 slides\n\nWhat about negatives?");
    }

    #[test]
    fn new_session_starts_ai_active() {
        let s = Session::new("s1", Message::new(Sender::Ai, "welcome"));
        assert_eq!(s.mode, SessionMode::Ai);
        assert_eq!(s.status, SessionStatus::Active);
        assert!(s.agent_thread_id.is_none());
        assert_eq!(s.messages.len(), 1);
    }

    #[test]
    fn relay_message_uses_relay_id() {
        let entry = RelayEntry {
            id: 42,
            thread_id: "T1".into(),
            content: "Sure, one moment".into(),
            timestamp: Utc::now(),
            is_from_agent: true,
            sender: Some("U1".into()),
            session_id: None,
        };
        let msg = Message::from_relay(&entry);
        assert_eq!(msg.id, "relay-42");
        assert_eq!(msg.sender, Sender::Agent);
        assert_eq!(msg.content, "Sure, one moment");
    }

    #[test]
    fn relay_entry_serializes_camel_case() {
        let entry = RelayEntry {
            id: 1,
            thread_id: "T1".into(),
            content: "hello".into(),
            timestamp: Utc::now(),
            is_from_agent: true,
            sender: None,
            session_id: None,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["threadId"], "T1");
        assert_eq!(json["isFromAgent"], true);
        assert!(json.get("sender").is_none());
    }

    #[test]
    fn mode_serializes_upper_case() {
        assert_eq!(serde_json::to_value(SessionMode::Human).unwrap(), "HUMAN");
        assert_eq!(serde_json::to_value(SessionStatus::Active).unwrap(), "ACTIVE");
    }
}
