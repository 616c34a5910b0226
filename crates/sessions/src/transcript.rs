//! Human-readable transcript lines and ordered transcript writes.
//!
//! A line looks like
//!
//! ```text
//! [2024-05-01T14:03:22.125Z] Customer: How much for photo scanning?
//! ```
//!
//! Newlines inside the content are flattened to single spaces so that each
//! message occupies exactly one line.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use hd_domain::chat::{Message, Sender};
use hd_domain::error::{Error, Result};
use hd_domain::trace::TraceEvent;

use crate::transcript_store::{RecordStatus, TranscriptStore};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Line format
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A parsed transcript line.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TranscriptLine {
    pub timestamp: DateTime<Utc>,
    pub sender: Sender,
    pub content: String,
}

/// Format one message as a transcript line.
pub fn format_line(message: &Message) -> String {
    format!(
        "[{}] {}: {}",
        message.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        message.sender.label(),
        flatten(&message.content)
    )
}

fn flatten(content: &str) -> String {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse a single transcript line.  Returns `None` for anything that does
/// not follow the line format (hand-edited rows, blank lines).
pub fn parse_line(line: &str) -> Option<TranscriptLine> {
    let rest = line.strip_prefix('[')?;
    let (ts, rest) = rest.split_once("] ")?;
    let (label, content) = rest.split_once(": ")?;
    let timestamp = DateTime::parse_from_rfc3339(ts).ok()?.with_timezone(&Utc);
    let sender = Sender::from_label(label)?;
    Some(TranscriptLine {
        timestamp,
        sender,
        content: content.to_owned(),
    })
}

/// Parse a full transcript, skipping lines that do not parse.
pub fn parse_transcript(text: &str) -> Vec<TranscriptLine> {
    text.lines().filter_map(parse_line).collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Ordered writer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Serializes transcript writes per session.
///
/// Each session id maps to a `Semaphore(1)`.  A caller reserves a slot
/// *before* appending the message to the session, then writes through the
/// slot.  Tokio semaphores are FIFO, so the transcript order matches the
/// order in which messages were appended to the session.
pub struct TranscriptWriter {
    store: Arc<dyn TranscriptStore>,
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl TranscriptWriter {
    pub fn new(store: Arc<dyn TranscriptStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn TranscriptStore> {
        &self.store
    }

    /// Wait for this session's write slot.
    pub async fn reserve(&self, session_id: &str) -> Result<TranscriptSlot> {
        let sem = {
            let mut locks = self.locks.lock();
            locks
                .entry(session_id.to_owned())
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };
        let permit = sem
            .acquire_owned()
            .await
            .map_err(|e| Error::Other(format!("transcript lock closed: {e}")))?;
        Ok(TranscriptSlot {
            session_id: session_id.to_owned(),
            store: self.store.clone(),
            _permit: permit,
        })
    }

    /// Forget the lock for a collected session.  A slot still held keeps
    /// its own semaphore alive.
    pub fn forget(&self, session_id: &str) {
        self.locks.lock().remove(session_id);
    }

    /// Number of sessions with a tracked lock (for monitoring).
    pub fn tracked_sessions(&self) -> usize {
        self.locks.lock().len()
    }
}

/// Exclusive right to write the next transcript entry for one session.
/// Released on drop.
pub struct TranscriptSlot {
    session_id: String,
    store: Arc<dyn TranscriptStore>,
    _permit: OwnedSemaphorePermit,
}

impl TranscriptSlot {
    /// Create the session's record with `message` as its first line.
    pub async fn create(self, message: &Message) -> Result<()> {
        self.store
            .create(&self.session_id, &format_line(message))
            .await?;
        self.emit(1);
        Ok(())
    }

    /// Append `message` to the session's record.
    pub async fn append(self, message: &Message) -> Result<()> {
        self.store
            .append(&self.session_id, &format_line(message))
            .await?;
        self.emit(1);
        Ok(())
    }

    /// Update the record's status (and thread, when given).
    pub async fn set_status(self, status: RecordStatus, thread_id: Option<&str>) -> Result<()> {
        self.store
            .set_status(&self.session_id, status, thread_id)
            .await
    }

    fn emit(&self, lines: usize) {
        TraceEvent::TranscriptAppend {
            session_id: self.session_id.clone(),
            lines,
        }
        .emit();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript_store::MemoryTranscriptStore;
    use chrono::TimeZone;

    fn msg_at(sender: Sender, content: &str) -> Message {
        Message {
            id: "m1".into(),
            content: content.into(),
            sender,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 14, 3, 22).unwrap()
                + chrono::Duration::milliseconds(125),
        }
    }

    #[test]
    fn line_has_millisecond_utc_timestamp_and_label() {
        let line = format_line(&msg_at(Sender::Customer, "How much for photo scanning?"));
        assert_eq!(
            line,
            "[2024-05-01T14:03:22.125Z] Customer: How much for photo scanning?"
        );
    }

    #[test]
    fn newlines_are_flattened() {
        let line = format_line(&msg_at(Sender::Agent, "Sure.\n\nOne moment\r\nplease"));
        assert!(line.ends_with("Human Agent: Sure. One moment please"));
        assert_eq!(line.lines().count(), 1);
    }

    #[test]
    fn parse_inverts_format() {
        let m = msg_at(Sender::Ai, "We scan at 600 dpi: fast and sharp.");
        let parsed = parse_line(&format_line(&m)).unwrap();
        assert_eq!(parsed.sender, Sender::Ai);
        assert_eq!(parsed.timestamp, m.timestamp);
        assert_eq!(parsed.content, "We scan at 600 dpi: fast and sharp.");
    }

    #[test]
    fn parse_skips_garbage() {
        let text = "not a line\n[2024-05-01T14:03:22.125Z] Robot: hi\n\
                    [2024-05-01T14:03:22.125Z] Customer: hello";
        let lines = parse_transcript(text);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].content, "hello");
    }

    #[tokio::test]
    async fn slots_write_in_reservation_order() {
        let store = Arc::new(MemoryTranscriptStore::new());
        let writer = Arc::new(TranscriptWriter::new(store.clone()));

        let first = writer.reserve("s1").await.unwrap();

        // Second reservation queues behind the first.
        let w2 = writer.clone();
        let second = tokio::spawn(async move {
            let slot = w2.reserve("s1").await.unwrap();
            slot.append(&msg_at(Sender::Ai, "second")).await.unwrap();
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        first
            .append(&msg_at(Sender::Customer, "first"))
            .await
            .unwrap();
        second.await.unwrap();

        let lines = parse_transcript(&store.lines("s1").join("\n"));
        let contents: Vec<_> = lines.iter().map(|l| l.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn forget_drops_lock_entry() {
        let writer = TranscriptWriter::new(Arc::new(MemoryTranscriptStore::new()));
        drop(writer.reserve("s1").await.unwrap());
        assert_eq!(writer.tracked_sessions(), 1);
        writer.forget("s1");
        assert_eq!(writer.tracked_sessions(), 0);
    }
}
