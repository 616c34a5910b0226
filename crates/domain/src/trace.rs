use serde::Serialize;

/// Structured trace events emitted across all hand-off gateway crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SessionStarted {
        session_id: String,
        is_new: bool,
    },
    SessionEnded {
        session_id: String,
        messages: usize,
    },
    SessionsCollected {
        removed: usize,
        remaining: usize,
    },
    MessageAppended {
        session_id: String,
        message_id: String,
        sender: String,
        chars: usize,
    },
    HandoffRequested {
        session_id: String,
        customer_messages: usize,
    },
    HandoffCompleted {
        session_id: String,
        thread_id: String,
        duration_ms: u64,
    },
    HandoffRolledBack {
        session_id: String,
        reason: String,
    },
    TranscriptAppend {
        session_id: String,
        lines: usize,
    },
    TranscriptStoreCall {
        endpoint: String,
        status: u16,
        duration_ms: u64,
    },
    ChannelPost {
        channel: String,
        thread_id: Option<String>,
        ok: bool,
        duration_ms: u64,
    },
    RelayStored {
        thread_id: String,
        entry_id: u64,
        evicted: usize,
    },
    RelayPruned {
        removed: usize,
        threads: usize,
    },
    WebhookRejected {
        reason: String,
    },
    LlmRequest {
        provider: String,
        model: String,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "hd_event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_event_tag() {
        let ev = TraceEvent::RelayStored {
            thread_id: "1700000000.000100".into(),
            entry_id: 7,
            evicted: 0,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "RelayStored");
        assert_eq!(json["entry_id"], 7);
    }
}
