//! Events API envelopes and reply classification.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Top-level webhook body.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    UrlVerification {
        challenge: String,
    },
    EventCallback {
        event: ChannelEvent,
        #[serde(default)]
        event_id: Option<String>,
    },
    #[serde(other)]
    Unsupported,
}

/// The inner `event` object.  Only the fields the classifier looks at.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub ts: Option<String>,
    #[serde(default)]
    pub thread_ts: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Classification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A human agent's reply inside a hand-off thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentReply {
    pub thread_id: String,
    pub text: String,
    pub user: Option<String>,
    /// Provider event timestamp.
    pub timestamp: DateTime<Utc>,
}

/// Outcome of classifying one verified webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// URL verification handshake; echo the challenge.
    Challenge(String),
    Reply(AgentReply),
    /// Accepted but not relayed.  Carries the reason for logs.
    Ignored(&'static str),
}

/// Decides which channel events are agent replies.
#[derive(Debug, Clone)]
pub struct EventFilter {
    channel_id: String,
    bot_user_id: Option<String>,
}

impl EventFilter {
    pub fn new(channel_id: impl Into<String>, bot_user_id: Option<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            bot_user_id,
        }
    }

    pub fn classify(&self, envelope: Envelope) -> Inbound {
        match envelope {
            Envelope::UrlVerification { challenge } => Inbound::Challenge(challenge),
            Envelope::EventCallback { event, .. } => self.classify_event(event),
            Envelope::Unsupported => Inbound::Ignored("unsupported envelope"),
        }
    }

    fn classify_event(&self, event: ChannelEvent) -> Inbound {
        if event.kind != "message" {
            return Inbound::Ignored("not a message event");
        }
        if event.subtype.is_some() {
            return Inbound::Ignored("message subtype");
        }
        if event.bot_id.is_some() {
            return Inbound::Ignored("bot message");
        }
        if let (Some(own), Some(user)) = (self.bot_user_id.as_deref(), event.user.as_deref()) {
            if own == user {
                return Inbound::Ignored("own message");
            }
        }
        if event.channel.as_deref() != Some(self.channel_id.as_str()) {
            return Inbound::Ignored("other channel");
        }
        let Some(thread_id) = event.thread_ts.filter(|t| !t.is_empty()) else {
            return Inbound::Ignored("not in a thread");
        };
        if event.ts.as_deref() == Some(thread_id.as_str()) {
            return Inbound::Ignored("thread root");
        }
        let text = event.text.as_deref().map(str::trim).unwrap_or_default();
        if text.is_empty() {
            return Inbound::Ignored("empty text");
        }

        Inbound::Reply(AgentReply {
            thread_id,
            text: text.to_owned(),
            user: event.user,
            timestamp: event
                .ts
                .as_deref()
                .and_then(parse_ts)
                .unwrap_or_else(Utc::now),
        })
    }
}

/// Parse a provider timestamp like `"1700000000.000100"`.
pub fn parse_ts(ts: &str) -> Option<DateTime<Utc>> {
    let (secs, frac) = ts.split_once('.').unwrap_or((ts, "0"));
    let secs: i64 = secs.parse().ok()?;
    // Fraction is microseconds, zero-padded to 6 digits.
    let micros: u32 = format!("{frac:0<6}").get(..6)?.parse().ok()?;
    Utc.timestamp_opt(secs, micros * 1_000).single()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> EventFilter {
        EventFilter::new("C123", Some("U0BOT".into()))
    }

    fn reply_event() -> ChannelEvent {
        ChannelEvent {
            kind: "message".into(),
            channel: Some("C123".into()),
            user: Some("U0AGENT".into()),
            text: Some("Sure, one moment".into()),
            ts: Some("1700000100.000200".into()),
            thread_ts: Some("1700000000.000100".into()),
            ..Default::default()
        }
    }

    fn classify(event: ChannelEvent) -> Inbound {
        filter().classify(Envelope::EventCallback {
            event,
            event_id: None,
        })
    }

    #[test]
    fn thread_reply_is_relayed() {
        match classify(reply_event()) {
            Inbound::Reply(r) => {
                assert_eq!(r.thread_id, "1700000000.000100");
                assert_eq!(r.text, "Sure, one moment");
                assert_eq!(r.user.as_deref(), Some("U0AGENT"));
                assert_eq!(r.timestamp.timestamp(), 1_700_000_100);
            }
            other => panic!("expected reply, got {other:?}"),
        }
    }

    #[test]
    fn top_level_message_is_ignored() {
        let mut e = reply_event();
        e.thread_ts = None;
        assert_eq!(classify(e), Inbound::Ignored("not in a thread"));
    }

    #[test]
    fn bot_messages_are_ignored() {
        let mut e = reply_event();
        e.bot_id = Some("B01".into());
        assert_eq!(classify(e), Inbound::Ignored("bot message"));

        let mut e = reply_event();
        e.user = Some("U0BOT".into());
        assert_eq!(classify(e), Inbound::Ignored("own message"));
    }

    #[test]
    fn other_channel_is_ignored() {
        let mut e = reply_event();
        e.channel = Some("C999".into());
        assert_eq!(classify(e), Inbound::Ignored("other channel"));
    }

    #[test]
    fn subtypes_and_empty_text_are_ignored() {
        let mut e = reply_event();
        e.subtype = Some("message_changed".into());
        assert_eq!(classify(e), Inbound::Ignored("message subtype"));

        let mut e = reply_event();
        e.text = Some("   ".into());
        assert_eq!(classify(e), Inbound::Ignored("empty text"));
    }

    #[test]
    fn thread_root_is_ignored() {
        let mut e = reply_event();
        e.ts = e.thread_ts.clone();
        assert_eq!(classify(e), Inbound::Ignored("thread root"));
    }

    #[test]
    fn url_verification_parses_and_yields_challenge() {
        let env: Envelope = serde_json::from_str(
            r#"{"type":"url_verification","token":"x","challenge":"3eZbrw1aBm"}"#,
        )
        .unwrap();
        assert_eq!(filter().classify(env), Inbound::Challenge("3eZbrw1aBm".into()));
    }

    #[test]
    fn event_callback_parses_from_wire() {
        let body = r#"{
            "type": "event_callback",
            "event_id": "Ev01",
            "event": {
                "type": "message",
                "channel": "C123",
                "user": "U0AGENT",
                "text": "On it",
                "ts": "1700000100.000200",
                "thread_ts": "1700000000.000100"
            }
        }"#;
        let env: Envelope = serde_json::from_str(body).unwrap();
        assert!(matches!(filter().classify(env), Inbound::Reply(_)));
    }

    #[test]
    fn unknown_envelope_type_is_unsupported() {
        let env: Envelope = serde_json::from_str(r#"{"type":"app_rate_limited"}"#).unwrap();
        assert_eq!(filter().classify(env), Inbound::Ignored("unsupported envelope"));
    }

    #[test]
    fn parse_ts_handles_fraction() {
        let t = parse_ts("1700000000.000100").unwrap();
        assert_eq!(t.timestamp_subsec_micros(), 100);
        assert!(parse_ts("nope").is_none());
        assert_eq!(parse_ts("1700000000").unwrap().timestamp(), 1_700_000_000);
    }
}
