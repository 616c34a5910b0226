//! Webhook intake: verify, parse, classify, drop redeliveries.

use std::collections::{HashSet, VecDeque};

use parking_lot::Mutex;

use hd_domain::error::{Error, Result};
use hd_domain::trace::TraceEvent;

use crate::events::{Envelope, EventFilter, Inbound};
use crate::signature::SignatureVerifier;

/// How long an accepted delivery is remembered.  The platform retries a
/// webhook it did not see acknowledged for a few minutes at most.
const DELIVERY_WINDOW_SECS: i64 = 3600;

/// Upper bound on remembered deliveries, oldest dropped first.
const DELIVERY_CAPACITY: usize = 10_000;

/// Everything needed to turn a raw webhook request into an [`Inbound`].
#[derive(Debug)]
pub struct EventIntake {
    verifier: SignatureVerifier,
    filter: EventFilter,
    deliveries: Mutex<DeliveryLog>,
}

impl EventIntake {
    pub fn new(verifier: SignatureVerifier, filter: EventFilter) -> Self {
        Self {
            verifier,
            filter,
            deliveries: Mutex::new(DeliveryLog::new(DELIVERY_WINDOW_SECS, DELIVERY_CAPACITY)),
        }
    }

    /// Verify and classify one webhook body.
    ///
    /// Signature or timestamp failures return [`Error::Auth`] before the
    /// body is parsed; a malformed body returns [`Error::Json`].  A reply
    /// already accepted under the same event id (or, without one, the same
    /// thread and message timestamps) is returned as ignored.
    pub fn handle(
        &self,
        body: &[u8],
        signature: Option<&str>,
        timestamp: Option<&str>,
        now: i64,
    ) -> Result<Inbound> {
        if let Err(e) = self.verifier.verify(timestamp, signature, body, now) {
            if let Error::Auth(ref reason) = e {
                TraceEvent::WebhookRejected {
                    reason: reason.clone(),
                }
                .emit();
            }
            return Err(e);
        }

        let envelope: Envelope = serde_json::from_slice(body)?;
        let key = delivery_key(&envelope);
        let mut inbound = self.filter.classify(envelope);
        if let (Inbound::Reply(_), Some(key)) = (&inbound, key) {
            if !self.deliveries.lock().first_delivery(key, now) {
                inbound = Inbound::Ignored("duplicate delivery");
            }
        }
        if let Inbound::Ignored(reason) = &inbound {
            tracing::debug!(reason, "channel event ignored");
        }
        Ok(inbound)
    }
}

fn delivery_key(envelope: &Envelope) -> Option<String> {
    let Envelope::EventCallback { event, event_id } = envelope else {
        return None;
    };
    if let Some(id) = event_id.as_deref().filter(|id| !id.is_empty()) {
        return Some(id.to_owned());
    }
    match (event.thread_ts.as_deref(), event.ts.as_deref()) {
        (Some(thread), Some(ts)) => Some(format!("{thread}/{ts}")),
        _ => None,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Delivery log
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Bounded, time-limited set of accepted delivery keys.
#[derive(Debug)]
struct DeliveryLog {
    window_secs: i64,
    capacity: usize,
    keys: HashSet<String>,
    order: VecDeque<(String, i64)>,
}

impl DeliveryLog {
    fn new(window_secs: i64, capacity: usize) -> Self {
        Self {
            window_secs,
            capacity: capacity.max(1),
            keys: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// Remember `key` at `now`.  Returns `false` when it is still
    /// remembered from an earlier delivery.
    fn first_delivery(&mut self, key: String, now: i64) -> bool {
        while let Some((_, at)) = self.order.front() {
            if now - *at < self.window_secs {
                break;
            }
            if let Some((old, _)) = self.order.pop_front() {
                self.keys.remove(&old);
            }
        }
        if self.keys.contains(&key) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some((old, _)) = self.order.pop_front() {
                self.keys.remove(&old);
            }
        }
        self.keys.insert(key.clone());
        self.order.push_back((key, now));
        true
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.order.len()
    }
}
