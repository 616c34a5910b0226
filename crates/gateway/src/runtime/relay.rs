//! In-memory relay buffer between the agent channel and the widget poll.
//!
//! Entries are grouped by thread id in arrival order.  Ids come from one
//! process-wide counter assigned under the same write lock that appends,
//! so within a thread a larger id always means a later entry.
//!
//! Nothing here survives a restart.  The transcript store is the durable
//! record; the buffer only has to carry replies until the widget polls.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

use hd_domain::chat::RelayEntry;
use hd_domain::config::RelayConfig;
use hd_domain::trace::TraceEvent;

/// Fields of an entry before the buffer assigns it an id.
#[derive(Debug, Clone)]
pub struct NewRelayEntry {
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub is_from_agent: bool,
    pub sender: Option<String>,
    pub session_id: Option<String>,
    /// Arrived through the signature-checked channel webhook.  Only
    /// these entries can be recorded in a session transcript.
    pub signed: bool,
}

/// One page of poll results.
#[derive(Debug, Clone, Default)]
pub struct PollPage {
    pub entries: Vec<RelayEntry>,
    /// More entries after this page are already buffered.
    pub has_more: bool,
}

struct Stored {
    entry: RelayEntry,
    stored_at: DateTime<Utc>,
    signed: bool,
}

struct Inner {
    threads: HashMap<String, VecDeque<Stored>>,
    next_id: u64,
}

pub struct RelayBuffer {
    inner: RwLock<Inner>,
    max_entries: Option<usize>,
    max_age: Option<Duration>,
    page_size: usize,
}

impl RelayBuffer {
    pub fn new(cfg: &RelayConfig) -> Self {
        Self {
            inner: RwLock::new(Inner {
                threads: HashMap::new(),
                next_id: 1,
            }),
            max_entries: cfg.max_entries.filter(|n| *n > 0),
            max_age: cfg
                .max_age_secs
                .filter(|s| *s > 0)
                .map(|s| Duration::seconds(s as i64)),
            page_size: cfg.poll_page_size.max(1),
        }
    }

    /// Append an entry to `thread_id` and return it with its id.
    pub fn store(&self, thread_id: &str, new: NewRelayEntry) -> RelayEntry {
        self.store_at(thread_id, new, Utc::now())
    }

    fn store_at(&self, thread_id: &str, new: NewRelayEntry, now: DateTime<Utc>) -> RelayEntry {
        let (entry, evicted) = {
            let mut inner = self.inner.write();
            let id = inner.next_id;
            inner.next_id += 1;

            let entry = RelayEntry {
                id,
                thread_id: thread_id.to_owned(),
                content: new.content,
                timestamp: new.timestamp,
                is_from_agent: new.is_from_agent,
                sender: new.sender,
                session_id: new.session_id,
            };

            let queue = inner.threads.entry(thread_id.to_owned()).or_default();
            queue.push_back(Stored {
                entry: entry.clone(),
                stored_at: now,
                signed: new.signed,
            });
            let evicted = self.evict(queue, now);
            (entry, evicted)
        };

        TraceEvent::RelayStored {
            thread_id: thread_id.to_owned(),
            entry_id: entry.id,
            evicted,
        }
        .emit();
        entry
    }

    /// Drop entries beyond the size cap or older than the age cap.
    fn evict(&self, queue: &mut VecDeque<Stored>, now: DateTime<Utc>) -> usize {
        let mut evicted = 0;
        if let Some(max_age) = self.max_age {
            let cutoff = now - max_age;
            while queue.front().is_some_and(|s| s.stored_at < cutoff) {
                queue.pop_front();
                evicted += 1;
            }
        }
        if let Some(max) = self.max_entries {
            while queue.len() > max {
                queue.pop_front();
                evicted += 1;
            }
        }
        evicted
    }

    /// Entries of `thread_id` after the one with id `last_seen`.
    ///
    /// A missing cursor, or one that is not (or no longer) in the thread,
    /// returns the whole retained sequence; the client dedupes by id.
    pub fn poll(&self, thread_id: &str, last_seen: Option<u64>) -> PollPage {
        let inner = self.inner.read();
        let Some(queue) = inner.threads.get(thread_id) else {
            return PollPage::default();
        };

        let start = last_seen
            .and_then(|id| queue.iter().position(|s| s.entry.id == id))
            .map(|pos| pos + 1)
            .unwrap_or(0);

        let remaining = queue.len().saturating_sub(start);
        let entries = queue
            .iter()
            .skip(start)
            .take(self.page_size)
            .map(|s| s.entry.clone())
            .collect();

        PollPage {
            entries,
            has_more: remaining > self.page_size,
        }
    }

    /// The signed entry `id` of `thread_id`, if it is still buffered.
    ///
    /// Entries posted through the relay ingest endpoint never resolve, so
    /// a client cannot author transcript lines in an agent's name.
    pub fn get(&self, thread_id: &str, id: u64) -> Option<RelayEntry> {
        let inner = self.inner.read();
        inner
            .threads
            .get(thread_id)?
            .iter()
            .find(|s| s.entry.id == id && s.signed)
            .map(|s| s.entry.clone())
    }

    /// Remove expired entries across all threads and drop empty threads.
    /// Returns the number of entries removed.
    pub fn prune_expired(&self) -> usize {
        self.prune_at(Utc::now())
    }

    fn prune_at(&self, now: DateTime<Utc>) -> usize {
        let (removed, threads) = {
            let mut inner = self.inner.write();
            let mut removed = 0;
            for queue in inner.threads.values_mut() {
                removed += self.evict(queue, now);
            }
            inner.threads.retain(|_, q| !q.is_empty());
            (removed, inner.threads.len())
        };

        if removed > 0 {
            TraceEvent::RelayPruned { removed, threads }.emit();
        }
        removed
    }

    pub fn thread_count(&self) -> usize {
        self.inner.read().threads.len()
    }

    pub fn entry_count(&self) -> usize {
        self.inner.read().threads.values().map(VecDeque::len).sum()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
