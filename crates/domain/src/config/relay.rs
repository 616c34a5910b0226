use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message relay buffer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Retention and poll settings for the in-process relay buffer.
///
/// Both retention limits apply per thread; either may be disabled with
/// `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Keep at most this many entries per thread, evicting the oldest.
    #[serde(default = "d_max_entries")]
    pub max_entries: Option<usize>,
    /// Evict entries stored longer ago than this.
    #[serde(default = "d_max_age")]
    pub max_age_secs: Option<u64>,
    /// Maximum entries returned by one poll.
    #[serde(default = "d_page")]
    pub poll_page_size: usize,
    /// Widget poll cadence while a session is in human mode.
    #[serde(default = "d_2000")]
    pub poll_interval_ms: u64,
    /// How often the background sweep applies `max_age_secs`.
    #[serde(default = "d_60")]
    pub prune_interval_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_entries: d_max_entries(),
            max_age_secs: d_max_age(),
            poll_page_size: d_page(),
            poll_interval_ms: 2_000,
            prune_interval_secs: 60,
        }
    }
}

fn d_max_entries() -> Option<usize> {
    Some(500)
}
fn d_max_age() -> Option<u64> {
    Some(6 * 60 * 60)
}
fn d_page() -> usize {
    100
}
fn d_2000() -> u64 {
    2_000
}
fn d_60() -> u64 {
    60
}
