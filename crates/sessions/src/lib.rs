//! Session state for the hand-off gateway.
//!
//! Holds the in-memory session table, the human-readable transcript line
//! format, and the durable transcript store clients (Airtable-style REST
//! and in-memory).  Transcript writes for one session go through
//! [`TranscriptWriter`] so their order matches the session's message order.

pub mod store;
pub mod transcript;
pub mod transcript_store;

pub use store::SessionStore;
pub use transcript::{format_line, parse_transcript, TranscriptLine, TranscriptSlot, TranscriptWriter};
pub use transcript_store::{
    MemoryTranscriptStore, RecordStatus, RestTranscriptStore, TranscriptRecord, TranscriptStore,
};
