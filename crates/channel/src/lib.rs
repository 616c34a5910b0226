//! Agent channel bridge.
//!
//! Outbound: posts hand-off threads and customer messages into a
//! Slack-style team channel ([`SlackChannel`], behind the [`AgentChannel`]
//! trait).  Inbound: verifies Events API webhooks ([`SignatureVerifier`])
//! and classifies them into agent replies ([`EventFilter`]).

pub mod client;
pub mod events;
pub mod intake;
pub mod signature;

pub use client::{AgentChannel, SlackChannel};
pub use events::{AgentReply, Envelope, EventFilter, Inbound};
pub use intake::EventIntake;
pub use signature::{sign, SignatureVerifier};
