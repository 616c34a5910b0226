//! Conversation runtime: the session orchestrator, the assistant responder
//! and the relay buffer that carries agent replies back to the widget.

pub mod orchestrator;
pub mod relay;
pub mod responder;

pub use orchestrator::{Handoff, Orchestrator, Reply, SubmitOutcome};
pub use relay::{NewRelayEntry, PollPage, RelayBuffer};
pub use responder::Responder;
