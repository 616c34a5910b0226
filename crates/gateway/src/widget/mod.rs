//! Terminal chat widget: talks to the gateway over HTTP and polls the
//! relay once a human agent has joined.

pub mod client;
pub mod state;

pub use client::{run_poll_loop, GatewayClient, Polled, Sent};
pub use state::{Phase, PollCursor, PollTarget, Widget};
