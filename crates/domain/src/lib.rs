//! Shared domain types for the hand-off gateway.
//!
//! Every other crate in the workspace depends on this one for the
//! configuration tree, the common error type, structured trace events and
//! the conversation model (sessions, messages, relay entries).

pub mod chat;
pub mod config;
pub mod error;
pub mod trace;
