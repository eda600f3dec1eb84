//! afk-relay: routes an AI coding assistant's permission prompts and
//! questions to a remote chat while the user is away, and hands the answers
//! back to the blocked hook process.

pub mod cli;
pub mod config;
pub mod daemon;
pub mod error;
pub mod handoff;
pub mod hook;
pub mod ipc;
pub mod queue;
pub mod request;
pub mod router;
pub mod session;
pub mod transport;
