//! `talkgen-worker` library crate.
//!
//! The job handler and its collaborators. The binary entrypoint lives in
//! `main.rs`; integration tests drive [`handler::Orchestrator`] directly.

pub mod config;
pub mod delivery;
pub mod error;
pub mod handler;
pub mod input;
