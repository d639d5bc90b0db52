//! ComfyUI client library for one-shot workflow execution.
//!
//! Typed event-stream parsing, the REST and WebSocket clients, bounded
//! retry, history artifact extraction, and the [`driver::ExecutionDriver`]
//! that ties them together for a single job.

pub mod api;
pub mod client;
pub mod driver;
pub mod history;
pub mod messages;
pub mod monitor;
pub mod retry;
