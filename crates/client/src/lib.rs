//! Client for submitting talking-video jobs to a serverless endpoint.
//!
//! [`runpod::RunpodClient`] wraps the `/run` and `/status` HTTP API and
//! uploads local inputs through an [`talkgen_storage::ObjectStore`] so the
//! worker can read them from its network volume. [`jobs`] builds the
//! single-video and batch flows on top of it.

pub mod error;
pub mod jobs;
pub mod runpod;

pub use error::ClientError;
pub use runpod::{ClientConfig, JobOutcome, PollSettings, RunpodClient};
