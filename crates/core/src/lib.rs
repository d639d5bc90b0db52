//! Domain types and pure logic for the talking-video worker.
//!
//! Request validation, frame-budget estimation, and workflow template
//! selection / parameterization. Nothing here talks to the generation
//! backend; see `talkgen-comfyui` for that.

pub mod error;
pub mod ffmpeg;
pub mod frame_budget;
pub mod types;
pub mod workflow;
