//! Completion monitoring over the ComfyUI event stream.
//!
//! Reads raw frames from a session WebSocket, parses them into typed
//! [`StreamEvent`]s, and returns once the backend signals that
//! the watched prompt has finished (`executing` with a null node).

use futures::{Stream, StreamExt};
use tokio_tungstenite::tungstenite::{self, Message};

use crate::messages::{parse_event, StreamEvent};

/// What the stream reported before the terminal signal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    /// Last `execution_error` reported for the watched prompt, if any.
    pub execution_error: Option<String>,
    /// Number of nodes the backend reported as served from cache.
    pub cached_nodes: usize,
}

/// The stream ended before the terminal signal arrived.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Event stream closed before prompt {prompt_id} completed")]
    Closed { prompt_id: String },

    #[error("Event stream receive error: {0}")]
    Receive(String),
}

/// Consume `stream` until `prompt_id` completes.
///
/// Text frames that fail to parse (unknown message types included) are
/// skipped. Binary frames carry preview images and are ignored. Events
/// for other prompts are ignored.
pub async fn wait_for_completion<S>(
    stream: &mut S,
    prompt_id: &str,
) -> Result<Completion, MonitorError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let mut completion = Completion::default();

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                if observe(&text, prompt_id, &mut completion) {
                    tracing::info!(prompt_id, "Execution completed (all nodes done)");
                    return Ok(completion);
                }
            }
            Ok(Message::Binary(_)) => {
                tracing::trace!(prompt_id, "Ignoring binary message (preview image)");
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
            Ok(Message::Close(frame)) => {
                tracing::warn!(prompt_id, ?frame, "ComfyUI WebSocket closed");
                return Err(MonitorError::Closed {
                    prompt_id: prompt_id.to_string(),
                });
            }
            Err(e) => {
                tracing::error!(prompt_id, error = %e, "WebSocket receive error");
                return Err(MonitorError::Receive(e.to_string()));
            }
        }
    }

    Err(MonitorError::Closed {
        prompt_id: prompt_id.to_string(),
    })
}

/// Fold one text frame into `completion`. Returns `true` on the terminal
/// signal for `prompt_id`.
fn observe(text: &str, prompt_id: &str, completion: &mut Completion) -> bool {
    let event = match parse_event(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!(error = %e, raw_message = %text, "Skipping unrecognised ComfyUI message");
            return false;
        }
    };

    if event.is_completion_of(prompt_id) {
        return true;
    }
    if event.prompt_id().is_some_and(|id| id != prompt_id) {
        return false;
    }

    match event {
        StreamEvent::Status(status) => {
            tracing::debug!(queue_remaining = status.queue_remaining(), "ComfyUI queue status");
        }
        StreamEvent::ExecutionStart(_) => tracing::info!(prompt_id, "Execution started"),
        StreamEvent::ExecutionCached(cached) => {
            completion.cached_nodes += cached.nodes.len();
            tracing::debug!(prompt_id, cached = cached.nodes.len(), "Execution used cache");
        }
        StreamEvent::Executing(step) => {
            if let Some(node) = step.node {
                tracing::debug!(prompt_id, node = %node, "Executing node");
            }
        }
        StreamEvent::Progress(progress) => tracing::debug!(
            prompt_id,
            step = progress.value,
            of = progress.max,
            percent = progress.percent(),
            "Generation progress",
        ),
        StreamEvent::Executed(output) => {
            tracing::debug!(prompt_id, node = %output.node, "Node produced output");
        }
        StreamEvent::ExecutionError(failure) => {
            let summary = failure.summary();
            tracing::error!(prompt_id, error = %summary, "Execution error");
            completion.execution_error = Some(summary);
        }
        StreamEvent::ExecutionSuccess(_) => tracing::debug!(prompt_id, "Backend reported success"),
        StreamEvent::ExecutionInterrupted(_) => {
            tracing::warn!(prompt_id, "Execution interrupted");
            completion
                .execution_error
                .get_or_insert_with(|| "Execution interrupted".to_string());
        }
    }

    false
}
