//! Typed events from the ComfyUI session stream.
//!
//! Every text frame is a JSON object `{"type": "<kind>", "data": {...}}`.
//! [`parse_event`] turns the kinds the monitor cares about into a
//! [`StreamEvent`]. Anything else (custom-node telemetry, preview
//! metadata, kinds added by newer servers) is a parse error that callers
//! log and skip.

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Queue broadcast, sent on connect and whenever the queue changes.
    Status(QueueStatus),
    ExecutionStart(PromptRef),
    /// Nodes whose outputs were reused from the backend's cache.
    ExecutionCached(CachedNodes),
    /// A node started; `node: null` means the whole prompt is done.
    Executing(NodeStep),
    /// Step progress inside a long-running node (the sampler).
    Progress(Progress),
    Executed(NodeOutput),
    ExecutionError(ExecutionFailure),
    ExecutionSuccess(PromptRef),
    ExecutionInterrupted(PromptRef),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct QueueStatus {
    status: StatusBody,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
struct StatusBody {
    exec_info: ExecInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
struct ExecInfo {
    queue_remaining: u32,
}

impl QueueStatus {
    pub fn queue_remaining(&self) -> u32 {
        self.status.exec_info.queue_remaining
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PromptRef {
    pub prompt_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CachedNodes {
    pub prompt_id: String,
    #[serde(default)]
    pub nodes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NodeStep {
    pub node: Option<String>,
    #[serde(default)]
    pub prompt_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Progress {
    pub value: u32,
    pub max: u32,
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub node: Option<String>,
}

impl Progress {
    /// Whole percent, 0 when `max` is zero.
    pub fn percent(&self) -> u32 {
        if self.max == 0 {
            0
        } else {
            (u64::from(self.value) * 100 / u64::from(self.max)) as u32
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NodeOutput {
    pub node: String,
    pub prompt_id: String,
    #[serde(default)]
    pub output: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExecutionFailure {
    pub prompt_id: String,
    pub node_id: String,
    #[serde(default)]
    pub node_type: Option<String>,
    pub exception_type: String,
    pub exception_message: String,
}

impl ExecutionFailure {
    /// One-line description, e.g. `torch.OutOfMemoryError in node 128 (WanVideoSampler): ...`.
    pub fn summary(&self) -> String {
        match &self.node_type {
            Some(class) => format!(
                "{} in node {} ({class}): {}",
                self.exception_type, self.node_id, self.exception_message
            ),
            None => format!(
                "{} in node {}: {}",
                self.exception_type, self.node_id, self.exception_message
            ),
        }
    }
}

impl StreamEvent {
    /// Prompt the event belongs to. Queue broadcasts and progress frames
    /// from older servers carry none.
    pub fn prompt_id(&self) -> Option<&str> {
        match self {
            Self::Status(_) => None,
            Self::Progress(p) => p.prompt_id.as_deref(),
            Self::ExecutionStart(r) | Self::ExecutionSuccess(r) | Self::ExecutionInterrupted(r) => {
                Some(&r.prompt_id)
            }
            Self::ExecutionCached(c) => Some(&c.prompt_id),
            Self::Executing(s) => Some(&s.prompt_id),
            Self::Executed(o) => Some(&o.prompt_id),
            Self::ExecutionError(f) => Some(&f.prompt_id),
        }
    }

    /// The terminal signal for `prompt_id`: `executing` with a null node.
    pub fn is_completion_of(&self, prompt_id: &str) -> bool {
        matches!(self, Self::Executing(step) if step.node.is_none() && step.prompt_id == prompt_id)
    }
}

/// Parse one text frame.
pub fn parse_event(text: &str) -> Result<StreamEvent, serde_json::Error> {
    serde_json::from_str(text)
}
