//! Workflow template selection, schema validation, and parameterization.
//!
//! Templates are ComfyUI API-format graphs: a JSON object keyed by node id
//! whose values carry a `class_type` and an `inputs` map:
//!
//! ```json
//! {
//!   "284": { "class_type": "LoadImage", "inputs": { "image": "image.jpg" } }
//! }
//! ```
//!
//! Each template variant has a [`TemplateSchema`] naming the node and input
//! key behind every semantic field. Required fields are checked when the
//! template is loaded; optional ones are skipped with a warning when the
//! graph does not define them.

use std::path::PathBuf;

use serde_json::{Map, Value};

use crate::error::CoreError;
use crate::types::{ActorCount, MediaKind};

// ---------------------------------------------------------------------------
// Template identifiers
// ---------------------------------------------------------------------------

/// One of the fixed on-disk workflow templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateId {
    ImageSingle,
    ImageMulti,
    VideoSingle,
    VideoMulti,
    /// Single-purpose template used when the request names neither a media
    /// kind nor an actor count.
    Legacy,
}

impl TemplateId {
    pub const ALL: [TemplateId; 5] = [
        Self::ImageSingle,
        Self::ImageMulti,
        Self::VideoSingle,
        Self::VideoMulti,
        Self::Legacy,
    ];

    /// File name of the template inside the workflow directory.
    pub fn file_name(self) -> &'static str {
        match self {
            Self::ImageSingle => "I2V_single.json",
            Self::ImageMulti => "I2V_multi.json",
            Self::VideoSingle => "V2V_single.json",
            Self::VideoMulti => "V2V_multi.json",
            Self::Legacy => "infinitetalk.json",
        }
    }

    /// The node addressing schema for this template.
    pub fn schema(self) -> TemplateSchema {
        let media = match self {
            Self::VideoSingle | Self::VideoMulti => NodeSlot::new("228", "video"),
            Self::ImageSingle | Self::ImageMulti | Self::Legacy => NodeSlot::new("284", "image"),
        };
        let secondary_audio = match self {
            Self::ImageMulti => Some(NodeSlot::new("307", "audio")),
            Self::VideoMulti => Some(NodeSlot::new("313", "audio")),
            _ => None,
        };

        TemplateSchema {
            media,
            audio: NodeSlot::new("125", "audio"),
            prompt: NodeSlot::new("241", "positive_prompt"),
            width: NodeSlot::new("245", "value"),
            height: NodeSlot::new("246", "value"),
            frame_budget: NodeSlot::new("270", "value"),
            secondary_audio,
            offload: OffloadSlot {
                class_type: "WanVideoSampler",
                preferred_node_id: "128",
                input: "force_offload",
            },
        }
    }
}

/// Pick the template for a request's (media kind, actor count).
///
/// Total over every combination: when both are absent the legacy template
/// is used, otherwise a missing dimension defaults to image / single.
pub fn select_template(media: Option<MediaKind>, actors: Option<ActorCount>) -> TemplateId {
    if media.is_none() && actors.is_none() {
        return TemplateId::Legacy;
    }

    match (
        media.unwrap_or(MediaKind::Image),
        actors.unwrap_or(ActorCount::Single),
    ) {
        (MediaKind::Image, ActorCount::Single) => TemplateId::ImageSingle,
        (MediaKind::Image, ActorCount::Multi) => TemplateId::ImageMulti,
        (MediaKind::Video, ActorCount::Single) => TemplateId::VideoSingle,
        (MediaKind::Video, ActorCount::Multi) => TemplateId::VideoMulti,
    }
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// A (node id, input key) pair addressing one injectable field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeSlot {
    pub node_id: &'static str,
    pub input: &'static str,
}

impl NodeSlot {
    const fn new(node_id: &'static str, input: &'static str) -> Self {
        Self { node_id, input }
    }
}

/// The resource-offload control, located by backend class type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffloadSlot {
    pub class_type: &'static str,
    /// Tried first; used only if it exists and carries `class_type`.
    pub preferred_node_id: &'static str,
    pub input: &'static str,
}

/// Where each semantic field lives in one template variant.
///
/// `media`, `audio`, `prompt`, `width`, `height` and `frame_budget` are
/// required: a template without them fails to load. `secondary_audio` and
/// `offload` are optional: injection is skipped with a warning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSchema {
    pub media: NodeSlot,
    pub audio: NodeSlot,
    pub prompt: NodeSlot,
    pub width: NodeSlot,
    pub height: NodeSlot,
    pub frame_budget: NodeSlot,
    pub secondary_audio: Option<NodeSlot>,
    pub offload: OffloadSlot,
}

impl TemplateSchema {
    /// Required fields with a label for error messages.
    pub fn required_slots(&self) -> [(&'static str, NodeSlot); 6] {
        [
            ("media", self.media),
            ("audio", self.audio),
            ("prompt", self.prompt),
            ("width", self.width),
            ("height", self.height),
            ("frame_budget", self.frame_budget),
        ]
    }
}

// ---------------------------------------------------------------------------
// Templates and instances
// ---------------------------------------------------------------------------

/// A loaded, schema-checked workflow template. Never mutated.
#[derive(Debug, Clone)]
pub struct WorkflowTemplate {
    id: TemplateId,
    schema: TemplateSchema,
    nodes: Map<String, Value>,
}

/// Values injected into a template for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowParameters {
    pub media_path: String,
    pub audio_path: String,
    pub secondary_audio_path: Option<String>,
    pub prompt: String,
    pub width: u32,
    pub height: u32,
    pub frame_budget: u32,
    pub force_offload: Option<bool>,
}

/// A template copy with request values injected, ready for submission.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowInstance {
    pub template: TemplateId,
    graph: Map<String, Value>,
}

impl WorkflowTemplate {
    /// Build a template from parsed JSON and check its required nodes.
    pub fn from_json(id: TemplateId, json: Value) -> Result<Self, CoreError> {
        let Value::Object(nodes) = json else {
            return Err(CoreError::Configuration(format!(
                "template {} must be a JSON object keyed by node id",
                id.file_name()
            )));
        };

        for (node_id, node) in &nodes {
            if node.get("class_type").and_then(Value::as_str).is_none() {
                return Err(CoreError::Configuration(format!(
                    "template {}: node {node_id} has no class_type",
                    id.file_name()
                )));
            }
        }

        let schema = id.schema();
        for (field, slot) in schema.required_slots() {
            let has_inputs = nodes
                .get(slot.node_id)
                .and_then(|node| node.get("inputs"))
                .is_some_and(Value::is_object);
            if !has_inputs {
                return Err(CoreError::Configuration(format!(
                    "template {} is missing required node {} ({field})",
                    id.file_name(),
                    slot.node_id
                )));
            }
        }

        Ok(Self { id, schema, nodes })
    }

    pub fn id(&self) -> TemplateId {
        self.id
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Inject request values into a fresh copy of the graph.
    pub fn parameterize(&self, params: &WorkflowParameters) -> Result<WorkflowInstance, CoreError> {
        let mut graph = self.nodes.clone();
        let schema = &self.schema;
        let file = self.id.file_name();

        set_input(&mut graph, file, schema.media, Value::from(params.media_path.clone()))?;
        set_input(&mut graph, file, schema.audio, Value::from(params.audio_path.clone()))?;
        set_input(&mut graph, file, schema.prompt, Value::from(params.prompt.clone()))?;
        set_input(&mut graph, file, schema.width, Value::from(params.width))?;
        set_input(&mut graph, file, schema.height, Value::from(params.height))?;
        set_input(&mut graph, file, schema.frame_budget, Value::from(params.frame_budget))?;

        if let Some(path) = &params.secondary_audio_path {
            match schema.secondary_audio {
                Some(slot) if graph.contains_key(slot.node_id) => {
                    set_input(&mut graph, file, slot, Value::from(path.clone()))?;
                }
                Some(slot) => {
                    tracing::warn!(
                        template = file,
                        node_id = slot.node_id,
                        "Secondary audio node not in template, skipping injection",
                    );
                }
                None => {
                    tracing::warn!(
                        template = file,
                        "Template has no secondary audio slot, skipping injection",
                    );
                }
            }
        }

        if let Some(offload) = params.force_offload {
            match find_node_by_class(&graph, &schema.offload) {
                Some(node_id) => {
                    tracing::debug!(template = file, node_id = %node_id, offload, "Setting offload flag");
                    set_node_input(
                        &mut graph,
                        file,
                        &node_id,
                        schema.offload.input,
                        Value::from(offload),
                    )?;
                }
                None => {
                    tracing::warn!(
                        template = file,
                        class_type = schema.offload.class_type,
                        "No offload-capable node in template, dropping force_offload",
                    );
                }
            }
        }

        Ok(WorkflowInstance {
            template: self.id,
            graph,
        })
    }
}

impl WorkflowInstance {
    /// The graph as the JSON value submitted to the backend.
    pub fn to_value(&self) -> Value {
        Value::Object(self.graph.clone())
    }

    /// Read back an injected input (mainly for logging and tests).
    pub fn input(&self, node_id: &str, input: &str) -> Option<&Value> {
        self.graph.get(node_id)?.get("inputs")?.get(input)
    }
}

/// Write `value` into `graph[slot.node_id].inputs[slot.input]`.
fn set_input(
    graph: &mut Map<String, Value>,
    template: &str,
    slot: NodeSlot,
    value: Value,
) -> Result<(), CoreError> {
    set_node_input(graph, template, slot.node_id, slot.input, value)
}

fn set_node_input(
    graph: &mut Map<String, Value>,
    template: &str,
    node_id: &str,
    input: &str,
    value: Value,
) -> Result<(), CoreError> {
    let inputs = graph
        .get_mut(node_id)
        .and_then(|node| node.get_mut("inputs"))
        .and_then(Value::as_object_mut)
        .ok_or_else(|| {
            CoreError::Configuration(format!(
                "template {template}: node {node_id} has no inputs map for '{input}'"
            ))
        })?;
    inputs.insert(input.to_string(), value);
    Ok(())
}

/// Locate the offload node: the preferred id when it carries the expected
/// class type, otherwise the first node of that class in graph order.
fn find_node_by_class(graph: &Map<String, Value>, slot: &OffloadSlot) -> Option<String> {
    let class_of = |node: &Value| node.get("class_type").and_then(Value::as_str).map(str::to_owned);

    if let Some(node) = graph.get(slot.preferred_node_id) {
        if class_of(node).as_deref() == Some(slot.class_type) {
            return Some(slot.preferred_node_id.to_string());
        }
    }

    graph
        .iter()
        .find(|(_, node)| class_of(node).as_deref() == Some(slot.class_type))
        .map(|(id, _)| id.clone())
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Loads templates from a directory of well-known file names.
#[derive(Debug, Clone)]
pub struct TemplateStore {
    dir: PathBuf,
}

impl TemplateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_of(&self, id: TemplateId) -> PathBuf {
        self.dir.join(id.file_name())
    }

    /// Read, parse, and schema-check one template.
    pub async fn load(&self, id: TemplateId) -> Result<WorkflowTemplate, CoreError> {
        let path = self.path_of(id);
        let text = tokio::fs::read_to_string(&path).await.map_err(|e| {
            CoreError::Configuration(format!("cannot read template {}: {e}", path.display()))
        })?;
        let json: Value = serde_json::from_str(&text).map_err(|e| {
            CoreError::Configuration(format!("template {} is not valid JSON: {e}", path.display()))
        })?;

        let template = WorkflowTemplate::from_json(id, json)?;
        tracing::debug!(
            template = id.file_name(),
            nodes = template.node_count(),
            "Workflow template loaded",
        );
        Ok(template)
    }
}
