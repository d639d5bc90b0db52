//! Job request, input descriptor, and result types.
//!
//! A raw [`JobInput`] is what the job runtime hands us (the `input` map of
//! a serverless job). [`JobRequest::from_input`] validates it once and
//! resolves every logical input into a tagged [`InputDescriptor`], so the
//! rest of the pipeline never re-inspects which keys were present.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::CoreError;

/// Prompt used when the caller does not supply one.
pub const DEFAULT_PROMPT: &str = "A person talking naturally";
/// Output width used when the caller does not supply one.
pub const DEFAULT_WIDTH: u32 = 512;
/// Output height used when the caller does not supply one.
pub const DEFAULT_HEIGHT: u32 = 512;

// ---------------------------------------------------------------------------
// Request dimensions
// ---------------------------------------------------------------------------

/// Kind of the conditioning media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

/// Number of speaking actors (one or two audio tracks).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorCount {
    Single,
    Multi,
}

/// How the finished artifact is handed back to the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Base64 payload in the result (`{"video": ...}`).
    #[default]
    Inline,
    /// Copy onto the shared network volume (`{"video_path": ...}`).
    SharedVolume,
    /// Upload through the object store (`{"video_path": ...}`).
    ObjectStorage,
}

// ---------------------------------------------------------------------------
// Input descriptors
// ---------------------------------------------------------------------------

/// The logical input slot a descriptor feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputKind {
    Image,
    Video,
    Audio,
    SecondaryAudio,
}

impl InputKind {
    /// Short label used in file names and log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::SecondaryAudio => "audio_2",
        }
    }

    /// Extension given to decoded inline payloads.
    pub fn default_extension(self) -> &'static str {
        match self {
            Self::Image => "jpg",
            Self::Video => "mp4",
            Self::Audio | Self::SecondaryAudio => "mp3",
        }
    }

    /// File name of the built-in sample asset substituted when the caller
    /// supplies nothing for this slot.
    pub fn sample_file_name(self) -> &'static str {
        match self {
            Self::Image => "image.jpg",
            Self::Video => "video.mp4",
            Self::Audio | Self::SecondaryAudio => "audio.mp3",
        }
    }
}

/// Where the bytes of one logical input come from.
///
/// Precedence when several keys are present: `Path` > `Url` > `Inline`,
/// and `Default` only when none is given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputDescriptor {
    /// Already-accessible local path.
    Path(String),
    /// Remote URL to download.
    Url(String),
    /// Base64-encoded payload.
    Inline(String),
    /// Built-in sample asset.
    Default,
}

impl InputDescriptor {
    /// Build a descriptor from the three optional request keys of one slot.
    ///
    /// Empty or whitespace-only strings count as absent.
    pub fn from_fields(path: Option<String>, url: Option<String>, inline: Option<String>) -> Self {
        fn present(value: Option<String>) -> Option<String> {
            value.filter(|s| !s.trim().is_empty())
        }

        if let Some(path) = present(path) {
            Self::Path(path)
        } else if let Some(url) = present(url) {
            Self::Url(url)
        } else if let Some(data) = present(inline) {
            Self::Inline(data)
        } else {
            Self::Default
        }
    }

    /// Variant name for log fields.
    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::Path(_) => "path",
            Self::Url(_) => "url",
            Self::Inline(_) => "inline",
            Self::Default => "default",
        }
    }
}

// ---------------------------------------------------------------------------
// Raw job input
// ---------------------------------------------------------------------------

/// The job's `input` map exactly as submitted. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
pub struct JobInput {
    pub input_type: Option<MediaKind>,
    pub person_count: Option<ActorCount>,
    pub prompt: Option<String>,
    #[validate(range(min = 64, max = 4096))]
    pub width: Option<u32>,
    #[validate(range(min = 64, max = 4096))]
    pub height: Option<u32>,
    #[validate(range(min = 1))]
    pub max_frame: Option<u32>,

    pub image_path: Option<String>,
    pub image_url: Option<String>,
    pub image_base64: Option<String>,
    pub video_path: Option<String>,
    pub video_url: Option<String>,
    pub video_base64: Option<String>,
    pub wav_path: Option<String>,
    pub wav_url: Option<String>,
    pub wav_base64: Option<String>,
    pub wav_path_2: Option<String>,
    pub wav_url_2: Option<String>,
    pub wav_base64_2: Option<String>,

    /// Backend resource-offload hint.
    pub force_offload: Option<bool>,
    /// Legacy switch for shared-volume delivery.
    pub network_volume: Option<bool>,
    /// Explicit delivery mode; wins over `network_volume`.
    pub delivery: Option<DeliveryMode>,
}

// ---------------------------------------------------------------------------
// Validated request
// ---------------------------------------------------------------------------

/// A validated, immutable generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    /// `None` together with `actor_count == None` selects the legacy template.
    pub media_kind: Option<MediaKind>,
    pub actor_count: Option<ActorCount>,
    pub media: InputDescriptor,
    pub audio: InputDescriptor,
    /// Present only for multi-actor requests.
    pub secondary_audio: Option<InputDescriptor>,
    pub prompt: String,
    pub width: u32,
    pub height: u32,
    /// Explicit frame budget; estimated from audio when absent.
    pub frame_budget: Option<u32>,
    pub force_offload: Option<bool>,
    pub delivery: DeliveryMode,
}

impl JobRequest {
    /// Parse and validate a job document.
    ///
    /// Accepts either the full job envelope (`{"input": {...}}`) or the bare
    /// input map.
    pub fn from_value(value: serde_json::Value) -> Result<Self, CoreError> {
        let input_value = match value {
            serde_json::Value::Object(mut map) if map.contains_key("input") => map
                .remove("input")
                .unwrap_or(serde_json::Value::Null),
            other => other,
        };

        if !input_value.is_object() {
            return Err(CoreError::Validation(
                "job input must be a JSON object".to_string(),
            ));
        }

        let input: JobInput = serde_json::from_value(input_value)
            .map_err(|e| CoreError::Validation(format!("malformed job input: {e}")))?;

        Self::from_input(input)
    }

    /// Validate a raw input map and resolve its descriptors.
    pub fn from_input(input: JobInput) -> Result<Self, CoreError> {
        input
            .validate()
            .map_err(|e| CoreError::Validation(e.to_string()))?;

        let media = match input.input_type.unwrap_or(MediaKind::Image) {
            MediaKind::Image => {
                InputDescriptor::from_fields(input.image_path, input.image_url, input.image_base64)
            }
            MediaKind::Video => {
                InputDescriptor::from_fields(input.video_path, input.video_url, input.video_base64)
            }
        };

        let audio = InputDescriptor::from_fields(input.wav_path, input.wav_url, input.wav_base64);

        let secondary_audio = match input.person_count {
            Some(ActorCount::Multi) => Some(InputDescriptor::from_fields(
                input.wav_path_2,
                input.wav_url_2,
                input.wav_base64_2,
            )),
            _ => None,
        };

        let delivery = match (input.delivery, input.network_volume) {
            (Some(mode), _) => mode,
            (None, Some(true)) => DeliveryMode::SharedVolume,
            (None, _) => DeliveryMode::Inline,
        };

        let prompt = input
            .prompt
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PROMPT.to_string());

        Ok(Self {
            media_kind: input.input_type,
            actor_count: input.person_count,
            media,
            audio,
            secondary_audio,
            prompt,
            width: input.width.unwrap_or(DEFAULT_WIDTH),
            height: input.height.unwrap_or(DEFAULT_HEIGHT),
            frame_budget: input.max_frame,
            force_offload: input.force_offload,
            delivery,
        })
    }

    /// Media kind with the image default applied.
    pub fn effective_media_kind(&self) -> MediaKind {
        self.media_kind.unwrap_or(MediaKind::Image)
    }

    /// Input slot of the primary media.
    pub fn media_input_kind(&self) -> InputKind {
        match self.effective_media_kind() {
            MediaKind::Image => InputKind::Image,
            MediaKind::Video => InputKind::Video,
        }
    }
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

/// The mapping returned to the job runtime. Exactly one shape per job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultFields {
    Video {
        video: String,
    },
    VideoPath {
        video_path: String,
    },
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
}

impl ResultFields {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}
