//! Artifact extraction from `/history/{prompt_id}` responses.

use serde::Deserialize;
use serde_json::Value;

/// One file produced by a video-combine node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ArtifactReference {
    /// Absolute path on the backend's filesystem, when reported.
    #[serde(default)]
    pub fullpath: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub subfolder: String,
    /// Backend folder type (`output`, `temp`).
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    /// MIME-ish format, e.g. `video/h264-mp4`.
    #[serde(default)]
    pub format: Option<String>,
}

impl ArtifactReference {
    /// File extension to use when delivering this artifact.
    pub fn extension(&self) -> &str {
        let name = self
            .fullpath
            .as_deref()
            .or(self.filename.as_deref())
            .unwrap_or_default();
        match name.rsplit_once('.') {
            Some((_, ext)) if !ext.is_empty() && !ext.contains('/') => ext,
            _ => "mp4",
        }
    }
}

/// Extract the artifact list of the first output node (in backend order)
/// that reported a non-empty `gifs` list.
///
/// Accepts both the keyed shape `{prompt_id: {outputs}}` and a bare
/// `{outputs}` entry. Malformed entries are skipped.
pub fn extract_artifacts(history: &Value, prompt_id: &str) -> Vec<ArtifactReference> {
    let outputs = history
        .get(prompt_id)
        .and_then(|entry| entry.get("outputs"))
        .or_else(|| history.get("outputs"))
        .and_then(Value::as_object);

    let Some(outputs) = outputs else {
        return Vec::new();
    };

    for (node_id, output) in outputs {
        let Some(gifs) = output.get("gifs").and_then(Value::as_array) else {
            continue;
        };
        let artifacts: Vec<ArtifactReference> = gifs
            .iter()
            .filter_map(|item| match serde_json::from_value(item.clone()) {
                Ok(artifact) => Some(artifact),
                Err(e) => {
                    tracing::debug!(node_id = %node_id, error = %e, "Skipping malformed artifact entry");
                    None
                }
            })
            .collect();
        if !artifacts.is_empty() {
            tracing::debug!(node_id = %node_id, count = artifacts.len(), "Found output artifacts");
            return artifacts;
        }
    }

    Vec::new()
}
