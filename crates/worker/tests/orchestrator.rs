//! End-to-end job handling against an in-process mock ComfyUI.

mod common;

use std::path::PathBuf;
use std::sync::Arc;

use assert_matches::assert_matches;
use base64::Engine as _;
use common::{test_config, FixedDuration, MockComfy, Outcome, TestDirs, ASSET_BYTES, VIDEO_BYTES};
use serde_json::{json, Value};
use talkgen_core::types::ResultFields;
use talkgen_storage::LocalObjectStore;
use talkgen_worker::config::WorkerConfig;
use talkgen_worker::handler::Orchestrator;

fn orchestrator(config: WorkerConfig) -> Orchestrator {
    Orchestrator::new(config, None)
        .unwrap()
        .with_probe(Arc::new(FixedDuration(2.0)))
}

async fn image_job(dirs: &TestDirs, extra: Value) -> Value {
    let mut input = json!({
        "input_type": "image",
        "person_count": "single",
        "prompt": "A woman explaining the weather",
        "width": 640,
        "height": 360,
        "image_path": dirs.input_file("face.png", b"png-bytes").await,
        "wav_path": dirs.input_file("voice.wav", b"wav-bytes").await,
    });
    if let (Some(base), Some(extra)) = (input.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            base.insert(k.clone(), v.clone());
        }
    }
    json!({ "input": input })
}

fn error_message(result: &ResultFields) -> &str {
    match result {
        ResultFields::Error { error, .. } => error,
        other => panic!("expected an error result, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Successful jobs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn inline_delivery_returns_base64_video() {
    let mock = MockComfy::start(Outcome::VideoAtFullpath).await;
    let dirs = TestDirs::new().await;
    let worker = orchestrator(test_config(&mock.host(), &dirs));

    let job = image_job(&dirs, json!({})).await;
    let result = worker.handle(job).await;

    let ResultFields::Video { video } = result else {
        panic!("expected inline video, got {result:?}");
    };
    let decoded = base64::engine::general_purpose::STANDARD.decode(video).unwrap();
    assert_eq!(decoded, VIDEO_BYTES);
    assert_eq!(dirs.scratch_entries(), 0);
}

#[tokio::test]
async fn submitted_graph_carries_request_values() {
    let mock = MockComfy::start(Outcome::VideoAtFullpath).await;
    let dirs = TestDirs::new().await;
    let worker = orchestrator(test_config(&mock.host(), &dirs));

    let job = image_job(&dirs, json!({"force_offload": false})).await;
    let image_path = job["input"]["image_path"].clone();
    let result = worker.handle(job).await;
    assert!(!result.is_error(), "{result:?}");

    let submissions = mock.submissions();
    assert_eq!(submissions.len(), 1);
    let (client_id, graph) = &submissions[0];
    assert!(uuid::Uuid::parse_str(client_id).is_ok());
    assert_eq!(graph["284"]["inputs"]["image"], image_path);
    assert_eq!(graph["241"]["inputs"]["positive_prompt"], "A woman explaining the weather");
    assert_eq!(graph["245"]["inputs"]["value"], 640);
    assert_eq!(graph["246"]["inputs"]["value"], 360);
    // 2 s of audio at 25 fps plus padding.
    assert_eq!(graph["270"]["inputs"]["value"], 131);
    assert_eq!(graph["128"]["inputs"]["force_offload"], false);
}

#[tokio::test]
async fn explicit_frame_budget_skips_estimation() {
    let mock = MockComfy::start(Outcome::VideoAtFullpath).await;
    let dirs = TestDirs::new().await;
    let worker = orchestrator(test_config(&mock.host(), &dirs));

    let result = worker.handle(image_job(&dirs, json!({"max_frame": 97})).await).await;
    assert!(!result.is_error(), "{result:?}");
    assert_eq!(mock.submissions()[0].1["270"]["inputs"]["value"], 97);
}

#[tokio::test]
async fn each_job_uses_a_fresh_session_id() {
    let mock = MockComfy::start(Outcome::VideoAtFullpath).await;
    let dirs = TestDirs::new().await;
    let worker = orchestrator(test_config(&mock.host(), &dirs));

    for _ in 0..2 {
        let result = worker.handle(image_job(&dirs, json!({})).await).await;
        assert!(!result.is_error(), "{result:?}");
    }

    let submissions = mock.submissions();
    assert_eq!(submissions.len(), 2);
    assert_ne!(submissions[0].0, submissions[1].0);
}

#[tokio::test]
async fn shared_volume_copy_has_same_length() {
    let mock = MockComfy::start(Outcome::VideoAtFullpath).await;
    let dirs = TestDirs::new().await;
    let worker = orchestrator(test_config(&mock.host(), &dirs));

    let result = worker
        .handle(image_job(&dirs, json!({"network_volume": true})).await)
        .await;

    let ResultFields::VideoPath { video_path } = result else {
        panic!("expected a shared-volume path, got {result:?}");
    };
    let copied = PathBuf::from(video_path);
    assert!(copied.starts_with(dirs.shared_volume()));
    assert_eq!(
        std::fs::metadata(&copied).unwrap().len(),
        VIDEO_BYTES.len() as u64
    );
}

#[tokio::test]
async fn view_fallback_feeds_object_storage() {
    let mock = MockComfy::start(Outcome::VideoViaView).await;
    let dirs = TestDirs::new().await;
    let bucket = dirs.root.path().join("bucket");
    let store = LocalObjectStore::new(&bucket, "/runpod-volume");
    let worker = Orchestrator::new(test_config(&mock.host(), &dirs), Some(Arc::new(store)))
        .unwrap()
        .with_probe(Arc::new(FixedDuration(1.0)));

    let result = worker
        .handle(image_job(&dirs, json!({"delivery": "object_storage"})).await)
        .await;

    let ResultFields::VideoPath { video_path } = result else {
        panic!("expected a storage path, got {result:?}");
    };
    let key = video_path
        .strip_prefix("/runpod-volume/")
        .expect("path under the volume mount");
    assert!(key.starts_with("output/infinitetalk/"));
    assert_eq!(std::fs::read(bucket.join(key)).unwrap(), VIDEO_BYTES);
    assert_eq!(dirs.scratch_entries(), 0);
}

#[tokio::test]
async fn url_inline_and_default_inputs_resolve() {
    let mock = MockComfy::start(Outcome::VideoAtFullpath).await;
    let dirs = TestDirs::new().await;
    let worker = orchestrator(test_config(&mock.host(), &dirs));

    let job = json!({
        "input_type": "image",
        "person_count": "multi",
        "wav_url": mock.asset_url("voice.wav"),
        "wav_base64_2": base64::engine::general_purpose::STANDARD.encode(ASSET_BYTES),
    });
    let result = worker.handle(job).await;
    assert!(!result.is_error(), "{result:?}");

    let graph = &mock.submissions()[0].1;
    let sample_image = dirs.samples().join("image.jpg").display().to_string();
    assert_eq!(graph["284"]["inputs"]["image"], sample_image.as_str());

    let audio = graph["125"]["inputs"]["audio"].as_str().unwrap();
    assert!(audio.ends_with(".wav"), "{audio}");
    let second = graph["307"]["inputs"]["audio"].as_str().unwrap();
    assert!(second.contains("audio_2_"), "{second}");
    // Scratch files are gone once the job has finished.
    assert!(!std::path::Path::new(audio).exists());
    assert_eq!(dirs.scratch_entries(), 0);
}

#[tokio::test]
async fn legacy_template_when_no_dimensions_given() {
    let mock = MockComfy::start(Outcome::VideoAtFullpath).await;
    let dirs = TestDirs::new().await;
    let worker = orchestrator(test_config(&mock.host(), &dirs));

    let job = json!({"wav_path": dirs.input_file("voice.wav", b"wav").await});
    let result = worker.handle(job).await;
    assert!(!result.is_error(), "{result:?}");
    assert!(mock.submissions()[0].1.get("284").is_some());
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unreachable_backend_is_one_error_and_scratch_is_removed() {
    let dirs = TestDirs::new().await;
    let worker = orchestrator(test_config("127.0.0.1:1", &dirs));

    let result = worker.handle(image_job(&dirs, json!({})).await).await;

    assert!(error_message(&result).contains("unreachable after 3 attempts"));
    assert_eq!(dirs.scratch_entries(), 0);
}

#[tokio::test]
async fn empty_outputs_are_no_artifact_error() {
    let mock = MockComfy::start(Outcome::NoOutputs).await;
    let dirs = TestDirs::new().await;
    let worker = orchestrator(test_config(&mock.host(), &dirs));

    let result = worker.handle(image_job(&dirs, json!({})).await).await;
    assert!(error_message(&result).contains("without producing a video"));
}

#[tokio::test]
async fn execution_error_becomes_details() {
    let mock = MockComfy::start(Outcome::ExecutionError).await;
    let dirs = TestDirs::new().await;
    let worker = orchestrator(test_config(&mock.host(), &dirs));

    let result = worker.handle(image_job(&dirs, json!({})).await).await;
    assert_matches!(
        result,
        ResultFields::Error { details: Some(details), .. } if details.contains("Allocation on device")
    );
}

#[tokio::test]
async fn stream_closed_before_completion_is_aborted() {
    let mock = MockComfy::start(Outcome::AbortStream).await;
    let dirs = TestDirs::new().await;
    let worker = orchestrator(test_config(&mock.host(), &dirs));

    let result = worker.handle(image_job(&dirs, json!({})).await).await;
    assert!(error_message(&result).contains("ended early"));
    assert_eq!(dirs.scratch_entries(), 0);
}

#[tokio::test]
async fn refused_event_stream_is_one_connect_error() {
    let mock = MockComfy::start(Outcome::NoEventStream).await;
    let dirs = TestDirs::new().await;
    let worker = orchestrator(test_config(&mock.host(), &dirs));

    let result = worker.handle(image_job(&dirs, json!({})).await).await;

    let message = error_message(&result);
    assert!(message.starts_with("Could not open event stream"), "{message}");
    assert!(message.contains("after 3 attempts"), "{message}");
    assert!(mock.submissions().is_empty());
    assert_eq!(dirs.scratch_entries(), 0);
}

#[tokio::test]
async fn rejected_graph_is_submission_error() {
    let mock = MockComfy::start(Outcome::RejectPrompt).await;
    let dirs = TestDirs::new().await;
    let worker = orchestrator(test_config(&mock.host(), &dirs));

    let result = worker.handle(image_job(&dirs, json!({})).await).await;

    let message = error_message(&result);
    assert!(message.starts_with("Workflow submission rejected"), "{message}");
    assert!(message.contains("400"), "{message}");
    assert!(message.contains("Image not found"), "{message}");
    assert_eq!(dirs.scratch_entries(), 0);
}

#[tokio::test]
async fn answer_without_prompt_id_is_submission_error() {
    let mock = MockComfy::start(Outcome::NoPromptId).await;
    let dirs = TestDirs::new().await;
    let worker = orchestrator(test_config(&mock.host(), &dirs));

    let result = worker.handle(image_job(&dirs, json!({})).await).await;

    let message = error_message(&result);
    assert!(message.starts_with("Workflow submission rejected"), "{message}");
    assert!(message.contains("no prompt_id"), "{message}");
    assert_eq!(dirs.scratch_entries(), 0);
}

#[tokio::test]
async fn invalid_dimensions_are_rejected_before_contacting_backend() {
    let mock = MockComfy::start(Outcome::VideoAtFullpath).await;
    let dirs = TestDirs::new().await;
    let worker = orchestrator(test_config(&mock.host(), &dirs));

    let result = worker
        .handle(image_job(&dirs, json!({"width": 10})).await)
        .await;
    assert!(error_message(&result).starts_with("Invalid input"));
    assert!(mock.submissions().is_empty());
}

#[tokio::test]
async fn failed_download_is_input_error() {
    let mock = MockComfy::start(Outcome::VideoAtFullpath).await;
    let dirs = TestDirs::new().await;
    let worker = orchestrator(test_config(&mock.host(), &dirs));

    let missing = worker
        .handle(image_job(&dirs, json!({"wav_path": "", "wav_url": mock.asset_url("missing.wav")})).await)
        .await;
    assert!(error_message(&missing).contains("Failed to download audio"));

    let empty = worker
        .handle(image_job(&dirs, json!({"wav_path": "", "wav_url": mock.asset_url("empty.wav")})).await)
        .await;
    assert!(error_message(&empty).contains("is empty"));
    assert!(mock.submissions().is_empty());
}

#[tokio::test]
async fn malformed_inline_input_is_decode_error() {
    let dirs = TestDirs::new().await;
    let worker = orchestrator(test_config("127.0.0.1:1", &dirs));

    let result = worker
        .handle(json!({"image_base64": "@@not-base64@@"}))
        .await;
    assert!(error_message(&result).contains("decode inline image"));
}

#[tokio::test]
async fn missing_template_is_configuration_error() {
    let mock = MockComfy::start(Outcome::VideoAtFullpath).await;
    let dirs = TestDirs::new().await;
    let mut config = test_config(&mock.host(), &dirs);
    config.workflow_dir = dirs.root.path().join("no-templates");
    let worker = orchestrator(config);

    let result = worker.handle(image_job(&dirs, json!({})).await).await;
    assert!(error_message(&result).starts_with("Configuration error"));
    assert!(mock.submissions().is_empty());
    assert_eq!(dirs.scratch_entries(), 0);
}
