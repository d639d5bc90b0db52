//! The job entry point: one request in, one result mapping out.
//!
//! [`Orchestrator::handle`] validates the request, materialises its inputs
//! in a per-request scratch directory, sizes the frame budget, builds the
//! workflow graph from the matching template, drives the backend to
//! completion, and delivers the first produced video. Errors never escape;
//! they become an `{error, details}` result. The scratch directory is
//! removed on every path out.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use talkgen_comfyui::driver::ExecutionDriver;
use talkgen_comfyui::history::ArtifactReference;
use talkgen_core::ffmpeg::FfprobeDuration;
use talkgen_core::frame_budget::{estimate_frame_budget, DurationProbe, DEFAULT_FPS};
use talkgen_core::types::{InputKind, JobRequest, ResultFields};
use talkgen_core::workflow::{select_template, TemplateStore, WorkflowParameters};
use talkgen_storage::ObjectStore;
use tempfile::TempDir;

use crate::config::WorkerConfig;
use crate::delivery::OutputDelivery;
use crate::error::JobError;
use crate::input::InputResolver;

/// Local files backing one request.
#[derive(Debug, Clone)]
pub struct ResolvedInputs {
    pub media: PathBuf,
    pub audio: PathBuf,
    pub secondary_audio: Option<PathBuf>,
}

pub struct Orchestrator {
    scratch_root: PathBuf,
    resolver: InputResolver,
    templates: TemplateStore,
    driver: ExecutionDriver,
    delivery: OutputDelivery,
    probe: Arc<dyn DurationProbe>,
}

impl Orchestrator {
    /// Build an orchestrator that probes durations with `ffprobe`.
    pub fn new(config: WorkerConfig, store: Option<Arc<dyn ObjectStore>>) -> Result<Self, JobError> {
        let http = reqwest::Client::new();
        let resolver = InputResolver::new(&config).map_err(|e| {
            JobError::Configuration(format!("Cannot build download client: {e}"))
        })?;

        Ok(Self {
            scratch_root: config.scratch_root.clone(),
            resolver,
            templates: TemplateStore::new(&config.workflow_dir),
            driver: ExecutionDriver::with_client(http, &config.backend, config.driver.clone()),
            delivery: OutputDelivery::new(&config.shared_volume_dir, store),
            probe: Arc::new(FfprobeDuration),
        })
    }

    /// Replace the duration probe.
    pub fn with_probe(mut self, probe: Arc<dyn DurationProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Process one job document and return its result mapping.
    pub async fn handle(&self, job: Value) -> ResultFields {
        match self.process(job).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "Job failed");
                e.into_result()
            }
        }
    }

    async fn process(&self, job: Value) -> Result<ResultFields, JobError> {
        let request = JobRequest::from_value(job)?;
        tracing::info!(
            media_kind = ?request.media_kind,
            actor_count = ?request.actor_count,
            delivery = ?request.delivery,
            width = request.width,
            height = request.height,
            "Job accepted",
        );

        let scratch = self.create_scratch().await?;
        let inputs = self.resolve_inputs(&request, scratch.path()).await?;

        let frame_budget = match request.frame_budget {
            Some(frames) => frames,
            None => {
                estimate_frame_budget(
                    self.probe.as_ref(),
                    &inputs.audio,
                    inputs.secondary_audio.as_deref(),
                    DEFAULT_FPS,
                )
                .await
            }
        };

        let template_id = select_template(request.media_kind, request.actor_count);
        let template = self.templates.load(template_id).await?;
        let instance = template.parameterize(&WorkflowParameters {
            media_path: inputs.media.display().to_string(),
            audio_path: inputs.audio.display().to_string(),
            secondary_audio_path: inputs
                .secondary_audio
                .as_ref()
                .map(|p| p.display().to_string()),
            prompt: request.prompt.clone(),
            width: request.width,
            height: request.height,
            frame_budget,
            force_offload: request.force_offload,
        })?;
        tracing::info!(
            template = template_id.file_name(),
            frame_budget,
            "Workflow prepared",
        );

        let output = self.driver.execute(&instance.to_value()).await?;
        let artifact = output
            .artifacts
            .first()
            .ok_or_else(|| JobError::OutputFetch("backend reported no artifacts".into()))?;
        let local = self.localize(artifact, scratch.path()).await?;

        let result = self
            .delivery
            .deliver(request.delivery, &local, artifact.extension())
            .await?;

        tracing::info!(
            prompt_id = %output.handle.prompt_id,
            client_id = %output.handle.client_id,
            "Job completed",
        );
        Ok(result)
    }

    async fn create_scratch(&self) -> Result<TempDir, JobError> {
        tokio::fs::create_dir_all(&self.scratch_root)
            .await
            .map_err(JobError::Scratch)?;
        let dir = tempfile::Builder::new()
            .prefix("task_")
            .tempdir_in(&self.scratch_root)
            .map_err(JobError::Scratch)?;
        tracing::debug!(scratch = %dir.path().display(), "Scratch directory created");
        Ok(dir)
    }

    async fn resolve_inputs(
        &self,
        request: &JobRequest,
        work_dir: &Path,
    ) -> Result<ResolvedInputs, JobError> {
        let media = self
            .resolver
            .resolve(&request.media, request.media_input_kind(), work_dir)
            .await?;
        let audio = self
            .resolver
            .resolve(&request.audio, InputKind::Audio, work_dir)
            .await?;
        let secondary_audio = match &request.secondary_audio {
            Some(descriptor) => Some(
                self.resolver
                    .resolve(descriptor, InputKind::SecondaryAudio, work_dir)
                    .await?,
            ),
            None => None,
        };

        Ok(ResolvedInputs {
            media,
            audio,
            secondary_audio,
        })
    }

    /// A local path for `artifact`: its reported `fullpath` when readable
    /// here, else a copy fetched through `/view`.
    async fn localize(&self, artifact: &ArtifactReference, work_dir: &Path) -> Result<PathBuf, JobError> {
        if let Some(fullpath) = &artifact.fullpath {
            if tokio::fs::try_exists(fullpath).await.unwrap_or(false) {
                return Ok(PathBuf::from(fullpath));
            }
        }

        let Some(filename) = &artifact.filename else {
            return match &artifact.fullpath {
                // Delivery reports the unreadable path.
                Some(fullpath) => Ok(PathBuf::from(fullpath)),
                None => Err(JobError::OutputFetch(
                    "artifact has neither fullpath nor filename".into(),
                )),
            };
        };

        let folder_type = artifact.kind.as_deref().unwrap_or("output");
        let bytes = self
            .driver
            .api()
            .view(filename, &artifact.subfolder, folder_type)
            .await
            .map_err(|e| JobError::OutputFetch(e.to_string()))?;

        let target = work_dir.join(format!(
            "output_{}.{}",
            uuid::Uuid::new_v4(),
            artifact.extension()
        ));
        tokio::fs::write(&target, &bytes)
            .await
            .map_err(|e| JobError::OutputFetch(e.to_string()))?;

        tracing::info!(
            filename = %filename,
            bytes = bytes.len(),
            "Fetched output through /view",
        );
        Ok(target)
    }
}
