//! `talkgen-worker` -- runs one talking-video generation job.
//!
//! Reads a job document, drives the local ComfyUI instance through the
//! matching workflow, and prints the result mapping as JSON on stdout.
//! Logs go to stderr.
//!
//! # Environment variables
//!
//! | Variable         | Required | Default | Description                          |
//! |------------------|----------|---------|--------------------------------------|
//! | `JOB_INPUT_PATH` | no       | --      | File holding the job JSON; stdin when unset |
//! | `RUST_LOG`       | no       | `talkgen_worker=info,talkgen_comfyui=info` | Log filter |
//!
//! See [`talkgen_worker::config::WorkerConfig::from_env`] for the rest.

use std::sync::Arc;

use anyhow::Context;
use talkgen_core::types::ResultFields;
use talkgen_storage::{ObjectStore, S3ObjectStore};
use talkgen_worker::config::WorkerConfig;
use talkgen_worker::handler::Orchestrator;
use tokio::io::AsyncReadExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "talkgen_worker=info,talkgen_comfyui=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = WorkerConfig::from_env().context("invalid worker configuration")?;
    tracing::info!(
        backend = %config.backend.api_url(),
        workflow_dir = %config.workflow_dir.display(),
        object_storage = config.s3.is_some(),
        "Starting talkgen-worker",
    );

    let store: Option<Arc<dyn ObjectStore>> = match &config.s3 {
        Some(settings) => Some(Arc::new(S3ObjectStore::connect(settings).await)),
        None => None,
    };

    let orchestrator = Orchestrator::new(config, store)?;

    let result = match read_job().await {
        Ok(job) => orchestrator.handle(job).await,
        Err(e) => {
            tracing::error!(error = ?e, "Could not read job document");
            ResultFields::Error {
                error: format!("Could not read job document: {e:#}"),
                details: None,
            }
        }
    };

    println!("{}", serde_json::to_string(&result)?);

    if result.is_error() {
        std::process::exit(1);
    }
    Ok(())
}

async fn read_job() -> anyhow::Result<serde_json::Value> {
    let text = match std::env::var("JOB_INPUT_PATH") {
        Ok(path) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading {path}"))?,
        Err(_) => {
            let mut buf = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buf)
                .await
                .context("reading stdin")?;
            buf
        }
    };
    serde_json::from_str(&text).context("job document is not valid JSON")
}
