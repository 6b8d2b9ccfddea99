use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, field, info, info_span, warn, Instrument, Span};

use super::request::ConversionRequest;
use super::result::{ConversionOutput, ConversionResult};
use super::scope::{ConversionJob, ScopedFiles};
use crate::cache::ModelCache;
use crate::config::RelayConfig;
use crate::delivery::ResultDelivery;
use crate::engine::{ConversionCall, EngineHandle};
use crate::error::JobError;
use crate::store::Stores;

/// Runs conversion jobs end to end.
///
/// Cheap to share behind an `Arc`; every job is independent apart from the
/// engine's execution lock and the per-model download lock.
#[derive(Debug)]
pub struct JobOrchestrator {
    cache: Arc<ModelCache>,
    engine: Arc<EngineHandle>,
    delivery: ResultDelivery,
    work_dir: PathBuf,
    timeout: Option<Duration>,
}

impl JobOrchestrator {
    pub fn new(
        cache: Arc<ModelCache>,
        engine: Arc<EngineHandle>,
        delivery: ResultDelivery,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            cache,
            engine,
            delivery,
            work_dir: work_dir.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Wire the orchestrator from configuration and already-built stores.
    pub fn from_config(cfg: &RelayConfig, stores: Stores, engine: Arc<EngineHandle>) -> Self {
        let cache = Arc::new(ModelCache::new(
            cfg.cache_dir.clone(),
            cfg.model_versions.clone(),
            stores.models,
        ));
        let delivery = ResultDelivery::from_config(cfg, stores.outputs);
        Self::new(cache, engine, delivery, cfg.work_dir.clone()).with_timeout(cfg.job_timeout)
    }

    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    /// Run one job. Never fails: every error becomes a `{"error": ...}` result.
    pub async fn run(&self, job_id: &str, input: &Value) -> ConversionResult {
        let span = info_span!("job", job_id = %job_id, model_id = field::Empty);
        let outcome = async {
            let attempt = self.try_run(job_id, input);
            match self.timeout {
                Some(limit) => tokio::time::timeout(limit, attempt)
                    .await
                    .unwrap_or(Err(JobError::TimedOut(limit))),
                None => attempt.await,
            }
        }
        .instrument(span.clone())
        .await;

        span.in_scope(|| match &outcome {
            Ok(output) => info!(
                duration_ms = output.duration_ms,
                size = output.output_size,
                uploaded = output.audio_url.is_some(),
                "job finished"
            ),
            Err(e) if e.is_client_error() => warn!(error = %e, "job rejected"),
            Err(e) => error!(error = %e, "job failed"),
        });
        ConversionResult::from(outcome)
    }

    /// The fallible body of [`run`](Self::run).
    ///
    /// Temp files are released when the last holder of the scope drops: here
    /// on every return path, or in the engine task if it is still running.
    pub async fn try_run(&self, job_id: &str, input: &Value) -> Result<ConversionOutput, JobError> {
        let request = ConversionRequest::from_input(input)?;
        Span::current().record("model_id", request.model_id.as_str());
        debug!(
            pitch = request.params.pitch,
            f0_method = %request.params.f0_method,
            bytes = request.audio.len(),
            "request validated"
        );

        let job = ConversionJob::new(&self.work_dir, job_id);
        let files = Arc::new(ScopedFiles::new());
        files.register(&job.input_path);
        files.register(&job.output_path);
        write_input(&job.input_path, &request.audio).await?;

        let asset = self.cache.resolve(&request.model_id).await?;

        let call = ConversionCall {
            input_path: job.input_path.clone(),
            output_path: job.output_path.clone(),
            model_path: asset.model_path.clone(),
            index_path: asset.index_path.clone(),
            pitch: request.params.pitch,
            f0_method: request.params.f0_method,
            index_rate: request.params.index_ratio,
            filter_radius: request.params.filter_radius,
            volume_envelope: request.params.rms_mix_rate,
            protect: request.params.protect,
        };
        let run = self.engine.convert(call, Arc::clone(&files)).await?;
        let duration_ms = u64::try_from(run.elapsed.as_millis()).unwrap_or(u64::MAX);
        info!(duration_ms, "conversion done");

        let output = self.locate_output(&job, run.output_hint, &files).await?;
        let delivered = self.delivery.deliver(&output, &job.tag(), &request.model_id).await?;

        Ok(ConversionOutput {
            audio_base64: delivered.audio_base64,
            audio_url: delivered.audio_url,
            duration_ms,
            model_id: request.model_id,
            output_size: delivered.output_size,
            params: request.params,
        })
    }

    /// The expected output path wins; an engine-reported path is accepted
    /// only inside the work directory and joins the job's scoped files.
    async fn locate_output(
        &self,
        job: &ConversionJob,
        hint: Option<PathBuf>,
        files: &ScopedFiles,
    ) -> Result<PathBuf, JobError> {
        let mut candidate = job.output_path.clone();
        if !is_file(&candidate).await {
            let in_work_dir = |p: &PathBuf| {
                *p != job.input_path && p.parent() == Some(self.work_dir.as_path())
            };
            if let Some(hint) = hint.filter(in_work_dir) {
                files.register(&hint);
                if is_file(&hint).await {
                    debug!(path = %hint.display(), "using engine-reported output path");
                    candidate = hint;
                }
            }
        }

        match tokio::fs::metadata(&candidate).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(candidate),
            Ok(meta) if meta.is_file() => {
                Err(JobError::NoOutputProduced("Output file is empty".into()))
            }
            _ => Err(JobError::NoOutputProduced("No output file created".into())),
        }
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

async fn write_input(path: &Path, audio: &[u8]) -> Result<(), JobError> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| JobError::Internal(format!("cannot create {}: {e}", dir.display())))?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .map_err(|e| JobError::Internal(format!("cannot create {}: {e}", path.display())))?;
    file.write_all(audio).await?;
    file.flush().await?;
    Ok(())
}
