//! Serverless job queue client and poll loop.
//!
//! The queue speaks two webhooks: a GET that hands out the next job (`$ID`
//! is replaced by the worker id) and a POST that takes the job's output
//! (`$ID` is replaced by the job id, `$RUNPOD_POD_ID` by the worker id).

use std::future::Future;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use rvc_relay_core::{ConversionResult, JobOrchestrator};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("queue returned status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("malformed job payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// A job handed out by the queue.
#[derive(Debug, Clone, Deserialize)]
pub struct QueuedJob {
    pub id: String,
    #[serde(default)]
    pub input: Value,
}

#[derive(Debug, Clone)]
pub struct QueueEndpoints {
    pub job_url: String,
    pub output_url: String,
    pub worker_id: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct JobQueue {
    client: Client,
    endpoints: QueueEndpoints,
}

impl JobQueue {
    pub fn new(endpoints: QueueEndpoints) -> Self {
        let client = Client::builder()
            .user_agent(concat!("rvc-relay-worker/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self { client, endpoints }
    }

    fn job_url(&self) -> String {
        self.endpoints.job_url.replace("$ID", &self.endpoints.worker_id)
    }

    fn output_url(&self, job_id: &str) -> String {
        self.endpoints
            .output_url
            .replace("$RUNPOD_POD_ID", &self.endpoints.worker_id)
            .replace("$ID", job_id)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.endpoints.api_key {
            Some(key) => req.header(reqwest::header::AUTHORIZATION, key),
            None => req,
        }
    }

    /// Fetch the next job; `None` when the queue is idle.
    pub async fn next_job(&self) -> Result<Option<QueuedJob>, QueueError> {
        let url = self.job_url();
        let resp = self.authorize(self.client.get(&url)).send().await?;
        match resp.status() {
            StatusCode::NO_CONTENT => return Ok(None),
            s if !s.is_success() => {
                return Err(QueueError::Status {
                    status: s.as_u16(),
                    url,
                });
            }
            _ => {}
        }
        let body = resp.bytes().await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&body)?))
    }

    /// Report a job's result. Failures are results too: `{"output": {"error": ...}}`.
    pub async fn post_result(&self, job_id: &str, result: &ConversionResult) -> Result<(), QueueError> {
        let url = self.output_url(job_id);
        let resp = self
            .authorize(self.client.post(&url))
            .json(&json!({ "output": result }))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(QueueError::Status {
                status: resp.status().as_u16(),
                url,
            });
        }
        Ok(())
    }
}

/// Pull and run jobs until `shutdown` resolves.
///
/// Shutdown is only observed between jobs, so an in-flight job always gets to
/// report its result.
pub async fn poll_loop(
    queue: &JobQueue,
    orchestrator: &JobOrchestrator,
    idle_interval: Duration,
    shutdown: impl Future<Output = ()>,
) {
    tokio::pin!(shutdown);
    info!(worker_id = %queue.endpoints.worker_id, "polling for jobs");

    loop {
        let next = tokio::select! {
            _ = &mut shutdown => break,
            next = queue.next_job() => next,
        };

        let idle = match next {
            Ok(Some(job)) => {
                debug!(job_id = %job.id, "job received");
                let result = orchestrator.run(&job.id, &job.input).await;
                if let Err(e) = queue.post_result(&job.id, &result).await {
                    error!(job_id = %job.id, error = %e, "failed to report job result");
                }
                false
            }
            Ok(None) => true,
            Err(e) => {
                warn!(error = %e, "job fetch failed");
                true
            }
        };

        if idle {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(idle_interval) => {}
            }
        }
    }
    info!("poll loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use rvc_relay_core::engine::{ConversionCall, EngineHandle, VoiceEngine};
    use rvc_relay_core::store::{FsStore, ObjectStore, Stores};
    use rvc_relay_core::{EngineError, RelayConfig};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    #[derive(Clone, Default)]
    struct FakeQueue {
        pending: Arc<Mutex<Vec<Value>>>,
        auth_seen: Arc<Mutex<Vec<String>>>,
        done: Option<mpsc::UnboundedSender<(String, Value)>>,
    }

    async fn take(
        State(q): State<FakeQueue>,
        Path(worker): Path<String>,
        headers: HeaderMap,
    ) -> axum::response::Response {
        assert_eq!(worker, "pod-7");
        if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
            q.auth_seen.lock().unwrap().push(auth.to_owned());
        }
        match q.pending.lock().unwrap().pop() {
            Some(job) => Json(job).into_response(),
            None => AxumStatus::NO_CONTENT.into_response(),
        }
    }

    async fn done(State(q): State<FakeQueue>, Path(job): Path<String>, Json(body): Json<Value>) {
        if let Some(tx) = &q.done {
            let _ = tx.send((job, body));
        }
    }

    async fn serve(queue: FakeQueue) -> String {
        let app = Router::new()
            .route("/job-take/{worker}", get(take))
            .route("/job-done/pod-7/{job}", post(done))
            .with_state(queue);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn queue_for(base: &str) -> JobQueue {
        JobQueue::new(QueueEndpoints {
            job_url: format!("{base}/job-take/$ID"),
            output_url: format!("{base}/job-done/$RUNPOD_POD_ID/$ID"),
            worker_id: "pod-7".into(),
            api_key: Some("secret-key".into()),
        })
    }

    struct StubEngine;

    impl VoiceEngine for StubEngine {
        fn device(&self) -> &str {
            "cpu"
        }

        fn convert(&self, call: &ConversionCall) -> Result<Option<PathBuf>, EngineError> {
            std::fs::write(&call.output_path, b"out").map_err(EngineError::Spawn)?;
            Ok(None)
        }
    }

    fn orchestrator(root: &std::path::Path) -> JobOrchestrator {
        let remote = root.join("remote");
        std::fs::create_dir_all(remote.join("models/v2")).unwrap();
        std::fs::write(remote.join("models/v2/spb.pth"), b"w").unwrap();
        let relay = RelayConfig {
            cache_dir: root.join("cache"),
            work_dir: root.join("work"),
            ..RelayConfig::default()
        };
        let stores = Stores {
            models: Arc::new(FsStore::new(remote)) as Arc<dyn ObjectStore>,
            outputs: None,
        };
        let engine = EngineHandle::with_engine(Arc::new(StubEngine));
        JobOrchestrator::from_config(&relay, stores, Arc::new(engine))
    }

    #[test]
    fn output_url_substitutes_job_and_worker() {
        let q = queue_for("http://q");
        assert_eq!(q.job_url(), "http://q/job-take/pod-7");
        assert_eq!(q.output_url("job-1"), "http://q/job-done/pod-7/job-1");
    }

    #[tokio::test]
    async fn idle_queue_yields_none() {
        let base = serve(FakeQueue::default()).await;
        assert!(queue_for(&base).next_job().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn poll_loop_runs_jobs_and_reports_every_outcome() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let fake = FakeQueue {
            pending: Arc::new(Mutex::new(vec![
                json!({ "id": "bad-job", "input": { "model_id": "spb" } }),
                json!({ "id": "good-job", "input": { "audio_base64": "UklGRg==", "model_id": "spb" } }),
            ])),
            done: Some(tx),
            ..FakeQueue::default()
        };
        let auth_seen = Arc::clone(&fake.auth_seen);
        let base = serve(fake).await;

        let root = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(root.path());
        let queue = queue_for(&base);

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let collector = tokio::spawn(async move {
            let mut reports = Vec::new();
            while reports.len() < 2 {
                match rx.recv().await {
                    Some(report) => reports.push(report),
                    None => break,
                }
            }
            let _ = stop_tx.send(());
            reports
        });

        poll_loop(&queue, &orchestrator, Duration::from_millis(10), async {
            let _ = stop_rx.await;
        })
        .await;

        let reports = collector.await.unwrap();
        let (good_id, good) = &reports[0];
        assert_eq!(good_id, "good-job");
        assert_eq!(good["output"]["audio_base64"], "b3V0");
        assert_eq!(good["output"]["model_id"], "spb");

        let (bad_id, bad) = &reports[1];
        assert_eq!(bad_id, "bad-job");
        assert_eq!(bad["output"], json!({ "error": "audio_base64 is required" }));

        assert!(auth_seen.lock().unwrap().iter().all(|a| a == "secret-key"));
        assert!(!root.path().join("work").read_dir().unwrap().any(|_| true));
    }
}
