//! rvc-relay-worker – serverless job endpoint.
//!
//! `poll` pulls jobs from the queue webhooks until SIGINT/SIGTERM; `run`
//! executes a single job read from a file or stdin and prints its result.

mod config;
mod queue;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rvc_relay_core::engine::{ApplioEngine, EngineHandle, VoiceEngine};
use rvc_relay_core::store::Stores;
use rvc_relay_core::JobOrchestrator;
use serde_json::Value;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use crate::config::Config;
use crate::queue::{JobQueue, QueueEndpoints};

/// Voice-conversion worker for a serverless job queue.
#[derive(Parser)]
#[command(name = "rvc-relay-worker", version = env!("CARGO_PKG_VERSION"), propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Pull jobs from the queue until stopped
    Poll {
        /// Job fetch webhook; `$ID` is replaced by the worker id
        #[arg(long, env = "RUNPOD_WEBHOOK_GET_JOB")]
        job_url: String,

        /// Result webhook; `$ID` is replaced by the job id
        #[arg(long, env = "RUNPOD_WEBHOOK_POST_OUTPUT")]
        output_url: String,

        /// Worker identity reported to the queue
        #[arg(long, env = "RUNPOD_POD_ID", default_value = "local")]
        worker_id: String,

        /// Sent verbatim as the `Authorization` header
        #[arg(long, env = "RUNPOD_AI_API_KEY", hide_env_values = true)]
        api_key: Option<String>,

        /// Pause between polls while the queue is idle
        #[arg(long, env = "RVC_POLL_INTERVAL_MS", default_value_t = 1000)]
        poll_interval_ms: u64,
    },

    /// Run one job and print its result as JSON
    Run {
        /// Job file (`{"id", "input"}` or a bare input object); `-` reads stdin
        #[arg(long, short, default_value = "-")]
        input: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = Config::from_env();
    init_tracing(&cfg);

    info!(version = env!("CARGO_PKG_VERSION"), "rvc-relay-worker starting");

    let stores = Stores::from_config(&cfg.relay.store)?;
    let engine_cfg = cfg.relay.engine.clone();
    let engine = Arc::new(EngineHandle::new(move || {
        ApplioEngine::prepare(&engine_cfg).map(|e| Arc::new(e) as Arc<dyn VoiceEngine>)
    }));
    let orchestrator = JobOrchestrator::from_config(&cfg.relay, stores, engine);

    match cli.command {
        Command::Poll {
            job_url,
            output_url,
            worker_id,
            api_key,
            poll_interval_ms,
        } => {
            let queue = JobQueue::new(QueueEndpoints {
                job_url,
                output_url,
                worker_id,
                api_key,
            });
            queue::poll_loop(
                &queue,
                &orchestrator,
                Duration::from_millis(poll_interval_ms),
                shutdown_signal(),
            )
            .await;
        }
        Command::Run { input } => {
            let job = read_job(&input).await?;
            let (job_id, input) = split_job(job);
            let result = orchestrator.run(&job_id, &input).await;
            println!("{}", serde_json::to_string_pretty(&result.to_json())?);
        }
    }

    info!("rvc-relay-worker stopped");
    Ok(())
}

fn init_tracing(cfg: &Config) {
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match cfg.log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: RVC_LOG='{}' is not a valid tracing filter ({}); \
                     falling back to 'info'",
                    cfg.log_level, e
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };

    // stdout carries the `run` result; logs go to stderr.
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    if cfg.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

async fn read_job(source: &str) -> anyhow::Result<Value> {
    let raw = if source == "-" {
        let mut buf = String::new();
        tokio::io::stdin()
            .read_to_string(&mut buf)
            .await
            .context("reading job from stdin")?;
        buf
    } else {
        let path = PathBuf::from(source);
        tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading job file {}", path.display()))?
    };
    serde_json::from_str(&raw).context("job is not valid JSON")
}

/// Accept either a queue envelope or a bare input object.
fn split_job(job: Value) -> (String, Value) {
    match job {
        Value::Object(mut obj) if obj.contains_key("input") => {
            let id = obj
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or("local")
                .to_owned();
            let input = obj.remove("input").unwrap_or(Value::Null);
            (id, input)
        }
        other => ("local".to_owned(), other),
    }
}

/// Returns a future that resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; finishing current job");
}
