//! Inference engine handle.
//!
//! The engine is expensive to construct (device selection, prerequisite
//! download) and not safe for concurrent conversions. [`EngineHandle`] builds
//! it at most once per process, on first use, and serialises every call into
//! its conversion entry point behind a single execution lock. Validation and
//! model resolution of other jobs keep running while a conversion holds it.

mod applio;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, OnceCell};
use tracing::info;

pub use applio::ApplioEngine;

use crate::error::EngineError;
use crate::job::F0Method;

/// Everything the engine needs for one conversion.
#[derive(Debug, Clone)]
pub struct ConversionCall {
    pub input_path: PathBuf,
    /// The engine is expected to write its result here.
    pub output_path: PathBuf,
    pub model_path: PathBuf,
    pub index_path: Option<PathBuf>,
    pub pitch: i64,
    pub f0_method: F0Method,
    pub index_rate: f64,
    pub filter_radius: i64,
    pub volume_envelope: f64,
    pub protect: f64,
}

/// The external voice-conversion engine.
///
/// `convert` is blocking. A returned path is only a hint: the orchestrator
/// checks the file system for the output.
pub trait VoiceEngine: Send + Sync {
    /// Compute device the engine runs on, e.g. `cuda:0` or `cpu`.
    fn device(&self) -> &str;

    fn convert(&self, call: &ConversionCall) -> Result<Option<PathBuf>, EngineError>;
}

/// Builds the engine. Runs once, on a blocking thread.
pub trait EngineFactory: Send + Sync {
    fn build(&self) -> Result<Arc<dyn VoiceEngine>, EngineError>;
}

impl<F> EngineFactory for F
where
    F: Fn() -> Result<Arc<dyn VoiceEngine>, EngineError> + Send + Sync,
{
    fn build(&self) -> Result<Arc<dyn VoiceEngine>, EngineError> {
        self()
    }
}

/// What a finished conversion reports back.
#[derive(Debug)]
pub struct EngineRun {
    pub output_hint: Option<PathBuf>,
    /// Wall-clock time of the conversion call, excluding lock wait.
    pub elapsed: Duration,
}

/// Lazily-initialised, process-wide engine with serialised invocation.
pub struct EngineHandle {
    factory: Arc<dyn EngineFactory>,
    engine: OnceCell<Arc<dyn VoiceEngine>>,
    exec_lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("device", &self.device())
            .finish()
    }
}

impl EngineHandle {
    pub fn new(factory: impl EngineFactory + 'static) -> Self {
        Self {
            factory: Arc::new(factory),
            engine: OnceCell::new(),
            exec_lock: Arc::new(Mutex::new(())),
        }
    }

    /// A handle around an engine that is already constructed.
    pub fn with_engine(engine: Arc<dyn VoiceEngine>) -> Self {
        let ready = Arc::clone(&engine);
        Self {
            factory: Arc::new(move || Ok::<_, EngineError>(Arc::clone(&ready))),
            engine: OnceCell::new_with(Some(engine)),
            exec_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Return the engine, constructing it on the first call.
    ///
    /// Concurrent first callers wait on the same construction. A failed
    /// construction leaves the handle empty so a later job can retry.
    pub async fn get(&self) -> Result<Arc<dyn VoiceEngine>, EngineError> {
        let engine = self
            .engine
            .get_or_try_init(|| async {
                let factory = Arc::clone(&self.factory);
                info!("constructing inference engine");
                let engine = tokio::task::spawn_blocking(move || factory.build())
                    .await
                    .map_err(|_| EngineError::Panicked)??;
                info!(device = engine.device(), "inference engine ready");
                Ok::<_, EngineError>(engine)
            })
            .await?;
        Ok(Arc::clone(engine))
    }

    /// Device of the constructed engine; `None` before first construction.
    pub fn device(&self) -> Option<String> {
        self.engine.get().map(|e| e.device().to_owned())
    }

    pub fn is_initialized(&self) -> bool {
        self.engine.initialized()
    }

    /// Run one conversion under the global execution lock.
    ///
    /// The lock and `keep_alive` move into the blocking task, so both are held
    /// until the engine returns even if the awaiting future is dropped.
    pub async fn convert<K>(&self, call: ConversionCall, keep_alive: K) -> Result<EngineRun, EngineError>
    where
        K: Send + 'static,
    {
        let engine = self.get().await?;
        let permit = Arc::clone(&self.exec_lock).lock_owned().await;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let _keep_alive = keep_alive;
            let started = Instant::now();
            let output_hint = engine.convert(&call)?;
            Ok::<_, EngineError>(EngineRun {
                output_hint,
                elapsed: started.elapsed(),
            })
        })
        .await
        .map_err(|_| EngineError::Panicked)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct SlowEngine {
        busy: AtomicBool,
        calls: AtomicUsize,
        overlaps: AtomicUsize,
    }

    impl VoiceEngine for SlowEngine {
        fn device(&self) -> &str {
            "cpu"
        }

        fn convert(&self, call: &ConversionCall) -> Result<Option<PathBuf>, EngineError> {
            if self.busy.swap(true, Ordering::SeqCst) {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            std::thread::sleep(Duration::from_millis(40));
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.busy.store(false, Ordering::SeqCst);
            Ok(Some(call.output_path.clone()))
        }
    }

    fn call() -> ConversionCall {
        ConversionCall {
            input_path: "/tmp/in.wav".into(),
            output_path: "/tmp/out.wav".into(),
            model_path: "/m/spb.pth".into(),
            index_path: None,
            pitch: 0,
            f0_method: F0Method::Rmvpe,
            index_rate: 0.75,
            filter_radius: 3,
            volume_envelope: 0.25,
            protect: 0.33,
        }
    }

    fn slow_engine() -> Arc<SlowEngine> {
        Arc::new(SlowEngine {
            busy: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            overlaps: AtomicUsize::new(0),
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_calls_construct_once() {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&builds);
        let handle = Arc::new(EngineHandle::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(30));
            Ok::<_, EngineError>(slow_engine() as Arc<dyn VoiceEngine>)
        }));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let h = Arc::clone(&handle);
            tasks.push(tokio::spawn(async move { h.get().await.map(|_| ()) }));
        }
        for t in tasks {
            t.await.unwrap().unwrap();
        }

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(handle.device().as_deref(), Some("cpu"));
    }

    #[tokio::test]
    async fn failed_construction_is_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let handle = EngineHandle::new(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(EngineError::Construction("no device".into()))
            } else {
                Ok(slow_engine() as Arc<dyn VoiceEngine>)
            }
        });

        assert!(handle.get().await.is_err());
        assert!(!handle.is_initialized());
        assert!(handle.get().await.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn conversions_never_interleave() {
        let engine = slow_engine();
        let handle = Arc::new(EngineHandle::with_engine(engine.clone()));

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let h = Arc::clone(&handle);
            tasks.push(tokio::spawn(async move { h.convert(call(), ()).await }));
        }
        for t in tasks {
            let run = t.await.unwrap().unwrap();
            assert_eq!(run.output_hint, Some(PathBuf::from("/tmp/out.wav")));
            assert!(run.elapsed >= Duration::from_millis(40));
        }

        assert_eq!(engine.calls.load(Ordering::SeqCst), 4);
        assert_eq!(engine.overlaps.load(Ordering::SeqCst), 0);
    }
}
