//! Result delivery: inline base64, remote upload, or both.
//!
//! | upload        | size < threshold | threshold <= size <= fallback | size > fallback |
//! |---------------|------------------|-------------------------------|-----------------|
//! | succeeded     | url + inline     | url                           | url             |
//! | failed / none | inline           | inline                        | error           |

use std::path::Path;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::error::JobError;
use crate::store::{output_key, ObjectStore};

const CONTENT_TYPE: &str = "audio/wav";

/// What [`ResultDelivery::deliver`] produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    pub audio_base64: Option<String>,
    pub audio_url: Option<String>,
    pub output_size: u64,
}

#[derive(Debug, Clone)]
pub struct ResultDelivery {
    outputs: Option<Arc<dyn ObjectStore>>,
    prefix: String,
    inline_threshold: u64,
    inline_fallback_limit: u64,
}

impl ResultDelivery {
    pub fn new(
        outputs: Option<Arc<dyn ObjectStore>>,
        prefix: impl Into<String>,
        inline_threshold: u64,
        inline_fallback_limit: u64,
    ) -> Self {
        Self {
            outputs,
            prefix: prefix.into(),
            inline_threshold,
            inline_fallback_limit: inline_fallback_limit.max(inline_threshold),
        }
    }

    pub fn from_config(cfg: &RelayConfig, outputs: Option<Arc<dyn ObjectStore>>) -> Self {
        Self::new(
            outputs,
            cfg.output_prefix.clone(),
            cfg.inline_threshold,
            cfg.inline_fallback_limit,
        )
    }

    /// Package the file at `output` for the caller.
    ///
    /// A failed upload is logged and absorbed; the job only fails when the
    /// output is too large to inline and no upload succeeded.
    pub async fn deliver(
        &self,
        output: &Path,
        job_id: &str,
        model_id: &str,
    ) -> Result<Delivered, JobError> {
        let body = tokio::fs::read(output).await.map(Bytes::from).map_err(|e| {
            JobError::Internal(format!("cannot read output {}: {e}", output.display()))
        })?;
        let size = body.len() as u64;

        let audio_url = self.upload(body.clone(), job_id, model_id).await;

        let inline = if size < self.inline_threshold {
            true
        } else {
            audio_url.is_none() && size <= self.inline_fallback_limit
        };

        if audio_url.is_none() && !inline {
            return Err(JobError::Delivery(format!(
                "output of {size} bytes exceeds the inline limit of {} bytes and could not be uploaded",
                self.inline_fallback_limit
            )));
        }
        if inline && size >= self.inline_threshold {
            warn!(size, threshold = self.inline_threshold, "inlining oversized output after failed upload");
        }

        let audio_base64 = inline.then(|| STANDARD.encode(&body));
        debug!(size, inline, uploaded = audio_url.is_some(), "result packaged");
        Ok(Delivered {
            audio_base64,
            audio_url,
            output_size: size,
        })
    }

    async fn upload(&self, body: Bytes, job_id: &str, model_id: &str) -> Option<String> {
        let Some(store) = &self.outputs else {
            debug!("no output store configured; skipping upload");
            return None;
        };
        let key = output_key(&self.prefix, job_id, model_id);
        match store.put_object(&key, body, CONTENT_TYPE).await {
            Ok(()) => {
                let url = store.object_url(&key);
                info!(key = %key, "result uploaded");
                Some(url)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "result upload failed; falling back to inline delivery");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use crate::error::StoreError;
    use crate::store::FsStore;
    use async_trait::async_trait;

    #[derive(Debug)]
    struct BrokenStore;

    #[async_trait]
    impl ObjectStore for BrokenStore {
        async fn get_object(&self, _key: &str, _dest: &Path) -> Result<bool, StoreError> {
            Ok(false)
        }

        async fn put_object(&self, key: &str, _body: Bytes, _ct: &str) -> Result<(), StoreError> {
            Err(StoreError::Status {
                status: 503,
                key: key.to_owned(),
            })
        }

        fn object_url(&self, key: &str) -> String {
            format!("broken://{key}")
        }
    }

    fn output_of(dir: &Path, size: usize) -> std::path::PathBuf {
        let path = dir.join("out.wav");
        std::fs::write(&path, vec![7u8; size]).unwrap();
        path
    }

    #[tokio::test]
    async fn small_output_gets_both_channels() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(FsStore::new(dir.path().join("bucket")));
        let delivery = ResultDelivery::new(Some(store), "outputs", 100, 1000);

        let out = output_of(dir.path(), 10);
        let d = delivery.deliver(&out, "job1", "spb").await.unwrap();
        assert_eq!(d.output_size, 10);
        assert_eq!(STANDARD.decode(d.audio_base64.unwrap()).unwrap(), vec![7u8; 10]);
        assert!(d.audio_url.unwrap().contains("outputs/job1_spb_"));
    }

    #[tokio::test]
    async fn threshold_sized_output_is_url_only() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(FsStore::new(dir.path().join("bucket")));
        let delivery = ResultDelivery::new(Some(store), "outputs", 100, 1000);

        let d = delivery.deliver(&output_of(dir.path(), 100), "job2", "spb").await.unwrap();
        assert!(d.audio_base64.is_none());
        assert!(d.audio_url.is_some());
    }

    #[tokio::test]
    async fn failed_upload_falls_back_to_inline_up_to_the_limit() {
        let dir = tempfile::tempdir().unwrap();
        let delivery = ResultDelivery::new(Some(Arc::new(BrokenStore)), "outputs", 100, 1000);

        let d = delivery.deliver(&output_of(dir.path(), 500), "job3", "spb").await.unwrap();
        assert!(d.audio_url.is_none());
        assert_eq!(STANDARD.decode(d.audio_base64.unwrap()).unwrap().len(), 500);

        let err = delivery
            .deliver(&output_of(dir.path(), 1001), "job3", "spb")
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Delivery(_)));
    }

    #[tokio::test]
    async fn no_output_store_means_inline_only() {
        let dir = tempfile::tempdir().unwrap();
        let delivery = ResultDelivery::new(None, "outputs", 100, 100);
        let d = delivery.deliver(&output_of(dir.path(), 99), "job4", "spb").await.unwrap();
        assert!(d.audio_url.is_none());
        assert!(d.audio_base64.is_some());

        let err = delivery.deliver(&output_of(dir.path(), 101), "job4", "spb").await;
        assert!(err.is_err());
    }
}
