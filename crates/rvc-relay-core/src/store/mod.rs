//! Resource store client: a thin get/put contract over a remote blob store.
//!
//! Model assets are read from `models/{version}/{model_id}.{pth,index}` and
//! conversion results are written to `{prefix}/{job_id}_{model_id}_{random}.wav`.

mod fs;
mod s3;
pub mod sigv4;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::info;

pub use fs::FsStore;
pub use s3::S3Store;

use crate::config::StoreConfig;
use crate::error::StoreError;

/// A key-value blob store.
#[async_trait]
pub trait ObjectStore: Send + Sync + std::fmt::Debug {
    /// Download `key` into `dest`.
    ///
    /// Returns `Ok(false)` when the object does not exist; `dest` may then be
    /// left behind empty and the caller is responsible for removing it.
    async fn get_object(&self, key: &str, dest: &Path) -> Result<bool, StoreError>;

    /// Upload `body` under `key`, overwriting any existing object.
    async fn put_object(&self, key: &str, body: Bytes, content_type: &str)
        -> Result<(), StoreError>;

    /// Public URL under which `key` can be fetched after a successful put.
    fn object_url(&self, key: &str) -> String;
}

/// Key of a model asset: `models/{version}/{model_id}.{ext}`.
pub fn model_key(version: &str, model_id: &str, ext: &str) -> String {
    format!("models/{version}/{model_id}.{ext}")
}

/// Key of an uploaded result: `{prefix}/{job_id}_{model_id}_{random}.wav`.
pub fn output_key(prefix: &str, job_id: &str, model_id: &str) -> String {
    let random = uuid::Uuid::new_v4().simple().to_string();
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("{job_id}_{model_id}_{}.wav", &random[..8])
    } else {
        format!("{prefix}/{job_id}_{model_id}_{}.wav", &random[..8])
    }
}

/// The stores a relay needs: one for model assets, one (optional) for results.
#[derive(Debug, Clone)]
pub struct Stores {
    pub models: Arc<dyn ObjectStore>,
    pub outputs: Option<Arc<dyn ObjectStore>>,
}

impl Stores {
    /// Build the configured backends.
    ///
    /// A local store directory wins over S3 settings; in that mode results are
    /// written under `{local_dir}/{output_bucket or "outputs"}`.
    pub fn from_config(cfg: &StoreConfig) -> Result<Self, StoreError> {
        if let Some(dir) = &cfg.local_dir {
            info!(dir = %dir.display(), "using filesystem object store");
            let models: Arc<dyn ObjectStore> = Arc::new(FsStore::new(dir.join(&cfg.model_bucket)));
            let outputs: Arc<dyn ObjectStore> = Arc::new(FsStore::new(
                dir.join(cfg.output_bucket.as_deref().unwrap_or("outputs")),
            ));
            return Ok(Self {
                models,
                outputs: Some(outputs),
            });
        }

        let client = s3::default_client();
        let models: Arc<dyn ObjectStore> = Arc::new(S3Store::new(
            client.clone(),
            &cfg.model_bucket,
            &cfg.region,
            cfg.endpoint.as_deref(),
            cfg.credentials.clone(),
        )?);
        let outputs = match &cfg.output_bucket {
            Some(bucket) => Some(Arc::new(S3Store::new(
                client,
                bucket,
                &cfg.region,
                cfg.endpoint.as_deref(),
                cfg.credentials.clone(),
            )?) as Arc<dyn ObjectStore>),
            None => None,
        };
        info!(
            model_bucket = %cfg.model_bucket,
            output_bucket = ?cfg.output_bucket,
            region = %cfg.region,
            signed = cfg.credentials.is_some(),
            "using S3 object store"
        );
        Ok(Self { models, outputs })
    }
}

/// Reject keys that could escape a store root or address nothing.
pub(crate) fn check_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty() || key.starts_with('/') {
        return Err(StoreError::InvalidKey(key.to_owned()));
    }
    if key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
        return Err(StoreError::InvalidKey(key.to_owned()));
    }
    Ok(())
}
