//! Model cache resolver.
//!
//! Maps a model id to a local `(model file, optional index file)` pair. The
//! local cache directory is authoritative: a hit costs two `stat` calls and
//! never touches the network. A miss walks the configured store versions in
//! order and the first version holding `{model_id}.pth` wins.
//!
//! Entries are written once and never evicted or rewritten.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::error::{JobError, StoreError};
use crate::store::{model_key, ObjectStore};

const MODEL_EXT: &str = "pth";
const INDEX_EXT: &str = "index";
const PART_EXT: &str = "part";
const MAX_MODEL_ID_LEN: usize = 128;

type DownloadLocks = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// A model that is available on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelAsset {
    pub model_id: String,
    pub model_path: PathBuf,
    /// `None` when the model was published without an index.
    pub index_path: Option<PathBuf>,
}

impl ModelAsset {
    /// Index path as the engine expects it: empty string means "no index".
    pub fn index_arg(&self) -> String {
        self.index_path
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Entry of [`ModelCache::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct CachedModel {
    pub id: String,
    /// Human-readable name derived from the id (`kj_yesudas` → `Kj Yesudas`).
    pub name: String,
    pub has_index: bool,
}

/// Resolves model ids against the local cache, downloading on miss.
#[derive(Debug)]
pub struct ModelCache {
    dir: PathBuf,
    versions: Vec<String>,
    store: Arc<dyn ObjectStore>,
    /// One download lock per model id; jobs needing the same uncached model
    /// wait for the first download and then take the cache-hit path.
    downloads: DownloadLocks,
}

impl ModelCache {
    pub fn new(dir: impl Into<PathBuf>, versions: Vec<String>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            dir: dir.into(),
            versions,
            store,
            downloads: Mutex::new(HashMap::new()),
        }
    }

    fn model_path(&self, model_id: &str) -> PathBuf {
        self.dir.join(format!("{model_id}.{MODEL_EXT}"))
    }

    fn index_path(&self, model_id: &str) -> PathBuf {
        self.dir.join(format!("{model_id}.{INDEX_EXT}"))
    }

    /// Cache-hit check: filesystem only, no network.
    pub fn lookup(&self, model_id: &str) -> Option<ModelAsset> {
        let model_path = self.model_path(model_id);
        if !model_path.is_file() {
            return None;
        }
        Some(ModelAsset {
            model_id: model_id.to_owned(),
            model_path,
            index_path: self.cached_index(model_id),
        })
    }

    /// Whether an index asset is cached for `model_id`.
    pub fn cached_index(&self, model_id: &str) -> Option<PathBuf> {
        let index_path = self.index_path(model_id);
        index_path.is_file().then_some(index_path)
    }

    /// Resolve `model_id` to local files, downloading on a cache miss.
    ///
    /// # Errors
    ///
    /// [`JobError::Validation`] for a malformed id, [`JobError::ModelNotFound`]
    /// when no version yields the model file, [`JobError::Internal`] when the
    /// cache directory cannot be created or a download cannot be moved into it.
    pub async fn resolve(&self, model_id: &str) -> Result<ModelAsset, JobError> {
        validate_model_id(model_id)?;

        if let Some(asset) = self.lookup(model_id) {
            debug!(model_id, "model cache hit");
            return Ok(asset);
        }

        let _slot = self.download_slot(model_id).await;

        // Another job may have finished the download while we waited.
        if let Some(asset) = self.lookup(model_id) {
            debug!(model_id, "model cached by concurrent job");
            return Ok(asset);
        }

        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            JobError::Internal(format!(
                "cannot create model cache dir {}: {e}",
                self.dir.display()
            ))
        })?;

        info!(model_id, versions = ?self.versions, "model cache miss; downloading");

        let model_path = self.model_path(model_id);
        for version in &self.versions {
            let key = model_key(version, model_id, MODEL_EXT);
            match self.download(&key, &model_path).await {
                Ok(Some(part)) => {
                    info!(model_id, %version, "model downloaded");
                    // The model goes live last: a visible `.pth` means the
                    // index step is over and the cache-hit path sees both.
                    self.fetch_index(version, model_id).await;
                    self.publish(&part, &model_path).await.map_err(|e| {
                        JobError::Internal(format!("cannot store model {model_id}: {e}"))
                    })?;
                    return Ok(ModelAsset {
                        model_id: model_id.to_owned(),
                        model_path,
                        index_path: self.cached_index(model_id),
                    });
                }
                Ok(None) => debug!(model_id, %version, "model not published under version"),
                Err(e) => warn!(model_id, %version, error = %e, "model download failed; trying next version"),
            }
        }

        Err(JobError::ModelNotFound {
            model_id: model_id.to_owned(),
        })
    }

    /// The index improves conversion quality but is optional; failures are logged.
    async fn fetch_index(&self, version: &str, model_id: &str) {
        let key = model_key(version, model_id, INDEX_EXT);
        let index_path = self.index_path(model_id);
        let outcome = match self.download(&key, &index_path).await {
            Ok(Some(part)) => self.publish(&part, &index_path).await.map(|()| true),
            Ok(None) => Ok(false),
            Err(e) => Err(e),
        };
        match outcome {
            Ok(true) => info!(model_id, %version, "index downloaded"),
            Ok(false) => info!(model_id, %version, "model has no index"),
            Err(e) => warn!(model_id, %version, error = %e, "index download failed; continuing without index"),
        }
    }

    /// Download `key` into a `.part` file next to `dest`.
    ///
    /// `Ok(None)` when the object does not exist; no partial file is left
    /// behind on any path but success.
    async fn download(&self, key: &str, dest: &Path) -> Result<Option<PathBuf>, StoreError> {
        let file_name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let part = self
            .dir
            .join(format!(".{file_name}.{}.{PART_EXT}", uuid::Uuid::new_v4().simple()));

        match self.store.get_object(key, &part).await {
            Ok(true) => Ok(Some(part)),
            Ok(false) => {
                remove_quietly(&part).await;
                Ok(None)
            }
            Err(e) => {
                remove_quietly(&part).await;
                Err(e)
            }
        }
    }

    /// Move a finished download into place.
    async fn publish(&self, part: &Path, dest: &Path) -> Result<(), StoreError> {
        if let Err(e) = tokio::fs::rename(part, dest).await {
            remove_quietly(part).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Serialise downloads of one model id. The slot removes its map entry
    /// when the last job holding or waiting on it lets go.
    async fn download_slot(&self, model_id: &str) -> DownloadSlot<'_> {
        let lock = {
            let mut map = lock_map(&self.downloads);
            Arc::clone(map.entry(model_id.to_owned()).or_default())
        };
        let mut slot = DownloadSlot {
            downloads: &self.downloads,
            model_id: model_id.to_owned(),
            lock: Some(lock),
            guard: None,
        };
        if let Some(lock) = slot.lock.clone() {
            slot.guard = Some(lock.lock_owned().await);
        }
        slot
    }

    /// Models currently in the cache, sorted by id.
    pub fn list(&self) -> std::io::Result<Vec<CachedModel>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut models = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(MODEL_EXT) || !path.is_file() {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if validate_model_id(id).is_err() {
                continue;
            }
            models.push(CachedModel {
                id: id.to_owned(),
                name: display_name(id),
                has_index: self.index_path(id).is_file(),
            });
        }
        models.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(models)
    }
}

/// Exclusive right to download one model id.
///
/// Dropping it, including when the resolving future is abandoned, releases
/// the lock and prunes the map entry once nobody else references it.
struct DownloadSlot<'a> {
    downloads: &'a DownloadLocks,
    model_id: String,
    lock: Option<Arc<tokio::sync::Mutex<()>>>,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for DownloadSlot<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.lock.take();
        let mut map = lock_map(self.downloads);
        if map
            .get(&self.model_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            map.remove(&self.model_id);
        }
    }
}

fn lock_map(
    downloads: &DownloadLocks,
) -> std::sync::MutexGuard<'_, HashMap<String, Arc<tokio::sync::Mutex<()>>>> {
    match downloads.lock() {
        Ok(map) => map,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Model ids become file names and store keys, so they are restricted to
/// `[A-Za-z0-9_.-]`, may not start with `.`, and are at most 128 chars.
pub fn validate_model_id(model_id: &str) -> Result<(), JobError> {
    let valid_chars = model_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if model_id.is_empty()
        || model_id.len() > MAX_MODEL_ID_LEN
        || model_id.starts_with('.')
        || !valid_chars
    {
        return Err(JobError::Validation(format!("invalid model_id '{model_id}'")));
    }
    Ok(())
}

fn display_name(model_id: &str) -> String {
    model_id
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove partial download");
        }
    }
}
