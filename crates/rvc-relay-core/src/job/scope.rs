use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::warn;

const MAX_ID_LEN: usize = 64;

/// Temp files owned by one job, removed when the guard drops.
///
/// Shared through an `Arc` with the blocking engine call, so the files outlive
/// an abandoned (timed out) job future until the engine lets go of them.
///
/// Removal in `drop` is a plain blocking `unlink` on whichever thread drops
/// the last holder, often a runtime worker. A job owns two files, and they are
/// gone by the time the job's result is returned.
#[derive(Debug, Default)]
pub struct ScopedFiles {
    paths: Mutex<Vec<PathBuf>>,
}

impl ScopedFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        let mut paths = match self.paths.lock() {
            Ok(paths) => paths,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !paths.contains(&path) {
            paths.push(path);
        }
    }
}

impl Drop for ScopedFiles {
    fn drop(&mut self) {
        let paths = match self.paths.get_mut() {
            Ok(paths) => paths,
            Err(poisoned) => poisoned.into_inner(),
        };
        for path in paths.drain(..) {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove temp file"),
            }
        }
    }
}

/// Execution context of one job.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    pub id: String,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
}

impl ConversionJob {
    /// Lay out per-job temp paths under `work_dir`.
    ///
    /// File names combine the sanitised job id with a random nonce, so two jobs
    /// reusing an id still get distinct files.
    pub fn new(work_dir: &Path, job_id: &str) -> Self {
        let tag = file_tag(job_id);
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let nonce = &nonce[..12];
        Self {
            id: job_id.to_owned(),
            input_path: work_dir.join(format!("rvc_in_{tag}_{nonce}.wav")),
            output_path: work_dir.join(format!("rvc_out_{tag}_{nonce}.wav")),
        }
    }

    /// The job id reduced to characters safe in file names and store keys.
    pub fn tag(&self) -> String {
        file_tag(&self.id)
    }
}

fn file_tag(job_id: &str) -> String {
    let tag: String = job_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
        .take(MAX_ID_LEN)
        .collect();
    if tag.is_empty() { "job".to_owned() } else { tag }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn files_are_removed_on_drop_and_missing_ones_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let written = dir.path().join("a.wav");
        std::fs::write(&written, b"x").unwrap();

        let files = ScopedFiles::new();
        files.register(&written);
        files.register(dir.path().join("never-created.wav"));
        drop(files);

        assert!(!written.exists());
    }

    #[test]
    fn last_holder_performs_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.wav");
        std::fs::write(&path, b"x").unwrap();

        let files = Arc::new(ScopedFiles::new());
        files.register(&path);
        let engine_side = Arc::clone(&files);
        drop(files);
        assert!(path.exists());
        drop(engine_side);
        assert!(!path.exists());
    }

    #[test]
    fn job_paths_are_unique_and_sanitised() {
        let dir = Path::new("/work");
        let a = ConversionJob::new(dir, "../../etc/passwd");
        let b = ConversionJob::new(dir, "../../etc/passwd");
        assert_ne!(a.input_path, b.input_path);
        assert_ne!(a.input_path, a.output_path);
        assert_eq!(a.input_path.parent(), Some(dir));
        assert!(a.input_path.to_string_lossy().contains("etcpasswd"));
        assert!(ConversionJob::new(dir, "///").output_path.to_string_lossy().contains("rvc_out_job_"));
    }

    #[tokio::test]
    async fn files_are_gone_as_soon_as_the_guard_drops_inside_the_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.wav");
        tokio::fs::write(&path, b"x").await.unwrap();

        let files = ScopedFiles::new();
        files.register(&path);
        drop(files);

        assert!(!tokio::fs::try_exists(&path).await.unwrap());
    }
}
