//! Manifest Artifact Store
//!
//! Every manifest the orchestrator applies is also written as YAML into the
//! run directory, so a failed run can be inspected or replayed by hand.
//! Without a configured run directory the files go to a temporary directory
//! that lives as long as the store.

use crate::error::Result;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tempfile::TempDir;
use tracing::debug;

const MANIFEST_DIR: &str = "manifests";

pub struct ManifestStore {
    dir: PathBuf,
    /// Keeps a temporary directory alive
    _temp: Option<TempDir>,
    sequence: AtomicU64,
    written: Mutex<Vec<PathBuf>>,
}

impl ManifestStore {
    /// Store under `<run_dir>/manifests`, or a temporary directory
    pub fn new(run_dir: Option<&Path>) -> Result<Self> {
        match run_dir {
            Some(run_dir) => {
                let dir = run_dir.join(MANIFEST_DIR);
                std::fs::create_dir_all(&dir)?;
                Ok(Self::with_dir(dir, None))
            }
            None => Self::temporary(),
        }
    }

    pub fn temporary() -> Result<Self> {
        let temp = tempfile::Builder::new().prefix("ocs-deployer-").tempdir()?;
        let dir = temp.path().to_path_buf();
        Ok(Self::with_dir(dir, Some(temp)))
    }

    fn with_dir(dir: PathBuf, temp: Option<TempDir>) -> Self {
        Self {
            dir,
            _temp: temp,
            sequence: AtomicU64::new(0),
            written: Mutex::new(Vec::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `manifest` as `<seq>_<prefix>_<timestamp>.yaml`
    pub fn record(&self, prefix: &str, manifest: &Value) -> Result<PathBuf> {
        let yaml = serde_yaml::to_string(manifest)?;
        self.write(prefix, "yaml", &yaml)
    }

    /// Write an arbitrary text artifact (scripts, command output)
    pub fn write_text(&self, prefix: &str, extension: &str, content: &str) -> Result<PathBuf> {
        self.write(prefix, extension, content)
    }

    fn write(&self, prefix: &str, extension: &str, content: &str) -> Result<PathBuf> {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let stamp = Utc::now().format("%Y%m%dT%H%M%S");
        let path = self
            .dir
            .join(format!("{:03}_{}_{}.{}", seq, prefix, stamp, extension));
        std::fs::write(&path, content)?;
        debug!("Wrote artifact {}", path.display());
        self.written.lock().push(path.clone());
        Ok(path)
    }

    /// Paths written so far, in write order
    pub fn written(&self) -> Vec<PathBuf> {
        self.written.lock().clone()
    }
}
