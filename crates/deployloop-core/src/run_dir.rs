//! Per-run artifact directory.
//!
//! Stages never talk to each other directly: each one reads its
//! predecessor's artifact from the [`RunDir`] and writes its own. A run
//! directory is either created fresh under `.deployloop/runs/<id>` (and
//! recorded in `LATEST`) or opened from an explicit path.

use crate::error::{LoopError, Result};
use crate::{io, paths};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct RunDir {
    id: String,
    path: PathBuf,
}

impl RunDir {
    /// Create a new run under `root` and point `LATEST` at it.
    pub fn create(root: &Path) -> Result<Self> {
        let id = new_run_id();
        let path = paths::run_path(root, &id);
        io::ensure_dir(&path.join(paths::RAW_DIR))?;
        io::atomic_write(&paths::latest_pointer(root), format!("{id}\n").as_bytes())?;
        tracing::debug!(run = %id, path = %path.display(), "created run directory");
        Ok(Self { id, path })
    }

    /// Open (creating if needed) an explicit run directory.
    pub fn open(path: &Path) -> Result<Self> {
        io::ensure_dir(&path.join(paths::RAW_DIR))?;
        let id = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "run".to_string());
        Ok(Self {
            id,
            path: path.to_path_buf(),
        })
    }

    /// The run recorded in `.deployloop/runs/LATEST`.
    pub fn latest(root: &Path) -> Result<Self> {
        let Some(content) = io::read_optional(&paths::latest_pointer(root))? else {
            return Err(LoopError::NoRun);
        };
        let id = content.trim();
        paths::validate_run_id(id)?;
        let path = paths::run_path(root, id);
        if !path.is_dir() {
            return Err(LoopError::NoRun);
        }
        Ok(Self {
            id: id.to_string(),
            path,
        })
    }

    /// `--run-dir` when given, otherwise the latest run.
    pub fn resolve(root: &Path, explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(p) => Self::open(p),
            None => Self::latest(root),
        }
    }

    /// `--run-dir` when given, otherwise a fresh run.
    pub fn resolve_or_create(root: &Path, explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(p) => Self::open(p),
            None => Self::create(root),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    pub fn raw(&self, name: &str) -> PathBuf {
        self.path.join(paths::RAW_DIR).join(name)
    }

    pub fn report(&self, stage: &str) -> PathBuf {
        self.path
            .join(paths::REPORTS_DIR)
            .join(format!("{stage}.json"))
    }

    pub fn write_text(&self, name: &str, text: &str) -> Result<PathBuf> {
        let path = self.file(name);
        io::atomic_write(&path, text.as_bytes())?;
        Ok(path)
    }

    /// Read a text artifact; `None` when it does not exist.
    pub fn read_text(&self, name: &str) -> Result<Option<String>> {
        io::read_optional(&self.file(name))
    }

    pub fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf> {
        let path = self.file(name);
        io::write_json(&path, value)?;
        Ok(path)
    }

    /// Read a JSON artifact produced by an earlier stage.
    pub fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let path = self.file(name);
        let Some(data) = io::read_optional(&path)? else {
            return Err(LoopError::ArtifactMissing(path.display().to_string()));
        };
        Ok(serde_json::from_str(&data)?)
    }
}

fn new_run_id() -> String {
    let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{stamp}-{}", &suffix[..8])
}
