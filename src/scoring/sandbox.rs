//! Scoped staging of candidate code for the analyzer.
//!
//! Every scoring call gets its own file. The file is owned by a
//! [`StagedSource`] and removed when that value is dropped, so every exit path
//! (success, error, timeout, panic unwinding) releases it.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::warn;

const STAGED_PREFIX: &str = "sentinel-";

#[derive(Debug, Clone)]
pub struct ExecutionSandbox {
    base_dir: Option<PathBuf>,
    suffix: String,
}

impl Default for ExecutionSandbox {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ExecutionSandbox {
    /// `base_dir` overrides the system temp dir (e.g. a ramdisk mount).
    pub fn new(base_dir: Option<PathBuf>) -> Self {
        Self {
            base_dir,
            suffix: ".py".to_string(),
        }
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    pub fn base_dir(&self) -> Option<&Path> {
        self.base_dir.as_deref()
    }

    /// Write `content` to a fresh file and hand back its owner.
    pub fn stage(&self, content: &str) -> io::Result<StagedSource> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(STAGED_PREFIX).suffix(&self.suffix);

        let mut file = match &self.base_dir {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                builder.tempfile_in(dir)?
            }
            None => builder.tempfile()?,
        };
        file.write_all(content.as_bytes())?;
        file.flush()?;
        Ok(StagedSource { file: Some(file) })
    }
}

/// A staged source file. Removed on drop.
#[derive(Debug)]
pub struct StagedSource {
    file: Option<NamedTempFile>,
}

impl StagedSource {
    pub fn path(&self) -> &Path {
        self.file
            .as_ref()
            .map(|f| f.path())
            .unwrap_or_else(|| Path::new(""))
    }

    /// Remove the file now and report failures instead of swallowing them.
    pub fn release(mut self) -> io::Result<()> {
        match self.file.take() {
            Some(file) => file.close(),
            None => Ok(()),
        }
    }
}

impl Drop for StagedSource {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let path = file.path().to_path_buf();
            if let Err(err) = file.close() {
                warn!(path = %path.display(), error = %err, "Failed to remove staged source");
            }
        }
    }
}
