//! Persistence for calibration records
//!
//! The JSON store writes `{"schemaVersion": 1, ...CalibrationData}` to a
//! sibling temp file and renames it into place, so readers see either the old
//! record or the new one. Concurrent writers serialize on an `fs2` lock held on
//! a `.lock` sidecar file.

use crate::error::CalibrationError;
use crate::models::CalibrationData;
use fs2::FileExt;
use serde::Serialize;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::info;

pub const SCHEMA_VERSION: u32 = 1;
const STORE_LOCK_TIMEOUT: Duration = Duration::from_secs(5);
const STORE_LOCK_RETRY: Duration = Duration::from_millis(50);

pub trait CalibrationStore: Send + Sync {
    /// `Ok(None)` when nothing has been calibrated yet; `Err` when a record
    /// exists but cannot be trusted.
    fn load(&self) -> Result<Option<CalibrationData>, CalibrationError>;

    fn save(&self, data: &CalibrationData) -> Result<(), CalibrationError>;

    /// Where the record lives, for logs.
    fn location(&self) -> String;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CalibrationRecord<'a> {
    schema_version: u32,
    #[serde(flatten)]
    data: &'a CalibrationData,
}

#[derive(Debug, Clone)]
pub struct JsonCalibrationStore {
    path: PathBuf,
}

struct StoreLock {
    file: File,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl JsonCalibrationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name: OsString = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| OsString::from("calibration"));
        name.push(suffix);
        self.path.with_file_name(name)
    }

    fn io_err(path: &Path, source: std::io::Error) -> CalibrationError {
        CalibrationError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn corrupt(&self, details: impl Into<String>) -> CalibrationError {
        CalibrationError::CorruptFile {
            path: self.path.clone(),
            details: details.into(),
        }
    }

    fn lock(&self) -> Result<StoreLock, CalibrationError> {
        let lock_path = self.sibling(".lock");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| Self::io_err(&lock_path, e))?;

        let start = Instant::now();
        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => break,
                Err(err) => {
                    if err.kind() != ErrorKind::WouldBlock {
                        return Err(Self::io_err(&lock_path, err));
                    }
                    if start.elapsed() >= STORE_LOCK_TIMEOUT {
                        return Err(Self::io_err(
                            &lock_path,
                            std::io::Error::new(
                                ErrorKind::TimedOut,
                                format!(
                                    "Timed out waiting for calibration lock ({}s)",
                                    STORE_LOCK_TIMEOUT.as_secs()
                                ),
                            ),
                        ));
                    }
                    std::thread::sleep(STORE_LOCK_RETRY);
                }
            }
        }
        Ok(StoreLock { file })
    }

    fn write_atomic(&self, content: &str) -> Result<(), CalibrationError> {
        let tmp_path = self.sibling(".tmp");
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)
            .map_err(|e| Self::io_err(&tmp_path, e))?;

        let written = file
            .write_all(content.as_bytes())
            .and_then(|_| file.sync_all());
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(Self::io_err(&tmp_path, err));
        }

        if let Err(err) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(Self::io_err(&self.path, err));
        }
        Ok(())
    }
}

impl CalibrationStore for JsonCalibrationStore {
    fn load(&self) -> Result<Option<CalibrationData>, CalibrationError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(Self::io_err(&self.path, err)),
        };

        let value: serde_json::Value =
            serde_json::from_str(&content).map_err(|e| self.corrupt(e.to_string()))?;
        if !value.is_object() {
            return Err(self.corrupt("expected a JSON object"));
        }

        // Records written before versioning carry no schemaVersion
        let version = match value.get("schemaVersion") {
            None => SCHEMA_VERSION,
            Some(v) => v
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| self.corrupt("schemaVersion is not an integer"))?,
        };
        if version != SCHEMA_VERSION {
            return Err(CalibrationError::UnsupportedSchema(version));
        }

        let data: CalibrationData =
            serde_json::from_value(value).map_err(|e| self.corrupt(e.to_string()))?;
        data.validate().map_err(|e| self.corrupt(e.to_string()))?;
        Ok(Some(data))
    }

    fn save(&self, data: &CalibrationData) -> Result<(), CalibrationError> {
        data.validate()?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| Self::io_err(parent, e))?;
            }
        }

        let record = CalibrationRecord {
            schema_version: SCHEMA_VERSION,
            data,
        };
        let content = serde_json::to_string_pretty(&record)
            .map_err(|e| CalibrationError::InvalidRecord(e.to_string()))?;

        let _lock = self.lock()?;
        self.write_atomic(&content)?;
        info!(path = %self.path.display(), q_hat = data.q_hat, "Calibration data saved");
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Process-local store, for embedding the gate without a filesystem.
#[derive(Debug, Default)]
pub struct MemoryCalibrationStore {
    record: Mutex<Option<CalibrationData>>,
}

impl MemoryCalibrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(data: CalibrationData) -> Self {
        Self {
            record: Mutex::new(Some(data)),
        }
    }
}

impl CalibrationStore for MemoryCalibrationStore {
    fn load(&self) -> Result<Option<CalibrationData>, CalibrationError> {
        let guard = self.record.lock().unwrap_or_else(|p| p.into_inner());
        Ok(guard.clone())
    }

    fn save(&self, data: &CalibrationData) -> Result<(), CalibrationError> {
        data.validate()?;
        let mut guard = self.record.lock().unwrap_or_else(|p| p.into_inner());
        *guard = Some(data.clone());
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}
