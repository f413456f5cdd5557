//! Calibration sample sources
//!
//! Loading is a collaborator boundary: anything that can produce a list of
//! code strings implements [`DatasetLoader`]. The loaders here cover local
//! files and fixed lists; remote dataset hubs are out of scope.

use crate::error::CalibrationError;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

/// Known-bad snippets used to give the calibration distribution mass above zero.
pub const SYNTHETIC_VULNERABILITIES: &[&str] = &[
    // High severity
    "import pickle\npickle.loads(untrusted_data)",
    "eval(user_input)",
    "exec(user_code)",
    "__import__('os').system(cmd)",
    // Medium severity
    "password = 'hardcoded_secret'",
    "api_key = 'sk-1234567890'",
    "tmp = '/tmp/insecure_path'",
    "subprocess.call(user_input, shell=True)",
    // Low severity
    "import random\nprint(random.random())",
    "assert user_is_admin",
];

pub trait DatasetLoader: Send + Sync {
    /// Dataset name recorded in calibration provenance.
    fn name(&self) -> &str;

    /// Load up to `n_samples` code strings, in a stable order.
    fn load(&self, n_samples: usize) -> Result<Vec<String>, CalibrationError>;

    /// Human-readable provenance note stored with the calibration record.
    fn notes(&self) -> String {
        String::new()
    }
}

/// Fixed in-memory samples.
#[derive(Debug, Clone)]
pub struct StaticDatasetLoader {
    name: String,
    samples: Vec<String>,
}

impl StaticDatasetLoader {
    pub fn new(name: impl Into<String>, samples: Vec<String>) -> Self {
        Self {
            name: name.into(),
            samples,
        }
    }
}

impl DatasetLoader for StaticDatasetLoader {
    fn name(&self) -> &str {
        &self.name
    }

    fn load(&self, n_samples: usize) -> Result<Vec<String>, CalibrationError> {
        Ok(self.samples.iter().take(n_samples).cloned().collect())
    }
}

/// Every file with a given extension under a directory, sorted by path.
#[derive(Debug, Clone)]
pub struct DirectoryDatasetLoader {
    root: PathBuf,
    extension: String,
    name: String,
}

impl DirectoryDatasetLoader {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        let root = root.into();
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| root.display().to_string());
        Self {
            root,
            extension: extension.into().trim_start_matches('.').to_string(),
            name,
        }
    }
}

impl DatasetLoader for DirectoryDatasetLoader {
    fn name(&self) -> &str {
        &self.name
    }

    fn load(&self, n_samples: usize) -> Result<Vec<String>, CalibrationError> {
        if !self.root.is_dir() {
            return Err(CalibrationError::DatasetLoad {
                dataset: self.name.clone(),
                details: format!("{} is not a directory", self.root.display()),
            });
        }

        let mut paths: Vec<PathBuf> = WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| has_extension(path, &self.extension))
            .collect();
        paths.sort();

        let mut samples = Vec::with_capacity(n_samples.min(paths.len()));
        for path in paths.into_iter().take(n_samples) {
            let code = fs::read_to_string(&path).map_err(|e| CalibrationError::DatasetLoad {
                dataset: self.name.clone(),
                details: format!("{}: {}", path.display(), e),
            })?;
            samples.push(code);
        }
        Ok(samples)
    }
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}

/// One JSON object per line with the code under `field` (the MBPP export shape).
#[derive(Debug, Clone)]
pub struct JsonlDatasetLoader {
    path: PathBuf,
    field: String,
    name: String,
}

impl JsonlDatasetLoader {
    pub fn new(path: impl Into<PathBuf>, field: impl Into<String>) -> Self {
        let path = path.into();
        let name = path
            .file_stem()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "jsonl".to_string());
        Self {
            path,
            field: field.into(),
            name,
        }
    }
}

impl DatasetLoader for JsonlDatasetLoader {
    fn name(&self) -> &str {
        &self.name
    }

    fn load(&self, n_samples: usize) -> Result<Vec<String>, CalibrationError> {
        let content = fs::read_to_string(&self.path).map_err(|e| CalibrationError::DatasetLoad {
            dataset: self.name.clone(),
            details: format!("{}: {}", self.path.display(), e),
        })?;

        let mut samples = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            if samples.len() >= n_samples {
                break;
            }
            if line.trim().is_empty() {
                continue;
            }
            let row: serde_json::Value =
                serde_json::from_str(line).map_err(|e| CalibrationError::DatasetLoad {
                    dataset: self.name.clone(),
                    details: format!("line {}: {}", line_no + 1, e),
                })?;
            let code = row
                .get(&self.field)
                .and_then(|v| v.as_str())
                .ok_or_else(|| CalibrationError::DatasetLoad {
                    dataset: self.name.clone(),
                    details: format!("line {}: missing string field '{}'", line_no + 1, self.field),
                })?;
            samples.push(code.to_string());
        }
        Ok(samples)
    }
}

/// Wraps a loader and overwrites the tail of its samples with known-bad
/// patterns at a fixed rate.
#[derive(Debug, Clone)]
pub struct InjectingLoader<L> {
    inner: L,
    rate: f64,
}

impl<L: DatasetLoader> InjectingLoader<L> {
    pub fn new(inner: L, rate: f64) -> Self {
        Self {
            inner,
            rate: rate.clamp(0.0, 1.0),
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }
}

/// Number of samples replaced for a batch of `len` at `rate`.
pub fn injection_count(len: usize, rate: f64) -> usize {
    ((len as f64) * rate.clamp(0.0, 1.0)).floor() as usize
}

/// Overwrite the last `injection_count` samples in place. Sample `len - i`
/// receives pattern `i % patterns` for i in 1..=count.
pub fn inject_vulnerabilities(samples: &mut [String], rate: f64) -> usize {
    let count = injection_count(samples.len(), rate);
    let len = samples.len();
    for i in 1..=count {
        let pattern = SYNTHETIC_VULNERABILITIES[i % SYNTHETIC_VULNERABILITIES.len()];
        samples[len - i] = pattern.to_string();
    }
    count
}

impl<L: DatasetLoader> DatasetLoader for InjectingLoader<L> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn load(&self, n_samples: usize) -> Result<Vec<String>, CalibrationError> {
        let mut samples = self.inner.load(n_samples)?;
        if samples.len() < n_samples {
            warn!(
                available = samples.len(),
                requested = n_samples,
                "Dataset has fewer samples than requested"
            );
        }
        let injected = inject_vulnerabilities(&mut samples, self.rate);
        info!(
            injected,
            rate = self.rate,
            "Injected synthetic vulnerabilities"
        );
        Ok(samples)
    }

    fn notes(&self) -> String {
        let inner = self.inner.notes();
        let injection = format!(
            "Includes {:.0}% synthetic injection.",
            self.rate * 100.0
        );
        if inner.is_empty() {
            injection
        } else {
            format!("{} {}", inner, injection)
        }
    }
}
