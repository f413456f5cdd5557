//! Batch verification of files on disk.

use crate::gate::Commander;
use crate::models::VerificationStatus;
use rayon::prelude::*;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Descend into subdirectories
    pub recursive: bool,
    /// File extension to pick up, without the dot
    pub extension: String,
    pub workers: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            recursive: false,
            extension: "py".to_string(),
            workers: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanEntry {
    pub file: PathBuf,
    pub status: VerificationStatus,
    pub score: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub total: usize,
    pub passed: usize,
    pub rejected: usize,
    pub files: Vec<ScanEntry>,
}

impl ScanReport {
    fn from_entries(files: Vec<ScanEntry>) -> Self {
        let passed = files
            .iter()
            .filter(|e| e.status == VerificationStatus::Pass)
            .count();
        Self {
            total: files.len(),
            passed,
            rejected: files.len() - passed,
            files,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.rejected == 0
    }

    pub fn rejected_files(&self) -> impl Iterator<Item = &ScanEntry> {
        self.files
            .iter()
            .filter(|e| e.status == VerificationStatus::Reject)
    }
}

/// Files under `root` matching the extension, sorted. A file root is returned as-is.
pub fn collect_files(root: &Path, options: &ScanOptions) -> Vec<PathBuf> {
    if root.is_file() {
        return vec![root.to_path_buf()];
    }
    let extension = options.extension.trim_start_matches('.');
    let mut walker = WalkDir::new(root).min_depth(1);
    if !options.recursive {
        walker = walker.max_depth(1);
    }
    let mut files: Vec<PathBuf> = walker
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case(extension))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    files
}

/// Verify every collected file. Unreadable files are rejected.
pub fn scan_path(gate: &Commander, root: &Path, options: &ScanOptions) -> ScanReport {
    let files = collect_files(root, options);
    info!(root = %root.display(), files = files.len(), "Scanning");

    let check = |path: &PathBuf| -> ScanEntry {
        match fs::read_to_string(path) {
            Ok(code) => {
                let result = gate.verify(&code);
                ScanEntry {
                    file: path.clone(),
                    status: result.status(),
                    score: result.score(),
                    reason: result.reason().to_string(),
                }
            }
            Err(err) => {
                warn!(file = %path.display(), error = %err, "Could not read file");
                ScanEntry {
                    file: path.clone(),
                    status: VerificationStatus::Reject,
                    score: 1.0,
                    reason: format!("Could not read file: {}", err),
                }
            }
        }
    };

    let entries: Vec<ScanEntry> = match rayon::ThreadPoolBuilder::new()
        .num_threads(options.workers.max(1))
        .build()
    {
        Ok(pool) => pool.install(|| files.par_iter().map(check).collect()),
        Err(err) => {
            warn!(error = %err, "Failed to build scan pool, scanning sequentially");
            files.iter().map(check).collect()
        }
    };

    let report = ScanReport::from_entries(entries);
    info!(
        total = report.total,
        passed = report.passed,
        rejected = report.rejected,
        "Scan complete"
    );
    report
}
