// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Report collection
//!
//! Everything written here is written whether the workers passed or not.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::EnvironmentName;
use crate::errors::{ShipflowError, ShipflowResult};

/// Name of the per-environment summary file
pub const SUMMARY_FILE: &str = "summary.json";

/// Exit status of one worker as recorded in the summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSummary {
    pub worker: usize,
    pub exit_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Contents of `summary.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub environment: EnvironmentName,
    pub namespace: String,
    pub primary_image: String,
    pub aip_step_image: String,
    pub passed: bool,
    pub workers: Vec<WorkerSummary>,
    pub report_files: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub argo_url: Option<String>,
}

impl ReportSummary {
    /// Load a summary written by an earlier dispatch
    pub fn read(dir: &Path) -> ShipflowResult<Self> {
        let path = dir.join(SUMMARY_FILE);
        let content = std::fs::read_to_string(&path).map_err(|e| ShipflowError::FileReadError {
            path: path.clone(),
            error: e.to_string(),
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn write(&self, dir: &Path) -> ShipflowResult<PathBuf> {
        let path = dir.join(SUMMARY_FILE);
        let json = serde_json::to_string_pretty(self)?;
        write_file(&path, &json)?;
        Ok(path)
    }
}

/// Log file of one worker
pub fn worker_log_path(dir: &Path, worker: usize) -> PathBuf {
    dir.join(format!("worker-{}.log", worker))
}

/// Write a worker's captured output
pub fn write_worker_log(dir: &Path, worker: usize, stdout: &str, stderr: &str) -> ShipflowResult<PathBuf> {
    let path = worker_log_path(dir, worker);
    let content = format!("=== stdout ===\n{}\n=== stderr ===\n{}\n", stdout, stderr);
    write_file(&path, &content)?;
    Ok(path)
}

/// Empty a report directory so only this dispatch's files end up in it
pub fn reset_report_dir(dir: &Path) -> ShipflowResult<()> {
    if dir.exists() {
        tracing::debug!(dir = %dir.display(), "clearing previous reports");
        std::fs::remove_dir_all(dir).map_err(|e| ShipflowError::FileWriteError {
            path: dir.to_path_buf(),
            error: e.to_string(),
        })?;
    }
    std::fs::create_dir_all(dir).map_err(|e| ShipflowError::FileWriteError {
        path: dir.to_path_buf(),
        error: e.to_string(),
    })
}

/// Files the workers left in the report directory, sorted
pub fn collect_report_files(dir: &Path) -> ShipflowResult<Vec<PathBuf>> {
    let pattern = format!("{}/**/*", glob::Pattern::escape(&dir.to_string_lossy()));
    let mut files: Vec<PathBuf> = glob::glob(&pattern)?
        .filter_map(Result::ok)
        .filter(|p| p.is_file())
        .filter(|p| p.file_name().map_or(true, |n| n != SUMMARY_FILE))
        .filter_map(|p| p.strip_prefix(dir).ok().map(Path::to_path_buf))
        .collect();
    files.sort();
    Ok(files)
}

fn write_file(path: &Path, content: &str) -> ShipflowResult<()> {
    std::fs::write(path, content).map_err(|e| ShipflowError::FileWriteError {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_report_files_is_relative_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        write_worker_log(dir.path(), 2, "ok", "").unwrap();
        write_worker_log(dir.path(), 1, "ok", "").unwrap();
        std::fs::create_dir_all(dir.path().join("junit")).unwrap();
        std::fs::write(dir.path().join("junit/junit-1.xml"), "<testsuite/>").unwrap();
        std::fs::write(dir.path().join(SUMMARY_FILE), "{}").unwrap();

        let files = collect_report_files(dir.path()).unwrap();
        assert_eq!(
            files,
            vec![
                PathBuf::from("junit/junit-1.xml"),
                PathBuf::from("worker-1.log"),
                PathBuf::from("worker-2.log"),
            ]
        );
    }

    #[test]
    fn test_summary_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let summary = ReportSummary {
            environment: EnvironmentName::Sandbox,
            namespace: "metaflow-jobs".into(),
            primary_image: "r/mf:1".into(),
            aip_step_image: "r/mf:1-aip-step".into(),
            passed: false,
            workers: vec![WorkerSummary {
                worker: 1,
                exit_code: -1,
                error: Some("timed out".into()),
            }],
            report_files: vec![PathBuf::from("worker-1.log")],
            argo_url: None,
        };

        summary.write(dir.path()).unwrap();
        let raw = std::fs::read_to_string(dir.path().join(SUMMARY_FILE)).unwrap();
        assert!(raw.contains("\"environment\": \"sandbox\""));
        assert!(!raw.contains("argo_url"));
        assert_eq!(ReportSummary::read(dir.path()).unwrap(), summary);
    }

    #[test]
    fn test_reset_report_dir_drops_previous_files() {
        let dir = tempfile::tempdir().unwrap();
        let reports = dir.path().join("sandbox");
        std::fs::create_dir_all(reports.join("junit")).unwrap();
        std::fs::write(reports.join("junit/junit-5.xml"), "<testsuite/>").unwrap();
        write_worker_log(&reports, 5, "", "").unwrap();

        reset_report_dir(&reports).unwrap();

        assert!(reports.is_dir());
        assert!(collect_report_files(&reports).unwrap().is_empty());
    }
}
