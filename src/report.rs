//! Persisting export payloads and per-task summaries.
//!
//! The orchestrator hands every successful payload and one summary per task to a
//! [`ReportWriter`]. [`FsReportWriter`] lays them out as
//!
//! ```text
//! <output_dir>/<start> to <end>/<export>_export_<customer> (<start> to <end>).csv
//! <output_dir>/<start> to <end>/download_report_<start>_to_<end>.json
//! ```
//!
//! where the JSON report holds `{"runs": [...]}` with one run appended per task.

use crate::constants::{CORRUPT_REPORT_SUFFIX, PART_FILE_SUFFIX, REPORT_FILE_PREFIX};
use crate::downloader::JobResult;
use crate::errors::{AppError, AppResult};
use crate::fetcher::{ErrorKind, ExportTarget};
use crate::models::DateRange;
use crate::status::{Task, TaskStatus};
use crate::utils::{format_duration, round_two_decimals};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Sink for downloaded payloads and task summaries.
#[async_trait]
pub trait ReportWriter: Send + Sync {
    /// Stores one CSV payload and returns where it was written.
    async fn write_export(
        &self,
        target: &ExportTarget,
        filename: &str,
        payload: &[u8],
    ) -> AppResult<PathBuf>;

    /// Appends a finished task to the report of its date range.
    async fn write_summary(&self, report: &TaskReport) -> AppResult<PathBuf>;
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub task_id: String,
    pub status: TaskStatus,
    pub message: String,
    pub date_range: String,
    pub start_date: String,
    pub end_date: String,
    pub total_jobs: usize,
    pub succeeded_jobs: usize,
    pub failed_jobs: usize,
    pub total_customers: usize,
    pub successful_customers: usize,
    pub failed_customers: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration: String,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerOutcome {
    Success,
    Partial,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct CustomerStatus {
    pub status: CustomerOutcome,
    pub downloaded_files: Vec<String>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedDownload {
    pub customer_id: u64,
    pub export_type: String,
    pub error_kind: Option<ErrorKind>,
    pub error: String,
}

/// One run entry of the JSON report.
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    #[serde(skip)]
    pub range: DateRange,
    pub summary: RunSummary,
    pub customers: BTreeMap<u64, CustomerStatus>,
    pub jobs: Vec<JobResult>,
    pub failed_downloads: Vec<FailedDownload>,
}

impl TaskReport {
    /// Builds the report of a finished task from its sorted results.
    pub fn from_task(task: &Task) -> Self {
        let range = task.request.range();
        let end_time = task.finished_at.unwrap_or_else(Utc::now);
        let elapsed = (end_time - task.started_at).to_std().unwrap_or_default();

        let mut customers: BTreeMap<u64, CustomerStatus> = BTreeMap::new();
        let mut failed_downloads = Vec::new();
        for result in &task.results {
            let entry = customers
                .entry(result.customer_id)
                .or_insert_with(|| CustomerStatus {
                    status: CustomerOutcome::Failed,
                    downloaded_files: Vec::new(),
                    errors: Vec::new(),
                });
            match (&result.filename, result.succeeded()) {
                (Some(filename), true) => entry.downloaded_files.push(filename.clone()),
                _ => {
                    let error = result.error.clone().unwrap_or_default();
                    entry
                        .errors
                        .push(format!("{}: {}", result.export_type.display_name(), error));
                    failed_downloads.push(FailedDownload {
                        customer_id: result.customer_id,
                        export_type: result.export_type.display_name().to_string(),
                        error_kind: result.error_kind,
                        error,
                    });
                }
            }
        }
        for status in customers.values_mut() {
            status.status = match (status.downloaded_files.is_empty(), status.errors.is_empty()) {
                (false, true) => CustomerOutcome::Success,
                (false, false) => CustomerOutcome::Partial,
                _ => CustomerOutcome::Failed,
            };
        }

        let successful_customers = customers
            .values()
            .filter(|c| c.status == CustomerOutcome::Success)
            .count();
        let failed_customers = customers
            .values()
            .filter(|c| c.status == CustomerOutcome::Failed)
            .count();
        let succeeded_jobs = task.results.iter().filter(|r| r.succeeded()).count();

        Self {
            range,
            summary: RunSummary {
                task_id: task.task_id.clone(),
                status: task.status,
                message: task.message.clone(),
                date_range: range.to_string(),
                start_date: range.start_str(),
                end_date: range.end_str(),
                total_jobs: task.results.len(),
                succeeded_jobs,
                failed_jobs: task.results.len() - succeeded_jobs,
                total_customers: task.request.customer_ids().len(),
                successful_customers,
                failed_customers,
                start_time: task.started_at,
                end_time,
                duration: format_duration(elapsed),
                duration_seconds: round_two_decimals(elapsed.as_secs_f64()),
            },
            customers,
            jobs: task.results.clone(),
            failed_downloads,
        }
    }
}

/// Name of the JSON report kept in every date-range folder.
pub fn report_filename(range: &DateRange) -> String {
    format!(
        "{REPORT_FILE_PREFIX}{}_to_{}.json",
        range.start_str(),
        range.end_str()
    )
}

/// Writes exports and reports below an output directory.
pub struct FsReportWriter {
    output_dir: PathBuf,
    // Serializes read-modify-write of report files shared by tasks of the same range.
    report_lock: tokio::sync::Mutex<()>,
}

impl FsReportWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            report_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    async fn range_dir(&self, range: &DateRange) -> AppResult<PathBuf> {
        let dir = self.output_dir.join(range.folder_name());
        fs::create_dir_all(&dir).await.map_err(|e| {
            AppError::IoError(format!("Failed to create directory {}: {e}", dir.display()))
        })?;
        Ok(dir)
    }
}

/// The `runs` array of an existing report, or `None` if the document has none.
fn existing_runs(bytes: &[u8]) -> Option<Vec<Value>> {
    match serde_json::from_slice::<Value>(bytes).ok()? {
        Value::Object(mut doc) => match doc.remove("runs")? {
            Value::Array(runs) => Some(runs),
            _ => None,
        },
        _ => None,
    }
}

/// Moves an unreadable report to `<name>.corrupt` so a new one can be started.
async fn set_aside(path: &Path) -> AppResult<()> {
    let mut corrupt_name = path.as_os_str().to_os_string();
    corrupt_name.push(CORRUPT_REPORT_SUFFIX);
    let corrupt_path = PathBuf::from(corrupt_name);

    warn!(
        path = %path.display(),
        moved_to = %corrupt_path.display(),
        "Existing report is not valid, starting a new one"
    );
    fs::rename(path, &corrupt_path).await.map_err(|e| {
        AppError::IoError(format!(
            "Failed to move invalid report {}: {e}",
            path.display()
        ))
    })
}

/// Writes `contents` next to `path` with a `.part` suffix and renames it into place.
async fn write_atomic(path: &Path, contents: &[u8]) -> AppResult<()> {
    let mut tmp_name = path.as_os_str().to_os_string();
    tmp_name.push(PART_FILE_SUFFIX);
    let tmp_path = PathBuf::from(tmp_name);

    fs::write(&tmp_path, contents).await.map_err(|e| {
        AppError::IoError(format!(
            "Failed to write temp file {}: {e}",
            tmp_path.display()
        ))
    })?;
    fs::rename(&tmp_path, path).await.map_err(|e| {
        AppError::IoError(format!(
            "Failed to rename temp file {} to {}: {e}",
            tmp_path.display(),
            path.display()
        ))
    })
}

#[async_trait]
impl ReportWriter for FsReportWriter {
    async fn write_export(
        &self,
        target: &ExportTarget,
        filename: &str,
        payload: &[u8],
    ) -> AppResult<PathBuf> {
        let dir = self.range_dir(&target.range).await?;
        let path = dir.join(filename);
        write_atomic(&path, payload).await?;
        debug!(
            customer_id = target.customer_id,
            export_type = %target.export_type,
            path = %path.display(),
            bytes = payload.len(),
            "Export written"
        );
        Ok(path)
    }

    async fn write_summary(&self, report: &TaskReport) -> AppResult<PathBuf> {
        let _guard = self.report_lock.lock().await;
        let dir = self.range_dir(&report.range).await?;
        let path = dir.join(report_filename(&report.range));

        let mut runs = match fs::read(&path).await {
            Ok(bytes) => match existing_runs(&bytes) {
                Some(runs) => runs,
                None => {
                    set_aside(&path).await?;
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        runs.push(serde_json::to_value(report)?);

        let doc = serde_json::json!({ "runs": runs });
        write_atomic(&path, &serde_json::to_vec_pretty(&doc)?).await?;
        Ok(path)
    }
}

/// A date-range folder found in the output directory.
#[derive(Debug, Clone, Serialize)]
pub struct ExportFolder {
    pub name: String,
    pub path: PathBuf,
    pub csv_count: usize,
    pub created_at: DateTime<Utc>,
}

/// Lists the `limit` most recent export folders below `output_dir`.
///
/// A folder's creation time is the end time of the last run in its report, falling
/// back to the folder's modification time. A missing output directory yields an empty
/// list.
pub fn recent_exports(output_dir: &Path, limit: usize) -> AppResult<Vec<ExportFolder>> {
    if !output_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut folders = Vec::new();
    for entry in WalkDir::new(output_dir).min_depth(1).max_depth(1) {
        let entry = entry
            .map_err(|e| AppError::IoError(format!("Failed to read directory entry: {e}")))?;
        if !entry.file_type().is_dir() {
            continue;
        }

        let mut csv_count = 0;
        let mut report_end = None;
        for file in WalkDir::new(entry.path()).min_depth(1).max_depth(1) {
            let file = file
                .map_err(|e| AppError::IoError(format!("Failed to read directory entry: {e}")))?;
            let name = file.file_name().to_string_lossy();
            if name.ends_with(".csv") {
                csv_count += 1;
            } else if name.starts_with(REPORT_FILE_PREFIX) && name.ends_with(".json") {
                report_end = last_run_end_time(file.path());
            }
        }

        let created_at = match report_end {
            Some(end) => end,
            None => entry
                .metadata()
                .map_err(|e| AppError::IoError(format!("Failed to read metadata: {e}")))?
                .modified()
                .map(DateTime::<Utc>::from)?,
        };

        folders.push(ExportFolder {
            name: entry.file_name().to_string_lossy().into_owned(),
            path: entry.path().to_path_buf(),
            csv_count,
            created_at,
        });
    }

    folders.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.name.cmp(&b.name))
    });
    folders.truncate(limit);
    Ok(folders)
}

fn last_run_end_time(report: &Path) -> Option<DateTime<Utc>> {
    let contents = std::fs::read(report).ok()?;
    let doc: Value = serde_json::from_slice(&contents).ok()?;
    let end = doc.get("runs")?.as_array()?.last()?.get("summary")?.get("end_time")?;
    serde_json::from_value(end.clone()).ok()
}
