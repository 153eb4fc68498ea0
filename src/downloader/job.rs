//! Job structures and per-job result rows

use crate::fetcher::{ErrorKind, ExportTarget};
use crate::models::DownloadRequest;
use serde::{Deserialize, Serialize};

/// Lifecycle of a job. Only `Pending` may change; terminal outcomes are final.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Pending,
    Succeeded { filename: String, payload: Vec<u8> },
    Failed { kind: ErrorKind, message: String },
}

/// One fetch unit: a single (customer, export type, date range).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub target: ExportTarget,
    pub attempts: u32,
    pub outcome: JobOutcome,
}

impl Job {
    pub fn new(target: ExportTarget) -> Self {
        Self {
            target,
            attempts: 0,
            outcome: JobOutcome::Pending,
        }
    }

    /// Expands a request into its cross product, ordered by customer id and then by
    /// export type's canonical order.
    pub fn expand(request: &DownloadRequest) -> Vec<Job> {
        let range = request.range();
        request
            .customer_ids()
            .iter()
            .flat_map(|&customer_id| {
                request.export_types().iter().map(move |&export_type| {
                    Job::new(ExportTarget {
                        customer_id,
                        export_type,
                        range,
                    })
                })
            })
            .collect()
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.outcome, JobOutcome::Pending)
    }

    pub fn succeed(&mut self, payload: Vec<u8>) {
        if self.is_terminal() {
            return;
        }
        self.outcome = JobOutcome::Succeeded {
            filename: self.target.filename(),
            payload,
        };
    }

    pub fn fail(&mut self, kind: ErrorKind, message: impl Into<String>) {
        if self.is_terminal() {
            return;
        }
        self.outcome = JobOutcome::Failed {
            kind,
            message: message.into(),
        };
    }

    /// Result row for status queries and reports (the payload is not included).
    pub fn result(&self) -> JobResult {
        let (outcome, filename, bytes, error_kind, error) = match &self.outcome {
            JobOutcome::Succeeded { filename, payload } => (
                ResultOutcome::Succeeded,
                Some(filename.clone()),
                Some(payload.len()),
                None,
                None,
            ),
            JobOutcome::Failed { kind, message } => (
                ResultOutcome::Failed,
                None,
                None,
                Some(*kind),
                Some(message.clone()),
            ),
            JobOutcome::Pending => (ResultOutcome::Pending, None, None, None, None),
        };
        JobResult {
            customer_id: self.target.customer_id,
            export_type: self.target.export_type,
            outcome,
            attempts: self.attempts,
            filename,
            bytes,
            error_kind,
            error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultOutcome {
    Pending,
    Succeeded,
    Failed,
}

/// Caller-visible outcome of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub customer_id: u64,
    pub export_type: crate::models::ExportType,
    pub outcome: ResultOutcome,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobResult {
    pub fn succeeded(&self) -> bool {
        self.outcome == ResultOutcome::Succeeded
    }
}
