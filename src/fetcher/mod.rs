//! Fetching one billing export.
//!
//! [`FetchClient`] is the seam between the orchestrator and the network: one call
//! fetches one (customer, export type, date range) CSV with a given [`Session`]. Failures
//! are reported as a [`FetchError`] whose [`ErrorKind`] drives the retry policy; an
//! expired session is a distinct kind so the orchestrator can refresh it.

mod http_client;

pub use http_client::{classify_response, ReqwestFetchClient};

use crate::auth::Session;
use crate::models::{DateRange, ExportType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure category of a single fetch attempt (or of a job as a whole).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidRequest,
    AuthenticationError,
    SessionExpired,
    NetworkError,
    ServerError,
    Timeout,
    NotFound,
    /// The payload was fetched but could not be written to disk
    PersistenceError,
    /// The task was cancelled before the job started
    Cancelled,
    /// Anything the classifier could not place
    Other,
}

impl ErrorKind {
    /// Whether the failure may go away on its own and is worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NetworkError
                | Self::ServerError
                | Self::Timeout
                | Self::SessionExpired
                | Self::Other
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::AuthenticationError => "authentication_error",
            Self::SessionExpired => "session_expired",
            Self::NetworkError => "network_error",
            Self::ServerError => "server_error",
            Self::Timeout => "timeout",
            Self::NotFound => "not_found",
            Self::PersistenceError => "persistence_error",
            Self::Cancelled => "cancelled",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified fetch failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct FetchError {
    pub kind: ErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// What a single job downloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExportTarget {
    pub customer_id: u64,
    pub export_type: ExportType,
    pub range: DateRange,
}

impl ExportTarget {
    /// Endpoint path relative to the platform origin:
    /// `/<export>_export/<customer>/<start>/<end>`.
    pub fn path(&self) -> String {
        format!(
            "/{}/{}/{}/{}",
            self.export_type.endpoint(),
            self.customer_id,
            self.range.start_str(),
            self.range.end_str()
        )
    }

    /// Deterministic CSV filename, e.g.
    /// `stored_products_export_207 (2025-07-01 to 2025-07-15).csv`.
    pub fn filename(&self) -> String {
        format!(
            "{}_{} ({}).csv",
            self.export_type.endpoint(),
            self.customer_id,
            self.range
        )
    }
}

/// Performs one authenticated export download.
#[async_trait]
pub trait FetchClient: Send + Sync {
    /// Downloads the CSV for `target` using `session`.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] of kind `SessionExpired` when the platform rejects the
    /// session, so the caller can refresh it instead of failing the job.
    async fn fetch(&self, session: &Session, target: &ExportTarget) -> Result<Vec<u8>, FetchError>;
}
