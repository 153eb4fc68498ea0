use crate::constants::*;
use crate::errors::{AppError, AppResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Billing export offered by the platform.
///
/// Variant order is the canonical enumeration order used when sorting reports.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ExportType {
    StoreProducts,
    StoredProducts,
    PackedProducts,
    PackedOrders,
}

impl ExportType {
    /// All export types in canonical order.
    pub const ALL: [ExportType; 4] = [
        Self::StoreProducts,
        Self::StoredProducts,
        Self::PackedProducts,
        Self::PackedOrders,
    ];

    /// Returns a human-readable name for the export type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::StoreProducts => "Store Products",
            Self::StoredProducts => "Stored Products",
            Self::PackedProducts => "Packed Products",
            Self::PackedOrders => "Packed Orders",
        }
    }

    /// Snake-case identifier used in reports and the status API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StoreProducts => "store_products",
            Self::StoredProducts => "stored_products",
            Self::PackedProducts => "packed_products",
            Self::PackedOrders => "packed_orders",
        }
    }

    /// Endpoint path segment on the platform (also the CSV filename stem).
    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::StoreProducts => "store_products_export",
            Self::StoredProducts => "stored_products_export",
            Self::PackedProducts => "packed_products_export",
            Self::PackedOrders => "packed_orders_export",
        }
    }
}

impl fmt::Display for ExportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportType {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let compact: String = value
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| *c != '-' && *c != '_' && !c.is_whitespace())
            .collect();
        let compact = compact.strip_suffix("export").unwrap_or(&compact);

        if STORE_PRODUCTS_ALIASES.contains(&compact) {
            Ok(Self::StoreProducts)
        } else if STORED_PRODUCTS_ALIASES.contains(&compact) {
            Ok(Self::StoredProducts)
        } else if PACKED_PRODUCTS_ALIASES.contains(&compact) {
            Ok(Self::PackedProducts)
        } else if PACKED_ORDERS_ALIASES.contains(&compact) {
            Ok(Self::PackedOrders)
        } else {
            Err(AppError::InvalidRequest(format!(
                "Unknown export type '{value}'. Known types: {}",
                ExportType::ALL.map(|t| t.as_str()).join(", ")
            )))
        }
    }
}

/// Inclusive date range of an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Builds a range, rejecting `start > end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> AppResult<Self> {
        if start > end {
            return Err(AppError::InvalidRequest(format!(
                "start_date ({start}) must not be after end_date ({end})"
            )));
        }
        Ok(Self { start, end })
    }

    /// Parses two `YYYY-MM-DD` dates into a range.
    pub fn parse(start: &str, end: &str) -> AppResult<Self> {
        Self::new(parse_date(start)?, parse_date(end)?)
    }

    pub fn start_str(&self) -> String {
        self.start.format(DATE_FORMAT).to_string()
    }

    pub fn end_str(&self) -> String {
        self.end.format(DATE_FORMAT).to_string()
    }

    /// Folder name holding every artifact of this range.
    pub fn folder_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start_str(), self.end_str())
    }
}

fn parse_date(value: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).map_err(|e| {
        AppError::InvalidRequest(format!("Date '{value}' is not in YYYY-MM-DD format: {e}"))
    })
}

/// Raw job submission as received from a caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSubmission {
    pub customer_ids: Vec<i64>,
    pub export_types: Vec<String>,
    pub start_date: String,
    pub end_date: String,
}

/// Validated, immutable download request.
///
/// Customer ids and export types are sets, so the cross product is free of duplicates
/// and iterates in report order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadRequest {
    customer_ids: BTreeSet<u64>,
    export_types: BTreeSet<ExportType>,
    range: DateRange,
}

impl DownloadRequest {
    pub fn new(
        customer_ids: impl IntoIterator<Item = i64>,
        export_types: impl IntoIterator<Item = ExportType>,
        range: DateRange,
    ) -> AppResult<Self> {
        let mut ids = BTreeSet::new();
        for id in customer_ids {
            if id <= 0 {
                return Err(AppError::InvalidRequest(format!(
                    "Customer ids must be positive, got {id}"
                )));
            }
            ids.insert(id as u64);
        }
        if ids.is_empty() {
            return Err(AppError::InvalidRequest(
                "Select at least one customer".to_string(),
            ));
        }

        let export_types: BTreeSet<ExportType> = export_types.into_iter().collect();
        if export_types.is_empty() {
            return Err(AppError::InvalidRequest(
                "Select at least one export type".to_string(),
            ));
        }

        Ok(Self {
            customer_ids: ids,
            export_types,
            range,
        })
    }

    /// Validates a raw submission.
    pub fn from_submission(submission: &JobSubmission) -> AppResult<Self> {
        let export_types = submission
            .export_types
            .iter()
            .map(|t| t.parse::<ExportType>())
            .collect::<AppResult<Vec<_>>>()?;
        let range = DateRange::parse(&submission.start_date, &submission.end_date)?;
        Self::new(submission.customer_ids.iter().copied(), export_types, range)
    }

    pub fn customer_ids(&self) -> &BTreeSet<u64> {
        &self.customer_ids
    }

    pub fn export_types(&self) -> &BTreeSet<ExportType> {
        &self.export_types
    }

    pub fn range(&self) -> DateRange {
        self.range
    }

    /// Number of jobs the request expands into.
    pub fn job_count(&self) -> usize {
        self.customer_ids.len() * self.export_types.len()
    }
}
