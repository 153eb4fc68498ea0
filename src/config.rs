use crate::constants::{
    DEFAULT_BASE_URL, DEFAULT_CONCURRENT_FETCHES, DEFAULT_CREDENTIALS_FILE,
    DEFAULT_FETCH_TIMEOUT_MS, DEFAULT_LOGIN_TIMEOUT_MS, DEFAULT_MAX_ATTEMPTS, DEFAULT_OUTPUT_DIR,
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_REQUEST_DELAY_MAX_MS, DEFAULT_REQUEST_DELAY_MIN_MS,
    DEFAULT_RETRY_BASE_DELAY_MS, DEFAULT_RETRY_JITTER, DEFAULT_RETRY_MAX_DELAY_MS,
};
use crate::errors::{AppError, AppResult};
use crate::models::{ExportType, JobSubmission};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Resolved configuration with all values filled in (no Options).
///
/// This struct represents the runtime defaults and can be deserialized by the TOML
/// loader. All fields have concrete values, making it safe to access directly without unwrapping.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolvedConfig {
    /// Root directory for exports; one sub-folder per date range
    pub output_dir: PathBuf,
    /// Platform origin, e.g. `https://tenant.example.com`
    pub base_url: String,

    // Authentication
    /// JSON credential store written by the login command
    pub credentials_file: PathBuf,
    /// Program and arguments that perform an interactive login and refresh the
    /// credential store. Empty disables re-login.
    pub login_command: Vec<String>,
    pub login_timeout_ms: u64,

    // Downloads
    /// Number of jobs fetching concurrently
    pub concurrent_fetches: usize,
    /// Attempts per job, including the first
    pub max_attempts: u32,
    /// Delay in milliseconds after the first failed attempt
    pub retry_base_delay_ms: u64,
    /// Maximum delay in milliseconds between attempts
    pub retry_max_delay_ms: u64,
    /// Relative jitter applied to retry delays
    pub retry_jitter: f64,
    /// Upper bound on a single fetch attempt
    pub fetch_timeout_ms: u64,
    /// Random pause before each job's first request is drawn from
    /// `[request_delay_min_ms, request_delay_max_ms]`
    pub request_delay_min_ms: u64,
    pub request_delay_max_ms: u64,
    /// Reject submissions while another task is running
    pub exclusive_tasks: bool,

    // Reporting
    /// How often the CLI polls the task status
    pub poll_interval_ms: u64,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            base_url: DEFAULT_BASE_URL.to_string(),
            credentials_file: PathBuf::from(DEFAULT_CREDENTIALS_FILE),
            login_command: Vec::new(),
            login_timeout_ms: DEFAULT_LOGIN_TIMEOUT_MS,
            concurrent_fetches: DEFAULT_CONCURRENT_FETCHES,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            retry_max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            retry_jitter: DEFAULT_RETRY_JITTER,
            fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
            request_delay_min_ms: DEFAULT_REQUEST_DELAY_MIN_MS,
            request_delay_max_ms: DEFAULT_REQUEST_DELAY_MAX_MS,
            exclusive_tasks: true,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl ResolvedConfig {
    /// Checks value ranges the type system cannot express.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if concurrency, attempts, fetch timeout or poll interval is
    /// zero, a delay range is inverted, or the jitter is outside `[0, 1)`.
    pub fn validate(&self) -> AppResult<()> {
        if self.concurrent_fetches == 0 {
            return Err(AppError::ConfigError(
                "concurrent_fetches must be greater than 0".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(AppError::ConfigError(
                "max_attempts must be greater than 0".into(),
            ));
        }
        if self.fetch_timeout_ms == 0 {
            return Err(AppError::ConfigError(
                "fetch_timeout_ms must be greater than 0".into(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(AppError::ConfigError(
                "poll_interval_ms must be greater than 0".into(),
            ));
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(AppError::ConfigError(format!(
                "retry_base_delay_ms ({}) must not exceed retry_max_delay_ms ({})",
                self.retry_base_delay_ms, self.retry_max_delay_ms
            )));
        }
        if self.request_delay_min_ms > self.request_delay_max_ms {
            return Err(AppError::ConfigError(format!(
                "request_delay_min_ms ({}) must not exceed request_delay_max_ms ({})",
                self.request_delay_min_ms, self.request_delay_max_ms
            )));
        }
        if !(0.0..1.0).contains(&self.retry_jitter) {
            return Err(AppError::ConfigError(format!(
                "retry_jitter must be in [0, 1), got {}",
                self.retry_jitter
            )));
        }
        Ok(())
    }
}

/// Configuration that can be loaded from a TOML file.
///
/// Deserializes the download request (customers, export types, start, end) and optional
/// runtime configuration. The parser rejects unknown keys to catch typos.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResolvedConfigFile {
    /// Customer ids to export
    pub customers: Vec<i64>,
    /// Export type names; all types when omitted
    #[serde(default = "default_export_types")]
    pub export_types: Vec<String>,
    /// First day of the range, `YYYY-MM-DD`
    pub start: String,
    /// Last day of the range (inclusive), `YYYY-MM-DD`
    pub end: String,
    /// Flattened resolved configuration with runtime defaults
    #[serde(flatten)]
    pub resolved: ResolvedConfig,
}

impl ResolvedConfigFile {
    /// Loads and validates configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the TOML is malformed, required fields are missing,
    /// unknown keys are present, or a value fails [`ResolvedConfig::validate`].
    pub fn from_toml_file(path: &Path) -> AppResult<Self> {
        let contents = fs::read_to_string(path)?;
        let config: ResolvedConfigFile = toml::from_str(&contents)
            .map_err(|e| AppError::ConfigError(format!("Failed to parse config: {e}")))?;
        config.resolved.validate()?;
        Ok(config)
    }

    /// The download request described by this file.
    pub fn submission(&self) -> JobSubmission {
        JobSubmission {
            customer_ids: self.customers.clone(),
            export_types: self.export_types.clone(),
            start_date: self.start.clone(),
            end_date: self.end.clone(),
        }
    }
}

/// Loads only the runtime settings from a TOML file (used with `run --config`).
///
/// Request keys such as `customers` are rejected like any other unknown key.
pub fn load_settings(path: &Path) -> AppResult<ResolvedConfig> {
    let contents = fs::read_to_string(path)?;
    let config: ResolvedConfig = toml::from_str(&contents)
        .map_err(|e| AppError::ConfigError(format!("Failed to parse config: {e}")))?;
    config.validate()?;
    Ok(config)
}

fn default_export_types() -> Vec<String> {
    ExportType::ALL.iter().map(|t| t.as_str().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn toml_file(contents: &str) -> NamedTempFile {
        let mut tmp = NamedTempFile::new().unwrap();
        write!(tmp, "{contents}").unwrap();
        tmp
    }

    #[test]
    fn default_config_values() {
        let config = ResolvedConfig::default();
        assert_eq!(config.output_dir, PathBuf::from("billing_exports"));
        assert_eq!(config.concurrent_fetches, 20);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.retry_base_delay_ms, 1000);
        assert_eq!(config.fetch_timeout_ms, 30000);
        assert!(config.login_command.is_empty());
        assert!(config.exclusive_tasks);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn minimal_toml_is_parsed_and_defaults_apply() {
        let tmp = toml_file(
            r#"
            customers = [205, 206]
            start = "2025-07-01"
            end = "2025-07-15"
            "#,
        );

        let config = ResolvedConfigFile::from_toml_file(tmp.path()).unwrap();
        assert_eq!(config.customers, vec![205, 206]);
        assert_eq!(
            config.export_types,
            vec![
                "store_products",
                "stored_products",
                "packed_products",
                "packed_orders",
            ]
        );
        assert_eq!(config.resolved.max_attempts, 3);
        assert_eq!(config.resolved.concurrent_fetches, 20);

        let submission = config.submission();
        assert_eq!(submission.start_date, "2025-07-01");
        assert_eq!(submission.export_types.len(), 4);
    }

    #[test]
    fn overrides_are_applied() {
        let tmp = toml_file(
            r#"
            customers = [1]
            export_types = ["orders"]
            start = "2025-07-01"
            end = "2025-07-01"
            output_dir = "/tmp/exports"
            concurrent_fetches = 4
            login_command = ["node", "login.js"]
            exclusive_tasks = false
            "#,
        );

        let config = ResolvedConfigFile::from_toml_file(tmp.path()).unwrap();
        assert_eq!(config.export_types, vec!["orders"]);
        assert_eq!(config.resolved.output_dir, PathBuf::from("/tmp/exports"));
        assert_eq!(config.resolved.concurrent_fetches, 4);
        assert_eq!(config.resolved.login_command, vec!["node", "login.js"]);
        assert!(!config.resolved.exclusive_tasks);
    }

    #[test]
    fn missing_required_toml_field_errors() {
        let tmp = toml_file(
            r#"
            customers = [1]
            start = "2025-07-01"
            "#,
        );
        assert!(ResolvedConfigFile::from_toml_file(tmp.path()).is_err());
    }

    #[test]
    fn unknown_key_errors() {
        let tmp = toml_file(
            r#"
            customers = [1]
            start = "2025-07-01"
            end = "2025-07-02"
            extra_flag = true
            "#,
        );
        assert!(matches!(
            ResolvedConfigFile::from_toml_file(tmp.path()),
            Err(AppError::ConfigError(_))
        ));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let tmp = toml_file(
            r#"
            customers = [1]
            start = "2025-07-01"
            end = "2025-07-02"
            concurrent_fetches = 0
            "#,
        );
        let err = ResolvedConfigFile::from_toml_file(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("concurrent_fetches"));
    }

    #[test]
    fn inverted_delay_ranges_are_rejected() {
        let config = ResolvedConfig {
            request_delay_min_ms: 500,
            request_delay_max_ms: 100,
            ..ResolvedConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ResolvedConfig {
            retry_base_delay_ms: 20_000,
            ..ResolvedConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn settings_file_rejects_request_keys() {
        let tmp = toml_file(
            r#"
            output_dir = "out"
            max_attempts = 5
            "#,
        );
        let config = load_settings(tmp.path()).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("out"));
        assert_eq!(config.max_attempts, 5);

        let tmp = toml_file("customers = [1]\n");
        assert!(load_settings(tmp.path()).is_err());
    }
}
