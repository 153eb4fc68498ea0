//! Tests for loading a download run from a TOML file

use billing_export_cli::config::ResolvedConfigFile;
use billing_export_cli::downloader::OrchestratorSettings;
use billing_export_cli::errors::AppError;
use billing_export_cli::models::{DownloadRequest, ExportType};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_config_file_drives_request_and_settings() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("billing.toml");

    let config_content = r#"
customers = [207, 205, 205]
export_types = ["packed-orders", "StoredProductsExport"]
start = "2025-07-01"
end = "2025-07-15"

output_dir = "exports"
base_url = "https://tenant.example.com"
credentials_file = "secrets/auth.json"
login_command = ["node", "bot/login.js"]
concurrent_fetches = 8
max_attempts = 5
retry_base_delay_ms = 250
retry_max_delay_ms = 4000
fetch_timeout_ms = 15000
request_delay_min_ms = 0
request_delay_max_ms = 50
"#;
    fs::write(&config_path, config_content).unwrap();

    let config = ResolvedConfigFile::from_toml_file(&config_path).unwrap();
    assert_eq!(config.resolved.output_dir, PathBuf::from("exports"));
    assert_eq!(
        config.resolved.credentials_file,
        PathBuf::from("secrets/auth.json")
    );

    let request = DownloadRequest::from_submission(&config.submission()).unwrap();
    assert_eq!(
        request.customer_ids().iter().copied().collect::<Vec<_>>(),
        vec![205, 207]
    );
    assert_eq!(
        request.export_types().iter().copied().collect::<Vec<_>>(),
        vec![ExportType::StoredProducts, ExportType::PackedOrders]
    );
    assert_eq!(request.job_count(), 4);

    let settings = OrchestratorSettings::from(&config.resolved);
    assert_eq!(settings.concurrency, 8);
    assert_eq!(settings.retry.max_attempts, 5);
    assert_eq!(settings.retry.base_delay, Duration::from_millis(250));
    assert_eq!(settings.fetch_timeout, Duration::from_secs(15));
    assert_eq!(settings.request_delay_max, Duration::from_millis(50));
    assert!(settings.exclusive);
}

#[test]
fn test_config_with_invalid_dates_is_rejected_at_submission() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("billing.toml");
    fs::write(
        &config_path,
        r#"
customers = [1]
start = "2025-07-15"
end = "2025-07-01"
"#,
    )
    .unwrap();

    // The file itself is well-formed; the range is validated with the request.
    let config = ResolvedConfigFile::from_toml_file(&config_path).unwrap();
    assert!(matches!(
        DownloadRequest::from_submission(&config.submission()),
        Err(AppError::InvalidRequest(_))
    ));
}

#[test]
fn test_missing_config_file_is_io_error() {
    let temp_dir = TempDir::new().unwrap();
    let err = ResolvedConfigFile::from_toml_file(&temp_dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, AppError::IoError(_)));
}
