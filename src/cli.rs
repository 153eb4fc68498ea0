use crate::auth::{FileAuthenticator, SessionManager};
use crate::config::{load_settings, ResolvedConfig, ResolvedConfigFile};
use crate::constants::RECENT_EXPORTS_LIMIT;
use crate::downloader::{DownloadOrchestrator, OrchestratorSettings};
use crate::errors::{AppError, AppResult};
use crate::fetcher::ReqwestFetchClient;
use crate::models::{DownloadRequest, ExportType, JobSubmission};
use crate::report::{recent_exports, FsReportWriter};
use crate::status::{JobStatusStore, Task, TaskProgress, TaskStatus};
use crate::ui;
use crate::utils::format_size;
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

// CLI metadata constants
const APP_NAME: &str = env!("CARGO_PKG_NAME");
const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
const APP_ABOUT: &str = env!("CARGO_PKG_DESCRIPTION");

/// Builds the command-line definition.
///
/// Three subcommands are available:
/// - `run`: download the exports given on the command line
/// - `toml`: download the exports described by a TOML file
/// - `recent`: list the most recent export folders
pub fn build_command() -> Command<'static> {
    Command::new(APP_NAME)
        .version(APP_VERSION)
        .about(APP_ABOUT)
        .subcommand(
            Command::new("run")
                .about("Download billing exports for customers over a date range")
                .after_help("Example:\n  billing-export-cli run -c 205,206 -t orders,stored -s 2025-07-01 -e 2025-07-15")
                .arg(
                    Arg::new("customers")
                        .short('c')
                        .long("customers")
                        .help("Comma-separated customer ids")
                        .required(true)
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("types")
                        .short('t')
                        .long("types")
                        .help("Comma-separated export types: store_products, stored_products, packed_products, packed_orders (or store, stored, products, orders)")
                        .default_value("store_products,stored_products,packed_products,packed_orders")
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("start")
                        .short('s')
                        .long("start")
                        .help("First day of the range (YYYY-MM-DD)")
                        .required(true)
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("end")
                        .short('e')
                        .long("end")
                        .help("Last day of the range, inclusive (YYYY-MM-DD)")
                        .required(true)
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("concurrency")
                        .short('j')
                        .long("concurrency")
                        .help("Number of exports fetched in parallel")
                        .value_parser(clap::value_parser!(usize))
                        .action(ArgAction::Set),
                )
                .arg(output_arg())
                .arg(settings_arg()),
        )
        .subcommand(
            Command::new("toml")
                .about("Run using a TOML configuration file")
                .arg(
                    Arg::new("config")
                        .help("Path to the TOML config file")
                        .required(true)
                        .value_parser(clap::value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new("recent")
                .about("List the most recent export folders")
                .arg(
                    Arg::new("limit")
                        .short('n')
                        .long("limit")
                        .help("Number of folders to show")
                        .default_value("3")
                        .value_parser(clap::value_parser!(usize))
                        .action(ArgAction::Set),
                )
                .arg(output_arg())
                .arg(settings_arg()),
        )
}

fn output_arg() -> Arg<'static> {
    Arg::new("output")
        .short('o')
        .long("output")
        .help("Output directory for exports and reports")
        .value_parser(clap::value_parser!(PathBuf))
        .action(ArgAction::Set)
}

fn settings_arg() -> Arg<'static> {
    Arg::new("config")
        .long("config")
        .help("TOML file with runtime settings (no request keys)")
        .value_parser(clap::value_parser!(PathBuf))
        .action(ArgAction::Set)
}

/// Parses command-line arguments and executes the selected subcommand.
///
/// # Errors
///
/// Returns an error if the arguments or configuration are invalid, the request is
/// rejected, or the download task ends `failed` or `cancelled`.
pub async fn cli() -> AppResult<()> {
    let cmd = build_command();
    let mut cmd_for_help = cmd.clone();
    let matches = cmd.get_matches();

    match matches.subcommand() {
        Some(("run", sub)) => {
            let config = settings_from_matches(sub)?;
            let submission = submission_from_matches(sub)?;
            run_workflow(submission, &config).await
        }
        Some(("toml", sub)) => {
            let config_path = sub
                .get_one::<PathBuf>("config")
                .ok_or_else(|| AppError::ConfigError("Missing config path".into()))?;
            let file_config = ResolvedConfigFile::from_toml_file(config_path)?;
            run_workflow(file_config.submission(), &file_config.resolved).await
        }
        Some(("recent", sub)) => {
            let config = settings_from_matches(sub)?;
            let limit = sub
                .get_one::<usize>("limit")
                .copied()
                .unwrap_or(RECENT_EXPORTS_LIMIT);
            list_recent(&config, limit)
        }
        _ => cmd_for_help
            .print_help()
            .map_err(|e| AppError::IoError(format!("Failed to print help: {e}"))),
    }
}

/// Runtime settings: an optional `--config` file, then `--output`/`--concurrency`.
fn settings_from_matches(sub: &ArgMatches) -> AppResult<ResolvedConfig> {
    let mut config = match sub.get_one::<PathBuf>("config") {
        Some(path) => load_settings(path)?,
        None => ResolvedConfig::default(),
    };
    if let Some(output) = sub.get_one::<PathBuf>("output") {
        config.output_dir = output.clone();
    }
    if let Ok(Some(&concurrency)) = sub.try_get_one::<usize>("concurrency") {
        config.concurrent_fetches = concurrency;
    }
    config.validate()?;
    Ok(config)
}

fn submission_from_matches(sub: &ArgMatches) -> AppResult<JobSubmission> {
    let required = |name: &str| {
        sub.get_one::<String>(name)
            .cloned()
            .ok_or_else(|| AppError::InvalidRequest(format!("Missing --{name}")))
    };

    let customer_ids = split_list(&required("customers")?)
        .into_iter()
        .map(|id| {
            id.parse::<i64>().map_err(|_| {
                AppError::InvalidRequest(format!("Customer id '{id}' is not a number"))
            })
        })
        .collect::<AppResult<Vec<_>>>()?;

    Ok(JobSubmission {
        customer_ids,
        export_types: split_list(&required("types")?),
        start_date: required("start")?,
        end_date: required("end")?,
    })
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Wires the production collaborators together.
pub fn build_orchestrator(config: &ResolvedConfig) -> AppResult<Arc<DownloadOrchestrator>> {
    let authenticator = Arc::new(FileAuthenticator::new(
        config.base_url.clone(),
        config.credentials_file.clone(),
        config.login_command.clone(),
        Duration::from_millis(config.login_timeout_ms),
    ));
    let sessions = Arc::new(SessionManager::new(authenticator));
    let client = Arc::new(ReqwestFetchClient::new()?);
    let writer = Arc::new(FsReportWriter::new(config.output_dir.clone()));
    let store = Arc::new(JobStatusStore::new());

    Ok(Arc::new(DownloadOrchestrator::new(
        sessions,
        client,
        writer,
        store,
        OrchestratorSettings::from(config),
    )))
}

async fn run_workflow(submission: JobSubmission, config: &ResolvedConfig) -> AppResult<()> {
    let request = DownloadRequest::from_submission(&submission)?;
    print_download_info(&request, config);

    let orchestrator = build_orchestrator(config)?;
    let task_id = orchestrator.run(request)?;
    let task = wait_for_task(
        &orchestrator,
        &task_id,
        Duration::from_millis(config.poll_interval_ms),
    )
    .await?;

    print_summary(&task);
    match task.status {
        TaskStatus::Completed => Ok(()),
        _ => Err(AppError::TaskFailed(
            task.task_id.clone(),
            task.message.clone(),
        )),
    }
}

/// Polls the store until the task is terminal, drawing its progress as it changes.
///
/// Ctrl-C cancels the task; polling continues until in-flight jobs have finished.
async fn wait_for_task(
    orchestrator: &DownloadOrchestrator,
    task_id: &str,
    interval: Duration,
) -> AppResult<Arc<Task>> {
    let pb = ui::create_progress_bar(0)?;
    let mut last_progress: Option<TaskProgress> = None;
    let mut cancel_requested = false;

    loop {
        let task = orchestrator.store().get(task_id)?;
        if last_progress != Some(task.progress) {
            ui::show_progress(&pb, &task.progress);
            debug!(
                finished = task.progress.finished(),
                total = task.progress.total,
                "Download progress"
            );
            last_progress = Some(task.progress);
        }
        if task.status.is_terminal() {
            pb.finish_with_message(task.status.as_str());
            return Ok(task);
        }

        if cancel_requested {
            tokio::time::sleep(interval).await;
            continue;
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                pb.println("Interrupted, cancelling jobs that have not started");
                warn!(
                    task_id = task_id,
                    "Interrupted, cancelling jobs that have not started"
                );
                orchestrator.cancel(task_id)?;
                cancel_requested = true;
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

fn print_download_info(request: &DownloadRequest, config: &ResolvedConfig) {
    let types: Vec<&str> = request
        .export_types()
        .iter()
        .map(ExportType::as_str)
        .collect();
    info!(
        customers = request.customer_ids().len(),
        export_types = %types.join(","),
        date_range = %request.range(),
        jobs = request.job_count(),
        concurrency = config.concurrent_fetches,
        output_dir = %config.output_dir.display(),
        "Starting download"
    );
}

fn print_summary(task: &Task) {
    let total_bytes: u64 = task
        .results
        .iter()
        .filter_map(|r| r.bytes)
        .map(|b| b as u64)
        .sum();

    for result in task.results.iter().filter(|r| !r.succeeded()) {
        warn!(
            customer_id = result.customer_id,
            export_type = %result.export_type,
            attempts = result.attempts,
            error_kind = result.error_kind.map(|k| k.as_str()).unwrap_or("unknown"),
            error = result.error.as_deref().unwrap_or(""),
            "Download failed"
        );
    }

    info!(
        task_id = %task.task_id,
        status = task.status.as_str(),
        succeeded = task.progress.succeeded,
        failed = task.progress.failed,
        downloaded = %format_size(total_bytes),
        summary = %task.message,
        "Download finished"
    );
}

fn list_recent(config: &ResolvedConfig, limit: usize) -> AppResult<()> {
    let folders = recent_exports(&config.output_dir, limit)?;
    if folders.is_empty() {
        info!(
            output_dir = %config.output_dir.display(),
            "No exports found"
        );
        return Ok(());
    }
    for folder in folders {
        info!(
            folder = %folder.name,
            csv_files = folder.csv_count,
            created_at = %folder.created_at.format("%Y-%m-%d %H:%M:%S"),
            path = %folder.path.display(),
            "Export folder"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_command_parses_defaults() {
        let matches = build_command()
            .try_get_matches_from(vec![
                "billing-export-cli",
                "run",
                "-c",
                "205, 206,",
                "-s",
                "2025-07-01",
                "-e",
                "2025-07-15",
            ])
            .unwrap();
        let sub = matches.subcommand_matches("run").unwrap();

        let submission = submission_from_matches(sub).unwrap();
        assert_eq!(submission.customer_ids, vec![205, 206]);
        assert_eq!(submission.export_types.len(), 4);
        assert_eq!(submission.end_date, "2025-07-15");

        let config = settings_from_matches(sub).unwrap();
        assert_eq!(config.concurrent_fetches, 20);
    }

    #[test]
    fn run_command_overrides_settings() {
        let matches = build_command()
            .try_get_matches_from(vec![
                "billing-export-cli",
                "run",
                "-c",
                "1",
                "-t",
                "orders",
                "-s",
                "2025-07-01",
                "-e",
                "2025-07-01",
                "-j",
                "3",
                "-o",
                "out",
            ])
            .unwrap();
        let sub = matches.subcommand_matches("run").unwrap();
        let config = settings_from_matches(sub).unwrap();
        assert_eq!(config.concurrent_fetches, 3);
        assert_eq!(config.output_dir, PathBuf::from("out"));
        assert_eq!(
            submission_from_matches(sub).unwrap().export_types,
            vec!["orders"]
        );
    }

    #[test]
    fn non_numeric_customer_is_invalid() {
        let matches = build_command()
            .try_get_matches_from(vec![
                "billing-export-cli",
                "run",
                "-c",
                "abc",
                "-s",
                "2025-07-01",
                "-e",
                "2025-07-01",
            ])
            .unwrap();
        let sub = matches.subcommand_matches("run").unwrap();
        assert!(matches!(
            submission_from_matches(sub),
            Err(AppError::InvalidRequest(_))
        ));
    }

    #[test]
    fn run_command_requires_dates() {
        let result =
            build_command().try_get_matches_from(vec!["billing-export-cli", "run", "-c", "1"]);
        assert!(result.is_err());
    }

    #[test]
    fn toml_command_requires_path() {
        let result = build_command().try_get_matches_from(vec!["billing-export-cli", "toml"]);
        assert!(result.is_err());
    }

    #[test]
    fn recent_command_defaults_limit() {
        let matches = build_command()
            .try_get_matches_from(vec!["billing-export-cli", "recent"])
            .unwrap();
        let sub = matches.subcommand_matches("recent").unwrap();
        assert_eq!(sub.get_one::<usize>("limit").copied(), Some(3));
    }

    #[test]
    fn recent_lists_nothing_for_missing_dir() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = ResolvedConfig {
            output_dir: tmp.path().join("absent"),
            ..ResolvedConfig::default()
        };
        assert!(list_recent(&config, 3).is_ok());
    }
}
