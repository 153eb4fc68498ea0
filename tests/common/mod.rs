//! Common test utilities for integration tests

use async_trait::async_trait;
use billing_export_cli::auth::{Authenticator, Session, SessionManager};
use billing_export_cli::downloader::{DownloadOrchestrator, OrchestratorSettings, RetryPolicy};
use billing_export_cli::errors::{AppError, AppResult};
use billing_export_cli::fetcher::{ErrorKind, ExportTarget, FetchClient, FetchError};
use billing_export_cli::models::{DateRange, DownloadRequest, ExportType};
use billing_export_cli::report::{ReportWriter, TaskReport};
use billing_export_cli::status::{JobStatusStore, Task};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const BASE_URL: &str = "https://tenant.example.com";

/// Authenticator counting plain and forced calls.
#[derive(Default)]
pub struct FakeAuthenticator {
    pub calls: AtomicUsize,
    pub forced: AtomicUsize,
    pub fail_initial: bool,
    pub fail_forced: bool,
    /// Only the first forced login fails
    pub fail_first_refresh: bool,
}

#[allow(dead_code)]
impl FakeAuthenticator {
    pub fn failing_initial() -> Self {
        Self {
            fail_initial: true,
            ..Self::default()
        }
    }

    pub fn failing_refresh() -> Self {
        Self {
            fail_forced: true,
            ..Self::default()
        }
    }

    pub fn failing_first_refresh() -> Self {
        Self {
            fail_first_refresh: true,
            ..Self::default()
        }
    }

    pub fn forced_calls(&self) -> usize {
        self.forced.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authenticator for FakeAuthenticator {
    async fn ensure_session(&self, force: bool) -> AppResult<Session> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if force {
            let forced = self.forced.fetch_add(1, Ordering::SeqCst) + 1;
            // Widen the window in which other jobs pile up behind the refresh.
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail_forced || (self.fail_first_refresh && forced == 1) {
                return Err(AppError::AuthenticationError("login bot crashed".into()));
            }
        } else if self.fail_initial {
            return Err(AppError::AuthenticationError("no stored session".into()));
        }
        Ok(Session::new(BASE_URL).with_cookie("laravel_session", format!("session-{n}")))
    }
}

/// Scripted outcome of one fetch attempt.
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub enum Step {
    Ok(&'static [u8]),
    Fail(ErrorKind),
}

/// Fetch client replaying scripted outcomes per (customer, export type).
///
/// Targets without a script (or whose script is exhausted) succeed with a small CSV.
#[derive(Default)]
pub struct ScriptedFetchClient {
    scripts: Mutex<HashMap<(u64, ExportType), VecDeque<Step>>>,
    /// Sessions with a lower generation are answered with `SessionExpired`
    min_generation: Option<u64>,
    delay: Duration,
    /// (customer, export type, session generation) of every call
    pub calls: Mutex<Vec<(u64, ExportType, u64)>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

#[allow(dead_code)]
impl ScriptedFetchClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, customer_id: u64, export_type: ExportType, steps: Vec<Step>) -> Self {
        self.scripts
            .lock()
            .insert((customer_id, export_type), steps.into());
        self
    }

    pub fn reject_generations_below(mut self, generation: u64) -> Self {
        self.min_generation = Some(generation);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl FetchClient for ScriptedFetchClient {
    async fn fetch(&self, session: &Session, target: &ExportTarget) -> Result<Vec<u8>, FetchError> {
        self.calls
            .lock()
            .push((target.customer_id, target.export_type, session.generation));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(min) = self.min_generation {
            if session.generation < min {
                return Err(FetchError::new(ErrorKind::SessionExpired, "HTTP 419"));
            }
        }

        let step = self
            .scripts
            .lock()
            .get_mut(&(target.customer_id, target.export_type))
            .and_then(VecDeque::pop_front);
        match step {
            Some(Step::Ok(body)) => Ok(body.to_vec()),
            Some(Step::Fail(kind)) => Err(FetchError::new(kind, format!("scripted {kind}"))),
            None => Ok(format!(
                "customer,export\n{},{}\n",
                target.customer_id, target.export_type
            )
            .into_bytes()),
        }
    }
}

/// Report writer keeping everything in memory.
#[derive(Default)]
pub struct MemoryReportWriter {
    pub exports: Mutex<Vec<(ExportTarget, String, usize)>>,
    pub summaries: Mutex<Vec<TaskReport>>,
    pub fail_exports: bool,
}

#[async_trait]
impl ReportWriter for MemoryReportWriter {
    async fn write_export(
        &self,
        target: &ExportTarget,
        filename: &str,
        payload: &[u8],
    ) -> AppResult<PathBuf> {
        if self.fail_exports {
            return Err(AppError::IoError("disk full".into()));
        }
        self.exports
            .lock()
            .push((*target, filename.to_string(), payload.len()));
        Ok(PathBuf::from(filename))
    }

    async fn write_summary(&self, report: &TaskReport) -> AppResult<PathBuf> {
        self.summaries.lock().push(report.clone());
        Ok(PathBuf::from("report.json"))
    }
}

/// Settings with millisecond backoff and no politeness delay.
#[allow(dead_code)]
pub fn fast_settings() -> OrchestratorSettings {
    OrchestratorSettings {
        concurrency: 20,
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            jitter: 0.0,
        },
        fetch_timeout: Duration::from_secs(5),
        request_delay_min: Duration::ZERO,
        request_delay_max: Duration::ZERO,
        exclusive: false,
    }
}

/// Orchestrator plus handles on its collaborators.
#[allow(dead_code)]
pub struct Harness {
    pub orchestrator: Arc<DownloadOrchestrator>,
    pub authenticator: Arc<FakeAuthenticator>,
    pub sessions: Arc<SessionManager>,
    pub client: Arc<ScriptedFetchClient>,
    pub writer: Arc<MemoryReportWriter>,
}

#[allow(dead_code)]
pub fn harness(
    authenticator: FakeAuthenticator,
    client: ScriptedFetchClient,
    writer: MemoryReportWriter,
    settings: OrchestratorSettings,
) -> Harness {
    let authenticator = Arc::new(authenticator);
    let sessions = Arc::new(SessionManager::new(authenticator.clone()));
    let client = Arc::new(client);
    let writer = Arc::new(writer);
    let orchestrator = Arc::new(DownloadOrchestrator::new(
        sessions.clone(),
        client.clone(),
        writer.clone(),
        Arc::new(JobStatusStore::new()),
        settings,
    ));
    Harness {
        orchestrator,
        authenticator,
        sessions,
        client,
        writer,
    }
}

#[allow(dead_code)]
pub fn request(customers: &[i64], types: &[ExportType]) -> DownloadRequest {
    DownloadRequest::new(
        customers.iter().copied(),
        types.iter().copied(),
        DateRange::parse("2025-07-01", "2025-07-15").unwrap(),
    )
    .unwrap()
}

/// Polls the store until the task reaches a terminal status.
#[allow(dead_code)]
pub async fn wait_for_terminal(store: &JobStatusStore, task_id: &str) -> Arc<Task> {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let task = store.get(task_id).unwrap();
            if task.status.is_terminal() {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("task did not finish in time")
}
