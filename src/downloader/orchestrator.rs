use super::job::{Job, JobResult};
use super::retry::{RetryDecision, RetryPolicy};
use crate::auth::{Session, SessionManager};
use crate::config::ResolvedConfig;
use crate::constants::{
    DEFAULT_CONCURRENT_FETCHES, DEFAULT_FETCH_TIMEOUT_MS, DEFAULT_REQUEST_DELAY_MAX_MS,
    DEFAULT_REQUEST_DELAY_MIN_MS,
};
use crate::errors::{AppError, AppResult};
use crate::fetcher::{ErrorKind, FetchClient, FetchError};
use crate::models::{DownloadRequest, JobSubmission};
use crate::report::{ReportWriter, TaskReport};
use crate::status::{JobStatusStore, Task, TaskStatus};
use futures::future::join_all;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Scheduling knobs of the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Maximum number of jobs fetching at the same time
    pub concurrency: usize,
    pub retry: RetryPolicy,
    /// Bound on a single fetch attempt
    pub fetch_timeout: Duration,
    /// Random pause before a job's first attempt is drawn from this range
    pub request_delay_min: Duration,
    pub request_delay_max: Duration,
    /// Refuse new tasks while one is running
    pub exclusive: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENT_FETCHES,
            retry: RetryPolicy::default(),
            fetch_timeout: Duration::from_millis(DEFAULT_FETCH_TIMEOUT_MS),
            request_delay_min: Duration::from_millis(DEFAULT_REQUEST_DELAY_MIN_MS),
            request_delay_max: Duration::from_millis(DEFAULT_REQUEST_DELAY_MAX_MS),
            exclusive: true,
        }
    }
}

impl From<&ResolvedConfig> for OrchestratorSettings {
    fn from(config: &ResolvedConfig) -> Self {
        Self {
            concurrency: config.concurrent_fetches,
            retry: RetryPolicy {
                max_attempts: config.max_attempts,
                base_delay: Duration::from_millis(config.retry_base_delay_ms),
                max_delay: Duration::from_millis(config.retry_max_delay_ms),
                jitter: config.retry_jitter,
            },
            fetch_timeout: Duration::from_millis(config.fetch_timeout_ms),
            request_delay_min: Duration::from_millis(config.request_delay_min_ms),
            request_delay_max: Duration::from_millis(config.request_delay_max_ms),
            exclusive: config.exclusive_tasks,
        }
    }
}

/// Runs download tasks in the background and records them in a [`JobStatusStore`].
///
/// # Behavior
///
/// - **Non-blocking submission**: [`run`](Self::run) registers the task and returns its id;
///   the jobs run on spawned Tokio tasks.
/// - **Bounded concurrency**: at most `concurrency` jobs hold a worker slot at once.
/// - **Shared session**: all jobs use the session cached by the [`SessionManager`]; an
///   expired session triggers one coalesced refresh and the jobs retry with its result.
/// - **Partial failure**: a failing job never aborts its siblings. The task is
///   `completed` when at least one job succeeded.
pub struct DownloadOrchestrator {
    sessions: Arc<SessionManager>,
    client: Arc<dyn FetchClient>,
    writer: Arc<dyn ReportWriter>,
    store: Arc<JobStatusStore>,
    settings: OrchestratorSettings,
    cancellations: Mutex<HashMap<String, CancellationToken>>,
}

impl DownloadOrchestrator {
    pub fn new(
        sessions: Arc<SessionManager>,
        client: Arc<dyn FetchClient>,
        writer: Arc<dyn ReportWriter>,
        store: Arc<JobStatusStore>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            sessions,
            client,
            writer,
            store,
            settings,
            cancellations: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<JobStatusStore> {
        &self.store
    }

    /// Validates a raw submission and starts it.
    pub fn submit(self: &Arc<Self>, submission: &JobSubmission) -> AppResult<String> {
        let request = DownloadRequest::from_submission(submission)?;
        self.run(request)
    }

    /// Registers a task for `request` and starts its jobs in the background.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` if the request expands to no jobs; no task is created.
    /// - `TaskAlreadyRunning` if exclusive tasks are enabled and another task is running.
    pub fn run(self: &Arc<Self>, request: DownloadRequest) -> AppResult<String> {
        let jobs = Job::expand(&request);
        if jobs.is_empty() {
            return Err(AppError::InvalidRequest(
                "Request does not contain any (customer, export type) pair".into(),
            ));
        }

        let task = self.store.insert(Task::new(request), self.settings.exclusive)?;
        let task_id = task.task_id.clone();
        let token = CancellationToken::new();
        self.cancellations
            .lock()
            .insert(task_id.clone(), token.clone());

        info!(
            task_id = %task_id,
            jobs = jobs.len(),
            customers = task.request.customer_ids().len(),
            date_range = %task.request.range(),
            "Download task submitted"
        );

        let this = Arc::clone(self);
        let id = task_id.clone();
        tokio::spawn(async move {
            this.drive(id, jobs, token).await;
        });

        Ok(task_id)
    }

    /// Requests cancellation of a running task.
    ///
    /// Jobs that have not started are recorded as `Cancelled`; jobs already fetching
    /// finish normally. Cancelling a finished task has no effect.
    pub fn cancel(&self, task_id: &str) -> AppResult<()> {
        let task = self.store.get(task_id)?;
        if task.status.is_terminal() {
            return Ok(());
        }
        if let Some(token) = self.cancellations.lock().get(task_id) {
            info!(task_id = task_id, "Cancelling download task");
            token.cancel();
        }
        Ok(())
    }

    async fn drive(self: Arc<Self>, task_id: String, jobs: Vec<Job>, token: CancellationToken) {
        if let Err(e) = self.sessions.current().await {
            error!(task_id = %task_id, error = %e, "Could not obtain a session");
            let message = format!("Authentication failed, no jobs were attempted: {e}");
            let results = jobs
                .into_iter()
                .map(|mut job| {
                    job.fail(ErrorKind::AuthenticationError, e.to_string());
                    job.result()
                })
                .collect();
            self.finish(&task_id, TaskStatus::Failed, message, results)
                .await;
            return;
        }

        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let targets: Vec<_> = jobs.iter().map(|job| job.target).collect();
        let mut handles: Vec<JoinHandle<JobResult>> = Vec::with_capacity(jobs.len());

        for job in jobs {
            let this = Arc::clone(&self);
            let semaphore = semaphore.clone();
            let token = token.clone();
            let task_id = task_id.clone();

            handles.push(tokio::spawn(async move {
                let mut job = job;
                let permit = tokio::select! {
                    biased;
                    _ = token.cancelled() => None,
                    permit = semaphore.acquire() => Some(permit),
                };
                match permit {
                    None => job.fail(
                        ErrorKind::Cancelled,
                        "Task was cancelled before the job started",
                    ),
                    Some(Err(e)) => job.fail(
                        ErrorKind::Other,
                        format!("Failed to acquire worker slot: {e}"),
                    ),
                    Some(Ok(_permit)) => this.run_job(&mut job, &token).await,
                }

                let result = job.result();
                let succeeded = result.succeeded();
                if let Err(e) = this.store.update(&task_id, |t| {
                    if succeeded {
                        t.progress.succeeded += 1;
                    } else {
                        t.progress.failed += 1;
                    }
                }) {
                    warn!(
                        task_id = %task_id,
                        error = %e,
                        "Failed to update task progress"
                    );
                }
                result
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (target, joined) in targets.into_iter().zip(join_all(handles).await) {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => {
                    error!(
                        task_id = %task_id,
                        customer_id = target.customer_id,
                        export_type = %target.export_type,
                        error = %e,
                        "Job worker did not finish"
                    );
                    let mut job = Job::new(target);
                    job.fail(ErrorKind::Other, format!("Job worker did not finish: {e}"));
                    results.push(job.result());
                }
            }
        }
        results.sort_by_key(|r| (r.customer_id, r.export_type));

        let (status, message) = summarize(&results);
        self.finish(&task_id, status, message, results).await;
    }

    /// Runs one job to a terminal outcome: politeness delay, then attempts until success
    /// or the retry policy gives up.
    async fn run_job(&self, job: &mut Job, token: &CancellationToken) {
        let delay = self.politeness_delay();
        if !delay.is_zero() {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    job.fail(
                        ErrorKind::Cancelled,
                        "Task was cancelled before the job started",
                    );
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let mut session = match self.sessions.current().await {
            Ok(session) => session,
            Err(e) => {
                job.fail(ErrorKind::AuthenticationError, e.to_string());
                return;
            }
        };

        loop {
            job.attempts += 1;
            let attempt = job.attempts;
            let err = match self.attempt(&session, job).await {
                Ok(payload) => {
                    self.persist(job, payload).await;
                    return;
                }
                Err(e) => e,
            };

            match self.settings.retry.should_retry(attempt, err.kind) {
                RetryDecision::GiveUp => {
                    warn!(
                        customer_id = job.target.customer_id,
                        export_type = %job.target.export_type,
                        attempts = attempt,
                        error = %err,
                        "Download failed"
                    );
                    job.fail(err.kind, err.message);
                    return;
                }
                RetryDecision::Retry(delay) => {
                    if err.kind == ErrorKind::SessionExpired {
                        debug!(
                            customer_id = job.target.customer_id,
                            export_type = %job.target.export_type,
                            generation = session.generation,
                            "Session expired, waiting for refresh"
                        );
                        session = match self.sessions.refresh(&session).await {
                            Ok(fresh) => fresh,
                            Err(e) => {
                                warn!(
                                    customer_id = job.target.customer_id,
                                    export_type = %job.target.export_type,
                                    error = %e,
                                    "Session refresh failed"
                                );
                                job.fail(
                                    ErrorKind::AuthenticationError,
                                    format!("Session refresh failed: {e}"),
                                );
                                return;
                            }
                        };
                    }
                    warn!(
                        customer_id = job.target.customer_id,
                        export_type = %job.target.export_type,
                        attempt = attempt,
                        max_attempts = self.settings.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying download after error"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }

    async fn attempt(&self, session: &Session, job: &Job) -> Result<Vec<u8>, FetchError> {
        match tokio::time::timeout(
            self.settings.fetch_timeout,
            self.client.fetch(session, &job.target),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(FetchError::new(
                ErrorKind::Timeout,
                format!(
                    "No response within {} ms",
                    self.settings.fetch_timeout.as_millis()
                ),
            )),
        }
    }

    async fn persist(&self, job: &mut Job, payload: Vec<u8>) {
        let filename = job.target.filename();
        match self
            .writer
            .write_export(&job.target, &filename, &payload)
            .await
        {
            Ok(path) => {
                info!(
                    customer_id = job.target.customer_id,
                    export_type = %job.target.export_type,
                    attempts = job.attempts,
                    bytes = payload.len(),
                    path = %path.display(),
                    "Download succeeded"
                );
                job.succeed(payload);
            }
            Err(e) => {
                warn!(
                    customer_id = job.target.customer_id,
                    export_type = %job.target.export_type,
                    error = %e,
                    "Failed to store export"
                );
                job.fail(ErrorKind::PersistenceError, e.to_string());
            }
        }
    }

    fn politeness_delay(&self) -> Duration {
        let min = self.settings.request_delay_min.as_millis() as u64;
        let max = self.settings.request_delay_max.as_millis() as u64;
        if max <= min {
            return Duration::from_millis(min);
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }

    /// Writes the task summary and publishes the terminal task.
    ///
    /// The summary is written first so a poller that sees the terminal status also finds
    /// the report on disk.
    async fn finish(
        &self,
        task_id: &str,
        status: TaskStatus,
        message: String,
        results: Vec<JobResult>,
    ) {
        let mut finished = match self.store.get(task_id) {
            Ok(task) => Task::clone(&task),
            Err(e) => {
                error!(
                    task_id = task_id,
                    error = %e,
                    "Task vanished from the store"
                );
                return;
            }
        };
        finished.finish(status, message, results);

        let report = TaskReport::from_task(&finished);
        match self.writer.write_summary(&report).await {
            Ok(path) => debug!(task_id = task_id, path = %path.display(), "Report written"),
            Err(e) => warn!(task_id = task_id, error = %e, "Failed to write report"),
        }

        info!(
            task_id = task_id,
            status = finished.status.as_str(),
            succeeded = finished.progress.succeeded,
            failed = finished.progress.failed,
            summary = %finished.message,
            "Download task finished"
        );

        if let Err(e) = self.store.update(task_id, move |t| *t = finished) {
            error!(
                task_id = task_id,
                error = %e,
                "Failed to publish task result"
            );
        }
        self.cancellations.lock().remove(task_id);
    }
}

/// Terminal status and message of a task from its job results.
fn summarize(results: &[JobResult]) -> (TaskStatus, String) {
    let total = results.len();
    let succeeded = results.iter().filter(|r| r.succeeded()).count();
    let failures: Vec<String> = results
        .iter()
        .filter(|r| !r.succeeded())
        .map(|r| {
            let kind = r
                .error_kind
                .map(|k| k.as_str())
                .unwrap_or(ErrorKind::Other.as_str());
            format!("customer {} {} ({kind})", r.customer_id, r.export_type)
        })
        .collect();

    let cancelled = results
        .iter()
        .any(|r| r.error_kind == Some(ErrorKind::Cancelled));
    if cancelled {
        return (
            TaskStatus::Cancelled,
            format!("Cancelled: {succeeded} of {total} downloads succeeded"),
        );
    }
    match (succeeded, failures.is_empty()) {
        (0, _) => (
            TaskStatus::Failed,
            format!("All {total} downloads failed: {}", failures.join(", ")),
        ),
        (_, true) => (
            TaskStatus::Completed,
            format!("All {total} downloads succeeded"),
        ),
        _ => (
            TaskStatus::Completed,
            format!(
                "{succeeded} of {total} downloads succeeded; failed: {}",
                failures.join(", ")
            ),
        ),
    }
}
