//! Download orchestration for billing exports.
//!
//! A request is expanded into one [`Job`] per (customer, export type) pair. The
//! [`DownloadOrchestrator`] runs those jobs under a concurrency cap, retries transient
//! failures according to a [`RetryPolicy`], and publishes the sorted [`JobResult`]s
//! once the task is finished. The main entry point is [`DownloadOrchestrator::run`].

mod job;
mod orchestrator;
mod retry;

// Re-export public API
pub use job::{Job, JobOutcome, JobResult, ResultOutcome};
pub use orchestrator::{DownloadOrchestrator, OrchestratorSettings};
pub use retry::{RetryDecision, RetryPolicy};
