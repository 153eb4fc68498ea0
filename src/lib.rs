//! billing-export-cli library
//!
//! This crate provides the core functionality for the `billing-export-cli` binary.
//!
//! ## Overview
//!
//! The library downloads per-customer billing CSV exports from a fulfilment platform
//! that sits behind an interactive login:
//!
//! - [`auth`] - Session material, the single-flight session cache and the credential-file authenticator
//! - [`fetcher`] - One authenticated export download and the classification of its failures
//! - [`downloader`] - Job expansion, retry policy and the bounded-concurrency orchestrator
//! - [`status`] - Process-wide task registry polled by callers
//! - [`report`] - CSV persistence, per-task JSON reports and the recent exports listing
//! - [`cli`] - Command-line interface wiring the production collaborators together
//! - [`models`] - Export types, date ranges and validated download requests
//! - [`errors`] - Error types used throughout the application
//!
//! ## Example Usage
//!
//! Submitting a request returns a task id immediately; the task is then polled until it
//! reaches a terminal status:
//!
//! ```no_run
//! use billing_export_cli::{cli, config::ResolvedConfig, errors::AppResult, models::JobSubmission};
//!
//! # async fn example() -> AppResult<()> {
//! let orchestrator = cli::build_orchestrator(&ResolvedConfig::default())?;
//! let task_id = orchestrator.submit(&JobSubmission {
//!     customer_ids: vec![205, 206],
//!     export_types: vec!["packed_orders".into()],
//!     start_date: "2025-07-01".into(),
//!     end_date: "2025-07-15".into(),
//! })?;
//! let task = orchestrator.store().get(&task_id)?;
//! println!("{}: {}", task.task_id, task.status.as_str());
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod cli;
pub mod config;
pub mod constants;
pub mod downloader;
pub mod errors;
pub mod fetcher;
pub mod models;
pub mod report;
pub mod status;
pub mod ui;
pub mod utils;
