use crate::errors::{AppError, AppResult};
use crate::status::TaskProgress;
use indicatif::{ProgressBar, ProgressStyle};

/// Creates the bar shown while a download task runs.
///
/// # Example
///
/// ```no_run
/// use billing_export_cli::ui;
///
/// # fn main() -> Result<(), billing_export_cli::errors::AppError> {
/// let pb = ui::create_progress_bar(8)?;
/// pb.inc(1);
/// pb.finish_with_message("done");
/// # Ok(())
/// # }
/// ```
pub fn create_progress_bar(total: u64) -> AppResult<ProgressBar> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}",
            )
            .map_err(|e| AppError::IoError(format!("Failed to create progress bar template: {e}")))?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

/// Moves `pb` to the task's current counters.
pub fn show_progress(pb: &ProgressBar, progress: &TaskProgress) {
    pb.set_length(progress.total as u64);
    pb.set_position(progress.finished() as u64);
    pb.set_message(progress_message(progress));
}

fn progress_message(progress: &TaskProgress) -> String {
    if progress.failed == 0 {
        format!("({} ok)", progress.succeeded)
    } else {
        format!("({} ok, {} failed)", progress.succeeded, progress.failed)
    }
}
