//! Progress reporting service
//!
//! Separates batch progress reporting from the controller, so the host's
//! presentation layer (console, progress bar, UI channel) can plug in its own
//! handling.

use crate::types::{JobId, JobStatus};
use serde::Serialize;
use tokio::sync::mpsc;

/// Step a job is in while the controller works on it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    /// Decoding and resizing the source
    Normalizing,
    /// Waiting on the inference worker
    Inference,
    /// Retrying at reduced size after a capacity failure
    Recovery,
    /// Re-encoding the result
    Encoding,
}

impl JobStage {
    /// Get a human-readable description of the stage
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            JobStage::Normalizing => "Normalizing image",
            JobStage::Inference => "Running inference",
            JobStage::Recovery => "Retrying at reduced size",
            JobStage::Encoding => "Encoding result",
        }
    }
}

/// Batch progress after a job finishes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressUpdate {
    /// Jobs finished so far in this run
    pub completed: usize,
    /// Jobs snapshotted at the start of the run
    pub total: usize,
    /// `round(completed / total * 100)`
    pub progress: u8,
    /// Job that just finished
    pub job_id: JobId,
    pub job_name: String,
    /// Terminal status of that job
    pub status: JobStatus,
    /// Elapsed time since the run started (milliseconds)
    pub elapsed_ms: u64,
}

/// Final tallies for a batch run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub done: usize,
    pub failed: usize,
    /// Done jobs that needed the capacity recovery pass
    pub recovered: usize,
    pub elapsed_ms: u64,
}

impl BatchSummary {
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// Rounded completion percentage, clamped to 0-100
#[must_use]
pub fn progress_percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let percent = (completed.min(total) as f64 / total as f64 * 100.0).round();
    percent as u8
}

/// Trait for reporting progress during batch runs
pub trait ProgressReporter: Send + Sync {
    /// Report progress after a job reaches Done or Error
    fn report_progress(&self, update: ProgressUpdate);

    /// Report that a job entered a new stage
    fn report_job_stage(&self, job_id: JobId, job_name: &str, stage: JobStage) {
        let _ = (job_id, job_name, stage);
    }

    /// Report run completion
    fn report_completion(&self, summary: &BatchSummary);

    /// Report an error; `job_id` is `None` for run-level failures
    fn report_error(&self, job_id: Option<JobId>, error: &str);
}

/// No-op progress reporter that discards all progress updates
pub struct NoOpProgressReporter;

impl ProgressReporter for NoOpProgressReporter {
    fn report_progress(&self, _update: ProgressUpdate) {}

    fn report_completion(&self, _summary: &BatchSummary) {}

    fn report_error(&self, _job_id: Option<JobId>, _error: &str) {}
}

/// Progress reporter that logs through `tracing`
pub struct ConsoleProgressReporter {
    verbose: bool,
}

impl ConsoleProgressReporter {
    /// Create a new console progress reporter
    ///
    /// With `verbose` set, per-job stage changes are logged as well.
    #[must_use]
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressReporter for ConsoleProgressReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        tracing::info!(
            "[{}%] {}/{} {} -> {} ({}ms elapsed)",
            update.progress,
            update.completed,
            update.total,
            update.job_name,
            update.status,
            update.elapsed_ms
        );
    }

    fn report_job_stage(&self, job_id: JobId, job_name: &str, stage: JobStage) {
        if self.verbose {
            tracing::debug!(%job_id, "{}: {}", job_name, stage.description());
        }
    }

    fn report_completion(&self, summary: &BatchSummary) {
        tracing::info!(
            "✅ Batch completed in {}ms: {} done ({} recovered), {} failed",
            summary.elapsed_ms,
            summary.done,
            summary.recovered,
            summary.failed
        );
    }

    fn report_error(&self, job_id: Option<JobId>, error: &str) {
        match job_id {
            Some(id) => tracing::error!(job_id = %id, "❌ {}", error),
            None => tracing::error!("❌ {}", error),
        }
    }
}

/// Events forwarded by [`ChannelProgressReporter`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    Stage {
        job_id: JobId,
        job_name: String,
        stage: JobStage,
    },
    Progress(ProgressUpdate),
    Completed(BatchSummary),
    Error {
        job_id: Option<JobId>,
        message: String,
    },
}

/// Forwards progress to a presentation layer over an unbounded channel
///
/// Sends are fire-and-forget; a dropped receiver silently discards events.
pub struct ChannelProgressReporter {
    sender: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelProgressReporter {
    /// Create a reporter and the receiving end of its channel
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    fn send(&self, event: ProgressEvent) {
        let _ = self.sender.send(event);
    }
}

impl ProgressReporter for ChannelProgressReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        self.send(ProgressEvent::Progress(update));
    }

    fn report_job_stage(&self, job_id: JobId, job_name: &str, stage: JobStage) {
        self.send(ProgressEvent::Stage {
            job_id,
            job_name: job_name.to_string(),
            stage,
        });
    }

    fn report_completion(&self, summary: &BatchSummary) {
        self.send(ProgressEvent::Completed(*summary));
    }

    fn report_error(&self, job_id: Option<JobId>, error: &str) {
        self.send(ProgressEvent::Error {
            job_id,
            message: error.to_string(),
        });
    }
}
