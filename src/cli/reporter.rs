//! Terminal progress reporters for the CLI

use crate::{
    services::{BatchSummary, JobStage, ProgressEvent, ProgressReporter, ProgressUpdate},
    types::{JobId, JobStatus},
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;

const BAR_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}";

/// `indicatif` progress bar over the batch
pub(crate) struct ProgressBarReporter {
    bar: ProgressBar,
}

impl ProgressBarReporter {
    pub(crate) fn new(total: u64) -> Self {
        let bar = ProgressBar::new(total);
        let style = ProgressStyle::default_bar()
            .template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        bar.set_style(style);
        Self { bar }
    }
}

impl ProgressReporter for ProgressBarReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        self.bar.set_position(update.completed as u64);
        if update.status == JobStatus::Done {
            self.bar.set_message(format!("{} done", update.job_name));
        }
    }

    fn report_job_stage(&self, _job_id: JobId, job_name: &str, stage: JobStage) {
        self.bar.set_message(format!("{}: {}", job_name, stage.description()));
    }

    fn report_completion(&self, summary: &BatchSummary) {
        self.bar.finish_with_message(format!(
            "{} done ({} recovered), {} failed",
            summary.done, summary.recovered, summary.failed
        ));
    }

    fn report_error(&self, _job_id: Option<JobId>, error: &str) {
        self.bar.println(format!("✗ {}", error));
    }
}

/// One JSON object per line on stdout, for scripting
pub(crate) struct JsonLinesReporter;

impl JsonLinesReporter {
    pub(crate) fn new() -> Self {
        Self
    }

    fn emit(event: &ProgressEvent) {
        if let Ok(line) = serde_json::to_string(event) {
            let mut stdout = std::io::stdout().lock();
            let _ = writeln!(stdout, "{}", line);
        }
    }
}

impl ProgressReporter for JsonLinesReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        Self::emit(&ProgressEvent::Progress(update));
    }

    fn report_job_stage(&self, job_id: JobId, job_name: &str, stage: JobStage) {
        Self::emit(&ProgressEvent::Stage {
            job_id,
            job_name: job_name.to_string(),
            stage,
        });
    }

    fn report_completion(&self, summary: &BatchSummary) {
        Self::emit(&ProgressEvent::Completed(*summary));
    }

    fn report_error(&self, job_id: Option<JobId>, error: &str) {
        Self::emit(&ProgressEvent::Error {
            job_id,
            message: error.to_string(),
        });
    }
}
