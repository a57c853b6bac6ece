//! Batch controller
//!
//! Drives a collection of [`ImageJob`]s through `Idle → Processing → Done | Error`
//! one at a time, with a single reduced-size retry for capacity failures.

use crate::{
    backends::DefaultModelLoader,
    client::{InferenceClient, WorkerClient},
    config::{PipelineConfig, Quality},
    error::{DewatermarkError, Result},
    services::{
        progress_percent, BatchSummary, ImageNormalizer, JobStage, NoOpProgressReporter,
        NormalizeOptions, OutputFormatHandler, ProgressReporter, ProgressUpdate,
    },
    types::{ImageJob, JobId, JobResult, JobStatus, PixelBuffer, SourceImage},
};
use instant::Instant;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Sequential job runner over an [`InferenceClient`]
pub struct BatchController {
    client: Arc<dyn InferenceClient>,
    config: PipelineConfig,
    normalizer: ImageNormalizer,
    reporter: Box<dyn ProgressReporter>,
    jobs: Vec<ImageJob>,
    progress: u8,
}

impl BatchController {
    /// Create a controller over an existing client
    ///
    /// # Errors
    /// - `InvalidConfig` when `config` fails validation
    pub fn new(client: Arc<dyn InferenceClient>, config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            client,
            normalizer: ImageNormalizer::from_config(&config),
            config,
            reporter: Box::new(NoOpProgressReporter),
            jobs: Vec::new(),
            progress: 0,
        })
    }

    /// Spawn an in-process worker for `config.engine` and build a controller over it
    ///
    /// Model loading starts immediately; [`BatchController::run`] waits for it.
    ///
    /// # Errors
    /// - `InvalidConfig` when `config` fails validation
    /// - `Internal` when called outside a Tokio runtime
    pub fn with_worker(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let client = WorkerClient::spawn(Box::new(DefaultModelLoader), config.engine.clone())?;
        Self::new(Arc::new(client), config)
    }

    /// Replace the progress reporter
    #[must_use]
    pub fn with_reporter(mut self, reporter: Box<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Ingest a source as a new Idle job
    pub fn add_source(&mut self, source: SourceImage) -> JobId {
        let job = ImageJob::new(source);
        let id = job.id();
        debug!(%id, name = job.name(), "Added job");
        self.jobs.push(job);
        id
    }

    /// Ingest several sources, preserving their order
    pub fn add_sources<I>(&mut self, sources: I) -> Vec<JobId>
    where
        I: IntoIterator<Item = SourceImage>,
    {
        sources.into_iter().map(|source| self.add_source(source)).collect()
    }

    /// Remove a job and release its buffers
    pub fn remove_job(&mut self, id: JobId) -> Option<ImageJob> {
        let position = self.jobs.iter().position(|job| job.id() == id)?;
        Some(self.jobs.remove(position))
    }

    /// Jobs in ingestion order
    #[must_use]
    pub fn jobs(&self) -> &[ImageJob] {
        &self.jobs
    }

    #[must_use]
    pub fn job(&self, id: JobId) -> Option<&ImageJob> {
        self.jobs.iter().find(|job| job.id() == id)
    }

    fn job_mut(&mut self, id: JobId) -> Option<&mut ImageJob> {
        self.jobs.iter_mut().find(|job| job.id() == id)
    }

    /// Percentage of the last run's snapshot that has finished (0-100)
    #[must_use]
    pub fn progress(&self) -> u8 {
        self.progress
    }

    /// Count of jobs currently in `status`
    #[must_use]
    pub fn count(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|job| job.status() == status).count()
    }

    /// `(original name, result)` for every Done job, for export
    pub fn completed_outputs(&self) -> impl Iterator<Item = (&str, &JobResult)> {
        self.jobs
            .iter()
            .filter_map(|job| job.result().map(|result| (job.name(), result)))
    }

    /// Process every job that is Idle when the run starts
    ///
    /// Jobs run strictly one after another. Per-job failures are recorded on the
    /// job and never end the run.
    ///
    /// # Errors
    /// - `Model` or `NotReady` when the worker cannot load its model; no job is
    ///   touched in that case
    #[instrument(skip(self), fields(jobs = self.jobs.len()))]
    pub async fn run(&mut self) -> Result<BatchSummary> {
        let start = Instant::now();

        if let Err(e) = self.client.wait_until_ready().await {
            self.reporter.report_error(None, &e.to_string());
            return Err(e);
        }

        let snapshot: Vec<JobId> = self
            .jobs
            .iter()
            .filter(|job| job.status() == JobStatus::Idle)
            .map(ImageJob::id)
            .collect();

        if snapshot.is_empty() {
            debug!("No idle jobs, nothing to run");
            return Ok(BatchSummary::default());
        }

        let total = snapshot.len();
        let mut summary = BatchSummary {
            total,
            ..BatchSummary::default()
        };
        self.progress = 0;
        info!(total, "Starting batch run");

        for (index, id) in snapshot.into_iter().enumerate() {
            let Some(source) = self.job_mut(id).map(|job| {
                job.mark_processing();
                job.source().clone()
            }) else {
                continue;
            };

            let status = match self.process_job(id, &source).await {
                Ok(result) => {
                    if result.recovered {
                        summary.recovered += 1;
                    }
                    summary.done += 1;
                    if let Some(job) = self.job_mut(id) {
                        job.mark_done(result);
                    }
                    JobStatus::Done
                },
                Err(e) => {
                    let message = e.to_string();
                    warn!(%id, name = %source.name, error = %message, "Job failed");
                    self.reporter.report_error(Some(id), &message);
                    summary.failed += 1;
                    if let Some(job) = self.job_mut(id) {
                        job.mark_error(message);
                    }
                    JobStatus::Error
                },
            };

            let completed = index + 1;
            self.progress = progress_percent(completed, total);
            self.reporter.report_progress(ProgressUpdate {
                completed,
                total,
                progress: self.progress,
                job_id: id,
                job_name: source.name.clone(),
                status,
                elapsed_ms: start.elapsed().as_millis() as u64,
            });
        }

        summary.elapsed_ms = start.elapsed().as_millis() as u64;
        self.reporter.report_completion(&summary);
        Ok(summary)
    }

    /// One job: a standard attempt and, for capacity failures, one recovery
    async fn process_job(&self, id: JobId, source: &SourceImage) -> Result<JobResult> {
        let request_id = id.to_string();

        match self
            .attempt(id, source, NormalizeOptions::default(), Quality::Standard, &request_id)
            .await
        {
            Ok(output) => self.encode(id, source, &output, false),
            Err(e) if e.is_capacity_related() => {
                let reduced = self.config.recovery_max_dimension();
                warn!(%id, error = %e, max_dimension = reduced, "Capacity failure, retrying at reduced size");
                self.reporter.report_job_stage(id, &source.name, JobStage::Recovery);

                let output = self
                    .attempt(
                        id,
                        source,
                        NormalizeOptions::with_max_dimension(reduced),
                        Quality::Reduced,
                        &request_id,
                    )
                    .await?;
                self.encode(id, source, &output, true)
            },
            Err(e) => Err(e),
        }
    }

    async fn attempt(
        &self,
        id: JobId,
        source: &SourceImage,
        options: NormalizeOptions,
        quality: Quality,
        request_id: &str,
    ) -> Result<PixelBuffer> {
        self.reporter.report_job_stage(id, &source.name, JobStage::Normalizing);
        let buffer = self.normalize(source, options).await?;

        self.reporter.report_job_stage(id, &source.name, JobStage::Inference);
        self.client.process_image(request_id, buffer, quality).await
    }

    /// Decode and resize off the async executor
    async fn normalize(&self, source: &SourceImage, options: NormalizeOptions) -> Result<PixelBuffer> {
        let normalizer = self.normalizer.clone();
        let source = source.clone();
        tokio::task::spawn_blocking(move || normalizer.normalize(&source, &options))
            .await
            .map_err(|e| DewatermarkError::internal(format!("Normalization task failed: {e}")))?
    }

    fn encode(&self, id: JobId, source: &SourceImage, output: &PixelBuffer, recovered: bool) -> Result<JobResult> {
        self.reporter.report_job_stage(id, &source.name, JobStage::Encoding);
        let format = self.config.output_format;
        let data = OutputFormatHandler::encode(output, format, self.config.jpeg_quality)?;
        Ok(JobResult {
            data,
            format,
            width: output.width(),
            height: output.height(),
            recovered,
        })
    }
}

impl std::fmt::Debug for BatchController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchController")
            .field("jobs", &self.jobs.len())
            .field("progress", &self.progress)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
