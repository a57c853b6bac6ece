//! Services that keep image handling and reporting out of the controller

pub mod format;
pub mod normalizer;
pub mod progress;

pub use format::OutputFormatHandler;
pub use normalizer::{ImageNormalizer, NormalizeOptions, ResizePlan, SUPPORTED_MIME_TYPES};
pub use progress::{
    progress_percent, BatchSummary, ChannelProgressReporter, ConsoleProgressReporter, JobStage,
    NoOpProgressReporter, ProgressEvent, ProgressReporter, ProgressUpdate,
};
