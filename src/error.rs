//! Error types for dewatermark pipeline operations

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for dewatermark pipeline operations
pub type Result<T> = std::result::Result<T, DewatermarkError>;

/// Message substrings that mark a failure as a hardware capacity problem.
///
/// Inference engines rarely expose structured out-of-memory codes, so the
/// batch controller falls back to matching on these (case-insensitive).
const CAPACITY_MARKERS: [&str; 3] = ["texture size", "webgl", "memory"];

/// Comprehensive error types for the normalizer, worker, client and batch controller
#[derive(Error, Debug)]
pub enum DewatermarkError {
    /// MIME type outside the jpeg/png/webp allow-list
    #[error("Unsupported image type: {0}")]
    UnsupportedType(String),

    /// Bytes are not a decodable image
    #[error("Failed to decode image: {0}")]
    Decode(String),

    /// Decoded size would exceed the configured memory ceiling
    #[error("Memory limit exceeded: {0}")]
    MemoryLimit(String),

    /// Worker received an inference request before its model was loaded
    #[error("{0}")]
    NotLoaded(String),

    /// Client cannot accept requests yet (worker missing or model still loading)
    #[error("Worker not ready: {0}")]
    NotReady(String),

    /// Hardware resource exhaustion reported by the inference engine
    #[error("Device capacity exceeded: {0}")]
    Capacity(String),

    /// Engine output shape does not match the input shape
    #[error("Output shape mismatch: {0}")]
    Shape(String),

    /// Catch-all wrapping an underlying failure
    #[error("Processing error: {0}")]
    Processing(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Model loading or initialization errors
    #[error("Model error: {0}")]
    Model(String),

    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Serializable error classification carried across the worker boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    UnsupportedType,
    Decode,
    MemoryLimit,
    NotLoaded,
    NotReady,
    Capacity,
    Shape,
    Processing,
}

impl DewatermarkError {
    /// Create a new unsupported type error
    pub fn unsupported_type<S: Into<String>>(mime: S) -> Self {
        Self::UnsupportedType(mime.into())
    }

    /// Create a new decode error
    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a new memory limit error
    pub fn memory_limit<S: Into<String>>(msg: S) -> Self {
        Self::MemoryLimit(msg.into())
    }

    /// The canonical "model not loaded" error emitted by the worker
    #[must_use]
    pub fn not_loaded() -> Self {
        Self::NotLoaded("Model not loaded".to_string())
    }

    /// Create a new not-ready error
    pub fn not_ready<S: Into<String>>(msg: S) -> Self {
        Self::NotReady(msg.into())
    }

    /// Create a new capacity error
    pub fn capacity<S: Into<String>>(msg: S) -> Self {
        Self::Capacity(msg.into())
    }

    /// Create a new shape mismatch error
    pub fn shape<S: Into<String>>(msg: S) -> Self {
        Self::Shape(msg.into())
    }

    /// Create a new processing error
    pub fn processing<S: Into<String>>(msg: S) -> Self {
        Self::Processing(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new model error
    pub fn model<S: Into<String>>(msg: S) -> Self {
        Self::Model(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
        recommended: Option<T>,
    ) -> Self {
        let recommendation = match recommended {
            Some(rec) => format!(" Recommended: {}", rec),
            None => String::new(),
        };

        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {}).{}",
            parameter, value, valid_range, recommendation
        ))
    }

    /// Create processing error with stage context
    pub fn processing_stage_error(stage: &str, details: &str, input_info: Option<&str>) -> Self {
        let input_context = match input_info {
            Some(info) => format!(" (input: {})", info),
            None => String::new(),
        };

        Self::Processing(format!(
            "Processing failed at stage '{}'{}: {}",
            stage, input_context, details
        ))
    }

    /// Map an `image` crate failure onto the normalizer taxonomy
    #[must_use]
    pub fn from_image_error(error: image::ImageError) -> Self {
        match error {
            image::ImageError::Decoding(e) => Self::Decode(e.to_string()),
            image::ImageError::Unsupported(e) => Self::Decode(e.to_string()),
            // In-memory sources only hit IO errors on truncated or malformed data
            image::ImageError::IoError(e) => Self::Decode(e.to_string()),
            image::ImageError::Limits(e) => Self::MemoryLimit(e.to_string()),
            other => Self::Processing(other.to_string()),
        }
    }

    /// Classification used on the wire
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedType(_) => ErrorKind::UnsupportedType,
            Self::Decode(_) => ErrorKind::Decode,
            Self::MemoryLimit(_) => ErrorKind::MemoryLimit,
            Self::NotLoaded(_) => ErrorKind::NotLoaded,
            Self::NotReady(_) => ErrorKind::NotReady,
            Self::Capacity(_) => ErrorKind::Capacity,
            Self::Shape(_) => ErrorKind::Shape,
            Self::Processing(_)
            | Self::InvalidConfig(_)
            | Self::Model(_)
            | Self::Io(_)
            | Self::Internal(_) => ErrorKind::Processing,
        }
    }

    /// Message without the variant prefix, suitable for `from_kind`
    ///
    /// `from_kind(e.kind(), e.detail())` displays identically to `e` for every
    /// variant that maps onto its own kind.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::UnsupportedType(msg)
            | Self::Decode(msg)
            | Self::MemoryLimit(msg)
            | Self::NotLoaded(msg)
            | Self::NotReady(msg)
            | Self::Capacity(msg)
            | Self::Shape(msg)
            | Self::Processing(msg) => msg.clone(),
            other => other.to_string(),
        }
    }

    /// Rebuild an error received from the worker
    pub fn from_kind<S: Into<String>>(kind: ErrorKind, detail: S) -> Self {
        let detail = detail.into();
        match kind {
            ErrorKind::UnsupportedType => Self::UnsupportedType(detail),
            ErrorKind::Decode => Self::Decode(detail),
            ErrorKind::MemoryLimit => Self::MemoryLimit(detail),
            ErrorKind::NotLoaded => Self::NotLoaded(detail),
            ErrorKind::NotReady => Self::NotReady(detail),
            ErrorKind::Capacity => Self::Capacity(detail),
            ErrorKind::Shape => Self::Shape(detail),
            ErrorKind::Processing => Self::Processing(detail),
        }
    }

    /// Whether this failure looks like hardware resource exhaustion
    ///
    /// True for structured `Capacity` errors and for any error whose message
    /// mentions texture size, WebGL or memory.
    #[must_use]
    pub fn is_capacity_related(&self) -> bool {
        if matches!(self, Self::Capacity(_)) {
            return true;
        }
        is_capacity_message(&self.to_string())
    }
}

/// Substring heuristic for capacity failures reported only as text
#[must_use]
pub fn is_capacity_message(message: &str) -> bool {
    let lowered = message.to_lowercase();
    CAPACITY_MARKERS.iter().any(|marker| lowered.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = DewatermarkError::invalid_config("test config error");
        assert!(matches!(err, DewatermarkError::InvalidConfig(_)));

        let err = DewatermarkError::unsupported_type("image/gif");
        assert!(matches!(err, DewatermarkError::UnsupportedType(_)));
    }

    #[test]
    fn test_error_display() {
        let err = DewatermarkError::not_loaded();
        assert_eq!(err.to_string(), "Model not loaded");

        let err = DewatermarkError::processing("boom");
        assert_eq!(err.to_string(), "Processing error: boom");
    }

    #[test]
    fn test_kind_round_trip_preserves_display() {
        let errors = [
            DewatermarkError::unsupported_type("image/gif"),
            DewatermarkError::decode("bad header"),
            DewatermarkError::memory_limit("too big"),
            DewatermarkError::not_loaded(),
            DewatermarkError::not_ready("loading"),
            DewatermarkError::capacity("out of device memory"),
            DewatermarkError::shape("expected 64x64, got 32x32"),
            DewatermarkError::processing("wrapped"),
        ];

        for err in errors {
            let rebuilt = DewatermarkError::from_kind(err.kind(), err.detail());
            assert_eq!(rebuilt.to_string(), err.to_string());
            assert_eq!(rebuilt.kind(), err.kind());
        }
    }

    #[test]
    fn test_non_wire_variants_collapse_to_processing() {
        let err = DewatermarkError::model("weights missing");
        assert_eq!(err.kind(), ErrorKind::Processing);

        let rebuilt = DewatermarkError::from_kind(err.kind(), err.detail());
        assert!(rebuilt.to_string().contains("weights missing"));
    }

    #[test]
    fn test_capacity_detection() {
        assert!(DewatermarkError::capacity("device lost").is_capacity_related());
        assert!(DewatermarkError::processing("Requested texture size [8192x8192] greater than maximum")
            .is_capacity_related());
        assert!(DewatermarkError::processing("WebGL context lost").is_capacity_related());
        assert!(DewatermarkError::processing("CUDA out of MEMORY").is_capacity_related());
        assert!(!DewatermarkError::decode("invalid PNG signature").is_capacity_related());
        assert!(!DewatermarkError::shape("expected 4x4, got 2x2").is_capacity_related());
    }

    #[test]
    fn test_config_value_error() {
        let err = DewatermarkError::config_value_error("JPEG quality", 150, "0-100", Some(90));
        let error_string = err.to_string();
        assert!(error_string.contains("JPEG quality"));
        assert!(error_string.contains("150"));
        assert!(error_string.contains("0-100"));
        assert!(error_string.contains("Recommended: 90"));
    }

    #[test]
    fn test_processing_stage_error() {
        let err = DewatermarkError::processing_stage_error(
            "resize",
            "zero-sized target",
            Some("4000x3000 RGBA"),
        );
        let error_string = err.to_string();
        assert!(error_string.contains("resize"));
        assert!(error_string.contains("4000x3000 RGBA"));
    }
}
