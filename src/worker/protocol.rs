//! Messages exchanged with the inference worker
//!
//! Both directions are tagged enums with a `kind` field, so the protocol is
//! independent of the channel that carries it.

use crate::config::Quality;
use crate::error::{DewatermarkError, ErrorKind};
use crate::types::PixelBuffer;
use serde::{Deserialize, Serialize};

/// Host → worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum WorkerRequest {
    /// Build the model and configure the compute backend
    LoadModel,
    /// Run inference on one buffer
    #[serde(rename_all = "camelCase")]
    ProcessImage {
        /// Caller-chosen, unique among in-flight requests
        id: String,
        buffer: PixelBuffer,
        #[serde(default)]
        quality: Quality,
    },
}

impl WorkerRequest {
    #[must_use]
    pub fn process_image<S: Into<String>>(id: S, buffer: PixelBuffer, quality: Quality) -> Self {
        Self::ProcessImage {
            id: id.into(),
            buffer,
            quality,
        }
    }

    /// Short label for logs
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::LoadModel => "loadModel",
            Self::ProcessImage { .. } => "processImage",
        }
    }
}

/// Worker → host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum WorkerResponse {
    #[serde(rename_all = "camelCase")]
    ModelLoaded {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ProcessingComplete {
        /// Echo of the request id
        id: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        buffer: Option<PixelBuffer>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_kind: Option<ErrorKind>,
    },
}

impl WorkerResponse {
    #[must_use]
    pub fn model_loaded() -> Self {
        Self::ModelLoaded {
            success: true,
            error_message: None,
        }
    }

    pub fn model_failed<S: Into<String>>(message: S) -> Self {
        Self::ModelLoaded {
            success: false,
            error_message: Some(message.into()),
        }
    }

    pub fn processed<S: Into<String>>(id: S, buffer: PixelBuffer) -> Self {
        Self::ProcessingComplete {
            id: id.into(),
            success: true,
            buffer: Some(buffer),
            error_message: None,
            error_kind: None,
        }
    }

    /// Failure reply carrying the error's message and structured kind
    pub fn failed<S: Into<String>>(id: S, error: &DewatermarkError) -> Self {
        Self::ProcessingComplete {
            id: id.into(),
            success: false,
            buffer: None,
            error_message: Some(error.detail()),
            error_kind: Some(error.kind()),
        }
    }

    /// Request id for `ProcessingComplete`, `None` for `ModelLoaded`
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::ModelLoaded { .. } => None,
            Self::ProcessingComplete { id, .. } => Some(id),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        match self {
            Self::ModelLoaded { success, .. } | Self::ProcessingComplete { success, .. } => *success,
        }
    }
}

/// Turn a `ProcessingComplete` payload back into a call result
///
/// A success without a buffer or a failure without a message still yields an
/// error rather than a panic.
pub fn completion_result(
    success: bool,
    buffer: Option<PixelBuffer>,
    error_message: Option<String>,
    error_kind: Option<ErrorKind>,
) -> crate::Result<PixelBuffer> {
    match (success, buffer) {
        (true, Some(buffer)) => Ok(buffer),
        (true, None) => Err(DewatermarkError::processing(
            "Worker reported success without a result buffer",
        )),
        (false, _) => {
            let message = error_message.unwrap_or_else(|| "Unknown worker error".to_string());
            Err(DewatermarkError::from_kind(
                error_kind.unwrap_or(ErrorKind::Processing),
                message,
            ))
        },
    }
}
