//! Core data types for the dewatermark pipeline

use crate::config::OutputFormat;
use crate::error::{DewatermarkError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Interleaved RGBA8 pixels
///
/// `data.len() == width * height * 4` always holds; the constructor is the
/// only way to build one.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPixelBuffer")]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

#[derive(Deserialize)]
struct RawPixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl TryFrom<RawPixelBuffer> for PixelBuffer {
    type Error = DewatermarkError;

    fn try_from(raw: RawPixelBuffer) -> Result<Self> {
        Self::new(raw.width, raw.height, raw.data)
    }
}

impl PixelBuffer {
    /// Wrap RGBA8 bytes, rejecting a length that does not match the dimensions
    ///
    /// # Errors
    /// - `Shape` when `data.len() != width * height * 4`
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = Self::byte_len(width, height);
        if data.len() != expected {
            return Err(DewatermarkError::shape(format!(
                "{}x{} RGBA buffer needs {} bytes, got {}",
                width,
                height,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Buffer from an `image` RGBA surface
    #[must_use]
    pub fn from_rgba_image(image: image::RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            data: image.into_raw(),
        }
    }

    /// Convert back into an `image` RGBA surface
    ///
    /// # Errors
    /// - `Internal` if the buffer invariant was somehow violated
    pub fn into_rgba_image(self) -> Result<image::RgbaImage> {
        image::RgbaImage::from_raw(self.width, self.height, self.data).ok_or_else(|| {
            DewatermarkError::internal("pixel buffer length does not match its dimensions")
        })
    }

    /// Required byte length for the given dimensions
    #[must_use]
    pub fn byte_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 4
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

impl fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Original encoded bytes for a job, as acquired by the host
#[derive(Clone)]
pub struct SourceImage {
    /// File name or label supplied by the host
    pub name: String,
    /// Declared MIME type; `None` skips the allow-list check
    pub mime_type: Option<String>,
    /// Encoded image bytes
    pub data: Arc<[u8]>,
}

impl SourceImage {
    pub fn new<N: Into<String>>(name: N, mime_type: Option<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type,
            data: data.into(),
        }
    }

    /// Build a source with the MIME type inferred from the file extension
    pub fn from_named_bytes<N: Into<String>>(name: N, data: Vec<u8>) -> Self {
        let name = name.into();
        let mime_type = mime_from_extension(&name).map(str::to_string);
        Self::new(name, mime_type, data)
    }
}

impl fmt::Debug for SourceImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceImage")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Map a file extension onto its image MIME type
#[must_use]
pub fn mime_from_extension(name: &str) -> Option<&'static str> {
    let extension = std::path::Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())?
        .to_lowercase();

    match extension.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        "tif" | "tiff" => Some("image/tiff"),
        _ => None,
    }
}

/// Opaque, stable job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Idle,
    Processing,
    Done,
    Error,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Processing => write!(f, "processing"),
            Self::Done => write!(f, "done"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Re-encoded output of a finished job
#[derive(Clone, PartialEq, Eq)]
pub struct JobResult {
    /// Encoded image bytes
    pub data: Vec<u8>,
    /// Encoding of `data`
    pub format: OutputFormat,
    pub width: u32,
    pub height: u32,
    /// Produced by the reduced-size capacity recovery pass
    pub recovered: bool,
}

impl fmt::Debug for JobResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobResult")
            .field("format", &self.format)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("recovered", &self.recovered)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// One image tracked through a batch run
///
/// `result` is present iff the status is Done and `error` iff it is Error.
/// Only the batch controller moves a job between states.
#[derive(Debug, Clone)]
pub struct ImageJob {
    id: JobId,
    source: SourceImage,
    status: JobStatus,
    result: Option<JobResult>,
    error: Option<String>,
    created_at: DateTime<Utc>,
}

impl ImageJob {
    pub(crate) fn new(source: SourceImage) -> Self {
        Self {
            id: JobId::new(),
            source,
            status: JobStatus::Idle,
            result: None,
            error: None,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn id(&self) -> JobId {
        self.id
    }

    #[must_use]
    pub fn source(&self) -> &SourceImage {
        &self.source
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.source.name
    }

    #[must_use]
    pub fn status(&self) -> JobStatus {
        self.status
    }

    #[must_use]
    pub fn result(&self) -> Option<&JobResult> {
        self.result.as_ref()
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub(crate) fn mark_processing(&mut self) {
        self.status = JobStatus::Processing;
        self.result = None;
        self.error = None;
    }

    pub(crate) fn mark_done(&mut self, result: JobResult) {
        self.status = JobStatus::Done;
        self.result = Some(result);
        self.error = None;
    }

    pub(crate) fn mark_error<S: Into<String>>(&mut self, message: S) {
        self.status = JobStatus::Error;
        self.result = None;
        self.error = Some(message.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_buffer_rejects_length_mismatch() {
        assert!(PixelBuffer::new(2, 2, vec![0; 16]).is_ok());

        let err = PixelBuffer::new(2, 2, vec![0; 15]).unwrap_err();
        assert!(matches!(err, DewatermarkError::Shape(_)));
        assert!(err.to_string().contains("needs 16 bytes, got 15"));
    }

    #[test]
    fn test_pixel_buffer_deserialize_validates() {
        let bad = r#"{"width":2,"height":2,"data":[0,0,0]}"#;
        assert!(serde_json::from_str::<PixelBuffer>(bad).is_err());

        let good = serde_json::to_string(&PixelBuffer::new(1, 1, vec![1, 2, 3, 4]).unwrap())
            .unwrap();
        let parsed: PixelBuffer = serde_json::from_str(&good).unwrap();
        assert_eq!(parsed.data(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_pixel_buffer_image_conversion() {
        let image = image::RgbaImage::from_pixel(3, 2, image::Rgba([10, 20, 30, 255]));
        let buffer = PixelBuffer::from_rgba_image(image);
        assert_eq!(buffer.dimensions(), (3, 2));
        assert_eq!(buffer.data().len(), 24);

        let back = buffer.into_rgba_image().unwrap();
        assert_eq!(back.get_pixel(2, 1).0, [10, 20, 30, 255]);
    }

    #[test]
    fn test_job_state_transitions() {
        let mut job = ImageJob::new(SourceImage::from_named_bytes("a.png", vec![1, 2, 3]));
        assert_eq!(job.status(), JobStatus::Idle);
        assert!(job.result().is_none() && job.error().is_none());

        job.mark_processing();
        assert_eq!(job.status(), JobStatus::Processing);

        job.mark_error("decode failed");
        assert_eq!(job.status(), JobStatus::Error);
        assert_eq!(job.error(), Some("decode failed"));
        assert!(job.result().is_none());

        job.mark_done(JobResult {
            data: vec![0],
            format: OutputFormat::Png,
            width: 1,
            height: 1,
            recovered: false,
        });
        assert_eq!(job.status(), JobStatus::Done);
        assert!(job.error().is_none());
        assert!(job.result().is_some());
    }

    #[test]
    fn test_job_ids_are_unique() {
        let a = ImageJob::new(SourceImage::from_named_bytes("a.png", vec![]));
        let b = ImageJob::new(SourceImage::from_named_bytes("a.png", vec![]));
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_mime_from_extension() {
        assert_eq!(mime_from_extension("photo.JPG"), Some("image/jpeg"));
        assert_eq!(mime_from_extension("dir/shot.webp"), Some("image/webp"));
        assert_eq!(mime_from_extension("anim.gif"), Some("image/gif"));
        assert_eq!(mime_from_extension("notes.txt"), None);
        assert_eq!(mime_from_extension("noext"), None);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(JobStatus::Processing.to_string(), "processing");
        assert_eq!(
            serde_json::to_string(&JobStatus::Done).unwrap(),
            "\"done\""
        );
    }
}
