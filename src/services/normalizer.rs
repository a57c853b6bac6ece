//! Image normalization service
//!
//! Turns encoded source bytes into a bounded, even-sized RGBA8 [`PixelBuffer`]
//! ready for the inference worker.

use crate::{
    config::{PipelineConfig, DEFAULT_MAX_DIMENSION, DEFAULT_MEMORY_LIMIT_BYTES},
    error::{DewatermarkError, Result},
    types::{PixelBuffer, SourceImage},
};
use image::{imageops::FilterType, DynamicImage, ImageReader, RgbaImage};
use std::io::Cursor;
use tracing::{debug, instrument};

/// MIME types accepted by [`ImageNormalizer::validate_type`]
pub const SUPPORTED_MIME_TYPES: [&str; 3] = ["image/jpeg", "image/png", "image/webp"];

/// Per-call overrides for [`ImageNormalizer::normalize`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeOptions {
    /// Longest-side ceiling; falls back to the normalizer's default when `None`
    pub max_dimension: Option<u32>,
}

impl NormalizeOptions {
    #[must_use]
    pub fn with_max_dimension(max_dimension: u32) -> Self {
        Self {
            max_dimension: Some(max_dimension),
        }
    }
}

/// Output geometry computed for a source image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizePlan {
    pub source: (u32, u32),
    pub target: (u32, u32),
    /// Half-size surface used when the target is under half the source
    pub intermediate: Option<(u32, u32)>,
    /// Whether the longest side exceeded the ceiling
    pub scaled: bool,
}

impl ResizePlan {
    /// Compute target dimensions for a `width x height` image under `max_dimension`
    ///
    /// The larger side is scaled to `max_dimension` when it exceeds it, and both
    /// sides are then floored to even numbers (never below 2).
    #[must_use]
    pub fn compute(width: u32, height: u32, max_dimension: u32) -> Self {
        let longest = width.max(height);
        let scaled = longest > max_dimension;

        let (scaled_width, scaled_height) = if scaled {
            let scale = f64::from(max_dimension) / f64::from(longest);
            if width >= height {
                (max_dimension, (f64::from(height) * scale).round() as u32)
            } else {
                ((f64::from(width) * scale).round() as u32, max_dimension)
            }
        } else {
            (width, height)
        };

        let target = (floor_even(scaled_width), floor_even(scaled_height));

        let intermediate = if target.0.saturating_mul(2) < width || target.1.saturating_mul(2) < height
        {
            Some(((width / 2).max(1), (height / 2).max(1)))
        } else {
            None
        };

        Self {
            source: (width, height),
            target,
            intermediate,
            scaled,
        }
    }

    /// Source already satisfies every constraint
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.source == self.target
    }

    /// Only the trailing odd row/column needs dropping
    #[must_use]
    pub fn is_crop_only(&self) -> bool {
        !self.scaled
            && self.intermediate.is_none()
            && self.target.0 <= self.source.0
            && self.target.1 <= self.source.1
    }
}

fn floor_even(value: u32) -> u32 {
    (value & !1).max(2)
}

/// Decodes, bounds and resizes source images
#[derive(Debug, Clone)]
pub struct ImageNormalizer {
    max_dimension: u32,
    memory_limit_bytes: u64,
}

impl Default for ImageNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DIMENSION, DEFAULT_MEMORY_LIMIT_BYTES)
    }
}

impl ImageNormalizer {
    #[must_use]
    pub fn new(max_dimension: u32, memory_limit_bytes: u64) -> Self {
        Self {
            max_dimension,
            memory_limit_bytes,
        }
    }

    #[must_use]
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.max_dimension, config.memory_limit_bytes)
    }

    #[must_use]
    pub fn max_dimension(&self) -> u32 {
        self.max_dimension
    }

    #[must_use]
    pub fn memory_limit_bytes(&self) -> u64 {
        self.memory_limit_bytes
    }

    /// Check a declared MIME type against the jpeg/png/webp allow-list
    ///
    /// # Errors
    /// - `UnsupportedType` for anything outside the allow-list
    pub fn validate_type(mime_type: &str) -> Result<()> {
        let normalized = mime_type.trim().to_lowercase();
        if SUPPORTED_MIME_TYPES.contains(&normalized.as_str()) {
            Ok(())
        } else {
            Err(DewatermarkError::unsupported_type(mime_type.trim()))
        }
    }

    /// Read image dimensions from the header without decoding pixels
    ///
    /// # Errors
    /// - `Decode` when the bytes are not a recognizable image
    /// - `MemoryLimit` when `width * height * 4` exceeds the configured ceiling
    pub fn dimensions(&self, bytes: &[u8]) -> Result<(u32, u32)> {
        let (width, height) = Self::reader(bytes)?
            .into_dimensions()
            .map_err(DewatermarkError::from_image_error)?;
        self.check_memory(width, height)?;
        Ok((width, height))
    }

    /// Decode a source into a bounded, even-sized RGBA8 buffer
    ///
    /// # Errors
    /// - `UnsupportedType` when the declared MIME type is not allowed
    /// - `Decode` when the bytes cannot be decoded
    /// - `MemoryLimit` when the decoded size exceeds the ceiling
    /// - `Processing` for any other failure
    #[instrument(skip(self, source), fields(name = %source.name, bytes = source.data.len()))]
    pub fn normalize(&self, source: &SourceImage, options: &NormalizeOptions) -> Result<PixelBuffer> {
        if let Some(mime_type) = &source.mime_type {
            Self::validate_type(mime_type)?;
        }

        let (width, height) = self.dimensions(&source.data)?;
        let max_dimension = options.max_dimension.unwrap_or(self.max_dimension);
        let plan = ResizePlan::compute(width, height, max_dimension);

        let mut reader = Self::reader(&source.data)?;
        let mut limits = image::Limits::default();
        limits.max_alloc = Some(self.memory_limit_bytes);
        reader.limits(limits);

        let decoded = reader.decode().map_err(DewatermarkError::from_image_error)?;
        let rgba = Self::into_rgba(decoded);

        let output = Self::apply_plan(rgba, &plan);
        debug!(
            source_width = width,
            source_height = height,
            target_width = plan.target.0,
            target_height = plan.target.1,
            two_step = plan.intermediate.is_some(),
            "Normalized image"
        );

        Ok(PixelBuffer::from_rgba_image(output))
    }

    fn reader(bytes: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>> {
        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| DewatermarkError::decode(e.to_string()))?;

        if reader.format().is_none() {
            return Err(DewatermarkError::decode("unrecognized image format"));
        }
        Ok(reader)
    }

    fn check_memory(&self, width: u32, height: u32) -> Result<()> {
        let decoded_bytes = u64::from(width) * u64::from(height) * 4;
        if decoded_bytes > self.memory_limit_bytes {
            return Err(DewatermarkError::memory_limit(format!(
                "{}x{} image needs {} bytes decoded, limit is {}",
                width, height, decoded_bytes, self.memory_limit_bytes
            )));
        }
        Ok(())
    }

    fn into_rgba(image: DynamicImage) -> RgbaImage {
        match image {
            DynamicImage::ImageRgba8(rgba) => rgba,
            other => other.to_rgba8(),
        }
    }

    fn apply_plan(rgba: RgbaImage, plan: &ResizePlan) -> RgbaImage {
        let (target_width, target_height) = plan.target;

        if plan.is_identity() {
            return rgba;
        }

        if plan.is_crop_only() {
            return image::imageops::crop_imm(&rgba, 0, 0, target_width, target_height).to_image();
        }

        match plan.intermediate {
            Some((half_width, half_height)) => {
                let half = image::imageops::resize(&rgba, half_width, half_height, FilterType::Triangle);
                drop(rgba);
                image::imageops::resize(&half, target_width, target_height, FilterType::Lanczos3)
            },
            None => image::imageops::resize(&rgba, target_width, target_height, FilterType::Lanczos3),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba};

    fn encode(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let image = RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255])
        });
        let mut bytes = Vec::new();
        let dynamic = if format == ImageFormat::Jpeg {
            DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(image).to_rgb8())
        } else {
            DynamicImage::ImageRgba8(image)
        };
        dynamic
            .write_to(&mut Cursor::new(&mut bytes), format)
            .unwrap();
        bytes
    }

    fn png_source(width: u32, height: u32) -> SourceImage {
        SourceImage::new("test.png", Some("image/png".into()), encode(width, height, ImageFormat::Png))
    }

    #[test]
    fn test_validate_type() {
        assert!(ImageNormalizer::validate_type("image/jpeg").is_ok());
        assert!(ImageNormalizer::validate_type(" IMAGE/PNG ").is_ok());
        assert!(ImageNormalizer::validate_type("image/webp").is_ok());

        let err = ImageNormalizer::validate_type("image/gif").unwrap_err();
        assert!(matches!(err, DewatermarkError::UnsupportedType(ref m) if m == "image/gif"));
        assert!(ImageNormalizer::validate_type("").is_err());
    }

    #[test]
    fn test_validate_type_is_idempotent() {
        for mime in ["image/png", "image/gif", "text/plain", "image/webp"] {
            let first = ImageNormalizer::validate_type(mime).is_ok();
            let second = ImageNormalizer::validate_type(mime).is_ok();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_dimensions_reads_header() {
        let normalizer = ImageNormalizer::default();
        assert_eq!(normalizer.dimensions(&encode(40, 30, ImageFormat::Png)).unwrap(), (40, 30));
        assert_eq!(normalizer.dimensions(&encode(17, 9, ImageFormat::Jpeg)).unwrap(), (17, 9));
    }

    #[test]
    fn test_dimensions_rejects_garbage() {
        let normalizer = ImageNormalizer::default();
        let err = normalizer.dimensions(b"definitely not an image").unwrap_err();
        assert!(matches!(err, DewatermarkError::Decode(_)));

        let err = normalizer.dimensions(&[]).unwrap_err();
        assert!(matches!(err, DewatermarkError::Decode(_)));
    }

    #[test]
    fn test_dimensions_enforces_memory_limit() {
        let normalizer = ImageNormalizer::new(2048, 100 * 100 * 4 - 1);
        let err = normalizer.dimensions(&encode(100, 100, ImageFormat::Png)).unwrap_err();
        assert!(matches!(err, DewatermarkError::MemoryLimit(_)));
    }

    #[test]
    fn test_resize_plan_scales_longest_side() {
        let plan = ResizePlan::compute(4000, 3000, 2048);
        assert!(plan.scaled);
        assert_eq!(plan.target, (2048, 1536));
        assert!(plan.intermediate.is_none());

        let plan = ResizePlan::compute(3000, 4000, 1000);
        assert_eq!(plan.target, (750, 1000));
        assert_eq!(plan.intermediate, Some((1500, 2000)));
    }

    #[test]
    fn test_resize_plan_floors_to_even() {
        let plan = ResizePlan::compute(101, 77, 2048);
        assert!(!plan.scaled);
        assert_eq!(plan.target, (100, 76));
        assert!(plan.is_crop_only());

        let plan = ResizePlan::compute(1, 1, 2048);
        assert_eq!(plan.target, (2, 2));
        assert!(!plan.is_crop_only());

        assert!(ResizePlan::compute(64, 32, 2048).is_identity());
    }

    #[test]
    fn test_normalize_output_invariants() {
        let normalizer = ImageNormalizer::default();
        for (w, h) in [(64, 48), (65, 49), (33, 100), (3, 3)] {
            let buffer = normalizer
                .normalize(&png_source(w, h), &NormalizeOptions::default())
                .unwrap();
            assert_eq!(buffer.data().len(), (buffer.width() * buffer.height() * 4) as usize);
            assert_eq!(buffer.width() % 2, 0);
            assert_eq!(buffer.height() % 2, 0);
        }
    }

    #[test]
    fn test_normalize_respects_max_dimension_and_aspect() {
        let normalizer = ImageNormalizer::new(2048, DEFAULT_MEMORY_LIMIT_BYTES);
        let (w, h) = (300u32, 200u32);
        let buffer = normalizer
            .normalize(&png_source(w, h), &NormalizeOptions::with_max_dimension(100))
            .unwrap();

        assert!(buffer.width().max(buffer.height()) <= 100);
        assert_eq!(buffer.width(), 100);
        let expected_height = (f64::from(buffer.width()) * f64::from(h) / f64::from(w)).round();
        assert!((f64::from(buffer.height()) - expected_height).abs() <= 1.0);
    }

    #[test]
    fn test_normalize_two_step_downscale() {
        let normalizer = ImageNormalizer::default();
        let buffer = normalizer
            .normalize(&png_source(512, 256), &NormalizeOptions::with_max_dimension(64))
            .unwrap();
        assert_eq!(buffer.dimensions(), (64, 32));
    }

    #[test]
    fn test_normalize_keeps_pixels_when_no_resize_needed() {
        let normalizer = ImageNormalizer::default();
        let buffer = normalizer
            .normalize(&png_source(5, 4), &NormalizeOptions::default())
            .unwrap();
        assert_eq!(buffer.dimensions(), (4, 4));

        let image = buffer.into_rgba_image().unwrap();
        assert_eq!(image.get_pixel(3, 2).0, [3, 2, 128, 255]);
    }

    #[test]
    fn test_normalize_error_kinds() {
        let normalizer = ImageNormalizer::default();

        let gif = SourceImage::new("a.gif", Some("image/gif".into()), vec![0; 10]);
        assert!(matches!(
            normalizer.normalize(&gif, &NormalizeOptions::default()),
            Err(DewatermarkError::UnsupportedType(_))
        ));

        let corrupt = SourceImage::new("b.png", Some("image/png".into()), b"\x89PNG\r\n\x1a\nbroken".to_vec());
        assert!(matches!(
            normalizer.normalize(&corrupt, &NormalizeOptions::default()),
            Err(DewatermarkError::Decode(_))
        ));

        let tiny_limit = ImageNormalizer::new(2048, 16);
        assert!(matches!(
            tiny_limit.normalize(&png_source(8, 8), &NormalizeOptions::default()),
            Err(DewatermarkError::MemoryLimit(_))
        ));
    }

    #[test]
    fn test_normalize_without_declared_mime() {
        let normalizer = ImageNormalizer::default();
        let source = SourceImage::new("unnamed", None, encode(10, 10, ImageFormat::WebP));
        let buffer = normalizer.normalize(&source, &NormalizeOptions::default()).unwrap();
        assert_eq!(buffer.dimensions(), (10, 10));
    }
}
