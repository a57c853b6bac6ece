//! Output format handling service
//!
//! Re-encodes finished pixel buffers for export, keeping format conversion
//! out of the batch controller.

use crate::{
    config::OutputFormat,
    error::{DewatermarkError, Result},
    types::PixelBuffer,
};
use image::{
    codecs::{jpeg::JpegEncoder, png::PngEncoder, webp::WebPEncoder},
    DynamicImage, ImageEncoder, RgbaImage,
};

/// Service for handling output format conversions
pub struct OutputFormatHandler;

impl OutputFormatHandler {
    /// Convert an RGBA image to the pixel layout the target format stores
    ///
    /// # Examples
    /// ```rust
    /// use imgly_dewatermark::{services::OutputFormatHandler, OutputFormat};
    /// use image::RgbaImage;
    ///
    /// let converted = OutputFormatHandler::convert_format(RgbaImage::new(4, 4), OutputFormat::Jpeg);
    /// assert!(matches!(converted, image::DynamicImage::ImageRgb8(_)));
    /// ```
    #[must_use]
    pub fn convert_format(rgba_image: RgbaImage, format: OutputFormat) -> DynamicImage {
        match format {
            OutputFormat::Png | OutputFormat::WebP => DynamicImage::ImageRgba8(rgba_image),
            // JPEG has no alpha channel
            OutputFormat::Jpeg => DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(rgba_image).to_rgb8()),
        }
    }

    /// Encode a pixel buffer in the requested format
    ///
    /// `jpeg_quality` is only consulted for JPEG output.
    ///
    /// # Errors
    /// - `Processing` when the encoder rejects the image
    pub fn encode(buffer: &PixelBuffer, format: OutputFormat, jpeg_quality: u8) -> Result<Vec<u8>> {
        let (width, height) = buffer.dimensions();
        let image = Self::convert_format(buffer.clone().into_rgba_image()?, format);
        let color_type: image::ExtendedColorType = image.color().into();
        let mut encoded = Vec::new();

        let result = match format {
            OutputFormat::Png => {
                PngEncoder::new(&mut encoded).write_image(image.as_bytes(), width, height, color_type)
            },
            OutputFormat::WebP => {
                WebPEncoder::new_lossless(&mut encoded).write_image(image.as_bytes(), width, height, color_type)
            },
            OutputFormat::Jpeg => JpegEncoder::new_with_quality(&mut encoded, jpeg_quality.clamp(1, 100))
                .write_image(image.as_bytes(), width, height, color_type),
        };

        result.map_err(|e| {
            DewatermarkError::processing_stage_error(
                "encode",
                &e.to_string(),
                Some(&format!("{}x{} {:?}", width, height, format)),
            )
        })?;

        Ok(encoded)
    }

    /// Get the appropriate file extension for a given output format
    ///
    /// # Examples
    /// ```rust
    /// use imgly_dewatermark::{services::OutputFormatHandler, OutputFormat};
    ///
    /// assert_eq!(OutputFormatHandler::get_extension(OutputFormat::Png), "png");
    /// assert_eq!(OutputFormatHandler::get_extension(OutputFormat::Jpeg), "jpg");
    /// ```
    #[must_use]
    pub fn get_extension(format: OutputFormat) -> &'static str {
        match format {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
            OutputFormat::WebP => "webp",
        }
    }
}
