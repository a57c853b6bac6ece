//! Tensor validation utilities
//!
//! Centralized checks for worker input dimensions and engine output shapes.

use crate::config::{Quality, MIN_DIMENSION};
use crate::error::{DewatermarkError, Result};
use ndarray::Array4;

/// Validator for tensor operations and shape validation
pub struct TensorValidator;

impl TensorValidator {
    /// Validate tensor shape matches expected dimensions
    ///
    /// # Errors
    /// - `Shape` when any axis differs
    pub fn validate_tensor_shape(
        tensor: &Array4<f32>,
        expected_shape: (usize, usize, usize, usize),
    ) -> Result<()> {
        let actual = tensor.dim();
        if actual != expected_shape {
            let (batch, channels, height, width) = expected_shape;
            return Err(DewatermarkError::shape(format!(
                "expected [{}, {}, {}, {}], got [{}, {}, {}, {}]",
                batch, channels, height, width, actual.0, actual.1, actual.2, actual.3
            )));
        }
        Ok(())
    }

    /// Validate that an engine output has the input's batch, RGB channels and spatial size
    ///
    /// # Errors
    /// - `Shape` on any mismatch
    pub fn validate_output_matches(input: &Array4<f32>, output: &Array4<f32>) -> Result<()> {
        Self::validate_tensor_shape(output, input.dim())
    }

    /// Validate image dimensions against the worker's bounds for `quality`
    ///
    /// # Errors
    /// - `Processing` when a side is below [`MIN_DIMENSION`]
    /// - `Capacity` when a side exceeds the quality's maximum texture size
    pub fn validate_image_dimensions(width: u32, height: u32, quality: Quality) -> Result<()> {
        if width < MIN_DIMENSION || height < MIN_DIMENSION {
            return Err(DewatermarkError::processing(format!(
                "Image dimensions too small: {}x{}. Minimum: {}x{}",
                width, height, MIN_DIMENSION, MIN_DIMENSION
            )));
        }

        let max_dimension = quality.max_dimension();
        if width > max_dimension || height > max_dimension {
            return Err(DewatermarkError::capacity(format!(
                "Image dimensions {}x{} exceed maximum texture size {}x{}",
                width, height, max_dimension, max_dimension
            )));
        }

        Ok(())
    }

    /// Validate tensor values are finite
    ///
    /// # Errors
    /// - `Processing` on the first NaN or infinite value
    pub fn validate_finite(tensor: &Array4<f32>) -> Result<()> {
        if let Some(value) = tensor.iter().find(|value| !value.is_finite()) {
            return Err(DewatermarkError::processing(format!(
                "Tensor contains non-finite value: {}",
                value
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_tensor_shape() {
        let tensor = Array4::<f32>::zeros((1, 3, 32, 48));
        assert!(TensorValidator::validate_tensor_shape(&tensor, (1, 3, 32, 48)).is_ok());

        let err = TensorValidator::validate_tensor_shape(&tensor, (1, 3, 48, 32)).unwrap_err();
        assert!(matches!(err, DewatermarkError::Shape(_)));
        assert!(err.to_string().contains("expected [1, 3, 48, 32], got [1, 3, 32, 48]"));
    }

    #[test]
    fn test_validate_output_matches() {
        let input = Array4::<f32>::zeros((1, 3, 8, 8));
        assert!(TensorValidator::validate_output_matches(&input, &input.clone()).is_ok());
        assert!(
            TensorValidator::validate_output_matches(&input, &Array4::zeros((1, 3, 4, 4))).is_err()
        );
        assert!(
            TensorValidator::validate_output_matches(&input, &Array4::zeros((1, 1, 8, 8))).is_err()
        );
    }

    #[test]
    fn test_validate_image_dimensions() {
        assert!(TensorValidator::validate_image_dimensions(32, 32, Quality::Standard).is_ok());
        assert!(TensorValidator::validate_image_dimensions(4096, 100, Quality::Standard).is_ok());

        let err = TensorValidator::validate_image_dimensions(31, 64, Quality::Standard).unwrap_err();
        assert!(matches!(err, DewatermarkError::Processing(_)));
        assert!(!err.is_capacity_related());

        let err = TensorValidator::validate_image_dimensions(4098, 64, Quality::Standard).unwrap_err();
        assert!(err.is_capacity_related());
        assert!(err.to_string().contains("maximum texture size"));

        assert!(TensorValidator::validate_image_dimensions(2048, 64, Quality::Reduced).is_err());
        assert!(TensorValidator::validate_image_dimensions(1024, 64, Quality::Reduced).is_ok());
    }

    #[test]
    fn test_validate_finite() {
        let mut tensor = Array4::<f32>::zeros((1, 3, 2, 2));
        assert!(TensorValidator::validate_finite(&tensor).is_ok());
        tensor[[0, 1, 1, 1]] = f32::NAN;
        assert!(TensorValidator::validate_finite(&tensor).is_err());
    }
}
