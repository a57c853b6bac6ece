//! Engine implementations for the inference worker
//!
//! - Demo engine (pure Rust placeholder, always available)
//! - ONNX Runtime engine (GPU acceleration, feature `onnx`)
//! - Tract engine (pure Rust ONNX, feature `tract`)

pub mod demo;

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(feature = "tract")]
pub mod tract;

// Test utilities for worker testing
#[cfg(test)]
pub mod test_utils;

pub use self::demo::DemoEngine;

#[cfg(feature = "onnx")]
pub use self::onnx::OnnxEngine;

#[cfg(feature = "tract")]
pub use self::tract::TractEngine;

use crate::{
    config::ModelSource,
    error::{DewatermarkError, Result},
    inference::{InferenceEngine, LoadContext, ModelLoader},
};

/// Loader that builds whichever engine the configured [`ModelSource`] names
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultModelLoader;

impl ModelLoader for DefaultModelLoader {
    fn load(&self, context: &LoadContext) -> Result<Box<dyn InferenceEngine>> {
        match &context.config.model {
            ModelSource::Demo => Ok(Box::new(DemoEngine::new(context.tracker.clone()))),
            ModelSource::Onnx(path) => load_onnx(path, context),
            ModelSource::Tract(path) => load_tract(path),
        }
    }

    fn available_engines(&self) -> Vec<&'static str> {
        let mut engines = vec!["demo"];
        if cfg!(feature = "onnx") {
            engines.push("onnx");
        }
        if cfg!(feature = "tract") {
            engines.push("tract");
        }
        engines
    }
}

#[cfg(feature = "onnx")]
fn load_onnx(path: &std::path::Path, context: &LoadContext) -> Result<Box<dyn InferenceEngine>> {
    Ok(Box::new(OnnxEngine::from_file(path, context.config.intra_threads)?))
}

#[cfg(not(feature = "onnx"))]
fn load_onnx(path: &std::path::Path, _context: &LoadContext) -> Result<Box<dyn InferenceEngine>> {
    Err(DewatermarkError::model(format!(
        "Cannot load {}: ONNX engine not compiled in. Rebuild with --features onnx",
        path.display()
    )))
}

#[cfg(feature = "tract")]
fn load_tract(path: &std::path::Path) -> Result<Box<dyn InferenceEngine>> {
    Ok(Box::new(TractEngine::from_file(path)?))
}

#[cfg(not(feature = "tract"))]
fn load_tract(path: &std::path::Path) -> Result<Box<dyn InferenceEngine>> {
    Err(DewatermarkError::model(format!(
        "Cannot load {}: Tract engine not compiled in. Rebuild with --features tract",
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::worker::resources::ResourceTracker;
    use std::path::PathBuf;

    fn context(model: ModelSource) -> LoadContext {
        LoadContext {
            config: EngineConfig {
                model,
                ..EngineConfig::default()
            },
            tracker: ResourceTracker::new(),
        }
    }

    #[test]
    fn test_default_loader_builds_demo() {
        let engine = DefaultModelLoader.load(&context(ModelSource::Demo)).unwrap();
        assert_eq!(engine.name(), "demo");
        assert!(DefaultModelLoader.available_engines().contains(&"demo"));
    }

    #[test]
    fn test_default_loader_reports_missing_models() {
        let missing = PathBuf::from("/nonexistent/model.onnx");
        for source in [ModelSource::Onnx(missing.clone()), ModelSource::Tract(missing)] {
            let err = DefaultModelLoader.load(&context(source)).err().unwrap();
            assert!(matches!(err, DewatermarkError::Model(_)));
            assert!(err.to_string().contains("/nonexistent/model.onnx"));
        }
    }
}
