//! Vision Layer
//!
//! Locates card fields and reads the text inside them. The detector and the
//! OCR engine sit behind the [`FieldDetector`] and [`TextReader`] traits:
//! - `YoloFieldDetector` - YOLO-style field detector via ONNX Runtime
//! - `OnnxTextReader` - CRNN line recognizers (English + Bangla) via ONNX Runtime

pub mod detection;
pub mod fields;
pub mod geometry;
pub mod localizer;
pub mod models;
pub mod ocr;
pub mod overlay;
pub mod preprocess;
pub mod recognizer;

#[cfg(test)]
pub(crate) mod testing;

use anyhow::{Context, Result};
use std::any::Any;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::config::AppConfig;

pub use detection::YoloFieldDetector;
pub use fields::FieldName;
pub use geometry::{BoundingBox, CropRect};
pub use localizer::{FieldDetection, FieldDetections, FieldDetector, FieldLocalizer, RawDetection};
pub use models::{ModelKind, ModelManager, OnnxSession};
pub use ocr::{OnnxTextReader, Script};
pub use overlay::OverlayRenderer;
pub use recognizer::{RecognitionSoftFailure, RegionRecognizer, TextDetection, TextReader};

/// Failure inside a detection or OCR capability
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// Generic inference failure reported by a provider
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("ONNX Runtime error: {0}")]
    Runtime(#[from] ort::Error),
    /// Model produced a tensor we cannot interpret
    #[error("unexpected model output: {0}")]
    MalformedOutput(String),
    #[error("capability panicked: {0}")]
    Panicked(String),
}

/// Best-effort text from a panic payload
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// The expensive, process-lifetime capabilities.
///
/// Built once at startup and handed to the orchestrator; cloning shares the
/// same underlying models.
#[derive(Clone)]
pub struct VisionServices {
    pub detector: Arc<dyn FieldDetector>,
    pub reader: Arc<dyn TextReader>,
}

impl VisionServices {
    pub fn new(detector: Arc<dyn FieldDetector>, reader: Arc<dyn TextReader>) -> Self {
        Self { detector, reader }
    }

    /// Load the ONNX-backed detector and readers, fetching model files if needed
    pub fn load(config: &AppConfig, models: &ModelManager) -> Result<Self> {
        info!("Loading vision models from {:?}", models.models_dir());

        let detector_path = models.ensure_model(ModelKind::FieldDetector)?;
        let detector = YoloFieldDetector::new(&detector_path, &config.detector, config.models.intra_threads)
            .context("Failed to load field detector")?;

        let reader = OnnxTextReader::load(&config.recognition, models, config.models.intra_threads)
            .context("Failed to load text recognizers")?;

        info!("Vision models ready");
        Ok(Self::new(Arc::new(detector), Arc::new(reader)))
    }
}

impl std::fmt::Debug for VisionServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisionServices")
            .field("labels", &self.detector.labels())
            .finish_non_exhaustive()
    }
}
