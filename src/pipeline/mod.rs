//! Extraction Pipeline
//!
//! Runs one card image through localization, per-field recognition and the
//! optional overlay, and shapes the outcome into a report.

use image::{DynamicImage, ImageError, ImageFormat, ImageReader};
use serde::Serialize;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::storage::overlay_path_for;
use crate::vision::{
    panic_message, CapabilityError, FieldLocalizer, FieldName, OverlayRenderer, RegionRecognizer, VisionServices,
};

/// Errors that abort an extraction
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("failed to decode image {path:?}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("field detection failed: {0}")]
    Detection(#[source] CapabilityError),
    #[error("unsupported input: {0}")]
    UnsupportedInput(String),
    #[error("failed to write overlay {path:?}: {source}")]
    OverlayWrite {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to store upload {path:?}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ExtractionError {
    /// Stage that was being entered when the error occurred; `None` for
    /// rejections before the image is loaded
    pub fn stage(&self) -> Option<ExtractionStage> {
        match self {
            ExtractionError::Decode { .. } => Some(ExtractionStage::Loaded),
            ExtractionError::Detection(_) => Some(ExtractionStage::Detected),
            ExtractionError::OverlayWrite { .. } => Some(ExtractionStage::Rendered),
            ExtractionError::UnsupportedInput(_) | ExtractionError::Storage { .. } => None,
        }
    }
}

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ExtractionStage {
    Loaded,
    Detected,
    Recognized,
    Rendered,
    Done,
}

/// Text per detected field, plus the overlay location when one was rendered
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractionResult {
    #[serde(flatten)]
    pub fields: BTreeMap<FieldName, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_image: Option<PathBuf>,
}

impl ExtractionResult {
    pub fn get(&self, field: FieldName) -> Option<&str> {
        self.fields.get(&field).map(String::as_str)
    }
}

/// Report printed for one request
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ExtractionReport {
    Success {
        #[serde(flatten)]
        result: ExtractionResult,
        #[serde(skip_serializing_if = "Option::is_none")]
        file_path: Option<PathBuf>,
    },
    Failure {
        error: String,
    },
}

impl ExtractionReport {
    pub fn from_outcome(outcome: Result<ExtractionResult, ExtractionError>, file_path: Option<PathBuf>) -> Self {
        match outcome {
            Ok(result) => ExtractionReport::Success { result, file_path },
            Err(e) => ExtractionReport::Failure { error: e.to_string() },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExtractionReport::Success { .. })
    }
}

/// Coordinates the vision capabilities for one image at a time
pub struct ExtractionOrchestrator {
    services: VisionServices,
    renderer: OverlayRenderer,
    min_confidence: f32,
}

impl ExtractionOrchestrator {
    pub fn new(services: VisionServices, config: &AppConfig) -> Self {
        Self {
            services,
            renderer: OverlayRenderer::new(&config.overlay),
            min_confidence: config.recognition.min_confidence,
        }
    }

    /// Extract every detected field from the image at `image_path`.
    ///
    /// With `want_overlay`, the annotated image is saved beside the input as
    /// `output_<name>` and its path is recorded in the result.
    pub fn extract(&self, image_path: &Path, want_overlay: bool) -> Result<ExtractionResult, ExtractionError> {
        let start = Instant::now();

        let (image, format) = decode_image(image_path)?;
        debug!(
            "{:?}: {:?} {}x{}",
            ExtractionStage::Loaded,
            image_path,
            image.width(),
            image.height()
        );

        let detections = self.detect_fields(&image)?;
        debug!("{:?}: {} fields", ExtractionStage::Detected, detections.len());

        let recognizer = RegionRecognizer::with_min_confidence(self.services.reader.as_ref(), self.min_confidence);
        let fields: BTreeMap<FieldName, String> = detections
            .iter()
            .map(|(field, detection)| (*field, recognizer.recognize(&image, &detection.bbox)))
            .collect();
        debug!("{:?}: {:?}", ExtractionStage::Recognized, fields);

        let output_image = if want_overlay {
            let path = overlay_path_for(image_path);
            self.renderer
                .render(&image, &detections)
                .save_with_format(&path, format)
                .map_err(|source| ExtractionError::OverlayWrite {
                    path: path.clone(),
                    source,
                })?;
            debug!("{:?}: {:?}", ExtractionStage::Rendered, path);
            Some(path)
        } else {
            None
        };

        info!(
            "{:?}: extracted {} fields from {:?} in {:?}",
            ExtractionStage::Done,
            fields.len(),
            image_path,
            start.elapsed()
        );
        Ok(ExtractionResult { fields, output_image })
    }

    fn detect_fields(&self, image: &DynamicImage) -> Result<crate::vision::FieldDetections, ExtractionError> {
        let localizer = FieldLocalizer::new(self.services.detector.as_ref());
        panic::catch_unwind(AssertUnwindSafe(|| localizer.detect(image)))
            .map_err(|payload| CapabilityError::Panicked(panic_message(payload)))
            .and_then(|detections| detections)
            .map_err(ExtractionError::Detection)
    }
}

/// Decode by content, so the file extension does not pick the decoder
fn decode_image(path: &Path) -> Result<(DynamicImage, ImageFormat), ExtractionError> {
    let decode_error = |source: ImageError| ExtractionError::Decode {
        path: path.to_path_buf(),
        source,
    };

    let reader = ImageReader::open(path)
        .and_then(|r| r.with_guessed_format())
        .map_err(|e| decode_error(ImageError::IoError(e)))?;
    let format = reader.format().unwrap_or(ImageFormat::Png);
    let image = reader.decode().map_err(decode_error)?;
    Ok((image, format))
}
