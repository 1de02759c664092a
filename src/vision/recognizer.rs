//! Per-region text recognition
//!
//! Recognition failures are local: whatever goes wrong inside one region turns
//! into an empty string for that field and a warning in the log.

use image::DynamicImage;
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;
use tracing::{debug, warn};

use super::{panic_message, BoundingBox, CapabilityError, CropRect};

/// Default minimum confidence; detections at or below it are dropped
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.2;

/// One text reading inside a crop
#[derive(Debug, Clone, PartialEq)]
pub struct TextDetection {
    /// Location inside the crop that was read
    pub region: CropRect,
    pub text: String,
    pub confidence: f32,
}

/// OCR capability.
///
/// Returns readings in reading order. Shared across calls and threads like
/// [`super::FieldDetector`].
pub trait TextReader: Send + Sync {
    fn read(&self, crop: &DynamicImage) -> Result<Vec<TextDetection>, CapabilityError>;
}

/// Why a region produced no text. Never leaves [`RegionRecognizer::recognize`].
#[derive(Debug, Error)]
pub enum RecognitionSoftFailure {
    #[error("region {0:?} is empty after clamping to the image")]
    EmptyRegion(BoundingBox),
    #[error("OCR failed: {0}")]
    Capability(#[from] CapabilityError),
    #[error("OCR panicked: {0}")]
    Panicked(String),
}

/// Crops regions and reads them with a [`TextReader`]
pub struct RegionRecognizer<'a> {
    reader: &'a dyn TextReader,
    min_confidence: f32,
}

impl<'a> RegionRecognizer<'a> {
    pub fn new(reader: &'a dyn TextReader) -> Self {
        Self::with_min_confidence(reader, DEFAULT_MIN_CONFIDENCE)
    }

    pub fn with_min_confidence(reader: &'a dyn TextReader, min_confidence: f32) -> Self {
        Self {
            reader,
            min_confidence,
        }
    }

    /// Read the text inside `bbox`. Always succeeds; failures yield `""`.
    pub fn recognize(&self, image: &DynamicImage, bbox: &BoundingBox) -> String {
        match self.try_recognize(image, bbox) {
            Ok(text) => text,
            Err(e) => {
                warn!("Recognition failed for region {:?}: {}", bbox, e);
                String::new()
            }
        }
    }

    fn try_recognize(
        &self,
        image: &DynamicImage,
        bbox: &BoundingBox,
    ) -> Result<String, RecognitionSoftFailure> {
        let rect = bbox
            .clamp_to(image.width(), image.height())
            .ok_or(RecognitionSoftFailure::EmptyRegion(*bbox))?;
        let crop = image.crop_imm(rect.x1, rect.y1, rect.width(), rect.height());

        let detections = panic::catch_unwind(AssertUnwindSafe(|| self.reader.read(&crop)))
            .map_err(|payload| RecognitionSoftFailure::Panicked(panic_message(payload)))??;

        let total = detections.len();
        let text = merge_confident(&detections, self.min_confidence);
        debug!(
            "Region {}x{} at ({}, {}): {} readings, text {:?}",
            rect.width(),
            rect.height(),
            rect.x1,
            rect.y1,
            total,
            text
        );
        Ok(text)
    }
}

/// Join readings above `min_confidence` (exclusive) with single spaces, in order.
/// Blank readings are skipped so they never leave doubled separators.
pub fn merge_confident(detections: &[TextDetection], min_confidence: f32) -> String {
    detections
        .iter()
        .filter(|d| d.confidence > min_confidence)
        .map(|d| d.text.trim())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
