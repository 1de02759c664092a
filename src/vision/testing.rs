//! In-process capability doubles for unit tests

use image::{DynamicImage, GenericImageView, Rgba};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{BoundingBox, CapabilityError, CropRect, FieldDetector, RawDetection, TextDetection, TextReader};

pub fn raw(class_id: i64, score: f32, b: (f32, f32, f32, f32)) -> RawDetection {
    RawDetection {
        bbox: BoundingBox::new(b.0, b.1, b.2, b.3),
        score,
        class_id,
    }
}

pub fn reading(text: &str, confidence: f32) -> TextDetection {
    TextDetection {
        region: CropRect { x1: 0, y1: 0, x2: 1, y2: 1 },
        text: text.to_string(),
        confidence,
    }
}

pub fn field_labels() -> Vec<String> {
    super::FieldName::ALL.iter().map(|f| f.as_str().to_string()).collect()
}

/// Returns the same detections for every image
pub struct StaticDetector {
    labels: Vec<String>,
    detections: Vec<RawDetection>,
}

impl StaticDetector {
    pub fn new(labels: Vec<String>, detections: Vec<RawDetection>) -> Self {
        Self { labels, detections }
    }
}

impl FieldDetector for StaticDetector {
    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn detect(&self, _image: &DynamicImage) -> Result<Vec<RawDetection>, CapabilityError> {
        Ok(self.detections.clone())
    }
}

pub struct FailingDetector {
    labels: Vec<String>,
}

impl FailingDetector {
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }
}

impl FieldDetector for FailingDetector {
    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn detect(&self, _image: &DynamicImage) -> Result<Vec<RawDetection>, CapabilityError> {
        Err(CapabilityError::Inference("detector exploded".to_string()))
    }
}

pub struct PanickingDetector {
    labels: Vec<String>,
}

impl PanickingDetector {
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }
}

impl FieldDetector for PanickingDetector {
    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn detect(&self, _image: &DynamicImage) -> Result<Vec<RawDetection>, CapabilityError> {
        panic!("detector session poisoned")
    }
}

/// Returns the same readings for every crop and records what it was given
pub struct StaticReader {
    readings: Vec<TextDetection>,
    calls: AtomicUsize,
    last_crop: Mutex<Option<(u32, u32)>>,
}

impl StaticReader {
    pub fn new(readings: Vec<TextDetection>) -> Self {
        Self {
            readings,
            calls: AtomicUsize::new(0),
            last_crop: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_crop_size(&self) -> Option<(u32, u32)> {
        *self.last_crop.lock()
    }
}

impl TextReader for StaticReader {
    fn read(&self, crop: &DynamicImage) -> Result<Vec<TextDetection>, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_crop.lock() = Some(crop.dimensions());
        Ok(self.readings.clone())
    }
}

pub struct FailingReader;

impl TextReader for FailingReader {
    fn read(&self, _crop: &DynamicImage) -> Result<Vec<TextDetection>, CapabilityError> {
        Err(CapabilityError::Inference("recognizer exploded".to_string()))
    }
}

pub struct PanickingReader;

impl TextReader for PanickingReader {
    fn read(&self, _crop: &DynamicImage) -> Result<Vec<TextDetection>, CapabilityError> {
        panic!("recognizer session poisoned")
    }
}

/// Answers by the color of the crop's center pixel, so one synthetic card can
/// carry different text per field region
pub struct ColorKeyedReader {
    table: Vec<([u8; 3], Vec<TextDetection>)>,
}

impl ColorKeyedReader {
    pub fn new(table: Vec<([u8; 3], Vec<TextDetection>)>) -> Self {
        Self { table }
    }
}

impl TextReader for ColorKeyedReader {
    fn read(&self, crop: &DynamicImage) -> Result<Vec<TextDetection>, CapabilityError> {
        let (w, h) = crop.dimensions();
        let Rgba([r, g, b, _]) = crop.get_pixel(w / 2, h / 2);
        Ok(self
            .table
            .iter()
            .find(|(color, _)| *color == [r, g, b])
            .map(|(_, readings)| readings.clone())
            .unwrap_or_default())
    }
}
