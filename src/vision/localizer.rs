//! Field localization
//!
//! Turns raw detector output into at most one region per whitelisted field.

use image::DynamicImage;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::{BoundingBox, CapabilityError, FieldName};

/// Raw detector output for one object
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub bbox: BoundingBox,
    pub score: f32,
    /// Index into [`FieldDetector::labels`]; may be out of range for a broken model
    pub class_id: i64,
}

/// Object detection capability.
///
/// Implementations are shared across calls and threads, so any internal state
/// (an inference session) must be synchronized by the implementation.
pub trait FieldDetector: Send + Sync {
    /// Class labels, indexed by class id
    fn labels(&self) -> &[String];

    /// Run detection over one image
    fn detect(&self, image: &DynamicImage) -> Result<Vec<RawDetection>, CapabilityError>;
}

/// A retained region of interest for one field
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldDetection {
    pub field: FieldName,
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// Retained detections keyed by field, iterated in canonical order
pub type FieldDetections = BTreeMap<FieldName, FieldDetection>;

/// Wraps a [`FieldDetector`] and reduces its output to the field whitelist
pub struct FieldLocalizer<'a> {
    detector: &'a dyn FieldDetector,
}

impl<'a> FieldLocalizer<'a> {
    pub fn new(detector: &'a dyn FieldDetector) -> Self {
        let missing = missing_fields(detector.labels());
        if !missing.is_empty() {
            warn!(
                "Detector labels do not cover fields {:?}; they will never be extracted",
                missing
            );
        }
        Self { detector }
    }

    /// Detect whitelisted fields in `image`.
    ///
    /// Nothing found is an empty map, not an error. Errors only come from the
    /// detection capability itself.
    pub fn detect(&self, image: &DynamicImage) -> Result<FieldDetections, CapabilityError> {
        let raw = self.detector.detect(image)?;
        let labels = self.detector.labels();
        debug!("Detector returned {} raw detections", raw.len());

        let mut fields = FieldDetections::new();
        for detection in raw {
            let Some(label) = usize::try_from(detection.class_id)
                .ok()
                .and_then(|idx| labels.get(idx))
            else {
                debug!("Dropping detection with unknown class id {}", detection.class_id);
                continue;
            };
            let Some(field) = FieldName::from_label(label) else {
                continue;
            };

            // Strictly greater: on equal scores the first one seen stays
            match fields.get(&field) {
                Some(existing) if existing.confidence >= detection.score => {
                    debug!(
                        "Ignoring duplicate {} detection ({:.3} <= {:.3})",
                        field, detection.score, existing.confidence
                    );
                }
                _ => {
                    fields.insert(
                        field,
                        FieldDetection {
                            field,
                            bbox: detection.bbox,
                            confidence: detection.score,
                        },
                    );
                }
            }
        }

        Ok(fields)
    }
}

/// Whitelisted fields that no detector label resolves to
fn missing_fields(labels: &[String]) -> Vec<FieldName> {
    FieldName::ALL
        .into_iter()
        .filter(|field| !labels.iter().any(|label| label == field.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::testing::{raw, FailingDetector, StaticDetector};

    fn blank() -> DynamicImage {
        DynamicImage::new_rgb8(200, 100)
    }

    fn labels() -> Vec<String> {
        ["banglaName", "birthDate", "englishName", "fatherName", "motherName", "numberNID", "photo"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_empty_detections_yield_empty_map() {
        let detector = StaticDetector::new(labels(), vec![]);
        let fields = FieldLocalizer::new(&detector).detect(&blank()).unwrap();
        assert!(fields.is_empty());
    }

    #[test]
    fn test_non_whitelisted_labels_are_dropped() {
        let detector = StaticDetector::new(labels(), vec![raw(6, 0.95, (0.0, 0.0, 50.0, 50.0))]);
        let fields = FieldLocalizer::new(&detector).detect(&blank()).unwrap();
        assert!(fields.is_empty());
    }

    #[test]
    fn test_invalid_class_ids_are_dropped() {
        let detector = StaticDetector::new(
            labels(),
            vec![
                raw(-1, 0.9, (0.0, 0.0, 10.0, 10.0)),
                raw(42, 0.9, (0.0, 0.0, 10.0, 10.0)),
                raw(1, 0.8, (10.0, 10.0, 60.0, 30.0)),
            ],
        );
        let fields = FieldLocalizer::new(&detector).detect(&blank()).unwrap();
        assert_eq!(fields.len(), 1);
        assert!(fields.contains_key(&FieldName::BirthDate));
    }

    #[test]
    fn test_duplicate_keeps_highest_confidence() {
        let detector = StaticDetector::new(
            labels(),
            vec![
                raw(3, 0.6, (10.0, 10.0, 80.0, 30.0)),
                raw(3, 0.9, (12.0, 11.0, 82.0, 31.0)),
                raw(3, 0.7, (14.0, 12.0, 84.0, 32.0)),
            ],
        );
        let fields = FieldLocalizer::new(&detector).detect(&blank()).unwrap();
        let father = fields[&FieldName::FatherName];
        assert_eq!(father.confidence, 0.9);
        assert_eq!(father.bbox, BoundingBox::new(12.0, 11.0, 82.0, 31.0));
    }

    #[test]
    fn test_duplicate_tie_keeps_first_seen() {
        let detector = StaticDetector::new(
            labels(),
            vec![
                raw(5, 0.8, (1.0, 1.0, 20.0, 20.0)),
                raw(5, 0.8, (30.0, 30.0, 60.0, 60.0)),
            ],
        );
        let fields = FieldLocalizer::new(&detector).detect(&blank()).unwrap();
        assert_eq!(fields[&FieldName::NumberNid].bbox, BoundingBox::new(1.0, 1.0, 20.0, 20.0));
    }

    #[test]
    fn test_iteration_is_canonical_order() {
        let detector = StaticDetector::new(
            labels(),
            vec![
                raw(5, 0.9, (0.0, 0.0, 10.0, 10.0)),
                raw(0, 0.9, (0.0, 0.0, 10.0, 10.0)),
                raw(2, 0.9, (0.0, 0.0, 10.0, 10.0)),
            ],
        );
        let fields = FieldLocalizer::new(&detector).detect(&blank()).unwrap();
        let order: Vec<_> = fields.keys().copied().collect();
        assert_eq!(
            order,
            vec![FieldName::BanglaName, FieldName::EnglishName, FieldName::NumberNid]
        );
    }

    #[test]
    fn test_detector_error_propagates() {
        let detector = FailingDetector::new(labels());
        let result = FieldLocalizer::new(&detector).detect(&blank());
        assert!(matches!(result, Err(CapabilityError::Inference(_))));
    }

    #[test]
    fn test_missing_fields() {
        let partial: Vec<String> = vec!["birthDate".into(), "numberNID".into(), "photo".into()];
        let missing = missing_fields(&partial);
        assert_eq!(
            missing,
            vec![
                FieldName::BanglaName,
                FieldName::EnglishName,
                FieldName::FatherName,
                FieldName::MotherName
            ]
        );
        assert!(missing_fields(&labels()).is_empty());
    }
}
