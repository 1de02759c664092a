//! Field detection with a YOLO-style ONNX model
//!
//! Expects an anchor-free head exported as `[1, 4 + classes, anchors]`
//! (`[1, anchors, 4 + classes]` is accepted too): box center/size in input
//! pixels followed by one score per class.

use anyhow::Result;
use image::DynamicImage;
use ndarray::{ArrayD, Axis, Ix3};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

use super::models::OnnxSession;
use super::preprocess::{letterbox, to_nchw, Letterbox, Normalization};
use super::{BoundingBox, CapabilityError, FieldDetector, RawDetection};
use crate::config::DetectorSettings;

/// Field detector backed by ONNX Runtime
pub struct YoloFieldDetector {
    session: OnnxSession,
    labels: Vec<String>,
    input_size: u32,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl YoloFieldDetector {
    pub fn new(model_path: &Path, settings: &DetectorSettings, intra_threads: usize) -> Result<Self> {
        let session = OnnxSession::new(model_path, intra_threads)?;
        info!(
            "Field detector ready: {} classes, input {}px",
            settings.labels.len(),
            settings.input_size
        );

        Ok(Self {
            session,
            labels: settings.labels.clone(),
            input_size: settings.input_size,
            confidence_threshold: settings.confidence_threshold,
            iou_threshold: settings.iou_threshold,
        })
    }
}

impl FieldDetector for YoloFieldDetector {
    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn detect(&self, image: &DynamicImage) -> Result<Vec<RawDetection>, CapabilityError> {
        let start = Instant::now();

        let (input, lb) = letterbox(image, self.input_size);
        let tensor = to_nchw(&input, &Normalization::UNIT);
        let output = self.session.run(tensor)?;

        let candidates = decode_output(&output, self.labels.len(), self.confidence_threshold, &lb)?;
        let kept = non_maximum_suppression(candidates, self.iou_threshold);

        debug!(
            "Field detection complete in {:?}: {} detections",
            start.elapsed(),
            kept.len()
        );
        Ok(kept)
    }
}

/// Turn the raw head output into scored boxes in source image coordinates.
///
/// Each anchor keeps only its best class, and only if that score reaches
/// `confidence_threshold`.
pub fn decode_output(
    output: &ArrayD<f32>,
    num_classes: usize,
    confidence_threshold: f32,
    lb: &Letterbox,
) -> Result<Vec<RawDetection>, CapabilityError> {
    let output = output
        .view()
        .into_dimensionality::<Ix3>()
        .map_err(|_| CapabilityError::MalformedOutput(format!("expected 3 dims, got {:?}", output.shape())))?;

    let channels = 4 + num_classes;
    let preds = match output.shape() {
        [1, c, _] if *c == channels => output.index_axis(Axis(0), 0),
        [1, _, c] if *c == channels => output.index_axis(Axis(0), 0).reversed_axes(),
        shape => {
            return Err(CapabilityError::MalformedOutput(format!(
                "shape {:?} does not match {} classes",
                shape, num_classes
            )))
        }
    };

    let mut detections = Vec::new();
    for anchor in preds.axis_iter(Axis(1)) {
        let Some((class_id, score)) = anchor
            .iter()
            .skip(4)
            .copied()
            .enumerate()
            .fold(None, |best: Option<(usize, f32)>, (idx, s)| match best {
                Some((_, b)) if b >= s => best,
                _ => Some((idx, s)),
            })
        else {
            continue;
        };

        if score < confidence_threshold {
            continue;
        }

        let bbox = BoundingBox::from_center(anchor[0], anchor[1], anchor[2], anchor[3]);
        let (x1, y1) = lb.to_source(bbox.x1, bbox.y1);
        let (x2, y2) = lb.to_source(bbox.x2, bbox.y2);

        detections.push(RawDetection {
            bbox: BoundingBox::new(x1, y1, x2, y2),
            score,
            class_id: class_id as i64,
        });
    }

    Ok(detections)
}

/// Per-class non-maximum suppression; result is sorted by descending score
pub fn non_maximum_suppression(mut detections: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    detections.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept: Vec<RawDetection> = Vec::with_capacity(detections.len());
    for d in detections {
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == d.class_id && k.bbox.iou(&d.bbox) > iou_threshold);
        if !suppressed {
            kept.push(d);
        }
    }
    kept
}
