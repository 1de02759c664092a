//! Bounding box geometry
//!
//! Detector output arrives in floating point pixel space and may spill outside
//! the image. Everything that crops goes through [`BoundingBox::clamp_to`].

use serde::Serialize;

/// Axis-aligned box as reported by a detector (x1, y1) top-left, (x2, y2) bottom-right
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Build from center/size form (YOLO heads emit cx, cy, w, h)
    pub fn from_center(cx: f32, cy: f32, width: f32, height: f32) -> Self {
        Self {
            x1: cx - width / 2.0,
            y1: cy - height / 2.0,
            x2: cx + width / 2.0,
            y2: cy + height / 2.0,
        }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Intersection over union with another box
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);

        let intersection = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }
        intersection / union
    }

    /// Clamp into an image of `width` x `height` and snap to whole pixels.
    ///
    /// Coordinates are truncated toward zero, then limited to the image. Returns
    /// `None` when the result would be empty or any coordinate is not finite, so a
    /// returned rect always satisfies `0 <= x1 < x2 <= width` and
    /// `0 <= y1 < y2 <= height`.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<CropRect> {
        if width == 0 || height == 0 {
            return None;
        }
        if ![self.x1, self.y1, self.x2, self.y2].iter().all(|v| v.is_finite()) {
            return None;
        }

        let x1 = (self.x1.trunc().max(0.0) as u32).min(width - 1);
        let y1 = (self.y1.trunc().max(0.0) as u32).min(height - 1);
        let x2 = (self.x2.trunc().max(0.0) as u32).min(width);
        let y2 = (self.y2.trunc().max(0.0) as u32).min(height);

        if x1 >= x2 || y1 >= y2 {
            return None;
        }

        Some(CropRect { x1, y1, x2, y2 })
    }
}

/// Integer pixel rectangle, guaranteed non-empty and inside the image it was clamped to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CropRect {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl CropRect {
    /// Whole-image rect, `None` for an empty image
    pub fn full(width: u32, height: u32) -> Option<Self> {
        (width > 0 && height > 0).then_some(Self {
            x1: 0,
            y1: 0,
            x2: width,
            y2: height,
        })
    }

    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }
}
