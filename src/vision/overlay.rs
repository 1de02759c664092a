//! Diagnostic overlay rendering
//!
//! Draws detected field boxes and their names onto a copy of the card image.

use ab_glyph::{FontVec, PxScale};
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::Path;
use tracing::{debug, info, warn};

use super::{FieldDetections, CropRect};
use crate::config::OverlaySettings;

/// Fonts tried when no font is configured
const SYSTEM_FONT_PATHS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Helvetica.ttc",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Vertical distance between a box's top edge and its label baseline area
const LABEL_OFFSET: i32 = 10;

/// Renders field detections. Without a font only the boxes are drawn.
pub struct OverlayRenderer {
    font: Option<FontVec>,
    font_scale: f32,
    box_thickness: u32,
    box_color: Rgb<u8>,
    label_color: Rgb<u8>,
}

impl OverlayRenderer {
    pub fn new(settings: &OverlaySettings) -> Self {
        let font = match &settings.font_path {
            Some(path) => load_font(path).or_else(|| {
                warn!("Could not load overlay font {:?}, trying system fonts", path);
                system_font()
            }),
            None => system_font(),
        };

        if font.is_none() {
            debug!("No font available, overlay labels will be skipped");
        }

        Self {
            font,
            font_scale: settings.font_scale,
            box_thickness: settings.box_thickness.max(1),
            box_color: Rgb(settings.box_color),
            label_color: Rgb(settings.label_color),
        }
    }

    /// Draw every detection onto a copy of `image`
    pub fn render(&self, image: &DynamicImage, detections: &FieldDetections) -> DynamicImage {
        let mut canvas: RgbImage = image.to_rgb8();
        let (width, height) = canvas.dimensions();

        for detection in detections.values() {
            let Some(rect) = detection.bbox.clamp_to(width, height) else {
                continue;
            };
            self.draw_box(&mut canvas, &rect);

            if let Some(font) = &self.font {
                let y = (rect.y1 as i32 - LABEL_OFFSET - self.font_scale as i32 / 2).max(0);
                draw_text_mut(
                    &mut canvas,
                    self.label_color,
                    rect.x1 as i32,
                    y,
                    PxScale::from(self.font_scale),
                    font,
                    detection.field.as_str(),
                );
            }
        }

        DynamicImage::ImageRgb8(canvas)
    }

    /// Hollow rectangle grown inward `box_thickness` times
    fn draw_box(&self, canvas: &mut RgbImage, rect: &CropRect) {
        for i in 0..self.box_thickness {
            let w = rect.width().saturating_sub(2 * i);
            let h = rect.height().saturating_sub(2 * i);
            if w == 0 || h == 0 {
                break;
            }
            let r = Rect::at((rect.x1 + i) as i32, (rect.y1 + i) as i32).of_size(w, h);
            draw_hollow_rect_mut(canvas, r, self.box_color);
        }
    }
}

fn load_font(path: &Path) -> Option<FontVec> {
    let data = std::fs::read(path).ok()?;
    FontVec::try_from_vec(data).ok()
}

fn system_font() -> Option<FontVec> {
    SYSTEM_FONT_PATHS.iter().find_map(|path| {
        let font = load_font(Path::new(path))?;
        info!("Loaded overlay font: {}", path);
        Some(font)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::{BoundingBox, FieldDetection, FieldName};

    fn renderer(thickness: u32) -> OverlayRenderer {
        OverlayRenderer {
            font: None,
            font_scale: 16.0,
            box_thickness: thickness,
            box_color: Rgb([0, 255, 0]),
            label_color: Rgb([181, 190, 178]),
        }
    }

    fn detections(boxes: &[(FieldName, BoundingBox)]) -> FieldDetections {
        boxes
            .iter()
            .map(|&(field, bbox)| {
                (
                    field,
                    FieldDetection {
                        field,
                        bbox,
                        confidence: 0.9,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_render_draws_box_edges() {
        let image = DynamicImage::new_rgb8(100, 60);
        let dets = detections(&[(FieldName::BirthDate, BoundingBox::new(10.0, 20.0, 50.0, 40.0))]);
        let out = renderer(2).render(&image, &dets).to_rgb8();

        let green = Rgb([0, 255, 0]);
        assert_eq!(out.get_pixel(10, 20), &green);
        assert_eq!(out.get_pixel(49, 39), &green);
        assert_eq!(out.get_pixel(11, 30), &green);
        assert_eq!(out.get_pixel(30, 30), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_render_leaves_source_untouched() {
        let image = DynamicImage::new_rgb8(40, 40);
        let dets = detections(&[(FieldName::NumberNid, BoundingBox::new(0.0, 0.0, 40.0, 40.0))]);
        let out = renderer(1).render(&image, &dets);

        assert_eq!(out.width(), 40);
        assert_eq!(out.height(), 40);
        assert!(image.to_rgb8().pixels().all(|p| p == &Rgb([0, 0, 0])));
    }

    #[test]
    fn test_render_clamps_and_skips_outside_boxes() {
        let image = DynamicImage::new_rgb8(30, 30);
        let dets = detections(&[
            (FieldName::FatherName, BoundingBox::new(-10.0, -10.0, 100.0, 100.0)),
            (FieldName::MotherName, BoundingBox::new(50.0, 50.0, 80.0, 80.0)),
        ]);
        let out = renderer(1).render(&image, &dets).to_rgb8();
        assert_eq!(out.get_pixel(0, 0), &Rgb([0, 255, 0]));
        assert_eq!(out.get_pixel(29, 29), &Rgb([0, 255, 0]));
    }

    #[test]
    fn test_missing_font_path_falls_back() {
        let settings = OverlaySettings {
            font_path: Some("/nonexistent/font.ttf".into()),
            ..OverlaySettings::default()
        };
        // Must not panic whether or not a system font exists
        let renderer = OverlayRenderer::new(&settings);
        let out = renderer.render(&DynamicImage::new_rgb8(10, 10), &FieldDetections::new());
        assert_eq!(out.width(), 10);
    }
}
