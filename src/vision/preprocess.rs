//! Image preprocessing for the ONNX models
//!
//! Letterboxing for the field detector, fixed-height resizing for the line
//! recognizers, and conversion of RGB buffers into NCHW tensors.

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use ndarray::Array4;

/// Gray used to pad letterboxed detector input
const LETTERBOX_FILL: u8 = 114;

/// Per-channel normalization applied after scaling pixels to [0, 1]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Normalization {
    /// Plain [0, 1] scaling (YOLO exports)
    pub const UNIT: Normalization = Normalization {
        mean: [0.0, 0.0, 0.0],
        std: [1.0, 1.0, 1.0],
    };

    /// Maps [0, 255] to [-1, 1] (CRNN recognizers)
    pub const SYMMETRIC: Normalization = Normalization {
        mean: [0.5, 0.5, 0.5],
        std: [0.5, 0.5, 0.5],
    };
}

/// How a letterboxed tensor maps back onto the source image
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

impl Letterbox {
    /// Map a point from model input space back to the source image
    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Fit `image` inside a `size` x `size` square, preserving aspect ratio and
/// centering it on a gray background
pub fn letterbox(image: &DynamicImage, size: u32) -> (RgbImage, Letterbox) {
    let (w, h) = image.dimensions();
    let mut canvas = RgbImage::from_pixel(size, size, Rgb([LETTERBOX_FILL; 3]));

    if w == 0 || h == 0 {
        return (
            canvas,
            Letterbox {
                scale: 1.0,
                pad_x: 0.0,
                pad_y: 0.0,
            },
        );
    }

    let scale = (size as f32 / w as f32).min(size as f32 / h as f32);
    let new_w = ((w as f32 * scale).round() as u32).clamp(1, size);
    let new_h = ((h as f32 * scale).round() as u32).clamp(1, size);
    let resized = image.resize_exact(new_w, new_h, FilterType::Triangle).to_rgb8();

    let pad_x = (size - new_w) / 2;
    let pad_y = (size - new_h) / 2;
    image::imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);

    (
        canvas,
        Letterbox {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
        },
    )
}

/// Resize to a fixed height with the width following the aspect ratio,
/// limited to `[min_width, max_width]`
pub fn resize_to_height(image: &DynamicImage, height: u32, min_width: u32, max_width: u32) -> RgbImage {
    let (w, h) = image.dimensions();
    let scale = height as f32 / h.max(1) as f32;
    let new_w = ((w as f32 * scale).round() as u32).clamp(min_width, max_width.max(min_width));
    image.resize_exact(new_w, height, FilterType::Triangle).to_rgb8()
}

/// Convert an RGB image into a normalized `[1, 3, H, W]` tensor
pub fn to_nchw(image: &RgbImage, norm: &Normalization) -> Array4<f32> {
    let (w, h) = image.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, h as usize, w as usize));

    for (x, y, pixel) in image.enumerate_pixels() {
        for c in 0..3 {
            let value = pixel[c] as f32 / 255.0;
            tensor[[0, c, y as usize, x as usize]] = (value - norm.mean[c]) / norm.std[c];
        }
    }

    tensor
}
