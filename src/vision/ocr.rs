//! OCR (Optical Character Recognition) module
//!
//! Reads card field crops with CRNN line recognizers via ONNX Runtime. A crop is
//! split into text lines first; every configured script recognizer reads every
//! line and the most confident non-empty reading wins.

use anyhow::{Context, Result};
use image::{DynamicImage, GrayImage};
use imageproc::contrast::otsu_level;
use ndarray::{ArrayD, Axis, Ix2, Ix3};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info};

use super::models::{ModelKind, ModelManager, OnnxSession};
use super::preprocess::{resize_to_height, to_nchw, Normalization};
use super::{CapabilityError, CropRect, TextDetection, TextReader};
use crate::config::RecognitionSettings;

/// Narrowest recognizer input; CRNN backbones downsample width by 4
const MIN_INPUT_WIDTH: u32 = 16;

/// Rows whose gap is at most this many pixels belong to the same line
const LINE_GAP_TOLERANCE: u32 = 2;

/// Padding added above and below each segmented line
const LINE_PADDING: u32 = 2;

/// Writing systems printed on the card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Script {
    English,
    Bangla,
}

impl Script {
    fn model(&self) -> ModelKind {
        match self {
            Script::English => ModelKind::EnglishRecognizer,
            Script::Bangla => ModelKind::BanglaRecognizer,
        }
    }

    fn dictionary(&self) -> ModelKind {
        match self {
            Script::English => ModelKind::EnglishDictionary,
            Script::Bangla => ModelKind::BanglaDictionary,
        }
    }
}

/// One CRNN model and its character set
struct LineRecognizer {
    script: Script,
    session: OnnxSession,
    /// Index 0 is the CTC blank
    dictionary: Vec<char>,
}

impl LineRecognizer {
    fn recognize(&self, line: &DynamicImage, height: u32, max_width: u32) -> Result<(String, f32), CapabilityError> {
        let resized = resize_to_height(line, height, MIN_INPUT_WIDTH, max_width);
        let tensor = to_nchw(&resized, &Normalization::SYMMETRIC);
        let output = self.session.run(tensor)?;
        ctc_greedy_decode(&output, &self.dictionary)
    }
}

/// Multi-script line reader implementing [`TextReader`]
pub struct OnnxTextReader {
    recognizers: Vec<LineRecognizer>,
    input_height: u32,
    max_width: u32,
    min_line_height: u32,
}

impl OnnxTextReader {
    /// Load one recognizer per configured script
    pub fn load(settings: &RecognitionSettings, models: &ModelManager, intra_threads: usize) -> Result<Self> {
        if settings.scripts.is_empty() {
            anyhow::bail!("No recognition scripts configured");
        }

        let mut recognizers = Vec::with_capacity(settings.scripts.len());
        for &script in &settings.scripts {
            let model_path = models.ensure_model(script.model())?;
            let dict_path = models.ensure_model(script.dictionary())?;

            let dictionary = load_dictionary(&dict_path)?;
            let session = OnnxSession::new(&model_path, intra_threads)
                .with_context(|| format!("Failed to load {:?} recognizer", script))?;
            info!(
                "{:?} recognizer ready ({} characters)",
                script,
                dictionary.len() - 1
            );

            recognizers.push(LineRecognizer {
                script,
                session,
                dictionary,
            });
        }

        Ok(Self {
            recognizers,
            input_height: settings.input_height,
            max_width: settings.max_width,
            min_line_height: settings.min_line_height,
        })
    }

    /// Best reading across scripts for one line, `None` if every script read nothing
    fn read_line(&self, line: &DynamicImage) -> Result<Option<(String, f32)>, CapabilityError> {
        let mut best: Option<(String, f32)> = None;

        for recognizer in &self.recognizers {
            let (text, confidence) = recognizer.recognize(line, self.input_height, self.max_width)?;
            debug!("{:?} read {:?} ({:.3})", recognizer.script, text, confidence);

            if text.trim().is_empty() {
                continue;
            }
            if best.as_ref().map_or(true, |(_, c)| confidence > *c) {
                best = Some((text, confidence));
            }
        }

        Ok(best)
    }
}

impl TextReader for OnnxTextReader {
    fn read(&self, crop: &DynamicImage) -> Result<Vec<TextDetection>, CapabilityError> {
        let gray = crop.to_luma8();
        let mut detections = Vec::new();

        for region in segment_lines(&gray, self.min_line_height) {
            let line = crop.crop_imm(region.x1, region.y1, region.width(), region.height());
            if let Some((text, confidence)) = self.read_line(&line)? {
                detections.push(TextDetection {
                    region,
                    text,
                    confidence,
                });
            }
        }

        Ok(detections)
    }
}

/// Read a recognizer dictionary: one character per line, blank prepended at index 0.
/// A space is appended when the file does not list one.
pub fn load_dictionary(path: &Path) -> Result<Vec<char>> {
    let file = File::open(path).with_context(|| format!("Failed to open dictionary {:?}", path))?;
    let reader = BufReader::new(file);

    let mut dictionary = vec!['\0'];
    for line in reader.lines() {
        let line = line.context("Failed to read dictionary line")?;
        if let Some(ch) = line.chars().next() {
            dictionary.push(ch);
        }
    }

    if dictionary.len() == 1 {
        anyhow::bail!("Dictionary {:?} is empty", path);
    }
    if !dictionary[1..].contains(&' ') {
        dictionary.push(' ');
    }

    Ok(dictionary)
}

/// Greedy CTC decoding of a `[1, T, C]` or `[T, C]` probability tensor.
///
/// Collapses repeats, drops blanks (index 0), and scores the result as the mean
/// of the kept characters' probabilities. An empty result scores 0.
pub fn ctc_greedy_decode(output: &ArrayD<f32>, dictionary: &[char]) -> Result<(String, f32), CapabilityError> {
    let probs = match output.ndim() {
        3 => output
            .view()
            .into_dimensionality::<Ix3>()
            .map(|v| v.index_axis_move(Axis(0), 0)),
        _ => output.view().into_dimensionality::<Ix2>(),
    }
    .map_err(|_| CapabilityError::MalformedOutput(format!("CTC output shape {:?}", output.shape())))?;

    let mut text = String::new();
    let mut total = 0.0f32;
    let mut kept = 0usize;
    let mut prev: Option<usize> = None;

    for step in probs.axis_iter(Axis(0)) {
        let Some((index, prob)) = step
            .iter()
            .copied()
            .enumerate()
            .fold(None, |best: Option<(usize, f32)>, (i, p)| match best {
                Some((_, b)) if b >= p => best,
                _ => Some((i, p)),
            })
        else {
            continue;
        };

        if index != 0 && Some(index) != prev {
            if let Some(&ch) = dictionary.get(index) {
                text.push(ch);
                total += prob;
                kept += 1;
            }
        }
        prev = (index != 0).then_some(index);
    }

    let confidence = if kept == 0 { 0.0 } else { (total / kept as f32).clamp(0.0, 1.0) };
    Ok((text.trim().to_string(), confidence))
}

/// Split a crop into horizontal text lines by ink projection.
///
/// Ink is anything at or below the Otsu level. Returns the whole crop when it
/// does not contain at least two separable lines.
pub fn segment_lines(gray: &GrayImage, min_line_height: u32) -> Vec<CropRect> {
    let (width, height) = gray.dimensions();
    let Some(full) = CropRect::full(width, height) else {
        return Vec::new();
    };

    let level = otsu_level(gray);
    let min_ink = (width / 100).max(1);
    let inked: Vec<bool> = (0..height)
        .map(|y| (0..width).filter(|&x| gray.get_pixel(x, y)[0] <= level).count() as u32 >= min_ink)
        .collect();

    let mut bands: Vec<(u32, u32)> = Vec::new();
    for (y, &ink) in inked.iter().enumerate() {
        if !ink {
            continue;
        }
        let y = y as u32;
        match bands.last_mut() {
            Some((_, end)) if y <= *end + LINE_GAP_TOLERANCE => *end = y + 1,
            _ => bands.push((y, y + 1)),
        }
    }
    bands.retain(|(start, end)| end - start >= min_line_height);

    if bands.len() < 2 {
        return vec![full];
    }

    bands
        .into_iter()
        .map(|(start, end)| CropRect {
            x1: 0,
            y1: start.saturating_sub(LINE_PADDING),
            x2: width,
            y2: (end + LINE_PADDING).min(height),
        })
        .collect()
}
