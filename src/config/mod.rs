//! Application Configuration
//!
//! Model locations, detector and recognizer tuning, overlay styling, and upload
//! handling, stored in TOML format.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::vision::recognizer::DEFAULT_MIN_CONFIDENCE;
use crate::vision::{FieldName, Script};

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Model files
    pub models: ModelSettings,
    /// Field detector
    pub detector: DetectorSettings,
    /// Text recognition
    pub recognition: RecognitionSettings,
    /// Diagnostic overlay
    pub overlay: OverlaySettings,
    /// Upload store
    pub intake: IntakeSettings,
}

/// Where model files live and where to fetch them from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Models directory; `<data dir>/models` when unset
    pub dir: Option<PathBuf>,
    /// Base URL that missing model files are downloaded from
    pub download_base_url: Option<String>,
    /// ONNX Runtime intra-op threads per session
    pub intra_threads: usize,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            dir: None,
            download_base_url: None,
            intra_threads: 4,
        }
    }
}

/// Field detector tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    /// Square model input size in pixels
    pub input_size: u32,
    /// Minimum class score for a candidate box
    pub confidence_threshold: f32,
    /// Overlap above which same-class boxes are suppressed
    pub iou_threshold: f32,
    /// Class names in class-id order
    pub labels: Vec<String>,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            input_size: 640,
            confidence_threshold: 0.25,
            iou_threshold: 0.7,
            labels: FieldName::ALL.iter().map(|f| f.as_str().to_string()).collect(),
        }
    }
}

/// Text recognition tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionSettings {
    /// Readings at or below this confidence are dropped
    pub min_confidence: f32,
    /// Recognizer input height in pixels
    pub input_height: u32,
    /// Widest recognizer input in pixels
    pub max_width: u32,
    /// Recognizers to run on every line
    pub scripts: Vec<Script>,
    /// Shortest ink band treated as a text line
    pub min_line_height: u32,
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self {
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            input_height: 48,
            max_width: 640,
            scripts: vec![Script::English, Script::Bangla],
            min_line_height: 8,
        }
    }
}

/// Overlay styling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlaySettings {
    /// TrueType/OpenType font for labels; common system fonts when unset
    pub font_path: Option<PathBuf>,
    /// Label size in pixels
    pub font_scale: f32,
    /// Box line thickness in pixels
    pub box_thickness: u32,
    /// Box color (RGB)
    pub box_color: [u8; 3],
    /// Label color (RGB)
    pub label_color: [u8; 3],
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            font_path: None,
            font_scale: 16.0,
            box_thickness: 2,
            box_color: [0, 255, 0],
            label_color: [181, 190, 178],
        }
    }
}

/// Upload store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeSettings {
    /// Upload directory; `<data dir>/uploads` when unset
    pub upload_dir: Option<PathBuf>,
    /// Accepted file extensions, compared case-insensitively
    pub allowed_extensions: Vec<String>,
}

impl Default for IntakeSettings {
    fn default() -> Self {
        Self {
            upload_dir: None,
            allowed_extensions: vec!["png".to_string(), "jpg".to_string(), "jpeg".to_string()],
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {:?}", path))?;
    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config {:?}", path))?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
