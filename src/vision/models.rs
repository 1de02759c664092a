//! Model management for ONNX Runtime
//!
//! Resolves, optionally downloads, and loads the field detector and the text
//! recognition models.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use ndarray::{ArrayD, Array4};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::runtime::Runtime;
use tracing::{debug, info};

use super::CapabilityError;
use crate::config::ModelSettings;

/// Model files the pipeline needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    /// Card field detector (YOLO export)
    FieldDetector,
    /// Latin-script line recognizer (CRNN)
    EnglishRecognizer,
    /// Bengali-script line recognizer (CRNN)
    BanglaRecognizer,
    /// Character dictionary for the English recognizer
    EnglishDictionary,
    /// Character dictionary for the Bangla recognizer
    BanglaDictionary,
}

impl ModelKind {
    pub const ALL: [ModelKind; 5] = [
        ModelKind::FieldDetector,
        ModelKind::EnglishRecognizer,
        ModelKind::BanglaRecognizer,
        ModelKind::EnglishDictionary,
        ModelKind::BanglaDictionary,
    ];

    /// Get the filename for this model
    pub fn filename(&self) -> &'static str {
        match self {
            ModelKind::FieldDetector => "nid_fields.onnx",
            ModelKind::EnglishRecognizer => "rec_english.onnx",
            ModelKind::BanglaRecognizer => "rec_bangla.onnx",
            ModelKind::EnglishDictionary => "dict_english.txt",
            ModelKind::BanglaDictionary => "dict_bangla.txt",
        }
    }

    /// Display name for progress reporting
    pub fn display_name(&self) -> &'static str {
        match self {
            ModelKind::FieldDetector => "Field Detector",
            ModelKind::EnglishRecognizer => "English Recognizer",
            ModelKind::BanglaRecognizer => "Bangla Recognizer",
            ModelKind::EnglishDictionary => "English Dictionary",
            ModelKind::BanglaDictionary => "Bangla Dictionary",
        }
    }
}

/// Model manifest tracking downloaded models
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelManifest {
    pub version: String,
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelInfo {
    pub filename: String,
    pub size_bytes: u64,
    pub sha256: String,
    /// Unix seconds
    pub downloaded_at: u64,
}

impl Default for ModelManifest {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            models: Vec::new(),
        }
    }
}

/// Locates model files and downloads missing ones when a source is configured
pub struct ModelManager {
    models_dir: PathBuf,
    download_base_url: Option<String>,
}

impl ModelManager {
    /// Create a model manager from settings, defaulting to `<data dir>/models`
    pub fn new(settings: &ModelSettings) -> Result<Self> {
        let models_dir = match &settings.dir {
            Some(dir) => dir.clone(),
            None => crate::storage::get_data_dir()?.join("models"),
        };
        let mut manager = Self::with_dir(models_dir)?;
        manager.download_base_url = settings.download_base_url.clone();
        Ok(manager)
    }

    /// Create model manager with custom directory and no download source
    pub fn with_dir(models_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&models_dir)
            .with_context(|| format!("Failed to create models directory {:?}", models_dir))?;
        Ok(Self {
            models_dir,
            download_base_url: None,
        })
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn model_path(&self, kind: ModelKind) -> PathBuf {
        self.models_dir.join(kind.filename())
    }

    /// A model counts as available when its file exists and is non-empty
    pub fn is_model_available(&self, kind: ModelKind) -> bool {
        std::fs::metadata(self.model_path(kind))
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }

    /// Availability and size of every model
    pub fn get_model_status(&self) -> Vec<(ModelKind, bool, Option<u64>)> {
        ModelKind::ALL
            .iter()
            .map(|&kind| {
                let size = std::fs::metadata(self.model_path(kind)).ok().map(|m| m.len());
                (kind, self.is_model_available(kind), size)
            })
            .collect()
    }

    /// Path to a model, downloading it first if missing and a source is configured
    pub fn ensure_model(&self, kind: ModelKind) -> Result<PathBuf> {
        let path = self.model_path(kind);

        if self.is_model_available(kind) {
            debug!("Model {:?} available at {:?}", kind, path);
            return Ok(path);
        }

        let Some(base_url) = self.download_base_url.as_deref() else {
            anyhow::bail!(
                "{} model not found at {:?} and no download_base_url is configured",
                kind.display_name(),
                path
            );
        };

        let url = format!("{}/{}", base_url.trim_end_matches('/'), kind.filename());
        self.download_model(kind, &url)?;
        Ok(path)
    }

    /// Make sure every model is present
    pub fn ensure_all_models(&self) -> Result<()> {
        for kind in ModelKind::ALL {
            self.ensure_model(kind)?;
        }
        Ok(())
    }

    /// Download a model (blocking)
    fn download_model(&self, kind: ModelKind, url: &str) -> Result<()> {
        let path = self.model_path(kind);
        info!("Downloading {} model from {}", kind.display_name(), url);

        if std::env::var("NID_EXTRACT_OFFLINE").is_ok() {
            anyhow::bail!(
                "Offline mode: cannot download models. Please download manually from {} and place at {:?}",
                url,
                path
            );
        }

        let rt = Runtime::new().context("Failed to create tokio runtime")?;
        let (size_bytes, sha256) = rt.block_on(download_file_async(url, &path))?;

        if !self.is_model_available(kind) {
            anyhow::bail!("Download completed but {:?} is empty", path);
        }

        self.record_download(kind, size_bytes, sha256)?;
        info!("Successfully downloaded {} model", kind.display_name());
        Ok(())
    }

    fn record_download(&self, kind: ModelKind, size_bytes: u64, sha256: String) -> Result<()> {
        let mut manifest = self.load_manifest().unwrap_or_default();

        let downloaded_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        let model_info = ModelInfo {
            filename: kind.filename().to_string(),
            size_bytes,
            sha256,
            downloaded_at,
        };

        if let Some(existing) = manifest.models.iter_mut().find(|m| m.filename == model_info.filename) {
            *existing = model_info;
        } else {
            manifest.models.push(model_info);
        }

        self.save_manifest(&manifest)
    }

    /// Load the model manifest
    pub fn load_manifest(&self) -> Result<ModelManifest> {
        let manifest_path = self.models_dir.join("manifest.json");
        if manifest_path.exists() {
            let content = std::fs::read_to_string(&manifest_path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(ModelManifest::default())
        }
    }

    /// Save the model manifest
    pub fn save_manifest(&self, manifest: &ModelManifest) -> Result<()> {
        let manifest_path = self.models_dir.join("manifest.json");
        let content = serde_json::to_string_pretty(manifest)?;
        std::fs::write(manifest_path, content)?;
        Ok(())
    }
}

/// Stream `url` into a temp file beside `path`, then move it into place.
/// Returns the size and SHA-256 of what was written.
async fn download_file_async(url: &str, path: &Path) -> Result<(u64, String)> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()
        .context("Failed to create HTTP client")?;

    let response = client
        .get(url)
        .send()
        .await
        .context("Failed to send download request")?;

    if !response.status().is_success() {
        anyhow::bail!("Download failed with status {}: {}", response.status(), url);
    }

    debug!("Download size: {:?} bytes", response.content_length());

    let temp_path = path.with_extension("tmp");
    let mut file = std::fs::File::create(&temp_path).context("Failed to create temp file")?;

    let mut hasher = Sha256::new();
    let mut downloaded: u64 = 0;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Error reading download stream")?;
        file.write_all(&chunk).context("Failed to write to temp file")?;
        hasher.update(&chunk);
        downloaded += chunk.len() as u64;
    }

    file.flush().context("Failed to flush temp file")?;
    drop(file);

    std::fs::rename(&temp_path, path)
        .context("Failed to move downloaded file to final location")?;

    Ok((downloaded, format!("{:x}", hasher.finalize())))
}

/// ONNX Runtime session with a single tensor input.
///
/// `Session::run` needs exclusive access, so the session sits behind a mutex and
/// concurrent callers are serialized per model.
pub struct OnnxSession {
    session: Mutex<Session>,
    input_name: String,
}

impl OnnxSession {
    /// Create a new ONNX session from a model file
    pub fn new(model_path: &Path, intra_threads: usize) -> Result<Self> {
        info!("Loading ONNX model from {:?}", model_path);

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)
            .with_context(|| format!("Failed to load ONNX model {:?}", model_path))?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .context("Model declares no inputs")?;

        let output_names: Vec<String> = session
            .outputs
            .iter()
            .map(|output| output.name.clone())
            .collect();

        info!("Model loaded. Input: {}, Outputs: {:?}", input_name, output_names);

        Ok(Self {
            session: Mutex::new(session),
            input_name,
        })
    }

    /// Run the model on one NCHW tensor and return its first output
    pub fn run(&self, input: Array4<f32>) -> Result<ArrayD<f32>, CapabilityError> {
        let input_value = Value::from_array(input)?;

        let mut session = self.session.lock();
        let outputs = session.run(ort::inputs![&self.input_name => input_value])?;
        let output = outputs[0].try_extract_array::<f32>()?.to_owned();

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_model_filenames_are_distinct() {
        let mut names: Vec<_> = ModelKind::ALL.iter().map(|k| k.filename()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), ModelKind::ALL.len());
        assert_eq!(ModelKind::FieldDetector.filename(), "nid_fields.onnx");
    }

    #[test]
    fn test_model_status_on_empty_dir() {
        let dir = TempDir::new().unwrap();
        let manager = ModelManager::with_dir(dir.path().join("models")).unwrap();
        let status = manager.get_model_status();
        assert_eq!(status.len(), 5);
        assert!(status.iter().all(|(_, available, size)| !available && size.is_none()));
    }

    #[test]
    fn test_empty_file_is_not_available() {
        let dir = TempDir::new().unwrap();
        let manager = ModelManager::with_dir(dir.path().to_path_buf()).unwrap();
        std::fs::write(manager.model_path(ModelKind::EnglishDictionary), b"").unwrap();
        assert!(!manager.is_model_available(ModelKind::EnglishDictionary));

        std::fs::write(manager.model_path(ModelKind::EnglishDictionary), b"a\nb\n").unwrap();
        assert!(manager.is_model_available(ModelKind::EnglishDictionary));
    }

    #[test]
    fn test_ensure_model_without_source_fails() {
        let dir = TempDir::new().unwrap();
        let manager = ModelManager::with_dir(dir.path().to_path_buf()).unwrap();
        let err = manager.ensure_model(ModelKind::FieldDetector).unwrap_err();
        assert!(err.to_string().contains("download_base_url"));
    }

    #[test]
    fn test_ensure_model_returns_existing_path() {
        let dir = TempDir::new().unwrap();
        let manager = ModelManager::with_dir(dir.path().to_path_buf()).unwrap();
        std::fs::write(manager.model_path(ModelKind::BanglaDictionary), "অ\nআ\n").unwrap();
        let path = manager.ensure_model(ModelKind::BanglaDictionary).unwrap();
        assert_eq!(path, dir.path().join("dict_bangla.txt"));
    }

    #[test]
    fn test_manifest_roundtrip() {
        let dir = TempDir::new().unwrap();
        let manager = ModelManager::with_dir(dir.path().to_path_buf()).unwrap();
        assert!(manager.load_manifest().unwrap().models.is_empty());

        manager
            .record_download(ModelKind::FieldDetector, 1234, "abc".to_string())
            .unwrap();
        manager
            .record_download(ModelKind::FieldDetector, 5678, "def".to_string())
            .unwrap();

        let manifest = manager.load_manifest().unwrap();
        assert_eq!(manifest.models.len(), 1);
        assert_eq!(manifest.models[0].size_bytes, 5678);
        assert_eq!(manifest.models[0].sha256, "def");
    }
}
