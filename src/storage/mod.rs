//! Storage Layer
//!
//! Application directories, the upload store that inputs pass through before
//! extraction, and naming of overlay images.

use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

use crate::config::IntakeSettings;
use crate::pipeline::ExtractionError;

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "nidextract", "NidExtract")
        .ok_or_else(|| anyhow::anyhow!("Could not determine application directories"))
}

/// Get the application data directory
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = project_dirs()?.data_dir().to_path_buf();
    std::fs::create_dir_all(&data_dir)?;
    Ok(data_dir)
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = project_dirs()?.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;
    Ok(config_dir)
}

/// Where the overlay for `input` is written: `output_<name>` in the same directory
pub fn overlay_path_for(input: &Path) -> PathBuf {
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    input.with_file_name(format!("output_{}", name))
}

/// Stem used when nothing of the original name survives sanitizing
const FALLBACK_STEM: &str = "upload";

/// Keep ASCII alphanumerics, `.`, `-` and `_` in the stem and strip leading dots.
/// The extension is kept, and an emptied stem becomes `upload`.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let path = Path::new(base);

    let extension: Option<String> = path
        .extension()
        .map(|e| e.to_string_lossy().chars().filter(|c| c.is_ascii_alphanumeric()).collect::<String>())
        .filter(|e| !e.is_empty());
    let stem = match (&extension, path.file_stem()) {
        (Some(_), Some(stem)) => stem.to_string_lossy().into_owned(),
        _ => base.to_string(),
    };

    let cleaned: String = stem
        .chars()
        .map(|c| if c.is_ascii_whitespace() { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    let stem = if cleaned.is_empty() { FALLBACK_STEM } else { cleaned };

    match extension {
        Some(ext) => format!("{}.{}", stem, ext),
        None => stem.to_string(),
    }
}

/// Validates and stores uploaded card images under collision-free names
pub struct UploadStore {
    dir: PathBuf,
    allowed_extensions: Vec<String>,
}

impl UploadStore {
    /// Create a store from settings, defaulting to `<data dir>/uploads`
    pub fn new(settings: &IntakeSettings) -> Result<Self> {
        let dir = match &settings.upload_dir {
            Some(dir) => dir.clone(),
            None => get_data_dir()?.join("uploads"),
        };
        Self::with_dir(dir, settings.allowed_extensions.clone())
    }

    pub fn with_dir(dir: PathBuf, allowed_extensions: Vec<String>) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            allowed_extensions: allowed_extensions.into_iter().map(|e| e.to_ascii_lowercase()).collect(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Check that `filename` carries an accepted extension
    pub fn validate(&self, filename: &str) -> Result<(), ExtractionError> {
        if filename.trim().is_empty() {
            return Err(ExtractionError::UnsupportedInput("no file selected".to_string()));
        }

        let extension = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match extension {
            Some(ext) if self.allowed_extensions.contains(&ext) => Ok(()),
            _ => Err(ExtractionError::UnsupportedInput(format!(
                "file type not allowed: {}",
                filename
            ))),
        }
    }

    /// Store `bytes` as `<uuid>_<sanitized filename>` and return the stored path
    pub fn store(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf, ExtractionError> {
        self.validate(filename)?;

        let stored = self
            .dir
            .join(format!("{}_{}", Uuid::new_v4(), sanitize_filename(filename)));
        std::fs::write(&stored, bytes).map_err(|source| ExtractionError::Storage {
            path: stored.clone(),
            source,
        })?;

        info!("Stored upload {:?} as {:?}", filename, stored);
        Ok(stored)
    }

    /// Copy a local file into the store
    pub fn store_file(&self, path: &Path) -> Result<PathBuf, ExtractionError> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.validate(&filename)?;

        let bytes = std::fs::read(path).map_err(|source| ExtractionError::Storage {
            path: path.to_path_buf(),
            source,
        })?;
        self.store(&filename, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> UploadStore {
        UploadStore::with_dir(dir.path().join("uploads"), IntakeSettings::default().allowed_extensions).unwrap()
    }

    #[test]
    fn test_overlay_path_for() {
        assert_eq!(
            overlay_path_for(Path::new("/srv/uploads/abc_card.png")),
            PathBuf::from("/srv/uploads/output_abc_card.png")
        );
        assert_eq!(overlay_path_for(Path::new("card.jpg")), PathBuf::from("output_card.jpg"));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("my card.png"), "my_card.png");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\x\\nid (1).JPG"), "nid_1.JPG");
        assert_eq!(sanitize_filename(".hidden.png"), "hidden.png");
    }

    #[test]
    fn test_sanitize_keeps_extension_of_non_ascii_names() {
        assert_eq!(sanitize_filename("ছবি.png"), "upload.png");
        assert_eq!(sanitize_filename("জাতীয় পরিচয়পত্র.JPG"), "upload.JPG");
        assert_eq!(sanitize_filename("কার্ড_01.jpeg"), "_01.jpeg");
        assert_eq!(sanitize_filename("ছবি"), "upload");
    }

    #[test]
    fn test_store_non_ascii_name_keeps_extension() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let stored = store.store("ছবি.png", b"png bytes").unwrap();
        let name = stored.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.ends_with("_upload.png"), "{}", name);
        assert_eq!(stored.extension().and_then(|e| e.to_str()), Some("png"));
    }

    #[test]
    fn test_validate_extensions() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(store.validate("card.png").is_ok());
        assert!(store.validate("card.JPEG").is_ok());
        assert!(matches!(store.validate("card.gif"), Err(ExtractionError::UnsupportedInput(_))));
        assert!(matches!(store.validate("card"), Err(ExtractionError::UnsupportedInput(_))));
        assert!(matches!(store.validate(""), Err(ExtractionError::UnsupportedInput(_))));
    }

    #[test]
    fn test_store_uses_unique_prefixed_names() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let a = store.store("card.png", b"one").unwrap();
        let b = store.store("card.png", b"two").unwrap();
        assert_ne!(a, b);
        assert_eq!(a.parent(), Some(store.dir()));

        let name = a.file_name().unwrap().to_string_lossy().into_owned();
        let (prefix, rest) = name.split_once('_').unwrap();
        assert!(Uuid::parse_str(prefix).is_ok());
        assert_eq!(rest, "card.png");
        assert_eq!(std::fs::read(&b).unwrap(), b"two");
    }

    #[test]
    fn test_store_rejects_before_writing() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(store.store("notes.txt", b"x").is_err());
        assert_eq!(std::fs::read_dir(store.dir()).unwrap().count(), 0);
    }

    #[test]
    fn test_store_file_copies_input() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let src = dir.path().join("scan.jpg");
        std::fs::write(&src, b"jpeg bytes").unwrap();

        let stored = store.store_file(&src).unwrap();
        assert_eq!(std::fs::read(stored).unwrap(), b"jpeg bytes");
        assert!(matches!(
            store.store_file(&dir.path().join("missing.png")),
            Err(ExtractionError::Storage { .. })
        ));
    }
}
