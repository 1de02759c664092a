//! NID Extract - field extraction from national identity card photographs
//!
//! A detector locates the six card fields, each region is cropped and read by
//! OCR, and the text comes back keyed by field name.

pub mod config;
pub mod pipeline;
pub mod storage;
pub mod vision;

pub use config::AppConfig;
pub use pipeline::{ExtractionError, ExtractionOrchestrator, ExtractionReport, ExtractionResult, ExtractionStage};
pub use storage::UploadStore;
pub use vision::{FieldName, VisionServices};
