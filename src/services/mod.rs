//! Collaborator interfaces the pipeline depends on.
//!
//! Each external system (conversion backend, OCR engine, metadata
//! extractor, delivery destination) sits behind one of these traits and is
//! injected into the orchestrator at construction time. Implementations own
//! their authentication and wire protocols; the pipeline only classifies
//! their failures and tracks their outcomes.

pub mod convert;
pub mod fs_destination;
pub mod ingest;
pub mod metadata;
pub mod ocr;

pub use convert::ShellConverter;
pub use fs_destination::DirectoryDestination;
pub use ingest::IngestService;
pub use metadata::HeuristicMetadata;
pub use ocr::PdftotextOcr;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::pipeline::angle::PageRotation;
use crate::pipeline::error::StageError;

/// Format conversion: normalize arbitrary input into the processing format,
/// and apply quantized page rotations to it.
#[async_trait]
pub trait ConversionService: Send + Sync {
    /// Convert the input file, returning the path of the converted artifact.
    async fn convert(&self, input: &Path) -> Result<PathBuf, StageError>;

    /// Write the given rotations into the document's page rotation fields.
    async fn rotate(&self, path: &Path, rotations: &[PageRotation]) -> Result<(), StageError>;
}

/// Output of a text-extraction run.
#[derive(Debug, Clone)]
pub struct OcrOutcome {
    pub text: String,
    /// Detected skew per page, in degrees.
    pub skew_angles: Vec<f64>,
    /// Extraction quality in [0, 1] if the backend reports one.
    pub quality_score: Option<f32>,
}

/// Text extraction / OCR.
#[async_trait]
pub trait OcrService: Send + Sync {
    async fn extract(&self, path: &Path) -> Result<OcrOutcome, StageError>;
}

/// Structured-metadata extraction and embedding.
#[async_trait]
pub trait MetadataService: Send + Sync {
    /// Derive structured metadata from extracted text.
    async fn extract(&self, text: &str) -> Result<serde_json::Value, StageError>;

    /// Embed metadata into (or alongside) the processed artifact.
    async fn embed(&self, path: &Path, metadata: &serde_json::Value) -> Result<(), StageError>;
}

/// A successful delivery.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Where the destination stored the document.
    pub remote_path: String,
}

/// One delivery destination (cloud storage, SFTP, mail gateway, ...).
#[async_trait]
pub trait DestinationAdapter: Send + Sync {
    async fn deliver(
        &self,
        path: &Path,
        metadata: &serde_json::Value,
    ) -> Result<Delivery, StageError>;
}
