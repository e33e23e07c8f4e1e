//! Document models for the processing pipeline.
//!
//! Documents are content-addressed by SHA-256 hash, which also drives the
//! deduplication gate: duplicates are tracked explicitly rather than
//! rejected at the storage layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// Coarse queue status of a document.
///
/// Per-stage progress lives in the step ledger; this is only the signal the
/// worker queue polls on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Processed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "processed" => Some(Self::Processed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A document moving through the pipeline.
///
/// Derived fields (`extracted_text`, `extracted_metadata`, `skew_angles`,
/// `quality_score`, `processed_path`) are each written by exactly one stage
/// and never rolled back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier for this document.
    pub id: String,
    /// SHA-256 hash of the raw content.
    pub content_hash: String,
    /// Filename the document was ingested under.
    pub original_name: String,
    /// Path to the raw bytes as ingested.
    pub raw_path: PathBuf,
    /// Path to the converted/normalized artifact, set by the convert stage.
    pub processed_path: Option<PathBuf>,
    /// MIME type detected from content.
    pub mime_type: String,
    /// Size of the raw content in bytes.
    pub size_bytes: i64,
    /// Whether the dedup gate matched this document to an earlier one.
    pub is_duplicate: bool,
    /// The original this document duplicates. Immutable once set; always
    /// references a non-duplicate document (no chains).
    pub duplicate_of_id: Option<String>,
    /// OCR or extracted text content, set by the OCR stage.
    pub extracted_text: Option<String>,
    /// Structured metadata, set by the extract-metadata stage.
    pub extracted_metadata: Option<serde_json::Value>,
    /// Per-page skew angles in degrees as reported by OCR. Persisted so the
    /// rotate stage can recover its input after a crash.
    pub skew_angles: Option<Vec<f64>>,
    /// OCR quality score in [0, 1], set by the OCR stage.
    pub quality_score: Option<f32>,
    /// Coarse queue status.
    pub status: DocumentStatus,
    /// When the document was ingested.
    pub created_at: DateTime<Utc>,
    /// When the document was last modified.
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Compute the SHA-256 content hash used for deduplication.
    pub fn compute_hash(content: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content);
        hex::encode(hasher.finalize())
    }

    /// Create a new document record for freshly ingested content.
    pub fn new(
        id: String,
        content: &[u8],
        original_name: String,
        raw_path: PathBuf,
        mime_type: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            content_hash: Self::compute_hash(content),
            original_name,
            raw_path,
            processed_path: None,
            mime_type,
            size_bytes: content.len() as i64,
            is_duplicate: false,
            duplicate_of_id: None,
            extracted_text: None,
            extracted_metadata: None,
            skew_angles: None,
            quality_score: None,
            status: DocumentStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}
