//! Step ledger models: one row per (document, stage) pair.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a processing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Success,
    Failure,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            _ => None,
        }
    }

    /// Whether this status is terminal (success or failure).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

/// A named unit of pipeline work applied to a document.
///
/// Delivery stages carry the destination id so each configured destination
/// gets its own independent ledger row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    Convert,
    DedupCheck,
    Ocr,
    Rotate,
    ExtractMetadata,
    EmbedMetadata,
    Deliver(String),
}

impl Stage {
    /// The ledger name for this stage.
    pub fn name(&self) -> String {
        match self {
            Self::Convert => "convert".to_string(),
            Self::DedupCheck => "dedup_check".to_string(),
            Self::Ocr => "ocr".to_string(),
            Self::Rotate => "rotate".to_string(),
            Self::ExtractMetadata => "extract_metadata".to_string(),
            Self::EmbedMetadata => "embed_metadata".to_string(),
            Self::Deliver(destination_id) => format!("deliver:{destination_id}"),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        if let Some(destination_id) = s.strip_prefix("deliver:") {
            return Some(Self::Deliver(destination_id.to_string()));
        }
        match s {
            "convert" => Some(Self::Convert),
            "dedup_check" => Some(Self::DedupCheck),
            "ocr" => Some(Self::Ocr),
            "rotate" => Some(Self::Rotate),
            "extract_metadata" => Some(Self::ExtractMetadata),
            "embed_metadata" => Some(Self::EmbedMetadata),
            _ => None,
        }
    }

    /// Content-processing stages skipped for duplicates by the dedup gate.
    pub fn content_stages() -> [Stage; 4] {
        [
            Stage::Ocr,
            Stage::Rotate,
            Stage::ExtractMetadata,
            Stage::EmbedMetadata,
        ]
    }
}

/// One attempt record for a (document, stage) pair.
///
/// Invariant: `in_progress` implies `started_at` is set and `completed_at`
/// is null; terminal statuses imply both timestamps are set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingStep {
    pub id: i64,
    pub document_id: String,
    pub stage: String,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// Free-form diagnostic text (e.g. "skipped: duplicate").
    pub detail: Option<String>,
}
