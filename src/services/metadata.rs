//! Heuristic metadata extraction and sidecar embedding.
//!
//! Uses deterministic strategies: the first content line becomes the title
//! and date patterns in the text provide a document date estimate. An
//! LLM-backed extractor can replace this behind the same trait.

use std::path::Path;
use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::NaiveDate;
use regex::Regex;
use serde_json::json;

use super::MetadataService;
use crate::pipeline::error::StageError;

/// Date patterns searched for in document text, most specific first.
static DATE_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        // ISO format with various separators: 2024-01-15, 2024_01_15, 2024/01/15
        (
            Regex::new(r"(\d{4})[-_/](\d{2})[-_/](\d{2})").unwrap(),
            "ymd",
        ),
        // US format: 01-15-2024, 01/15/2024
        (
            Regex::new(r"(\d{2})[-_/](\d{2})[-_/](\d{4})").unwrap(),
            "mdy",
        ),
    ]
});

/// Find the first plausible date in the text.
fn detect_date(text: &str) -> Option<NaiveDate> {
    for (pattern, format) in DATE_PATTERNS.iter() {
        for caps in pattern.captures_iter(text) {
            let parse = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
            let (year, month, day) = match *format {
                "ymd" => (parse(1), parse(2), parse(3)),
                _ => (parse(3), parse(1), parse(2)),
            };
            let (Some(year), Some(month), Some(day)) = (year, month, day) else {
                continue;
            };
            if !(1900..=2100).contains(&year) {
                continue;
            }
            if let Some(date) = NaiveDate::from_ymd_opt(year as i32, month, day) {
                return Some(date);
            }
        }
    }
    None
}

/// First non-empty line, trimmed and bounded, as a title candidate.
fn detect_title(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|line| line.len() >= 3)
        .map(|line| {
            let mut title = line.to_string();
            if title.len() > 120 {
                title.truncate(120);
            }
            title
        })
}

/// Deterministic text-based metadata extraction with sidecar embedding.
#[derive(Debug, Default)]
pub struct HeuristicMetadata;

impl HeuristicMetadata {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MetadataService for HeuristicMetadata {
    async fn extract(&self, text: &str) -> Result<serde_json::Value, StageError> {
        let mut metadata = json!({
            "char_count": text.chars().count(),
            "line_count": text.lines().count(),
        });

        if let Some(title) = detect_title(text) {
            metadata["title"] = json!(title);
        }
        if let Some(date) = detect_date(text) {
            metadata["document_date"] = json!(date.format("%Y-%m-%d").to_string());
        }

        Ok(metadata)
    }

    /// Embed as a sidecar JSON file next to the artifact. Writing XMP into
    /// the binary itself is a format concern left to richer backends.
    async fn embed(&self, path: &Path, metadata: &serde_json::Value) -> Result<(), StageError> {
        let sidecar = path.with_extension("metadata.json");
        let body = serde_json::to_vec_pretty(metadata)
            .map_err(|e| StageError::permanent(format!("unserializable metadata: {e}")))?;
        tokio::fs::write(&sidecar, body).await?;
        Ok(())
    }
}
