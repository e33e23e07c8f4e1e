//! Text extraction using pdftotext (Poppler).
//!
//! A deliberately modest default backend: it reports no skew (pdftotext
//! does not measure it) and estimates quality from text density. Vision
//! backends slot in behind the same trait.

use std::path::Path;
use std::process::Command;

use async_trait::async_trait;

use super::{OcrOutcome, OcrService};
use crate::pipeline::error::StageError;

fn check_binary(name: &str) -> bool {
    which::which(name).is_ok()
}

/// pdftotext-based text extraction.
#[derive(Debug, Default)]
pub struct PdftotextOcr;

impl PdftotextOcr {
    pub fn new() -> Self {
        Self
    }

    fn run_pdftotext(path: &Path) -> Result<String, StageError> {
        let output = Command::new("pdftotext")
            .arg("-layout")
            .arg(path)
            .arg("-")
            .output();

        match output {
            Ok(output) if output.status.success() => {
                Ok(String::from_utf8_lossy(&output.stdout).to_string())
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(StageError::permanent(format!(
                    "pdftotext failed: {}",
                    stderr.trim()
                )))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StageError::permanent(
                "pdftotext not found (install poppler-utils)",
            )),
            Err(e) => Err(e.into()),
        }
    }

    fn page_count(path: &Path) -> usize {
        let output = Command::new("qpdf").arg("--show-npages").arg(path).output();
        match output {
            Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout)
                .trim()
                .parse()
                .unwrap_or(1),
            _ => 1,
        }
    }
}

#[async_trait]
impl OcrService for PdftotextOcr {
    async fn extract(&self, path: &Path) -> Result<OcrOutcome, StageError> {
        if !path.exists() {
            return Err(StageError::permanent(format!(
                "input file missing: {}",
                path.display()
            )));
        }
        if !check_binary("pdftotext") {
            return Err(StageError::permanent(
                "pdftotext not found (install poppler-utils)",
            ));
        }

        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let text = Self::run_pdftotext(&path)?;
            let pages = Self::page_count(&path);

            // Text-layer extraction sees no skew; report flat pages so the
            // rotate stage records "no rotation needed".
            let skew_angles = vec![0.0; pages];

            // Rough quality proxy: pages with a usable text layer average
            // well over 100 characters.
            let chars_per_page = text.chars().count() as f32 / pages.max(1) as f32;
            let quality_score = Some((chars_per_page / 1000.0).min(1.0));

            Ok(OcrOutcome {
                text,
                skew_angles,
                quality_score,
            })
        })
        .await
        .map_err(|e| StageError::transient(e))?
    }
}
