//! Format conversion via external command-line tools.
//!
//! PDFs pass through unchanged; office formats and images are converted
//! with LibreOffice when available. Rotation is applied with qpdf.

use std::path::{Path, PathBuf};
use std::process::Command;

use async_trait::async_trait;
use tracing::debug;

use super::ConversionService;
use crate::pipeline::angle::PageRotation;
use crate::pipeline::error::StageError;

/// Check whether a binary is available in PATH.
fn check_binary(name: &str) -> bool {
    which::which(name).is_ok()
}

/// Conversion backend shelling out to soffice and qpdf.
pub struct ShellConverter {
    /// Directory converted artifacts are written to.
    output_dir: PathBuf,
}

impl ShellConverter {
    pub fn new(output_dir: PathBuf) -> Self {
        Self { output_dir }
    }

    fn convert_with_soffice(output_dir: &Path, input: &Path) -> Result<PathBuf, StageError> {
        if !check_binary("soffice") {
            return Err(StageError::permanent(
                "soffice not found (install libreoffice) and input is not a PDF",
            ));
        }

        let output = Command::new("soffice")
            .args(["--headless", "--convert-to", "pdf", "--outdir"])
            .arg(output_dir)
            .arg(input)
            .output();

        match output {
            Ok(output) if output.status.success() => {
                let stem = input
                    .file_stem()
                    .ok_or_else(|| StageError::permanent("input has no file name"))?;
                let converted = output_dir.join(stem).with_extension("pdf");
                if converted.exists() {
                    Ok(converted)
                } else {
                    Err(StageError::permanent(format!(
                        "soffice reported success but produced no output for {}",
                        input.display()
                    )))
                }
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(StageError::permanent(format!(
                    "soffice failed: {}",
                    stderr.trim()
                )))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ConversionService for ShellConverter {
    async fn convert(&self, input: &Path) -> Result<PathBuf, StageError> {
        if !input.exists() {
            return Err(StageError::permanent(format!(
                "input file missing: {}",
                input.display()
            )));
        }

        // PDFs are already in the processing format.
        if input.extension().and_then(|e| e.to_str()) == Some("pdf") {
            debug!(path = %input.display(), "input already PDF, passing through");
            return Ok(input.to_path_buf());
        }

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let input = input.to_path_buf();
        let output_dir = self.output_dir.clone();
        tokio::task::spawn_blocking(move || Self::convert_with_soffice(&output_dir, &input))
            .await
            .map_err(|e| StageError::transient(e))?
    }

    async fn rotate(&self, path: &Path, rotations: &[PageRotation]) -> Result<(), StageError> {
        if rotations.is_empty() {
            return Ok(());
        }
        if !check_binary("qpdf") {
            return Err(StageError::permanent("qpdf not found (install qpdf)"));
        }

        let path = path.to_path_buf();
        let rotations = rotations.to_vec();
        tokio::task::spawn_blocking(move || -> Result<(), StageError> {
            let mut cmd = Command::new("qpdf");
            // qpdf rotates in place with --replace-input; pages are 1-based.
            for rotation in &rotations {
                cmd.arg(format!("--rotate=+{}:{}", rotation.degrees, rotation.page + 1));
            }
            cmd.arg("--replace-input").arg(&path);

            let output = cmd.output()?;
            if output.status.success() {
                Ok(())
            } else {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(StageError::permanent(format!(
                    "qpdf rotate failed: {}",
                    stderr.trim()
                )))
            }
        })
        .await
        .map_err(|e| StageError::transient(e))?
    }
}
