//! PDF page access backed by the qpdf command-line tool.
//!
//! qpdf handles page counting and page-range extraction; both operations
//! run through `std::process::Command` inside `spawn_blocking`-free sync
//! call sites (the splitter itself is synchronous and the orchestrator
//! wraps it in a blocking task).

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::process::Command;

use super::{DocumentCodec, PageSource, SplitError};

/// Check whether a binary is available in PATH.
fn check_binary(name: &str) -> bool {
    which::which(name).is_ok()
}

/// `DocumentCodec` for PDFs, shelling out to qpdf.
#[derive(Debug, Default, Clone)]
pub struct QpdfCodec;

impl QpdfCodec {
    pub fn new() -> Self {
        Self
    }

    pub fn is_available(&self) -> bool {
        check_binary("qpdf")
    }
}

impl DocumentCodec for QpdfCodec {
    fn open(&self, path: &Path) -> Result<Box<dyn PageSource + Send>, SplitError> {
        if !self.is_available() {
            return Err(SplitError::CodecUnavailable(
                "qpdf not found (install qpdf)".to_string(),
            ));
        }
        if !path.exists() {
            return Err(SplitError::CorruptInput(format!(
                "no such file: {}",
                path.display()
            )));
        }

        let output = Command::new("qpdf")
            .arg("--show-npages")
            .arg(path)
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SplitError::CorruptInput(format!(
                "qpdf could not read {}: {}",
                path.display(),
                stderr.trim()
            )));
        }

        let page_count = String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse::<usize>()
            .map_err(|e| SplitError::CorruptInput(format!("unexpected qpdf output: {e}")))?;

        Ok(Box::new(QpdfPages {
            path: path.to_path_buf(),
            page_count,
        }))
    }
}

/// An open PDF with a known page count.
struct QpdfPages {
    path: PathBuf,
    page_count: usize,
}

impl PageSource for QpdfPages {
    fn page_count(&self) -> usize {
        self.page_count
    }

    fn serialize_range(&self, range: Range<usize>) -> Result<Vec<u8>, SplitError> {
        // qpdf page ranges are 1-based and inclusive.
        let page_range = format!("{}-{}", range.start + 1, range.end);
        let out = tempfile::Builder::new()
            .suffix(".pdf")
            .tempfile()?
            .into_temp_path();

        let output = Command::new("qpdf")
            .arg("--empty")
            .arg("--pages")
            .arg(&self.path)
            .arg(&page_range)
            .arg("--")
            .arg(&out)
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SplitError::CorruptInput(format!(
                "qpdf failed extracting pages {page_range}: {}",
                stderr.trim()
            )));
        }

        Ok(std::fs::read(&out)?)
    }
}
