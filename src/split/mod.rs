//! Size-bounded, page-safe document splitting.
//!
//! Paginated binaries must never be cut mid-page: byte-level splitting
//! produces corrupt output. The splitter works against the `PageSource`
//! abstraction and serializes candidate chunks to measure their real
//! encoded size, so the page-boundary invariant holds for any format a
//! `DocumentCodec` plugs in.

pub mod qpdf;

pub use qpdf::QpdfCodec;

use std::ops::Range;
use std::path::Path;

use thiserror::Error;
use tracing::warn;

/// Splitting failures.
#[derive(Debug, Error)]
pub enum SplitError {
    /// Input is not a structurally valid paginated document.
    #[error("corrupt input: {0}")]
    CorruptInput(String),
    /// The codec backend is unavailable (missing binary, unsupported format).
    #[error("codec unavailable: {0}")]
    CodecUnavailable(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// An open paginated document: page count plus range serialization.
pub trait PageSource {
    fn page_count(&self) -> usize;

    /// Serialize the given contiguous page range as a standalone document.
    fn serialize_range(&self, range: Range<usize>) -> Result<Vec<u8>, SplitError>;
}

/// A binary format's entry point for the splitter.
pub trait DocumentCodec: Send + Sync {
    /// Open and validate a paginated document.
    fn open(&self, path: &Path) -> Result<Box<dyn PageSource + Send>, SplitError>;
}

/// One output chunk: a contiguous page range and its serialized bytes.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Zero-based page range of the original document.
    pub pages: Range<usize>,
    pub bytes: Vec<u8>,
}

/// Split a document into chunks of at most `max_bytes` each, never cutting
/// mid-page.
///
/// Pages accumulate into the current chunk; after each addition the chunk is
/// serialized and measured. When the measurement overflows the budget and
/// the chunk holds more than one page, the previous serialization is emitted
/// and the overflowing page starts the next chunk. A single page larger than
/// the budget is emitted as its own chunk with a logged warning rather than
/// dropped. The concatenation of all chunk page ranges equals the original
/// page sequence exactly.
pub fn split(source: &dyn PageSource, max_bytes: u64) -> Result<Vec<Chunk>, SplitError> {
    let page_count = source.page_count();
    let mut chunks = Vec::new();
    if page_count == 0 {
        return Ok(chunks);
    }

    let mut start = 0usize;
    let mut last_fit: Option<Vec<u8>> = None;

    let mut page = 0usize;
    while page < page_count {
        let candidate = source.serialize_range(start..page + 1)?;

        if candidate.len() as u64 <= max_bytes {
            last_fit = Some(candidate);
            page += 1;
            continue;
        }

        if page == start {
            // A single page over budget: emit it as-is rather than drop it.
            warn!(
                page,
                size = candidate.len(),
                max_bytes,
                "single page exceeds size budget, emitting oversized chunk"
            );
            chunks.push(Chunk {
                pages: start..page + 1,
                bytes: candidate,
            });
            start = page + 1;
            last_fit = None;
            page += 1;
        } else {
            // Back out the overflowing page and emit what fit.
            let bytes = match last_fit.take() {
                Some(bytes) => bytes,
                None => source.serialize_range(start..page)?,
            };
            chunks.push(Chunk {
                pages: start..page,
                bytes,
            });
            start = page;
        }
    }

    if start < page_count {
        let bytes = match last_fit {
            Some(bytes) => bytes,
            None => source.serialize_range(start..page_count)?,
        };
        chunks.push(Chunk {
            pages: start..page_count,
            bytes,
        });
    }

    Ok(chunks)
}
