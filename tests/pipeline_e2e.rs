//! End-to-end pipeline scenario: an oversized paginated document is
//! ingested, processed once, split at page boundaries, and fanned out to
//! two destinations with independent ledger rows.

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use docrelay::models::{DocumentStatus, StepStatus};
use docrelay::pipeline::{
    Collaborators, DestinationBinding, Orchestrator, OrchestratorConfig, RetryPolicy, StageError,
};
use docrelay::repository::{run_migrations, DbPool, DocumentRepository, StepLedger};
use docrelay::services::{
    Delivery, DestinationAdapter, DirectoryDestination, IngestService, MetadataService,
    OcrOutcome, OcrService,
};
use docrelay::split::{DocumentCodec, PageSource, SplitError};

// -- A minimal paginated container format for exercising the splitter --
//
// Layout: 4-byte magic, little-endian u32 page count, then per page a
// little-endian u32 length prefix and the page bytes.

const MAGIC: &[u8; 4] = b"PGDC";

fn encode_pages(pages: &[Vec<u8>]) -> Vec<u8> {
    let mut out = MAGIC.to_vec();
    out.extend_from_slice(&(pages.len() as u32).to_le_bytes());
    for page in pages {
        out.extend_from_slice(&(page.len() as u32).to_le_bytes());
        out.extend_from_slice(page);
    }
    out
}

fn decode_pages(bytes: &[u8]) -> Result<Vec<Vec<u8>>, SplitError> {
    if bytes.len() < 8 || &bytes[..4] != MAGIC {
        return Err(SplitError::CorruptInput("bad magic".to_string()));
    }
    let count = u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;
    let mut pages = Vec::with_capacity(count);
    let mut offset = 8;
    for _ in 0..count {
        if bytes.len() < offset + 4 {
            return Err(SplitError::CorruptInput("truncated page header".to_string()));
        }
        let len = u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap()) as usize;
        offset += 4;
        if bytes.len() < offset + len {
            return Err(SplitError::CorruptInput("truncated page body".to_string()));
        }
        pages.push(bytes[offset..offset + len].to_vec());
        offset += len;
    }
    Ok(pages)
}

struct PagedFile {
    pages: Vec<Vec<u8>>,
}

impl PageSource for PagedFile {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn serialize_range(&self, range: Range<usize>) -> Result<Vec<u8>, SplitError> {
        Ok(encode_pages(&self.pages[range]))
    }
}

struct PagedCodec;

impl DocumentCodec for PagedCodec {
    fn open(&self, path: &Path) -> Result<Box<dyn PageSource + Send>, SplitError> {
        let bytes = std::fs::read(path)?;
        Ok(Box::new(PagedFile {
            pages: decode_pages(&bytes)?,
        }))
    }
}

// -- Mock collaborators with call counting --

struct PassthroughConverter;

#[async_trait]
impl docrelay::services::ConversionService for PassthroughConverter {
    async fn convert(&self, input: &Path) -> Result<PathBuf, StageError> {
        Ok(input.to_path_buf())
    }

    async fn rotate(
        &self,
        _path: &Path,
        _rotations: &[docrelay::pipeline::angle::PageRotation],
    ) -> Result<(), StageError> {
        Ok(())
    }
}

struct CountingOcr {
    calls: AtomicUsize,
}

#[async_trait]
impl OcrService for CountingOcr {
    async fn extract(&self, _path: &Path) -> Result<OcrOutcome, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(OcrOutcome {
            text: "Annual Filing 2024-02-29\nTwenty pages of scanned text.".to_string(),
            skew_angles: vec![0.0; 20],
            quality_score: Some(0.8),
        })
    }
}

struct CountingMetadata {
    extract_calls: AtomicUsize,
}

#[async_trait]
impl MetadataService for CountingMetadata {
    async fn extract(&self, _text: &str) -> Result<serde_json::Value, StageError> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        Ok(serde_json::json!({"title": "Annual Filing"}))
    }

    async fn embed(&self, _path: &Path, _metadata: &serde_json::Value) -> Result<(), StageError> {
        Ok(())
    }
}

struct FlakyDestination {
    attempts: AtomicUsize,
    /// Attempts that fail transiently before deliveries start succeeding.
    transient_failures: usize,
}

#[async_trait]
impl DestinationAdapter for FlakyDestination {
    async fn deliver(
        &self,
        path: &Path,
        _metadata: &serde_json::Value,
    ) -> Result<Delivery, StageError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.transient_failures {
            return Err(StageError::transient("destination briefly unavailable"));
        }
        Ok(Delivery {
            remote_path: format!("flaky://{}", path.display()),
        })
    }
}

#[tokio::test]
async fn test_oversized_document_end_to_end() {
    const PAGE_COUNT: usize = 20;
    const PAGE_SIZE: usize = 2_500_000; // ~50 MB document total
    const MAX_SINGLE_FILE: u64 = 10_000_000; // 10 MB delivery budget

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("docrelay.db");
    run_migrations(&db_path.display().to_string())
        .await
        .unwrap();
    let pool = DbPool::sqlite_from_path(&db_path);

    let documents = DocumentRepository::new(pool.clone());
    let ledger = StepLedger::new(pool);

    let ocr = Arc::new(CountingOcr {
        calls: AtomicUsize::new(0),
    });
    let metadata = Arc::new(CountingMetadata {
        extract_calls: AtomicUsize::new(0),
    });

    let archive_dir = dir.path().join("dest-archive");
    let flaky = Arc::new(FlakyDestination {
        attempts: AtomicUsize::new(0),
        transient_failures: 1,
    });

    let orchestrator = Orchestrator::new(
        documents.clone(),
        ledger.clone(),
        Collaborators {
            converter: Arc::new(PassthroughConverter),
            ocr: ocr.clone(),
            metadata: metadata.clone(),
            codec: Arc::new(PagedCodec),
        },
        vec![
            DestinationBinding {
                id: "archive".to_string(),
                adapter: Arc::new(DirectoryDestination::new(archive_dir.clone())),
                skip_duplicates: false,
            },
            DestinationBinding {
                id: "offsite".to_string(),
                adapter: flaky.clone(),
                skip_duplicates: false,
            },
        ],
        OrchestratorConfig {
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(4),
            },
            max_single_file_size: MAX_SINGLE_FILE,
            chunk_dir: dir.path().join("chunks"),
        },
    );

    // Ingest a 20-page, ~50 MB paginated document.
    let pages: Vec<Vec<u8>> = (0..PAGE_COUNT)
        .map(|i| vec![(i % 251) as u8; PAGE_SIZE])
        .collect();
    let content = encode_pages(&pages);
    assert!(content.len() > 49_000_000);

    let ingest = IngestService::new(documents.clone(), dir.path().join("documents"));
    let id = ingest.enqueue(&content, "annual-filing.pgdc").await.unwrap();

    let status = orchestrator.process_document(&id).await.unwrap();
    assert_eq!(status, DocumentStatus::Processed);

    // OCR and metadata ran once for the document, not once per chunk.
    assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);
    assert_eq!(metadata.extract_calls.load(Ordering::SeqCst), 1);

    // Both destinations reached an independent terminal ledger row.
    let steps = ledger.steps_for_document(&id).await.unwrap();
    let archive = steps.iter().find(|s| s.stage == "deliver:archive").unwrap();
    let offsite = steps.iter().find(|s| s.stage == "deliver:offsite").unwrap();
    assert_eq!(archive.status, StepStatus::Success);
    assert_eq!(offsite.status, StepStatus::Success);

    // The splitter produced at least 3 chunks, each within budget and each
    // independently re-parseable; together they conserve the page sequence.
    let mut chunk_files: Vec<PathBuf> = std::fs::read_dir(archive_dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("pgdc"))
        .collect();
    chunk_files.sort();
    assert!(
        chunk_files.len() >= 3,
        "expected >= 3 chunks, got {}",
        chunk_files.len()
    );

    let mut reassembled = Vec::new();
    for file in &chunk_files {
        let bytes = std::fs::read(file).unwrap();
        assert!(bytes.len() as u64 <= MAX_SINGLE_FILE);
        reassembled.extend(decode_pages(&bytes).unwrap());
    }
    assert_eq!(reassembled.len(), PAGE_COUNT);
    assert_eq!(reassembled, pages);

    // The transient offsite hiccup was retried inside the delivery stage:
    // one failed attempt plus one full redelivery of every chunk.
    assert_eq!(
        flaky.attempts.load(Ordering::SeqCst),
        1 + chunk_files.len()
    );
}

#[tokio::test]
async fn test_corrupt_oversized_document_fails_delivery() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("docrelay.db");
    run_migrations(&db_path.display().to_string())
        .await
        .unwrap();
    let pool = DbPool::sqlite_from_path(&db_path);

    let documents = DocumentRepository::new(pool.clone());
    let ledger = StepLedger::new(pool);

    let orchestrator = Orchestrator::new(
        documents.clone(),
        ledger.clone(),
        Collaborators {
            converter: Arc::new(PassthroughConverter),
            ocr: Arc::new(CountingOcr {
                calls: AtomicUsize::new(0),
            }),
            metadata: Arc::new(CountingMetadata {
                extract_calls: AtomicUsize::new(0),
            }),
            codec: Arc::new(PagedCodec),
        },
        vec![DestinationBinding {
            id: "archive".to_string(),
            adapter: Arc::new(DirectoryDestination::new(dir.path().join("dest"))),
            skip_duplicates: false,
        }],
        OrchestratorConfig {
            retry: RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
            max_single_file_size: 1_000,
            chunk_dir: dir.path().join("chunks"),
        },
    );

    // Over budget but not a valid paginated container.
    let content = vec![0u8; 5_000];
    let ingest = IngestService::new(documents.clone(), dir.path().join("documents"));
    let id = ingest.enqueue(&content, "broken.pgdc").await.unwrap();

    let status = orchestrator.process_document(&id).await.unwrap();
    assert_eq!(status, DocumentStatus::Failed);

    let step = ledger.get(&id, "deliver:archive").await.unwrap().unwrap();
    assert_eq!(step.status, StepStatus::Failure);
    assert!(step
        .error_message
        .as_deref()
        .unwrap()
        .contains("corrupt input"));
}
