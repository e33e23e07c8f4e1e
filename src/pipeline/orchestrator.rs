//! Per-document stage sequencing and fan-out delivery.
//!
//! Every stage follows the same lifecycle: claim the ledger row, execute
//! under the retry policy, record the terminal outcome. The orchestrator
//! only ever observes terminal ledger states, never an escaped stage error.
//! Stage outputs are persisted before the ledger row completes, so a
//! crashed worker's successor re-reads everything it needs from the
//! document row.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info};

use crate::models::{Document, DocumentStatus, Stage, StepStatus};
use crate::pipeline::angle::page_rotations;
use crate::pipeline::error::{PipelineError, StageError};
use crate::pipeline::retry::RetryPolicy;
use crate::pipeline::StageOutcome;
use crate::repository::{ClaimOutcome, DocumentRepository, StepLedger};
use crate::services::{ConversionService, DestinationAdapter, MetadataService, OcrService};
use crate::split::{split, Chunk, DocumentCodec, SplitError};

/// How a claimed stage finished. Both variants land as `success` in the
/// ledger; the distinction is only surfaced to callers.
enum StageRun {
    Completed(Option<String>),
    Skipped(String),
}

/// A configured delivery destination.
#[derive(Clone)]
pub struct DestinationBinding {
    pub id: String,
    pub adapter: Arc<dyn DestinationAdapter>,
    /// When set, duplicates are not delivered to this destination.
    pub skip_duplicates: bool,
}

/// External collaborators injected into the orchestrator.
#[derive(Clone)]
pub struct Collaborators {
    pub converter: Arc<dyn ConversionService>,
    pub ocr: Arc<dyn OcrService>,
    pub metadata: Arc<dyn MetadataService>,
    pub codec: Arc<dyn DocumentCodec>,
}

/// Orchestrator tunables.
#[derive(Clone)]
pub struct OrchestratorConfig {
    pub retry: RetryPolicy,
    /// Delivery payloads above this size are split at page boundaries.
    /// Zero disables splitting.
    pub max_single_file_size: u64,
    /// Where split chunk files are written.
    pub chunk_dir: PathBuf,
}

/// Sequences stage executors per document and fans out delivery.
pub struct Orchestrator {
    documents: DocumentRepository,
    ledger: StepLedger,
    collaborators: Collaborators,
    destinations: Vec<DestinationBinding>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        documents: DocumentRepository,
        ledger: StepLedger,
        collaborators: Collaborators,
        destinations: Vec<DestinationBinding>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            documents,
            ledger,
            collaborators,
            destinations,
            config,
        }
    }

    pub fn ledger(&self) -> &StepLedger {
        &self.ledger
    }

    /// Drive one document through the pipeline to a terminal queue status.
    ///
    /// Returns `DocumentStatus::Processing` when another worker holds one of
    /// the document's stages; the work message will be redelivered.
    pub async fn process_document(
        &self,
        document_id: &str,
    ) -> Result<DocumentStatus, PipelineError> {
        let doc = self
            .documents
            .get(document_id)
            .await?
            .ok_or_else(|| PipelineError::DocumentNotFound(document_id.to_string()))?;

        if doc.status != DocumentStatus::Processing {
            self.documents
                .set_status(&doc.id, DocumentStatus::Processing)
                .await?;
        }

        // Convert: everything downstream depends on the processed artifact.
        let Some(convert) = self.stage_convert(&doc).await? else {
            return Ok(DocumentStatus::Processing);
        };
        if convert.is_failure() {
            return self.finish(&doc.id).await;
        }
        let doc = self.refresh(&doc.id).await?;

        // Dedup gate, before any content stage touches a collaborator.
        let Some(dedup) = self.stage_dedup(&doc).await? else {
            return Ok(DocumentStatus::Processing);
        };
        if dedup.is_failure() {
            return self.finish(&doc.id).await;
        }
        let doc = self.refresh(&doc.id).await?;

        if doc.is_duplicate {
            for stage in Stage::content_stages() {
                self.record_skipped(&doc.id, &stage, "skipped: duplicate")
                    .await?;
            }
            info!(
                document_id = %doc.id,
                duplicate_of = doc.duplicate_of_id.as_deref().unwrap_or(""),
                "short-circuited duplicate document"
            );
        } else {
            let Some(ocr) = self.stage_ocr(&doc).await? else {
                return Ok(DocumentStatus::Processing);
            };
            // OCR failure halts the stages that consume its output; delivery
            // of the converted artifact still proceeds.
            if !ocr.is_failure() {
                let doc = self.refresh(&doc.id).await?;
                let Some(_rotate) = self.stage_rotate(&doc).await? else {
                    return Ok(DocumentStatus::Processing);
                };
                let Some(extract) = self.stage_extract_metadata(&doc).await? else {
                    return Ok(DocumentStatus::Processing);
                };
                if !extract.is_failure() {
                    let doc = self.refresh(&doc.id).await?;
                    let Some(_embed) = self.stage_embed_metadata(&doc).await? else {
                        return Ok(DocumentStatus::Processing);
                    };
                }
            }
        }

        let doc = self.refresh(&doc.id).await?;
        self.deliver_all(&doc).await?;

        self.finish(&doc.id).await
    }

    /// All ledger rows for a document (the status surface exposed upward).
    pub async fn document_steps(
        &self,
        document_id: &str,
    ) -> Result<Vec<crate::models::ProcessingStep>, PipelineError> {
        Ok(self.ledger.steps_for_document(document_id).await?)
    }

    async fn refresh(&self, document_id: &str) -> Result<Document, PipelineError> {
        self.documents
            .get(document_id)
            .await?
            .ok_or_else(|| PipelineError::DocumentNotFound(document_id.to_string()))
    }

    /// Derive and persist the coarse terminal status from the ledger.
    ///
    /// Partial delivery failure is a valid terminal state; it surfaces as
    /// `Failed` at the queue level while the per-stage rows keep the detail.
    async fn finish(&self, document_id: &str) -> Result<DocumentStatus, PipelineError> {
        let steps = self.ledger.steps_for_document(document_id).await?;
        let any_failed = steps.iter().any(|s| s.status == StepStatus::Failure);
        let status = if any_failed {
            DocumentStatus::Failed
        } else {
            DocumentStatus::Processed
        };
        self.documents.set_status(document_id, status).await?;
        Ok(status)
    }

    /// Claim a stage, run `op` under the retry policy, record the outcome.
    ///
    /// Returns `None` when another worker holds the stage. A stage that
    /// already succeeded reports `Success` without re-executing.
    async fn execute_claimed<F, Fut>(
        &self,
        document_id: &str,
        stage: &Stage,
        op: F,
    ) -> Result<Option<StageOutcome>, PipelineError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<StageRun, StageError>>,
    {
        match self.ledger.claim(document_id, stage).await? {
            ClaimOutcome::AlreadyComplete(_) => {
                debug!(document_id, stage = %stage.name(), "stage already complete");
                Ok(Some(StageOutcome::Success))
            }
            ClaimOutcome::AlreadyClaimed => {
                debug!(document_id, stage = %stage.name(), "stage held by another worker");
                Ok(None)
            }
            ClaimOutcome::Claimed(_) => match self.config.retry.run(|| op()).await {
                Ok(StageRun::Completed(detail)) => {
                    self.ledger
                        .complete(document_id, stage, true, None, detail.as_deref())
                        .await?;
                    Ok(Some(StageOutcome::Success))
                }
                Ok(StageRun::Skipped(reason)) => {
                    self.ledger
                        .complete(document_id, stage, true, None, Some(&reason))
                        .await?;
                    Ok(Some(StageOutcome::Skipped(reason)))
                }
                Err(e) => {
                    let message = e.to_string();
                    self.ledger
                        .complete(document_id, stage, false, Some(&message), None)
                        .await?;
                    Ok(Some(StageOutcome::Failure(message)))
                }
            },
        }
    }

    /// Record a content stage as skipped (duplicate short-circuit), keeping
    /// the one-terminal-row-per-stage invariant.
    async fn record_skipped(
        &self,
        document_id: &str,
        stage: &Stage,
        reason: &str,
    ) -> Result<(), PipelineError> {
        if let ClaimOutcome::Claimed(_) = self.ledger.claim(document_id, stage).await? {
            self.ledger
                .complete(document_id, stage, true, None, Some(reason))
                .await?;
        }
        Ok(())
    }

    async fn stage_convert(&self, doc: &Document) -> Result<Option<StageOutcome>, PipelineError> {
        let converter = self.collaborators.converter.clone();
        let documents = self.documents.clone();
        let raw_path = doc.raw_path.clone();
        let doc_id = doc.id.clone();

        self.execute_claimed(&doc.id, &Stage::Convert, move || {
            let converter = converter.clone();
            let documents = documents.clone();
            let raw_path = raw_path.clone();
            let doc_id = doc_id.clone();
            async move {
                let processed = converter.convert(&raw_path).await?;
                documents
                    .set_processed_path(&doc_id, &processed.display().to_string())
                    .await?;
                Ok(StageRun::Completed(Some(format!(
                    "converted to {}",
                    processed.display()
                ))))
            }
        })
        .await
    }

    async fn stage_dedup(&self, doc: &Document) -> Result<Option<StageOutcome>, PipelineError> {
        let documents = self.documents.clone();
        let content_hash = doc.content_hash.clone();
        let doc_id = doc.id.clone();
        let created_at = doc.created_at.to_rfc3339();

        self.execute_claimed(&doc.id, &Stage::DedupCheck, move || {
            let documents = documents.clone();
            let content_hash = content_hash.clone();
            let doc_id = doc_id.clone();
            let created_at = created_at.clone();
            async move {
                match documents
                    .find_original_by_hash(&content_hash, &doc_id, &created_at)
                    .await?
                {
                    Some(original) => {
                        documents.mark_duplicate(&doc_id, &original.id).await?;
                        Ok(StageRun::Completed(Some(format!(
                            "duplicate of {}",
                            original.id
                        ))))
                    }
                    None => Ok(StageRun::Completed(None)),
                }
            }
        })
        .await
    }

    async fn stage_ocr(&self, doc: &Document) -> Result<Option<StageOutcome>, PipelineError> {
        let ocr = self.collaborators.ocr.clone();
        let documents = self.documents.clone();
        let processed = doc.processed_path.clone();
        let doc_id = doc.id.clone();

        self.execute_claimed(&doc.id, &Stage::Ocr, move || {
            let ocr = ocr.clone();
            let documents = documents.clone();
            let processed = processed.clone();
            let doc_id = doc_id.clone();
            async move {
                let path = processed
                    .ok_or_else(|| StageError::permanent("converted artifact missing"))?;
                let outcome = ocr.extract(&path).await?;
                documents
                    .set_ocr_results(
                        &doc_id,
                        &outcome.text,
                        &outcome.skew_angles,
                        outcome.quality_score,
                    )
                    .await?;
                Ok(StageRun::Completed(Some(format!(
                    "extracted {} chars over {} pages",
                    outcome.text.len(),
                    outcome.skew_angles.len()
                ))))
            }
        })
        .await
    }

    async fn stage_rotate(&self, doc: &Document) -> Result<Option<StageOutcome>, PipelineError> {
        let converter = self.collaborators.converter.clone();
        let processed = doc.processed_path.clone();
        let skew = doc.skew_angles.clone().unwrap_or_default();

        self.execute_claimed(&doc.id, &Stage::Rotate, move || {
            let converter = converter.clone();
            let processed = processed.clone();
            let skew = skew.clone();
            async move {
                let path = processed
                    .ok_or_else(|| StageError::permanent("converted artifact missing"))?;
                let rotations = page_rotations(&skew);
                if rotations.is_empty() {
                    return Ok(StageRun::Completed(Some("no rotation needed".to_string())));
                }
                converter.rotate(&path, &rotations).await?;
                Ok(StageRun::Completed(Some(format!(
                    "rotated {} pages",
                    rotations.len()
                ))))
            }
        })
        .await
    }

    async fn stage_extract_metadata(
        &self,
        doc: &Document,
    ) -> Result<Option<StageOutcome>, PipelineError> {
        let metadata = self.collaborators.metadata.clone();
        let documents = self.documents.clone();
        let text = doc.extracted_text.clone();
        let doc_id = doc.id.clone();

        self.execute_claimed(&doc.id, &Stage::ExtractMetadata, move || {
            let metadata = metadata.clone();
            let documents = documents.clone();
            let text = text.clone();
            let doc_id = doc_id.clone();
            async move {
                let text = text.ok_or_else(|| StageError::permanent("no extracted text"))?;
                let extracted = metadata.extract(&text).await?;
                documents.set_extracted_metadata(&doc_id, &extracted).await?;
                Ok(StageRun::Completed(None))
            }
        })
        .await
    }

    async fn stage_embed_metadata(
        &self,
        doc: &Document,
    ) -> Result<Option<StageOutcome>, PipelineError> {
        let metadata = self.collaborators.metadata.clone();
        let processed = doc.processed_path.clone();
        let extracted = doc.extracted_metadata.clone();

        self.execute_claimed(&doc.id, &Stage::EmbedMetadata, move || {
            let metadata = metadata.clone();
            let processed = processed.clone();
            let extracted = extracted.clone();
            async move {
                let path = processed
                    .ok_or_else(|| StageError::permanent("converted artifact missing"))?;
                let extracted =
                    extracted.ok_or_else(|| StageError::permanent("no extracted metadata"))?;
                metadata.embed(&path, &extracted).await?;
                Ok(StageRun::Completed(None))
            }
        })
        .await
    }

    /// Dispatch one delivery attempt per destination, concurrently. Each
    /// attempt owns its ledger row and completes independently: partial
    /// failure never rolls back or retries a sibling.
    async fn deliver_all(
        &self,
        doc: &Document,
    ) -> Result<Vec<(String, StageOutcome)>, PipelineError> {
        if self.destinations.is_empty() {
            return Ok(Vec::new());
        }

        let source = doc
            .processed_path
            .clone()
            .unwrap_or_else(|| doc.raw_path.clone());
        let payloads = self
            .prepare_payloads(doc, &source)
            .await
            .map_err(|e| e.to_string());

        let attempts = self
            .destinations
            .iter()
            .map(|dest| self.deliver_one(doc, dest, &payloads));
        let results = join_all(attempts).await;

        let mut outcomes = Vec::new();
        for result in results {
            if let (id, Some(outcome)) = result? {
                outcomes.push((id, outcome));
            }
        }
        Ok(outcomes)
    }

    async fn deliver_one(
        &self,
        doc: &Document,
        dest: &DestinationBinding,
        payloads: &Result<Vec<PathBuf>, String>,
    ) -> Result<(String, Option<StageOutcome>), PipelineError> {
        let stage = Stage::Deliver(dest.id.clone());
        let skip_duplicate = doc.is_duplicate && dest.skip_duplicates;

        let adapter = dest.adapter.clone();
        let metadata = doc
            .extracted_metadata
            .clone()
            .unwrap_or_else(|| serde_json::json!({}));
        let payloads = payloads.clone();

        let outcome = self
            .execute_claimed(&doc.id, &stage, move || {
                let adapter = adapter.clone();
                let metadata = metadata.clone();
                let payloads = payloads.clone();
                async move {
                    if skip_duplicate {
                        return Ok(StageRun::Skipped("skipped: duplicate".to_string()));
                    }
                    let payloads =
                        payloads.map_err(|reason| StageError::permanent(reason))?;
                    let mut remote_paths = Vec::new();
                    for path in &payloads {
                        let delivery = adapter.deliver(path, &metadata).await?;
                        remote_paths.push(delivery.remote_path);
                    }
                    let detail = match remote_paths.as_slice() {
                        [single] => format!("delivered to {single}"),
                        many => format!("delivered {} chunks", many.len()),
                    };
                    Ok(StageRun::Completed(Some(detail)))
                }
            })
            .await?;

        Ok((dest.id.clone(), outcome))
    }

    /// Resolve the file set to deliver: the artifact itself, or its
    /// page-boundary chunks when it exceeds the size budget.
    async fn prepare_payloads(
        &self,
        doc: &Document,
        source: &Path,
    ) -> Result<Vec<PathBuf>, StageError> {
        let size = tokio::fs::metadata(source).await?.len();
        if self.config.max_single_file_size == 0 || size <= self.config.max_single_file_size {
            return Ok(vec![source.to_path_buf()]);
        }

        let codec = self.collaborators.codec.clone();
        let source_path = source.to_path_buf();
        let max_bytes = self.config.max_single_file_size;
        let chunks: Vec<Chunk> = tokio::task::spawn_blocking(
            move || -> Result<Vec<Chunk>, SplitError> {
                let pages = codec.open(&source_path)?;
                split(pages.as_ref(), max_bytes)
            },
        )
        .await
        .map_err(|e| StageError::transient(e))??;

        let chunk_dir = self.config.chunk_dir.join(&doc.id);
        tokio::fs::create_dir_all(&chunk_dir).await?;

        let extension = source
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin")
            .to_string();
        let mut paths = Vec::with_capacity(chunks.len());
        for (index, chunk) in chunks.iter().enumerate() {
            let path = chunk_dir.join(format!("part-{:03}.{}", index + 1, extension));
            tokio::fs::write(&path, &chunk.bytes).await?;
            paths.push(path);
        }

        info!(
            document_id = %doc.id,
            chunks = paths.len(),
            size,
            max_bytes,
            "split oversized delivery payload"
        );
        Ok(paths)
    }
}
