//! Document ingestion: raw bytes in, queued document out.

use std::path::PathBuf;

use tracing::info;

use crate::models::Document;
use crate::repository::{DieselError, DocumentRepository};
use crate::storage::{content_storage_path, filename_parts};

/// Accepts raw content and creates pending documents.
pub struct IngestService {
    documents: DocumentRepository,
    documents_dir: PathBuf,
}

impl IngestService {
    pub fn new(documents: DocumentRepository, documents_dir: PathBuf) -> Self {
        Self {
            documents,
            documents_dir,
        }
    }

    /// Store raw bytes in the content-addressed store and enqueue a pending
    /// document. Returns the new document id.
    ///
    /// Identical content is accepted again on purpose: the dedup gate marks
    /// it as a duplicate during processing instead of rejecting it here.
    pub async fn enqueue(&self, content: &[u8], filename: &str) -> Result<String, DieselError> {
        let content_hash = Document::compute_hash(content);
        let mime_type = infer::get(content)
            .map(|kind| kind.mime_type().to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let (basename, extension) = filename_parts(filename, &mime_type);
        let raw_path =
            content_storage_path(&self.documents_dir, &content_hash, &basename, &extension);

        if let Some(parent) = raw_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&raw_path, content).await?;

        let doc = Document::new(
            uuid::Uuid::new_v4().to_string(),
            content,
            filename.to_string(),
            raw_path,
            mime_type,
        );
        self.documents.insert(&doc).await?;

        info!(
            document_id = %doc.id,
            size = doc.size_bytes,
            mime_type = %doc.mime_type,
            "ingested document"
        );
        Ok(doc.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentStatus;
    use crate::repository::test_pool;

    #[tokio::test]
    async fn test_enqueue_creates_pending_document() {
        let (dir, pool) = test_pool().await;
        let documents = DocumentRepository::new(pool);
        let ingest = IngestService::new(documents.clone(), dir.path().join("documents"));

        let id = ingest
            .enqueue(b"%PDF-1.4 test content", "invoice.pdf")
            .await
            .unwrap();

        let doc = documents.get(&id).await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Pending);
        assert_eq!(doc.original_name, "invoice.pdf");
        assert_eq!(doc.size_bytes, 21);
        assert!(doc.raw_path.exists());

        let on_disk = tokio::fs::read(&doc.raw_path).await.unwrap();
        assert_eq!(on_disk, b"%PDF-1.4 test content");
    }

    #[tokio::test]
    async fn test_identical_content_is_accepted_twice() {
        let (dir, pool) = test_pool().await;
        let documents = DocumentRepository::new(pool);
        let ingest = IngestService::new(documents.clone(), dir.path().join("documents"));

        let first = ingest.enqueue(b"same bytes", "a.txt").await.unwrap();
        let second = ingest.enqueue(b"same bytes", "b.txt").await.unwrap();
        assert_ne!(first, second);

        let a = documents.get(&first).await.unwrap().unwrap();
        let b = documents.get(&second).await.unwrap().unwrap();
        assert_eq!(a.content_hash, b.content_hash);
        // Neither is a duplicate yet; the gate decides during processing.
        assert!(!a.is_duplicate && !b.is_duplicate);
    }
}
