//! Document repository: persistence for the document lifecycle.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::models::{DocumentRecord, NewDocument};
use super::pool::{DbPool, DieselError};
use super::{parse_datetime, parse_datetime_opt};
use crate::models::{Document, DocumentStatus};
use crate::schema::documents;
use crate::with_conn;

/// Repository for documents.
#[derive(Clone)]
pub struct DocumentRepository {
    pub(crate) pool: DbPool,
}

impl DocumentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert a freshly ingested document.
    pub async fn insert(&self, doc: &Document) -> Result<(), DieselError> {
        let created_at = doc.created_at.to_rfc3339();
        let updated_at = doc.updated_at.to_rfc3339();
        let raw_path = doc.raw_path.display().to_string();
        let processed_path = doc.processed_path.as_ref().map(|p| p.display().to_string());
        let metadata = doc
            .extracted_metadata
            .as_ref()
            .map(|m| serde_json::to_string(m).unwrap_or_default());
        let skew = doc
            .skew_angles
            .as_ref()
            .map(|a| serde_json::to_string(a).unwrap_or_default());

        let record = NewDocument {
            id: &doc.id,
            content_hash: &doc.content_hash,
            original_name: &doc.original_name,
            raw_path: &raw_path,
            processed_path: processed_path.as_deref(),
            mime_type: &doc.mime_type,
            size_bytes: doc.size_bytes,
            is_duplicate: doc.is_duplicate as i32,
            duplicate_of_id: doc.duplicate_of_id.as_deref(),
            extracted_text: doc.extracted_text.as_deref(),
            extracted_metadata: metadata.as_deref(),
            skew_angles: skew.as_deref(),
            quality_score: doc.quality_score,
            status: doc.status.as_str(),
            created_at: &created_at,
            updated_at: &updated_at,
        };

        with_conn!(self.pool, conn, {
            diesel::insert_into(documents::table)
                .values(&record)
                .execute(&mut conn)
                .await?;
            Ok(())
        })
    }

    /// Fetch a document by id.
    pub async fn get(&self, id: &str) -> Result<Option<Document>, DieselError> {
        let record: Option<DocumentRecord> = with_conn!(self.pool, conn, {
            documents::table
                .filter(documents::id.eq(id))
                .first(&mut conn)
                .await
                .optional()
        })?;

        Ok(record.map(record_to_document))
    }

    /// Find the earliest non-duplicate document with the given content hash
    /// that was ingested before the given document.
    ///
    /// This is the dedup gate's lookup: the returned document is always a
    /// valid `duplicate_of_id` target (never itself a duplicate), and the
    /// strict (created_at, id) ordering means two copies can never end up
    /// pointing at each other, whatever order workers process them in.
    pub async fn find_original_by_hash(
        &self,
        content_hash: &str,
        newer_than_id: &str,
        newer_than_created: &str,
    ) -> Result<Option<Document>, DieselError> {
        let record: Option<DocumentRecord> = with_conn!(self.pool, conn, {
            documents::table
                .filter(documents::content_hash.eq(content_hash))
                .filter(documents::is_duplicate.eq(0))
                .filter(
                    documents::created_at.lt(newer_than_created).or(documents::created_at
                        .eq(newer_than_created)
                        .and(documents::id.lt(newer_than_id))),
                )
                .order((documents::created_at.asc(), documents::id.asc()))
                .first(&mut conn)
                .await
                .optional()
        })?;

        Ok(record.map(record_to_document))
    }

    /// Mark a document as a duplicate of an earlier one.
    pub async fn mark_duplicate(&self, id: &str, duplicate_of: &str) -> Result<(), DieselError> {
        let now = Utc::now().to_rfc3339();
        with_conn!(self.pool, conn, {
            diesel::update(documents::table.filter(documents::id.eq(id)))
                .set((
                    documents::is_duplicate.eq(1),
                    documents::duplicate_of_id.eq(duplicate_of),
                    documents::updated_at.eq(&now),
                ))
                .execute(&mut conn)
                .await?;
            Ok(())
        })
    }

    /// Record the converted artifact path (written by the convert stage).
    pub async fn set_processed_path(&self, id: &str, path: &str) -> Result<(), DieselError> {
        let now = Utc::now().to_rfc3339();
        with_conn!(self.pool, conn, {
            diesel::update(documents::table.filter(documents::id.eq(id)))
                .set((
                    documents::processed_path.eq(path),
                    documents::updated_at.eq(&now),
                ))
                .execute(&mut conn)
                .await?;
            Ok(())
        })
    }

    /// Record OCR output (written by the OCR stage).
    pub async fn set_ocr_results(
        &self,
        id: &str,
        text: &str,
        skew_angles: &[f64],
        quality_score: Option<f32>,
    ) -> Result<(), DieselError> {
        let now = Utc::now().to_rfc3339();
        let skew = serde_json::to_string(skew_angles).unwrap_or_default();
        with_conn!(self.pool, conn, {
            diesel::update(documents::table.filter(documents::id.eq(id)))
                .set((
                    documents::extracted_text.eq(text),
                    documents::skew_angles.eq(&skew),
                    documents::quality_score.eq(quality_score),
                    documents::updated_at.eq(&now),
                ))
                .execute(&mut conn)
                .await?;
            Ok(())
        })
    }

    /// Record structured metadata (written by the extract-metadata stage).
    pub async fn set_extracted_metadata(
        &self,
        id: &str,
        metadata: &serde_json::Value,
    ) -> Result<(), DieselError> {
        let now = Utc::now().to_rfc3339();
        let json = serde_json::to_string(metadata).unwrap_or_default();
        with_conn!(self.pool, conn, {
            diesel::update(documents::table.filter(documents::id.eq(id)))
                .set((
                    documents::extracted_metadata.eq(&json),
                    documents::updated_at.eq(&now),
                ))
                .execute(&mut conn)
                .await?;
            Ok(())
        })
    }

    /// Set the coarse queue status.
    pub async fn set_status(&self, id: &str, status: DocumentStatus) -> Result<(), DieselError> {
        let now = Utc::now().to_rfc3339();
        with_conn!(self.pool, conn, {
            diesel::update(documents::table.filter(documents::id.eq(id)))
                .set((
                    documents::status.eq(status.as_str()),
                    documents::updated_at.eq(&now),
                ))
                .execute(&mut conn)
                .await?;
            Ok(())
        })
    }

    /// Atomically claim up to `limit` pending documents for processing.
    ///
    /// Each claim is a guarded update (`status = 'pending'` in the WHERE
    /// clause), so concurrent workers never claim the same document.
    pub async fn claim_pending(&self, limit: usize) -> Result<Vec<Document>, DieselError> {
        let candidates: Vec<DocumentRecord> = with_conn!(self.pool, conn, {
            documents::table
                .filter(documents::status.eq(DocumentStatus::Pending.as_str()))
                .order(documents::created_at.asc())
                .limit(limit as i64)
                .load(&mut conn)
                .await
        })?;

        let now = Utc::now().to_rfc3339();
        let mut claimed = Vec::new();
        for record in candidates {
            let updated: usize = with_conn!(self.pool, conn, {
                diesel::update(
                    documents::table
                        .filter(documents::id.eq(&record.id))
                        .filter(documents::status.eq(DocumentStatus::Pending.as_str())),
                )
                .set((
                    documents::status.eq(DocumentStatus::Processing.as_str()),
                    documents::updated_at.eq(&now),
                ))
                .execute(&mut conn)
                .await
            })?;

            if updated == 1 {
                let mut doc = record_to_document(record);
                doc.status = DocumentStatus::Processing;
                claimed.push(doc);
            }
        }

        Ok(claimed)
    }

    /// Requeue documents stuck `processing` with no writes for `timeout`.
    ///
    /// Complements the step watchdog at the queue level: a crashed worker
    /// leaves the document row `processing` forever, and `claim_pending`
    /// would never see it again. Stage claims keep redelivery idempotent.
    pub async fn requeue_stale_processing(
        &self,
        timeout: std::time::Duration,
    ) -> Result<usize, DieselError> {
        let now = Utc::now();
        let cutoff =
            (now - chrono::Duration::from_std(timeout).unwrap_or_default()).to_rfc3339();
        let now = now.to_rfc3339();
        with_conn!(self.pool, conn, {
            diesel::update(
                documents::table
                    .filter(documents::status.eq(DocumentStatus::Processing.as_str()))
                    .filter(documents::updated_at.lt(&cutoff)),
            )
            .set((
                documents::status.eq(DocumentStatus::Pending.as_str()),
                documents::updated_at.eq(&now),
            ))
            .execute(&mut conn)
            .await
        })
    }

    /// Move previously failed documents back to the pending queue.
    pub async fn requeue_failed(&self) -> Result<usize, DieselError> {
        let now = Utc::now().to_rfc3339();
        with_conn!(self.pool, conn, {
            diesel::update(
                documents::table.filter(documents::status.eq(DocumentStatus::Failed.as_str())),
            )
            .set((
                documents::status.eq(DocumentStatus::Pending.as_str()),
                documents::updated_at.eq(&now),
            ))
            .execute(&mut conn)
            .await
        })
    }

    /// Count documents with the given status.
    pub async fn count_by_status(&self, status: DocumentStatus) -> Result<u64, DieselError> {
        use diesel::dsl::count_star;
        with_conn!(self.pool, conn, {
            let count: i64 = documents::table
                .filter(documents::status.eq(status.as_str()))
                .select(count_star())
                .first(&mut conn)
                .await?;
            Ok(count as u64)
        })
    }
}

/// Convert a database record to the domain type.
pub(crate) fn record_to_document(r: DocumentRecord) -> Document {
    Document {
        id: r.id,
        content_hash: r.content_hash,
        original_name: r.original_name,
        raw_path: r.raw_path.into(),
        processed_path: r.processed_path.map(Into::into),
        mime_type: r.mime_type,
        size_bytes: r.size_bytes,
        is_duplicate: r.is_duplicate != 0,
        duplicate_of_id: r.duplicate_of_id,
        extracted_text: r.extracted_text,
        extracted_metadata: r
            .extracted_metadata
            .and_then(|s| serde_json::from_str(&s).ok()),
        skew_angles: r.skew_angles.and_then(|s| serde_json::from_str(&s).ok()),
        quality_score: r.quality_score,
        status: DocumentStatus::from_str(&r.status).unwrap_or(DocumentStatus::Pending),
        created_at: parse_datetime(&r.created_at),
        updated_at: parse_datetime_opt(Some(r.updated_at)).unwrap_or_else(Utc::now),
    }
}
