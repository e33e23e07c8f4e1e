//! Step ledger: the durable per-(document, stage) state machine.
//!
//! All cross-worker coordination is expressed through `claim`/`complete`
//! atomicity. Claims are guarded single-statement updates checked by
//! affected-row count, so exactly one concurrent caller observes the
//! transition out of a claimable state.

use chrono::{Duration as ChronoDuration, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use std::time::Duration;
use tracing::warn;

use super::models::{NewProcessingStep, ProcessingStepRecord};
use super::pool::{DbPool, DieselError};
use super::parse_datetime_opt;
use crate::models::{ProcessingStep, Stage, StepStatus};
use crate::schema::processing_steps;
use crate::with_conn;

/// Result of a claim attempt.
#[derive(Debug)]
pub enum ClaimOutcome {
    /// This caller owns the stage execution.
    Claimed(ProcessingStep),
    /// Another worker holds the stage; do not execute.
    AlreadyClaimed,
    /// The stage already succeeded; skip re-execution (idempotent redelivery).
    AlreadyComplete(ProcessingStep),
}

/// Repository for processing steps.
#[derive(Clone)]
pub struct StepLedger {
    pool: DbPool,
}

impl StepLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Atomically claim a (document, stage) pair for execution.
    ///
    /// Creates the row if absent. Rows in `pending` or `failure` transition
    /// to `in_progress` with `started_at = now`; a row already `in_progress`
    /// yields `AlreadyClaimed`, and a `success` row yields `AlreadyComplete`
    /// so redelivered work never re-runs a finished stage.
    pub async fn claim(
        &self,
        document_id: &str,
        stage: &Stage,
    ) -> Result<ClaimOutcome, DieselError> {
        let stage_name = stage.name();
        let now = Utc::now().to_rfc3339();

        // Ensure the row exists; a concurrent insert is fine.
        let new_step = NewProcessingStep {
            document_id,
            stage: &stage_name,
            status: StepStatus::Pending.as_str(),
            started_at: None,
            completed_at: None,
            error_message: None,
            detail: None,
        };
        with_conn!(self.pool, conn, {
            diesel::insert_into(processing_steps::table)
                .values(&new_step)
                .on_conflict_do_nothing()
                .execute(&mut conn)
                .await?;
            Ok::<(), DieselError>(())
        })?;

        // Guarded transition: only one caller sees affected == 1.
        let claimable = [StepStatus::Pending.as_str(), StepStatus::Failure.as_str()];
        let updated: usize = with_conn!(self.pool, conn, {
            diesel::update(
                processing_steps::table
                    .filter(processing_steps::document_id.eq(document_id))
                    .filter(processing_steps::stage.eq(&stage_name))
                    .filter(processing_steps::status.eq_any(claimable)),
            )
            .set((
                processing_steps::status.eq(StepStatus::InProgress.as_str()),
                processing_steps::started_at.eq(Some(now.as_str())),
                processing_steps::completed_at.eq(None::<String>),
                processing_steps::error_message.eq(None::<String>),
                processing_steps::detail.eq(None::<String>),
            ))
            .execute(&mut conn)
            .await
        })?;

        let step = self.get(document_id, &stage_name).await?;
        match step {
            Some(step) if updated == 1 => Ok(ClaimOutcome::Claimed(step)),
            Some(step) if step.status == StepStatus::Success => {
                Ok(ClaimOutcome::AlreadyComplete(step))
            }
            Some(_) => Ok(ClaimOutcome::AlreadyClaimed),
            None => {
                warn!(
                    document_id,
                    stage = %stage_name,
                    "step row vanished between insert and claim"
                );
                Ok(ClaimOutcome::AlreadyClaimed)
            }
        }
    }

    /// Transition an `in_progress` step to its terminal state.
    ///
    /// Calling this on a row that is not currently `in_progress` is a no-op
    /// that logs a warning: it defends against duplicate completion signals
    /// from redelivered work and against a zombie worker finishing after the
    /// watchdog already force-failed the step. Returns whether the row was
    /// transitioned.
    pub async fn complete(
        &self,
        document_id: &str,
        stage: &Stage,
        ok: bool,
        error_message: Option<&str>,
        detail: Option<&str>,
    ) -> Result<bool, DieselError> {
        let stage_name = stage.name();
        let now = Utc::now().to_rfc3339();
        let status = if ok {
            StepStatus::Success
        } else {
            StepStatus::Failure
        };

        let updated: usize = with_conn!(self.pool, conn, {
            diesel::update(
                processing_steps::table
                    .filter(processing_steps::document_id.eq(document_id))
                    .filter(processing_steps::stage.eq(&stage_name))
                    .filter(processing_steps::status.eq(StepStatus::InProgress.as_str())),
            )
            .set((
                processing_steps::status.eq(status.as_str()),
                processing_steps::completed_at.eq(Some(now.as_str())),
                processing_steps::error_message.eq(error_message),
                processing_steps::detail.eq(detail),
            ))
            .execute(&mut conn)
            .await
        })?;

        if updated == 0 {
            let prior = self
                .get(document_id, &stage_name)
                .await?
                .map(|s| s.status.as_str())
                .unwrap_or("absent");
            warn!(
                document_id,
                stage = %stage_name,
                prior_status = prior,
                "ignoring completion for step not in progress"
            );
            return Ok(false);
        }

        Ok(true)
    }

    /// Fetch one step by (document, stage name).
    pub async fn get(
        &self,
        document_id: &str,
        stage_name: &str,
    ) -> Result<Option<ProcessingStep>, DieselError> {
        let record: Option<ProcessingStepRecord> = with_conn!(self.pool, conn, {
            processing_steps::table
                .filter(processing_steps::document_id.eq(document_id))
                .filter(processing_steps::stage.eq(stage_name))
                .first(&mut conn)
                .await
                .optional()
        })?;

        Ok(record.map(record_to_step))
    }

    /// All steps for a document, in creation order.
    pub async fn steps_for_document(
        &self,
        document_id: &str,
    ) -> Result<Vec<ProcessingStep>, DieselError> {
        let records: Vec<ProcessingStepRecord> = with_conn!(self.pool, conn, {
            processing_steps::table
                .filter(processing_steps::document_id.eq(document_id))
                .order(processing_steps::id.asc())
                .load(&mut conn)
                .await
        })?;

        Ok(records.into_iter().map(record_to_step).collect())
    }

    /// Force-fail every step stuck `in_progress` longer than `timeout`.
    ///
    /// Returns the number of recovered rows. This is the only path that
    /// terminates a step without its stage code running; a worker that was
    /// merely slow will hit the no-op rule in `complete` afterwards.
    pub async fn fail_stalled(&self, timeout: Duration) -> Result<usize, DieselError> {
        let now = Utc::now();
        let cutoff = (now - ChronoDuration::from_std(timeout).unwrap_or_default()).to_rfc3339();
        let completed = now.to_rfc3339();

        with_conn!(self.pool, conn, {
            diesel::update(
                processing_steps::table
                    .filter(processing_steps::status.eq(StepStatus::InProgress.as_str()))
                    .filter(processing_steps::started_at.lt(&cutoff)),
            )
            .set((
                processing_steps::status.eq(StepStatus::Failure.as_str()),
                processing_steps::completed_at.eq(&completed),
                processing_steps::error_message.eq("stage exceeded timeout"),
            ))
            .execute(&mut conn)
            .await
        })
    }
}

fn record_to_step(r: ProcessingStepRecord) -> ProcessingStep {
    ProcessingStep {
        id: r.id as i64,
        document_id: r.document_id,
        stage: r.stage,
        status: StepStatus::from_str(&r.status).unwrap_or(StepStatus::Pending),
        started_at: parse_datetime_opt(r.started_at),
        completed_at: parse_datetime_opt(r.completed_at),
        error_message: r.error_message,
        detail: r.detail,
    }
}

/// Backdate a step's `started_at` (test fixture for stall scenarios).
#[cfg(test)]
pub(crate) async fn backdate_started(
    ledger: &StepLedger,
    document_id: &str,
    stage: &Stage,
    started_at: chrono::DateTime<Utc>,
) -> Result<(), DieselError> {
    let stage_name = stage.name();
    let ts = started_at.to_rfc3339();
    with_conn!(ledger.pool, conn, {
        diesel::update(
            processing_steps::table
                .filter(processing_steps::document_id.eq(document_id))
                .filter(processing_steps::stage.eq(&stage_name)),
        )
        .set(processing_steps::started_at.eq(&ts))
        .execute(&mut conn)
        .await?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_pool;

    async fn ledger() -> (tempfile::TempDir, StepLedger) {
        let (dir, pool) = test_pool().await;
        (dir, StepLedger::new(pool))
    }

    #[tokio::test]
    async fn test_claim_creates_and_transitions() {
        let (_dir, ledger) = ledger().await;

        let outcome = ledger.claim("doc1", &Stage::Convert).await.unwrap();
        let step = match outcome {
            ClaimOutcome::Claimed(step) => step,
            other => panic!("expected Claimed, got {:?}", other),
        };
        assert_eq!(step.status, StepStatus::InProgress);
        assert!(step.started_at.is_some());
        assert!(step.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_second_claim_observes_already_claimed() {
        let (_dir, ledger) = ledger().await;

        assert!(matches!(
            ledger.claim("doc1", &Stage::Ocr).await.unwrap(),
            ClaimOutcome::Claimed(_)
        ));
        assert!(matches!(
            ledger.claim("doc1", &Stage::Ocr).await.unwrap(),
            ClaimOutcome::AlreadyClaimed
        ));
    }

    #[tokio::test]
    async fn test_concurrent_claims_single_winner() {
        let (_dir, ledger) = ledger().await;

        let a = ledger.clone();
        let b = ledger.clone();
        let (ra, rb) = tokio::join!(
            tokio::spawn(async move { a.claim("doc1", &Stage::Convert).await }),
            tokio::spawn(async move { b.claim("doc1", &Stage::Convert).await }),
        );
        let outcomes = [ra.unwrap().unwrap(), rb.unwrap().unwrap()];

        let winners = outcomes
            .iter()
            .filter(|o| matches!(o, ClaimOutcome::Claimed(_)))
            .count();
        assert_eq!(winners, 1, "exactly one claimer may win: {:?}", outcomes);
    }

    #[tokio::test]
    async fn test_complete_success() {
        let (_dir, ledger) = ledger().await;

        ledger.claim("doc1", &Stage::Convert).await.unwrap();
        let transitioned = ledger
            .complete("doc1", &Stage::Convert, true, None, Some("converted"))
            .await
            .unwrap();
        assert!(transitioned);

        let step = ledger.get("doc1", "convert").await.unwrap().unwrap();
        assert_eq!(step.status, StepStatus::Success);
        assert!(step.started_at.is_some());
        assert!(step.completed_at.is_some());
        assert_eq!(step.detail.as_deref(), Some("converted"));
    }

    #[tokio::test]
    async fn test_double_complete_is_noop() {
        let (_dir, ledger) = ledger().await;

        ledger.claim("doc1", &Stage::Convert).await.unwrap();
        ledger
            .complete("doc1", &Stage::Convert, true, None, None)
            .await
            .unwrap();
        let first = ledger.get("doc1", "convert").await.unwrap().unwrap();

        // A zombie worker reporting failure afterwards must not alter the row.
        let transitioned = ledger
            .complete("doc1", &Stage::Convert, false, Some("late failure"), None)
            .await
            .unwrap();
        assert!(!transitioned);

        let second = ledger.get("doc1", "convert").await.unwrap().unwrap();
        assert_eq!(second.status, StepStatus::Success);
        assert_eq!(second.completed_at, first.completed_at);
        assert!(second.error_message.is_none());
    }

    #[tokio::test]
    async fn test_complete_without_claim_is_noop() {
        let (_dir, ledger) = ledger().await;

        let transitioned = ledger
            .complete("doc1", &Stage::Convert, true, None, None)
            .await
            .unwrap();
        assert!(!transitioned);
        assert!(ledger.get("doc1", "convert").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_step_is_reclaimable() {
        let (_dir, ledger) = ledger().await;

        ledger.claim("doc1", &Stage::Ocr).await.unwrap();
        ledger
            .complete("doc1", &Stage::Ocr, false, Some("service unavailable"), None)
            .await
            .unwrap();

        let outcome = ledger.claim("doc1", &Stage::Ocr).await.unwrap();
        let step = match outcome {
            ClaimOutcome::Claimed(step) => step,
            other => panic!("expected reclaim, got {:?}", other),
        };
        assert_eq!(step.status, StepStatus::InProgress);
        assert!(step.completed_at.is_none());
        assert!(step.error_message.is_none());
    }

    #[tokio::test]
    async fn test_successful_step_not_reexecuted() {
        let (_dir, ledger) = ledger().await;

        ledger.claim("doc1", &Stage::Ocr).await.unwrap();
        ledger
            .complete("doc1", &Stage::Ocr, true, None, None)
            .await
            .unwrap();

        assert!(matches!(
            ledger.claim("doc1", &Stage::Ocr).await.unwrap(),
            ClaimOutcome::AlreadyComplete(_)
        ));
    }

    #[tokio::test]
    async fn test_fail_stalled_recovers_old_steps() {
        let (_dir, ledger) = ledger().await;

        ledger.claim("doc1", &Stage::Convert).await.unwrap();
        backdate_started(
            &ledger,
            "doc1",
            &Stage::Convert,
            Utc::now() - ChronoDuration::minutes(30),
        )
        .await
        .unwrap();

        let recovered = ledger
            .fail_stalled(Duration::from_secs(600))
            .await
            .unwrap();
        assert_eq!(recovered, 1);

        let step = ledger.get("doc1", "convert").await.unwrap().unwrap();
        assert_eq!(step.status, StepStatus::Failure);
        assert_eq!(step.error_message.as_deref(), Some("stage exceeded timeout"));
        assert!(step.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_fail_stalled_leaves_fresh_steps() {
        let (_dir, ledger) = ledger().await;

        ledger.claim("doc1", &Stage::Convert).await.unwrap();
        let recovered = ledger
            .fail_stalled(Duration::from_secs(600))
            .await
            .unwrap();
        assert_eq!(recovered, 0);

        let step = ledger.get("doc1", "convert").await.unwrap().unwrap();
        assert_eq!(step.status, StepStatus::InProgress);
    }

    #[tokio::test]
    async fn test_steps_for_document() {
        let (_dir, ledger) = ledger().await;

        ledger.claim("doc1", &Stage::Convert).await.unwrap();
        ledger.claim("doc1", &Stage::Ocr).await.unwrap();
        ledger
            .claim("doc1", &Stage::Deliver("archive".to_string()))
            .await
            .unwrap();
        ledger.claim("doc2", &Stage::Convert).await.unwrap();

        let steps = ledger.steps_for_document("doc1").await.unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].stage, "convert");
        assert_eq!(steps[2].stage, "deliver:archive");
    }
}
