//! Per-record pipeline: Validation → Enrichment → Scoring → Assembly.
//!
//! The [`Orchestrator`] owns a record for the length of one run, moves it
//! through the state machine, and returns a terminal [`RecordOutcome`].
//! Each stage sees only the immutable outputs of the stages before it.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};

use provdir_scoring::ScoringEngine;
use provdir_services::Collaborators;
use provdir_shared::{
    AuditEntry, DirectoryEntry, FailedRecord, FailureReason, ProcessingState, ProvDirError,
    ProviderRecord, RecordOutcome, Result, Stage, StageOutcome,
};

use crate::assembler::assemble;
use crate::enrichment::enrich;
use crate::retry::RetryPolicy;
use crate::validation::validate;

/// Sequences the stages for one record at a time. Cheap to share across
/// workers; it holds no per-record state.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    collaborators: Collaborators,
    scoring: Arc<ScoringEngine>,
    retry: RetryPolicy,
}

/// Audit trail under construction for one record.
struct Trail(Vec<AuditEntry>);

impl Trail {
    fn record(&mut self, stage: Stage, outcome: StageOutcome, detail: Option<String>) {
        self.0.push(AuditEntry {
            stage,
            outcome,
            completed_at: Utc::now(),
            detail,
        });
    }
}

impl Orchestrator {
    pub fn new(collaborators: Collaborators, scoring: Arc<ScoringEngine>, retry: RetryPolicy) -> Self {
        Self {
            collaborators,
            scoring,
            retry,
        }
    }

    pub fn scoring(&self) -> &ScoringEngine {
        &self.scoring
    }

    /// Run a `Pending` record to `Done` or `Failed`.
    ///
    /// Returns `Err` only for invariant violations, such as a record that is
    /// not `Pending`; every data or collaborator problem ends in an outcome.
    #[instrument(skip_all, fields(provider = %record.id()))]
    pub async fn run(&self, mut record: ProviderRecord) -> Result<RecordOutcome> {
        if record.state() != ProcessingState::Pending {
            return Err(ProvDirError::invariant(format!(
                "record {} submitted in state {}, expected pending",
                record.id(),
                record.state()
            )));
        }
        let mut trail = Trail(Vec::with_capacity(4));

        // --- Validation ---
        record.advance(ProcessingState::Validating)?;
        let validation = validate(record.input(), &self.collaborators, &self.retry).await;
        trail.record(Stage::Validation, validation.outcome(), None);

        if validation.all_unreachable() {
            warn!("every validation field unreachable; failing record");
            record.advance(ProcessingState::Failed)?;
            let (input, history) = record.into_parts();
            return Ok(RecordOutcome::Failed(FailedRecord {
                input,
                reason: FailureReason::NoEvidence,
                detail: "no collaborator could be reached for any field".into(),
                history,
                audit: trail.0,
            }));
        }

        // --- Enrichment ---
        record.advance(ProcessingState::Enriching)?;
        let enrichment = enrich(record.input(), self.collaborators.extractor.as_ref()).await;
        let detail = (enrichment.documents_failed > 0).then(|| {
            format!(
                "{} of {} documents failed extraction",
                enrichment.documents_failed,
                enrichment.documents_processed + enrichment.documents_failed
            )
        });
        trail.record(Stage::Enrichment, enrichment.outcome(), detail);

        // --- Scoring ---
        record.advance(ProcessingState::Scoring)?;
        let assessment = self.scoring.score(&validation, &enrichment);
        trail.record(
            Stage::Scoring,
            StageOutcome::Success,
            Some(format!(
                "confidence {:.3}, risk {}",
                assessment.confidence_score, assessment.risk_level
            )),
        );

        // --- Assembly ---
        record.advance(ProcessingState::Assembling)?;
        let assembled = assemble(
            record.input(),
            validation,
            enrichment,
            Some(assessment),
            Vec::new(),
        );
        finish_assembly(record, trail, assembled)
    }
}

/// Close the Assembly stage: attach the audit trail to a new entry, or fail
/// the record keeping the trail gathered so far.
fn finish_assembly(
    mut record: ProviderRecord,
    mut trail: Trail,
    assembled: Result<DirectoryEntry>,
) -> Result<RecordOutcome> {
    let mut entry = match assembled {
        Ok(entry) => entry,
        Err(e) => {
            trail.record(Stage::Assembly, StageOutcome::Failed, Some(e.to_string()));
            record.advance(ProcessingState::Failed)?;
            let (input, history) = record.into_parts();
            return Ok(RecordOutcome::Failed(FailedRecord {
                input,
                reason: FailureReason::Invariant,
                detail: e.to_string(),
                history,
                audit: trail.0,
            }));
        }
    };

    trail.record(Stage::Assembly, StageOutcome::Success, None);
    entry.audit = trail.0;
    record.advance(ProcessingState::Done)?;
    info!(
        risk = %entry.assessment.risk_level,
        confidence = entry.assessment.confidence_score,
        flags = entry.assessment.flags.len(),
        "record done"
    );
    let (_, history) = record.into_parts();
    Ok(RecordOutcome::Done {
        entry: Box::new(entry),
        history,
    })
}
