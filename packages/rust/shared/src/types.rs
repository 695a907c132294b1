//! Core domain types for provider records moving through the pipeline.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ProvDirError, Result};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Unique provider identifier as supplied by the ingestion source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(pub String);

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A UUID v7 wrapper for batch job identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub Uuid);

impl BatchId {
    /// Generate a new time-sortable batch identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for BatchId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Raw input
// ---------------------------------------------------------------------------

/// A credential document attached to a provider (CV, board certificate, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    /// File name or label, used in evidence and logs.
    pub name: String,
    /// Document body as text.
    pub text: String,
}

/// Raw provider fields as ingested. Missing fields are `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderInput {
    pub id: ProviderId,
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub specialty: Option<String>,
    /// License or registry number (an NPI for the public registry).
    #[serde(default)]
    pub license_number: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub documents: Vec<SourceDocument>,
}

// ---------------------------------------------------------------------------
// Record state machine
// ---------------------------------------------------------------------------

/// Where a record is in its journey through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingState {
    Pending,
    Validating,
    Enriching,
    Scoring,
    Assembling,
    Done,
    Failed,
}

impl ProcessingState {
    /// The happy-path order every record follows.
    pub const SEQUENCE: [ProcessingState; 6] = [
        Self::Pending,
        Self::Validating,
        Self::Enriching,
        Self::Scoring,
        Self::Assembling,
        Self::Done,
    ];

    /// Successor on the happy path, `None` for terminal states.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Pending => Some(Self::Validating),
            Self::Validating => Some(Self::Enriching),
            Self::Enriching => Some(Self::Scoring),
            Self::Scoring => Some(Self::Assembling),
            Self::Assembling => Some(Self::Done),
            Self::Done | Self::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// A transition is legal if it moves one step forward or fails a
    /// non-terminal record.
    pub fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == Self::Failed || self.next() == Some(next)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Validating => "validating",
            Self::Enriching => "enriching",
            Self::Scoring => "scoring",
            Self::Assembling => "assembling",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// A provider record owned by exactly one orchestrator run.
///
/// The state only moves forward; every state entered is kept in `history`.
#[derive(Debug, Clone)]
pub struct ProviderRecord {
    input: ProviderInput,
    state: ProcessingState,
    history: Vec<ProcessingState>,
}

impl ProviderRecord {
    /// Wrap raw input as a `Pending` record.
    pub fn new(input: ProviderInput) -> Self {
        Self {
            input,
            state: ProcessingState::Pending,
            history: vec![ProcessingState::Pending],
        }
    }

    pub fn id(&self) -> &ProviderId {
        &self.input.id
    }

    pub fn input(&self) -> &ProviderInput {
        &self.input
    }

    pub fn state(&self) -> ProcessingState {
        self.state
    }

    /// Every state the record has entered, in order.
    pub fn history(&self) -> &[ProcessingState] {
        &self.history
    }

    /// Move to `next`, rejecting skips, revisits and moves out of a terminal state.
    pub fn advance(&mut self, next: ProcessingState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(ProvDirError::invariant(format!(
                "record {}: illegal transition {} -> {}",
                self.input.id, self.state, next
            )));
        }
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    /// Consume the record, returning its input and state history.
    pub fn into_parts(self) -> (ProviderInput, Vec<ProcessingState>) {
        (self.input, self.history)
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A validated contact/credential field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Phone,
    Address,
    Specialty,
}

impl Field {
    pub const ALL: [Field; 3] = [Self::Phone, Self::Address, Self::Specialty];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Phone => "phone",
            Self::Address => "address",
            Self::Specialty => "specialty",
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Outcome of validating one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldStatus {
    Verified,
    Mismatch,
    Unreachable,
    NotFound,
}

impl FieldStatus {
    /// Whether the collaborator returned evidence about the field at all.
    pub fn has_evidence(self) -> bool {
        matches!(self, Self::Verified | Self::Mismatch)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Verified => "verified",
            Self::Mismatch => "mismatch",
            Self::Unreachable => "unreachable",
            Self::NotFound => "not_found",
        }
    }
}

/// Registry license standing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseStatus {
    Active,
    Inactive,
    #[default]
    Unknown,
}

/// Per-field validation outcome. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValidation {
    pub field: Field,
    pub status: FieldStatus,
    /// Confidence in [0,1]; always 0 when the status carries no evidence.
    pub confidence: f64,
    /// Raw collaborator payload kept for audit.
    #[serde(default)]
    pub evidence: serde_json::Value,
    /// Number of collaborator calls made (1 + retries).
    #[serde(default)]
    pub attempts: u32,
}

impl FieldValidation {
    /// Build a field outcome, coercing malformed confidences.
    ///
    /// Non-finite values become 0, others are clamped to [0,1], and statuses
    /// without evidence always score 0.
    pub fn new(
        field: Field,
        status: FieldStatus,
        confidence: f64,
        evidence: serde_json::Value,
        attempts: u32,
    ) -> Self {
        let confidence = if status.has_evidence() {
            sanitize_confidence(confidence)
        } else {
            0.0
        };
        Self {
            field,
            status,
            confidence,
            evidence,
            attempts,
        }
    }

    /// Outcome for a field with no input value to check.
    pub fn missing(field: Field) -> Self {
        Self::new(
            field,
            FieldStatus::NotFound,
            0.0,
            serde_json::json!({ "reason": "field missing from input" }),
            0,
        )
    }
}

/// Clamp a confidence into [0,1]; NaN and infinities count as no confidence.
pub fn sanitize_confidence(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Validation stage output: one outcome per field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub phone: FieldValidation,
    pub address: FieldValidation,
    pub specialty: FieldValidation,
    /// Normalized address returned by the address collaborator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized_address: Option<String>,
    #[serde(default)]
    pub license_status: LicenseStatus,
}

impl ValidationResult {
    pub fn field(&self, field: Field) -> &FieldValidation {
        match field {
            Field::Phone => &self.phone,
            Field::Address => &self.address,
            Field::Specialty => &self.specialty,
        }
    }

    /// Iterate outcomes in field order.
    pub fn iter(&self) -> impl Iterator<Item = &FieldValidation> {
        [&self.phone, &self.address, &self.specialty].into_iter()
    }

    /// True when no collaborator could be reached for any field.
    pub fn all_unreachable(&self) -> bool {
        self.iter().all(|f| f.status == FieldStatus::Unreachable)
    }

    pub fn outcome(&self) -> StageOutcome {
        if self.all_unreachable() {
            StageOutcome::Failed
        } else if self.iter().all(|f| f.status == FieldStatus::Verified) {
            StageOutcome::Success
        } else {
            StageOutcome::Partial
        }
    }
}

// ---------------------------------------------------------------------------
// Enrichment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    Education,
    Certification,
    Affiliation,
}

impl AttributeKind {
    pub const ALL: [AttributeKind; 3] = [Self::Education, Self::Certification, Self::Affiliation];
}

/// A derived supplementary attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedAttribute {
    pub kind: AttributeKind,
    pub value: String,
    pub source_confidence: f64,
    /// Document or collaborator the value came from.
    pub source: String,
}

/// Enrichment stage output. Never an error: no data is a valid result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentResult {
    #[serde(default)]
    pub attributes: Vec<EnrichedAttribute>,
    /// Set when any extraction failed or returned partial data.
    #[serde(default)]
    pub incomplete: bool,
    #[serde(default)]
    pub documents_processed: usize,
    #[serde(default)]
    pub documents_failed: usize,
}

impl EnrichmentResult {
    pub fn of_kind(&self, kind: AttributeKind) -> impl Iterator<Item = &EnrichedAttribute> {
        self.attributes.iter().filter(move |a| a.kind == kind)
    }

    /// Completeness in [0,1]: share of attribute kinds covered, halved when
    /// extraction was incomplete.
    pub fn completeness(&self) -> f64 {
        let covered = AttributeKind::ALL
            .iter()
            .filter(|kind| self.of_kind(**kind).next().is_some())
            .count();
        let base = covered as f64 / AttributeKind::ALL.len() as f64;
        if self.incomplete { base * 0.5 } else { base }
    }

    pub fn outcome(&self) -> StageOutcome {
        if self.incomplete || self.attributes.is_empty() {
            StageOutcome::Partial
        } else {
            StageOutcome::Success
        }
    }
}

// ---------------------------------------------------------------------------
// Quality assessment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagKind {
    Mismatch,
    StaleData,
    IncompleteEnrichment,
    License,
}

/// A named quality concern, optionally tied to one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Flag {
    pub kind: FlagKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<Field>,
}

impl Flag {
    pub fn new(kind: FlagKind, field: Option<Field>) -> Self {
        Self { kind, field }
    }
}

impl std::fmt::Display for Flag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            FlagKind::Mismatch => "mismatch",
            FlagKind::StaleData => "stale_data",
            FlagKind::IncompleteEnrichment => "incomplete_enrichment",
            FlagKind::License => "license",
        };
        match self.field {
            Some(field) => write!(f, "{kind}:{field}"),
            None => f.write_str(kind),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = ProvDirError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            other => Err(ProvDirError::validation(format!("unknown risk level '{other}'"))),
        }
    }
}

/// Scoring stage output. Replaced wholesale on re-scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityAssessment {
    pub confidence_score: f64,
    pub flags: BTreeSet<Flag>,
    pub risk_level: RiskLevel,
}

impl QualityAssessment {
    pub fn has_flag(&self, kind: FlagKind) -> bool {
        self.flags.iter().any(|f| f.kind == kind)
    }

    /// High-risk entries and any field mismatch go to the manual review queue.
    pub fn needs_manual_review(&self) -> bool {
        self.risk_level == RiskLevel::High || self.has_flag(FlagKind::Mismatch)
    }
}

// ---------------------------------------------------------------------------
// Audit trail
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validation,
    Enrichment,
    Scoring,
    Assembly,
}

impl Stage {
    /// The record state while this stage runs.
    pub fn state(self) -> ProcessingState {
        match self {
            Self::Validation => ProcessingState::Validating,
            Self::Enrichment => ProcessingState::Enriching,
            Self::Scoring => ProcessingState::Scoring,
            Self::Assembly => ProcessingState::Assembling,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Success,
    Partial,
    Failed,
}

/// One stage transition in a record's audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub stage: Stage,
    pub outcome: StageOutcome,
    pub completed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

// ---------------------------------------------------------------------------
// Terminal results
// ---------------------------------------------------------------------------

/// The exported representation of a `Done` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub provider_id: ProviderId,
    pub name: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub specialty: Option<String>,
    pub license_number: Option<String>,
    pub validation: ValidationResult,
    pub enrichment: EnrichmentResult,
    pub assessment: QualityAssessment,
    pub audit: Vec<AuditEntry>,
    /// SHA-256 over the raw fields and assessment.
    pub fingerprint: String,
    pub assembled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Every validation field was unreachable.
    NoEvidence,
    Timeout,
    /// The batch was cancelled before the record was dispatched.
    Cancelled,
    Invariant,
}

impl FailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoEvidence => "no_evidence",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Invariant => "invariant",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// A record that ended in `Failed`, with everything needed to audit why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedRecord {
    pub input: ProviderInput,
    pub reason: FailureReason,
    pub detail: String,
    /// States entered before failing, ending in `Failed`.
    pub history: Vec<ProcessingState>,
    pub audit: Vec<AuditEntry>,
}

/// Terminal result of one orchestrator run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecordOutcome {
    Done {
        entry: Box<DirectoryEntry>,
        history: Vec<ProcessingState>,
    },
    Failed(FailedRecord),
}

impl RecordOutcome {
    pub fn provider_id(&self) -> &ProviderId {
        match self {
            Self::Done { entry, .. } => &entry.provider_id,
            Self::Failed(failed) => &failed.input.id,
        }
    }

    pub fn history(&self) -> &[ProcessingState] {
        match self {
            Self::Done { history, .. } => history,
            Self::Failed(failed) => &failed.history,
        }
    }

    pub fn entry(&self) -> Option<&DirectoryEntry> {
        match self {
            Self::Done { entry, .. } => Some(entry),
            Self::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&FailedRecord> {
        match self {
            Self::Done { .. } => None,
            Self::Failed(failed) => Some(failed),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done { .. })
    }
}

/// Aggregate figures for a finished batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub done: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub cancelled: usize,
    pub low_risk: usize,
    pub medium_risk: usize,
    pub high_risk: usize,
    pub needs_review: usize,
    /// Mean confidence over `Done` entries; 0 when there are none.
    pub average_confidence: f64,
    /// `done / total`; 0 for an empty batch.
    pub success_rate: f64,
    pub elapsed_ms: u64,
}

impl BatchSummary {
    pub fn from_outcomes(outcomes: &[RecordOutcome], elapsed: std::time::Duration) -> Self {
        let mut summary = Self {
            total: outcomes.len(),
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            ..Self::default()
        };
        let mut confidence_sum = 0.0;

        for outcome in outcomes {
            match outcome {
                RecordOutcome::Done { entry, .. } => {
                    summary.done += 1;
                    confidence_sum += entry.assessment.confidence_score;
                    match entry.assessment.risk_level {
                        RiskLevel::Low => summary.low_risk += 1,
                        RiskLevel::Medium => summary.medium_risk += 1,
                        RiskLevel::High => summary.high_risk += 1,
                    }
                    if entry.assessment.needs_manual_review() {
                        summary.needs_review += 1;
                    }
                }
                RecordOutcome::Failed(failed) => {
                    summary.failed += 1;
                    match failed.reason {
                        FailureReason::Timeout => summary.timed_out += 1,
                        FailureReason::Cancelled => summary.cancelled += 1,
                        FailureReason::NoEvidence | FailureReason::Invariant => {}
                    }
                }
            }
        }

        if summary.done > 0 {
            summary.average_confidence = confidence_sum / summary.done as f64;
        }
        if summary.total > 0 {
            summary.success_rate = summary.done as f64 / summary.total as f64;
        }
        summary
    }
}
