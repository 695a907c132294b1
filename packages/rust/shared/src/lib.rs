//! Shared types, error model, and configuration for the provider directory pipeline.
//!
//! This crate is the foundation depended on by all other provdir crates.
//! It provides:
//! - [`ProvDirError`]: the unified error type
//! - Domain types ([`ProviderRecord`], [`ValidationResult`], [`QualityAssessment`],
//!   [`DirectoryEntry`], ...)
//! - Configuration ([`AppConfig`], [`ScoringConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BatchConfig, RegistryConfig, RetryConfig, ScoringConfig, ScoringWeights,
    config_dir, config_file_path, init_config, load_config, load_config_from,
};
pub use error::{PermanentKind, ProvDirError, Result};
pub use types::{
    AttributeKind, AuditEntry, BatchId, BatchSummary, DirectoryEntry, EnrichedAttribute,
    EnrichmentResult, FailedRecord, FailureReason, Field, FieldStatus, FieldValidation, Flag,
    FlagKind, LicenseStatus, ProcessingState, ProviderId, ProviderInput, ProviderRecord,
    QualityAssessment, RecordOutcome, RiskLevel, SourceDocument, Stage, StageOutcome,
    ValidationResult, sanitize_confidence,
};
