//! Directory assembly: merges raw fields and stage outputs into a
//! [`DirectoryEntry`] with a tamper-evident fingerprint.

use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};

use provdir_shared::{
    AuditEntry, DirectoryEntry, EnrichmentResult, Flag, ProvDirError, ProviderId, ProviderInput,
    QualityAssessment, Result, RiskLevel, ValidationResult,
};

/// The fields covered by an entry's fingerprint.
#[derive(Serialize)]
struct FingerprintView<'a> {
    provider_id: &'a ProviderId,
    name: &'a str,
    phone: Option<&'a str>,
    address: Option<&'a str>,
    specialty: Option<&'a str>,
    license_number: Option<&'a str>,
    confidence_score: f64,
    risk_level: RiskLevel,
    flags: Vec<&'a Flag>,
}

fn fingerprint_of(
    provider_id: &ProviderId,
    name: &str,
    phone: Option<&str>,
    address: Option<&str>,
    specialty: Option<&str>,
    license_number: Option<&str>,
    assessment: &QualityAssessment,
) -> Result<String> {
    let view = FingerprintView {
        provider_id,
        name,
        phone,
        address,
        specialty,
        license_number,
        confidence_score: assessment.confidence_score,
        risk_level: assessment.risk_level,
        flags: assessment.flags.iter().collect(),
    };
    let bytes = serde_json::to_vec(&view)
        .map_err(|e| ProvDirError::invariant(format!("fingerprint serialization: {e}")))?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Recompute an entry's fingerprint and compare it with the stored one.
pub fn verify_fingerprint(entry: &DirectoryEntry) -> bool {
    fingerprint_of(
        &entry.provider_id,
        &entry.name,
        entry.phone.as_deref(),
        entry.address.as_deref(),
        entry.specialty.as_deref(),
        entry.license_number.as_deref(),
        &entry.assessment,
    )
    .is_ok_and(|fp| fp == entry.fingerprint)
}

/// Merge a record's raw fields and stage outputs into a directory entry.
///
/// Fails with `InvariantViolation` when no assessment is supplied; scoring
/// must have run before assembly.
pub fn assemble(
    input: &ProviderInput,
    validation: ValidationResult,
    enrichment: EnrichmentResult,
    assessment: Option<QualityAssessment>,
    audit: Vec<AuditEntry>,
) -> Result<DirectoryEntry> {
    let Some(assessment) = assessment else {
        return Err(ProvDirError::invariant(format!(
            "record {}: assembly without a quality assessment",
            input.id
        )));
    };

    let fingerprint = fingerprint_of(
        &input.id,
        &input.name,
        input.phone.as_deref(),
        input.address.as_deref(),
        input.specialty.as_deref(),
        input.license_number.as_deref(),
        &assessment,
    )?;

    Ok(DirectoryEntry {
        provider_id: input.id.clone(),
        name: input.name.clone(),
        phone: input.phone.clone(),
        address: input.address.clone(),
        specialty: input.specialty.clone(),
        license_number: input.license_number.clone(),
        validation,
        enrichment,
        assessment,
        audit,
        fingerprint,
        assembled_at: Utc::now(),
    })
}
