//! Weighted confidence aggregation, flag generation, and risk classification.
//!
//! The engine is built once from a validated [`ScoringConfig`] and is
//! immutable afterwards. Scoring is a pure function of its inputs.

use std::collections::BTreeSet;

use tracing::debug;

use provdir_shared::{
    EnrichmentResult, Field, FieldStatus, FieldValidation, Flag, FlagKind, LicenseStatus,
    ProvDirError, QualityAssessment, Result, RiskLevel, ScoringConfig, ValidationResult,
    sanitize_confidence,
};

/// Allowed distance of the weight sum from 1.0.
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Scores are rounded to this many steps per unit. Fine enough that only
/// float drift in the weighted sum (around 1e-16) is absorbed; a real
/// difference of 1e-7 still decides the bucket.
const SCORE_RESOLUTION: f64 = 1e9;

/// Quality Scoring Engine.
#[derive(Debug, Clone)]
pub struct ScoringEngine {
    config: ScoringConfig,
}

impl ScoringEngine {
    /// Validate `config` and build an engine. Fails with a config error on
    /// weights that do not sum to 1.0 or thresholds out of order.
    pub fn new(config: ScoringConfig) -> Result<Self> {
        validate_config(&config)?;
        Ok(Self { config })
    }

    /// Engine with the built-in default policy.
    pub fn with_defaults() -> Self {
        Self {
            config: ScoringConfig::default(),
        }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Produce a full assessment for one record.
    pub fn score(
        &self,
        validation: &ValidationResult,
        enrichment: &EnrichmentResult,
    ) -> QualityAssessment {
        let confidence_score = self.confidence_score(validation, enrichment);
        let flags = self.flags(validation, enrichment);
        let risk_level = self.classify(confidence_score, &flags);

        debug!(
            confidence_score,
            flags = flags.len(),
            risk = %risk_level,
            "scored record"
        );

        QualityAssessment {
            confidence_score,
            flags,
            risk_level,
        }
    }

    /// Weighted sum of field confidences and enrichment completeness,
    /// clamped to [0,1]. Fields without evidence contribute zero.
    pub fn confidence_score(
        &self,
        validation: &ValidationResult,
        enrichment: &EnrichmentResult,
    ) -> f64 {
        let w = &self.config.weights;
        let sum = w.phone * effective_confidence(&validation.phone)
            + w.address * effective_confidence(&validation.address)
            + w.specialty * effective_confidence(&validation.specialty)
            + w.enrichment * sanitize_confidence(enrichment.completeness());

        quantize(sum.clamp(0.0, 1.0))
    }

    /// Flags derived from field statuses. Low confidence only raises a flag
    /// when the field actually has evidence behind it.
    pub fn flags(
        &self,
        validation: &ValidationResult,
        enrichment: &EnrichmentResult,
    ) -> BTreeSet<Flag> {
        let mut flags = BTreeSet::new();

        for fv in validation.iter() {
            if fv.status == FieldStatus::Mismatch {
                flags.insert(Flag::new(FlagKind::Mismatch, Some(fv.field)));
            }
        }

        for field in [Field::Phone, Field::Address] {
            let fv = validation.field(field);
            if fv.status.has_evidence() && effective_confidence(fv) < self.config.stale_below {
                flags.insert(Flag::new(FlagKind::StaleData, Some(field)));
            }
        }

        if enrichment.incomplete {
            flags.insert(Flag::new(FlagKind::IncompleteEnrichment, None));
        }

        let specialty = &validation.specialty;
        if specialty.status.has_evidence()
            && effective_confidence(specialty) < self.config.license_below
        {
            flags.insert(Flag::new(FlagKind::License, Some(Field::Specialty)));
        }
        if validation.license_status == LicenseStatus::Inactive {
            flags.insert(Flag::new(FlagKind::License, None));
        }

        flags
    }

    /// Map a score and flag set to a risk level.
    ///
    /// HIGH below the medium threshold or with too many flags; LOW at or
    /// above the low threshold with no mismatch; MEDIUM otherwise.
    /// Threshold comparisons are inclusive on the lower-risk side exactly as
    /// written, so 0.85 is LOW and 0.8499 is MEDIUM.
    pub fn classify(&self, confidence_score: f64, flags: &BTreeSet<Flag>) -> RiskLevel {
        let score = quantize(sanitize_confidence(confidence_score));
        let has_mismatch = flags.iter().any(|f| f.kind == FlagKind::Mismatch);

        if score < self.config.medium_risk_min || flags.len() >= self.config.high_risk_flag_count {
            RiskLevel::High
        } else if score >= self.config.low_risk_min && !has_mismatch {
            RiskLevel::Low
        } else {
            RiskLevel::Medium
        }
    }
}

impl Default for ScoringEngine {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn effective_confidence(fv: &FieldValidation) -> f64 {
    if fv.status.has_evidence() {
        sanitize_confidence(fv.confidence)
    } else {
        0.0
    }
}

fn quantize(score: f64) -> f64 {
    (score * SCORE_RESOLUTION).round() / SCORE_RESOLUTION
}

fn validate_config(config: &ScoringConfig) -> Result<()> {
    let w = &config.weights;
    for (name, value) in [
        ("phone", w.phone),
        ("address", w.address),
        ("specialty", w.specialty),
        ("enrichment", w.enrichment),
    ] {
        if !value.is_finite() || !(0.0..=1.0).contains(&value) {
            return Err(ProvDirError::config(format!(
                "scoring weight '{name}' must be within [0, 1], got {value}"
            )));
        }
    }

    let sum = w.sum();
    if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
        return Err(ProvDirError::config(format!(
            "scoring weights must sum to 1.0, got {sum}"
        )));
    }

    for (name, value) in [
        ("low_risk_min", config.low_risk_min),
        ("medium_risk_min", config.medium_risk_min),
        ("stale_below", config.stale_below),
        ("license_below", config.license_below),
    ] {
        if !value.is_finite() || !(0.0..=1.0).contains(&value) {
            return Err(ProvDirError::config(format!(
                "scoring threshold '{name}' must be within [0, 1], got {value}"
            )));
        }
    }

    if config.medium_risk_min > config.low_risk_min {
        return Err(ProvDirError::config(format!(
            "medium_risk_min ({}) must not exceed low_risk_min ({})",
            config.medium_risk_min, config.low_risk_min
        )));
    }

    if config.high_risk_flag_count == 0 {
        return Err(ProvDirError::config("high_risk_flag_count must be at least 1"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use provdir_shared::{AttributeKind, EnrichedAttribute, ScoringWeights};
    use serde_json::Value;

    fn fv(field: Field, status: FieldStatus, confidence: f64) -> FieldValidation {
        FieldValidation::new(field, status, confidence, Value::Null, 1)
    }

    fn validation(
        phone: (FieldStatus, f64),
        address: (FieldStatus, f64),
        specialty: (FieldStatus, f64),
    ) -> ValidationResult {
        ValidationResult {
            phone: fv(Field::Phone, phone.0, phone.1),
            address: fv(Field::Address, address.0, address.1),
            specialty: fv(Field::Specialty, specialty.0, specialty.1),
            normalized_address: None,
            license_status: LicenseStatus::Active,
        }
    }

    fn complete_enrichment() -> EnrichmentResult {
        EnrichmentResult {
            attributes: AttributeKind::ALL
                .iter()
                .map(|kind| EnrichedAttribute {
                    kind: *kind,
                    value: "value".into(),
                    source_confidence: 0.9,
                    source: "cv.txt".into(),
                })
                .collect(),
            incomplete: false,
            documents_processed: 1,
            documents_failed: 0,
        }
    }

    use FieldStatus::{Mismatch, NotFound, Unreachable, Verified};

    #[test]
    fn rejects_weights_not_summing_to_one() {
        let mut config = ScoringConfig::default();
        config.weights = ScoringWeights {
            phone: 0.4,
            address: 0.4,
            specialty: 0.2,
            enrichment: 0.1,
        };
        let err = ScoringEngine::new(config).unwrap_err();
        assert!(matches!(err, ProvDirError::Config { .. }));
        assert!(err.to_string().contains("sum to 1.0"));
    }

    #[test]
    fn rejects_negative_and_nan_weights() {
        let mut config = ScoringConfig::default();
        config.weights.phone = -0.1;
        config.weights.address = 0.8;
        assert!(ScoringEngine::new(config.clone()).is_err());

        config.weights.phone = f64::NAN;
        assert!(ScoringEngine::new(config).is_err());
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let config = ScoringConfig {
            low_risk_min: 0.4,
            medium_risk_min: 0.6,
            ..ScoringConfig::default()
        };
        assert!(ScoringEngine::new(config).is_err());
    }

    #[test]
    fn accepts_weights_within_tolerance() {
        let mut config = ScoringConfig::default();
        config.weights = ScoringWeights {
            phone: 0.1,
            address: 0.2,
            specialty: 0.3,
            enrichment: 0.4,
        };
        assert!(ScoringEngine::new(config).is_ok());
    }

    #[test]
    fn partial_failure_scenario_is_medium_without_flags() {
        let engine = ScoringEngine::with_defaults();
        let v = validation((Unreachable, 0.0), (Verified, 0.9), (Verified, 0.9));
        let a = engine.score(&v, &complete_enrichment());

        // 0 * 0.35 + 0.9 * 0.35 + 0.9 * 0.20 + 1.0 * 0.10
        assert!((a.confidence_score - 0.595).abs() < 1e-9);
        assert!(a.flags.is_empty(), "unreachable is neither mismatch nor stale");
        assert_eq!(a.risk_level, RiskLevel::Medium);
    }

    #[test]
    fn fully_verified_record_is_low_risk() {
        let engine = ScoringEngine::with_defaults();
        let v = validation((Verified, 1.0), (Verified, 0.95), (Verified, 0.9));
        let a = engine.score(&v, &complete_enrichment());
        assert!(a.confidence_score >= 0.85);
        assert_eq!(a.risk_level, RiskLevel::Low);
        assert!(!a.needs_manual_review());
    }

    #[test]
    fn boundary_score_is_low_and_just_below_is_medium() {
        let engine = ScoringEngine::with_defaults();
        let none = BTreeSet::new();
        assert_eq!(engine.classify(0.85, &none), RiskLevel::Low);
        assert_eq!(engine.classify(0.8499, &none), RiskLevel::Medium);
        assert_eq!(engine.classify(0.5, &none), RiskLevel::Medium);
        assert_eq!(engine.classify(0.4999, &none), RiskLevel::High);
    }

    #[test]
    fn computed_boundary_score_lands_on_threshold() {
        let engine = ScoringEngine::with_defaults();
        // 0.35 + 0.35 + 0.75 * 0.20 + 0 = 0.85
        let v = validation((Verified, 1.0), (Verified, 1.0), (Verified, 0.75));
        let a = engine.score(&v, &EnrichmentResult::default());
        assert_eq!(a.confidence_score, 0.85);
        assert!(a.flags.is_empty());
        assert_eq!(a.risk_level, RiskLevel::Low);
    }

    #[test]
    fn score_just_under_threshold_stays_medium() {
        let engine = ScoringEngine::with_defaults();
        // 0.35 + 0.35 + 0.749998 * 0.20 = 0.8499996
        let v = validation((Verified, 1.0), (Verified, 1.0), (Verified, 0.749998));
        let a = engine.score(&v, &EnrichmentResult::default());
        assert!((a.confidence_score - 0.8499996).abs() < 1e-12);
        assert!(a.confidence_score < 0.85);
        assert_eq!(a.risk_level, RiskLevel::Medium);
        assert_eq!(engine.classify(0.8499996, &BTreeSet::new()), RiskLevel::Medium);
    }

    #[test]
    fn single_mismatch_with_high_score_is_medium() {
        let engine = ScoringEngine::with_defaults();
        let v = validation((Mismatch, 0.95), (Verified, 1.0), (Verified, 1.0));
        let a = engine.score(&v, &complete_enrichment());
        assert!(a.confidence_score >= 0.85);
        assert_eq!(a.flags.len(), 1);
        assert!(a.has_flag(FlagKind::Mismatch));
        assert_eq!(a.risk_level, RiskLevel::Medium);
        assert!(a.needs_manual_review());
    }

    #[test]
    fn two_flags_force_high_risk() {
        let engine = ScoringEngine::with_defaults();
        let v = validation((Mismatch, 0.9), (Mismatch, 0.9), (Verified, 1.0));
        let a = engine.score(&v, &complete_enrichment());
        assert!(a.confidence_score >= 0.5);
        assert_eq!(a.flags.len(), 2);
        assert_eq!(a.risk_level, RiskLevel::High);
    }

    #[test]
    fn low_confidence_evidence_raises_stale_and_license_flags() {
        let engine = ScoringEngine::with_defaults();
        let v = validation((Verified, 0.3), (Verified, 0.9), (Verified, 0.45));
        let flags = engine.flags(&v, &EnrichmentResult::default());
        assert!(flags.contains(&Flag::new(FlagKind::StaleData, Some(Field::Phone))));
        assert!(flags.contains(&Flag::new(FlagKind::License, Some(Field::Specialty))));
        assert!(!flags.contains(&Flag::new(FlagKind::StaleData, Some(Field::Address))));
    }

    #[test]
    fn missing_evidence_never_raises_confidence_flags() {
        let engine = ScoringEngine::with_defaults();
        let v = validation((NotFound, 0.0), (Unreachable, 0.0), (NotFound, 0.0));
        let flags = engine.flags(&v, &EnrichmentResult::default());
        assert!(flags.is_empty());
    }

    #[test]
    fn inactive_license_and_incomplete_enrichment_flag() {
        let engine = ScoringEngine::with_defaults();
        let mut v = validation((Verified, 1.0), (Verified, 1.0), (Verified, 1.0));
        v.license_status = LicenseStatus::Inactive;
        let mut e = complete_enrichment();
        e.incomplete = true;
        let a = engine.score(&v, &e);
        assert!(a.flags.contains(&Flag::new(FlagKind::License, None)));
        assert!(a.has_flag(FlagKind::IncompleteEnrichment));
        assert_eq!(a.risk_level, RiskLevel::High);
    }

    #[test]
    fn scoring_is_deterministic() {
        let engine = ScoringEngine::with_defaults();
        let v = validation((Verified, 0.731), (Mismatch, 0.612), (Verified, 0.377));
        let e = complete_enrichment();
        let first = engine.score(&v, &e);
        for _ in 0..100 {
            let again = engine.score(&v, &e);
            assert_eq!(again.confidence_score.to_bits(), first.confidence_score.to_bits());
            assert_eq!(again.risk_level, first.risk_level);
            assert_eq!(again.flags, first.flags);
        }
    }

    #[test]
    fn unreachable_never_increases_score() {
        let engine = ScoringEngine::with_defaults();
        let e = complete_enrichment();
        for confidence in [0.0, 0.2, 0.5, 0.85, 1.0] {
            for field in Field::ALL {
                let mut verified = validation((Verified, 0.7), (Verified, 0.6), (Verified, 0.8));
                let slot = match field {
                    Field::Phone => &mut verified.phone,
                    Field::Address => &mut verified.address,
                    Field::Specialty => &mut verified.specialty,
                };
                *slot = fv(field, Verified, confidence);
                let mut unreachable = verified.clone();
                let slot = match field {
                    Field::Phone => &mut unreachable.phone,
                    Field::Address => &mut unreachable.address,
                    Field::Specialty => &mut unreachable.specialty,
                };
                *slot = fv(field, Unreachable, 0.0);

                let before = engine.confidence_score(&verified, &e);
                let after = engine.confidence_score(&unreachable, &e);
                assert!(after <= before, "{field} at {confidence}: {after} > {before}");
            }
        }
    }

    #[test]
    fn malformed_confidence_scores_as_zero() {
        let engine = ScoringEngine::with_defaults();
        let mut v = validation((Verified, 1.0), (Verified, 1.0), (Verified, 1.0));
        // Bypass the constructor the way a deserialized payload would.
        v.phone.confidence = f64::NAN;
        let score = engine.confidence_score(&v, &EnrichmentResult::default());
        assert!((score - 0.55).abs() < 1e-9);
    }
}
