//! Manual review queue ranking.
//!
//! Combines risk level, inverted confidence, and the manual-review flag into
//! a priority score normalised to 0–100 across the ranked set. Higher scores
//! should be reviewed first.

use serde::Serialize;

use provdir_shared::{DirectoryEntry, ProviderId, RiskLevel};

const MANUAL_REVIEW_BONUS: f64 = 50.0;

/// One row of the review queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewItem {
    pub provider_id: ProviderId,
    pub name: String,
    pub specialty: Option<String>,
    pub risk_level: RiskLevel,
    pub confidence_score: f64,
    pub needs_manual_review: bool,
    /// Normalised priority in [0, 100].
    pub priority_score: f64,
    /// Priority band: LOW [0,33], MEDIUM (33,66], HIGH (66,100].
    pub priority_category: RiskLevel,
}

fn risk_weight(risk: RiskLevel) -> f64 {
    match risk {
        RiskLevel::High => 100.0,
        RiskLevel::Medium => 50.0,
        RiskLevel::Low => 10.0,
    }
}

/// Un-normalised priority for a single entry.
pub fn raw_priority(risk: RiskLevel, confidence_score: f64, needs_manual_review: bool) -> f64 {
    let mut score = risk_weight(risk) + (1.0 - confidence_score.clamp(0.0, 1.0)) * 100.0;
    if needs_manual_review {
        score += MANUAL_REVIEW_BONUS;
    }
    score
}

/// Band for a normalised priority score.
pub fn priority_category(score: f64) -> RiskLevel {
    if score <= 33.0 {
        RiskLevel::Low
    } else if score <= 66.0 {
        RiskLevel::Medium
    } else {
        RiskLevel::High
    }
}

/// Rank entries for manual review, highest priority first. Ties keep input order.
pub fn rank_for_review(entries: &[DirectoryEntry]) -> Vec<ReviewItem> {
    let raw: Vec<f64> = entries
        .iter()
        .map(|e| {
            raw_priority(
                e.assessment.risk_level,
                e.assessment.confidence_score,
                e.assessment.needs_manual_review(),
            )
        })
        .collect();

    let max = raw.iter().copied().fold(0.0_f64, f64::max);

    let mut items: Vec<ReviewItem> = entries
        .iter()
        .zip(raw)
        .map(|(entry, raw)| {
            let priority_score = if max > 0.0 { raw / max * 100.0 } else { raw };
            ReviewItem {
                provider_id: entry.provider_id.clone(),
                name: entry.name.clone(),
                specialty: entry.specialty.clone(),
                risk_level: entry.assessment.risk_level,
                confidence_score: entry.assessment.confidence_score,
                needs_manual_review: entry.assessment.needs_manual_review(),
                priority_score,
                priority_category: priority_category(priority_score),
            }
        })
        .collect();

    items.sort_by(|a, b| b.priority_score.total_cmp(&a.priority_score));
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use chrono::Utc;
    use provdir_shared::{
        EnrichmentResult, Field, FieldStatus, FieldValidation, Flag, FlagKind, LicenseStatus,
        QualityAssessment, ValidationResult,
    };

    fn entry(id: &str, risk: RiskLevel, confidence: f64, mismatch: bool) -> DirectoryEntry {
        let fv = |field| {
            FieldValidation::new(field, FieldStatus::Verified, 1.0, serde_json::Value::Null, 1)
        };
        let mut flags = BTreeSet::new();
        if mismatch {
            flags.insert(Flag::new(FlagKind::Mismatch, Some(Field::Phone)));
        }
        DirectoryEntry {
            provider_id: id.into(),
            name: format!("Provider {id}"),
            phone: None,
            address: None,
            specialty: Some("Family Medicine".into()),
            license_number: None,
            validation: ValidationResult {
                phone: fv(Field::Phone),
                address: fv(Field::Address),
                specialty: fv(Field::Specialty),
                normalized_address: None,
                license_status: LicenseStatus::Unknown,
            },
            enrichment: EnrichmentResult::default(),
            assessment: QualityAssessment {
                confidence_score: confidence,
                flags,
                risk_level: risk,
            },
            audit: vec![],
            fingerprint: String::new(),
            assembled_at: Utc::now(),
        }
    }

    #[test]
    fn raw_priority_combines_components() {
        assert_eq!(raw_priority(RiskLevel::Low, 1.0, false), 10.0);
        assert_eq!(raw_priority(RiskLevel::High, 0.0, true), 250.0);
        assert_eq!(raw_priority(RiskLevel::Medium, 0.5, false), 100.0);
    }

    #[test]
    fn categories_follow_bins() {
        assert_eq!(priority_category(0.0), RiskLevel::Low);
        assert_eq!(priority_category(33.0), RiskLevel::Low);
        assert_eq!(priority_category(33.1), RiskLevel::Medium);
        assert_eq!(priority_category(66.0), RiskLevel::Medium);
        assert_eq!(priority_category(100.0), RiskLevel::High);
    }

    #[test]
    fn ranking_orders_by_normalised_priority() {
        let entries = vec![
            entry("low", RiskLevel::Low, 0.95, false),
            entry("high", RiskLevel::High, 0.30, false),
            entry("medium", RiskLevel::Medium, 0.90, true),
        ];
        let ranked = rank_for_review(&entries);

        let order: Vec<&str> = ranked.iter().map(|r| r.provider_id.0.as_str()).collect();
        assert_eq!(order, vec!["high", "medium", "low"]);
        assert_eq!(ranked[0].priority_score, 100.0);
        assert_eq!(ranked[0].priority_category, RiskLevel::High);
        assert!(ranked[1].needs_manual_review);
        assert_eq!(ranked[2].priority_category, RiskLevel::Low);
    }

    #[test]
    fn empty_input_ranks_nothing() {
        assert!(rank_for_review(&[]).is_empty());
    }
}
