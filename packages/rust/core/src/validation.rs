//! Validation stage: checks phone, address, and specialty against external
//! collaborators.
//!
//! Fields are validated independently and concurrently. A field that cannot
//! be checked is recorded with its own status and the stage still produces a
//! full [`ValidationResult`]; deciding whether the record can continue is the
//! orchestrator's job.

use serde::Serialize;
use serde_json::json;
use tracing::{debug, instrument, warn};

use provdir_shared::{
    Field, FieldStatus, FieldValidation, LicenseStatus, PermanentKind, ProvDirError,
    ProviderInput, ValidationResult,
};
use provdir_services::{Collaborators, RegistryQuery};

use crate::retry::{Attempted, RetryPolicy};

/// Map a collaborator error after retries into a field status.
///
/// Exhausted transient errors mean nobody answered (`Unreachable`); a
/// permanent "not found" or "invalid input" is an answer (`NotFound`).
fn status_for_error(err: &ProvDirError) -> FieldStatus {
    match err {
        ProvDirError::PermanentExternal {
            kind: PermanentKind::NotFound | PermanentKind::InvalidInput,
            ..
        } => FieldStatus::NotFound,
        _ => FieldStatus::Unreachable,
    }
}

/// Build a field outcome from a collaborator call.
fn field_outcome<T: Serialize>(
    field: Field,
    service: &str,
    attempted: Attempted<T>,
    status_and_confidence: impl FnOnce(&T) -> (FieldStatus, f64),
) -> (FieldValidation, Option<T>) {
    let Attempted { result, attempts } = attempted;
    match result {
        Ok(response) => {
            let (status, confidence) = status_and_confidence(&response);
            let evidence = json!({ "service": service, "response": &response });
            (
                FieldValidation::new(field, status, confidence, evidence, attempts),
                Some(response),
            )
        }
        Err(err) => {
            let status = status_for_error(&err);
            if status == FieldStatus::Unreachable {
                warn!(%field, attempts, error = %err, "field unreachable");
            } else {
                debug!(%field, error = %err, "collaborator rejected field");
            }
            // Once retries are spent a transient error is final for this record.
            let evidence = json!({
                "service": service,
                "error": err.to_string(),
                "retryable": false,
                "exhausted": err.is_retryable(),
            });
            (
                FieldValidation::new(field, status, 0.0, evidence, attempts),
                None,
            )
        }
    }
}

async fn validate_phone(
    input: &ProviderInput,
    collaborators: &Collaborators,
    retry: &RetryPolicy,
) -> FieldValidation {
    let Some(phone) = input.phone.as_deref() else {
        return FieldValidation::missing(Field::Phone);
    };
    let contact = collaborators.contact.as_ref();
    let attempted = retry.run(|| contact.validate_phone(phone)).await;
    field_outcome(Field::Phone, contact.name(), attempted, |c| {
        (c.status, c.confidence)
    })
    .0
}

async fn validate_address(
    input: &ProviderInput,
    collaborators: &Collaborators,
    retry: &RetryPolicy,
) -> (FieldValidation, Option<String>) {
    let Some(address) = input.address.as_deref() else {
        return (FieldValidation::missing(Field::Address), None);
    };
    let contact = collaborators.contact.as_ref();
    let attempted = retry.run(|| contact.validate_address(address)).await;
    let (outcome, response) =
        field_outcome(Field::Address, contact.name(), attempted, |c| {
            (c.status, c.confidence)
        });
    (outcome, response.and_then(|r| r.normalized_address))
}

async fn validate_specialty(
    input: &ProviderInput,
    collaborators: &Collaborators,
    retry: &RetryPolicy,
) -> (FieldValidation, LicenseStatus) {
    let Some(license_id) = input.license_number.as_deref() else {
        let outcome = match input.specialty {
            None => FieldValidation::missing(Field::Specialty),
            Some(_) => FieldValidation::new(
                Field::Specialty,
                FieldStatus::NotFound,
                0.0,
                json!({ "reason": "no license number to verify against" }),
                0,
            ),
        };
        return (outcome, LicenseStatus::Unknown);
    };

    let query = RegistryQuery {
        license_id,
        name: &input.name,
        specialty: input.specialty.as_deref(),
    };
    let registry = collaborators.registry.as_ref();
    let attempted = retry.run(|| registry.lookup_provider(&query)).await;
    let (outcome, response) =
        field_outcome(Field::Specialty, registry.name(), attempted, |m| {
            (m.status, m.specialty_confidence)
        });
    let license_status = response.map(|m| m.license_status).unwrap_or_default();

    // The lookup still yields a license status when no specialty was claimed.
    if input.specialty.is_none() {
        return (FieldValidation::missing(Field::Specialty), license_status);
    }
    (outcome, license_status)
}

/// Run the validation stage for one provider.
#[instrument(skip_all, fields(provider = %input.id))]
pub async fn validate(
    input: &ProviderInput,
    collaborators: &Collaborators,
    retry: &RetryPolicy,
) -> ValidationResult {
    let (phone, (address, normalized_address), (specialty, license_status)) = tokio::join!(
        validate_phone(input, collaborators, retry),
        validate_address(input, collaborators, retry),
        validate_specialty(input, collaborators, retry),
    );

    let result = ValidationResult {
        phone,
        address,
        specialty,
        normalized_address,
        license_status,
    };
    debug!(
        phone = result.phone.status.as_str(),
        address = result.address.status.as_str(),
        specialty = result.specialty.status.as_str(),
        "validation finished"
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use crate::testkit::{Script, collaborators, full_input};

    #[tokio::test(start_paused = true)]
    async fn fields_are_validated_independently() {
        let kit = collaborators(Script::Transient, Script::Verified(0.9), Script::Verified(0.9));
        let result = validate(&full_input("p1"), &kit.collaborators, &RetryPolicy::default())
            .await;

        assert_eq!(result.phone.status, FieldStatus::Unreachable);
        assert_eq!(result.phone.attempts, 4);
        assert_eq!(result.phone.confidence, 0.0);
        assert_eq!(kit.contact.phone_calls.load(Ordering::SeqCst), 4);
        assert_eq!(result.phone.evidence["retryable"], false);
        assert_eq!(result.phone.evidence["exhausted"], true);

        assert_eq!(result.address.status, FieldStatus::Verified);
        assert_eq!(result.address.confidence, 0.9);
        assert_eq!(result.address.attempts, 1);
        assert_eq!(
            result.normalized_address.as_deref(),
            Some("100 Main St, Seattle, WA 98101")
        );

        assert_eq!(result.specialty.status, FieldStatus::Verified);
        assert_eq!(result.specialty.confidence, 0.9);
        assert_eq!(result.license_status, LicenseStatus::Active);
    }

    #[tokio::test]
    async fn permanent_not_found_is_not_retried() {
        let kit = collaborators(Script::Permanent, Script::NotFound, Script::Verified(1.0));
        let result = validate(&full_input("p1"), &kit.collaborators, &RetryPolicy::default())
            .await;

        assert_eq!(result.phone.status, FieldStatus::NotFound);
        assert_eq!(result.phone.attempts, 1);
        assert_eq!(result.phone.evidence["retryable"], false);
        assert_eq!(result.phone.evidence["exhausted"], false);
        assert_eq!(result.address.status, FieldStatus::NotFound);
        assert!(!result.all_unreachable());
    }

    #[tokio::test]
    async fn missing_fields_skip_collaborators() {
        let kit = collaborators(Script::Verified(1.0), Script::Verified(1.0), Script::Verified(1.0));
        let mut input = full_input("p1");
        input.phone = None;
        input.specialty = None;

        let result = validate(&input, &kit.collaborators, &RetryPolicy::default()).await;

        assert_eq!(result.phone, FieldValidation::missing(Field::Phone));
        assert_eq!(kit.contact.phone_calls.load(Ordering::SeqCst), 0);
        assert_eq!(result.specialty.status, FieldStatus::NotFound);
        assert_eq!(result.license_status, LicenseStatus::Active);
    }

    #[tokio::test]
    async fn specialty_without_license_is_not_found() {
        let kit = collaborators(Script::Verified(1.0), Script::Verified(1.0), Script::Verified(1.0));
        let mut input = full_input("p1");
        input.license_number = None;

        let result = validate(&input, &kit.collaborators, &RetryPolicy::default()).await;
        assert_eq!(result.specialty.status, FieldStatus::NotFound);
        assert_eq!(result.specialty.attempts, 0);
        assert_eq!(kit.registry.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn evidence_keeps_collaborator_response() {
        let kit = collaborators(Script::Mismatch(0.3), Script::Verified(0.8), Script::Verified(0.7));
        let result = validate(&full_input("p1"), &kit.collaborators, &RetryPolicy::default())
            .await;
        assert_eq!(result.phone.status, FieldStatus::Mismatch);
        assert_eq!(result.phone.evidence["service"], "scripted-contact");
        assert_eq!(result.phone.evidence["response"]["status"], "mismatch");
    }
}
