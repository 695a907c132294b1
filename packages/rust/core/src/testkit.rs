//! Scripted collaborators for stage, orchestrator, and batch tests.

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use provdir_services::{
    AddressCheck, Collaborators, ContactValidator, PhoneCheck, RegistryLookup, RegistryMatch,
    RegistryQuery, TextDocumentExtractor,
};
use provdir_shared::{
    FieldStatus, LicenseStatus, PermanentKind, ProvDirError, ProviderInput, Result,
    SourceDocument,
};

/// Phone numbers containing this marker never answer.
pub const HANG_MARKER: &str = "HANG";

#[derive(Debug, Clone, Copy)]
pub enum Script {
    Verified(f64),
    Mismatch(f64),
    NotFound,
    Transient,
    Permanent,
}

impl Script {
    fn reply(self, service: &str) -> Result<(FieldStatus, f64)> {
        match self {
            Script::Verified(c) => Ok((FieldStatus::Verified, c)),
            Script::Mismatch(c) => Ok((FieldStatus::Mismatch, c)),
            Script::NotFound => Ok((FieldStatus::NotFound, 0.0)),
            Script::Transient => Err(ProvDirError::transient(service, "503 service unavailable")),
            Script::Permanent => Err(ProvDirError::permanent(
                service,
                PermanentKind::InvalidInput,
                "malformed value",
            )),
        }
    }
}

pub struct ScriptedContact {
    phone: Script,
    address: Script,
    pub delay: Duration,
    pub phone_calls: AtomicU32,
    pub address_calls: AtomicU32,
    /// Phone numbers in the order validation was requested.
    pub phones_seen: Mutex<Vec<String>>,
}

#[async_trait]
impl ContactValidator for ScriptedContact {
    fn name(&self) -> &str {
        "scripted-contact"
    }

    async fn validate_address(&self, _address: &str) -> Result<AddressCheck> {
        self.address_calls.fetch_add(1, Ordering::SeqCst);
        let (status, confidence) = self.address.reply(self.name())?;
        Ok(AddressCheck {
            status,
            normalized_address: status
                .has_evidence()
                .then(|| "100 Main St, Seattle, WA 98101".to_string()),
            confidence,
        })
    }

    async fn validate_phone(&self, phone: &str) -> Result<PhoneCheck> {
        self.phone_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.phones_seen.lock() {
            seen.push(phone.to_string());
        }
        if phone.contains(HANG_MARKER) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        } else if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let (status, confidence) = self.phone.reply(self.name())?;
        Ok(PhoneCheck {
            status,
            confidence,
            normalized: None,
        })
    }
}

pub struct ScriptedRegistry {
    specialty: Script,
    pub license_status: LicenseStatus,
    pub calls: AtomicU32,
}

#[async_trait]
impl RegistryLookup for ScriptedRegistry {
    fn name(&self) -> &str {
        "scripted-registry"
    }

    async fn lookup_provider(&self, query: &RegistryQuery<'_>) -> Result<RegistryMatch> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (status, specialty_confidence) = self.specialty.reply(self.name())?;
        if status == FieldStatus::NotFound {
            return Ok(RegistryMatch::not_found());
        }
        Ok(RegistryMatch {
            status,
            specialty_confidence,
            license_status: self.license_status,
            registered_name: Some(query.name.to_string()),
            registered_specialties: query.specialty.map(str::to_string).into_iter().collect(),
        })
    }
}

pub struct Kit {
    pub collaborators: Collaborators,
    pub contact: Arc<ScriptedContact>,
    pub registry: Arc<ScriptedRegistry>,
}

pub fn collaborators(phone: Script, address: Script, specialty: Script) -> Kit {
    collaborators_with_delay(phone, address, specialty, Duration::ZERO)
}

pub fn collaborators_with_delay(
    phone: Script,
    address: Script,
    specialty: Script,
    delay: Duration,
) -> Kit {
    let contact = Arc::new(ScriptedContact {
        phone,
        address,
        delay,
        phone_calls: AtomicU32::new(0),
        address_calls: AtomicU32::new(0),
        phones_seen: Mutex::new(Vec::new()),
    });
    let registry = Arc::new(ScriptedRegistry {
        specialty,
        license_status: LicenseStatus::Active,
        calls: AtomicU32::new(0),
    });
    Kit {
        collaborators: Collaborators::new(
            contact.clone(),
            registry.clone(),
            Arc::new(TextDocumentExtractor::new()),
        ),
        contact,
        registry,
    }
}

/// A CV that covers education, certification, and affiliation.
pub fn complete_cv() -> SourceDocument {
    SourceDocument {
        name: "cv.txt".into(),
        text: "Education:\n- University of Washington School of Medicine\n\
               Certifications:\n- Board Certified, Internal Medicine\n\
               Affiliations:\n- Harborview Medical Center\n"
            .into(),
    }
}

pub fn full_input(id: &str) -> ProviderInput {
    ProviderInput {
        id: id.into(),
        name: "Dr. Maya Chen".into(),
        phone: Some("(206) 555-0142".into()),
        address: Some("100 main st, seattle, wa 98101".into()),
        specialty: Some("Internal Medicine".into()),
        license_number: Some("1234567893".into()),
        documents: vec![complete_cv()],
    }
}
