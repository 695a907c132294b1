//! External collaborator contracts and concrete providers.
//!
//! The pipeline only talks to collaborators through the traits defined here:
//! - [`ContactValidator`]: phone and address validation
//! - [`RegistryLookup`]: license/registry lookup
//! - [`DocumentExtractor`]: credential document extraction
//!
//! Concrete implementations:
//! - [`LocalContactValidator`]: offline format/normalisation checks
//! - [`NppesRegistry`]: the public NPI registry over HTTP
//! - [`StaticRegistry`]: in-memory registry snapshot
//! - [`TextDocumentExtractor`]: heuristic plain-text extraction

pub mod extraction;
pub mod local;
pub mod registry;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use provdir_shared::{FieldStatus, LicenseStatus, Result, SourceDocument};

pub use extraction::TextDocumentExtractor;
pub use local::LocalContactValidator;
pub use registry::{NppesRegistry, RegistryRecord, StaticRegistry};

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// Address validation response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressCheck {
    pub status: FieldStatus,
    pub normalized_address: Option<String>,
    pub confidence: f64,
}

/// Phone validation response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoneCheck {
    pub status: FieldStatus,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized: Option<String>,
}

/// What the pipeline asks the registry about a provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistryQuery<'a> {
    pub license_id: &'a str,
    pub name: &'a str,
    /// Claimed specialty to match against registered taxonomies.
    pub specialty: Option<&'a str>,
}

/// Registry lookup response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryMatch {
    pub status: FieldStatus,
    pub specialty_confidence: f64,
    pub license_status: LicenseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registered_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub registered_specialties: Vec<String>,
}

impl RegistryMatch {
    /// Response for a license the registry does not know.
    pub fn not_found() -> Self {
        Self {
            status: FieldStatus::NotFound,
            specialty_confidence: 0.0,
            license_status: LicenseStatus::Unknown,
            registered_name: None,
            registered_specialties: Vec::new(),
        }
    }
}

/// Document extraction response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    #[serde(default)]
    pub education: Vec<String>,
    #[serde(default)]
    pub certifications: Vec<String>,
    #[serde(default)]
    pub affiliations: Vec<String>,
    /// Set when only part of the document could be read.
    #[serde(default)]
    pub incomplete: bool,
    /// Extractor's confidence in the values it returned.
    pub confidence: f64,
}

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// Phone/address validation capability. Calls must be idempotent and safe
/// to retry.
#[async_trait]
pub trait ContactValidator: Send + Sync {
    /// Short service name used in evidence and error messages.
    fn name(&self) -> &str;

    async fn validate_address(&self, address: &str) -> Result<AddressCheck>;

    async fn validate_phone(&self, phone: &str) -> Result<PhoneCheck>;
}

/// License/registry lookup capability.
#[async_trait]
pub trait RegistryLookup: Send + Sync {
    fn name(&self) -> &str;

    async fn lookup_provider(&self, query: &RegistryQuery<'_>) -> Result<RegistryMatch>;
}

/// Credential document extraction capability.
#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    fn name(&self) -> &str;

    async fn extract(&self, document: &SourceDocument) -> Result<Extraction>;
}

/// The set of collaborators one pipeline instance talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub contact: Arc<dyn ContactValidator>,
    pub registry: Arc<dyn RegistryLookup>,
    pub extractor: Arc<dyn DocumentExtractor>,
}

impl Collaborators {
    pub fn new(
        contact: Arc<dyn ContactValidator>,
        registry: Arc<dyn RegistryLookup>,
        extractor: Arc<dyn DocumentExtractor>,
    ) -> Self {
        Self {
            contact,
            registry,
            extractor,
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("contact", &self.contact.name())
            .field("registry", &self.registry.name())
            .field("extractor", &self.extractor.name())
            .finish()
    }
}
