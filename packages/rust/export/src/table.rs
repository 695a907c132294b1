use std::io::Write;

use serde::Serialize;

use provdir_shared::{DirectoryEntry, FieldValidation, LicenseStatus, ProvDirError, Result};

/// One flat CSV row per directory entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CsvRow {
    pub provider_id: String,
    pub name: String,
    pub phone: String,
    /// Normalized address when validation produced one, the raw input otherwise.
    pub address: String,
    pub specialty: String,
    pub license_number: String,
    pub phone_status: &'static str,
    pub phone_confidence: f64,
    pub address_status: &'static str,
    pub address_confidence: f64,
    pub specialty_status: &'static str,
    pub specialty_confidence: f64,
    pub license_status: &'static str,
    pub enrichment_completeness: f64,
    pub confidence_score: f64,
    pub risk_level: &'static str,
    /// `kind:field` flags joined with `;`.
    pub flags: String,
    pub needs_manual_review: bool,
    pub fingerprint: String,
}

fn license_label(status: LicenseStatus) -> &'static str {
    match status {
        LicenseStatus::Active => "active",
        LicenseStatus::Inactive => "inactive",
        LicenseStatus::Unknown => "unknown",
    }
}

impl From<&DirectoryEntry> for CsvRow {
    fn from(entry: &DirectoryEntry) -> Self {
        let v = &entry.validation;
        let status = |fv: &FieldValidation| fv.status.as_str();
        Self {
            provider_id: entry.provider_id.to_string(),
            name: entry.name.clone(),
            phone: entry.phone.clone().unwrap_or_default(),
            address: v
                .normalized_address
                .clone()
                .or_else(|| entry.address.clone())
                .unwrap_or_default(),
            specialty: entry.specialty.clone().unwrap_or_default(),
            license_number: entry.license_number.clone().unwrap_or_default(),
            phone_status: status(&v.phone),
            phone_confidence: v.phone.confidence,
            address_status: status(&v.address),
            address_confidence: v.address.confidence,
            specialty_status: status(&v.specialty),
            specialty_confidence: v.specialty.confidence,
            license_status: license_label(v.license_status),
            enrichment_completeness: entry.enrichment.completeness(),
            confidence_score: entry.assessment.confidence_score,
            risk_level: entry.assessment.risk_level.as_str(),
            flags: entry
                .assessment
                .flags
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(";"),
            needs_manual_review: entry.assessment.needs_manual_review(),
            fingerprint: entry.fingerprint.clone(),
        }
    }
}

pub fn csv_rows(entries: &[DirectoryEntry]) -> Vec<CsvRow> {
    entries.iter().map(CsvRow::from).collect()
}

/// Write entries as CSV with a header row.
pub fn write_csv<W: Write>(writer: W, entries: &[DirectoryEntry]) -> Result<()> {
    let export_err = |e: csv::Error| ProvDirError::Export(e.to_string());
    let mut writer = csv::Writer::from_writer(writer);
    for row in csv_rows(entries) {
        writer.serialize(row).map_err(export_err)?;
    }
    writer
        .flush()
        .map_err(|e| ProvDirError::Export(format!("failed flushing CSV: {e}")))?;
    Ok(())
}
