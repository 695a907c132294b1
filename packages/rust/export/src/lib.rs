//! Directory export.
//!
//! - JSON: the full [`DirectoryEntry`] array, pretty-printed
//! - CSV: one flat row per entry (see [`CsvRow`])
//! - Outreach: a plain-text notice asking a flagged provider to confirm
//!   their details (see [`outreach_notice`])

mod notice;
mod table;

use std::path::Path;

use provdir_shared::{DirectoryEntry, ProvDirError, Result};
use tracing::info;

pub use notice::{OUTREACH_SIGNATURE, outreach_notice};
pub use table::{CsvRow, csv_rows, write_csv};

/// Serialize entries as a pretty JSON array.
pub fn to_json(entries: &[DirectoryEntry]) -> Result<String> {
    serde_json::to_string_pretty(entries).map_err(|e| ProvDirError::Export(e.to_string()))
}

/// Write entries as a pretty JSON array to `path`.
pub fn write_json_file(path: &Path, entries: &[DirectoryEntry]) -> Result<()> {
    let json = to_json(entries)?;
    std::fs::write(path, json).map_err(|e| ProvDirError::io(path, e))?;
    info!(path = %path.display(), entries = entries.len(), "wrote JSON export");
    Ok(())
}

/// Write entries as CSV to `path`.
pub fn write_csv_file(path: &Path, entries: &[DirectoryEntry]) -> Result<()> {
    let file = std::fs::File::create(path).map_err(|e| ProvDirError::io(path, e))?;
    write_csv(file, entries)?;
    info!(path = %path.display(), entries = entries.len(), "wrote CSV export");
    Ok(())
}
