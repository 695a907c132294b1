use std::fmt::Write;

use provdir_shared::DirectoryEntry;

pub const OUTREACH_SIGNATURE: &str = "Provider Data Quality Team";

/// Plain-text notice asking a provider to confirm their directory details.
pub fn outreach_notice(entry: &DirectoryEntry) -> String {
    let assessment = &entry.assessment;
    let mut body = String::new();

    // Writing into a String cannot fail.
    let _ = writeln!(body, "Dear {},", entry.name);
    body.push('\n');
    let _ = writeln!(
        body,
        "During a routine quality review of our provider directory, your profile \
         (ID: {}) was flagged as {}-risk because of data inconsistencies.",
        entry.provider_id, assessment.risk_level
    );
    body.push('\n');
    let _ = writeln!(
        body,
        "Our automated checks recorded an overall confidence score of {:.1}% for your entry.",
        assessment.confidence_score * 100.0
    );

    if !assessment.flags.is_empty() {
        let flags: Vec<String> = assessment.flags.iter().map(ToString::to_string).collect();
        let _ = writeln!(body, "Items needing attention: {}.", flags.join(", "));
    }

    body.push('\n');
    body.push_str(
        "Please confirm your current practice address, contact number, specialty \
         and license information.\n",
    );
    body.push_str(
        "You can reply to this message with corrected details or upload updated \
         documents through the provider portal.\n",
    );
    body.push('\n');
    let _ = write!(body, "Regards,\n{OUTREACH_SIGNATURE}");
    body
}
