//! Enrichment stage: derives education, certifications, and affiliations
//! from a provider's source documents.
//!
//! The stage never fails. An extractor error marks the result incomplete and
//! the record moves on to scoring with whatever was gathered.

use tracing::{debug, instrument, warn};

use provdir_services::{DocumentExtractor, Extraction};
use provdir_shared::{
    AttributeKind, EnrichedAttribute, EnrichmentResult, ProviderInput, sanitize_confidence,
};

fn merge_extraction(result: &mut EnrichmentResult, source: &str, extraction: Extraction) {
    let confidence = sanitize_confidence(extraction.confidence);
    let lists = [
        (AttributeKind::Education, extraction.education),
        (AttributeKind::Certification, extraction.certifications),
        (AttributeKind::Affiliation, extraction.affiliations),
    ];

    for (kind, values) in lists {
        for value in values {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            // Same value from several documents: keep the most confident.
            match result
                .attributes
                .iter_mut()
                .find(|a| a.kind == kind && a.value.eq_ignore_ascii_case(value))
            {
                Some(existing) if existing.source_confidence < confidence => {
                    existing.source_confidence = confidence;
                    existing.source = source.to_string();
                }
                Some(_) => {}
                None => result.attributes.push(EnrichedAttribute {
                    kind,
                    value: value.to_string(),
                    source_confidence: confidence,
                    source: source.to_string(),
                }),
            }
        }
    }

    if extraction.incomplete {
        result.incomplete = true;
    }
}

/// Run the enrichment stage for one provider.
#[instrument(skip_all, fields(provider = %input.id, documents = input.documents.len()))]
pub async fn enrich(input: &ProviderInput, extractor: &dyn DocumentExtractor) -> EnrichmentResult {
    let mut result = EnrichmentResult::default();

    for document in &input.documents {
        match extractor.extract(document).await {
            Ok(extraction) => {
                result.documents_processed += 1;
                merge_extraction(&mut result, &document.name, extraction);
            }
            Err(e) => {
                warn!(document = %document.name, error = %e, "extraction failed");
                result.documents_failed += 1;
                result.incomplete = true;
            }
        }
    }

    debug!(
        attributes = result.attributes.len(),
        incomplete = result.incomplete,
        completeness = result.completeness(),
        "enrichment finished"
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    use provdir_services::TextDocumentExtractor;
    use provdir_shared::{SourceDocument, StageOutcome};

    use crate::testkit::{complete_cv, full_input};

    fn doc(name: &str, text: &str) -> SourceDocument {
        SourceDocument {
            name: name.into(),
            text: text.into(),
        }
    }

    #[tokio::test]
    async fn complete_cv_covers_every_kind() {
        let result = enrich(&full_input("p1"), &TextDocumentExtractor::new()).await;
        assert_eq!(result.completeness(), 1.0);
        assert_eq!(result.outcome(), StageOutcome::Success);
        assert_eq!(result.documents_processed, 1);
        assert!(result.attributes.iter().all(|a| a.source == "cv.txt"));
    }

    #[tokio::test]
    async fn failed_document_marks_incomplete_but_keeps_others() {
        let mut input = full_input("p1");
        input.documents.push(doc("blank.pdf", "   "));

        let result = enrich(&input, &TextDocumentExtractor::new()).await;
        assert!(result.incomplete);
        assert_eq!(result.documents_processed, 1);
        assert_eq!(result.documents_failed, 1);
        assert_eq!(result.of_kind(AttributeKind::Education).count(), 1);
        assert_eq!(result.completeness(), 0.5);
        assert_eq!(result.outcome(), StageOutcome::Partial);
    }

    #[tokio::test]
    async fn no_documents_is_a_valid_empty_result() {
        let mut input = full_input("p1");
        input.documents.clear();

        let result = enrich(&input, &TextDocumentExtractor::new()).await;
        assert!(result.attributes.is_empty());
        assert!(!result.incomplete);
        assert_eq!(result.completeness(), 0.0);
    }

    #[tokio::test]
    async fn duplicate_values_merge_across_documents() {
        let mut input = full_input("p1");
        input.documents = vec![complete_cv(), doc("board.txt", "Board Certified, Internal Medicine")];

        let result = enrich(&input, &TextDocumentExtractor::new()).await;
        assert_eq!(result.of_kind(AttributeKind::Certification).count(), 1);
        assert_eq!(result.documents_processed, 2);
    }
}
