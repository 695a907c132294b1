//! Pipeline orchestration for the provider directory.
//!
//! Each provider record moves through Validation → Enrichment → Scoring →
//! Assembly under the [`Orchestrator`]; the [`BatchEngine`] runs many records
//! concurrently with a bounded worker count and per-record timeouts.

pub mod assembler;
pub mod batch;
pub mod enrichment;
pub mod pipeline;
pub mod retry;
pub mod validation;

#[cfg(test)]
mod testkit;

pub use assembler::{assemble, verify_fingerprint};
pub use batch::{BatchEngine, BatchHandle, BatchOptions, BatchProgress, BatchReport};
pub use enrichment::enrich;
pub use pipeline::Orchestrator;
pub use retry::{Attempted, RetryPolicy};
pub use validation::validate;
