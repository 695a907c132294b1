//! Quality Scoring Engine.
//!
//! This crate provides:
//! - [`ScoringEngine`]: confidence aggregation, flags, and risk classification
//! - [`priority`]: manual review queue ranking over scored entries

pub mod engine;
pub mod priority;

pub use engine::{ScoringEngine, WEIGHT_TOLERANCE};
pub use priority::{ReviewItem, priority_category, rank_for_review, raw_priority};
