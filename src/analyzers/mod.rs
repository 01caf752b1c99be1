//! Validator results analysis.
//!
//! Reads the `*.results.json` files the validator left next to each feed,
//! drops ignored codes, and consolidates what remains into an
//! [`AnalysisOutput`](types::AnalysisOutput) with per-feed grades, per-code
//! summaries and rankings.

pub mod aggregate;
pub mod analyzer;
pub mod diagnostics;
pub mod grade;
pub mod types;
