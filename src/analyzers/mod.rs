//! Reconciliation-driven delay analysis.
//!
//! Matched trip updates are collapsed to one record per scheduled trip,
//! aggregated per route, joined with route metadata and written as the
//! current on-time performance of each agency. Results can be uploaded
//! as JSON to S3.

pub mod aggregate;
pub mod analyzer;
pub mod diagnostics;
pub mod publish;
pub mod score;
pub mod types;
pub mod utility;

pub use analyzer::{AgencyRun, Pipeline, RunReport};
