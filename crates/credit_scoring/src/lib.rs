//! Credit Scoring Service
//!
//! Batch inference over raw loan applications: feature derivation,
//! classification against a registered model, and an atomic audit trail of
//! every input and output.

pub mod error;
pub mod pipeline;
pub mod server;

pub use error::ScoringError;
pub use pipeline::{PredictOutcome, ScoringPipeline, StageTimings};
pub use server::{AppState, router};
