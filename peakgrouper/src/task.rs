//! The narrow contract pipeline components expose to orchestration.
use thiserror::Error;
use tracing::info;

use crate::logistic::ScoringError;
use crate::store::StoreError;
use crate::target_decoy::FdrError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Scoring(#[from] ScoringError),
    #[error(transparent)]
    Fdr(#[from] FdrError),
    #[error("Failed to build the worker pool: {0}")]
    WorkerPool(String),
}

/// A pipeline stage with a `run` entry point, idempotent with respect to a
/// freshly cleared working partition.
pub trait PipelineTask {
    fn name(&self) -> &'static str;

    fn run(&mut self) -> Result<(), PipelineError>;

    /// Emit a coarse lifecycle event for an external logging or UI layer.
    fn inform(&self, message: &str) {
        info!("{}: {}", self.name(), message);
    }
}
