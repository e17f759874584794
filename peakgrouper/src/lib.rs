//! Assemble deconvoluted MS1 peak groups into candidate identifications and
//! estimate their statistical significance.
//!
//! The pipeline runs in three stages over the working partition of one
//! hypothesis-sample match:
//!
//! 1. [`grouping`] clusters unmatched peak groups whose masses are related
//!    by combinations of configured mass shifts, and [`merge`] collapses
//!    each cluster into a single joint record.
//! 2. [`classify`] fits a logistic model ([`logistic`]) over engineered
//!    features of the joint records and assigns each one a calibrated
//!    match-confidence score.
//! 3. [`target_decoy`] competes a scored target population against a decoy
//!    population to attach p-values and monotone q-values.
pub mod math;
pub mod model;
pub mod store;
pub mod grouping;
pub mod merge;
pub mod logistic;
pub mod classify;
pub mod target_decoy;
pub mod task;

pub use classify::{ClassifierParams, PeakGroupClassifier, TargetDecoyTask};
pub use model::{
    HypothesisSampleMatch, JointPeakGroupMatch, MassShift, MassShiftMap, PeakGroup,
    PeakGroupMatch, ScoringModelRecord,
};
pub use store::PeakGroupStore;
pub use task::{PipelineError, PipelineTask};
