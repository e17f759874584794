//! The MS1 classification pipeline: transfer raw peak groups into a working
//! partition, merge mass-shift-consistent clusters at scale, impute
//! population trends, and assign calibrated match-confidence scores.
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use mzpeaks::Tolerance;
use nalgebra::DMatrix;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::grouping::ShiftGroupingIter;
use crate::logistic::{LogisticModelScorer, MatchScorer};
use crate::math::linear_regression;
use crate::merge::{merge_groups, DEFAULT_MINIMUM_ABUNDANCE_RATIO};
use crate::model::{
    HypothesisSampleMatchId, JointPeakGroupMatch, MatchId, PeakGroupMatch, SampleRunId,
    ScoringModelRecord,
};
use crate::store::{PeakGroupStore, StoreError};
use crate::task::{PipelineError, PipelineTask};

/// Number of clusters handed to one worker at a time.
pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_WORKER_COUNT: usize = 4;
const PROGRESS_INTERVAL: usize = 1000;

/// The fixed feature vector the scoring model consumes, one row per joint
/// record.
pub const FEATURE_NAMES: [&str; 8] = [
    "charge_state_count",
    "scan_density",
    "modification_state_count",
    "total_volume",
    "a_peak_intensity_error",
    "centroid_scan_error",
    "scan_count",
    "average_signal_to_noise",
];

#[derive(Debug, Clone)]
pub struct ClassifierParams {
    pub match_tolerance: Tolerance,
    pub minimum_abundance_ratio: f64,
    pub batch_size: usize,
    pub n_workers: usize,
    /// Score with a stored coefficient record instead of fitting against
    /// this scope's matched/unmatched labels.
    pub use_stored_coefficients: bool,
}

impl Default for ClassifierParams {
    fn default() -> Self {
        Self {
            match_tolerance: Tolerance::PPM(20.0),
            minimum_abundance_ratio: DEFAULT_MINIMUM_ABUNDANCE_RATIO,
            batch_size: DEFAULT_BATCH_SIZE,
            n_workers: DEFAULT_WORKER_COUNT,
            use_stored_coefficients: false,
        }
    }
}

/// Drives one hypothesis-sample match's peak groups through transfer,
/// cluster merging, trend estimation, and logistic scoring.
#[derive(Debug)]
pub struct PeakGroupClassifier {
    store: Arc<PeakGroupStore>,
    sample_run_id: SampleRunId,
    hypothesis_sample_match_id: HypothesisSampleMatchId,
    params: ClassifierParams,
    classifier: Option<LogisticModelScorer>,
}

/// Merge each cluster of one batch and commit the results in one store
/// write. A cluster whose ids resolve to no records is logged and skipped
/// rather than aborting the batch.
fn merge_batch(
    store: &PeakGroupStore,
    batch: &[Vec<MatchId>],
    minimum_abundance_ratio: f64,
) -> usize {
    let mut results = Vec::with_capacity(batch.len());
    for cluster_ids in batch {
        let members = store.fetch_matches(cluster_ids);
        if members.is_empty() {
            warn!(
                "A cluster of {} ids resolved to no working records; skipping",
                cluster_ids.len()
            );
            continue;
        }
        if let Some(result) = merge_groups(&members, minimum_abundance_ratio) {
            results.push(result);
        }
    }
    store.insert_joint_batch(results)
}

impl PeakGroupClassifier {
    pub fn new(
        store: Arc<PeakGroupStore>,
        sample_run_id: SampleRunId,
        hypothesis_sample_match_id: HypothesisSampleMatchId,
        params: ClassifierParams,
    ) -> Self {
        Self {
            store,
            sample_run_id,
            hypothesis_sample_match_id,
            params,
            classifier: None,
        }
    }

    pub fn classifier(&self) -> Option<&LogisticModelScorer> {
        self.classifier.as_ref()
    }

    /// The fitted coefficients by feature name, empty before scoring.
    pub fn coefficients(&self) -> Vec<(&'static str, f64)> {
        let Some(coefficients) = self
            .classifier
            .as_ref()
            .and_then(|c| c.coefficients.as_ref())
        else {
            return Vec::new();
        };
        FEATURE_NAMES
            .iter()
            .zip(coefficients.iter().skip(1))
            .map(|(name, value)| (*name, *value))
            .collect()
    }

    /// Copy this sample run's raw peak groups into the working partition as
    /// unmatched records, leaving the upstream search's matched records in
    /// place. Fails fast when the scope has no matched records at all.
    pub fn transfer_peak_groups(&self) -> Result<usize, PipelineError> {
        let scope = self.hypothesis_sample_match_id;
        let claimed: HashSet<_> = self
            .store
            .matched_peak_group_ids(scope)
            .into_iter()
            .collect();
        if claimed.is_empty() {
            return Err(StoreError::EmptyScope(scope).into());
        }

        let mut transferred = 0usize;
        for group in self.store.peak_groups_for_run(self.sample_run_id) {
            if claimed.contains(&group.id) {
                continue;
            }
            self.store
                .insert_match(PeakGroupMatch::from_peak_group(&group, scope, None));
            transferred += 1;
        }
        debug!("Transferred {transferred} unmatched peak groups into scope {scope}");
        Ok(transferred)
    }

    /// Batches of matched record ids, grouped by shared theoretical
    /// composition.
    fn matched_id_batches(&self) -> Vec<Vec<Vec<MatchId>>> {
        let groups = self.store.matched_id_groups(self.hypothesis_sample_match_id);
        groups
            .chunks(self.params.batch_size)
            .map(|chunk| chunk.to_vec())
            .collect()
    }

    /// Run the mass-shift grouping over the unmatched pool, persist the
    /// accepted shift attributions, and return the clusters as id batches.
    fn unmatched_id_batches(&self) -> Result<Vec<Vec<Vec<MatchId>>>, PipelineError> {
        let scope = self.hypothesis_sample_match_id;
        let unmatched = self.store.unmatched_matches_desc(scope);
        if unmatched.is_empty() {
            return Ok(Vec::new());
        }
        let shift_map = self
            .store
            .hypothesis_sample_match(scope)?
            .mass_shift_map()
            .unwrap_or_default();

        let mut clusters: Vec<Vec<MatchId>> = Vec::new();
        let mut applied_shifts = Vec::new();
        for cluster in ShiftGroupingIter::new(unmatched, shift_map, self.params.match_tolerance) {
            for member in &cluster {
                if let Some(shift) = &member.mass_shift {
                    applied_shifts.push((member.id, shift.clone()));
                }
            }
            clusters.push(cluster.into_iter().map(|m| m.id).collect());
        }
        self.store.set_mass_shifts(&applied_shifts);

        Ok(clusters
            .chunks(self.params.batch_size)
            .map(|chunk| chunk.to_vec())
            .collect())
    }

    fn merge_batches(&self, batches: Vec<Vec<Vec<MatchId>>>) -> Result<usize, PipelineError> {
        let store = &self.store;
        let ratio = self.params.minimum_abundance_ratio;
        let counter = AtomicUsize::new(0);
        let reported = AtomicUsize::new(0);

        let tally = |increment: usize| {
            let total = counter.fetch_add(increment, Ordering::AcqRel) + increment;
            // Best-effort progress; exactness is not required across workers.
            if total - reported.load(Ordering::Acquire) >= PROGRESS_INTERVAL {
                reported.store(total, Ordering::Release);
                info!("{total} groups merged");
            }
            increment
        };

        let merged = if self.params.n_workers > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.params.n_workers)
                .build()
                .map_err(|e| PipelineError::WorkerPool(e.to_string()))?;
            pool.install(|| {
                batches
                    .into_par_iter()
                    .map(|batch| tally(merge_batch(store, &batch, ratio)))
                    .sum()
            })
        } else {
            batches
                .into_iter()
                .map(|batch| tally(merge_batch(store, &batch, ratio)))
                .sum()
        };
        Ok(merged)
    }

    /// Merge matched groups by shared composition, then shift-consistent
    /// unmatched clusters, across the worker pool.
    pub fn create_joins(&self) -> Result<usize, PipelineError> {
        let concurrency = if self.params.n_workers > 1 {
            "Concurrent"
        } else {
            "Sequential"
        };

        self.inform(&format!("Merging Matched ({concurrency})"));
        let mut merged = self.merge_batches(self.matched_id_batches())?;

        self.inform(&format!("Merging Unmatched ({concurrency})"));
        merged += self.merge_batches(self.unmatched_id_batches()?)?;
        Ok(merged)
    }

    /// Impute the global trend for centroid scan position and isotope ratio
    /// against mass, then store each joint record's absolute deviation from
    /// the trend.
    pub fn estimate_trends(&self) -> Result<(), PipelineError> {
        let scope = self.hypothesis_sample_match_id;
        let joints = self.store.joint_matches_for(scope);
        if joints.is_empty() {
            return Ok(());
        }
        info!("Estimating peak trends over {} joint groups", joints.len());

        let masses: Vec<f64> = joints.iter().map(|j| j.weighted_monoisotopic_mass).collect();
        let centroids: Vec<f64> = joints.iter().map(|j| j.centroid_scan_estimate).collect();
        let ratios: Vec<f64> = joints
            .iter()
            .map(|j| j.average_a_to_a_plus_2_ratio)
            .collect();

        let (cen_alpha, cen_beta) = linear_regression(&masses, &centroids);
        let (a_alpha, a_beta) = linear_regression(&masses, &ratios);

        self.store.update_joint_matches(scope, |joint| {
            let mass = joint.weighted_monoisotopic_mass;
            joint.centroid_scan_error =
                Some((joint.centroid_scan_estimate - (cen_alpha + cen_beta * mass)).abs());
            joint.a_peak_intensity_error =
                Some((joint.average_a_to_a_plus_2_ratio - (a_alpha + a_beta * mass)).abs());
        });
        Ok(())
    }

    fn feature_row(joint: &JointPeakGroupMatch) -> [f64; 8] {
        [
            joint.charge_state_count as f64,
            joint.scan_density,
            joint.modification_state_count as f64,
            joint.total_volume,
            joint.a_peak_intensity_error.unwrap_or(f64::NAN),
            joint.centroid_scan_error.unwrap_or(f64::NAN),
            joint.scan_count as f64,
            joint.average_signal_to_noise,
        ]
    }

    /// Fit (or load) the logistic model and write a calibrated `ms1_score`
    /// onto every joint record of the scope.
    pub fn fit_and_score(&mut self) -> Result<(), PipelineError> {
        let scope = self.hypothesis_sample_match_id;
        let joints = self.store.joint_matches_for(scope);
        if joints.is_empty() {
            warn!("No joint peak groups to score in scope {scope}");
            return Ok(());
        }

        let rows: Vec<[f64; 8]> = joints.iter().map(Self::feature_row).collect();
        let features = DMatrix::from_fn(rows.len(), FEATURE_NAMES.len(), |r, c| rows[r][c]);

        let classifier = if self.params.use_stored_coefficients {
            let record = self
                .store
                .scoring_model(ScoringModelRecord::GENERIC_MODEL_NAME)?;
            LogisticModelScorer::from_scoring_model(&record)
        } else {
            // Rows carrying undefined error terms are left out of the fit
            // but still scored below.
            let keep: Vec<usize> = rows
                .iter()
                .enumerate()
                .filter(|(_, row)| row.iter().all(|v| v.is_finite()))
                .map(|(i, _)| i)
                .collect();
            let train = DMatrix::from_fn(keep.len(), FEATURE_NAMES.len(), |r, c| {
                rows[keep[r]][c]
            });
            let labels: Vec<bool> = keep.iter().map(|&i| joints[i].matched).collect();
            let mut scorer = LogisticModelScorer::new();
            scorer.fit(&train, &labels)?;
            scorer
        };

        let scores = classifier.predict_proba(&features);
        let updates: Vec<_> = joints
            .iter()
            .zip(scores.iter())
            .map(|(joint, &score)| (joint.id, score))
            .collect();
        self.store.set_ms1_scores(&updates);
        self.classifier = Some(classifier);
        Ok(())
    }
}

impl PipelineTask for PeakGroupClassifier {
    fn name(&self) -> &'static str {
        "peak-group-classifier"
    }

    fn run(&mut self) -> Result<(), PipelineError> {
        self.inform("Clearing working partition");
        self.store
            .clear_working_partition(self.hypothesis_sample_match_id);
        self.inform("Transferring peak groups");
        self.transfer_peak_groups()?;
        self.inform("Creating joins");
        let merged = self.create_joins()?;
        info!("{merged} joint groups created");
        self.inform("Estimating trends");
        self.estimate_trends()?;
        self.inform("Fitting and scoring");
        self.fit_and_score()
    }
}

/// Runs the target-decoy competition between two scored scopes and persists
/// p-values and q-values onto the target scope's joint records.
#[derive(Debug)]
pub struct TargetDecoyTask {
    store: Arc<PeakGroupStore>,
    target_id: HypothesisSampleMatchId,
    decoy_id: HypothesisSampleMatchId,
}

impl TargetDecoyTask {
    pub fn new(
        store: Arc<PeakGroupStore>,
        target_id: HypothesisSampleMatchId,
        decoy_id: HypothesisSampleMatchId,
    ) -> Self {
        Self {
            store,
            target_id,
            decoy_id,
        }
    }
}

impl PipelineTask for TargetDecoyTask {
    fn name(&self) -> &'static str {
        "target-decoy-analyzer"
    }

    fn run(&mut self) -> Result<(), PipelineError> {
        let mut targets = self.store.joint_matches_for(self.target_id);
        let decoys = self.store.joint_matches_for(self.decoy_id);
        crate::target_decoy::assign_significance(&mut targets, &decoys)?;

        let estimates: Vec<_> = targets
            .iter()
            .filter_map(|joint| {
                joint
                    .p_value
                    .zip(joint.q_value)
                    .map(|(p, q)| (joint.id, p, q))
            })
            .collect();
        self.store.set_significance(&estimates);
        Ok(())
    }
}
