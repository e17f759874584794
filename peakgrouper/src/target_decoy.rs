//! Target-decoy competition and q-value estimation over two scored
//! candidate match populations.
use thiserror::Error;
use tracing::info;

use crate::model::JointPeakGroupMatch;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FdrError {
    #[error("The decoy population is empty; the false discovery rate is undefined without decoys")]
    EmptyDecoyPopulation,
}

/// A candidate match record the estimator can read a score from and write
/// significance estimates back onto.
pub trait ScoredMatch {
    fn score(&self) -> f64;
    fn set_p_value(&mut self, p_value: f64);
    fn set_q_value(&mut self, q_value: f64);
}

impl ScoredMatch for JointPeakGroupMatch {
    fn score(&self) -> f64 {
        self.ms1_score.unwrap_or(0.0)
    }

    fn set_p_value(&mut self, p_value: f64) {
        self.p_value = Some(p_value);
    }

    fn set_q_value(&mut self, q_value: f64) {
        self.q_value = Some(q_value);
    }
}

/// The decoy/target competition state at one score cutoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Threshold {
    pub score: f64,
    /// Count of target matches scoring at or above `score`.
    pub targets: usize,
    /// Count of decoy matches scoring at or above `score`.
    pub decoys: usize,
    pub ratio: f64,
}

/// Computes count-based decoy/target ratios, per-match p-values, and
/// monotone q-values from two disjoint scored populations.
///
/// Counts at a cutoff are answered from score lists sorted ascending, so
/// each `*_at` query is a binary search rather than a memoized scan.
#[derive(Debug, Clone)]
pub struct TargetDecoyAnalyzer {
    /// Ascending.
    target_scores: Vec<f64>,
    /// Ascending.
    decoy_scores: Vec<f64>,
}

impl TargetDecoyAnalyzer {
    pub fn new(
        mut target_scores: Vec<f64>,
        mut decoy_scores: Vec<f64>,
    ) -> Result<Self, FdrError> {
        if decoy_scores.is_empty() {
            return Err(FdrError::EmptyDecoyPopulation);
        }
        target_scores.sort_by(|a, b| a.total_cmp(b));
        decoy_scores.sort_by(|a, b| a.total_cmp(b));
        Ok(Self {
            target_scores,
            decoy_scores,
        })
    }

    pub fn from_populations<T: ScoredMatch, D: ScoredMatch>(
        targets: &[T],
        decoys: &[D],
    ) -> Result<Self, FdrError> {
        Self::new(
            targets.iter().map(|t| t.score()).collect(),
            decoys.iter().map(|d| d.score()).collect(),
        )
    }

    pub fn target_count(&self) -> usize {
        self.target_scores.len()
    }

    pub fn decoy_count(&self) -> usize {
        self.decoy_scores.len()
    }

    /// Count of target matches with score `>= threshold`.
    pub fn targets_at(&self, threshold: f64) -> usize {
        self.target_scores.len() - self.target_scores.partition_point(|&s| s < threshold)
    }

    /// Count of decoy matches with score `>= threshold`.
    pub fn decoys_at(&self, threshold: f64) -> usize {
        self.decoy_scores.len() - self.decoy_scores.partition_point(|&s| s < threshold)
    }

    /// The decoy-to-target ratio at a cutoff; a cutoff no target reaches
    /// reports a ratio of 1.
    pub fn target_decoy_ratio(&self, cutoff: f64) -> Threshold {
        let targets = self.targets_at(cutoff);
        let decoys = self.decoys_at(cutoff);
        let ratio = if targets == 0 {
            1.0
        } else {
            decoys as f64 / targets as f64
        };
        Threshold {
            score: cutoff,
            targets,
            decoys,
            ratio,
        }
    }

    /// Sweep the distinct observed scores (rounded to two decimal places)
    /// across both populations, keeping the cutoffs whose decoy/target ratio
    /// stays below one half.
    pub fn global_thresholds(&self) -> Vec<Threshold> {
        let mut cutoffs: Vec<f64> = self
            .target_scores
            .iter()
            .chain(self.decoy_scores.iter())
            .map(|s| (s * 100.0).round() / 100.0)
            .collect();
        cutoffs.sort_by(|a, b| a.total_cmp(b));
        cutoffs.dedup();

        cutoffs
            .into_iter()
            .map(|cutoff| self.target_decoy_ratio(cutoff))
            .filter(|threshold| threshold.ratio < 0.5)
            .collect()
    }

    /// Empirical p-value for a target score: the fraction of the decoy
    /// population scoring at least as well. Equal scores share one value.
    pub fn p_value(&self, score: f64) -> f64 {
        self.decoys_at(score) as f64 / self.decoy_scores.len() as f64
    }

    /// Fraction of the targets below the cutoff expected to be false,
    /// extrapolated from the decoy population's shape below the cutoff.
    fn percent_incorrect_targets(&self, cutoff: f64) -> Option<f64> {
        let targets_below = self.target_count() - self.targets_at(cutoff);
        let decoys_below = self.decoy_count() - self.decoys_at(cutoff);
        if decoys_below == 0 {
            return None;
        }
        Some(targets_below as f64 / decoys_below as f64)
    }

    fn raw_q_value(&self, cutoff: f64) -> f64 {
        match self.percent_incorrect_targets(cutoff) {
            Some(pit) => pit * self.target_decoy_ratio(cutoff).ratio,
            // No decoys below the cutoff: not significant, never an error.
            None => 1.0,
        }
    }

    /// q-values for every distinct target score, ascending. Sweeping from
    /// worst score to best, a better score is never assigned a larger
    /// q-value than one already accepted at a strictly lower threshold.
    pub fn q_values(&self) -> Vec<(f64, f64)> {
        let mut distinct = self.target_scores.clone();
        distinct.dedup();

        let mut mapping = Vec::with_capacity(distinct.len());
        let mut last_q_value = f64::INFINITY;
        for threshold in distinct {
            let mut q_value = self.raw_q_value(threshold);
            if last_q_value < q_value {
                q_value = last_q_value;
            }
            last_q_value = q_value;
            mapping.push((threshold, q_value));
        }
        mapping
    }

    /// Assign the computed p-value and q-value to every target record in
    /// place.
    pub fn apply<T: ScoredMatch>(&self, targets: &mut [T]) {
        let q_map = self.q_values();
        for target in targets.iter_mut() {
            let score = target.score();
            target.set_p_value(self.p_value(score));
            let idx = q_map.partition_point(|&(s, _)| s < score);
            if let Some(&(_, q_value)) = q_map.get(idx) {
                target.set_q_value(q_value);
            } else {
                target.set_q_value(1.0);
            }
        }
    }
}

/// Score both populations' competition and persist significance estimates
/// onto the target records. Fatal when no decoys exist.
pub fn assign_significance<T: ScoredMatch, D: ScoredMatch>(
    targets: &mut [T],
    decoys: &[D],
) -> Result<(), FdrError> {
    let analyzer = TargetDecoyAnalyzer::from_populations(targets, decoys)?;
    info!(
        "Computing p-values and q-values over {} targets and {} decoys",
        analyzer.target_count(),
        analyzer.decoy_count()
    );
    analyzer.apply(targets);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Debug, Clone, Default)]
    struct Scored {
        score: f64,
        p_value: Option<f64>,
        q_value: Option<f64>,
    }

    impl Scored {
        fn new(score: f64) -> Self {
            Self {
                score,
                ..Default::default()
            }
        }
    }

    impl ScoredMatch for Scored {
        fn score(&self) -> f64 {
            self.score
        }

        fn set_p_value(&mut self, p_value: f64) {
            self.p_value = Some(p_value);
        }

        fn set_q_value(&mut self, q_value: f64) {
            self.q_value = Some(q_value);
        }
    }

    fn repeat_scores(pairs: &[(f64, usize)]) -> Vec<Scored> {
        pairs
            .iter()
            .flat_map(|&(score, n)| (0..n).map(move |_| Scored::new(score)))
            .collect()
    }

    #[test]
    fn test_empty_decoys_is_fatal() {
        let mut targets = repeat_scores(&[(0.9, 3)]);
        let decoys: Vec<Scored> = Vec::new();
        assert_eq!(
            assign_significance(&mut targets, &decoys),
            Err(FdrError::EmptyDecoyPopulation)
        );
    }

    #[test]
    fn test_p_value_fraction_of_decoys() {
        // 10 decoys, exactly 2 scoring at or above the target's score.
        let targets = repeat_scores(&[(0.7, 1)]);
        let decoys = repeat_scores(&[(0.9, 1), (0.7, 1), (0.3, 8)]);
        let analyzer = TargetDecoyAnalyzer::from_populations(&targets, &decoys).unwrap();
        assert_eq!(analyzer.decoy_count(), 10);
        assert_eq!(analyzer.decoys_at(0.7), 2);
        assert!((analyzer.p_value(0.7) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_ties_share_p_value() {
        let mut targets = repeat_scores(&[(0.7, 3), (0.5, 1)]);
        let decoys = repeat_scores(&[(0.8, 1), (0.4, 4)]);
        assign_significance(&mut targets, &decoys).unwrap();
        let p_values: Vec<f64> = targets.iter().map(|t| t.p_value.unwrap()).collect();
        assert_eq!(p_values[0], p_values[1]);
        assert_eq!(p_values[1], p_values[2]);
        assert!((p_values[0] - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_q_value_monotonic_clamp() {
        // Raw q at 0.5 is lower than raw q at 0.8, so the sweep must clamp
        // the 0.8 cutoff down to the already-accepted smaller value.
        let targets = repeat_scores(&[(0.9, 10), (0.8, 10), (0.5, 10), (0.2, 10)]);
        let decoys = repeat_scores(&[(0.85, 6), (0.6, 2), (0.3, 12)]);
        let analyzer = TargetDecoyAnalyzer::from_populations(&targets, &decoys).unwrap();

        let raw_at_08 = analyzer.raw_q_value(0.8);
        let raw_at_05 = analyzer.raw_q_value(0.5);
        assert!(raw_at_05 < raw_at_08);

        let q_map = analyzer.q_values();
        let q_of = |score: f64| {
            q_map
                .iter()
                .find(|(s, _)| (*s - score).abs() < 1e-9)
                .map(|(_, q)| *q)
                .unwrap()
        };
        assert!((q_of(0.5) - raw_at_05).abs() < 1e-12);
        assert_eq!(q_of(0.8), q_of(0.5));
        assert!(q_of(0.8) < raw_at_08);

        // Traversing from best score to worst, q never decreases.
        for window in q_map.windows(2) {
            let (_, q_worse) = window[0];
            let (_, q_better) = window[1];
            assert!(q_worse >= q_better);
        }
    }

    #[test]
    fn test_zero_divisions_default_to_one() {
        // Every decoy is above every target: percent-incorrect-targets has
        // a zero denominator at the lowest cutoff.
        let targets = repeat_scores(&[(0.4, 2)]);
        let decoys = repeat_scores(&[(0.9, 3)]);
        let analyzer = TargetDecoyAnalyzer::from_populations(&targets, &decoys).unwrap();
        assert_eq!(analyzer.raw_q_value(0.4), 1.0);

        // A cutoff no target reaches reports a ratio of 1.
        assert_eq!(analyzer.target_decoy_ratio(0.95).ratio, 1.0);
    }

    #[test]
    fn test_global_thresholds_filters_high_ratios() {
        let targets = repeat_scores(&[(0.9, 20), (0.2, 2)]);
        let decoys = repeat_scores(&[(0.9, 1), (0.2, 20)]);
        let analyzer = TargetDecoyAnalyzer::from_populations(&targets, &decoys).unwrap();
        let thresholds = analyzer.global_thresholds();
        // Only the stringent cutoff survives the ratio < 0.5 filter.
        assert_eq!(thresholds.len(), 1);
        assert_eq!(thresholds[0].score, 0.9);
        assert_eq!(thresholds[0].targets, 20);
        assert_eq!(thresholds[0].decoys, 1);
    }

    #[test]
    fn test_apply_sets_both_estimates() {
        let mut targets = repeat_scores(&[(0.9, 5), (0.6, 5)]);
        let decoys = repeat_scores(&[(0.7, 2), (0.2, 8)]);
        assign_significance(&mut targets, &decoys).unwrap();
        assert!(targets.iter().all(|t| t.p_value.is_some()));
        assert!(targets.iter().all(|t| t.q_value.is_some()));
    }
}
