//! Value records for the peak grouping and classification pipeline.
//!
//! These are plain structs mirroring the rows held by the persistence
//! collaborator. All cross-record relations are explicit id references
//! resolved through [`crate::store::PeakGroupStore`].
use serde::{Deserialize, Serialize};

pub type PeakGroupId = u64;
pub type MatchId = u64;
pub type JointMatchId = u64;
pub type CompositionId = u64;
pub type SampleRunId = u64;
pub type HypothesisSampleMatchId = u64;

/// The per-scan membership of a peak group: parallel arrays of peak ids,
/// their intensities, the scan times they were observed at, and any charge
/// states reported for them.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakData {
    pub peak_ids: Vec<u64>,
    pub intensities: Vec<f32>,
    pub scan_times: Vec<u32>,
    #[serde(default)]
    pub charge_states: Vec<i32>,
}

impl PeakData {
    pub fn len(&self) -> usize {
        self.peak_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peak_ids.is_empty()
    }

    /// Append another group's membership onto this one.
    pub fn extend_from(&mut self, other: &PeakData) {
        self.peak_ids.extend_from_slice(&other.peak_ids);
        self.intensities.extend_from_slice(&other.intensities);
        self.scan_times.extend_from_slice(&other.scan_times);
        self.charge_states.extend_from_slice(&other.charge_states);
    }
}

/// A raw deconvoluted chromatographic mass feature, produced upstream and
/// never mutated here.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct PeakGroup {
    pub id: PeakGroupId,
    pub sample_run_id: SampleRunId,
    pub weighted_monoisotopic_mass: f64,
    pub charge_state_count: u32,
    pub scan_count: u32,
    pub first_scan_id: u32,
    pub last_scan_id: u32,
    pub scan_density: f64,
    pub total_volume: f64,
    pub average_a_to_a_plus_2_ratio: f64,
    pub average_signal_to_noise: f64,
    pub centroid_scan_estimate: f64,
    pub peak_data: PeakData,
}

/// A named mass delta (adduct or modification) that may relate two peak
/// groups of the same underlying species.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MassShift {
    pub name: String,
    pub mass: f64,
}

impl MassShift {
    pub fn new(name: impl Into<String>, mass: f64) -> Self {
        Self {
            name: name.into(),
            mass,
        }
    }
}

/// The search space of combinatorial shifts considered during grouping: each
/// shift paired with its maximum multiplicity.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct MassShiftMap {
    pub entries: Vec<(MassShift, u32)>,
}

impl MassShiftMap {
    pub fn new(entries: Vec<(MassShift, u32)>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over every achievable `(shift, multiplicity)` pair, ascending
    /// in multiplicity within each shift.
    pub fn iter_combinations(&self) -> impl Iterator<Item = (&MassShift, u32)> + '_ {
        self.entries
            .iter()
            .flat_map(|(shift, max_count)| (1..=*max_count).map(move |k| (shift, k)))
    }

    /// The minimum and maximum achievable shift sums, `(0, 0)` when the map
    /// is empty.
    pub fn shift_edges(&self) -> (f64, f64) {
        let mut lower = f64::INFINITY;
        let mut upper = f64::NEG_INFINITY;
        for (shift, k) in self.iter_combinations() {
            let delta = shift.mass * k as f64;
            lower = lower.min(delta);
            upper = upper.max(delta);
        }
        if lower.is_infinite() {
            (0.0, 0.0)
        } else {
            (lower, upper)
        }
    }
}

/// The mass shift accepted for a grouped record: which shift, applied how
/// many times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedMassShift {
    pub name: String,
    pub multiplicity: u32,
}

/// A [`PeakGroup`] transferred into the working partition of one
/// hypothesis-sample match, tentatively annotated with the theoretical
/// composition it matched, if any.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct PeakGroupMatch {
    pub id: MatchId,
    pub peak_group_id: PeakGroupId,
    pub sample_run_id: SampleRunId,
    pub hypothesis_sample_match_id: HypothesisSampleMatchId,
    pub theoretical_match_id: Option<CompositionId>,
    pub matched: bool,
    pub mass_shift: Option<AppliedMassShift>,
    /// Signed relative mass error against the theoretical composition, set
    /// by the upstream search. Absent for unmatched records.
    pub ppm_error: Option<f64>,
    pub weighted_monoisotopic_mass: f64,
    pub charge_state_count: u32,
    pub scan_count: u32,
    pub first_scan_id: u32,
    pub last_scan_id: u32,
    pub total_volume: f64,
    pub average_a_to_a_plus_2_ratio: f64,
    pub average_signal_to_noise: f64,
    pub peak_data: PeakData,
    pub ms1_score: Option<f64>,
}

impl PeakGroupMatch {
    /// Create a working record from a raw peak group, in the scope of one
    /// hypothesis-sample match.
    pub fn from_peak_group(
        group: &PeakGroup,
        hypothesis_sample_match_id: HypothesisSampleMatchId,
        theoretical_match_id: Option<CompositionId>,
    ) -> Self {
        Self {
            id: 0,
            peak_group_id: group.id,
            sample_run_id: group.sample_run_id,
            hypothesis_sample_match_id,
            theoretical_match_id,
            matched: theoretical_match_id.is_some(),
            mass_shift: None,
            ppm_error: None,
            weighted_monoisotopic_mass: group.weighted_monoisotopic_mass,
            charge_state_count: group.charge_state_count,
            scan_count: group.scan_count,
            first_scan_id: group.first_scan_id,
            last_scan_id: group.last_scan_id,
            total_volume: group.total_volume,
            average_a_to_a_plus_2_ratio: group.average_a_to_a_plus_2_ratio,
            average_signal_to_noise: group.average_signal_to_noise,
            peak_data: group.peak_data.clone(),
            ms1_score: None,
        }
    }
}

/// The merged summary of one or more [`PeakGroupMatch`] records that
/// represent the same underlying chemical species. Created fresh each
/// pipeline run; the terminal output of the grouping and merging stage.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct JointPeakGroupMatch {
    pub id: JointMatchId,
    pub hypothesis_sample_match_id: HypothesisSampleMatchId,
    pub theoretical_match_id: Option<CompositionId>,
    pub matched: bool,
    pub weighted_monoisotopic_mass: f64,
    pub charge_state_count: u32,
    pub modification_state_count: u32,
    pub scan_count: u32,
    pub first_scan_id: u32,
    pub last_scan_id: u32,
    pub scan_density: f64,
    /// The worst member mass error, absent when no member carried one.
    pub ppm_error: Option<f64>,
    pub centroid_scan_estimate: f64,
    pub centroid_scan_error: Option<f64>,
    pub a_peak_intensity_error: Option<f64>,
    pub average_a_to_a_plus_2_ratio: f64,
    pub average_signal_to_noise: f64,
    pub total_volume: f64,
    pub peak_data: PeakData,
    pub fingerprint: String,
    pub ms1_score: Option<f64>,
    pub p_value: Option<f64>,
    pub q_value: Option<f64>,
}

/// The scope record tying one sample run to one target or decoy hypothesis.
/// `parameters` is an opaque blob owned by the orchestration layer; the
/// configured [`MassShiftMap`] is read out of it under `"mass_shift_map"`.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct HypothesisSampleMatch {
    pub id: HypothesisSampleMatchId,
    pub sample_run_id: SampleRunId,
    pub parameters: serde_json::Value,
}

impl HypothesisSampleMatch {
    pub fn mass_shift_map(&self) -> Option<MassShiftMap> {
        let value = self.parameters.get("mass_shift_map")?;
        serde_json::from_value(value.clone()).ok()
    }
}

/// A stored, named set of logistic coefficients usable in place of a fresh
/// fit.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ScoringModelRecord {
    pub name: String,
    /// Intercept first, then one weight per feature.
    pub coefficients: Vec<f64>,
}

impl ScoringModelRecord {
    pub const GENERIC_MODEL_NAME: &'static str = "generic_peak_group_model";
}
