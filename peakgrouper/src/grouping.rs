//! Partition unmatched peak group matches into clusters whose members are
//! related to a seed record by a combination of configured mass shifts.
use std::collections::VecDeque;

use mzpeaks::Tolerance;

use crate::model::{AppliedMassShift, MassShiftMap, PeakGroupMatch};

/// An iterator over mass-shift-consistent clusters.
///
/// The input list must be sorted by descending mass. Each call to `next`
/// pops the highest-mass remaining record as the cluster seed, scans the
/// remainder for records whose mass equals the seed's mass plus some
/// configured `shift.mass * k` within the relative tolerance, and yields the
/// seed followed by every accepted member. Records inside the acceptance
/// window that no shift explains are deferred, not discarded; the iterator
/// consumes its input exhaustively, so every record appears in exactly one
/// cluster.
#[derive(Debug)]
pub struct ShiftGroupingIter {
    remaining: VecDeque<PeakGroupMatch>,
    shift_map: MassShiftMap,
    error_tolerance: Tolerance,
    lower_edge: f64,
    upper_edge: f64,
}

impl ShiftGroupingIter {
    pub fn new(
        records: Vec<PeakGroupMatch>,
        shift_map: MassShiftMap,
        error_tolerance: Tolerance,
    ) -> Self {
        let (lower_edge, upper_edge) = shift_map.shift_edges();
        Self {
            remaining: records.into(),
            shift_map,
            error_tolerance,
            lower_edge,
            upper_edge,
        }
    }

    /// The acceptance window around one seed, the reachable shift-sum range
    /// widened by the tolerance.
    fn window_bounds(&self, seed_mass: f64) -> (f64, f64) {
        let lower_center = seed_mass + self.lower_edge;
        let upper_center = seed_mass + self.upper_edge;
        match self.error_tolerance {
            Tolerance::PPM(ppm) => (
                lower_center * (1.0 - ppm * 1e-6),
                upper_center * (1.0 + ppm * 1e-6),
            ),
            Tolerance::Da(da) => (lower_center - da, upper_center + da),
        }
    }

    /// Try every `(shift, multiplicity)` combination against the candidate,
    /// ascending in multiplicity, accepting the first one within tolerance.
    fn find_shift(&self, seed_mass: f64, candidate_mass: f64) -> Option<AppliedMassShift> {
        for (shift, k) in self.shift_map.iter_combinations() {
            let shifted = seed_mass + shift.mass * k as f64;
            if self.error_tolerance.test(shifted, candidate_mass) {
                return Some(AppliedMassShift {
                    name: shift.name.clone(),
                    multiplicity: k,
                });
            }
        }
        None
    }
}

impl Iterator for ShiftGroupingIter {
    type Item = Vec<PeakGroupMatch>;

    fn next(&mut self) -> Option<Self::Item> {
        let seed = self.remaining.pop_front()?;
        let seed_mass = seed.weighted_monoisotopic_mass;
        let (min_mass, max_mass) = self.window_bounds(seed_mass);

        let mut cluster = vec![seed];
        let mut deferred: Vec<PeakGroupMatch> = Vec::new();

        while let Some(mut candidate) = self.remaining.pop_front() {
            let mass = candidate.weighted_monoisotopic_mass;
            if mass > max_mass {
                deferred.push(candidate);
            } else if mass >= min_mass {
                match self.find_shift(seed_mass, mass) {
                    Some(applied) => {
                        candidate.mass_shift = Some(applied);
                        cluster.push(candidate);
                    }
                    None => deferred.push(candidate),
                }
            } else {
                // Sorted descending, so nothing further can fall inside the
                // window once a record drops below it.
                deferred.push(candidate);
                break;
            }
        }

        deferred.extend(std::mem::take(&mut self.remaining));
        self.remaining = deferred.into();
        Some(cluster)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::MassShift;

    const AMMONIUM: f64 = 17.026549;

    fn make_records(masses: &[f64]) -> Vec<PeakGroupMatch> {
        let mut records: Vec<PeakGroupMatch> = masses
            .iter()
            .enumerate()
            .map(|(i, &mass)| PeakGroupMatch {
                id: i as u64 + 1,
                hypothesis_sample_match_id: 1,
                weighted_monoisotopic_mass: mass,
                ..Default::default()
            })
            .collect();
        records.sort_by(|a, b| {
            b.weighted_monoisotopic_mass
                .total_cmp(&a.weighted_monoisotopic_mass)
        });
        records
    }

    /// Losses of ammonium relative to the most-adducted (highest mass) form,
    /// which serves as the cluster seed in a descending-mass scan.
    fn ammonium_loss_map(max_count: u32) -> MassShiftMap {
        MassShiftMap::new(vec![(MassShift::new("Ammonium", -AMMONIUM), max_count)])
    }

    #[test]
    fn test_empty_shift_map_yields_singletons() {
        let records = make_records(&[1000.0, 1500.0, 2000.0]);
        let clusters: Vec<_> =
            ShiftGroupingIter::new(records, MassShiftMap::default(), Tolerance::PPM(20.0)).collect();
        assert_eq!(clusters.len(), 3);
        assert!(clusters.iter().all(|c| c.len() == 1));
    }

    #[test]
    fn test_shift_cluster_accepts_multiplicities() {
        // A doubly-adducted seed, its singly- and un-adducted forms, and an
        // unrelated record well outside the window.
        let records = make_records(&[2000.0, 2000.0 - AMMONIUM, 2000.0 - 2.0 * AMMONIUM, 1500.0]);
        let clusters: Vec<_> =
            ShiftGroupingIter::new(records, ammonium_loss_map(2), Tolerance::PPM(20.0)).collect();
        assert_eq!(clusters.len(), 2);

        let shifted = &clusters[0];
        assert_eq!(shifted.len(), 3);
        // Seed first, unshifted.
        assert!(shifted[0].mass_shift.is_none());
        assert_eq!(shifted[0].weighted_monoisotopic_mass, 2000.0);
        let applied: Vec<u32> = shifted[1..]
            .iter()
            .map(|m| m.mass_shift.as_ref().unwrap().multiplicity)
            .collect();
        assert_eq!(applied, vec![1, 2]);
        // The seed of the second cluster is the record the first could not
        // explain.
        assert_eq!(clusters[1][0].weighted_monoisotopic_mass, 1500.0);
    }

    #[test]
    fn test_in_window_nonmatching_records_are_deferred() {
        // 1975 falls inside the seed's acceptance window but matches no
        // shift combination; it must seed its own cluster instead of
        // vanishing.
        let records = make_records(&[2000.0, 2000.0 - AMMONIUM, 1975.0]);
        let clusters: Vec<_> =
            ShiftGroupingIter::new(records, ammonium_loss_map(2), Tolerance::PPM(20.0)).collect();
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].len(), 2);
        assert_eq!(clusters[1][0].weighted_monoisotopic_mass, 1975.0);
    }

    #[test]
    fn test_partition_is_exhaustive_and_disjoint() {
        let masses: Vec<f64> = (0..40).map(|i| 900.0 + 37.0 * i as f64).collect();
        let records = make_records(&masses);
        let clusters: Vec<_> =
            ShiftGroupingIter::new(records, ammonium_loss_map(3), Tolerance::PPM(20.0)).collect();
        let mut seen: Vec<u64> = clusters
            .iter()
            .flat_map(|c| c.iter().map(|m| m.id))
            .collect();
        seen.sort_unstable();
        let expected: Vec<u64> = (1..=40).collect();
        assert_eq!(seen, expected);
    }
}
