//! Collapse a cluster of peak group matches into one joint summary record.
use std::collections::BTreeSet;

use crate::math::expanding_window;
use crate::model::{JointPeakGroupMatch, MatchId, PeakData, PeakGroupMatch};

/// Default fraction of the cluster's maximum volume below which a member is
/// excluded from aggregate statistics.
pub const DEFAULT_MINIMUM_ABUNDANCE_RATIO: f64 = 0.01;

/// Constant added to a window's scan span when computing its density, so
/// that very narrow windows do not dominate.
const SCAN_DENSITY_OFFSET: f64 = 15.0;

/// The largest gap between adjacent scan times still considered one run of
/// consecutive detections.
const ADJACENT_SCAN_GAP: f64 = 1.0;

/// Merge one cluster into a single [`JointPeakGroupMatch`] plus the list of
/// consumed member ids. Returns `None` for an empty cluster.
///
/// Members whose volume falls below `minimum_abundance_ratio` times the
/// cluster maximum are left out of every aggregate sum but still reported as
/// consumed. The representative for mass, scope, and match identifiers is
/// the first member in input order.
pub fn merge_groups(
    members: &[PeakGroupMatch],
    minimum_abundance_ratio: f64,
) -> Option<(JointPeakGroupMatch, Vec<MatchId>)> {
    let representative = members.first()?;

    let maximum_volume = members
        .iter()
        .map(|g| g.total_volume)
        .fold(f64::NEG_INFINITY, f64::max);
    let minimum_abundance = minimum_abundance_ratio * maximum_volume;

    let mut merged_peak_data = PeakData::default();
    let mut scan_count_total = 0u32;
    let mut total_volume = 0.0f64;
    let mut n_peaks = 0usize;
    let mut modification_state_count = 0u32;
    let mut average_a_to_a_plus_2_ratio = 0.0f64;
    let mut average_signal_to_noise = 0.0f64;
    let mut min_scan = u32::MAX;
    let mut max_scan = 0u32;
    let mut scan_times: BTreeSet<u32> = BTreeSet::new();
    let mut charge_states: BTreeSet<i32> = BTreeSet::new();

    for member in members {
        if member.total_volume < minimum_abundance {
            continue;
        }
        merged_peak_data.extend_from(&member.peak_data);

        let member_peaks = member.peak_data.len();
        n_peaks += member_peaks;
        scan_count_total += member.scan_count;
        total_volume += member.total_volume;
        modification_state_count += 1;

        average_a_to_a_plus_2_ratio += member.average_a_to_a_plus_2_ratio * member_peaks as f64;
        average_signal_to_noise += member.average_signal_to_noise * member_peaks as f64;

        min_scan = min_scan.min(member.first_scan_id);
        max_scan = max_scan.max(member.last_scan_id);

        scan_times.extend(member.peak_data.scan_times.iter().copied());
        charge_states.extend(member.peak_data.charge_states.iter().copied());
    }

    if n_peaks > 0 {
        average_a_to_a_plus_2_ratio /= n_peaks as f64;
        average_signal_to_noise /= n_peaks as f64;
    }

    // The worst mass error across the whole cluster, including members
    // excluded by the abundance threshold; absent when no member has one.
    let ppm_error = members.iter().filter_map(|g| g.ppm_error).reduce(f64::max);

    let charge_state_count = if charge_states.is_empty() {
        members.iter().map(|g| g.charge_state_count).max().unwrap_or(0)
    } else {
        charge_states.len() as u32
    };

    let sorted_times: Vec<f64> = scan_times.iter().map(|&t| t as f64).collect();
    let scan_density = expanding_window(&sorted_times, ADJACENT_SCAN_GAP)
        .iter()
        .filter(|window| window.len() > 1)
        .map(|window| {
            let span = window[window.len() - 1] - window[0];
            window.len() as f64 / (span + SCAN_DENSITY_OFFSET)
        })
        .fold(0.0f64, f64::max);

    let centroid_scan_estimate = if n_peaks > 0 {
        sorted_times.iter().sum::<f64>() / n_peaks as f64
    } else {
        0.0
    };

    let fingerprint = scan_times
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(":");

    let joint = JointPeakGroupMatch {
        id: 0,
        hypothesis_sample_match_id: representative.hypothesis_sample_match_id,
        theoretical_match_id: representative.theoretical_match_id,
        matched: representative.matched,
        weighted_monoisotopic_mass: representative.weighted_monoisotopic_mass,
        charge_state_count,
        modification_state_count,
        scan_count: scan_count_total,
        first_scan_id: if min_scan == u32::MAX { 0 } else { min_scan },
        last_scan_id: max_scan,
        scan_density,
        ppm_error,
        centroid_scan_estimate,
        centroid_scan_error: None,
        a_peak_intensity_error: None,
        average_a_to_a_plus_2_ratio,
        average_signal_to_noise,
        total_volume,
        peak_data: merged_peak_data,
        fingerprint,
        ms1_score: None,
        p_value: None,
        q_value: None,
    };
    let member_ids = members.iter().map(|m| m.id).collect();
    Some((joint, member_ids))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::PeakData;

    fn make_member(id: u64, mass: f64, volume: f64, scan_times: &[u32]) -> PeakGroupMatch {
        PeakGroupMatch {
            id,
            hypothesis_sample_match_id: 1,
            weighted_monoisotopic_mass: mass,
            scan_count: scan_times.len() as u32,
            first_scan_id: *scan_times.iter().min().unwrap_or(&0),
            last_scan_id: *scan_times.iter().max().unwrap_or(&0),
            total_volume: volume,
            average_a_to_a_plus_2_ratio: 0.5,
            average_signal_to_noise: 10.0,
            peak_data: PeakData {
                peak_ids: scan_times.iter().map(|&t| t as u64 + 1000).collect(),
                intensities: scan_times.iter().map(|_| 100.0).collect(),
                scan_times: scan_times.to_vec(),
                charge_states: vec![2],
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_total_volume_is_plain_sum() {
        let members = vec![
            make_member(1, 2000.0, 50.0, &[10, 11, 12]),
            make_member(2, 1983.0, 50.0, &[13, 14]),
        ];
        let (joint, ids) = merge_groups(&members, 0.01).unwrap();
        assert_eq!(joint.total_volume, 100.0);
        assert_eq!(joint.scan_count, 5);
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(joint.weighted_monoisotopic_mass, 2000.0);
        assert_eq!(joint.modification_state_count, 2);
    }

    #[test]
    fn test_low_abundance_member_excluded_but_consumed() {
        let members = vec![
            make_member(1, 2000.0, 1000.0, &[10, 11, 12]),
            make_member(2, 1983.0, 1.0, &[40, 41]),
        ];
        let (joint, ids) = merge_groups(&members, 0.01).unwrap();
        // The satellite is below 1% of the maximum volume: excluded from
        // sums, still listed as consumed.
        assert_eq!(joint.total_volume, 1000.0);
        assert_eq!(joint.scan_count, 3);
        assert_eq!(joint.modification_state_count, 1);
        assert_eq!(joint.peak_data.len(), 3);
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_single_scan_density_is_zero() {
        let members = vec![make_member(1, 2000.0, 10.0, &[42])];
        let (joint, _) = merge_groups(&members, 0.01).unwrap();
        assert_eq!(joint.scan_density, 0.0);
    }

    #[test]
    fn test_scan_density_takes_max_window() {
        // Two runs of consecutive scans: a 4-wide burst and a 2-wide one.
        let members = vec![make_member(1, 2000.0, 10.0, &[10, 11, 12, 13, 50, 51])];
        let (joint, _) = merge_groups(&members, 0.01).unwrap();
        let dense = 4.0 / (3.0 + 15.0);
        let sparse = 2.0 / (1.0 + 15.0);
        assert!(dense > sparse);
        assert!((joint.scan_density - dense).abs() < 1e-12);
    }

    #[test]
    fn test_charge_state_fallback() {
        let mut member = make_member(1, 2000.0, 10.0, &[10, 11]);
        member.peak_data.charge_states.clear();
        member.charge_state_count = 3;
        let (joint, _) = merge_groups(&[member], 0.01).unwrap();
        assert_eq!(joint.charge_state_count, 3);
    }

    #[test]
    fn test_distinct_charge_states_counted() {
        let mut a = make_member(1, 2000.0, 10.0, &[10, 11]);
        a.peak_data.charge_states = vec![2, 3];
        let mut b = make_member(2, 1983.0, 10.0, &[12]);
        b.peak_data.charge_states = vec![3];
        let (joint, _) = merge_groups(&[a, b], 0.01).unwrap();
        assert_eq!(joint.charge_state_count, 2);
    }

    #[test]
    fn test_ppm_error_is_max_over_members() {
        let mut a = make_member(1, 2000.0, 1000.0, &[10, 11]);
        a.ppm_error = Some(-8e-6);
        let mut b = make_member(2, 1983.0, 1000.0, &[12]);
        b.ppm_error = Some(5e-6);
        // A low-abundance satellite still contributes its mass error.
        let mut c = make_member(3, 1966.0, 1.0, &[40]);
        c.ppm_error = Some(9e-6);
        let d = make_member(4, 1949.0, 1000.0, &[13]);

        let (joint, _) = merge_groups(&[a, b, c, d], 0.01).unwrap();
        assert_eq!(joint.ppm_error, Some(9e-6));
    }

    #[test]
    fn test_ppm_error_absent_when_no_member_has_one() {
        let members = vec![
            make_member(1, 2000.0, 10.0, &[10, 11]),
            make_member(2, 1983.0, 10.0, &[12]),
        ];
        let (joint, _) = merge_groups(&members, 0.01).unwrap();
        assert_eq!(joint.ppm_error, None);
    }

    #[test]
    fn test_empty_cluster() {
        assert!(merge_groups(&[], 0.01).is_none());
    }

    #[test]
    fn test_fingerprint_is_sorted_distinct_scan_times() {
        let members = vec![
            make_member(1, 2000.0, 10.0, &[12, 10]),
            make_member(2, 1983.0, 10.0, &[11, 12]),
        ];
        let (joint, _) = merge_groups(&members, 0.01).unwrap();
        assert_eq!(joint.fingerprint, "10:11:12");
    }
}
