//! An in-memory, id-indexed stand-in for the persistence collaborator.
//!
//! Tables are keyed by integer ids. The store is shared across worker
//! threads behind an [`RwLock`]; each batch write happens under a single
//! write-lock acquisition, which plays the role of a per-batch commit.
use std::collections::HashMap;
use std::sync::RwLock;

use identity_hash::BuildIdentityHasher;
use itertools::Itertools;
use thiserror::Error;

use crate::model::{
    AppliedMassShift, HypothesisSampleMatch, HypothesisSampleMatchId, JointMatchId,
    JointPeakGroupMatch, MatchId, PeakGroup, PeakGroupId, PeakGroupMatch, SampleRunId,
    ScoringModelRecord,
};

type IdTable<V> = HashMap<u64, V, BuildIdentityHasher<u64>>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("No hypothesis-sample match with id {0} exists")]
    MissingHypothesisSampleMatch(HypothesisSampleMatchId),
    #[error("Hypothesis-sample match {0} maps no peak group matches")]
    EmptyScope(HypothesisSampleMatchId),
    #[error("No scoring model named {0:?} was found")]
    MissingScoringModel(String),
}

#[derive(Debug, Default)]
struct StoreInner {
    peak_groups: IdTable<PeakGroup>,
    hypothesis_sample_matches: IdTable<HypothesisSampleMatch>,
    matches: IdTable<PeakGroupMatch>,
    joint_matches: IdTable<JointPeakGroupMatch>,
    /// Association rows mapping member match ids to the joint record they
    /// were merged into.
    memberships: Vec<(MatchId, JointMatchId)>,
    scoring_models: HashMap<String, ScoringModelRecord>,
    next_match_id: MatchId,
    next_joint_id: JointMatchId,
}

/// The shared mutable resource of the pipeline. All access is through the
/// narrow query and batch-write methods below.
#[derive(Debug, Default)]
pub struct PeakGroupStore {
    inner: RwLock<StoreInner>,
}

impl PeakGroupStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_peak_group(&self, group: PeakGroup) {
        self.write().peak_groups.insert(group.id, group);
    }

    pub fn add_hypothesis_sample_match(&self, hsm: HypothesisSampleMatch) {
        self.write().hypothesis_sample_matches.insert(hsm.id, hsm);
    }

    pub fn hypothesis_sample_match(
        &self,
        id: HypothesisSampleMatchId,
    ) -> Result<HypothesisSampleMatch, StoreError> {
        self.read()
            .hypothesis_sample_matches
            .get(&id)
            .cloned()
            .ok_or(StoreError::MissingHypothesisSampleMatch(id))
    }

    pub fn put_scoring_model(&self, model: ScoringModelRecord) {
        self.write().scoring_models.insert(model.name.clone(), model);
    }

    pub fn scoring_model(&self, name: &str) -> Result<ScoringModelRecord, StoreError> {
        self.read()
            .scoring_models
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::MissingScoringModel(name.to_string()))
    }

    /// Insert a working record, assigning it a fresh id.
    pub fn insert_match(&self, mut record: PeakGroupMatch) -> MatchId {
        let mut inner = self.write();
        inner.next_match_id += 1;
        let id = inner.next_match_id;
        record.id = id;
        inner.matches.insert(id, record);
        id
    }

    /// Raw peak groups belonging to one sample run, in id order.
    pub fn peak_groups_for_run(&self, sample_run_id: SampleRunId) -> Vec<PeakGroup> {
        let inner = self.read();
        let mut groups: Vec<_> = inner
            .peak_groups
            .values()
            .filter(|g| g.sample_run_id == sample_run_id)
            .cloned()
            .collect();
        groups.sort_by_key(|g| g.id);
        groups
    }

    /// The raw peak group ids already claimed by a matched working record in
    /// this scope.
    pub fn matched_peak_group_ids(&self, scope: HypothesisSampleMatchId) -> Vec<PeakGroupId> {
        self.read()
            .matches
            .values()
            .filter(|m| m.hypothesis_sample_match_id == scope && m.matched)
            .map(|m| m.peak_group_id)
            .collect()
    }

    pub fn count_matches_in_scope(&self, scope: HypothesisSampleMatchId) -> usize {
        self.read()
            .matches
            .values()
            .filter(|m| m.hypothesis_sample_match_id == scope)
            .count()
    }

    /// Remove the rebuildable portion of one scope's working partition: all
    /// joint records, their membership rows, and the transfer-created
    /// unmatched working records. Matched records from the upstream search
    /// are left in place.
    pub fn clear_working_partition(&self, scope: HypothesisSampleMatchId) {
        let mut inner = self.write();
        let joint_ids: Vec<JointMatchId> = inner
            .joint_matches
            .values()
            .filter(|j| j.hypothesis_sample_match_id == scope)
            .map(|j| j.id)
            .collect();
        for id in &joint_ids {
            inner.joint_matches.remove(id);
        }
        let unmatched_ids: Vec<MatchId> = inner
            .matches
            .values()
            .filter(|m| m.hypothesis_sample_match_id == scope && !m.matched)
            .map(|m| m.id)
            .collect();
        for id in &unmatched_ids {
            inner.matches.remove(id);
        }
        inner
            .memberships
            .retain(|(_, joint_id)| !joint_ids.contains(joint_id));
    }

    /// Unmatched working records of one scope, sorted by descending mass,
    /// the input ordering the grouping algorithm requires.
    pub fn unmatched_matches_desc(&self, scope: HypothesisSampleMatchId) -> Vec<PeakGroupMatch> {
        let inner = self.read();
        let mut records: Vec<_> = inner
            .matches
            .values()
            .filter(|m| m.hypothesis_sample_match_id == scope && m.theoretical_match_id.is_none())
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            b.weighted_monoisotopic_mass
                .total_cmp(&a.weighted_monoisotopic_mass)
        });
        records
    }

    /// Matched working record ids, grouped by their shared theoretical
    /// composition id.
    pub fn matched_id_groups(&self, scope: HypothesisSampleMatchId) -> Vec<Vec<MatchId>> {
        let inner = self.read();
        let mut pairs: Vec<(u64, MatchId)> = inner
            .matches
            .values()
            .filter(|m| m.hypothesis_sample_match_id == scope && m.matched)
            .filter_map(|m| m.theoretical_match_id.map(|t| (t, m.id)))
            .collect();
        pairs.sort_unstable();
        pairs
            .into_iter()
            .group_by(|(composition_id, _)| *composition_id)
            .into_iter()
            .map(|(_, chunk)| chunk.map(|(_, id)| id).collect())
            .collect()
    }

    pub fn fetch_matches(&self, ids: &[MatchId]) -> Vec<PeakGroupMatch> {
        let inner = self.read();
        ids.iter()
            .filter_map(|id| inner.matches.get(id).cloned())
            .collect()
    }

    /// Write one batch of merge results and their membership rows, assigning
    /// joint ids. One write-lock acquisition per batch.
    pub fn insert_joint_batch(
        &self,
        results: Vec<(JointPeakGroupMatch, Vec<MatchId>)>,
    ) -> usize {
        let mut inner = self.write();
        let n = results.len();
        for (mut joint, member_ids) in results {
            inner.next_joint_id += 1;
            let joint_id = inner.next_joint_id;
            joint.id = joint_id;
            inner.joint_matches.insert(joint_id, joint);
            inner
                .memberships
                .extend(member_ids.into_iter().map(|m| (m, joint_id)));
        }
        n
    }

    pub fn joint_matches_for(&self, scope: HypothesisSampleMatchId) -> Vec<JointPeakGroupMatch> {
        let inner = self.read();
        let mut records: Vec<_> = inner
            .joint_matches
            .values()
            .filter(|j| j.hypothesis_sample_match_id == scope)
            .cloned()
            .collect();
        records.sort_by_key(|j| j.id);
        records
    }

    /// Apply an in-place update to every joint record of one scope.
    pub fn update_joint_matches<F: FnMut(&mut JointPeakGroupMatch)>(
        &self,
        scope: HypothesisSampleMatchId,
        mut updater: F,
    ) {
        let mut inner = self.write();
        for joint in inner.joint_matches.values_mut() {
            if joint.hypothesis_sample_match_id == scope {
                updater(joint);
            }
        }
    }

    /// Persist the mass shift attributions decided during grouping back onto
    /// the working records.
    pub fn set_mass_shifts(&self, shifts: &[(MatchId, AppliedMassShift)]) {
        let mut inner = self.write();
        for (id, applied) in shifts {
            if let Some(record) = inner.matches.get_mut(id) {
                record.mass_shift = Some(applied.clone());
            }
        }
    }

    /// Persist p-values and q-values onto scored joint records.
    pub fn set_significance(&self, estimates: &[(JointMatchId, f64, f64)]) {
        let mut inner = self.write();
        for (id, p_value, q_value) in estimates {
            if let Some(joint) = inner.joint_matches.get_mut(id) {
                joint.p_value = Some(*p_value);
                joint.q_value = Some(*q_value);
            }
        }
    }

    pub fn set_ms1_scores(&self, scores: &[(JointMatchId, f64)]) {
        let mut inner = self.write();
        for (id, score) in scores {
            if let Some(joint) = inner.joint_matches.get_mut(id) {
                joint.ms1_score = Some(*score);
            }
        }
    }

    /// The member match ids merged into one joint record.
    pub fn members_of(&self, joint_id: JointMatchId) -> Vec<MatchId> {
        self.read()
            .memberships
            .iter()
            .filter(|(_, j)| *j == joint_id)
            .map(|(m, _)| *m)
            .collect()
    }
}
