//! Learn aggregation and per-batch lifecycle tracking.

use std::collections::{BTreeMap, BTreeSet};

use super::types::{BatchId, BatchPoint, RangeMap, ReplicaId};

/// One-shot latch for the quorum edge of a batch id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum QuorumPhase {
    Pending,
    Notified,
}

/// Commit-side lifecycle of a batch id on this replica. Transitions are
/// one-way: a batch never moves backwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionPhase {
    /// No commit has been seen for this batch id.
    Unknown,
    /// Execute ranges are recorded but local completeness is not established.
    RangesKnown,
    /// All covered commands are present; waiting on the execution cursor.
    Executable,
    /// The batch has been executed.
    Executed,
}

#[derive(Clone, Debug)]
struct BatchState<I> {
    learns: Vec<(ReplicaId, BatchPoint<I>)>,
    quorum_phase: QuorumPhase,
    phase: ExecutionPhase,
    execute_ranges: RangeMap<I>,
}

impl<I> Default for BatchState<I> {
    fn default() -> Self {
        Self {
            learns: Vec::new(),
            quorum_phase: QuorumPhase::Pending,
            phase: ExecutionPhase::Unknown,
            execute_ranges: RangeMap::new(),
        }
    }
}

/// Tracks learns and commit progress per batch id.
///
/// The leader side records learns until a majority of distinct replicas have
/// reported a batch id, then intersects the reported batch points. The commit
/// side records the certified ranges of each batch and walks it through its
/// execution phases.
pub struct BatchQuorumChecker<I> {
    states: BTreeMap<BatchId, BatchState<I>>,
    quorum: usize,
}

impl<I: Clone + Ord> BatchQuorumChecker<I> {
    #[must_use]
    pub fn new(num_replicas: usize) -> Self {
        Self {
            states: BTreeMap::new(),
            quorum: num_replicas / 2 + 1,
        }
    }

    fn state_mut(&mut self, batch: BatchId) -> &mut BatchState<I> {
        self.states.entry(batch).or_default()
    }

    /// Record one replica's learn for a batch id. Duplicates from the same
    /// replica are kept; quorum counting deduplicates, intersection does not.
    pub fn record_learn(&mut self, batch: BatchId, replica: ReplicaId, point: BatchPoint<I>) {
        self.state_mut(batch).learns.push((replica, point));
    }

    /// True exactly once: when learns from a majority of distinct replicas
    /// have been recorded for this batch id.
    pub fn quorum_reached(&mut self, batch: BatchId) -> bool {
        let quorum = self.quorum;
        let state = self.state_mut(batch);
        if state.quorum_phase == QuorumPhase::Notified {
            return false;
        }
        let distinct: BTreeSet<ReplicaId> =
            state.learns.iter().map(|(replica, _)| *replica).collect();
        if distinct.len() < quorum {
            return false;
        }
        state.quorum_phase = QuorumPhase::Notified;
        true
    }

    /// Intersect every learn recorded for a batch id.
    ///
    /// A client is included only if every recorded learn mentions it, and its
    /// certified sequence number is the minimum reported. The count is over
    /// all learns, so a duplicate learn missing a client excludes that client.
    #[must_use]
    pub fn intersect(&self, batch: BatchId) -> BatchPoint<I> {
        let Some(state) = self.states.get(&batch) else {
            return BatchPoint::new();
        };

        let mut point = BatchPoint::new();
        let mut mentions: BTreeMap<&I, usize> = BTreeMap::new();
        for (_, learned) in &state.learns {
            for (client, seq) in learned {
                *mentions.entry(client).or_insert(0) += 1;
                point
                    .entry(client.clone())
                    .and_modify(|current| *current = (*current).min(*seq))
                    .or_insert(*seq);
            }
        }

        let total = state.learns.len();
        point.retain(|client, _| mentions.get(client) == Some(&total));
        point
    }

    /// Record the certified ranges delivered by a commit.
    ///
    /// Returns false if the batch has already been found complete or
    /// executed, in which case the commit is stale and the ranges are left
    /// untouched. A repeated commit while completeness is still pending
    /// re-records the ranges and returns true.
    pub fn record_ranges(&mut self, batch: BatchId, ranges: RangeMap<I>) -> bool {
        let state = self.state_mut(batch);
        match state.phase {
            ExecutionPhase::Unknown | ExecutionPhase::RangesKnown => {
                state.execute_ranges = ranges;
                state.phase = ExecutionPhase::RangesKnown;
                true
            }
            ExecutionPhase::Executable | ExecutionPhase::Executed => false,
        }
    }

    /// Move a batch with known ranges to [`ExecutionPhase::Executable`].
    pub fn mark_executable(&mut self, batch: BatchId) -> bool {
        let state = self.state_mut(batch);
        if state.phase == ExecutionPhase::RangesKnown {
            state.phase = ExecutionPhase::Executable;
            true
        } else {
            false
        }
    }

    /// Move an executable batch to [`ExecutionPhase::Executed`].
    pub fn mark_executed(&mut self, batch: BatchId) -> bool {
        let state = self.state_mut(batch);
        if state.phase == ExecutionPhase::Executable {
            state.phase = ExecutionPhase::Executed;
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn phase(&self, batch: BatchId) -> ExecutionPhase {
        self.states
            .get(&batch)
            .map_or(ExecutionPhase::Unknown, |state| state.phase)
    }

    #[must_use]
    pub fn execute_ranges(&self, batch: BatchId) -> Option<&RangeMap<I>> {
        self.states.get(&batch).map(|state| &state.execute_ranges)
    }
}
