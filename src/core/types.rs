//! Shared identifiers and collections used across the batching protocol.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Client-assigned command sequence number.
pub type SeqNo = u32;

/// Replica-local batch counter. Batches with the same id from different
/// replicas are aggregated together by the leader.
pub type BatchId = u64;

/// Identity of a replica within the group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReplicaId(pub u32);

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Inclusive span of one client's sequence numbers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRange {
    pub start: SeqNo,
    pub stop: SeqNo,
}

impl ClientRange {
    #[must_use]
    pub fn new(start: SeqNo, stop: SeqNo) -> Self {
        debug_assert!(start <= stop);
        Self { start, stop }
    }

    /// Sequence numbers covered by this range, ascending.
    pub fn seqs(self) -> impl Iterator<Item = SeqNo> {
        self.start..=self.stop
    }
}

impl fmt::Display for ClientRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.stop)
    }
}

/// Highest sequence number observed per client. A batch point is a snapshot
/// of a replica's view of client progress; it only ever grows.
pub type BatchPoint<I> = BTreeMap<I, SeqNo>;

/// Per-client spans of newly certified sequence numbers.
pub type RangeMap<I> = BTreeMap<I, ClientRange>;

/// Commands grouped per client, each group in ascending sequence order.
pub type CommandsByClient<I, C> = BTreeMap<I, Vec<C>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_range_seqs_inclusive() {
        let range = ClientRange::new(3, 5);
        assert_eq!(range.seqs().collect::<Vec<_>>(), vec![3, 4, 5]);
    }

    #[test]
    fn test_client_range_single_element() {
        let range = ClientRange::new(7, 7);
        assert_eq!(range.seqs().collect::<Vec<_>>(), vec![7]);
    }

    #[test]
    fn test_client_range_display() {
        assert_eq!(ClientRange::new(0, 4).to_string(), "[0, 4]");
    }
}
