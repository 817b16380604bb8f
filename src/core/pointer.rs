//! Agreed batch point history and range derivation.

use super::types::{BatchPoint, ClientRange, RangeMap};

/// History of batch points the group has agreed on.
///
/// Each accepted candidate produces the per-client ranges newly certified
/// relative to the previous agreed point. The history never shrinks: clients
/// absent from a candidate, or reported below their agreed sequence number,
/// are carried forward unchanged.
pub struct BatchPointer<I> {
    agreed: Vec<BatchPoint<I>>,
}

impl<I: Clone + Ord> BatchPointer<I> {
    #[must_use]
    pub fn new() -> Self {
        Self { agreed: Vec::new() }
    }

    /// Try to advance the agreed history to `candidate`.
    ///
    /// Returns the newly certified ranges on growth: `[0, seq]` for a client
    /// not in the previous point, `[prev + 1, seq]` for a client that moved
    /// forward. Returns `None` when nothing grew, leaving history untouched.
    pub fn try_advance(&mut self, candidate: BatchPoint<I>) -> Option<RangeMap<I>> {
        let Some(last) = self.agreed.last() else {
            if candidate.is_empty() {
                return None;
            }
            let ranges = candidate
                .iter()
                .map(|(client, seq)| (client.clone(), ClientRange::new(0, *seq)))
                .collect();
            self.agreed.push(candidate);
            return Some(ranges);
        };

        let mut next = last.clone();
        let mut ranges = RangeMap::new();
        for (client, seq) in &candidate {
            match last.get(client) {
                None => {
                    next.insert(client.clone(), *seq);
                    ranges.insert(client.clone(), ClientRange::new(0, *seq));
                }
                Some(last_seq) if *seq > *last_seq => {
                    next.insert(client.clone(), *seq);
                    ranges.insert(client.clone(), ClientRange::new(last_seq + 1, *seq));
                }
                Some(_) => {}
            }
        }

        if ranges.is_empty() {
            return None;
        }
        self.agreed.push(next);
        Some(ranges)
    }

    /// The most recently agreed batch point.
    #[must_use]
    pub fn last_agreed(&self) -> Option<&BatchPoint<I>> {
        self.agreed.last()
    }
}

impl<I: Clone + Ord> Default for BatchPointer<I> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::super::types::SeqNo;
    use super::*;

    fn point(entries: &[(&'static str, SeqNo)]) -> BatchPoint<&'static str> {
        entries.iter().copied().collect()
    }

    #[test]
    fn test_first_advance_covers_from_zero() {
        let mut pointer = BatchPointer::new();
        let ranges = pointer.try_advance(point(&[("a", 2), ("b", 1)])).unwrap();

        assert_eq!(ranges.get("a"), Some(&ClientRange::new(0, 2)));
        assert_eq!(ranges.get("b"), Some(&ClientRange::new(0, 1)));
    }

    #[test]
    fn test_empty_candidate_never_advances() {
        let mut pointer: BatchPointer<&str> = BatchPointer::new();
        assert!(pointer.try_advance(BatchPoint::new()).is_none());
        assert!(pointer.last_agreed().is_none());
    }

    #[test]
    fn test_only_grown_clients_emit_ranges() {
        let mut pointer = BatchPointer::new();
        pointer.try_advance(point(&[("a", 2), ("b", 1)])).unwrap();

        let ranges = pointer.try_advance(point(&[("a", 4), ("b", 1)])).unwrap();
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges.get("a"), Some(&ClientRange::new(3, 4)));
    }

    #[test]
    fn test_new_client_covered_from_zero() {
        let mut pointer = BatchPointer::new();
        pointer.try_advance(point(&[("a", 2)])).unwrap();

        let ranges = pointer.try_advance(point(&[("a", 2), ("c", 0)])).unwrap();
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges.get("c"), Some(&ClientRange::new(0, 0)));
    }

    #[test]
    fn test_unchanged_candidate_is_not_growth() {
        let mut pointer = BatchPointer::new();
        pointer.try_advance(point(&[("a", 2), ("b", 1)])).unwrap();
        assert!(pointer.try_advance(point(&[("a", 2), ("b", 1)])).is_none());
    }

    #[test]
    fn test_history_never_shrinks() {
        let mut pointer = BatchPointer::new();
        pointer.try_advance(point(&[("a", 4), ("b", 1)])).unwrap();

        // A candidate below the agreed point, or missing clients, changes
        // nothing.
        assert!(pointer.try_advance(point(&[("a", 1)])).is_none());
        assert_eq!(pointer.last_agreed(), Some(&point(&[("a", 4), ("b", 1)])));
    }

    #[test]
    fn test_absent_clients_carried_forward() {
        let mut pointer = BatchPointer::new();
        pointer.try_advance(point(&[("a", 2), ("b", 1)])).unwrap();

        let ranges = pointer.try_advance(point(&[("a", 5)])).unwrap();
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges.get("a"), Some(&ClientRange::new(3, 5)));
        assert_eq!(pointer.last_agreed(), Some(&point(&[("a", 5), ("b", 1)])));
    }

    #[test]
    fn test_ranges_gap_free_across_advancements() {
        let mut pointer = BatchPointer::new();
        let first = pointer.try_advance(point(&[("a", 2)])).unwrap();
        let second = pointer.try_advance(point(&[("a", 7)])).unwrap();
        let third = pointer.try_advance(point(&[("a", 8)])).unwrap();

        assert_eq!(first.get("a"), Some(&ClientRange::new(0, 2)));
        assert_eq!(second.get("a"), Some(&ClientRange::new(3, 7)));
        assert_eq!(third.get("a"), Some(&ClientRange::new(8, 8)));
    }
}
