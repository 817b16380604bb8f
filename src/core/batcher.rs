//! Per-client command logs and local batch formation.
//!
//! The batcher is a pure state machine: it owns every command this replica
//! has seen, grouped into per-client logs, and decides when the replica's
//! view of client progress has grown enough to report a new batch.

use std::collections::BTreeMap;

use super::types::{BatchId, BatchPoint, ClientRange, CommandsByClient, RangeMap, SeqNo};
use crate::traits::Command;

/// A locally formed batch: an id and the batch point it captured.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Batch<I> {
    pub id: BatchId,
    pub point: BatchPoint<I>,
}

#[derive(Clone, Debug)]
struct ClientLog<C> {
    commands: BTreeMap<SeqNo, C>,
    highest_seen: SeqNo,
}

impl<C> Default for ClientLog<C> {
    fn default() -> Self {
        Self {
            commands: BTreeMap::new(),
            highest_seen: 0,
        }
    }
}

/// Command store and batch former for a single replica.
pub struct Batcher<C: Command> {
    logs: BTreeMap<C::ClientId, ClientLog<C>>,
    batches: Vec<Batch<C::ClientId>>,
}

impl<C: Command> Batcher<C> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            logs: BTreeMap::new(),
            batches: Vec::new(),
        }
    }

    /// Record a command in its client's log. Logging the same sequence number
    /// twice overwrites the previous entry, so redelivery is harmless.
    pub fn log_command(&mut self, command: C) {
        let seq = command.sequence();
        let log = self.logs.entry(command.client_id()).or_default();
        log.commands.insert(seq, command);
        log.highest_seen = log.highest_seen.max(seq);
    }

    /// Look up a single logged command.
    #[must_use]
    pub fn get(&self, client: &C::ClientId, seq: SeqNo) -> Option<&C> {
        self.logs.get(client).and_then(|log| log.commands.get(&seq))
    }

    /// Snapshot the highest sequence number seen for every known client.
    #[must_use]
    pub fn current_batch_point(&self) -> BatchPoint<C::ClientId> {
        self.logs
            .iter()
            .map(|(client, log)| (client.clone(), log.highest_seen))
            .collect()
    }

    /// The subset of `ranges` this replica cannot fully serve from its logs.
    ///
    /// Completeness is judged per range: a single missing sequence number
    /// makes the whole range incomplete.
    #[must_use]
    pub fn incomplete_ranges(&self, ranges: &RangeMap<C::ClientId>) -> RangeMap<C::ClientId> {
        ranges
            .iter()
            .filter(|(client, range)| !self.has_range(client, **range))
            .map(|(client, range)| (client.clone(), *range))
            .collect()
    }

    fn has_range(&self, client: &C::ClientId, range: ClientRange) -> bool {
        let Some(log) = self.logs.get(client) else {
            return false;
        };
        range.seqs().all(|seq| log.commands.contains_key(&seq))
    }

    /// Extract every command covered by `ranges`, grouped per client and
    /// sequence-ascending within each group.
    ///
    /// Returns `None` if any covered command is missing. Callers that have
    /// already established completeness treat `None` as a divergence.
    #[must_use]
    pub fn commands_in_ranges(
        &self,
        ranges: &RangeMap<C::ClientId>,
    ) -> Option<CommandsByClient<C::ClientId, C>> {
        let mut out = CommandsByClient::new();
        for (client, range) in ranges {
            let log = self.logs.get(client)?;
            let mut commands = Vec::new();
            for seq in range.seqs() {
                commands.push(log.commands.get(&seq)?.clone());
            }
            out.insert(client.clone(), commands);
        }
        Some(out)
    }

    /// Merge commands received from a peer into the local logs.
    pub fn merge_commands(&mut self, commands: CommandsByClient<C::ClientId, C>) {
        for client_commands in commands.into_values() {
            for command in client_commands {
                self.log_command(command);
            }
        }
    }

    /// Form the next local batch if the current batch point has grown past
    /// the previously recorded one.
    ///
    /// The first batch only requires a non-empty point. Afterwards growth
    /// means a client unseen by the previous batch, or a strictly higher
    /// sequence number for a known one. Batch ids start at zero and increment
    /// by one per formed batch.
    pub fn try_next_batch(&mut self) -> Option<Batch<C::ClientId>> {
        let point = self.current_batch_point();
        let Some(prev) = self.batches.last() else {
            if point.is_empty() {
                return None;
            }
            let batch = Batch { id: 0, point };
            self.batches.push(batch.clone());
            return Some(batch);
        };

        let grown = point.len() > prev.point.len()
            || point.iter().any(|(client, seq)| {
                prev.point.get(client).is_none_or(|prev_seq| *seq > *prev_seq)
            });
        if !grown {
            return None;
        }

        let batch = Batch {
            id: prev.id + 1,
            point,
        };
        self.batches.push(batch.clone());
        Some(batch)
    }
}

impl<C: Command> Default for Batcher<C> {
    fn default() -> Self {
        Self::new()
    }
}
