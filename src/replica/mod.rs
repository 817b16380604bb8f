//! The replica runtime: one task per replica driving the protocol state
//! machines from an event loop.

mod runner;

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::config::BatchConfig;
use crate::core::{BatchId, BatchPointer, BatchQuorumChecker, Batcher, ReplicaId, SeqNo};
use crate::messages::{Envelope, PeerMessage};
use crate::traits::Command;

/// Protocol-divergence failures. Once any of these is observed the replica's
/// state can no longer be trusted and the run loop halts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalError {
    /// A backfill reply failed to complete the ranges recorded for its batch.
    UpdateIncomplete,
    /// A batch marked executable was missing commands at execution time.
    MissingCommands,
    /// The decided-command receiver hung up; executed commands would be lost.
    DecidedClosed,
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalError::UpdateIncomplete => {
                f.write_str("backfill reply left batch ranges incomplete")
            }
            FatalError::MissingCommands => f.write_str("executable batch is missing commands"),
            FatalError::DecidedClosed => f.write_str("decided command receiver closed"),
        }
    }
}

impl std::error::Error for FatalError {}

/// A single replica of the batching group.
///
/// The replica logs client commands, reports batches to the trusted leader,
/// certifies batches when it is the leader, and executes certified batches
/// in cursor order. All peer traffic flows through the provided channels;
/// the transport is the caller's concern.
pub struct BatchReplica<C: Command> {
    id: ReplicaId,
    config: BatchConfig,
    batcher: Batcher<C>,
    quorum: BatchQuorumChecker<C::ClientId>,
    pointer: BatchPointer<C::ClientId>,
    /// Next batch id to execute. Advances strictly by one.
    cursor: BatchId,
    commands_since_batch: u32,
    arrivals: HashMap<(C::ClientId, SeqNo), Instant>,
    leader_rx: watch::Receiver<ReplicaId>,
    commands_rx: mpsc::Receiver<C>,
    peers_rx: mpsc::Receiver<PeerMessage<C>>,
    outbound_tx: mpsc::Sender<Envelope<C>>,
    decided_tx: mpsc::Sender<C>,
    cancel: CancellationToken,
}

impl<C: Command> BatchReplica<C> {
    /// Wire up a replica.
    ///
    /// `leader_rx` carries the currently trusted leader. `commands_rx` is
    /// local client ingress, `peers_rx` delivers decoded peer messages, and
    /// `outbound_tx` takes addressed messages for the transport to deliver.
    /// Executed commands are pushed to `decided_tx` in the group-agreed
    /// order.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        id: ReplicaId,
        config: BatchConfig,
        leader_rx: watch::Receiver<ReplicaId>,
        commands_rx: mpsc::Receiver<C>,
        peers_rx: mpsc::Receiver<PeerMessage<C>>,
        outbound_tx: mpsc::Sender<Envelope<C>>,
        decided_tx: mpsc::Sender<C>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            batcher: Batcher::new(),
            quorum: BatchQuorumChecker::new(config.replicas),
            pointer: BatchPointer::new(),
            cursor: 0,
            commands_since_batch: 0,
            arrivals: HashMap::new(),
            config,
            leader_rx,
            commands_rx,
            peers_rx,
            outbound_tx,
            decided_tx,
            cancel,
        }
    }
}
