//! Batched agreement and ordered execution for replicated state machines.
//!
//! Replicas log client commands into per-client logs and periodically report
//! a *batch point*, the highest sequence number seen per client, to a trusted
//! leader. The leader collects these reports per batch id; once a majority of
//! distinct replicas have reported an id, it intersects the reported points
//! and broadcasts a [`Commit`] naming the per-client sequence ranges the
//! group certified. Every replica then executes certified batches in batch-id
//! order, producing an identical command sequence everywhere. Replicas
//! missing commands named by a commit fetch them from peers before
//! executing.
//!
//! The protocol state machines ([`crate::core`]) are pure and synchronous;
//! the [`replica::BatchReplica`] task drives them from tokio channels and
//! leaves the wire transport to the caller. [`codec::PeerCodec`] frames
//! [`PeerMessage`]s for TCP-like transports.
//!
//! # Quick start
//!
//! ```ignore
//! let (leader_tx, leader_rx) = tokio::sync::watch::channel(ReplicaId(0));
//! let (command_tx, command_rx) = tokio::sync::mpsc::channel(64);
//! let (peers_tx, peers_rx) = tokio::sync::mpsc::channel(64);
//! let (outbound_tx, outbound_rx) = tokio::sync::mpsc::channel(64);
//! let (decided_tx, decided_rx) = tokio::sync::mpsc::channel(64);
//!
//! let replica = BatchReplica::new(
//!     ReplicaId(0),
//!     BatchConfig::default(),
//!     leader_rx,
//!     command_rx,
//!     peers_rx,
//!     outbound_tx,
//!     decided_tx,
//!     CancellationToken::new(),
//! );
//! tokio::spawn(replica.run());
//! // feed peer traffic into peers_tx, deliver outbound_rx envelopes,
//! // apply decided_rx commands to the state machine.
//! ```

#![warn(clippy::pedantic)]

pub mod codec;
mod config;
pub mod core;
mod messages;
pub mod replica;
mod traits;

pub use codec::PeerCodec;
pub use config::BatchConfig;
pub use messages::{Commit, Destination, Envelope, Learn, PeerMessage, UpdateReply, UpdateRequest};
pub use replica::{BatchReplica, FatalError};
pub use traits::Command;

pub use crate::core::{
    Batch, BatchId, BatchPoint, ClientRange, CommandsByClient, ExecutionPhase, RangeMap,
    ReplicaId, SeqNo,
};
