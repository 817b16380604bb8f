//! Pure protocol state machines.
//!
//! Everything in this module is synchronous and free of I/O: command logs
//! and batch formation, learn aggregation with quorum detection, and the
//! agreed batch point history. The replica runtime drives these from its
//! event loop.

pub(crate) mod batcher;
pub(crate) mod pointer;
pub(crate) mod quorum;
pub(crate) mod types;

pub use batcher::{Batch, Batcher};
pub use pointer::BatchPointer;
pub use quorum::{BatchQuorumChecker, ExecutionPhase};
pub use types::{BatchId, BatchPoint, ClientRange, CommandsByClient, RangeMap, ReplicaId, SeqNo};
