//! Trait implemented by user command types.

use std::fmt;
use std::hash::Hash;

use crate::core::SeqNo;

/// A client command as seen by the agreement layer.
///
/// The protocol never inspects command payloads. It only needs to know which
/// client issued a command and where it sits in that client's sequence, so
/// commands can be grouped into per-client logs and replayed in a
/// deterministic order on every replica.
pub trait Command: Clone + fmt::Debug + Send + Sync + 'static {
    /// Identity of the issuing client. Client ids order the execution of
    /// commands within a batch, so the ordering must be stable across
    /// replicas.
    type ClientId: Clone + Ord + Hash + fmt::Debug + Send + Sync + 'static;

    /// The client that issued this command.
    fn client_id(&self) -> Self::ClientId;

    /// The client-assigned sequence number of this command.
    fn sequence(&self) -> SeqNo;
}
