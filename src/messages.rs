//! Messages exchanged between replicas.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::{BatchId, BatchPoint, CommandsByClient, RangeMap, ReplicaId};
use crate::traits::Command;

/// A replica's report of a locally formed batch, sent to the trusted leader.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound(
    serialize = "C::ClientId: Serialize",
    deserialize = "C::ClientId: Deserialize<'de>"
))]
pub struct Learn<C: Command> {
    pub replica: ReplicaId,
    pub batch: BatchId,
    pub point: BatchPoint<C::ClientId>,
}

/// The leader's certification of a batch id, broadcast to the group.
///
/// The range map may be empty: a quorum can form around a batch id without
/// the intersection growing past the agreed history. Empty commits still
/// advance the execution cursor everywhere.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound(
    serialize = "C::ClientId: Serialize",
    deserialize = "C::ClientId: Deserialize<'de>"
))]
pub struct Commit<C: Command> {
    pub replica: ReplicaId,
    pub batch: BatchId,
    pub ranges: RangeMap<C::ClientId>,
}

/// Broadcast request for commands the sender is missing, named by the exact
/// incomplete ranges.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound(
    serialize = "C::ClientId: Serialize",
    deserialize = "C::ClientId: Deserialize<'de>"
))]
pub struct UpdateRequest<C: Command> {
    pub replica: ReplicaId,
    pub batch: BatchId,
    pub ranges: RangeMap<C::ClientId>,
}

/// Unicast answer to an [`UpdateRequest`], carrying every command in the
/// requested ranges. Only replicas that can serve the ranges in full reply.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound(
    serialize = "C: Serialize, C::ClientId: Serialize",
    deserialize = "C: Deserialize<'de>, C::ClientId: Deserialize<'de>"
))]
pub struct UpdateReply<C: Command> {
    pub replica: ReplicaId,
    pub batch: BatchId,
    pub ranges: RangeMap<C::ClientId>,
    pub commands: CommandsByClient<C::ClientId, C>,
}

/// Any message a replica can receive from a peer.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound(
    serialize = "C: Serialize, C::ClientId: Serialize",
    deserialize = "C: Deserialize<'de>, C::ClientId: Deserialize<'de>"
))]
pub enum PeerMessage<C: Command> {
    Learn(Learn<C>),
    Commit(Commit<C>),
    UpdateRequest(UpdateRequest<C>),
    UpdateReply(UpdateReply<C>),
}

/// Where an outbound message should go.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Destination {
    /// Unicast to a single replica.
    Peer(ReplicaId),
    /// Broadcast to every other replica in the group.
    All,
}

/// An outbound protocol message paired with its destination. The transport
/// layer resolves destinations to connections.
#[derive(Clone, Debug)]
pub struct Envelope<C: Command> {
    pub to: Destination,
    pub msg: PeerMessage<C>,
}

fn fmt_point<I: fmt::Debug>(f: &mut fmt::Formatter<'_>, point: &BatchPoint<I>) -> fmt::Result {
    f.write_str("{")?;
    for (i, (client, seq)) in point.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{client:?}: {seq}")?;
    }
    f.write_str("}")
}

fn fmt_ranges<I: fmt::Debug>(f: &mut fmt::Formatter<'_>, ranges: &RangeMap<I>) -> fmt::Result {
    f.write_str("{")?;
    for (i, (client, range)) in ranges.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{client:?}: {range}")?;
    }
    f.write_str("}")
}

impl<C: Command> fmt::Display for Learn<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Learn(replica {}, batch {}, point ", self.replica, self.batch)?;
        fmt_point(f, &self.point)?;
        f.write_str(")")
    }
}

impl<C: Command> fmt::Display for Commit<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Commit(replica {}, batch {}, ranges ", self.replica, self.batch)?;
        fmt_ranges(f, &self.ranges)?;
        f.write_str(")")
    }
}

impl<C: Command> fmt::Display for UpdateRequest<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "UpdateRequest(replica {}, batch {}, ranges ",
            self.replica, self.batch
        )?;
        fmt_ranges(f, &self.ranges)?;
        f.write_str(")")
    }
}

impl<C: Command> fmt::Display for UpdateReply<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "UpdateReply(replica {}, batch {}, ranges ",
            self.replica, self.batch
        )?;
        fmt_ranges(f, &self.ranges)?;
        let total: usize = self.commands.values().map(Vec::len).sum();
        write!(f, ", {total} commands)")
    }
}

impl<C: Command> fmt::Display for PeerMessage<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerMessage::Learn(msg) => fmt::Display::fmt(msg, f),
            PeerMessage::Commit(msg) => fmt::Display::fmt(msg, f),
            PeerMessage::UpdateRequest(msg) => fmt::Display::fmt(msg, f),
            PeerMessage::UpdateReply(msg) => fmt::Display::fmt(msg, f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ClientRange, SeqNo};

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    struct TestCommand {
        client: String,
        seq: SeqNo,
    }

    impl Command for TestCommand {
        type ClientId = String;

        fn client_id(&self) -> String {
            self.client.clone()
        }

        fn sequence(&self) -> SeqNo {
            self.seq
        }
    }

    #[test]
    fn test_learn_display_sorted_by_client() {
        let learn: Learn<TestCommand> = Learn {
            replica: ReplicaId(1),
            batch: 4,
            point: [("b".to_owned(), 1), ("a".to_owned(), 2)].into_iter().collect(),
        };
        assert_eq!(
            learn.to_string(),
            "Learn(replica 1, batch 4, point {\"a\": 2, \"b\": 1})"
        );
    }

    #[test]
    fn test_commit_display_empty_ranges() {
        let commit: Commit<TestCommand> = Commit {
            replica: ReplicaId(0),
            batch: 7,
            ranges: RangeMap::new(),
        };
        assert_eq!(commit.to_string(), "Commit(replica 0, batch 7, ranges {})");
    }

    #[test]
    fn test_update_reply_display_counts_commands() {
        let reply: UpdateReply<TestCommand> = UpdateReply {
            replica: ReplicaId(2),
            batch: 0,
            ranges: [("a".to_owned(), ClientRange::new(0, 1))].into_iter().collect(),
            commands: [(
                "a".to_owned(),
                vec![
                    TestCommand { client: "a".to_owned(), seq: 0 },
                    TestCommand { client: "a".to_owned(), seq: 1 },
                ],
            )]
            .into_iter()
            .collect(),
        };
        assert_eq!(
            reply.to_string(),
            "UpdateReply(replica 2, batch 0, ranges {\"a\": [0, 1]}, 2 commands)"
        );
    }

    #[test]
    fn test_peer_message_roundtrip() {
        let msg: PeerMessage<TestCommand> = PeerMessage::Commit(Commit {
            replica: ReplicaId(1),
            batch: 3,
            ranges: [("a".to_owned(), ClientRange::new(2, 5))].into_iter().collect(),
        });

        let bytes = postcard::to_stdvec(&msg).unwrap();
        let decoded: PeerMessage<TestCommand> = postcard::from_bytes(&bytes).unwrap();
        let PeerMessage::Commit(commit) = decoded else {
            panic!("wrong variant");
        };
        assert_eq!(commit.replica, ReplicaId(1));
        assert_eq!(commit.batch, 3);
        assert_eq!(commit.ranges.get("a"), Some(&ClientRange::new(2, 5)));
    }
}
