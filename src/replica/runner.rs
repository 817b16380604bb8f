//! Replica event loop and message handlers.

use std::pin::pin;
use std::time::Instant;

use error_stack::{Report, ResultExt};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, instrument, trace, warn};

use super::{BatchReplica, FatalError};
use crate::core::ExecutionPhase;
use crate::messages::{
    Commit, Destination, Envelope, Learn, PeerMessage, UpdateReply, UpdateRequest,
};
use crate::traits::Command;

impl<C: Command> BatchReplica<C> {
    /// Drive the replica until cancellation or a protocol-divergence failure.
    ///
    /// Returns `Ok(())` on cancellation or when the leader signal closes.
    /// Closed command or peer channels merely disable their event sources;
    /// the loop keeps serving the remaining ones.
    ///
    /// # Errors
    ///
    /// Returns a [`FatalError`] report when the replica's state has diverged
    /// from the group: a backfill reply that fails to complete the ranges it
    /// answered, an executable batch with missing commands, or a closed
    /// decided-command receiver.
    #[instrument(skip_all, fields(replica = %self.id))]
    pub async fn run(mut self) -> Result<(), Report<FatalError>> {
        debug!(
            replicas = self.config.replicas,
            quorum = self.config.quorum(),
            "replica started"
        );

        let mut timer = pin!(tokio::time::sleep(self.config.batch_timeout));

        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    debug!("replica cancelled");
                    return Ok(());
                }

                changed = self.leader_rx.changed() => {
                    if changed.is_err() {
                        debug!("leader signal closed");
                        return Ok(());
                    }
                    let leader = *self.leader_rx.borrow_and_update();
                    debug!(%leader, "trusted leader changed");
                }

                Some(command) = self.commands_rx.recv() => {
                    if self.handle_command(command).await? {
                        timer.as_mut().reset(tokio::time::Instant::now() + self.config.batch_timeout);
                    }
                }

                Some(msg) = self.peers_rx.recv() => {
                    self.handle_peer_message(msg).await?;
                }

                () = timer.as_mut() => {
                    trace!("inactivity timeout, attempting batch");
                    self.try_send_learn().await?;
                    timer.as_mut().reset(tokio::time::Instant::now() + self.config.batch_timeout);
                }
            }
        }
    }

    /// Log a client command. Returns true when the volume threshold produced
    /// a new batch, so the caller can restart the inactivity timer.
    async fn handle_command(&mut self, command: C) -> Result<bool, Report<FatalError>> {
        trace!(client = ?command.client_id(), seq = command.sequence(), "client command");
        self.arrivals
            .insert((command.client_id(), command.sequence()), Instant::now());
        self.batcher.log_command(command);

        self.commands_since_batch =
            (self.commands_since_batch + 1) % self.config.max_batch_commands;
        if self.commands_since_batch != 0 {
            return Ok(false);
        }
        self.try_send_learn().await
    }

    /// Form the next batch if the local view has grown, and report it to the
    /// trusted leader. A replica that trusts itself handles the learn
    /// directly.
    async fn try_send_learn(&mut self) -> Result<bool, Report<FatalError>> {
        let Some(batch) = self.batcher.try_next_batch() else {
            return Ok(false);
        };
        let leader = *self.leader_rx.borrow();
        debug!(batch = batch.id, clients = batch.point.len(), %leader, "formed batch");
        let learn = Learn {
            replica: self.id,
            batch: batch.id,
            point: batch.point,
        };
        if leader == self.id {
            self.handle_learn(learn).await?;
        } else {
            self.send(Destination::Peer(leader), PeerMessage::Learn(learn));
        }
        Ok(true)
    }

    async fn handle_peer_message(&mut self, msg: PeerMessage<C>) -> Result<(), Report<FatalError>> {
        match msg {
            PeerMessage::Learn(learn) => self.handle_learn(learn).await,
            PeerMessage::Commit(commit) => self.handle_commit(commit).await,
            PeerMessage::UpdateRequest(request) => {
                self.handle_update_request(request);
                Ok(())
            }
            PeerMessage::UpdateReply(reply) => self.handle_update_reply(reply).await,
        }
    }

    /// Leader side: aggregate a learn and certify the batch id once a
    /// majority of distinct replicas reported it.
    ///
    /// The commit is broadcast on every quorum edge, even when the
    /// intersection did not advance the agreed history. The leader applies
    /// its own commit in place of receiving the broadcast.
    async fn handle_learn(&mut self, learn: Learn<C>) -> Result<(), Report<FatalError>> {
        trace!(%learn, "received learn");
        let batch = learn.batch;
        self.quorum.record_learn(batch, learn.replica, learn.point);
        if !self.quorum.quorum_reached(batch) {
            return Ok(());
        }

        let candidate = self.quorum.intersect(batch);
        let ranges = self.pointer.try_advance(candidate).unwrap_or_default();
        debug!(batch, clients = ranges.len(), "quorum reached, broadcasting commit");
        let commit = Commit {
            replica: self.id,
            batch,
            ranges,
        };
        self.send(Destination::All, PeerMessage::Commit(commit.clone()));
        self.handle_commit(commit).await
    }

    /// Record a commit's ranges and either mark the batch executable or ask
    /// the group for the commands this replica is missing.
    async fn handle_commit(&mut self, commit: Commit<C>) -> Result<(), Report<FatalError>> {
        trace!(%commit, "received commit");
        let batch = commit.batch;
        let ranges = commit.ranges;
        if batch < self.cursor || !self.quorum.record_ranges(batch, ranges.clone()) {
            debug!(batch, cursor = self.cursor, "ignoring stale commit");
            return Ok(());
        }

        let incomplete = self.batcher.incomplete_ranges(&ranges);
        if incomplete.is_empty() {
            self.quorum.mark_executable(batch);
            return self.advance_cursor().await;
        }

        debug!(batch, clients = incomplete.len(), "commit not locally complete, requesting backfill");
        let request = UpdateRequest {
            replica: self.id,
            batch,
            ranges: incomplete,
        };
        self.send(Destination::All, PeerMessage::UpdateRequest(request));
        Ok(())
    }

    /// Serve a peer's backfill request, but only if every requested range can
    /// be answered in full. An incomplete replica stays silent and lets a
    /// complete peer answer.
    fn handle_update_request(&self, request: UpdateRequest<C>) {
        trace!(%request, "received update request");
        let Some(commands) = self.batcher.commands_in_ranges(&request.ranges) else {
            trace!(batch = request.batch, "cannot serve requested ranges in full");
            return;
        };
        let requester = request.replica;
        let reply = UpdateReply {
            replica: self.id,
            batch: request.batch,
            ranges: request.ranges,
            commands,
        };
        debug!(batch = reply.batch, %requester, "serving update request");
        self.send(Destination::Peer(requester), PeerMessage::UpdateReply(reply));
    }

    /// Merge a backfill reply. A reply answers the exact ranges this replica
    /// requested, so after merging, the batch's recorded ranges must be
    /// locally complete; anything else means the group has diverged.
    async fn handle_update_reply(
        &mut self,
        reply: UpdateReply<C>,
    ) -> Result<(), Report<FatalError>> {
        trace!(%reply, "received update reply");
        let batch = reply.batch;
        match self.quorum.phase(batch) {
            ExecutionPhase::Executable | ExecutionPhase::Executed => {
                debug!(batch, "ignoring update reply, batch already complete");
                return Ok(());
            }
            ExecutionPhase::Unknown => {
                // The commit for this batch has not arrived here yet. Keep the
                // commands; completeness is judged when the commit lands.
                debug!(batch, "update reply before commit, merging commands only");
                self.batcher.merge_commands(reply.commands);
                return Ok(());
            }
            ExecutionPhase::RangesKnown => {}
        }

        self.batcher.merge_commands(reply.commands);

        let ranges = self.quorum.execute_ranges(batch).cloned().unwrap_or_default();
        let incomplete = self.batcher.incomplete_ranges(&ranges);
        if !incomplete.is_empty() {
            return Err(Report::new(FatalError::UpdateIncomplete).attach_printable(format!(
                "batch {batch}: {} ranges still missing after reply",
                incomplete.len()
            )));
        }
        self.quorum.mark_executable(batch);
        self.advance_cursor().await
    }

    /// Execute every consecutive executable batch starting at the cursor.
    ///
    /// Commands are delivered grouped by client in ascending client order,
    /// sequence-ascending within each client, so every replica emits the
    /// same sequence. Delivery waits for the consumer rather than dropping.
    async fn advance_cursor(&mut self) -> Result<(), Report<FatalError>> {
        while self.quorum.phase(self.cursor) == ExecutionPhase::Executable {
            let batch = self.cursor;
            let ranges = self.quorum.execute_ranges(batch).cloned().unwrap_or_default();
            let Some(commands) = self.batcher.commands_in_ranges(&ranges) else {
                return Err(Report::new(FatalError::MissingCommands)
                    .attach_printable(format!("batch {batch} cannot be assembled for execution")));
            };

            let mut executed = 0usize;
            for client_commands in commands.into_values() {
                for command in client_commands {
                    let key = (command.client_id(), command.sequence());
                    if let Some(arrived) = self.arrivals.remove(&key) {
                        trace!(
                            client = ?key.0,
                            seq = key.1,
                            elapsed = ?arrived.elapsed(),
                            "command decided"
                        );
                    }
                    executed += 1;
                    self.decided_tx
                        .send(command)
                        .await
                        .change_context(FatalError::DecidedClosed)?;
                }
            }

            self.quorum.mark_executed(batch);
            self.cursor += 1;
            debug!(batch, executed, cursor = self.cursor, "batch executed");
        }
        Ok(())
    }

    /// Queue an outbound message without waiting. A full or closed transport
    /// queue drops the message rather than blocking the event loop.
    fn send(&self, to: Destination, msg: PeerMessage<C>) {
        if let Err(e) = self.outbound_tx.try_send(Envelope { to, msg }) {
            match e {
                TrySendError::Full(_) => warn!(?to, "outbound queue full, dropping message"),
                TrySendError::Closed(_) => warn!(?to, "outbound queue closed, dropping message"),
            }
        }
    }
}
