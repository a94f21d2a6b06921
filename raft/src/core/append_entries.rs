use crate::core::RaftCore;
use crate::core::State;
use crate::core::UpdateCurrentLeader;
use crate::error::RaftError;
use crate::error::RaftResult;
use crate::raft::AppendEntriesRequest;
use crate::raft::AppendEntriesResponse;
use crate::raft::ConflictOpt;
use crate::raft::Entry;
use crate::raft::EntryPayload;
use crate::AppData;
use crate::AppDataResponse;
use crate::LogId;
use crate::MessageSummary;
use crate::RaftNetwork;
use crate::RaftStorage;

impl<D: AppData, R: AppDataResponse, N: RaftNetwork<D>, S: RaftStorage<D, R>> RaftCore<D, R, N, S> {
    /// Handle an AppendEntries RPC from the cluster leader (§5.3).
    #[tracing::instrument(level = "trace", skip(self, msg), fields(msg=%msg.summary()))]
    pub(super) async fn handle_append_entries_request(
        &mut self,
        msg: AppendEntriesRequest<D>,
    ) -> RaftResult<AppendEntriesResponse> {
        // A request from a stale leader is rejected outright; a request from an equal-or-newer
        // term moves this node's term forward and resets its election clock regardless of outcome.
        if msg.term < self.current_term {
            return Ok(AppendEntriesResponse {
                term: self.current_term,
                success: false,
                conflict_opt: None,
            });
        }

        if !self.target_state.is_follower() && !self.target_state.is_candidate() && !self.target_state.is_non_voter() {
            return Err(RaftError::RaftNetwork(anyhow::anyhow!(
                "received AppendEntries while in state {:?}",
                self.target_state
            )));
        }

        if msg.term > self.current_term {
            self.update_current_term(msg.term, None);
            self.save_hard_state().await?;
        }

        self.update_current_leader(UpdateCurrentLeader::OtherNode(msg.leader_id));
        if self.target_state == State::Candidate {
            self.set_target_state(State::Follower);
        }
        self.update_next_election_timeout(true);

        // Reject if this node's log does not contain an entry at `prev_log_id` matching the
        // leader's term there, per the log-matching property.
        if msg.prev_log_id.index != 0 {
            let ok = match self.storage.try_get_log_entry(msg.prev_log_id.index).await {
                Ok(Some(entry)) => entry.log_id == msg.prev_log_id,
                Ok(None) => msg.prev_log_id == self.last_applied && msg.prev_log_id.index <= self.last_applied.index,
                Err(err) => return Err(self.map_fatal_storage_error(err)),
            };
            if !ok {
                let conflict_opt = self.find_conflict_opt(msg.prev_log_id).await?;
                return Ok(AppendEntriesResponse {
                    term: self.current_term,
                    success: false,
                    conflict_opt,
                });
            }
        }

        if !msg.entries.is_empty() {
            self.append_and_replicate_entries(msg.entries).await?;
        }

        if msg.leader_commit > self.commit_index {
            self.commit_index = std::cmp::min(msg.leader_commit, self.last_log_id.index);
            self.replicate_to_state_machine_if_needed(vec![]).await?;
        }

        self.report_metrics(crate::Update::Ignore);

        Ok(AppendEntriesResponse {
            term: self.current_term,
            success: true,
            conflict_opt: None,
        })
    }

    /// Find the most recent entry this node holds which does not conflict with the leader's log,
    /// used to populate `AppendEntriesResponse::conflict_opt` (§5.3 conflicting-term optimization).
    async fn find_conflict_opt(&mut self, prev_log_id: LogId) -> RaftResult<Option<ConflictOpt>> {
        if self.last_log_id.index < prev_log_id.index {
            return Ok(Some(ConflictOpt { log_id: self.last_log_id }));
        }

        let conflicting_term_start = self
            .storage
            .get_log_entries(..=prev_log_id.index)
            .await
            .map_err(|err| self.map_fatal_storage_error(err))?
            .into_iter()
            .rev()
            .find(|entry| entry.log_id.term < prev_log_id.term)
            .map(|entry| entry.log_id)
            .unwrap_or_default();

        Ok(Some(ConflictOpt { log_id: conflicting_term_start }))
    }

    /// Delete any conflicting entries already on disk, then append the leader's entries.
    async fn append_and_replicate_entries(&mut self, entries: Vec<Entry<D>>) -> RaftResult<()> {
        let first = entries[0].log_id;

        if self.last_log_id.index >= first.index {
            self.storage
                .delete_logs_from(first.index..)
                .await
                .map_err(|err| self.map_fatal_storage_error(err))?;
            if self.last_applied.index >= first.index {
                self.last_applied = LogId::new(0, first.index.saturating_sub(1));
            }
        }

        let refs: Vec<&Entry<D>> = entries.iter().collect();
        self.storage.append_to_log(&refs).await.map_err(|err| self.map_fatal_storage_error(err))?;

        self.last_log_id = entries.last().expect("non-empty").log_id;

        for entry in &entries {
            if let EntryPayload::ConfigChange(change) = &entry.payload {
                self.update_membership(change.membership.clone())?;
            }
        }

        Ok(())
    }

    /// Apply newly committed entries (if any were just handed to this call) plus anything still
    /// outstanding up to `commit_index`, mirroring the leader-side replication-to-state-machine
    /// path in `core::client`.
    async fn replicate_to_state_machine_if_needed(&mut self, _new_entries: Vec<Entry<D>>) -> RaftResult<()> {
        if self.last_applied.index >= self.commit_index {
            return Ok(());
        }

        let start = self.last_applied.index + 1;
        let entries = self
            .storage
            .get_log_entries(start..=self.commit_index)
            .await
            .map_err(|err| self.map_fatal_storage_error(err))?;

        if entries.is_empty() {
            return Ok(());
        }

        let refs: Vec<&Entry<D>> = entries.iter().filter(|e| matches!(e.payload, EntryPayload::Normal(_))).collect();
        if !refs.is_empty() {
            self.storage.apply_to_state_machine(&refs).await.map_err(|err| self.map_fatal_storage_error(err))?;
        }

        self.last_applied = entries.last().expect("non-empty").log_id;
        self.trigger_log_compaction_if_needed(false);
        Ok(())
    }
}
