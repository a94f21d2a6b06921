use crate::core::RaftCore;
use crate::core::State;
use crate::core::UpdateCurrentLeader;
use crate::error::RaftResult;
use crate::raft::VoteRequest;
use crate::raft::VoteResponse;
use crate::AppData;
use crate::AppDataResponse;
use crate::LogId;
use crate::MessageSummary;
use crate::RaftNetwork;
use crate::RaftStorage;

impl<D: AppData, R: AppDataResponse, N: RaftNetwork<D>, S: RaftStorage<D, R>> RaftCore<D, R, N, S> {
    /// Handle a RequestVote RPC from a candidate peer (§5.2, §5.4).
    #[tracing::instrument(level = "trace", skip(self, msg), fields(msg=%msg.summary()))]
    pub(super) async fn handle_vote_request(&mut self, msg: VoteRequest) -> RaftResult<VoteResponse> {
        // Reserve and Passive nodes never vote: they have no opinion on cluster leadership.
        if self.target_state.is_reserve() || self.target_state.is_non_voter() {
            return Ok(VoteResponse {
                term: self.current_term,
                vote_granted: false,
            });
        }

        if msg.term < self.current_term {
            tracing::debug!({candidate=msg.candidate_id}, "rejecting vote request with stale term");
            return Ok(VoteResponse {
                term: self.current_term,
                vote_granted: false,
            });
        }

        // Observing a higher term always takes precedence: step down and adopt it, even if the
        // vote itself ends up being withheld below.
        if msg.term > self.current_term {
            self.update_current_term(msg.term, None);
            self.update_current_leader(UpdateCurrentLeader::Unknown);
            self.save_hard_state().await?;
        }

        // Leaders & candidates observing a request at their own term hold their ground; only a
        // strictly newer term (handled above) can unseat them.
        if self.target_state.is_leader() || self.target_state.is_candidate() {
            if msg.term <= self.current_term {
                return Ok(VoteResponse {
                    term: self.current_term,
                    vote_granted: false,
                });
            }
        }

        // §5.4.1: grant the vote only if we haven't already voted for someone else this term, and
        // the candidate's log is at least as up-to-date as ours.
        let can_vote = match self.voted_for {
            Some(candidate_id) => candidate_id == msg.candidate_id,
            None => true,
        };

        let candidate_log_is_current = msg.last_log_term > self.last_log_id.term
            || (msg.last_log_term == self.last_log_id.term && msg.last_log_index >= self.last_log_id.index);

        if can_vote && candidate_log_is_current {
            self.current_term = msg.term;
            self.voted_for = Some(msg.candidate_id);
            self.save_hard_state().await?;
            self.set_target_state(State::Follower);
            self.update_next_election_timeout(false);

            tracing::debug!({candidate=msg.candidate_id, term=msg.term}, "voting for candidate");

            return Ok(VoteResponse {
                term: self.current_term,
                vote_granted: true,
            });
        }

        Ok(VoteResponse {
            term: self.current_term,
            vote_granted: false,
        })
    }
}
