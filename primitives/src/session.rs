//! The per-partition session table (§4.3): sequence-numbered, deduplicating client sessions.

use std::collections::BTreeMap;
use std::collections::VecDeque;

use serde::Deserialize;
use serde::Serialize;

pub type SessionId = u64;

/// A single pending or delivered session event (§4.3 Event ordering).
///
/// `event_index` is the log index at which the event was produced; `previous_event_index` lets a
/// client detect a gap in delivery before it has ACKed anything.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionEvent {
    pub event_index: u64,
    pub previous_event_index: u64,
    pub service_name: String,
    pub payload: Vec<u8>,
}

/// Server-side record of a single client session.
///
/// Reconstructed identically on every replica because it is mutated only by applying replicated
/// `OpenSessionEntry`/`KeepAliveEntry`/`CloseSessionEntry`/`CommandEntry` log entries (§3 Session).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub member_id: String,
    pub service_name: String,
    pub timeout_ms: u64,
    pub last_updated: i64,
    pub command_sequence: u64,
    pub last_applied: u64,
    /// Cached responses for sequences in `(completeIndex, commandSequence]`, keyed by sequence.
    pub response_cache: BTreeMap<u64, Vec<u8>>,
    /// The log index of the most recent event produced for this session.
    pub event_index: u64,
    /// The highest command sequence the client has acknowledged via `KeepAlive`; bounds
    /// `response_cache` eviction. Distinct from `event_ack_index` below: one is a per-session
    /// sequence dense from 1, the other a log index, and they must never be compared to each
    /// other.
    pub complete_index: u64,
    /// The highest event `event_index` the client has acknowledged via `KeepAlive`; bounds
    /// `pending_events` eviction.
    pub event_ack_index: u64,
    /// Events not yet acknowledged, oldest first; replayed verbatim on reconnect.
    pub pending_events: VecDeque<SessionEvent>,
}

impl Session {
    fn new(id: SessionId, member_id: String, service_name: String, timeout_ms: u64, now: i64) -> Self {
        Self {
            id,
            member_id,
            service_name,
            timeout_ms,
            last_updated: now,
            command_sequence: 0,
            last_applied: 0,
            response_cache: BTreeMap::new(),
            event_index: 0,
            complete_index: 0,
            event_ack_index: 0,
            pending_events: VecDeque::new(),
        }
    }

    fn is_expired(&self, now: i64) -> bool {
        now - self.last_updated > self.timeout_ms as i64
    }

    /// Record a service-produced event, tagging it with the applying entry's log index.
    pub fn emit_event(&mut self, log_index: u64, payload: Vec<u8>) {
        let previous = self.event_index;
        self.event_index = log_index;
        self.pending_events.push_back(SessionEvent {
            event_index: log_index,
            previous_event_index: previous,
            service_name: self.service_name.clone(),
            payload,
        });
    }

    /// Drop events acknowledged up to `event_ack_index` and cached results acknowledged up to
    /// `complete_index` (§4.3 Keep-alive). The two high-water marks are independent: one counts
    /// log indices, the other per-session command sequences.
    fn evict_acknowledged(&mut self) {
        while let Some(front) = self.pending_events.front() {
            if front.event_index <= self.event_ack_index {
                self.pending_events.pop_front();
            } else {
                break;
            }
        }
        self.response_cache.retain(|seq, _| *seq > self.complete_index);
    }
}

/// The outcome of applying a `CommandEntry` against a session, per the exactly-once rule in §4.3.
pub enum ApplyOutcome {
    /// The sequence was already applied; return the cached result without re-invoking the service.
    Cached(Vec<u8>),
    /// The sequence is the next expected one; the caller must invoke the service and then call
    /// [`SessionManager::record_result`] with the outcome.
    Apply,
    /// The sequence is ahead of what this session has applied; out-of-order commands are rejected
    /// rather than buffered, since the messaging plane already guarantees in-order delivery per
    /// session via the replicated log itself.
    OutOfOrder,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("unknown session {0}")]
    UnknownSession(SessionId),
    #[error("session {0} has been closed")]
    ClosedSession(SessionId),
}

/// The per-partition table of live sessions.
///
/// Owned by the primitive service host; mutated only from inside `apply`, so every replica that
/// applies the same entries in the same order reaches an identical table (§5 State-machine
/// safety).
#[derive(Default, Serialize, Deserialize)]
pub struct SessionManager {
    sessions: BTreeMap<SessionId, Session>,
    next_session_id: SessionId,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an `OpenSessionEntry`, assigning the next session id deterministically from the log.
    pub fn open_session(&mut self, member_id: String, service_name: String, timeout_ms: u64, now: i64) -> SessionId {
        self.next_session_id += 1;
        let id = self.next_session_id;
        self.sessions.insert(id, Session::new(id, member_id, service_name, timeout_ms, now));
        id
    }

    pub fn close_session(&mut self, id: SessionId) -> Result<Session, SessionError> {
        self.sessions.remove(&id).ok_or(SessionError::UnknownSession(id))
    }

    pub fn get(&self, id: SessionId) -> Result<&Session, SessionError> {
        self.sessions.get(&id).ok_or(SessionError::UnknownSession(id))
    }

    pub fn get_mut(&mut self, id: SessionId) -> Result<&mut Session, SessionError> {
        self.sessions.get_mut(&id).ok_or(SessionError::UnknownSession(id))
    }

    /// Classify a `CommandEntry{sessionId, sequence}` per the exactly-once rule (§4.3).
    pub fn classify(&self, id: SessionId, sequence: u64) -> Result<ApplyOutcome, SessionError> {
        let session = self.get(id)?;
        if sequence <= session.last_applied {
            match session.response_cache.get(&sequence) {
                Some(cached) => Ok(ApplyOutcome::Cached(cached.clone())),
                // The result was evicted after being acknowledged; a repeat this far behind is
                // itself a protocol violation by the client, but we have nothing useful to return
                // beyond treating it as already applied with no payload.
                None => Ok(ApplyOutcome::Cached(Vec::new())),
            }
        } else if sequence == session.last_applied + 1 {
            Ok(ApplyOutcome::Apply)
        } else {
            Ok(ApplyOutcome::OutOfOrder)
        }
    }

    /// Record the result of applying `sequence` against `id`, advancing `last_applied` and caching
    /// the response for future dedup.
    pub fn record_result(&mut self, id: SessionId, sequence: u64, result: Vec<u8>) -> Result<(), SessionError> {
        let session = self.get_mut(id)?;
        session.last_applied = sequence;
        session.response_cache.insert(sequence, result);
        Ok(())
    }

    /// Apply a `KeepAliveEntry`: refresh the session's clock and trim acknowledged state.
    pub fn keep_alive(
        &mut self,
        id: SessionId,
        command_sequence_ack: u64,
        event_index_ack: u64,
        now: i64,
    ) -> Result<(), SessionError> {
        let session = self.get_mut(id)?;
        session.last_updated = now;
        session.complete_index = session.complete_index.max(command_sequence_ack);
        session.event_ack_index = session.event_ack_index.max(event_index_ack);
        session.evict_acknowledged();
        Ok(())
    }

    /// Scan for sessions whose timeout has lapsed relative to `now` (the applying entry's
    /// timestamp) and remove them, returning the closed sessions (§4.3 Expiration).
    ///
    /// Because `now` is itself a replicated value, every replica that applies the same entry
    /// computes the same expiration set.
    pub fn expire(&mut self, now: i64) -> Vec<Session> {
        let expired_ids: Vec<SessionId> = self.sessions.iter().filter(|(_, s)| s.is_expired(now)).map(|(id, _)| *id).collect();
        expired_ids.into_iter().filter_map(|id| self.sessions.remove(&id)).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
