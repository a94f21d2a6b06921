//! The append-only ordered log (§4.1 Log & Storage).
//!
//! Holds `LogEntry`s in memory, indexed by their log index; compaction drops the prefix covered
//! by a snapshot. Durability (fsync-before-ack) is a concern of [`crate::persist::Persistence`],
//! layered on top by [`crate::store::AtomixStore`] — this type only maintains the in-process
//! ordering and contiguity invariants from §3/§4.1.

use std::collections::BTreeMap;

use atomix_raft::raft::Entry;
use atomix_raft::AppData;
use atomix_raft::LogId;

/// Errors a `PartitionLog` operation can fail with (§4.1 Contracts).
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("append is out of order: expected index {expected}, got {got}")]
    OutOfOrder { expected: u64, got: u64 },

    #[error("cannot truncate after {requested}: index {commit_index} is already committed")]
    AlreadyCommitted { requested: u64, commit_index: u64 },

    #[error("log index {0} has already been compacted away")]
    Compacted(u64),
}

/// An ordered, gap-free sequence of log entries for one partition replica.
///
/// Invariant (§3 Log): `firstIndex <= commitIndex + 1 <= lastIndex + 1`. Indices are strictly
/// monotonic from 1 within the retained window; the window's lower bound moves forward only via
/// [`PartitionLog::compact`].
pub struct PartitionLog<D: AppData> {
    entries: BTreeMap<u64, Entry<D>>,
    /// One past the index of the last entry ever compacted away. `1` if nothing has been
    /// compacted yet.
    first_index: u64,
    /// The term of the entry at `first_index - 1`, i.e. the last compacted entry; used to answer
    /// `term()` for the boundary just behind the retained window (as a snapshot's `last_log_id`
    /// would).
    purged_term: u64,
    commit_index: u64,
}

impl<D: AppData> Default for PartitionLog<D> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            first_index: 1,
            purged_term: 0,
            commit_index: 0,
        }
    }
}

impl<D: AppData> PartitionLog<D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// One past the last compacted index; `get`/`append` below this index are invalid.
    pub fn first_index(&self) -> u64 {
        self.first_index
    }

    /// The highest index currently retained, or `first_index - 1` if the log (the retained tail)
    /// is empty.
    pub fn last_index(&self) -> u64 {
        self.entries.keys().next_back().copied().unwrap_or(self.first_index - 1)
    }

    pub fn commit_index(&self) -> u64 {
        self.commit_index
    }

    pub fn set_commit_index(&mut self, index: u64) {
        debug_assert!(index <= self.last_index(), "commit index must not exceed last_index");
        self.commit_index = index;
    }

    /// Append a contiguous batch of entries. Fails with [`LogError::OutOfOrder`] if
    /// `entries[0].index != last_index() + 1` (§4.1 Contracts).
    pub fn append(&mut self, entries: &[Entry<D>]) -> Result<(), LogError> {
        if entries.is_empty() {
            return Ok(());
        }
        let expected = self.last_index() + 1;
        let got = entries[0].log_id.index;
        if got != expected {
            return Err(LogError::OutOfOrder { expected, got });
        }
        for (offset, entry) in entries.iter().enumerate() {
            debug_assert_eq!(entry.log_id.index, expected + offset as u64);
            self.entries.insert(entry.log_id.index, entry.clone());
        }
        Ok(())
    }

    /// Overwrite-or-append a single entry at its own index, truncating any conflicting suffix
    /// first. Used by the follower side of `AppendEntries` when a new entry conflicts with an
    /// existing one at the same index but a different term (§4.2 Log replication).
    pub fn insert_overwriting(&mut self, entry: Entry<D>) -> Result<(), LogError> {
        self.truncate_after(entry.log_id.index.saturating_sub(1))?;
        self.entries.insert(entry.log_id.index, entry);
        Ok(())
    }

    /// Remove every entry with `index > i`. Fails with [`LogError::AlreadyCommitted`] if that
    /// would delete a committed entry (§4.1 Contracts).
    pub fn truncate_after(&mut self, index: u64) -> Result<(), LogError> {
        if index < self.commit_index {
            return Err(LogError::AlreadyCommitted { requested: index, commit_index: self.commit_index });
        }
        let to_remove: Vec<u64> = self.entries.range(index + 1..).map(|(i, _)| *i).collect();
        for i in to_remove {
            self.entries.remove(&i);
        }
        Ok(())
    }

    pub fn get(&self, index: u64) -> Option<&Entry<D>> {
        self.entries.get(&index)
    }

    /// `[from, to)`, clamped to the retained window.
    pub fn get_range(&self, from: u64, to: u64) -> Vec<Entry<D>> {
        self.entries.range(from..to).map(|(_, e)| e.clone()).collect()
    }

    /// The term of the entry at `index`, or of the purge boundary if `index == first_index - 1`.
    pub fn term(&self, index: u64) -> Option<u64> {
        if index == self.first_index.saturating_sub(1) {
            return Some(self.purged_term);
        }
        self.entries.get(&index).map(|e| e.log_id.term)
    }

    /// Atomically drop every entry with `index < snapshot.index` once `snapshot` has been
    /// durably written (§4.1 `compact` contract: the caller must have already persisted the
    /// snapshot bytes before calling this — see [`crate::store::AtomixStore::compact`]).
    pub fn compact(&mut self, snapshot: LogId) {
        if snapshot.index < self.first_index.saturating_sub(1) {
            // Already compacted at least this far; nothing to do.
            return;
        }
        self.purged_term = snapshot.term;
        self.first_index = snapshot.index + 1;
        self.entries = self.entries.split_off(&(snapshot.index + 1));
        if self.commit_index < snapshot.index {
            self.commit_index = snapshot.index;
        }
    }
}

#[cfg(test)]
mod tests {
    use atomix_raft::raft::EntryPayload;

    use super::*;

    fn entry(index: u64, term: u64) -> Entry<u64> {
        Entry {
            log_id: LogId::new(term, index),
            timestamp: index as i64,
            payload: EntryPayload::Normal(atomix_raft::raft::EntryNormal { data: index }),
        }
    }

    #[test]
    fn append_rejects_gaps() {
        let mut log: PartitionLog<u64> = PartitionLog::new();
        log.append(&[entry(1, 1)]).unwrap();
        let err = log.append(&[entry(3, 1)]).unwrap_err();
        assert!(matches!(err, LogError::OutOfOrder { expected: 2, got: 3 }));
    }

    #[test]
    fn truncate_after_protects_committed_entries() {
        let mut log: PartitionLog<u64> = PartitionLog::new();
        log.append(&[entry(1, 1), entry(2, 1), entry(3, 1)]).unwrap();
        log.set_commit_index(2);
        let err = log.truncate_after(1).unwrap_err();
        assert!(matches!(err, LogError::AlreadyCommitted { requested: 1, commit_index: 2 }));
        log.truncate_after(2).unwrap();
        assert_eq!(log.last_index(), 2);
    }

    #[test]
    fn compact_drops_prefix_and_keeps_tail_readable() {
        let mut log: PartitionLog<u64> = PartitionLog::new();
        log.append(&[entry(1, 1), entry(2, 1), entry(3, 2)]).unwrap();
        log.set_commit_index(3);
        log.compact(LogId::new(1, 2));
        assert_eq!(log.first_index(), 3);
        assert!(log.get(1).is_none());
        assert!(log.get(2).is_none());
        assert_eq!(log.get(3).unwrap().log_id.index, 3);
        assert_eq!(log.term(2), Some(1));
    }
}
