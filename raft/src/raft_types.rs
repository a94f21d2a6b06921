//! Small value types shared across the Raft core: log identifiers, snapshot
//! identifiers, and the quorum arithmetic used by election and commit-index
//! advancement.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Identifies a log entry by its `(term, index)` pair, per §5.4 of the Raft paper.
///
/// `LogId` orders first by `index` then by `term` is intentionally *not* how Raft compares
/// "up-to-date"-ness for elections (that logic lives in `core::vote`); as a plain value this type
/// just orders the way a log naturally does: by position.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct LogId {
    pub term: u64,
    pub index: u64,
}

impl LogId {
    pub fn new(term: u64, index: u64) -> Self {
        Self { term, index }
    }
}

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.term, self.index)
    }
}

/// Identifies a snapshot instance, distinct from the log id it covers: two snapshots built at
/// the same `last_log_id` are not guaranteed to be byte-identical (compression, chunking, etc
/// may differ), so installs are tracked by this id rather than by log id alone.
pub type SnapshotId = String;

/// Identifies a specific chunk of an in-flight snapshot transfer, used to detect and reject
/// out-of-order `InstallSnapshot` segments (§4.2 Snapshot install).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SnapshotSegmentId {
    pub id: SnapshotId,
    pub offset: u64,
}

impl fmt::Display for SnapshotSegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.offset)
    }
}

/// A trait for types which can render a short, single-line summary of themselves for tracing
/// spans, without the overhead of a full `Debug` dump (entries may carry large payloads).
pub trait MessageSummary {
    fn summary(&self) -> String;
}

/// Generic instruction to a metrics-reporting call site: either replace a sub-field with a new
/// value, or leave whatever is already published untouched.
#[derive(Debug)]
pub enum Update<T> {
    Update(T),
    Ignore,
}

/// The leader's wall-clock reading, in milliseconds since the Unix epoch, stamped onto every
/// entry it appends (§3 LogEntry `timestamp`). Followers never call this themselves — they only
/// ever see the value that already rode along with a replicated entry.
pub fn current_timestamp_ms() -> i64 {
    use std::time::SystemTime;
    use std::time::UNIX_EPOCH;
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

/// Quorum/majority arithmetic, split out so election and read-confirmation code share one
/// definition of "majority".
pub mod quorum {
    /// The number of votes/acks needed to reach a majority out of `len` total voters.
    pub fn majority_of(len: usize) -> usize {
        (len / 2) + 1
    }
}
