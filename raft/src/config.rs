//! Runtime configuration for a Raft replica.
//!
//! Mirrors the teacher's `Config`/`ConfigBuilder` split: immutable, validated once at
//! construction time and then shared via `Arc` with every task spawned for the replica
//! (`RaftCore`, each `ReplicationCore`).

use rand::thread_rng;
use rand::Rng;
use serde::Deserialize;
use serde::Serialize;

/// When a snapshot should be taken, relative to the last snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum SnapshotPolicy {
    /// Snapshot once this many new entries have been applied since the last snapshot.
    LogsSinceLast(u64),
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        SnapshotPolicy::LogsSinceLast(5000)
    }
}

/// Durability level for the log & hard-state files backing a replica (§4.1 Durability).
///
/// `append` only returns once entries are durable for `Mapped`/`Disk`; `Memory` never blocks on
/// I/O and is intended for test clusters only.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum StorageLevel {
    Memory,
    Mapped,
    Disk,
}

impl Default for StorageLevel {
    fn default() -> Self {
        StorageLevel::Disk
    }
}

/// Runtime config for a Raft node.
///
/// Instances are constructed via `Config::build` and are immutable thereafter; share with
/// `Arc<Config>`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// A name for this cluster, used in tracing spans to disambiguate multiple clusters running
    /// in the same process (as in tests).
    pub cluster_name: String,
    /// The minimum election timeout, in milliseconds.
    pub election_timeout_min: u64,
    /// The maximum election timeout, in milliseconds. Per §5 Concurrency & resource model,
    /// election and heartbeat timers are randomized within a factor of 2 to avoid split votes,
    /// so this is conventionally `2 * election_timeout_min`.
    pub election_timeout_max: u64,
    /// The interval, in milliseconds, at which leaders send heartbeats (and replication
    /// requests double as heartbeats).
    pub heartbeat_interval: u64,
    /// The timeout, in milliseconds, for a single `InstallSnapshot` chunk round-trip.
    pub install_snapshot_timeout: u64,
    /// The maximum number of entries a single `AppendEntries` RPC may carry.
    pub max_payload_entries: u64,
    /// How far behind `matched` may fall from `last_log_index` before a replication stream
    /// drops from line-rate into the lagging/catch-up mode.
    pub replication_lag_threshold: u64,
    /// When to trigger log compaction.
    pub snapshot_policy: SnapshotPolicy,
    /// The storage durability level for the log & hard-state files.
    pub storage_level: StorageLevel,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cluster_name: "atomix".into(),
            election_timeout_min: 150,
            election_timeout_max: 300,
            heartbeat_interval: 50,
            install_snapshot_timeout: 200,
            max_payload_entries: 300,
            replication_lag_threshold: 1000,
            snapshot_policy: SnapshotPolicy::default(),
            storage_level: StorageLevel::default(),
        }
    }
}

impl Config {
    /// Start building a new config for the named cluster.
    pub fn build(cluster_name: impl Into<String>) -> ConfigBuilder {
        ConfigBuilder {
            inner: Self {
                cluster_name: cluster_name.into(),
                ..Default::default()
            },
        }
    }

    /// Generate a new random election timeout within `[election_timeout_min, election_timeout_max]`.
    pub fn new_rand_election_timeout(&self) -> u64 {
        thread_rng().gen_range(self.election_timeout_min..=self.election_timeout_max)
    }
}

/// A builder for constructing a validated `Config`.
pub struct ConfigBuilder {
    inner: Config,
}

impl ConfigBuilder {
    pub fn election_timeout_min(mut self, v: u64) -> Self {
        self.inner.election_timeout_min = v;
        self
    }

    pub fn election_timeout_max(mut self, v: u64) -> Self {
        self.inner.election_timeout_max = v;
        self
    }

    pub fn heartbeat_interval(mut self, v: u64) -> Self {
        self.inner.heartbeat_interval = v;
        self
    }

    pub fn install_snapshot_timeout(mut self, v: u64) -> Self {
        self.inner.install_snapshot_timeout = v;
        self
    }

    pub fn max_payload_entries(mut self, v: u64) -> Self {
        self.inner.max_payload_entries = v;
        self
    }

    pub fn replication_lag_threshold(mut self, v: u64) -> Self {
        self.inner.replication_lag_threshold = v;
        self
    }

    pub fn snapshot_policy(mut self, v: SnapshotPolicy) -> Self {
        self.inner.snapshot_policy = v;
        self
    }

    pub fn storage_level(mut self, v: StorageLevel) -> Self {
        self.inner.storage_level = v;
        self
    }

    /// Validate and produce the final config.
    pub fn validate(self) -> anyhow::Result<Config> {
        if self.inner.election_timeout_min >= self.inner.election_timeout_max {
            anyhow::bail!("election_timeout_min must be less than election_timeout_max");
        }
        if self.inner.heartbeat_interval >= self.inner.election_timeout_min {
            anyhow::bail!("heartbeat_interval must be less than election_timeout_min");
        }
        Ok(self.inner)
    }
}
