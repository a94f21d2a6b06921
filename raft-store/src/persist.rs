//! Durability backends for the three storage levels named in §4.1: `memory` never blocks on I/O,
//! `mapped`/`disk` make `append`/`save_hard_state` return only once bytes are stable (§6
//! "Persisted state layout": metadata file, segment files, write-then-rename).
//!
//! A real deployment would memory-map or directly write the segment files this module names;
//! this crate writes them through `tokio::fs` with the write-then-rename pattern the persisted
//! state layout calls for, which is sufficient to honor the durability contract without pulling
//! in a dedicated mmap crate the rest of the stack doesn't otherwise need.

use std::path::Path;
use std::path::PathBuf;

use async_trait::async_trait;
use atomix_raft::config::StorageLevel;

/// Where a partition's durable bytes live and how they get there.
#[async_trait]
pub trait Persistence: Send + Sync + 'static {
    /// Durably record `bytes` under `name` (e.g. `"hard-state"`, a segment file name, or a
    /// snapshot file name). Returns only once the write is stable, per the storage level this
    /// implementation represents.
    async fn write(&self, name: &str, bytes: &[u8]) -> anyhow::Result<()>;

    /// Read back bytes previously durable under `name`, if any.
    async fn read(&self, name: &str) -> anyhow::Result<Option<Vec<u8>>>;

    /// Remove a previously written file, if present. Used when an old snapshot or a rotated
    /// segment is superseded.
    async fn remove(&self, name: &str) -> anyhow::Result<()>;
}

/// The `memory` storage level (§4.1 Durability): "offers no durability (used for test
/// clusters)". Writes are accepted and immediately visible to `read` within the same process,
/// but nothing survives a restart.
#[derive(Default)]
pub struct MemoryPersistence {
    files: tokio::sync::RwLock<std::collections::BTreeMap<String, Vec<u8>>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn write(&self, name: &str, bytes: &[u8]) -> anyhow::Result<()> {
        self.files.write().await.insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn read(&self, name: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.files.read().await.get(name).cloned())
    }

    async fn remove(&self, name: &str) -> anyhow::Result<()> {
        self.files.write().await.remove(name);
        Ok(())
    }
}

/// The `mapped`/`disk` storage levels (§4.1 Durability): every write lands on disk, via a
/// temporary file that is `fsync`'d and then renamed over the final name, so a crash mid-write
/// never leaves a torn file behind (§6 "Writes are crash-atomic via write-then-rename").
pub struct FilePersistence {
    dir: PathBuf,
}

impl FilePersistence {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn final_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn tmp_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.tmp", name))
    }
}

#[async_trait]
impl Persistence for FilePersistence {
    async fn write(&self, name: &str, bytes: &[u8]) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp = self.tmp_path(name);
        {
            use tokio::io::AsyncWriteExt;
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(bytes).await?;
            file.sync_all().await?;
        }
        tokio::fs::rename(&tmp, self.final_path(name)).await?;
        Ok(())
    }

    async fn read(&self, name: &str) -> anyhow::Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.final_path(name)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn remove(&self, name: &str) -> anyhow::Result<()> {
        match tokio::fs::remove_file(self.final_path(name)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Pick the `Persistence` backend matching a configured [`StorageLevel`].
///
/// `Mapped` and `Disk` currently share an implementation: both write through to the filesystem
/// before acknowledging, which is what the durability contract actually requires; a production
/// deployment distinguishes them at the segment-file layer (direct I/O vs. `mmap`), which is
/// outside what this crate's state-machine glue needs to model.
pub fn for_level(level: StorageLevel, data_dir: impl AsRef<Path>) -> Box<dyn Persistence> {
    match level {
        StorageLevel::Memory => Box::new(MemoryPersistence::new()),
        StorageLevel::Mapped | StorageLevel::Disk => Box::new(FilePersistence::new(data_dir.as_ref().to_path_buf())),
    }
}
