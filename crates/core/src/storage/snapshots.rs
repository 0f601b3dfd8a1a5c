use crate::config::Settings;
use crate::domain::basket::{Basket, Snapshot};
use anyhow::Context;
use chrono::Utc;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;

const DEFAULT_SNAPSHOT_PATH: &str = "data/baskets.json";

/// The single durable slot holding the live snapshot.
#[async_trait::async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Returns the empty snapshot when nothing has been written yet.
    async fn read(&self) -> anyhow::Result<Snapshot>;

    async fn write(&self, snapshot: &Snapshot) -> anyhow::Result<()>;

    /// Replaces the live baskets with an empty list, keeping generation metadata.
    async fn clear(&self) -> anyhow::Result<Snapshot>;

    /// Stamps `previous + 1` and the current time onto `baskets` and writes the
    /// result. The id is only issued if the write succeeds.
    async fn commit_generation(&self, baskets: Vec<Basket>) -> anyhow::Result<Snapshot>;
}

/// JSON file store. Every write goes to a sibling staging file which is
/// fsynced and then renamed over the canonical path, so readers see either
/// the previous file or the new one.
#[derive(Debug)]
pub struct FileSnapshotStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let path = settings
            .snapshot_path
            .clone()
            .unwrap_or_else(|| DEFAULT_SNAPSHOT_PATH.to_string());
        Self::new(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes `snapshot` to a staging file next to the canonical path without
    /// publishing it. Dropping the returned value discards the staged file.
    pub async fn stage(&self, snapshot: &Snapshot) -> anyhow::Result<StagedSnapshot> {
        let bytes = serde_json::to_vec_pretty(snapshot).context("serialize snapshot failed")?;
        let target = self.path.clone();

        tokio::task::spawn_blocking(move || stage_blocking(target, &bytes))
            .await
            .context("snapshot staging task panicked")?
    }

    async fn read_current(&self) -> anyhow::Result<Snapshot> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no snapshot file yet; using empty snapshot");
                return Ok(Snapshot::empty());
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("failed to read snapshot file {}", self.path.display())
                })
            }
        };

        serde_json::from_slice::<Snapshot>(&bytes)
            .with_context(|| format!("snapshot file {} is not valid JSON", self.path.display()))
    }

    // Caller must hold `write_lock`.
    async fn write_unlocked(&self, snapshot: &Snapshot) -> anyhow::Result<()> {
        let staged = self.stage(snapshot).await?;
        staged.commit().await?;
        tracing::debug!(
            path = %self.path.display(),
            generation_id = snapshot.generation_id,
            baskets = snapshot.baskets.len(),
            "snapshot written"
        );
        Ok(())
    }
}

#[async_trait::async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn read(&self) -> anyhow::Result<Snapshot> {
        self.read_current().await
    }

    async fn write(&self, snapshot: &Snapshot) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write_unlocked(snapshot).await
    }

    async fn clear(&self) -> anyhow::Result<Snapshot> {
        let _guard = self.write_lock.lock().await;
        let cleared = self.read_current().await?.cleared();
        self.write_unlocked(&cleared).await?;
        Ok(cleared)
    }

    async fn commit_generation(&self, baskets: Vec<Basket>) -> anyhow::Result<Snapshot> {
        let _guard = self.write_lock.lock().await;
        let next = self
            .read_current()
            .await?
            .next_generation(baskets, Utc::now());
        self.write_unlocked(&next).await?;
        Ok(next)
    }
}

/// A fully written, fsynced snapshot that is not yet visible at the canonical path.
#[derive(Debug)]
pub struct StagedSnapshot {
    file: NamedTempFile,
    target: PathBuf,
}

impl StagedSnapshot {
    pub fn staging_path(&self) -> &Path {
        self.file.path()
    }

    /// Atomically renames the staged file over the canonical path.
    pub async fn commit(self) -> anyhow::Result<()> {
        let Self { file, target } = self;
        tokio::task::spawn_blocking(move || {
            file.persist(&target).map(|_| ()).map_err(|e| {
                anyhow::Error::new(e.error).context(format!(
                    "failed to rename staged snapshot onto {}",
                    target.display()
                ))
            })
        })
        .await
        .context("snapshot commit task panicked")?
    }
}

fn stage_blocking(target: PathBuf, bytes: &[u8]) -> anyhow::Result<StagedSnapshot> {
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create snapshot directory {}", dir.display()))?;

    let file_name = target
        .file_name()
        .and_then(|n| n.to_str())
        .context("snapshot path has no file name")?;

    let mut file = tempfile::Builder::new()
        .prefix(&format!(".{file_name}."))
        .suffix(".tmp")
        .tempfile_in(&dir)
        .with_context(|| format!("failed to create staging file in {}", dir.display()))?;

    file.write_all(bytes)
        .context("failed to write staging file")?;
    file.as_file()
        .sync_all()
        .context("failed to fsync staging file")?;

    Ok(StagedSnapshot { file, target })
}
