//! Append-only segment store for one session's raw inbound audio.
//!
//! Single writer (the ingestion loop), concurrent snapshot readers (the
//! chunk scheduler). The backing is a file because the decoder is an
//! external process that expects a path, not an in-memory buffer.
//!
//! The append/snapshot contract is carried by an explicit primitive: a
//! write is flushed before the committed length is advanced, and a snapshot
//! copies exactly the committed prefix. A reader can therefore never
//! observe a torn write, regardless of filesystem buffering.

use crate::error::{Result, ScribedError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;

/// Name of the backing file inside the session directory.
const STREAM_FILE: &str = "stream.raw";

/// An immutable copy of all bytes appended up to the snapshot call.
#[derive(Debug)]
pub struct Snapshot {
    /// Path of the snapshot file, inside the session directory.
    pub path: PathBuf,
    /// Byte length of the snapshot.
    pub len: u64,
}

/// Append-only byte log with snapshot-by-copy reads.
pub struct SegmentStore {
    path: PathBuf,
    dir: PathBuf,
    writer: Mutex<File>,
    /// Bytes flushed to the backing file and visible to snapshots.
    committed: AtomicU64,
    snapshot_seq: AtomicU64,
    destroyed: AtomicBool,
}

impl SegmentStore {
    /// Creates the backing file inside `dir`.
    pub async fn new(dir: &Path) -> Result<Self> {
        let path = dir.join(STREAM_FILE);
        let writer = File::create(&path).await?;
        Ok(Self {
            path,
            dir: dir.to_path_buf(),
            writer: Mutex::new(writer),
            committed: AtomicU64::new(0),
            snapshot_seq: AtomicU64::new(0),
            destroyed: AtomicBool::new(false),
        })
    }

    /// Bytes appended and visible to snapshots so far.
    pub fn len(&self) -> u64 {
        self.committed.load(Ordering::Acquire)
    }

    /// True if no bytes have been committed yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends one frame's payload.
    ///
    /// Called only by the ingestion loop. The committed length is advanced
    /// only after the write is flushed, so a concurrent `snapshot` sees
    /// either all of this frame or none of it.
    pub async fn append(&self, bytes: &[u8]) -> Result<()> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(ScribedError::StoreClosed);
        }

        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        self.committed
            .fetch_add(bytes.len() as u64, Ordering::Release);
        Ok(())
    }

    /// Copies the committed prefix into a fresh snapshot file and returns
    /// its path.
    ///
    /// Does not block `append`: the copy reads through an independent file
    /// handle and is bounded by the committed length observed at entry.
    pub async fn snapshot(&self) -> Result<Snapshot> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(ScribedError::StoreClosed);
        }

        let len = self.committed.load(Ordering::Acquire);
        let seq = self.snapshot_seq.fetch_add(1, Ordering::Relaxed);
        let snap_path = self.dir.join(format!("snapshot-{seq}.raw"));

        let reader = File::open(&self.path).await?;
        let mut limited = reader.take(len);
        let mut out = File::create(&snap_path).await?;
        let copied = tokio::io::copy(&mut limited, &mut out).await?;
        out.flush().await?;

        if copied != len {
            // The backing file can only be shorter than the committed
            // length if the store was destroyed underneath us.
            return Err(ScribedError::StoreClosed);
        }

        Ok(Snapshot {
            path: snap_path,
            len,
        })
    }

    /// Releases the backing storage.
    ///
    /// Idempotent. `append` and `snapshot` fail with `StoreClosed` from
    /// the moment this is called.
    pub async fn destroy(&self) -> Result<()> {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Err(e) = tokio::fs::remove_file(&self.path).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            return Err(ScribedError::Io(e));
        }
        Ok(())
    }
}
