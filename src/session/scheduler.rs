//! Chunk scheduler: the timer-driven transcription loop.
//!
//! At a fixed cadence the scheduler snapshots everything received so far,
//! decodes it, recognizes it, and emits the cumulative transcript as one
//! fragment. Ticks are strictly serialized: the pipeline runs inline in
//! the loop, and `MissedTickBehavior::Skip` drops ticks that come due
//! while a pipeline is still in flight instead of queueing them.
//!
//! The full stream is re-read on every tick rather than just the new
//! bytes; early audio context measurably helps recognition accuracy, and
//! the ingestion caps bound the cost.

use crate::codec::Decoder;
use crate::error::Result;
use crate::session::Session;
use crate::session::store::SegmentStore;
use crate::stt::Recognizer;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// One unit of transcript text emitted to the client per completed tick.
///
/// `text` is the recognizer's output for the entire audio received up to
/// the tick's snapshot, not an incremental delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptFragment {
    pub session_id: u64,
    /// Strictly increasing, gap free; skipped ticks consume no number.
    pub sequence: u64,
    pub text: String,
    pub timestamp: SystemTime,
}

/// Periodic snapshot → decode → recognize → emit loop for one session.
pub struct ChunkScheduler {
    session: Arc<Session>,
    store: Arc<SegmentStore>,
    decoder: Arc<dyn Decoder>,
    recognizer: Arc<dyn Recognizer>,
    work_dir: PathBuf,
    tick_interval: Duration,
}

impl ChunkScheduler {
    /// Creates a scheduler over the session's shared segment store.
    pub fn new(
        session: Arc<Session>,
        store: Arc<SegmentStore>,
        decoder: Arc<dyn Decoder>,
        recognizer: Arc<dyn Recognizer>,
        work_dir: PathBuf,
        tick_interval: Duration,
    ) -> Self {
        Self {
            session,
            store,
            decoder,
            recognizer,
            work_dir,
            tick_interval,
        }
    }

    /// Runs until cancelled or the fragment receiver goes away.
    ///
    /// Decode/recognition failures are logged and skip the tick without
    /// consuming a sequence number; any other error ends the session.
    /// Cancellation is observed both between ticks and while a pipeline
    /// is in flight (the pipeline future is dropped, which kills its
    /// external child processes).
    pub async fn run(
        self,
        out: mpsc::Sender<TranscriptFragment>,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.tick_interval,
            self.tick_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut sequence: u64 = 0;
        let mut tick: u64 = 0;

        loop {
            tokio::select! {
                _ = cancel.changed() => break,
                _ = ticker.tick() => {}
            }
            if *cancel.borrow() {
                break;
            }

            let current = tick;
            tick += 1;

            let result = tokio::select! {
                _ = cancel.changed() => break,
                res = self.run_tick(current) => res,
            };

            match result {
                Ok(text) => {
                    let fragment = TranscriptFragment {
                        session_id: self.session.id(),
                        sequence,
                        text,
                        timestamp: SystemTime::now(),
                    };
                    sequence += 1;
                    if out.send(fragment).await.is_err() {
                        // Receiver gone: the session is draining.
                        break;
                    }
                }
                Err(e) if e.is_tick_recoverable() => {
                    warn!(
                        session = self.session.id(),
                        tick = current,
                        error = %e,
                        "tick skipped"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        debug!(session = self.session.id(), ticks = tick, emitted = sequence, "scheduler stopped");
        Ok(())
    }

    /// One snapshot → decode → recognize cycle.
    async fn run_tick(&self, tick: u64) -> Result<String> {
        if self.store.is_empty() {
            // A zero-byte container is not decodable by any codec; silence
            // is an empty transcript.
            return Ok(String::new());
        }

        let snapshot = self.store.snapshot().await?;
        self.session.note_chunk_end(snapshot.len);
        debug!(
            session = self.session.id(),
            tick,
            bytes = snapshot.len,
            "transcribing snapshot"
        );

        let pcm = self.work_dir.join(format!("tick-{tick}.wav"));
        let result = self.pipeline(&snapshot.path, &pcm).await;

        // Per-tick artifacts are removed here on the normal path; anything
        // left behind by an interrupted pipeline goes with the session
        // directory at teardown.
        remove_quietly(&snapshot.path).await;
        remove_quietly(&pcm).await;

        result
    }

    async fn pipeline(&self, snapshot: &Path, pcm: &Path) -> Result<String> {
        self.decoder.decode(snapshot, pcm).await?;
        self.recognizer.recognize(pcm).await
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        debug!(path = %path.display(), error = %e, "failed to remove tick artifact");
    }
}
