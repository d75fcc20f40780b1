//! Session lifecycle: one accepted connection, two concurrent loops, one
//! shared segment store.
//!
//! The coordinator owns everything a session allocates (identity, scratch
//! directory, segment store) and guarantees it is reclaimed exactly once
//! when the session terminates, no matter how the connection ends.

pub mod ingest;
pub mod scheduler;
pub mod store;

use crate::codec::Decoder;
use crate::config::SessionConfig;
use crate::defaults;
use crate::error::{Result, ScribedError};
use crate::session::ingest::{IngestLimits, IngestOutcome, run_ingest};
use crate::session::scheduler::{ChunkScheduler, TranscriptFragment};
use crate::session::store::SegmentStore;
use crate::stt::Recognizer;
use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};
use tempfile::TempDir;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(0);

/// Lifecycle states of a session.
///
/// Transitions are strictly forward: Starting → Active → Draining →
/// Terminated, with a Starting → Terminated short-circuit when allocation
/// fails. Terminated is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SessionState {
    Starting = 0,
    Active = 1,
    Draining = 2,
    Terminated = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Starting,
            1 => SessionState::Active,
            2 => SessionState::Draining,
            _ => SessionState::Terminated,
        }
    }
}

/// Identity and counters for one streaming connection.
#[derive(Debug)]
pub struct Session {
    id: u64,
    created_at: SystemTime,
    started: Instant,
    bytes_ingested: AtomicU64,
    /// End offset of the most recent chunk snapshot, monotonic.
    last_chunk_end: AtomicU64,
    state: AtomicU8,
}

impl Session {
    /// Allocates a fresh session identity in `Starting` state.
    pub fn new() -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            created_at: SystemTime::now(),
            started: Instant::now(),
            bytes_ingested: AtomicU64::new(0),
            last_chunk_end: AtomicU64::new(0),
            state: AtomicU8::new(SessionState::Starting as u8),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Monotonic time since the session was created.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn bytes_ingested(&self) -> u64 {
        self.bytes_ingested.load(Ordering::Relaxed)
    }

    pub fn add_ingested(&self, bytes: u64) {
        self.bytes_ingested.fetch_add(bytes, Ordering::Relaxed);
    }

    /// End offset of the most recent chunk snapshot.
    pub fn last_chunk_end(&self) -> u64 {
        self.last_chunk_end.load(Ordering::Relaxed)
    }

    /// Records a chunk boundary; offsets never move backwards.
    pub fn note_chunk_end(&self, offset: u64) {
        self.last_chunk_end.fetch_max(offset, Ordering::Relaxed);
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Moves the state machine forward. Backward transitions are ignored,
    /// so Terminated is terminal.
    pub fn advance(&self, to: SessionState) {
        self.state.fetch_max(to as u8, Ordering::AcqRel);
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a session left `Active`.
#[derive(Debug)]
enum DrainReason {
    /// Client sent a close frame or the stream ended.
    ClientClosed,
    /// Server shutdown requested.
    Shutdown,
    /// An ingestion cap was hit.
    ResourceExceeded,
    /// Receive side of the connection failed.
    Transport,
    /// Send side of the connection failed.
    SendFailed,
    /// Storage failure inside ingest or scheduler.
    Internal,
}

type WsSink = SplitSink<WebSocket, Message>;

/// Owns one session from accept to teardown.
pub struct SessionCoordinator {
    config: SessionConfig,
    decoder: Arc<dyn Decoder>,
    recognizer: Arc<dyn Recognizer>,
    shutdown: watch::Receiver<bool>,
}

impl SessionCoordinator {
    /// Creates a coordinator for one accepted connection.
    pub fn new(
        config: SessionConfig,
        decoder: Arc<dyn Decoder>,
        recognizer: Arc<dyn Recognizer>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            decoder,
            recognizer,
            shutdown,
        }
    }

    /// Runs the session to termination and reclaims all its storage.
    pub async fn run(mut self, socket: WebSocket) {
        let session = Arc::new(Session::new());
        info!(session = session.id(), "session starting");

        // Starting: allocate the scratch directory and segment store. A
        // failure here terminates without ever reaching Active.
        let (work_dir, store) = match self.allocate(&session).await {
            Ok(allocated) => allocated,
            Err(e) => {
                error!(session = session.id(), error = %e, "session allocation failed");
                session.advance(SessionState::Terminated);
                return;
            }
        };

        session.advance(SessionState::Active);
        info!(
            session = session.id(),
            dir = %work_dir.path().display(),
            "session active"
        );

        let (ws_tx, ws_rx) = socket.split();
        let (frag_tx, frag_rx) = mpsc::channel(defaults::FRAGMENT_CHANNEL_DEPTH);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let scheduler = ChunkScheduler::new(
            Arc::clone(&session),
            Arc::clone(&store),
            Arc::clone(&self.decoder),
            Arc::clone(&self.recognizer),
            work_dir.path().to_path_buf(),
            Duration::from_millis(self.config.tick_interval_ms),
        );
        let scheduler_handle = tokio::spawn(scheduler.run(frag_tx, cancel_rx.clone()));
        let mut writer_handle = tokio::spawn(run_writer(session.id(), frag_rx, ws_tx));

        let limits = IngestLimits::from_config(&self.config);
        let ingest = run_ingest(ws_rx, &store, &session, &limits, cancel_rx);
        tokio::pin!(ingest);

        let mut writer_joined = None;
        let reason = tokio::select! {
            res = &mut ingest => match res {
                Ok(IngestOutcome::Closed) => DrainReason::ClientClosed,
                Ok(IngestOutcome::Cancelled) => DrainReason::Shutdown,
                Err(ScribedError::ResourceExceeded { message }) => {
                    warn!(session = session.id(), detail = %message, "ingestion cap hit");
                    DrainReason::ResourceExceeded
                }
                Err(ScribedError::Transport { message }) => {
                    warn!(session = session.id(), detail = %message, "transport error");
                    DrainReason::Transport
                }
                Err(e) => {
                    error!(session = session.id(), error = %e, "ingestion failed");
                    DrainReason::Internal
                }
            },
            _ = self.shutdown.changed() => DrainReason::Shutdown,
            res = &mut writer_handle => {
                writer_joined = Some(res);
                DrainReason::SendFailed
            }
        };

        // Draining: no new ticks; an in-flight pipeline is interrupted.
        session.advance(SessionState::Draining);
        info!(session = session.id(), reason = ?reason, "session draining");
        let _ = cancel_tx.send(true);

        match scheduler_handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(session = session.id(), error = %e, "scheduler failed"),
            Err(e) => error!(session = session.id(), error = %e, "scheduler task panicked"),
        }

        // The scheduler held the fragment sender; with it gone the writer
        // drains the channel and hands the sink back for the close frame.
        let writer_result = match writer_joined {
            Some(joined) => joined,
            None => writer_handle.await,
        };
        if let Ok(Some(sink)) = writer_result {
            close_connection(sink, &reason).await;
        }

        // Terminated: all per-session storage reclaimed exactly once.
        if let Err(e) = store.destroy().await {
            warn!(session = session.id(), error = %e, "failed to destroy segment store");
        }
        let dir_path = work_dir.path().to_path_buf();
        if let Err(e) = work_dir.close() {
            warn!(session = session.id(), dir = %dir_path.display(), error = %e, "failed to remove session directory");
        }
        session.advance(SessionState::Terminated);
        info!(
            session = session.id(),
            bytes = session.bytes_ingested(),
            elapsed_ms = session.elapsed().as_millis() as u64,
            "session terminated"
        );
    }

    async fn allocate(&self, session: &Session) -> Result<(TempDir, Arc<SegmentStore>)> {
        let work_root = self
            .config
            .work_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        tokio::fs::create_dir_all(&work_root).await?;

        let dir = tempfile::Builder::new()
            .prefix(&format!("scribed-{}-", session.id()))
            .tempdir_in(&work_root)?;
        let store = SegmentStore::new(dir.path()).await?;
        Ok((dir, Arc::new(store)))
    }
}

/// Forwards transcript fragments to the client as text frames.
///
/// Returns the sink for the close frame, or None if sending failed.
async fn run_writer(
    session_id: u64,
    mut fragments: mpsc::Receiver<TranscriptFragment>,
    mut sink: WsSink,
) -> Option<WsSink> {
    while let Some(fragment) = fragments.recv().await {
        tracing::debug!(
            session = session_id,
            sequence = fragment.sequence,
            chars = fragment.text.len(),
            "emitting fragment"
        );
        if sink.send(Message::Text(fragment.text.into())).await.is_err() {
            return None;
        }
    }
    Some(sink)
}

/// Best-effort close frame; diagnostics never cross the wire.
async fn close_connection(mut sink: WsSink, reason: &DrainReason) {
    let frame = match reason {
        DrainReason::ClientClosed | DrainReason::Shutdown => CloseFrame {
            code: close_code::NORMAL,
            reason: "".into(),
        },
        DrainReason::ResourceExceeded => CloseFrame {
            code: close_code::POLICY,
            reason: "ingestion limit exceeded".into(),
        },
        DrainReason::Internal => CloseFrame {
            code: close_code::ERROR,
            reason: "".into(),
        },
        // The socket is already broken; there is nothing to say.
        DrainReason::Transport | DrainReason::SendFailed => return,
    };
    let _ = sink.send(Message::Close(Some(frame))).await;
}
