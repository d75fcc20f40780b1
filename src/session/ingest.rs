//! Ingestion loop: connection frames → segment store.
//!
//! Never interprets frame contents beyond appending them; decoding is the
//! chunk scheduler's concern. Applies the session's resource caps so a
//! misbehaving client cannot grow storage without bound.

use crate::config::SessionConfig;
use crate::error::{Result, ScribedError};
use crate::session::Session;
use crate::session::store::SegmentStore;
use axum::extract::ws::Message;
use futures_util::{Stream, StreamExt};
use std::time::Duration;
use tokio::sync::watch;
use tracing::warn;

/// Resource caps applied while ingesting.
#[derive(Debug, Clone)]
pub struct IngestLimits {
    /// Maximum size of a single binary frame in bytes.
    pub max_frame_bytes: usize,
    /// Maximum total bytes appended over the session.
    pub max_session_bytes: u64,
    /// Maximum session duration.
    pub max_session_duration: Duration,
}

impl IngestLimits {
    /// Derives the caps from session configuration.
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            max_frame_bytes: config.max_frame_bytes,
            max_session_bytes: config.max_session_bytes,
            max_session_duration: Duration::from_secs(config.max_session_secs),
        }
    }
}

/// How the ingestion loop ended, when it ended cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The client sent a close frame or the stream ended.
    Closed,
    /// Cancellation was requested (server shutdown).
    Cancelled,
}

/// Receives frames until the connection closes, a cap is hit, or
/// cancellation is requested.
///
/// Binary payloads are appended to the store; close frames and
/// end-of-stream terminate cleanly; transport errors and cap violations
/// are returned as errors for the coordinator to act on.
pub async fn run_ingest<S>(
    mut frames: S,
    store: &SegmentStore,
    session: &Session,
    limits: &IngestLimits,
    mut cancel: watch::Receiver<bool>,
) -> Result<IngestOutcome>
where
    S: Stream<Item = std::result::Result<Message, axum::Error>> + Unpin,
{
    // Deadline measured from session start, so it also fires for a client
    // that connects and then sends nothing.
    let remaining = limits
        .max_session_duration
        .saturating_sub(session.elapsed());
    let deadline = tokio::time::Instant::now() + remaining;

    loop {
        tokio::select! {
            _ = cancel.changed() => return Ok(IngestOutcome::Cancelled),
            _ = tokio::time::sleep_until(deadline) => {
                return Err(ScribedError::ResourceExceeded {
                    message: format!(
                        "session open longer than {}s",
                        limits.max_session_duration.as_secs()
                    ),
                });
            }
            msg = frames.next() => match msg {
                None => return Ok(IngestOutcome::Closed),
                Some(Err(e)) => {
                    return Err(ScribedError::Transport {
                        message: e.to_string(),
                    });
                }
                Some(Ok(Message::Binary(data))) => {
                    if data.len() > limits.max_frame_bytes {
                        return Err(ScribedError::ResourceExceeded {
                            message: format!(
                                "frame of {} bytes exceeds cap of {}",
                                data.len(),
                                limits.max_frame_bytes
                            ),
                        });
                    }
                    let total = session.bytes_ingested() + data.len() as u64;
                    if total > limits.max_session_bytes {
                        return Err(ScribedError::ResourceExceeded {
                            message: format!(
                                "session total of {total} bytes exceeds cap of {}",
                                limits.max_session_bytes
                            ),
                        });
                    }
                    store.append(&data).await?;
                    session.add_ingested(data.len() as u64);
                }
                Some(Ok(Message::Close(_))) => return Ok(IngestOutcome::Closed),
                Some(Ok(Message::Text(text))) => {
                    warn!(session = session.id(), payload = %text, "unexpected text frame received");
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            }
        }
    }
}
