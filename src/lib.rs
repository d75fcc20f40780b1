//! scribed - Live speech transcription over WebSocket
//!
//! Accepts a streaming audio connection, periodically runs the accumulated
//! stream through an external decode/recognize pipeline, and pushes the
//! cumulative transcript back over the same connection.

// Enforce error handling discipline in non-test code
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod cli;
pub mod codec;
pub mod config;
pub mod defaults;
pub mod error;
pub mod server;
pub mod session;
pub mod stt;

// Core traits (snapshot → decode → recognize)
pub use codec::{Decoder, FfmpegDecoder, MockDecoder};
pub use stt::{MockRecognizer, Recognizer, WhisperCliRecognizer};

// Session machinery
pub use session::scheduler::{ChunkScheduler, TranscriptFragment};
pub use session::store::{SegmentStore, Snapshot};
pub use session::{Session, SessionCoordinator, SessionState};

// Server
pub use server::{AppState, router, serve};

// Error handling
pub use error::{Result, ScribedError};

// Config
pub use config::Config;
