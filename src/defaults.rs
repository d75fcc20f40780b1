//! Default configuration constants for scribed.
//!
//! This module provides shared constants used across different configuration
//! types to ensure consistency and eliminate duplication.

/// Canonical PCM sample rate in Hz handed to the recognition engine.
///
/// 16kHz is the standard for speech recognition and provides a good balance
/// between quality and computational efficiency for voice applications.
pub const SAMPLE_RATE: u32 = 16000;

/// Canonical PCM channel count handed to the recognition engine.
pub const CHANNELS: u16 = 1;

/// Default transcription tick interval in milliseconds.
///
/// Every tick takes a snapshot of the audio received so far and runs it
/// through the decode/recognize pipeline. 10s keeps external-process
/// overhead low while still feeling live.
pub const TICK_INTERVAL_MS: u64 = 10_000;

/// Default maximum size of a single inbound binary frame in bytes.
///
/// Clients are expected to stream audio in small increments; a 1 MiB frame
/// is already far above what a well-behaved client sends per flush.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Default maximum total bytes ingested per session.
///
/// Also the practical bound on cumulative re-transcription cost, since each
/// tick re-reads the stream from the start.
pub const MAX_SESSION_BYTES: u64 = 256 * 1024 * 1024;

/// Default maximum session duration in seconds.
pub const MAX_SESSION_SECS: u64 = 3600;

/// Default external decoder binary.
pub const DECODER_BINARY: &str = "ffmpeg";

/// Default external recognition engine binary (whisper.cpp CLI).
pub const RECOGNIZER_BINARY: &str = "whisper-cli";

/// Default bind address for the WebSocket server.
pub const BIND_ADDR: &str = "127.0.0.1:8090";

/// Depth of the per-session transcript fragment channel.
///
/// Fragments are produced at most once per tick, so a shallow buffer is
/// enough; a stalled client eventually backpressures the scheduler instead
/// of growing an unbounded queue.
pub const FRAGMENT_CHANNEL_DEPTH: usize = 16;
