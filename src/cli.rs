//! Command-line interface for scribed
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Live speech transcription over WebSocket
#[derive(Parser, Debug)]
#[command(name = "scribed", version, about = "Live speech transcription over WebSocket")]
pub struct Cli {
    /// Subcommand to execute (default: serve)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Bind address override (e.g., 0.0.0.0:8090)
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<String>,

    /// Transcription tick interval override. Examples: 10s, 2500ms, 1m
    #[arg(long, value_name = "DURATION", value_parser = parse_interval_ms)]
    pub tick_interval: Option<u64>,

    /// Recognition model file override
    #[arg(long, value_name = "PATH")]
    pub model: Option<PathBuf>,

    /// Language hint override (default: auto-detect). Examples: auto, en, de
    #[arg(long, value_name = "LANG")]
    pub language: Option<String>,
}

/// Parse a tick interval string into milliseconds.
///
/// Supports any duration format accepted by `humantime`: bare numbers
/// (seconds), single-unit (`10s`, `500ms`), and compound (`1m30s`).
fn parse_interval_ms(s: &str) -> Result<u64, String> {
    let s = s.trim();
    // Bare number → seconds
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(secs * 1000);
    }
    humantime::parse_duration(s)
        .map(|d| d.as_millis() as u64)
        .map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the transcription server (default)
    Serve,

    /// Check that the external decoder and recognition engine are usable
    Check,
}
