//! Audio decoding via an external transcoding process.
//!
//! A session's raw container stream is opaque to the server; turning a
//! snapshot of it into canonical linear PCM is delegated to an external
//! binary (ffmpeg by default). The `Decoder` trait keeps the tool choice
//! swappable and enables full testability without external dependencies.

use crate::config::DecoderConfig;
use crate::error::{Result, ScribedError};
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::process::Command;

/// Trait for converting a container/codec snapshot into canonical PCM.
///
/// Object-safe, Send + Sync for use in concurrent contexts.
#[async_trait]
pub trait Decoder: Send + Sync {
    /// Decode `input` into a WAV file at `output` with the canonical
    /// sample rate and channel count.
    ///
    /// Fails with `DecodeFailed` (carrying the external process's
    /// diagnostic output) if the process exits non-zero or produces no
    /// usable output file.
    async fn decode(&self, input: &Path, output: &Path) -> Result<()>;
}

/// Production decoder invoking the ffmpeg binary.
pub struct FfmpegDecoder {
    config: DecoderConfig,
}

impl FfmpegDecoder {
    /// Creates a decoder from configuration.
    pub fn new(config: DecoderConfig) -> Self {
        Self { config }
    }

    /// Argument vector for one decode invocation.
    fn command_args(&self, input: &Path, output: &Path) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            input.display().to_string(),
            "-ar".to_string(),
            self.config.sample_rate.to_string(),
            "-ac".to_string(),
            self.config.channels.to_string(),
            "-f".to_string(),
            "wav".to_string(),
            output.display().to_string(),
        ]
    }

    /// Verify the decode output parses as WAV with the configured format.
    ///
    /// ffmpeg exiting zero does not guarantee a usable file (e.g. an
    /// interrupted write); a header check catches that before the file is
    /// handed to the recognition engine.
    fn verify_output(&self, output: &Path) -> Result<()> {
        let reader = hound::WavReader::open(output).map_err(|e| ScribedError::DecodeFailed {
            diagnostic: format!("decoder produced unreadable output: {e}"),
        })?;
        let spec = reader.spec();
        if spec.sample_rate != self.config.sample_rate
            || spec.channels != self.config.channels
        {
            return Err(ScribedError::DecodeFailed {
                diagnostic: format!(
                    "decoder produced {}Hz/{}ch, expected {}Hz/{}ch",
                    spec.sample_rate, spec.channels, self.config.sample_rate, self.config.channels
                ),
            });
        }
        Ok(())
    }

    /// Check that the decoder binary is runnable (`ffmpeg -version`).
    pub async fn probe(&self) -> Result<String> {
        let output = Command::new(&self.config.binary)
            .arg("-version")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ScribedError::DecodeFailed {
                diagnostic: format!("failed to run {}: {e}", self.config.binary),
            })?;

        if !output.status.success() {
            return Err(ScribedError::DecodeFailed {
                diagnostic: format!(
                    "{} -version exited with {}",
                    self.config.binary, output.status
                ),
            });
        }

        let version = String::from_utf8_lossy(&output.stdout);
        Ok(version.lines().next().unwrap_or("unknown").to_string())
    }
}

#[async_trait]
impl Decoder for FfmpegDecoder {
    async fn decode(&self, input: &Path, output: &Path) -> Result<()> {
        let process = Command::new(&self.config.binary)
            .args(self.command_args(input, output))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ScribedError::DecodeFailed {
                diagnostic: format!("failed to start {}: {e}", self.config.binary),
            })?;

        if !process.status.success() {
            let stderr = String::from_utf8_lossy(&process.stderr);
            return Err(ScribedError::DecodeFailed {
                diagnostic: format!(
                    "{} exited with {}: {}",
                    self.config.binary,
                    process.status,
                    stderr.trim()
                ),
            });
        }

        self.verify_output(output)
    }
}

/// Mock decoder for testing.
///
/// Writes a silent WAV whose sample count tracks the input size, so tests
/// can observe cumulative snapshot growth downstream.
pub struct MockDecoder {
    sample_rate: u32,
    /// 1-based invocation numbers that should fail.
    fail_on: Vec<usize>,
    fail_always: bool,
    delay: Option<Duration>,
    invocations: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl MockDecoder {
    /// Create a mock decoder that succeeds on every invocation.
    pub fn new() -> Self {
        Self {
            sample_rate: crate::defaults::SAMPLE_RATE,
            fail_on: Vec::new(),
            fail_always: false,
            delay: None,
            invocations: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    /// Configure the mock to fail on every invocation.
    pub fn with_failure(mut self) -> Self {
        self.fail_always = true;
        self
    }

    /// Configure the mock to fail on specific 1-based invocations.
    pub fn failing_on(mut self, invocations: &[usize]) -> Self {
        self.fail_on = invocations.to_vec();
        self
    }

    /// Configure an artificial decode latency.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of decode calls made so far.
    pub fn invocation_count(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Highest number of decode calls that were ever in flight at once.
    pub fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

impl Default for MockDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Decoder for MockDecoder {
    async fn decode(&self, input: &Path, output: &Path) -> Result<()> {
        let invocation = self.invocations.fetch_add(1, Ordering::SeqCst) + 1;
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        let result = self.decode_inner(invocation, input, output).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

impl MockDecoder {
    async fn decode_inner(&self, invocation: usize, input: &Path, output: &Path) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_always || self.fail_on.contains(&invocation) {
            return Err(ScribedError::DecodeFailed {
                diagnostic: format!("mock decode failure on invocation {invocation}"),
            });
        }

        let input_len = tokio::fs::metadata(input).await?.len();

        let spec = hound::WavSpec {
            channels: crate::defaults::CHANNELS,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer =
            hound::WavWriter::create(output, spec).map_err(|e| ScribedError::DecodeFailed {
                diagnostic: format!("mock failed to write WAV: {e}"),
            })?;
        // One silent sample per input byte: output size mirrors snapshot size.
        for _ in 0..input_len {
            writer
                .write_sample(0i16)
                .map_err(|e| ScribedError::DecodeFailed {
                    diagnostic: format!("mock failed to write WAV: {e}"),
                })?;
        }
        writer.finalize().map_err(|e| ScribedError::DecodeFailed {
            diagnostic: format!("mock failed to write WAV: {e}"),
        })?;

        Ok(())
    }
}
