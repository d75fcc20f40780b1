//! Speech recognition via an external engine process.
//!
//! The recognition engine is treated as a black box: it takes a canonical
//! PCM file and produces a transcript file. The `Recognizer` trait allows
//! swapping implementations (real engine vs mock).

use crate::config::RecognizerConfig;
use crate::error::{Result, ScribedError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::process::Command;

/// Trait for transcribing a canonical PCM file to text.
///
/// Object-safe, Send + Sync for use in concurrent contexts.
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Transcribe the PCM file at `pcm` and return the extracted text.
    ///
    /// An empty string is a valid result (silence). Fails with
    /// `RecognitionFailed` if the engine cannot be started, exits non-zero,
    /// or produces no readable transcript.
    async fn recognize(&self, pcm: &Path) -> Result<String>;
}

/// Production recognizer invoking a whisper.cpp-style CLI.
///
/// The engine is expected to accept `-m <model> -f <pcm> -otxt -of <prefix>`
/// and write its transcript to `<prefix>.txt`; exit code and presence of the
/// transcript file determine success.
pub struct WhisperCliRecognizer {
    config: RecognizerConfig,
}

impl WhisperCliRecognizer {
    /// Creates a recognizer from configuration.
    pub fn new(config: RecognizerConfig) -> Self {
        Self { config }
    }

    /// Output prefix for the engine's transcript file.
    fn transcript_prefix(pcm: &Path) -> PathBuf {
        pcm.with_extension("out")
    }

    /// Argument vector for one recognition invocation.
    fn command_args(&self, pcm: &Path, prefix: &Path) -> Vec<String> {
        let mut args = vec![
            "-m".to_string(),
            self.config.model.display().to_string(),
            "-f".to_string(),
            pcm.display().to_string(),
            "-otxt".to_string(),
            "-of".to_string(),
            prefix.display().to_string(),
            "-l".to_string(),
            self.config.language.clone(),
        ];
        if let Some(threads) = self.config.threads {
            args.push("-t".to_string());
            args.push(threads.to_string());
        }
        args.extend(self.config.extra_args.iter().cloned());
        args
    }

    /// Check that the engine binary runs and the model file exists.
    pub async fn probe(&self) -> Result<()> {
        if !self.config.model.as_os_str().is_empty() && !self.config.model.exists() {
            return Err(ScribedError::RecognitionFailed {
                diagnostic: format!("model file not found: {}", self.config.model.display()),
            });
        }

        Command::new(&self.config.binary)
            .arg("-h")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ScribedError::RecognitionFailed {
                diagnostic: format!("failed to run {}: {e}", self.config.binary),
            })?;

        Ok(())
    }
}

#[async_trait]
impl Recognizer for WhisperCliRecognizer {
    async fn recognize(&self, pcm: &Path) -> Result<String> {
        let prefix = Self::transcript_prefix(pcm);

        let process = Command::new(&self.config.binary)
            .args(self.command_args(pcm, &prefix))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ScribedError::RecognitionFailed {
                diagnostic: format!("failed to start {}: {e}", self.config.binary),
            })?;

        if !process.status.success() {
            let stderr = String::from_utf8_lossy(&process.stderr);
            return Err(ScribedError::RecognitionFailed {
                diagnostic: format!(
                    "{} exited with {}: {}",
                    self.config.binary,
                    process.status,
                    stderr.trim()
                ),
            });
        }

        // The engine writes its transcript to `<prefix>.txt`.
        let transcript_path = PathBuf::from(format!("{}.txt", prefix.display()));
        let text = tokio::fs::read_to_string(&transcript_path)
            .await
            .map_err(|e| ScribedError::RecognitionFailed {
                diagnostic: format!(
                    "{} produced no readable transcript at {}: {e}",
                    self.config.binary,
                    transcript_path.display()
                ),
            })?;

        if let Err(e) = tokio::fs::remove_file(&transcript_path).await {
            tracing::debug!(path = %transcript_path.display(), error = %e, "failed to remove transcript file");
        }

        Ok(text.trim().to_string())
    }
}

/// Mock recognizer for testing.
#[derive(Debug)]
pub struct MockRecognizer {
    response: String,
    echo_size: bool,
    /// 1-based invocation numbers that should fail.
    fail_on: Vec<usize>,
    fail_always: bool,
    invocations: AtomicUsize,
    handed_sizes: Mutex<Vec<u64>>,
}

impl MockRecognizer {
    /// Create a mock recognizer returning a fixed response.
    pub fn new() -> Self {
        Self {
            response: "mock transcript".to_string(),
            echo_size: false,
            fail_on: Vec::new(),
            fail_always: false,
            invocations: AtomicUsize::new(0),
            handed_sizes: Mutex::new(Vec::new()),
        }
    }

    /// Configure the mock to return a specific response.
    pub fn with_response(mut self, response: &str) -> Self {
        self.response = response.to_string();
        self
    }

    /// Configure the mock to respond with the PCM file's byte size.
    ///
    /// Lets tests assert that each tick sees a cumulatively larger
    /// snapshot.
    pub fn echoing_size(mut self) -> Self {
        self.echo_size = true;
        self
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

    /// Number of recognize calls made so far.
    pub fn invocation_count(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    /// PCM byte sizes handed to the mock, in call order.
    pub fn handed_sizes(&self) -> Vec<u64> {
        self.handed_sizes
            .lock()
            .map(|sizes| sizes.clone())
            .unwrap_or_default()
    }
}

impl Default for MockRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Recognizer for MockRecognizer {
    async fn recognize(&self, pcm: &Path) -> Result<String> {
        let invocation = self.invocations.fetch_add(1, Ordering::SeqCst) + 1;

        if self.fail_always || self.fail_on.contains(&invocation) {
            return Err(ScribedError::RecognitionFailed {
                diagnostic: format!("mock recognition failure on invocation {invocation}"),
            });
        }

        let size = tokio::fs::metadata(pcm).await?.len();
        if let Ok(mut sizes) = self.handed_sizes.lock() {
            sizes.push(size);
        }

        if self.echo_size {
            Ok(format!("{size}"))
        } else {
            Ok(self.response.clone())
        }
    }
}
