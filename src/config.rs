use crate::defaults;
use crate::error::{Result, ScribedError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub decoder: DecoderConfig,
    pub recognizer: RecognizerConfig,
}

/// WebSocket server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address, e.g. "127.0.0.1:8090".
    pub bind: String,
}

/// Per-session configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Interval between transcription ticks in milliseconds.
    pub tick_interval_ms: u64,
    /// Maximum size of a single inbound binary frame in bytes.
    pub max_frame_bytes: usize,
    /// Maximum total bytes ingested per session.
    pub max_session_bytes: u64,
    /// Maximum session duration in seconds.
    pub max_session_secs: u64,
    /// Root directory for per-session scratch directories.
    /// Defaults to the system temp directory when unset.
    pub work_dir: Option<PathBuf>,
}

/// External decoder (transcoding) process configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DecoderConfig {
    /// Decoder binary, resolved via PATH when not absolute.
    pub binary: String,
    /// Target PCM sample rate in Hz.
    pub sample_rate: u32,
    /// Target PCM channel count.
    pub channels: u16,
}

/// External recognition engine process configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecognizerConfig {
    /// Recognition engine binary, resolved via PATH when not absolute.
    pub binary: String,
    /// Path to the model file handed to the engine.
    pub model: PathBuf,
    /// Language hint, or "auto" to let the engine detect.
    pub language: String,
    /// Inference thread count; engine default when unset.
    pub threads: Option<u32>,
    /// Extra arguments appended verbatim to the engine invocation.
    pub extra_args: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: defaults::BIND_ADDR.to_string(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: defaults::TICK_INTERVAL_MS,
            max_frame_bytes: defaults::MAX_FRAME_BYTES,
            max_session_bytes: defaults::MAX_SESSION_BYTES,
            max_session_secs: defaults::MAX_SESSION_SECS,
            work_dir: None,
        }
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            binary: defaults::DECODER_BINARY.to_string(),
            sample_rate: defaults::SAMPLE_RATE,
            channels: defaults::CHANNELS,
        }
    }
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            binary: defaults::RECOGNIZER_BINARY.to_string(),
            model: PathBuf::new(),
            language: "auto".to_string(),
            threads: None,
            extra_args: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file is missing or contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ScribedError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                ScribedError::Io(e)
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if the file
    /// doesn't exist
    ///
    /// Only falls back to defaults when the file is missing; invalid TOML
    /// is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(ScribedError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - SCRIBED_BIND → server.bind
    /// - SCRIBED_DECODER → decoder.binary
    /// - SCRIBED_RECOGNIZER → recognizer.binary
    /// - SCRIBED_MODEL → recognizer.model
    /// - SCRIBED_LANGUAGE → recognizer.language
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(bind) = std::env::var("SCRIBED_BIND")
            && !bind.is_empty()
        {
            self.server.bind = bind;
        }

        if let Ok(binary) = std::env::var("SCRIBED_DECODER")
            && !binary.is_empty()
        {
            self.decoder.binary = binary;
        }

        if let Ok(binary) = std::env::var("SCRIBED_RECOGNIZER")
            && !binary.is_empty()
        {
            self.recognizer.binary = binary;
        }

        if let Ok(model) = std::env::var("SCRIBED_MODEL")
            && !model.is_empty()
        {
            self.recognizer.model = PathBuf::from(model);
        }

        if let Ok(language) = std::env::var("SCRIBED_LANGUAGE")
            && !language.is_empty()
        {
            self.recognizer.language = language;
        }

        self
    }

    /// Validate configuration values that would otherwise fail deep inside
    /// a session.
    pub fn validate(&self) -> Result<()> {
        if self.session.tick_interval_ms == 0 {
            return Err(ScribedError::ConfigInvalidValue {
                key: "session.tick_interval_ms".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.session.max_frame_bytes == 0 {
            return Err(ScribedError::ConfigInvalidValue {
                key: "session.max_frame_bytes".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.session.max_session_bytes == 0 {
            return Err(ScribedError::ConfigInvalidValue {
                key: "session.max_session_bytes".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.session.max_session_secs == 0 {
            return Err(ScribedError::ConfigInvalidValue {
                key: "session.max_session_secs".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.decoder.sample_rate == 0 {
            return Err(ScribedError::ConfigInvalidValue {
                key: "decoder.sample_rate".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.decoder.channels == 0 {
            return Err(ScribedError::ConfigInvalidValue {
                key: "decoder.channels".to_string(),
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/scribed/config.toml on Linux
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("scribed").join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.bind, defaults::BIND_ADDR);
        assert_eq!(config.session.tick_interval_ms, defaults::TICK_INTERVAL_MS);
        assert_eq!(config.decoder.binary, "ffmpeg");
        assert_eq!(config.decoder.sample_rate, 16000);
        assert_eq!(config.decoder.channels, 1);
        assert_eq!(config.recognizer.language, "auto");
        assert!(config.session.work_dir.is_none());
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[session]\ntick_interval_ms = 2000\n\n[recognizer]\nmodel = \"/models/ggml-base.bin\""
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.session.tick_interval_ms, 2000);
        assert_eq!(
            config.recognizer.model,
            PathBuf::from("/models/ggml-base.bin")
        );
        // Untouched sections keep defaults
        assert_eq!(config.server.bind, defaults::BIND_ADDR);
        assert_eq!(config.session.max_frame_bytes, defaults::MAX_FRAME_BYTES);
    }

    #[test]
    fn test_load_missing_file_is_config_not_found() {
        let err = Config::load(Path::new("/nonexistent/scribed.toml")).unwrap_err();
        assert!(matches!(err, ScribedError::ConfigFileNotFound { .. }));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = Config::load_or_default(Path::new("/nonexistent/scribed.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_or_default_invalid_toml_is_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not valid toml [[[").unwrap();

        let result = Config::load_or_default(file.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_zero_tick_interval() {
        let mut config = Config::default();
        config.session.tick_interval_ms = 0;

        let err = config.validate().unwrap_err();
        match err {
            ScribedError::ConfigInvalidValue { key, .. } => {
                assert_eq!(key, "session.tick_interval_ms");
            }
            other => panic!("Expected ConfigInvalidValue, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_rejects_zero_caps() {
        let mut config = Config::default();
        config.session.max_session_bytes = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.session.max_frame_bytes = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.decoder.channels = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_roundtrip_serialization() {
        let mut config = Config::default();
        config.session.work_dir = Some(PathBuf::from("/var/lib/scribed"));
        config.recognizer.threads = Some(4);
        config.recognizer.extra_args = vec!["-np".to_string()];

        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }
}
