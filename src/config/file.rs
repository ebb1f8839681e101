//! TOML configuration file loading
//!
//! Supports `~/.config/wakeline/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct WakelineConfigFile {
    /// Audio format and stream sizing
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Wake word detection
    #[serde(default)]
    pub wake_word: WakeWordFileConfig,

    /// Remote assistant service
    #[serde(default)]
    pub assistant: AssistantFileConfig,
}

/// Audio configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    /// Microphone sample rate in Hz
    pub input_sample_rate: Option<u32>,

    /// Sample bit depth
    pub bits_per_sample: Option<u16>,

    /// Channel count of the shared streams
    pub channels: Option<u16>,

    /// Input stream capacity in samples
    pub input_capacity: Option<usize>,

    /// Output stream capacity in samples
    pub output_capacity: Option<usize>,

    /// Speaker sample rate in Hz
    pub output_sample_rate: Option<u32>,
}

/// Wake word configuration
#[derive(Debug, Default, Deserialize)]
pub struct WakeWordFileConfig {
    /// Configured wake words, in classifier index order
    pub words: Option<Vec<WakeWordEntry>>,

    /// Gain applied to audio before classification
    pub gain: Option<f32>,

    /// Pause between detector polls
    pub poll_interval_ms: Option<u64>,
}

/// One configured wake word
#[derive(Debug, Clone, Deserialize)]
pub struct WakeWordEntry {
    pub word: String,
    pub sensitivity: Option<f32>,
}

/// Assistant service configuration
#[derive(Debug, Default, Deserialize)]
pub struct AssistantFileConfig {
    /// WebSocket endpoint (e.g. "wss://assistant.example.com/v1/assist")
    pub endpoint: Option<String>,

    /// File holding the bearer token
    pub credentials_path: Option<String>,

    /// BCP-47 language code
    pub language_code: Option<String>,

    pub device_id: Option<String>,
    pub device_model_id: Option<String>,

    /// Response audio encoding ("LINEAR16", "MP3", ...)
    pub output_encoding: Option<String>,

    /// Wake word that starts a conversation turn
    pub trigger_word: Option<String>,

    /// Pause between polls of a pending session
    pub chunk_interval_ms: Option<u64>,

    /// How long to wait for the next response before ending a turn
    pub response_timeout_ms: Option<u64>,

    /// Longest utterance streamed in one turn
    pub max_utterance_ms: Option<u64>,
}

/// Load the TOML config file
///
/// An explicit `path` must exist and parse. Without one, the standard path is
/// tried and `WakelineConfigFile::default()` is returned if it doesn't exist
/// or can't be parsed.
///
/// # Errors
///
/// Returns error if an explicit path cannot be read or parsed
pub fn load_config_file(path: Option<&Path>) -> Result<WakelineConfigFile> {
    if let Some(path) = path {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), "loaded config file");
        return Ok(config);
    }

    let Some(path) = config_file_path() else {
        return Ok(WakelineConfigFile::default());
    };

    if !path.exists() {
        return Ok(WakelineConfigFile::default());
    }

    let config = match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                WakelineConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            WakelineConfigFile::default()
        }
    };

    Ok(config)
}

/// Return the config file path: `~/.config/wakeline/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("wakeline").join("config.toml"))
}
