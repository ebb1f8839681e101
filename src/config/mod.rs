//! Configuration management for wakeline
//!
//! Values resolve in priority order: environment (`WAKELINE_*`) > TOML file >
//! built-in defaults.

pub mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::assistant::{AssistConfig, AudioEncoding, AudioFormat};
use crate::{Error, Result};

/// Default input stream capacity in samples (about one second at 16kHz)
pub const DEFAULT_INPUT_CAPACITY: usize = 16_384;

/// Default output stream capacity in samples (about seven seconds at 16kHz)
pub const DEFAULT_OUTPUT_CAPACITY: usize = 115_200;

/// Default sensitivity for a wake word configured without one
pub const DEFAULT_SENSITIVITY: f32 = 0.5;

/// wakeline configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub audio: AudioConfig,
    pub wake_word: WakeWordConfig,
    pub assistant: AssistantConfig,
}

/// Audio format and stream sizing
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Microphone sample rate in Hz
    pub input_sample_rate: u32,

    /// Sample bit depth; only 16 is supported
    pub bits_per_sample: u16,

    /// Channel count of the shared streams; only mono is supported
    pub channels: u16,

    /// Input stream capacity in samples
    pub input_capacity: usize,

    /// Output stream capacity in samples
    pub output_capacity: usize,

    /// Speaker sample rate in Hz
    pub output_sample_rate: u32,
}

/// Wake word detection configuration
#[derive(Debug, Clone)]
pub struct WakeWordConfig {
    /// Configured words; classifier index `i` reports `words[i - 1]`
    pub words: Vec<WakeWordSpec>,

    /// Gain applied before classification
    pub gain: f32,

    /// Pause between detector polls
    pub poll_interval: Duration,
}

/// One configured wake word
#[derive(Debug, Clone, PartialEq)]
pub struct WakeWordSpec {
    pub word: String,
    /// Detection sensitivity in `0.0..=1.0`
    pub sensitivity: f32,
}

/// Assistant service configuration
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    /// WebSocket endpoint
    pub endpoint: String,

    /// File holding the bearer token
    pub credentials_path: PathBuf,

    /// BCP-47 language code
    pub language_code: String,

    pub device_id: String,
    pub device_model_id: String,

    /// Encoding requested for response audio
    pub output_encoding: AudioEncoding,

    /// Wake word that starts a conversation turn
    pub trigger_word: String,

    /// Pause between polls of a pending session; also the socket read timeout
    pub chunk_interval: Duration,

    /// How long THINKING / RESPONDING wait for the next response
    pub response_timeout: Duration,

    /// Longest utterance streamed in one turn
    pub max_utterance: Duration,
}

impl Config {
    /// Load configuration from the environment and a TOML file
    ///
    /// `path` overrides the standard config file location.
    ///
    /// # Errors
    ///
    /// Returns error if an explicit config file cannot be loaded or the
    /// resolved configuration is invalid
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let fc = file::load_config_file(path)?;
        Self::resolve(fc, |key| std::env::var(key).ok())
    }

    /// Resolve configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if the resolved configuration is invalid
    pub fn resolve(
        fc: file::WakelineConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let parsed = |key: &str| env(key).and_then(|s| s.parse::<u64>().ok());

        // Audio (env > toml > default)
        let input_sample_rate = env("WAKELINE_SAMPLE_RATE")
            .and_then(|s| s.parse().ok())
            .or(fc.audio.input_sample_rate)
            .unwrap_or(crate::voice::DEFAULT_SAMPLE_RATE);

        let audio = AudioConfig {
            input_sample_rate,
            bits_per_sample: fc.audio.bits_per_sample.unwrap_or(16),
            channels: fc.audio.channels.unwrap_or(1),
            input_capacity: env("WAKELINE_INPUT_CAPACITY")
                .and_then(|s| s.parse().ok())
                .or(fc.audio.input_capacity)
                .unwrap_or(DEFAULT_INPUT_CAPACITY),
            output_capacity: env("WAKELINE_OUTPUT_CAPACITY")
                .and_then(|s| s.parse().ok())
                .or(fc.audio.output_capacity)
                .unwrap_or(DEFAULT_OUTPUT_CAPACITY),
            output_sample_rate: env("WAKELINE_OUTPUT_SAMPLE_RATE")
                .and_then(|s| s.parse().ok())
                .or(fc.audio.output_sample_rate)
                .unwrap_or(input_sample_rate),
        };

        // Wake words (env > toml > default)
        let words = env("WAKELINE_WAKE_WORDS")
            .map(|s| parse_wake_words(&s))
            .or_else(|| {
                fc.wake_word.words.map(|entries| {
                    entries
                        .into_iter()
                        .map(|e| WakeWordSpec {
                            word: e.word,
                            sensitivity: e.sensitivity.unwrap_or(DEFAULT_SENSITIVITY),
                        })
                        .collect()
                })
            })
            .unwrap_or_else(|| {
                vec![WakeWordSpec {
                    word: "alexa".to_string(),
                    sensitivity: 0.6,
                }]
            });

        let wake_word = WakeWordConfig {
            gain: env("WAKELINE_WAKE_WORD_GAIN")
                .and_then(|s| s.parse().ok())
                .or(fc.wake_word.gain)
                .unwrap_or(1.0),
            poll_interval: Duration::from_millis(fc.wake_word.poll_interval_ms.unwrap_or(100)),
            words,
        };

        // Assistant (env > toml > default)
        let af = fc.assistant;
        let output_encoding = env("WAKELINE_OUTPUT_ENCODING")
            .or(af.output_encoding)
            .map(|s| s.parse::<AudioEncoding>())
            .transpose()?
            .unwrap_or_default();

        let trigger_word = env("WAKELINE_TRIGGER_WORD")
            .or(af.trigger_word)
            .or_else(|| wake_word.words.first().map(|w| w.word.clone()))
            .unwrap_or_default();

        let assistant = AssistantConfig {
            endpoint: env("WAKELINE_ENDPOINT")
                .or(af.endpoint)
                .unwrap_or_else(|| "ws://127.0.0.1:9000/v1/assist".to_string()),
            credentials_path: env("WAKELINE_CREDENTIALS")
                .or(af.credentials_path)
                .map_or_else(default_credentials_path, PathBuf::from),
            language_code: env("WAKELINE_LANGUAGE")
                .or(af.language_code)
                .unwrap_or_else(|| "en-US".to_string()),
            device_id: env("WAKELINE_DEVICE_ID")
                .or(af.device_id)
                .unwrap_or_else(|| "wakeline".to_string()),
            device_model_id: env("WAKELINE_DEVICE_MODEL_ID")
                .or(af.device_model_id)
                .unwrap_or_else(|| "wakeline-model".to_string()),
            output_encoding,
            trigger_word,
            chunk_interval: Duration::from_millis(
                parsed("WAKELINE_CHUNK_INTERVAL_MS")
                    .or(af.chunk_interval_ms)
                    .unwrap_or(20),
            ),
            response_timeout: Duration::from_millis(
                parsed("WAKELINE_RESPONSE_TIMEOUT_MS")
                    .or(af.response_timeout_ms)
                    .unwrap_or(10_000),
            ),
            max_utterance: Duration::from_millis(af.max_utterance_ms.unwrap_or(30_000)),
        };

        let config = Self {
            audio,
            wake_word,
            assistant,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration is usable
    ///
    /// # Errors
    ///
    /// Returns error describing the first invalid setting
    pub fn validate(&self) -> Result<()> {
        if self.audio.bits_per_sample != 16 {
            return Err(Error::Config(format!(
                "unsupported bit depth {}; only 16-bit audio is supported",
                self.audio.bits_per_sample
            )));
        }
        if self.audio.channels != 1 {
            return Err(Error::Config(format!(
                "unsupported channel count {}; only mono is supported",
                self.audio.channels
            )));
        }
        if self.audio.input_capacity == 0 || self.audio.output_capacity == 0 {
            return Err(Error::Config("stream capacities must be non-zero".to_string()));
        }
        if self.audio.input_sample_rate == 0 || self.audio.output_sample_rate == 0 {
            return Err(Error::Config("sample rates must be non-zero".to_string()));
        }

        if self.wake_word.words.is_empty() {
            return Err(Error::Config("at least one wake word is required".to_string()));
        }
        for spec in &self.wake_word.words {
            if spec.word.trim().is_empty() {
                return Err(Error::Config("wake words must not be blank".to_string()));
            }
            if !(0.0..=1.0).contains(&spec.sensitivity) {
                return Err(Error::Config(format!(
                    "sensitivity for {:?} must be between 0 and 1, got {}",
                    spec.word, spec.sensitivity
                )));
            }
        }

        if self.trigger_word_spec().is_none() {
            return Err(Error::Config(format!(
                "trigger word {:?} is not a configured wake word",
                self.assistant.trigger_word.trim()
            )));
        }

        if self.assistant.chunk_interval.is_zero() {
            return Err(Error::Config("chunk interval must be non-zero".to_string()));
        }

        Ok(())
    }

    /// Session configuration sent to the assistant service
    #[must_use]
    pub fn assist_config(&self) -> AssistConfig {
        AssistConfig {
            language_code: self.assistant.language_code.clone(),
            device_id: self.assistant.device_id.clone(),
            device_model_id: self.assistant.device_model_id.clone(),
            audio_in: AudioFormat {
                encoding: AudioEncoding::Linear16,
                sample_rate_hertz: self.audio.input_sample_rate,
            },
            audio_out: AudioFormat {
                encoding: self.assistant.output_encoding,
                sample_rate_hertz: self.audio.output_sample_rate,
            },
        }
    }

    /// Wake words in classifier index order
    #[must_use]
    pub fn wake_words(&self) -> Vec<String> {
        self.wake_word.words.iter().map(|w| w.word.clone()).collect()
    }

    /// The trigger word's 1-based position among the wake words, with its
    /// settings
    #[must_use]
    pub fn trigger_word_spec(&self) -> Option<(usize, &WakeWordSpec)> {
        let trigger = self.assistant.trigger_word.trim();
        self.wake_word
            .words
            .iter()
            .enumerate()
            .find(|(_, w)| w.word.trim().eq_ignore_ascii_case(trigger))
            .map(|(i, w)| (i + 1, w))
    }
}

/// Parse `word[:sensitivity],...`; entries with an unparsable sensitivity use
/// the default
fn parse_wake_words(raw: &str) -> Vec<WakeWordSpec> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.rsplit_once(':') {
            Some((word, sensitivity)) => WakeWordSpec {
                word: word.trim().to_string(),
                sensitivity: sensitivity.trim().parse().unwrap_or(DEFAULT_SENSITIVITY),
            },
            None => WakeWordSpec {
                word: entry.to_string(),
                sensitivity: DEFAULT_SENSITIVITY,
            },
        })
        .collect()
}

/// Default credentials file: `~/.config/wakeline/credentials`
fn default_credentials_path() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from("credentials"),
        |d| d.config_dir().join("wakeline").join("credentials"),
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn resolve_with(fc: file::WakelineConfigFile, vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::resolve(fc, |key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = resolve_with(file::WakelineConfigFile::default(), &[]).unwrap();

        assert_eq!(config.audio.input_sample_rate, 16000);
        assert_eq!(config.audio.output_sample_rate, 16000);
        assert_eq!(config.audio.input_capacity, DEFAULT_INPUT_CAPACITY);
        assert_eq!(config.audio.output_capacity, DEFAULT_OUTPUT_CAPACITY);
        assert_eq!(config.wake_word.poll_interval, Duration::from_millis(100));
        assert_eq!(config.assistant.language_code, "en-US");
        assert_eq!(config.assistant.output_encoding, AudioEncoding::Linear16);
        assert_eq!(config.assistant.chunk_interval, Duration::from_millis(20));
        assert_eq!(config.assistant.response_timeout, Duration::from_secs(10));
        assert_eq!(config.assistant.trigger_word, "alexa");
    }

    #[test]
    fn test_env_overrides_file() {
        let mut fc = file::WakelineConfigFile::default();
        fc.assistant.language_code = Some("de-DE".to_string());
        fc.audio.input_capacity = Some(1000);

        let config = resolve_with(
            fc,
            &[("WAKELINE_LANGUAGE", "fr-FR"), ("WAKELINE_OUTPUT_ENCODING", "mp3")],
        )
        .unwrap();

        assert_eq!(config.assistant.language_code, "fr-FR");
        assert_eq!(config.audio.input_capacity, 1000);
        assert_eq!(config.assistant.output_encoding, AudioEncoding::Mp3);
    }

    #[test]
    fn test_wake_words_from_env() {
        let config = resolve_with(
            file::WakelineConfigFile::default(),
            &[("WAKELINE_WAKE_WORDS", "computer:0.8, jarvis"), ("WAKELINE_TRIGGER_WORD", "Jarvis")],
        )
        .unwrap();

        assert_eq!(
            config.wake_word.words,
            vec![
                WakeWordSpec { word: "computer".to_string(), sensitivity: 0.8 },
                WakeWordSpec { word: "jarvis".to_string(), sensitivity: DEFAULT_SENSITIVITY },
            ]
        );
        assert_eq!(config.wake_words(), vec!["computer", "jarvis"]);

        let (index, spec) = config.trigger_word_spec().unwrap();
        assert_eq!(index, 2);
        assert_eq!(spec.word, "jarvis");
    }

    #[test]
    fn test_trigger_word_must_be_configured() {
        let result = resolve_with(
            file::WakelineConfigFile::default(),
            &[("WAKELINE_TRIGGER_WORD", "computer")],
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_stereo() {
        let mut fc = file::WakelineConfigFile::default();
        fc.audio.channels = Some(2);
        assert!(resolve_with(fc, &[]).is_err());
    }

    #[test]
    fn test_rejects_bad_sensitivity() {
        let result = resolve_with(
            file::WakelineConfigFile::default(),
            &[("WAKELINE_WAKE_WORDS", "alexa:1.5")],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_encoding_is_error() {
        let result = resolve_with(
            file::WakelineConfigFile::default(),
            &[("WAKELINE_OUTPUT_ENCODING", "wav")],
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_assist_config() {
        let config = resolve_with(
            file::WakelineConfigFile::default(),
            &[("WAKELINE_OUTPUT_SAMPLE_RATE", "24000")],
        )
        .unwrap();

        let assist = config.assist_config();
        assert_eq!(assist.audio_in.sample_rate_hertz, 16000);
        assert_eq!(assist.audio_out.sample_rate_hertz, 24000);
        assert_eq!(assist.device_id, "wakeline");
    }
}
