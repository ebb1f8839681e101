//! Remote assistant transport boundary
//!
//! The conversation engine talks to the assistant service through an
//! [`AssistantChannel`] (long-lived, connected at startup) that opens one
//! [`AssistantSession`] per conversation turn. A session is a bidirectional
//! stream of [`AssistRequest`]s and [`AssistResponse`]s.

use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::stream::AudioSample;

/// Audio encoding negotiated with the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AudioEncoding {
    /// Uncompressed 16-bit signed little-endian samples
    #[default]
    Linear16,
    /// FLAC
    Flac,
    /// MP3
    Mp3,
    /// Opus in an Ogg container
    OpusInOgg,
}

impl std::str::FromStr for AudioEncoding {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "LINEAR16" => Ok(Self::Linear16),
            "FLAC" => Ok(Self::Flac),
            "MP3" => Ok(Self::Mp3),
            "OPUS_IN_OGG" => Ok(Self::OpusInOgg),
            other => Err(crate::Error::Config(format!("unknown audio encoding: {other}"))),
        }
    }
}

/// Encoding and rate of one audio direction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub encoding: AudioEncoding,
    pub sample_rate_hertz: u32,
}

/// Session configuration sent with the first request of a turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistConfig {
    /// BCP-47 language code (e.g. "en-US")
    pub language_code: String,
    pub device_id: String,
    pub device_model_id: String,
    pub audio_in: AudioFormat,
    pub audio_out: AudioFormat,
}

/// One outbound message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<AssistConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_query: Option<String>,

    /// Raw input audio in the configured input encoding
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64_bytes")]
    pub audio_in: Option<Vec<u8>>,
}

impl AssistRequest {
    /// Request carrying a block of 16-bit input samples
    #[must_use]
    pub fn audio(samples: &[AudioSample]) -> Self {
        Self {
            audio_in: Some(samples_to_le_bytes(samples)),
            ..Self::default()
        }
    }

    /// Request carrying a text query
    #[must_use]
    pub fn text(query: impl Into<String>) -> Self {
        Self {
            text_query: Some(query.into()),
            ..Self::default()
        }
    }

    /// Attach session configuration
    #[must_use]
    pub fn with_config(mut self, config: AssistConfig) -> Self {
        self.config = Some(config);
        self
    }
}

/// Recognized speech fragment reported by the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechResult {
    pub transcript: String,
    #[serde(default)]
    pub stability: f32,
}

/// Event markers carried by a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseEvent {
    /// The service decided the user stopped speaking
    EndOfUtterance,
}

/// One inbound message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistResponse {
    /// Response audio in the configured output encoding
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64_bytes")]
    pub audio_out: Option<Vec<u8>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub speech_results: Vec<SpeechResult>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supplemental_display_text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<ResponseEvent>,
}

impl AssistResponse {
    /// Whether the response carries any output audio
    #[must_use]
    pub fn has_audio(&self) -> bool {
        self.audio_out.as_ref().is_some_and(|a| !a.is_empty())
    }

    /// Whether the service signalled end of utterance
    #[must_use]
    pub fn is_end_of_utterance(&self) -> bool {
        self.event_type == Some(ResponseEvent::EndOfUtterance)
    }

    /// Output audio decoded as 16-bit little-endian samples
    #[must_use]
    pub fn audio_samples(&self) -> Vec<AudioSample> {
        self.audio_out
            .as_deref()
            .map(le_bytes_to_samples)
            .unwrap_or_default()
    }
}

/// Outcome of polling a session for the next response
#[derive(Debug, Clone, PartialEq)]
pub enum SessionRead {
    /// A response arrived
    Message(AssistResponse),
    /// Nothing available yet; the session is still open
    Pending,
    /// The service ended the turn
    Finished,
}

/// One conversation turn's bidirectional message stream
pub trait AssistantSession: Send {
    /// Send one request
    ///
    /// # Errors
    ///
    /// Returns error if the stream is broken
    fn write(&mut self, request: &AssistRequest) -> Result<()>;

    /// Poll for the next response without blocking for longer than the
    /// transport's own short timeout
    ///
    /// # Errors
    ///
    /// Returns error if the stream is broken
    fn read(&mut self) -> Result<SessionRead>;

    /// Close the turn
    ///
    /// # Errors
    ///
    /// Returns error if the close handshake fails
    fn finish(&mut self) -> Result<()>;
}

/// Connection to the assistant service that opens per-turn sessions
pub trait AssistantChannel: Send + Sync {
    /// Open (or refresh) a session for a new turn
    ///
    /// # Errors
    ///
    /// Returns error if the service cannot be reached
    fn open_session(&self) -> Result<Box<dyn AssistantSession>>;
}

/// Encode samples as little-endian bytes
#[must_use]
pub fn samples_to_le_bytes(samples: &[AudioSample]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Decode little-endian bytes into samples; a trailing odd byte is dropped
#[must_use]
pub fn le_bytes_to_samples(bytes: &[u8]) -> Vec<AudioSample> {
    bytes
        .chunks_exact(2)
        .map(|pair| AudioSample::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Serde helpers for optional byte payloads carried as base64 strings
mod base64_bytes {
    use super::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => serializer.serialize_str(&STANDARD.encode(b)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
