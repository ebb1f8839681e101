//! Keyword classifier boundary
//!
//! The detector treats the scoring engine as opaque: it hands over a block of
//! samples and gets back which configured wake word (if any) matched.

use crate::stream::AudioSample;

/// Outcome of classifying one block of samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    /// No wake word in this block
    NoMatch,
    /// The 1-based index of the configured wake word that matched
    Match(usize),
    /// The engine failed on this block
    Error,
}

impl MatchResult {
    /// Map a raw engine score: `0` no match, `> 0` a match index, `< 0` error
    #[must_use]
    pub fn from_raw(raw: i32) -> Self {
        match usize::try_from(raw) {
            Ok(0) => Self::NoMatch,
            Ok(index) => Self::Match(index),
            Err(_) => Self::Error,
        }
    }
}

/// Keyword scoring engine
///
/// Implementations may keep state across blocks; the detector calls them from
/// its polling thread only.
pub trait Classifier: Send {
    /// Classify one block of samples
    fn classify(&mut self, samples: &[AudioSample]) -> MatchResult;

    /// Clear any state carried between blocks
    fn reset(&mut self) {}
}

/// Seconds of speech required before a segment can trigger
const MIN_SPEECH_SECS: f32 = 0.3;

/// Seconds of silence that close a segment
const SILENCE_SECS: f32 = 0.5;

/// Energy threshold at the default sensitivity of 0.5
const BASE_ENERGY_THRESHOLD: f32 = 0.03;

/// Segment state of the energy classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment {
    /// Waiting for speech
    Idle,
    /// Speech seen, accumulating until silence
    Speaking,
}

/// Voice-activity trigger used when no keyword model is available
///
/// Reports a match for one configured wake word (the first, unless set with
/// [`for_word`](Self::for_word)) whenever a burst of speech of at least
/// [`MIN_SPEECH_SECS`] is followed by [`SILENCE_SECS`] of silence. Higher
/// sensitivity lowers the energy threshold.
pub struct EnergyClassifier {
    word_index: usize,
    threshold: f32,
    gain: f32,
    min_speech_samples: usize,
    silence_samples: usize,
    segment: Segment,
    speech_counter: usize,
    silence_counter: usize,
}

impl EnergyClassifier {
    /// Create a classifier for audio at `sample_rate`
    ///
    /// `sensitivity` is clamped to `0.0..=1.0`.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn new(sample_rate: u32, sensitivity: f32, gain: f32) -> Self {
        let sensitivity = sensitivity.clamp(0.0, 1.0);
        let threshold = BASE_ENERGY_THRESHOLD * 2.0 * (1.0 - sensitivity).max(0.05);
        let rate = sample_rate as f32;

        tracing::debug!(threshold, gain, sample_rate, "energy classifier initialized");

        Self {
            word_index: 1,
            threshold,
            gain,
            min_speech_samples: (rate * MIN_SPEECH_SECS) as usize,
            silence_samples: (rate * SILENCE_SECS) as usize,
            segment: Segment::Idle,
            speech_counter: 0,
            silence_counter: 0,
        }
    }

    /// Report matches as the 1-based configured word `index`
    #[must_use]
    pub const fn for_word(mut self, index: usize) -> Self {
        self.word_index = index;
        self
    }

    /// Energy threshold in effect
    #[must_use]
    pub const fn threshold(&self) -> f32 {
        self.threshold
    }

    /// The 1-based word index reported on a match
    #[must_use]
    pub const fn word_index(&self) -> usize {
        self.word_index
    }
}

impl Classifier for EnergyClassifier {
    fn classify(&mut self, samples: &[AudioSample]) -> MatchResult {
        let energy = calculate_energy(samples) * self.gain;
        let is_speech = energy > self.threshold;

        match self.segment {
            Segment::Idle => {
                if is_speech {
                    self.segment = Segment::Speaking;
                    self.speech_counter = samples.len();
                    self.silence_counter = 0;
                    tracing::trace!(energy, "speech detected");
                }
            }
            Segment::Speaking => {
                if is_speech {
                    self.speech_counter += samples.len();
                    self.silence_counter = 0;
                } else {
                    self.silence_counter += samples.len();
                }

                if self.silence_counter > self.silence_samples {
                    let complete = self.speech_counter >= self.min_speech_samples;
                    self.reset();
                    if complete {
                        tracing::debug!(index = self.word_index, "speech segment complete");
                        return MatchResult::Match(self.word_index);
                    }
                    tracing::trace!("segment too short, resetting");
                }
            }
        }

        MatchResult::NoMatch
    }

    fn reset(&mut self) {
        self.segment = Segment::Idle;
        self.speech_counter = 0;
        self.silence_counter = 0;
    }
}

/// Calculate RMS energy of 16-bit samples, normalized to `0.0..=1.0`
#[allow(clippy::cast_precision_loss)]
pub fn calculate_energy(samples: &[AudioSample]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples
        .iter()
        .map(|&s| {
            let v = f32::from(s) / 32768.0;
            v * v
        })
        .sum();
    (sum_squares / samples.len() as f32).sqrt()
}
