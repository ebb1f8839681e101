//! Audio device adapters
//!
//! Binds [`BoundedStream`](crate::stream::BoundedStream)s to the cpal callback
//! boundary: capture writes microphone blocks into the input stream, playback
//! drains the output stream into the speaker.

mod capture;
mod playback;

pub use capture::{AudioCapture, DEFAULT_SAMPLE_RATE, samples_to_wav};
pub use playback::AudioPlayback;

use crate::stream::AudioSample;

/// Convert a device sample in `-1.0..=1.0` to a 16-bit sample
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn f32_to_sample(value: f32) -> AudioSample {
    (value * 32767.0).clamp(-32768.0, 32767.0) as AudioSample
}

/// Convert a 16-bit sample to a device sample in `-1.0..=1.0`
#[must_use]
pub fn sample_to_f32(sample: AudioSample) -> f32 {
    f32::from(sample) / 32768.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_conversion_clamps() {
        assert_eq!(f32_to_sample(0.0), 0);
        assert_eq!(f32_to_sample(1.0), 32767);
        assert_eq!(f32_to_sample(4.0), 32767);
        assert_eq!(f32_to_sample(-4.0), -32768);
    }

    #[test]
    fn test_sample_to_f32_range() {
        assert!((sample_to_f32(i16::MIN) + 1.0).abs() < f32::EPSILON);
        assert!(sample_to_f32(i16::MAX) < 1.0);
        assert!(sample_to_f32(0).abs() < f32::EPSILON);
    }
}
