//! Audio capture from microphone

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};

use super::f32_to_sample;
use crate::stream::{AudioSample, StreamWriter};
use crate::{Error, Result};

/// Default capture sample rate (16kHz for speech)
pub const DEFAULT_SAMPLE_RATE: u32 = 16000;

/// Captures audio from the default input device into a stream writer
///
/// Each device callback is downmixed to mono and written as one block.
/// [`stop`](Self::stop) closes the writer and pauses the device so the stream
/// and its readers stay intact; [`start`](Self::start) resumes.
pub struct AudioCapture {
    device: Device,
    config: StreamConfig,
    writer: Arc<StreamWriter<AudioSample>>,
    stream: Option<Stream>,
}

impl AudioCapture {
    /// Open the default input device at `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new(writer: StreamWriter<AudioSample>, sample_rate: u32) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let rate = SampleRate(sample_rate);
        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .filter(|c| c.min_sample_rate() <= rate && c.max_sample_rate() >= rate)
            .min_by_key(cpal::SupportedStreamConfigRange::channels)
            .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

        let config = supported_config.with_sample_rate(rate).config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            channels = config.channels,
            "audio capture initialized"
        );

        Ok(Self {
            device,
            config,
            writer: Arc::new(writer),
            stream: None,
        })
    }

    /// Start or resume capturing
    ///
    /// # Errors
    ///
    /// Returns error if capture fails
    pub fn start(&mut self) -> Result<()> {
        self.writer.open();

        if let Some(stream) = &self.stream {
            stream.play().map_err(|e| Error::Audio(e.to_string()))?;
            tracing::debug!("audio capture resumed");
            return Ok(());
        }

        let writer = Arc::clone(&self.writer);
        let channels = usize::from(self.config.channels.max(1));
        let span = tracing::info_span!("capture");
        let mut block: Vec<AudioSample> = Vec::new();

        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let _entered = span.enter();

                    block.clear();
                    block.extend(data.chunks(channels).map(downmix));

                    if writer.write(&block) == 0 && !block.is_empty() {
                        tracing::trace!(samples = block.len(), "capture block dropped");
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(())
    }

    /// Pause capturing; the stream keeps its contents
    pub fn stop(&mut self) {
        self.writer.close();

        if let Some(stream) = &self.stream {
            if let Err(e) = stream.pause() {
                tracing::debug!(error = %e, "device does not support pausing capture");
            }
            tracing::debug!("audio capture stopped");
        }
    }

    /// Check if currently capturing
    #[must_use]
    pub fn is_capturing(&self) -> bool {
        self.stream.is_some() && self.writer.is_open()
    }

    /// Get the sample rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.writer.close();
        if self.stream.take().is_some() {
            tracing::debug!("audio capture closed");
        }
    }
}

/// Average one interleaved frame to a mono sample
#[allow(clippy::cast_precision_loss)]
fn downmix(frame: &[f32]) -> AudioSample {
    let sum: f32 = frame.iter().sum();
    f32_to_sample(sum / frame.len().max(1) as f32)
}

/// Encode 16-bit mono samples as WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[AudioSample], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downmix_averages_channels() {
        assert_eq!(downmix(&[0.5, 0.5]), f32_to_sample(0.5));
        assert_eq!(downmix(&[1.0, -1.0]), 0);
    }

    #[test]
    fn test_samples_to_wav_header() {
        let wav = samples_to_wav(&[0, 100, -100], DEFAULT_SAMPLE_RATE).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        // 44-byte header plus 3 samples of 2 bytes
        assert_eq!(wav.len(), 50);

        let reader = hound::WavReader::new(std::io::Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, DEFAULT_SAMPLE_RATE);
        let samples: Vec<i16> = reader.into_samples().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0, 100, -100]);
    }
}
