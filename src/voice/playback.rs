//! Audio playback to speakers

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};

use super::sample_to_f32;
use crate::stream::{AudioSample, StreamReader};
use crate::{Error, Result};

/// Plays an output stream through the default output device
///
/// Every device callback drains up to one buffer of frames from the reader;
/// frames with no data available are filled with silence.
pub struct AudioPlayback {
    device: Device,
    config: StreamConfig,
    reader: Arc<StreamReader<AudioSample>>,
    has_data: Arc<AtomicBool>,
    stream: Option<Stream>,
}

impl AudioPlayback {
    /// Open the default output device at `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new(reader: StreamReader<AudioSample>, sample_rate: u32) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let rate = SampleRate(sample_rate);
        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1 && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate
            })
            .or_else(|| {
                // Fallback: try stereo
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2
                        && c.min_sample_rate() <= rate
                        && c.max_sample_rate() >= rate
                })
            })
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config = supported_config.with_sample_rate(rate).config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self {
            device,
            config,
            reader: Arc::new(reader),
            has_data: Arc::new(AtomicBool::new(false)),
            stream: None,
        })
    }

    /// Start draining the output stream into the device
    ///
    /// # Errors
    ///
    /// Returns error if playback fails
    pub fn start(&mut self) -> Result<()> {
        if let Some(stream) = &self.stream {
            stream.play().map_err(|e| Error::Audio(e.to_string()))?;
            return Ok(());
        }

        let reader = Arc::clone(&self.reader);
        let has_data = Arc::clone(&self.has_data);
        let channels = usize::from(self.config.channels.max(1));
        let span = tracing::info_span!("playback");
        let mut block: Vec<AudioSample> = Vec::new();

        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let _entered = span.enter();

                    let frames = data.len() / channels;
                    let wanted = frames.min(reader.available_count());
                    block.resize(wanted, 0);

                    let read = if wanted == 0 {
                        0
                    } else {
                        reader.read(&mut block, wanted)
                    };
                    has_data.store(read > 0, Ordering::Release);

                    for (i, frame) in data.chunks_mut(channels).enumerate() {
                        let value = if i < read { sample_to_f32(block[i]) } else { 0.0 };
                        frame.fill(value);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio playback started");
        Ok(())
    }

    /// Pause the device; unread output stays in the stream
    pub fn stop(&mut self) {
        if let Some(stream) = &self.stream {
            if let Err(e) = stream.pause() {
                tracing::debug!(error = %e, "device does not support pausing playback");
            }
            self.has_data.store(false, Ordering::Release);
            tracing::debug!("audio playback stopped");
        }
    }

    /// Whether the last device callback had output data
    #[must_use]
    pub fn has_data_to_play(&self) -> bool {
        self.has_data.load(Ordering::Acquire)
    }

    /// Samples queued in the output stream and not yet played
    #[must_use]
    pub fn pending_samples(&self) -> usize {
        self.reader.available_count()
    }

    /// Get the sample rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("audio playback closed");
        }
    }
}
