//! Pipeline assembly
//!
//! Wires the shared streams to the audio adapters, the wake word detector and
//! the conversation engine:
//!
//! ```text
//! capture ─► input stream ─┬─► detector reader ──(Recognized)──┐
//!                          └─► engine reader ◄──── rewind ─────┘
//! engine writer ─► output stream ─► playback reader ─► speaker
//! ```

use std::sync::Arc;

use crate::assistant::{
    AssistantChannel, AssistantObserver, ConversationEngine, ConversationState, EngineSettings,
    WebSocketChannel,
};
use crate::config::Config;
use crate::stream::{
    AudioInputStream, AudioOutputStream, AudioSample, BoundedStream, StreamReader, StreamWriter,
};
use crate::voice::{AudioCapture, AudioPlayback};
use crate::wake_word::{Classifier, EnergyClassifier, WakeWordDetector};
use crate::{Error, Result};

/// Where the outer ends of the streams are attached
enum Frontend {
    /// Microphone and speaker
    Devices {
        capture: AudioCapture,
        playback: AudioPlayback,
    },
    /// The caller feeds input and drains output
    Headless {
        input: StreamWriter<AudioSample>,
        output: StreamReader<AudioSample>,
    },
}

/// A running voice assistant front end
///
/// Fields drop in declaration order, which tears down in reverse of
/// construction: detector, engine, audio devices, then the streams.
pub struct Pipeline {
    detector: WakeWordDetector,
    engine: ConversationEngine,
    frontend: Frontend,
    input: AudioInputStream,
    output: AudioOutputStream,
}

impl Pipeline {
    /// Assemble the full pipeline on the default audio devices
    ///
    /// # Errors
    ///
    /// Returns error if credentials cannot be loaded, the assistant service
    /// cannot be reached, an audio device cannot be opened, or a worker thread
    /// cannot be spawned
    pub fn start(config: &Config) -> Result<Self> {
        let channel = WebSocketChannel::connect(
            &config.assistant.endpoint,
            &config.assistant.credentials_path,
            config.assistant.chunk_interval,
        )?;

        let classifier = energy_classifier(config);

        Self::assemble(config, Arc::new(channel), classifier, |input, output| {
            let mut playback = AudioPlayback::new(
                output.create_reader(),
                config.audio.output_sample_rate,
            )?;
            let mut capture = AudioCapture::new(
                take_writer(input, "input")?,
                config.audio.input_sample_rate,
            )?;

            playback.start()?;
            capture.start()?;

            Ok(Frontend::Devices { capture, playback })
        })
    }

    /// Assemble the pipeline without audio devices
    ///
    /// Input samples are fed through [`feed`](Self::feed) and response audio is
    /// drained with [`drain_output`](Self::drain_output).
    ///
    /// # Errors
    ///
    /// Returns error if no wake word is configured or a worker thread cannot
    /// be spawned
    pub fn headless(
        config: &Config,
        channel: Arc<dyn AssistantChannel>,
        classifier: Box<dyn Classifier>,
    ) -> Result<Self> {
        Self::assemble(config, channel, classifier, |input, output| {
            Ok(Frontend::Headless {
                input: take_writer(input, "input")?,
                output: output.create_reader(),
            })
        })
    }

    fn assemble(
        config: &Config,
        channel: Arc<dyn AssistantChannel>,
        classifier: Box<dyn Classifier>,
        attach: impl FnOnce(&AudioInputStream, &AudioOutputStream) -> Result<Frontend>,
    ) -> Result<Self> {
        let input = AudioInputStream::new(config.audio.input_capacity);
        let output = AudioOutputStream::new(config.audio.output_capacity);

        // Consumers first so no captured audio predates their cursors
        let engine_reader = input.create_reader();
        let detector_reader = input.create_reader();
        let engine_writer = take_writer(&output, "output")?;

        let settings = EngineSettings {
            trigger_word: config.assistant.trigger_word.clone(),
            assist: config.assist_config(),
            chunk_interval: config.assistant.chunk_interval,
            response_timeout: config.assistant.response_timeout,
            max_utterance: config.assistant.max_utterance,
        };
        let engine = ConversationEngine::new(
            channel,
            engine_reader,
            engine_writer,
            settings,
            Vec::new(),
        )?;

        let detector = WakeWordDetector::spawn(
            detector_reader,
            classifier,
            config.wake_words(),
            config.wake_word.poll_interval,
            vec![engine.observer()],
        )?;

        let frontend = attach(&input, &output)?;

        tracing::info!(
            wake_words = ?detector.wake_words(),
            trigger_word = engine.trigger_word(),
            input_capacity = input.capacity(),
            output_capacity = output.capacity(),
            "pipeline ready"
        );

        Ok(Self {
            detector,
            engine,
            frontend,
            input,
            output,
        })
    }

    /// Current conversation state
    #[must_use]
    pub fn state(&self) -> ConversationState {
        self.engine.state()
    }

    /// The conversation engine
    #[must_use]
    pub const fn engine(&self) -> &ConversationEngine {
        &self.engine
    }

    /// The wake word detector
    #[must_use]
    pub const fn detector(&self) -> &WakeWordDetector {
        &self.detector
    }

    /// Subscribe to conversation state changes
    pub fn add_observer(&self, observer: Arc<dyn AssistantObserver>) {
        self.engine.add_observer(observer);
    }

    /// Start a text turn
    pub fn ask_text(&self, query: impl Into<String>) -> bool {
        self.engine.ask_text(query)
    }

    /// Microphone stream
    #[must_use]
    pub const fn input(&self) -> &AudioInputStream {
        &self.input
    }

    /// Response audio stream
    #[must_use]
    pub const fn output(&self) -> &AudioOutputStream {
        &self.output
    }

    /// Feed input samples to a headless pipeline; returns samples accepted
    pub fn feed(&self, samples: &[AudioSample]) -> usize {
        match &self.frontend {
            Frontend::Headless { input, .. } => input.write(samples),
            Frontend::Devices { .. } => {
                tracing::warn!("feed called on a pipeline with a microphone attached");
                0
            }
        }
    }

    /// Drain response audio from a headless pipeline
    #[must_use]
    pub fn drain_output(&self) -> Vec<AudioSample> {
        match &self.frontend {
            Frontend::Headless { output, .. } => output.read_available(),
            Frontend::Devices { .. } => Vec::new(),
        }
    }

    /// Pause or resume the microphone
    ///
    /// # Errors
    ///
    /// Returns error if the capture device cannot be restarted
    pub fn set_capture_enabled(&mut self, enabled: bool) -> Result<()> {
        match &mut self.frontend {
            Frontend::Devices { capture, .. } if enabled => capture.start(),
            Frontend::Devices { capture, .. } => {
                capture.stop();
                Ok(())
            }
            Frontend::Headless { input, .. } => {
                if enabled {
                    input.open();
                } else {
                    input.close();
                }
                Ok(())
            }
        }
    }

    /// Whether the speaker is currently playing response audio
    #[must_use]
    pub fn is_playing(&self) -> bool {
        match &self.frontend {
            Frontend::Devices { playback, .. } => playback.has_data_to_play(),
            Frontend::Headless { output, .. } => output.available_count() > 0,
        }
    }

    /// Stop all threads and release the devices
    pub fn shutdown(self) {
        tracing::info!("shutting down pipeline");
        drop(self);
        tracing::info!("pipeline stopped");
    }
}

/// Energy trigger standing in for a keyword model
///
/// Uses the trigger word's sensitivity and reports matches as that word, so
/// every turn it starts is one the engine accepts.
#[must_use]
pub fn energy_classifier(config: &Config) -> Box<dyn Classifier> {
    let (index, sensitivity) = config
        .trigger_word_spec()
        .map_or((1, crate::config::DEFAULT_SENSITIVITY), |(i, w)| (i, w.sensitivity));

    Box::new(
        EnergyClassifier::new(
            config.audio.input_sample_rate,
            sensitivity,
            config.wake_word.gain,
        )
        .for_word(index),
    )
}

fn take_writer(stream: &BoundedStream<AudioSample>, name: &str) -> Result<StreamWriter<AudioSample>> {
    stream
        .create_writer()
        .ok_or_else(|| Error::Stream(format!("{name} stream already has a writer")))
}
