//! Shared test utilities
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use wakeline::assistant::{
    AssistRequest, AssistResponse, AssistantChannel, AssistantSession, ResponseEvent,
    SessionRead,
    transport::{le_bytes_to_samples, samples_to_le_bytes},
};
use wakeline::config::file::WakelineConfigFile;
use wakeline::wake_word::{Classifier, MatchResult};
use wakeline::{AssistantObserver, AudioSample, Config, ConversationState, WakeWordEvent, WakeWordObserver};

/// Sample rate used by the generators
pub const SAMPLE_RATE: u32 = 16000;

/// Generate sine wave audio samples
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn generate_sine_samples(frequency: f32, duration_secs: f32, amplitude: f32) -> Vec<AudioSample> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            (amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin() * 32767.0) as i16
        })
        .collect()
}

/// Generate silence
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn generate_silence(duration_secs: f32) -> Vec<AudioSample> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    vec![0; num_samples]
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Default configuration with fast timings for tests
pub fn test_config() -> Config {
    let mut config =
        Config::resolve(WakelineConfigFile::default(), |_| None).expect("default config is valid");
    config.wake_word.poll_interval = Duration::from_millis(5);
    config.assistant.chunk_interval = Duration::from_millis(2);
    config.assistant.response_timeout = Duration::from_millis(300);
    config.assistant.max_utterance = Duration::from_secs(2);
    config
}

/// Records every wake word event it receives
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<WakeWordEvent>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<WakeWordEvent> {
        self.events.lock().expect("events lock").clone()
    }
}

impl WakeWordObserver for RecordingObserver {
    fn on_event(&self, event: &WakeWordEvent) {
        self.events.lock().expect("events lock").push(event.clone());
    }
}

/// Records every conversation state it is told about
#[derive(Default)]
pub struct StateRecorder {
    states: Mutex<Vec<ConversationState>>,
}

impl StateRecorder {
    pub fn states(&self) -> Vec<ConversationState> {
        self.states.lock().expect("states lock").clone()
    }

    pub fn saw(&self, state: ConversationState) -> bool {
        self.states().contains(&state)
    }
}

impl AssistantObserver for StateRecorder {
    fn on_state_changed(&self, state: ConversationState) {
        self.states.lock().expect("states lock").push(state);
    }
}

/// Classifier that replays a fixed list of results and records each block
#[derive(Clone, Default)]
pub struct ScriptedClassifier {
    results: Arc<Mutex<VecDeque<MatchResult>>>,
    blocks: Arc<Mutex<Vec<Vec<AudioSample>>>>,
}

impl ScriptedClassifier {
    pub fn new(results: impl IntoIterator<Item = MatchResult>) -> Self {
        Self {
            results: Arc::new(Mutex::new(results.into_iter().collect())),
            blocks: Arc::default(),
        }
    }

    /// Blocks classified so far
    pub fn blocks(&self) -> Vec<Vec<AudioSample>> {
        self.blocks.lock().expect("blocks lock").clone()
    }
}

impl Classifier for ScriptedClassifier {
    fn classify(&mut self, samples: &[AudioSample]) -> MatchResult {
        self.blocks.lock().expect("blocks lock").push(samples.to_vec());
        self.results
            .lock()
            .expect("results lock")
            .pop_front()
            .unwrap_or(MatchResult::NoMatch)
    }
}

/// One scripted read outcome
#[derive(Debug, Clone)]
pub enum Step {
    Read(SessionRead),
    Fail,
}

/// Script for one session
#[derive(Debug, Clone)]
pub struct Script {
    pub steps: VecDeque<Step>,
    /// Returned once the steps run out
    pub then: SessionRead,
    pub fail_writes: bool,
}

impl Script {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            then: SessionRead::Finished,
            fail_writes: false,
        }
    }

    /// Stay pending forever after the steps
    pub fn then_pending(mut self) -> Self {
        self.then = SessionRead::Pending;
        self
    }

    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    /// A full turn: end of utterance, then two audio responses
    pub fn full_turn(audio: &[AudioSample]) -> Self {
        let (first, second) = audio.split_at(audio.len() / 2);
        Self::new([
            Step::Read(SessionRead::Pending),
            Step::Read(SessionRead::Message(end_of_utterance())),
            Step::Read(SessionRead::Pending),
            Step::Read(SessionRead::Message(audio_response(first))),
            Step::Read(SessionRead::Message(audio_response(second))),
        ])
    }
}

pub fn end_of_utterance() -> AssistResponse {
    AssistResponse {
        event_type: Some(ResponseEvent::EndOfUtterance),
        ..AssistResponse::default()
    }
}

pub fn audio_response(samples: &[AudioSample]) -> AssistResponse {
    AssistResponse {
        audio_out: Some(samples_to_le_bytes(samples)),
        supplemental_display_text: Some("here you go".to_string()),
        ..AssistResponse::default()
    }
}

/// In-memory assistant service that plays one script per session
#[derive(Default)]
pub struct ScriptedChannel {
    scripts: Mutex<VecDeque<Script>>,
    requests: Arc<Mutex<Vec<AssistRequest>>>,
    opened: AtomicUsize,
    finished: Arc<AtomicUsize>,
}

impl ScriptedChannel {
    pub fn new(scripts: impl IntoIterator<Item = Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            ..Self::default()
        })
    }

    /// Every request written across sessions
    pub fn requests(&self) -> Vec<AssistRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    /// All input audio sent, decoded
    pub fn sent_audio(&self) -> Vec<AudioSample> {
        self.requests()
            .iter()
            .filter_map(|r| r.audio_in.as_deref())
            .flat_map(le_bytes_to_samples)
            .collect()
    }

    pub fn sessions_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn sessions_finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

impl AssistantChannel for ScriptedChannel {
    fn open_session(&self) -> wakeline::Result<Box<dyn AssistantSession>> {
        let script = self
            .scripts
            .lock()
            .expect("scripts lock")
            .pop_front()
            .ok_or_else(|| wakeline::Error::Transport("no scripted session left".to_string()))?;
        self.opened.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(ScriptedSession {
            script,
            requests: Arc::clone(&self.requests),
            finished: Arc::clone(&self.finished),
        }))
    }
}

struct ScriptedSession {
    script: Script,
    requests: Arc<Mutex<Vec<AssistRequest>>>,
    finished: Arc<AtomicUsize>,
}

impl AssistantSession for ScriptedSession {
    fn write(&mut self, request: &AssistRequest) -> wakeline::Result<()> {
        if self.script.fail_writes {
            return Err(wakeline::Error::Transport("scripted write failure".to_string()));
        }
        self.requests.lock().expect("requests lock").push(request.clone());
        Ok(())
    }

    fn read(&mut self) -> wakeline::Result<SessionRead> {
        match self.script.steps.pop_front() {
            Some(Step::Read(read)) => Ok(read),
            Some(Step::Fail) => Err(wakeline::Error::Transport("scripted read failure".to_string())),
            None => Ok(self.script.then.clone()),
        }
    }

    fn finish(&mut self) -> wakeline::Result<()> {
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
