//! Conversation state machine

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use uuid::Uuid;

use super::transport::{AssistConfig, AssistRequest, AssistResponse, AssistantChannel, AssistantSession, SessionRead};
use super::{AssistantObserver, ConversationState};
use crate::lock::lock_or_recover;
use crate::observer::ObserverSet;
use crate::stream::{AudioSample, StreamReader, StreamWriter};
use crate::wake_word::{DetectorState, WakeWordEvent, WakeWordObserver};
use crate::{Error, Result};

/// Tunables for the conversation engine
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Wake word that starts a turn; other recognized words are ignored
    pub trigger_word: String,
    /// Session configuration sent with the first request of each turn
    pub assist: AssistConfig,
    /// Pause between polls while the session has nothing to read
    pub chunk_interval: Duration,
    /// How long THINKING / RESPONDING wait for the next response
    pub response_timeout: Duration,
    /// Longest stretch of microphone audio streamed in one turn
    pub max_utterance: Duration,
}

/// Drives conversation turns against the assistant service
///
/// Created `NOT_READY`, it becomes `IDLE` once its thread is running with a
/// connected channel. Dropping the engine stops the thread and leaves it
/// `NOT_READY`.
pub struct ConversationEngine {
    core: Arc<EngineCore>,
    thread: Option<JoinHandle<()>>,
}

/// State shared between the engine handle, observer callbacks and the thread
struct EngineCore {
    trigger_word: String,
    reader: StreamReader<AudioSample>,
    state: Mutex<ConversationState>,
    state_changed: Condvar,
    running: AtomicBool,
    pending_text: Mutex<Option<String>>,
    observers: ObserverSet<dyn AssistantObserver>,
}

impl ConversationEngine {
    /// Start the engine thread
    ///
    /// `reader` is the engine's own reader on the microphone stream and
    /// `writer` feeds the playback stream.
    ///
    /// # Errors
    ///
    /// Returns error if the engine thread cannot be spawned
    pub fn new(
        channel: Arc<dyn AssistantChannel>,
        reader: StreamReader<AudioSample>,
        writer: StreamWriter<AudioSample>,
        settings: EngineSettings,
        observers: Vec<Arc<dyn AssistantObserver>>,
    ) -> Result<Self> {
        let core = Arc::new(EngineCore {
            trigger_word: settings.trigger_word.trim().to_lowercase(),
            reader,
            state: Mutex::new(ConversationState::NotReady),
            state_changed: Condvar::new(),
            running: AtomicBool::new(true),
            pending_text: Mutex::new(None),
            observers: ObserverSet::new(),
        });
        for observer in observers {
            core.observers.add(observer);
        }

        let runner = TurnRunner {
            core: Arc::clone(&core),
            channel,
            writer,
            settings,
        };

        let span = tracing::info_span!("conversation");
        let thread = std::thread::Builder::new()
            .name("conversation".to_string())
            .spawn(move || {
                let _entered = span.enter();
                runner.run();
            })
            .map_err(|e| Error::Transport(format!("failed to spawn conversation thread: {e}")))?;

        core.set_state(ConversationState::Idle);
        tracing::info!(trigger_word = %core.trigger_word, "conversation engine ready");

        Ok(Self {
            core,
            thread: Some(thread),
        })
    }

    /// Handle for subscribing the engine to a wake word detector
    #[must_use]
    pub fn observer(&self) -> Arc<dyn WakeWordObserver> {
        Arc::clone(&self.core) as Arc<dyn WakeWordObserver>
    }

    /// Start a turn if `word` is this engine's trigger word
    ///
    /// The input reader is rewound to `position` so the turn streams audio
    /// from the block where the word was recognized. Other words are ignored.
    pub fn on_key_word_detected(&self, word: &str, position: usize) {
        self.core.on_key_word_detected(word, position);
    }

    /// Start a turn that sends `query` as text instead of microphone audio
    ///
    /// Returns false if the engine is not ready.
    pub fn ask_text(&self, query: impl Into<String>) -> bool {
        *lock_or_recover(&self.core.pending_text, "pending text") = Some(query.into());

        let accepted = self.core.trigger(None);
        if !accepted {
            lock_or_recover(&self.core.pending_text, "pending text").take();
        }
        accepted
    }

    /// Current conversation state
    #[must_use]
    pub fn state(&self) -> ConversationState {
        self.core.state()
    }

    /// The normalized trigger word
    #[must_use]
    pub fn trigger_word(&self) -> &str {
        &self.core.trigger_word
    }

    /// Subscribe to state changes
    pub fn add_observer(&self, observer: Arc<dyn AssistantObserver>) {
        self.core.observers.add(observer);
    }

    /// Unsubscribe from state changes
    pub fn remove_observer(&self, observer: &Arc<dyn AssistantObserver>) -> bool {
        self.core.observers.remove(observer)
    }

    /// Stop the engine thread and wait for it
    ///
    /// May take up to one in-flight transport call.
    pub fn shutdown(&mut self) {
        self.core.running.store(false, Ordering::Release);
        {
            // Notify under the lock so the thread cannot miss the wakeup
            let _state = lock_or_recover(&self.core.state, "conversation state");
            self.core.state_changed.notify_all();
        }

        if let Some(thread) = self.thread.take() {
            tracing::debug!("joining conversation thread");
            if thread.join().is_err() {
                tracing::error!("conversation thread panicked");
            }
        }
    }
}

impl Drop for ConversationEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl EngineCore {
    fn state(&self) -> ConversationState {
        *lock_or_recover(&self.state, "conversation state")
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn set_state(&self, state: ConversationState) {
        *lock_or_recover(&self.state, "conversation state") = state;
        self.state_changed.notify_one();
        self.notify(state);
    }

    /// Move from `from` to `to` unless another thread changed the state first
    fn advance(&self, from: ConversationState, to: ConversationState) -> bool {
        {
            let mut state = lock_or_recover(&self.state, "conversation state");
            if *state != from {
                return false;
            }
            *state = to;
        }

        self.state_changed.notify_one();
        if from != to {
            self.notify(to);
        }
        true
    }

    fn notify(&self, state: ConversationState) {
        tracing::debug!(%state, "conversation state changed");
        for observer in self.observers.snapshot() {
            observer.on_state_changed(state);
        }
    }

    /// Block until a turn is requested; `None` once the engine is stopping
    fn wait_for_trigger(&self) -> Option<ConversationState> {
        let mut state = lock_or_recover(&self.state, "conversation state");
        while self.is_running() && state.is_waiting() {
            state = self
                .state_changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }

        self.is_running().then_some(*state)
    }

    /// Read all pending input while the state is still `expected`
    ///
    /// Holds the state lock across the read, so a new trigger's rewind lands
    /// either before the check, which then fails, or after the drain.
    fn drain_input(&self, expected: ConversationState) -> Option<Vec<AudioSample>> {
        let state = lock_or_recover(&self.state, "conversation state");
        if !self.is_running() || *state != expected {
            return None;
        }
        Some(self.reader.read_available())
    }

    /// Request a new turn, optionally rewinding the input reader first
    fn trigger(&self, position: Option<usize>) -> bool {
        {
            let mut state = lock_or_recover(&self.state, "conversation state");
            if *state == ConversationState::NotReady {
                tracing::debug!("engine not ready; ignoring trigger");
                return false;
            }

            if let Some(position) = position {
                if let Err(e) = self.reader.set_position(position) {
                    tracing::warn!(error = %e, "rewind failed; streaming from current position");
                }
            }
            *state = ConversationState::KeywordTriggered;
        }

        self.state_changed.notify_one();
        self.notify(ConversationState::KeywordTriggered);
        true
    }

    fn on_key_word_detected(&self, word: &str, position: usize) {
        if !word.trim().eq_ignore_ascii_case(&self.trigger_word) {
            tracing::trace!(word, "not the trigger word");
            return;
        }

        tracing::info!(word, position, "activated by wake word");
        self.trigger(Some(position));
    }
}

impl WakeWordObserver for EngineCore {
    fn on_event(&self, event: &WakeWordEvent) {
        match event {
            WakeWordEvent::Recognized { word, position } => {
                self.on_key_word_detected(word, *position);
            }
            WakeWordEvent::LifecycleChanged(DetectorState::Errored) => {
                tracing::warn!("wake word detector reported an error");
            }
            WakeWordEvent::LifecycleChanged(state) => {
                tracing::debug!(?state, "wake word detector lifecycle changed");
            }
        }
    }
}

/// Everything owned by the engine thread
struct TurnRunner {
    core: Arc<EngineCore>,
    channel: Arc<dyn AssistantChannel>,
    writer: StreamWriter<AudioSample>,
    settings: EngineSettings,
}

impl TurnRunner {
    fn run(mut self) {
        tracing::debug!("conversation thread started");

        while let Some(state) = self.core.wait_for_trigger() {
            if state == ConversationState::KeywordTriggered {
                self.run_turn();
            } else {
                tracing::warn!(%state, "unexpected state outside a turn; resetting");
                self.core.advance(state, ConversationState::Idle);
            }
        }

        tracing::debug!("conversation thread ending");
        self.core.set_state(ConversationState::NotReady);
    }

    /// Run one turn from `KEYWORD_TRIGGERED` back to `IDLE`
    ///
    /// Transport failures end the turn quietly. If another thread changes the
    /// state mid-turn (a new trigger, or shutdown) the session is closed and
    /// the turn abandoned without touching the state.
    fn run_turn(&mut self) {
        let span = tracing::info_span!("turn", id = %Uuid::new_v4());
        let _entered = span.enter();

        let mut text_query = lock_or_recover(&self.core.pending_text, "pending text").take();
        let mut session: Option<Box<dyn AssistantSession>> = None;
        let mut carried: Option<AssistResponse> = None;
        let mut state = ConversationState::KeywordTriggered;

        loop {
            tracing::info!(%state, "conversation state");

            let next = match state {
                ConversationState::KeywordTriggered => self.open_session(&mut session),
                ConversationState::Listening
                | ConversationState::Thinking
                | ConversationState::Responding => match session.as_deref_mut() {
                    Some(active) if state == ConversationState::Listening => {
                        self.listen(active, text_query.take(), &mut carried)
                    }
                    Some(active) if state == ConversationState::Thinking => {
                        self.think(active, &mut carried)
                    }
                    Some(active) => self.respond(active, &mut carried),
                    None => Some(ConversationState::Idle),
                },
                ConversationState::Idle | ConversationState::NotReady => return,
            };

            let Some(next) = next else {
                tracing::debug!("turn interrupted");
                close(&mut session);
                return;
            };

            if next == ConversationState::Idle {
                close(&mut session);
            }

            if !self.core.advance(state, next) {
                tracing::debug!("state changed during the turn; abandoning it");
                close(&mut session);
                return;
            }

            if next == ConversationState::Idle {
                tracing::info!("conversation turn complete");
                return;
            }
            state = next;
        }
    }

    /// Whether the turn should stop: shutdown, or the state moved on
    fn interrupted(&self, expected: ConversationState) -> bool {
        !self.core.is_running() || self.core.state() != expected
    }

    fn open_session(&self, session: &mut Option<Box<dyn AssistantSession>>) -> Option<ConversationState> {
        close(session);

        match self.channel.open_session() {
            Ok(opened) => {
                *session = Some(opened);
                Some(ConversationState::Listening)
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to open assistant session");
                Some(ConversationState::Idle)
            }
        }
    }

    /// Stream input audio until the service signals end of utterance
    fn listen(
        &self,
        session: &mut dyn AssistantSession,
        text_query: Option<String>,
        carried: &mut Option<AssistResponse>,
    ) -> Option<ConversationState> {
        if let Some(query) = text_query {
            let request = AssistRequest::text(query.clone()).with_config(self.settings.assist.clone());
            if let Err(e) = session.write(&request) {
                tracing::warn!(error = %e, "failed to send text query");
                return Some(ConversationState::Idle);
            }
            tracing::info!(query, "text query sent");
            return Some(ConversationState::Thinking);
        }

        let started = Instant::now();
        let mut first = true;

        loop {
            let audio = self.core.drain_input(ConversationState::Listening)?;
            if first || !audio.is_empty() {
                let mut request = if audio.is_empty() {
                    AssistRequest::default()
                } else {
                    AssistRequest::audio(&audio)
                };
                if first {
                    request = request.with_config(self.settings.assist.clone());
                    first = false;
                }

                if let Err(e) = session.write(&request) {
                    tracing::warn!(error = %e, "failed to stream audio");
                    return Some(ConversationState::Idle);
                }
                tracing::trace!(samples = audio.len(), "audio sent");
            }

            match session.read() {
                Ok(SessionRead::Message(response)) => {
                    log_response(&response);
                    if response.is_end_of_utterance() || response.has_audio() {
                        if response.has_audio() {
                            *carried = Some(response);
                        }
                        return Some(ConversationState::Thinking);
                    }
                }
                Ok(SessionRead::Pending) => {
                    if started.elapsed() >= self.settings.max_utterance {
                        tracing::warn!("utterance exceeded maximum length; ending turn");
                        return Some(ConversationState::Idle);
                    }
                    std::thread::sleep(self.settings.chunk_interval);
                }
                Ok(SessionRead::Finished) => {
                    tracing::info!("session ended while listening");
                    return Some(ConversationState::Idle);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "read failed while listening");
                    return Some(ConversationState::Idle);
                }
            }
        }
    }

    /// Wait for the first response carrying audio
    fn think(
        &self,
        session: &mut dyn AssistantSession,
        carried: &mut Option<AssistResponse>,
    ) -> Option<ConversationState> {
        if carried.as_ref().is_some_and(AssistResponse::has_audio) {
            return Some(ConversationState::Responding);
        }

        let mut deadline = Instant::now() + self.settings.response_timeout;

        loop {
            if self.interrupted(ConversationState::Thinking) {
                return None;
            }

            match session.read() {
                Ok(SessionRead::Message(response)) => {
                    log_response(&response);
                    if response.has_audio() {
                        *carried = Some(response);
                        return Some(ConversationState::Responding);
                    }
                    deadline = Instant::now() + self.settings.response_timeout;
                }
                Ok(SessionRead::Pending) => {
                    if Instant::now() >= deadline {
                        tracing::warn!("no reply before timeout; ending turn");
                        return Some(ConversationState::Idle);
                    }
                    std::thread::sleep(self.settings.chunk_interval);
                }
                Ok(SessionRead::Finished) => {
                    tracing::info!("turn ended without a spoken reply");
                    return Some(ConversationState::Idle);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "read failed while thinking");
                    return Some(ConversationState::Idle);
                }
            }
        }
    }

    /// Feed response audio to playback until the service ends the turn
    fn respond(
        &self,
        session: &mut dyn AssistantSession,
        carried: &mut Option<AssistResponse>,
    ) -> Option<ConversationState> {
        if let Some(response) = carried.take() {
            self.play(&response);
        }

        let mut deadline = Instant::now() + self.settings.response_timeout;

        loop {
            if self.interrupted(ConversationState::Responding) {
                return None;
            }

            match session.read() {
                Ok(SessionRead::Message(response)) => {
                    log_response(&response);
                    self.play(&response);
                    deadline = Instant::now() + self.settings.response_timeout;
                }
                Ok(SessionRead::Pending) => {
                    if Instant::now() >= deadline {
                        tracing::warn!("reply stalled; ending turn");
                        return Some(ConversationState::Idle);
                    }
                    std::thread::sleep(self.settings.chunk_interval);
                }
                Ok(SessionRead::Finished) => return Some(ConversationState::Idle),
                Err(e) => {
                    tracing::warn!(error = %e, "read failed while responding");
                    return Some(ConversationState::Idle);
                }
            }
        }
    }

    fn play(&self, response: &AssistResponse) {
        let samples = response.audio_samples();
        if samples.is_empty() {
            return;
        }

        if self.writer.write(&samples) == 0 {
            tracing::warn!(samples = samples.len(), "playback stream rejected reply audio");
        } else {
            tracing::trace!(samples = samples.len(), "reply audio queued");
        }
    }
}

fn log_response(response: &AssistResponse) {
    for result in &response.speech_results {
        tracing::info!(transcript = %result.transcript, stability = result.stability, "recognized speech");
    }
    if let Some(text) = response.supplemental_display_text.as_deref() {
        if !text.is_empty() {
            tracing::info!(text, "assistant response");
        }
    }
}

fn close(session: &mut Option<Box<dyn AssistantSession>>) {
    if let Some(mut active) = session.take() {
        if let Err(e) = active.finish() {
            tracing::debug!(error = %e, "failed to finish assistant session");
        }
    }
}
