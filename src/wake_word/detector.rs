//! Polling wake word detector

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use super::{Classifier, DetectorState, MatchResult, WakeWordEvent, WakeWordObserver};
use crate::lock::lock_or_recover;
use crate::observer::ObserverSet;
use crate::stream::{AudioSample, StreamReader};
use crate::{Error, Result};

/// Pause between polling iterations
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// State shared between the detector handle and its polling thread
struct Shared {
    observers: ObserverSet<dyn WakeWordObserver>,
    running: AtomicBool,
    state: Mutex<DetectorState>,
}

impl Shared {
    fn publish(&self, event: &WakeWordEvent) {
        if let WakeWordEvent::LifecycleChanged(state) = event {
            *lock_or_recover(&self.state, "detector state") = *state;
        }

        for observer in self.observers.snapshot() {
            observer.on_event(event);
        }
    }
}

/// Detects configured wake words on a stream and notifies observers
///
/// The polling thread starts as soon as the detector is spawned and runs until
/// [`stop`](Self::stop) is called or the detector is dropped.
pub struct WakeWordDetector {
    shared: Arc<Shared>,
    wake_words: Vec<String>,
    thread: Option<JoinHandle<()>>,
}

impl WakeWordDetector {
    /// Start detecting on `reader`
    ///
    /// `wake_words[i]` is the word reported when the classifier returns match
    /// index `i + 1`. `observers` are registered before the thread starts, so
    /// they receive the initial `Active` event.
    ///
    /// # Errors
    ///
    /// Returns error if no wake word is configured or the polling thread
    /// cannot be spawned
    pub fn spawn(
        reader: StreamReader<AudioSample>,
        classifier: Box<dyn Classifier>,
        wake_words: Vec<String>,
        poll_interval: Duration,
        observers: Vec<Arc<dyn WakeWordObserver>>,
    ) -> Result<Self> {
        let wake_words: Vec<String> = wake_words
            .into_iter()
            .map(|w| w.trim().to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();

        if wake_words.is_empty() {
            return Err(Error::WakeWord("no wake words configured".to_string()));
        }

        let shared = Arc::new(Shared {
            observers: ObserverSet::new(),
            running: AtomicBool::new(true),
            state: Mutex::new(DetectorState::Stopped),
        });
        for observer in observers {
            shared.observers.add(observer);
        }

        let span = tracing::info_span!("wake_word");
        let poll = PollLoop {
            shared: Arc::clone(&shared),
            reader,
            classifier,
            wake_words: wake_words.clone(),
            poll_interval,
        };

        let thread = std::thread::Builder::new()
            .name("wake-word".to_string())
            .spawn(move || {
                let _entered = span.enter();
                poll.run();
            })
            .map_err(|e| Error::WakeWord(format!("failed to spawn detection thread: {e}")))?;

        tracing::debug!(wake_words = ?wake_words, "wake word detector started");

        Ok(Self {
            shared,
            wake_words,
            thread: Some(thread),
        })
    }

    /// Subscribe to detector events
    pub fn add_observer(&self, observer: Arc<dyn WakeWordObserver>) {
        self.shared.observers.add(observer);
    }

    /// Unsubscribe; safe to call from inside the observer's own callback
    pub fn remove_observer(&self, observer: &Arc<dyn WakeWordObserver>) -> bool {
        self.shared.observers.remove(observer)
    }

    /// Last lifecycle state published
    #[must_use]
    pub fn state(&self) -> DetectorState {
        *lock_or_recover(&self.shared.state, "detector state")
    }

    /// The configured wake words, normalized
    #[must_use]
    pub fn wake_words(&self) -> &[String] {
        &self.wake_words
    }

    /// Stop polling and wait for the thread to publish `Stopped` and exit
    ///
    /// May take up to one polling interval.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Release);

        if let Some(thread) = self.thread.take() {
            tracing::debug!("joining wake word thread");
            if thread.join().is_err() {
                tracing::error!("wake word thread panicked");
            }
        }
    }
}

impl Drop for WakeWordDetector {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Everything owned by the polling thread
struct PollLoop {
    shared: Arc<Shared>,
    reader: StreamReader<AudioSample>,
    classifier: Box<dyn Classifier>,
    wake_words: Vec<String>,
    poll_interval: Duration,
}

impl PollLoop {
    fn run(mut self) {
        tracing::debug!("detection thread started");
        self.shared
            .publish(&WakeWordEvent::LifecycleChanged(DetectorState::Active));

        let mut scratch: Vec<AudioSample> = Vec::new();
        let mut errored = false;

        while self.shared.running.load(Ordering::Acquire) {
            let available = self.reader.available_count();
            scratch.resize(available, 0);

            let (position, n) = if available == 0 {
                (self.reader.position(), 0)
            } else {
                self.reader.read_tracked(&mut scratch, available)
            };

            if n == 0 {
                tracing::trace!("reader read nothing from stream");
            } else {
                match self.classifier.classify(&scratch[..n]) {
                    MatchResult::NoMatch => self.recover(&mut errored),
                    MatchResult::Match(index) => {
                        self.recover(&mut errored);
                        self.recognized(index, position);
                    }
                    MatchResult::Error => {
                        tracing::warn!(samples = n, "classifier error; continuing");
                        errored = true;
                        self.shared
                            .publish(&WakeWordEvent::LifecycleChanged(DetectorState::Errored));
                    }
                }
            }

            std::thread::sleep(self.poll_interval);
        }

        tracing::debug!("detection thread ending");
        self.shared
            .publish(&WakeWordEvent::LifecycleChanged(DetectorState::Stopped));
    }

    /// Report `Active` again after the classifier produced a clean result
    fn recover(&self, errored: &mut bool) {
        if std::mem::take(errored) {
            tracing::info!("classifier recovered");
            self.shared
                .publish(&WakeWordEvent::LifecycleChanged(DetectorState::Active));
        }
    }

    fn recognized(&self, index: usize, position: usize) {
        let Some(word) = index.checked_sub(1).and_then(|i| self.wake_words.get(i)) else {
            tracing::warn!(index, "classifier returned an unknown wake word index");
            return;
        };

        tracing::info!(word, position, "wake word detected");
        self.shared.publish(&WakeWordEvent::Recognized {
            word: word.clone(),
            position,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::BoundedStream;

    struct Never;

    impl Classifier for Never {
        fn classify(&mut self, _samples: &[AudioSample]) -> MatchResult {
            MatchResult::NoMatch
        }
    }

    #[test]
    fn test_spawn_requires_wake_words() {
        let stream = BoundedStream::<AudioSample>::new(16);
        let result = WakeWordDetector::spawn(
            stream.create_reader(),
            Box::new(Never),
            vec!["  ".to_string()],
            Duration::from_millis(5),
            Vec::new(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_wake_words_normalized() {
        let stream = BoundedStream::<AudioSample>::new(16);
        let mut detector = WakeWordDetector::spawn(
            stream.create_reader(),
            Box::new(Never),
            vec!["  Hey JARVIS ".to_string(), "alexa".to_string()],
            Duration::from_millis(5),
            Vec::new(),
        )
        .unwrap();

        assert_eq!(detector.wake_words(), &["hey jarvis", "alexa"]);
        detector.stop();
        assert_eq!(detector.state(), DetectorState::Stopped);
    }
}
