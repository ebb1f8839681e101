//! Wake word detection
//!
//! A [`WakeWordDetector`] polls its own stream reader, feeds each block to a
//! [`Classifier`], and publishes [`WakeWordEvent`]s to subscribed
//! [`WakeWordObserver`]s. A `Recognized` event carries the reader position at
//! which the matching block started, so a consumer with its own reader on the
//! same stream can rewind to it and replay the utterance.

pub mod classifier;
mod detector;

pub use classifier::{Classifier, EnergyClassifier, MatchResult};
pub use detector::{DEFAULT_POLL_INTERVAL, WakeWordDetector};

/// Lifecycle of a detector as reported to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    /// Polling thread is running
    Active,
    /// Polling thread has exited
    Stopped,
    /// The classifier reported an internal error; polling continues
    Errored,
}

/// Notification published by a detector
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WakeWordEvent {
    /// A configured wake word matched in the block starting at `position`
    Recognized {
        /// The configured wake word that matched
        word: String,
        /// Reader position of the first sample of the matching block
        position: usize,
    },
    /// The detector's lifecycle changed
    LifecycleChanged(DetectorState),
}

/// Subscriber to detector events
///
/// Called synchronously on the detector's polling thread; implementations
/// should return quickly and never block on audio I/O.
pub trait WakeWordObserver: Send + Sync {
    /// Handle one event
    fn on_event(&self, event: &WakeWordEvent);
}
