//! Conversation with the remote assistant service
//!
//! The [`ConversationEngine`] owns a reader on the microphone stream and the
//! writer of the playback stream. It waits, idle, until a wake word observer
//! callback triggers it, then streams the utterance to the service and feeds
//! the spoken reply into the playback stream.
//!
//! ```text
//! NOT_READY ─► IDLE ─(trigger)─► KEYWORD_TRIGGERED ─► LISTENING ─► THINKING ─► RESPONDING
//!                ▲                                        │            │            │
//!                └────────────────────────────────────────┴────────────┴────────────┘
//! ```

mod engine;
pub mod transport;
pub mod websocket;

pub use engine::{ConversationEngine, EngineSettings};
pub use transport::{
    AssistConfig, AssistRequest, AssistResponse, AssistantChannel, AssistantSession,
    AudioEncoding, AudioFormat, ResponseEvent, SessionRead, SpeechResult,
};
pub use websocket::WebSocketChannel;

/// Conversation state held by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    /// Transport not connected, or shutting down
    NotReady,
    /// Waiting for a trigger
    Idle,
    /// Trigger received; opening a session
    KeywordTriggered,
    /// Streaming microphone audio to the service
    Listening,
    /// Utterance finished; waiting for the reply
    Thinking,
    /// Playing the reply
    Responding,
}

impl ConversationState {
    /// Whether the engine thread sleeps in this state
    #[must_use]
    pub const fn is_waiting(self) -> bool {
        matches!(self, Self::NotReady | Self::Idle)
    }
}

impl std::fmt::Display for ConversationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NotReady => "NOT_READY",
            Self::Idle => "IDLE",
            Self::KeywordTriggered => "KEYWORD_TRIGGERED",
            Self::Listening => "LISTENING",
            Self::Thinking => "THINKING",
            Self::Responding => "RESPONDING",
        };
        f.write_str(name)
    }
}

/// Subscriber to conversation state changes
///
/// Called on whichever thread made the change, after the state lock has been
/// released.
pub trait AssistantObserver: Send + Sync {
    /// Handle a state change
    fn on_state_changed(&self, state: ConversationState);
}
