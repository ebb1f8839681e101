//! wakeline - Always-listening wake word front end for a voice assistant
//!
//! This library provides the real-time plumbing between a microphone, a wake
//! word classifier, a remote assistant service and a speaker:
//! - Bounded single-writer / multi-reader sample streams
//! - Wake word detection with rewindable recognition positions
//! - A conversation state machine driving a streaming assistant session
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐    ┌───────────────┐    ┌──────────────────────┐
//! │ AudioCapture │──► │ input stream  │──► │ WakeWordDetector     │
//! └──────────────┘    │ (BoundedStream)│    └──────────┬───────────┘
//!                     │               │               │ Recognized{word, position}
//!                     │               │──► ┌──────────▼───────────┐    ┌───────────────┐
//!                     └───────────────┘    │ ConversationEngine   │◄──►│ assistant     │
//!                                          └──────────┬───────────┘    │ service       │
//! ┌──────────────┐    ┌───────────────┐               │                └───────────────┘
//! │ AudioPlayback│◄── │ output stream │◄──────────────┘
//! └──────────────┘    └───────────────┘
//! ```

pub mod assistant;
pub mod config;
pub mod error;
mod lock;
pub mod observer;
pub mod pipeline;
pub mod stream;
pub mod voice;
pub mod wake_word;

pub use assistant::{AssistantObserver, ConversationEngine, ConversationState};
pub use config::Config;
pub use error::{Error, Result};
pub use observer::ObserverSet;
pub use pipeline::Pipeline;
pub use stream::{AudioSample, BoundedStream, StreamReader, StreamWriter};
pub use wake_word::{WakeWordDetector, WakeWordEvent, WakeWordObserver};
