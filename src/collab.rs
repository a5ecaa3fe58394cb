//! Collaborator contracts
//!
//! The orchestrator only talks to hardware and services through these
//! traits. Concrete adapters live in `capture`, `vision`, `voice` and
//! `prefs`; tests substitute recording mocks.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::intent::BackendId;
use crate::orchestrator::Event;
use crate::Result;

/// Produces raw image bytes on demand
#[async_trait]
pub trait CaptureSource: Send + Sync {
    /// Capture one frame
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Capture`] if no frame could be produced
    async fn capture(&self) -> Result<Vec<u8>>;
}

/// Describes an image given a prompt
#[async_trait]
pub trait VisionAnalyzer: Send + Sync {
    /// Analyze `image` with `prompt` on the given backend
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Backend`] on network, auth or quota failures
    async fn analyze(&self, image: &[u8], prompt: &str, backend: BackendId) -> Result<String>;
}

/// Speaks text through the audio output
#[async_trait]
pub trait SpeechOutput: Send + Sync {
    /// Speak `text`, completing when the audio finishes or is stopped
    ///
    /// # Errors
    ///
    /// Returns error if synthesis or playback fails
    async fn speak(&self, text: &str) -> Result<()>;

    /// Cut any in-flight speech short
    async fn stop(&self);
}

/// Message from a recognizer session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recognition {
    /// Interim transcript
    Partial(String),
    /// Final transcript for this session
    Final(String),
    /// Recognizer failure reported on the side channel
    Error(String),
}

/// Where a recognizer session delivers its results
///
/// Every result is tagged with the session that produced it, so results
/// arriving after the session was stopped can be told apart.
#[derive(Debug, Clone)]
pub struct RecognitionSink {
    session: u64,
    events: mpsc::Sender<Event>,
}

impl RecognitionSink {
    /// Create a sink for `session` posting into `events`
    #[must_use]
    pub const fn new(session: u64, events: mpsc::Sender<Event>) -> Self {
        Self { session, events }
    }

    /// Session this sink belongs to
    #[must_use]
    pub const fn session(&self) -> u64 {
        self.session
    }

    /// Deliver a result; silently dropped if the orchestrator has shut down
    pub async fn send(&self, result: Recognition) {
        let event = Event::Recognition {
            session: self.session,
            result,
        };
        if self.events.send(event).await.is_err() {
            tracing::debug!(session = self.session, "recognition result dropped, loop closed");
        }
    }

    /// Convenience for a partial transcript
    pub async fn partial(&self, text: impl Into<String>) {
        self.send(Recognition::Partial(text.into())).await;
    }

    /// Convenience for a final transcript
    pub async fn final_text(&self, text: impl Into<String>) {
        self.send(Recognition::Final(text.into())).await;
    }

    /// Convenience for a side-channel error
    pub async fn error(&self, message: impl Into<String>) {
        self.send(Recognition::Error(message.into())).await;
    }
}

/// Transcribes speech from the microphone
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Start one listening session delivering into `sink`
    ///
    /// Returns whether the session started. A session ends with exactly one
    /// `Final` or `Error` unless stopped first.
    async fn listen(&self, locale: &str, sink: RecognitionSink) -> bool;

    /// Stop the current session (cooperative)
    async fn stop(&self);
}

/// Persisted user preferences
pub trait PreferenceStore: Send + Sync {
    /// Backend selected in an earlier run, if any
    fn selected_backend(&self) -> Option<BackendId>;

    /// Persist the selected backend
    ///
    /// # Errors
    ///
    /// Returns error if the preference cannot be written
    fn set_selected_backend(&self, backend: BackendId) -> Result<()>;
}
