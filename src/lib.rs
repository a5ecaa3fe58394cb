//! Beacon Sight - spoken scene narration for pedestrians
//!
//! Periodically captures the scene ahead, asks a vision model to describe
//! it and speaks the description. The user can interrupt at any time with a
//! voice command (help, stop, switch backend, describe in detail, resume).
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                   Collaborators                       │
//! │  Camera  │  Vision (Gemini/GPT/Claude)  │  Mic  │ TTS │
//! └────────────────────┬─────────────────────────────────┘
//!                      │ events
//! ┌────────────────────▼─────────────────────────────────┐
//! │                  Orchestrator                         │
//! │  State machine │ Scheduler │ Failure policy │ Intents │
//! └────────────────────┬─────────────────────────────────┘
//!                      │
//! ┌────────────────────▼─────────────────────────────────┐
//! │          Narration pipeline (capture → analyze)       │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod capture;
pub mod collab;
pub mod config;
pub mod error;
pub mod failure;
pub mod intent;
pub mod narration;
pub mod orchestrator;
pub mod prefs;
pub mod scheduler;
pub mod state;
pub mod vision;
pub mod voice;

pub use collab::{
    CaptureSource, PreferenceStore, Recognition, RecognitionSink, SpeechOutput, SpeechRecognizer,
    VisionAnalyzer,
};
pub use config::Config;
pub use error::{Error, Result};
pub use failure::{CaptureOutcome, FailurePolicy};
pub use intent::{BackendId, CommandIntent, CommandInterpreter};
pub use narration::{AnalysisResult, NarrationMode, NarrationPipeline, Prompts};
pub use orchestrator::{Collaborators, Event, Orchestrator, OrchestratorHandle, Phrases, Settings};
pub use prefs::JsonPreferenceStore;
pub use state::{InteractionState, Trigger};
pub use vision::VisionClient;
