//! Interaction state machine
//!
//! One enum holds the whole interaction state. Every change goes through
//! [`InteractionState::next`], which encodes the full transition table.

/// Current interaction state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InteractionState {
    /// Narrating automatically, ready for a command
    #[default]
    Idle,
    /// Prompting the user before the recognizer starts
    AwaitingCommand,
    /// Recognizer running, waiting for a final transcript
    Listening,
    /// Running the effect of a recognized command
    Executing,
    /// Running a user-requested one-off analysis
    ManualAnalysis,
}

impl std::fmt::Display for InteractionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::AwaitingCommand => write!(f, "awaiting-command"),
            Self::Listening => write!(f, "listening"),
            Self::Executing => write!(f, "executing"),
            Self::ManualAnalysis => write!(f, "manual-analysis"),
        }
    }
}

/// Something that may move the machine to another state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// User asked to issue a voice command
    ListenRequested,
    /// Listen prompt finished and the recognizer is about to start
    PromptSpoken,
    /// Recognizer produced a usable final transcript
    FinalTranscript,
    /// Recognizer produced an empty or too-short final transcript
    EmptyTranscript,
    /// Command effect finished
    IntentResolved,
    /// Recognizer failed, or re-listen attempts ran out
    ListenAborted,
    /// User asked for a one-off analysis
    ManualRequested,
    /// One-off analysis finished (spoken or failed)
    ManualFinished,
}

impl InteractionState {
    /// Look up the transition table
    ///
    /// Returns `None` when `trigger` is not valid from this state.
    #[must_use]
    pub const fn next(self, trigger: Trigger) -> Option<Self> {
        use InteractionState::{AwaitingCommand, Executing, Idle, Listening, ManualAnalysis};

        match (self, trigger) {
            (Idle, Trigger::ListenRequested) => Some(AwaitingCommand),
            (Idle, Trigger::ManualRequested) => Some(ManualAnalysis),
            (AwaitingCommand, Trigger::PromptSpoken) => Some(Listening),
            (Listening, Trigger::FinalTranscript) => Some(Executing),
            (Listening, Trigger::EmptyTranscript) => Some(AwaitingCommand),
            (AwaitingCommand | Listening, Trigger::ListenAborted)
            | (Executing, Trigger::IntentResolved)
            | (ManualAnalysis, Trigger::ManualFinished) => Some(Idle),
            _ => None,
        }
    }

    /// Whether the voice command session owns the audio channel
    #[must_use]
    pub const fn is_voice_session(self) -> bool {
        matches!(self, Self::AwaitingCommand | Self::Listening | Self::Executing)
    }
}
