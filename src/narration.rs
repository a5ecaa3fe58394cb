//! Narration pipeline
//!
//! capture → analyze → classify urgency → route. Each step can fail on its
//! own; the pipeline only reports outcomes and never talks to the user or
//! touches interaction state. Routing is a pure decision the orchestrator
//! acts on.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use crate::collab::{CaptureSource, VisionAnalyzer};
use crate::intent::BackendId;
use crate::state::InteractionState;
use crate::{Error, Result};

/// Spoken prefix for urgent results
pub const URGENT_PREFIX: &str = "緊急: ";

/// Built-in hazard vocabulary (matched case-insensitively as substrings)
///
/// Vehicles are matched only as the subject of a clause or by approach
/// verbs; a bare 車 would also hit 駐車場, 車椅子 and 電車.
const HAZARD_WORDS: &[&str] = &[
    "緊急", "危険", "危ない", "あぶない", "注意", "障害物", "段差", "階段", "穴", "工事",
    "車が", "車両", "自転車が", "バイクが", "接近", "近づいて", "赤信号", "踏切", "ホームの端",
    "ぶつか", "danger", "hazard", "obstacle", "caution", "warning", "stairs",
];

/// Most recently captured frame
#[derive(Debug, Clone)]
pub struct SceneSnapshot {
    /// Raw image bytes
    pub image: Arc<[u8]>,
    /// When the frame was captured
    pub captured_at: DateTime<Utc>,
}

/// Why a narration run was started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NarrationMode {
    /// Periodic timer tick
    Automatic,
    /// User asked for a quick description
    Manual,
    /// `DescribeInDetail` command
    Detailed,
}

impl NarrationMode {
    /// State in which a non-urgent result of this mode may be spoken
    #[must_use]
    pub const fn speaking_state(self) -> InteractionState {
        match self {
            Self::Automatic => InteractionState::Idle,
            Self::Manual => InteractionState::ManualAnalysis,
            Self::Detailed => InteractionState::Executing,
        }
    }
}

/// Analyzer text with its derived urgency
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisResult {
    /// Description returned by the backend
    pub text: String,
    /// Whether the text describes a hazard
    pub urgent: bool,
}

impl AnalysisResult {
    /// Text as it should be spoken
    #[must_use]
    pub fn spoken_text(&self) -> String {
        if self.urgent && !self.text.starts_with("緊急") {
            format!("{URGENT_PREFIX}{}", self.text)
        } else {
            self.text.clone()
        }
    }
}

/// What to do with an analysis result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Force-stop the recognizer if listening, then speak immediately
    Preempt(String),
    /// Speak normally
    Speak(String),
    /// Do not speak (user is busy or the result is stale)
    Discard,
}

/// Prompts sent to the vision backend
#[derive(Debug, Clone)]
pub struct Prompts {
    /// Short prompt for automatic and manual narration
    pub short: String,
    /// Long prompt for the detailed description command
    pub detailed: String,
}

impl Default for Prompts {
    fn default() -> Self {
        Self {
            short: "あなたは視覚障害のある歩行者を支援しています。前方の様子を30文字程度の日本語で簡潔に伝えてください。危険や障害物がある場合は文頭に「緊急」と付けてください。".to_string(),
            detailed: "あなたは視覚障害のある歩行者を支援しています。段差、車、自転車、人、信号、障害物など歩行の安全に関わるものを中心に、位置関係が分かるように前方の様子を詳しく日本語で説明してください。危険がある場合は文頭に「緊急」と付けてください。".to_string(),
        }
    }
}

impl Prompts {
    /// Prompt for a narration mode
    #[must_use]
    pub fn for_mode(&self, mode: NarrationMode) -> &str {
        match mode {
            NarrationMode::Automatic | NarrationMode::Manual => &self.short,
            NarrationMode::Detailed => &self.detailed,
        }
    }
}

/// Classifies analyzer text as urgent by hazard vocabulary
#[derive(Debug, Clone)]
pub struct UrgencyClassifier {
    words: Vec<String>,
}

impl Default for UrgencyClassifier {
    fn default() -> Self {
        Self {
            words: HAZARD_WORDS.iter().map(|w| w.to_lowercase()).collect(),
        }
    }
}

impl UrgencyClassifier {
    /// Add extra hazard words on top of the built-in vocabulary
    #[must_use]
    pub fn with_extra_words<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.words.extend(
            words
                .into_iter()
                .map(|w| w.as_ref().trim().to_lowercase())
                .filter(|w| !w.is_empty()),
        );
        self
    }

    /// Whether `text` mentions a hazard
    #[must_use]
    pub fn is_urgent(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.words.iter().any(|w| lower.contains(w.as_str()))
    }
}

/// Capture and analysis steps with a shared snapshot slot
#[derive(Clone)]
pub struct NarrationPipeline {
    source: Arc<dyn CaptureSource>,
    analyzer: Arc<dyn VisionAnalyzer>,
    prompts: Arc<Prompts>,
    classifier: Arc<UrgencyClassifier>,
    snapshot: Arc<RwLock<Option<SceneSnapshot>>>,
}

impl std::fmt::Debug for NarrationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NarrationPipeline")
            .field("prompts", &self.prompts)
            .field("has_snapshot", &self.latest_snapshot().is_some())
            .finish_non_exhaustive()
    }
}

impl NarrationPipeline {
    /// Create a pipeline over the given collaborators
    #[must_use]
    pub fn new(
        source: Arc<dyn CaptureSource>,
        analyzer: Arc<dyn VisionAnalyzer>,
        prompts: Prompts,
        classifier: UrgencyClassifier,
    ) -> Self {
        Self {
            source,
            analyzer,
            prompts: Arc::new(prompts),
            classifier: Arc::new(classifier),
            snapshot: Arc::new(RwLock::new(None)),
        }
    }

    /// Capture a frame and store it as the latest snapshot
    ///
    /// # Errors
    ///
    /// Returns [`Error::Capture`] if the source fails or yields no bytes
    pub async fn capture(&self) -> Result<SceneSnapshot> {
        let bytes = self.source.capture().await?;
        if bytes.is_empty() {
            return Err(Error::Capture("capture source returned no data".to_string()));
        }

        let snapshot = SceneSnapshot {
            image: Arc::from(bytes),
            captured_at: Utc::now(),
        };

        if let Ok(mut slot) = self.snapshot.write() {
            *slot = Some(snapshot.clone());
        }

        tracing::debug!(bytes = snapshot.image.len(), "scene captured");
        Ok(snapshot)
    }

    /// Send a snapshot to the analyzer and classify the reply
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the analyzer fails or replies with nothing
    pub async fn analyze(
        &self,
        snapshot: &SceneSnapshot,
        mode: NarrationMode,
        backend: BackendId,
    ) -> Result<AnalysisResult> {
        let prompt = self.prompts.for_mode(mode);
        let text = self
            .analyzer
            .analyze(&snapshot.image, prompt, backend)
            .await?
            .trim()
            .to_string();

        if text.is_empty() {
            return Err(Error::Backend(format!("{backend} returned an empty description")));
        }

        let urgent = self.classifier.is_urgent(&text);
        tracing::debug!(%backend, ?mode, urgent, description = %text, "scene analyzed");
        Ok(AnalysisResult { text, urgent })
    }

    /// Latest successful capture, if any
    #[must_use]
    pub fn latest_snapshot(&self) -> Option<SceneSnapshot> {
        self.snapshot.read().ok().and_then(|s| s.clone())
    }

    /// Classifier used for urgency
    #[must_use]
    pub fn classifier(&self) -> &UrgencyClassifier {
        &self.classifier
    }
}

/// Decide what to do with a result given the current state
///
/// Urgent results always preempt. Non-urgent results are spoken only while
/// the machine is still in the state that asked for them, and automatic
/// results must also belong to the current scheduler epoch.
#[must_use]
pub fn route(
    result: &AnalysisResult,
    mode: NarrationMode,
    state: InteractionState,
    fresh: bool,
) -> Route {
    if result.urgent {
        return Route::Preempt(result.spoken_text());
    }

    if state != mode.speaking_state() {
        return Route::Discard;
    }

    if mode == NarrationMode::Automatic && !fresh {
        return Route::Discard;
    }

    Route::Speak(result.spoken_text())
}
