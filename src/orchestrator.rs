//! Interaction orchestrator
//!
//! Single owner of [`InteractionState`]. Timer ticks, recognizer results,
//! narration completions and user key presses all arrive as [`Event`]s on
//! one queue and are handled one at a time, so the state checks at the top
//! of each operation are the only locking discipline. Speech output and the
//! recognizer are never engaged together, except that an urgent narration
//! result force-stops the recognizer before it is spoken.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::collab::{
    CaptureSource, PreferenceStore, Recognition, RecognitionSink, SpeechOutput, SpeechRecognizer,
    VisionAnalyzer,
};
use crate::failure::{CaptureOutcome, DEFAULT_FAILURE_THRESHOLD, FailurePolicy};
use crate::intent::{BackendId, CommandInterpreter, CommandIntent, normalize};
use crate::narration::{
    AnalysisResult, NarrationMode, NarrationPipeline, Prompts, Route, UrgencyClassifier, route,
};
use crate::scheduler::{CaptureScheduler, DEFAULT_INTERVAL};
use crate::state::{InteractionState, Trigger};
use crate::{Error, Result};

/// Event queue depth
const EVENT_QUEUE_SIZE: usize = 64;

/// Number of past states kept for diagnostics
const HISTORY_LEN: usize = 64;

/// Something that happened outside the orchestrator
#[derive(Debug, Clone)]
pub enum Event {
    /// Periodic capture timer fired
    TimerFired {
        /// Scheduler epoch that produced the tick
        epoch: u64,
    },
    /// User asked to give a voice command
    ListenRequested,
    /// User asked for a quick one-off description
    ManualAnalysisRequested,
    /// User asked to restart suppressed or paused narration
    ResumeRequested,
    /// Recognizer session produced a result
    Recognition {
        /// Session that produced the result
        session: u64,
        /// The result itself
        result: Recognition,
    },
    /// A capture attempt finished
    CaptureCompleted {
        /// Whether a frame was produced
        outcome: CaptureOutcome,
    },
    /// The analyzer failed on a captured frame
    AnalysisFailed,
    /// A narration run finished
    NarrationFinished {
        /// Why the run was started
        mode: NarrationMode,
        /// Scheduler epoch when the run started
        epoch: u64,
        /// Analysis, or `None` if capture or analysis failed
        result: Option<AnalysisResult>,
    },
    /// Stop everything and leave the run loop
    Shutdown,
}

/// Fixed phrases spoken by the orchestrator
#[derive(Debug, Clone)]
pub struct Phrases {
    /// Prompt before listening for a command
    pub listen_prompt: String,
    /// Prompt when the previous attempt was empty
    pub relisten_prompt: String,
    /// Help text
    pub help: String,
    /// Confirmation for `Stop`
    pub stopped: String,
    /// Confirmation for `Resume`
    pub resumed: String,
    /// Confirmation for a backend switch; `{backend}` is replaced
    pub switched: String,
    /// Apology for an unknown command
    pub unknown: String,
    /// Apology when the recognizer fails
    pub recognition_failed: String,
    /// Apology when re-listen attempts run out
    pub not_heard: String,
}

impl Default for Phrases {
    fn default() -> Self {
        Self {
            listen_prompt: "ご用件をどうぞ".to_string(),
            relisten_prompt: "もう一度お願いします".to_string(),
            help: "使えるコマンドは、ヘルプ、ストップ、詳しく、再開、それからジェミニ、チャットGPT、クロードへの切り替えです".to_string(),
            stopped: "自動案内を停止しました".to_string(),
            resumed: "自動案内を再開します".to_string(),
            switched: "{backend}に切り替えました".to_string(),
            unknown: "すみません、コマンドが分かりませんでした".to_string(),
            recognition_failed: "すみません、音声認識を使えませんでした".to_string(),
            not_heard: "聞き取れませんでした。案内に戻ります".to_string(),
        }
    }
}

/// Tunables for the orchestrator
#[derive(Debug, Clone)]
pub struct Settings {
    /// Periodic capture interval
    pub interval: Duration,
    /// Consecutive capture failures before suppression
    pub failure_threshold: u32,
    /// Recognizer locale (e.g. "ja-JP")
    pub locale: String,
    /// Minimum normalized length of a usable command transcript
    pub min_command_chars: usize,
    /// Empty transcripts tolerated before giving up on a command
    pub max_relisten_attempts: u32,
    /// Backend used when no preference is stored
    pub default_backend: BackendId,
    /// Analyzer prompts
    pub prompts: Prompts,
    /// Spoken phrases
    pub phrases: Phrases,
    /// Hazard words on top of the built-in vocabulary
    pub hazard_words: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            locale: "ja-JP".to_string(),
            min_command_chars: 2,
            max_relisten_attempts: 2,
            default_backend: BackendId::default(),
            prompts: Prompts::default(),
            phrases: Phrases::default(),
            hazard_words: Vec::new(),
        }
    }
}

/// External collaborators the orchestrator drives
#[derive(Clone)]
pub struct Collaborators {
    /// Camera or file source
    pub capture: Arc<dyn CaptureSource>,
    /// Vision backend client
    pub analyzer: Arc<dyn VisionAnalyzer>,
    /// Speech recognizer
    pub recognizer: Arc<dyn SpeechRecognizer>,
    /// Speech output
    pub speech: Arc<dyn SpeechOutput>,
    /// Preference persistence
    pub preferences: Arc<dyn PreferenceStore>,
}

/// Cloneable handle for posting user events into a running orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorHandle {
    events: mpsc::Sender<Event>,
}

impl OrchestratorHandle {
    async fn post(&self, event: Event) -> Result<()> {
        self.events
            .send(event)
            .await
            .map_err(|_| Error::Config("orchestrator is not running".to_string()))
    }

    /// Ask to listen for a voice command
    ///
    /// # Errors
    ///
    /// Returns error if the orchestrator has stopped
    pub async fn request_listen(&self) -> Result<()> {
        self.post(Event::ListenRequested).await
    }

    /// Ask for a quick description of the scene
    ///
    /// # Errors
    ///
    /// Returns error if the orchestrator has stopped
    pub async fn request_manual_analysis(&self) -> Result<()> {
        self.post(Event::ManualAnalysisRequested).await
    }

    /// Lift pause and failure suppression
    ///
    /// # Errors
    ///
    /// Returns error if the orchestrator has stopped
    pub async fn resume(&self) -> Result<()> {
        self.post(Event::ResumeRequested).await
    }

    /// Stop the run loop
    ///
    /// # Errors
    ///
    /// Returns error if the orchestrator has already stopped
    pub async fn shutdown(&self) -> Result<()> {
        self.post(Event::Shutdown).await
    }
}

/// The interaction state machine
pub struct Orchestrator {
    state: InteractionState,
    history: VecDeque<InteractionState>,
    settings: Settings,
    pipeline: NarrationPipeline,
    interpreter: CommandInterpreter,
    failures: FailurePolicy,
    scheduler: CaptureScheduler,
    recognizer: Arc<dyn SpeechRecognizer>,
    speech: Arc<dyn SpeechOutput>,
    preferences: Arc<dyn PreferenceStore>,
    backend: BackendId,
    paused: bool,
    session: u64,
    recognizer_active: bool,
    relisten_attempts: u32,
    narration_in_flight: bool,
    speech_task: Option<JoinHandle<()>>,
    events_tx: mpsc::Sender<Event>,
    events_rx: mpsc::Receiver<Event>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("state", &self.state)
            .field("backend", &self.backend)
            .field("paused", &self.paused)
            .field("failures", &self.failures)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Create an orchestrator in `Idle` with the scheduler not yet started
    ///
    /// The backend is read once from the preference store.
    #[must_use]
    pub fn new(settings: Settings, collaborators: Collaborators) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_SIZE);

        let classifier =
            UrgencyClassifier::default().with_extra_words(settings.hazard_words.iter());
        let pipeline = NarrationPipeline::new(
            collaborators.capture,
            collaborators.analyzer,
            settings.prompts.clone(),
            classifier,
        );

        let backend = collaborators
            .preferences
            .selected_backend()
            .unwrap_or(settings.default_backend);

        tracing::info!(
            %backend,
            interval_ms = settings.interval.as_millis(),
            "orchestrator created"
        );

        let mut history = VecDeque::with_capacity(HISTORY_LEN);
        history.push_back(InteractionState::Idle);

        Self {
            state: InteractionState::Idle,
            history,
            failures: FailurePolicy::new(settings.failure_threshold),
            scheduler: CaptureScheduler::new(settings.interval, events_tx.clone()),
            interpreter: CommandInterpreter::new(),
            pipeline,
            recognizer: collaborators.recognizer,
            speech: collaborators.speech,
            preferences: collaborators.preferences,
            backend,
            paused: false,
            session: 0,
            recognizer_active: false,
            relisten_attempts: 0,
            narration_in_flight: false,
            speech_task: None,
            events_tx,
            events_rx,
            settings,
        }
    }

    /// Handle for posting user events
    #[must_use]
    pub fn handle(&self) -> OrchestratorHandle {
        OrchestratorHandle {
            events: self.events_tx.clone(),
        }
    }

    /// Start narrating (arms the scheduler if allowed)
    pub fn start(&mut self) {
        self.sync_scheduler();
    }

    /// Process events until shutdown
    ///
    /// # Errors
    ///
    /// Currently infallible; failures inside operations are absorbed
    pub async fn run(mut self) -> Result<()> {
        self.start();
        tracing::info!(backend = %self.backend, "narration loop running");

        while let Some(event) = self.events_rx.recv().await {
            if !self.dispatch(event).await {
                break;
            }
        }

        self.shutdown().await;
        tracing::info!("narration loop stopped");
        Ok(())
    }

    /// Handle queued events until none arrive for `quiet`
    ///
    /// Returns the number of events handled. Stops early on shutdown.
    pub async fn settle(&mut self, quiet: Duration) -> usize {
        let mut handled = 0;
        while let Ok(Some(event)) = tokio::time::timeout(quiet, self.events_rx.recv()).await {
            handled += 1;
            if !self.dispatch(event).await {
                break;
            }
        }
        handled
    }

    /// Route one event to its operation; returns `false` on shutdown
    pub async fn dispatch(&mut self, event: Event) -> bool {
        let outcome = match event {
            Event::TimerFired { epoch } => self.on_timer_fired(epoch),
            Event::ListenRequested => self.request_listen().await,
            Event::ManualAnalysisRequested => self.request_manual_analysis().await,
            Event::ResumeRequested => {
                self.resume();
                Ok(())
            }
            Event::Recognition { session, result } => match result {
                Recognition::Partial(text) => {
                    self.on_recognition_result(session, &text, false).await
                }
                Recognition::Final(text) => self.on_recognition_result(session, &text, true).await,
                Recognition::Error(message) => self.on_recognition_error(session, &message).await,
            },
            Event::CaptureCompleted { outcome } => {
                self.on_capture_outcome(outcome);
                Ok(())
            }
            Event::AnalysisFailed => {
                self.on_analysis_failed();
                Ok(())
            }
            Event::NarrationFinished {
                mode,
                epoch,
                result,
            } => {
                self.on_narration_finished(mode, epoch, result).await;
                Ok(())
            }
            Event::Shutdown => {
                tracing::info!("shutdown requested");
                return false;
            }
        };

        match outcome {
            Err(e) if e.is_invalid_transition() => tracing::debug!(error = %e, "event dropped"),
            Err(e) => tracing::warn!(error = %e, "event handling failed"),
            Ok(()) => {}
        }
        true
    }

    /// Periodic tick: start an automatic narration run
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] unless idle, unsuppressed, and the
    /// tick belongs to the running scheduler
    pub fn on_timer_fired(&mut self, epoch: u64) -> Result<()> {
        if self.state != InteractionState::Idle
            || self.is_suppressed()
            || !self.scheduler.is_active()
            || epoch != self.scheduler.epoch()
        {
            return Err(self.invalid("timer_fired"));
        }

        if self.narration_busy() {
            tracing::debug!("previous narration still running, tick skipped");
            return Ok(());
        }

        self.spawn_narration(NarrationMode::Automatic);
        Ok(())
    }

    /// Begin a voice command session: `Idle → AwaitingCommand → Listening`
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] unless idle
    pub async fn request_listen(&mut self) -> Result<()> {
        if self.state != InteractionState::Idle {
            return Err(self.invalid("request_listen"));
        }

        self.transition(Trigger::ListenRequested)?;
        self.silence().await;
        self.relisten_attempts = 0;
        let prompt = self.settings.phrases.listen_prompt.clone();
        self.begin_listening(&prompt).await
    }

    /// Begin a one-off quick description: `Idle → ManualAnalysis`
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] unless idle
    pub async fn request_manual_analysis(&mut self) -> Result<()> {
        if self.state != InteractionState::Idle {
            return Err(self.invalid("request_manual_analysis"));
        }

        self.transition(Trigger::ManualRequested)?;
        self.silence().await;
        self.spawn_narration(NarrationMode::Manual);
        Ok(())
    }

    /// Recognizer result for `session`
    ///
    /// Partial results are only logged. A usable final result moves to
    /// `Executing` and runs the command; an empty or too-short one re-listens.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] unless listening on this session
    pub async fn on_recognition_result(
        &mut self,
        session: u64,
        text: &str,
        is_final: bool,
    ) -> Result<()> {
        if self.state != InteractionState::Listening || session != self.session {
            return Err(self.invalid("recognition_result"));
        }

        if !is_final {
            tracing::trace!(session, partial = %text, "partial transcript");
            return Ok(());
        }

        self.recognizer_active = false;

        if normalize(text).chars().count() >= self.settings.min_command_chars {
            tracing::info!(session, transcript = %text, "command received");
            self.relisten_attempts = 0;
            self.transition(Trigger::FinalTranscript)?;
            let intent = self.interpreter.interpret(text);
            return self.on_command_intent_resolved(intent).await;
        }

        tracing::debug!(session, transcript = %text, "transcript too short");
        self.transition(Trigger::EmptyTranscript)?;
        self.relisten_attempts += 1;

        if self.relisten_attempts > self.settings.max_relisten_attempts {
            let apology = self.settings.phrases.not_heard.clone();
            self.say(&apology).await;
            self.relisten_attempts = 0;
            return self.transition(Trigger::ListenAborted);
        }

        let prompt = self.settings.phrases.relisten_prompt.clone();
        self.begin_listening(&prompt).await
    }

    /// Recognizer side-channel error; treated like a failed session
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] unless a session is live
    pub async fn on_recognition_error(&mut self, session: u64, message: &str) -> Result<()> {
        if !matches!(
            self.state,
            InteractionState::AwaitingCommand | InteractionState::Listening
        ) || session != self.session
        {
            return Err(self.invalid("recognition_error"));
        }

        tracing::warn!(session, error = message, "speech recognition failed");
        self.recognizer_active = false;
        self.abort_listening().await
    }

    /// Run the effect of a command, then return to `Idle`
    ///
    /// `DescribeInDetail` starts a detailed narration and returns to `Idle`
    /// once it has been spoken. `Stop` leaves narration paused.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] unless executing
    pub async fn on_command_intent_resolved(&mut self, intent: CommandIntent) -> Result<()> {
        if self.state != InteractionState::Executing {
            return Err(self.invalid("command_intent"));
        }

        tracing::info!(?intent, "executing command");
        let phrases = self.settings.phrases.clone();

        match intent {
            CommandIntent::Help => self.say(&phrases.help).await,
            CommandIntent::Stop => {
                self.paused = true;
                self.say(&phrases.stopped).await;
            }
            CommandIntent::SwitchBackend(backend) => {
                self.backend = backend;
                if let Err(e) = self.preferences.set_selected_backend(backend) {
                    tracing::warn!(error = %e, %backend, "failed to persist backend selection");
                }
                let confirmation = phrases.switched.replace("{backend}", backend.spoken_name());
                self.say(&confirmation).await;
            }
            CommandIntent::DescribeInDetail => {
                self.spawn_narration(NarrationMode::Detailed);
                return Ok(());
            }
            CommandIntent::Resume => {
                self.failures.resume();
                self.say(&phrases.resumed).await;
            }
            CommandIntent::Unknown => self.say(&phrases.unknown).await,
        }

        self.finish_command(intent)
    }

    /// Record a capture attempt in the failure policy
    pub fn on_capture_outcome(&mut self, outcome: CaptureOutcome) {
        if self.failures.record(outcome) {
            self.sync_scheduler();
        }
    }

    /// Count an analyzer failure like a failed capture
    ///
    /// A backend that keeps rejecting frames suppresses narration the same
    /// way a dead camera does.
    pub fn on_analysis_failed(&mut self) {
        self.on_capture_outcome(CaptureOutcome::Failure);
    }

    /// Explicit resume: lift pause and failure suppression
    pub fn resume(&mut self) {
        tracing::info!(state = %self.state, "resume requested");
        self.failures.resume();
        self.paused = false;
        self.sync_scheduler();
    }

    /// Stop the scheduler, recognizer and speech
    pub async fn shutdown(&mut self) {
        self.scheduler.cancel();
        self.stop_recognizer().await;
        self.silence().await;
    }

    /// Current interaction state
    #[must_use]
    pub const fn state(&self) -> InteractionState {
        self.state
    }

    /// States entered so far, oldest first (bounded)
    #[must_use]
    pub fn history(&self) -> Vec<InteractionState> {
        self.history.iter().copied().collect()
    }

    /// Whether the periodic capture timer is armed
    #[must_use]
    pub fn scheduler_active(&self) -> bool {
        self.scheduler.is_active()
    }

    /// Whether periodic capture is held off (failures or user stop)
    #[must_use]
    pub const fn is_suppressed(&self) -> bool {
        self.paused || self.failures.is_suppressed()
    }

    /// Whether the user paused narration with `Stop`
    #[must_use]
    pub const fn is_paused(&self) -> bool {
        self.paused
    }

    /// Failure policy state
    #[must_use]
    pub const fn failures(&self) -> &FailurePolicy {
        &self.failures
    }

    /// Currently selected vision backend
    #[must_use]
    pub const fn backend(&self) -> BackendId {
        self.backend
    }

    /// Whether a recognizer session is live
    #[must_use]
    pub const fn recognizer_active(&self) -> bool {
        self.recognizer_active
    }

    /// Current recognizer session id
    #[must_use]
    pub const fn session(&self) -> u64 {
        self.session
    }

    /// Narration pipeline (for snapshot inspection)
    #[must_use]
    pub const fn pipeline(&self) -> &NarrationPipeline {
        &self.pipeline
    }

    async fn on_narration_finished(
        &mut self,
        mode: NarrationMode,
        epoch: u64,
        result: Option<AnalysisResult>,
    ) {
        if mode == NarrationMode::Automatic {
            self.narration_in_flight = false;
        }

        let Some(result) = result else {
            self.complete_request(mode);
            return;
        };

        let fresh = epoch == self.scheduler.epoch();
        match route(&result, mode, self.state, fresh) {
            Route::Preempt(text) => {
                let was_listening = self.recognizer_active;
                if was_listening {
                    tracing::info!(session = self.session, "urgent result, stopping recognizer");
                    self.stop_recognizer().await;
                }
                self.silence().await;
                tracing::info!(state = %self.state, text = %text, "speaking urgent narration");
                self.say(&text).await;

                if was_listening && self.state == InteractionState::Listening {
                    self.start_recognizer().await;
                }
            }
            Route::Speak(text) => {
                tracing::info!(?mode, text = %text, "speaking narration");
                if mode == NarrationMode::Automatic {
                    self.speak_in_background(text).await;
                } else {
                    self.say(&text).await;
                }
            }
            Route::Discard => {
                tracing::info!(
                    ?mode,
                    state = %self.state,
                    fresh,
                    text = %result.text,
                    "narration discarded"
                );
            }
        }

        self.complete_request(mode);
    }

    /// Return to `Idle` after a requested (manual or detailed) run
    fn complete_request(&mut self, mode: NarrationMode) {
        let outcome = match (mode, self.state) {
            (NarrationMode::Manual, InteractionState::ManualAnalysis) => {
                self.transition(Trigger::ManualFinished)
            }
            (NarrationMode::Detailed, InteractionState::Executing) => {
                self.finish_command(CommandIntent::DescribeInDetail)
            }
            _ => Ok(()),
        };

        if let Err(e) = outcome {
            tracing::warn!(error = %e, "failed to complete narration request");
        }
    }

    fn finish_command(&mut self, intent: CommandIntent) -> Result<()> {
        if intent != CommandIntent::Stop && self.paused {
            tracing::debug!(?intent, "user re-engaged, narration pause cleared");
            self.paused = false;
        }
        self.transition(Trigger::IntentResolved)
    }

    /// Speak a prompt from `AwaitingCommand`, then start listening
    async fn begin_listening(&mut self, prompt: &str) -> Result<()> {
        self.say(prompt).await;
        self.transition(Trigger::PromptSpoken)?;
        self.start_recognizer().await;
        Ok(())
    }

    async fn start_recognizer(&mut self) {
        self.session += 1;
        let sink = RecognitionSink::new(self.session, self.events_tx.clone());
        let locale = self.settings.locale.clone();

        if self.recognizer.listen(&locale, sink).await {
            self.recognizer_active = true;
            tracing::debug!(session = self.session, locale = %locale, "recognizer listening");
        } else {
            tracing::warn!(session = self.session, "recognizer did not start");
            if let Err(e) = self.abort_listening().await {
                tracing::warn!(error = %e, "failed to leave listening");
            }
        }
    }

    async fn stop_recognizer(&mut self) {
        if self.recognizer_active {
            self.recognizer.stop().await;
            self.recognizer_active = false;
            // Results still in flight from the stopped session are now stale
            self.session += 1;
        }
    }

    async fn abort_listening(&mut self) -> Result<()> {
        let apology = self.settings.phrases.recognition_failed.clone();
        self.say(&apology).await;
        self.relisten_attempts = 0;
        self.transition(Trigger::ListenAborted)
    }

    fn spawn_narration(&mut self, mode: NarrationMode) {
        if mode == NarrationMode::Automatic {
            self.narration_in_flight = true;
        }

        let pipeline = self.pipeline.clone();
        let events = self.events_tx.clone();
        let backend = self.backend;
        let epoch = self.scheduler.epoch();

        tokio::spawn(async move {
            let result = match pipeline.capture().await {
                // The run only counts as a success once the analyzer answered
                Ok(snapshot) => match pipeline.analyze(&snapshot, mode, backend).await {
                    Ok(result) => {
                        let _ = events
                            .send(Event::CaptureCompleted {
                                outcome: CaptureOutcome::Success,
                            })
                            .await;
                        Some(result)
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, %backend, ?mode, "scene analysis failed");
                        let _ = events.send(Event::AnalysisFailed).await;
                        None
                    }
                },
                Err(e) => {
                    tracing::warn!(error = %e, ?mode, "scene capture failed");
                    let _ = events
                        .send(Event::CaptureCompleted {
                            outcome: CaptureOutcome::Failure,
                        })
                        .await;
                    None
                }
            };

            let _ = events
                .send(Event::NarrationFinished {
                    mode,
                    epoch,
                    result,
                })
                .await;
        });
    }

    async fn say(&self, text: &str) {
        if let Err(e) = self.speech.speak(text).await {
            tracing::warn!(error = %e, "speech output failed");
        }
    }

    /// Speak automatic narration without blocking the loop
    ///
    /// Ticks are skipped until this utterance ends, and anything still
    /// sounding from an earlier one is cut first, so at most one narration
    /// plays at a time.
    async fn speak_in_background(&mut self, text: String) {
        self.silence().await;
        let speech = Arc::clone(&self.speech);
        self.speech_task = Some(tokio::spawn(async move {
            if let Err(e) = speech.speak(&text).await {
                tracing::warn!(error = %e, "speech output failed");
            }
        }));
    }

    /// Whether an automatic run is analyzing or still being spoken
    fn narration_busy(&self) -> bool {
        self.narration_in_flight || self.speech_task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Cut background narration speech short
    async fn silence(&mut self) {
        if let Some(task) = self.speech_task.take() {
            if !task.is_finished() {
                task.abort();
                self.speech.stop().await;
                tracing::debug!("narration speech interrupted");
            }
        }
    }

    /// The single place interaction state changes
    fn transition(&mut self, trigger: Trigger) -> Result<()> {
        let Some(next) = self.state.next(trigger) else {
            return Err(self.invalid("transition"));
        };

        tracing::debug!(from = %self.state, to = %next, ?trigger, "state transition");
        self.state = next;

        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(next);

        self.sync_scheduler();
        Ok(())
    }

    /// Keep the scheduler armed iff idle and not suppressed
    fn sync_scheduler(&mut self) {
        let should_run = self.state == InteractionState::Idle && !self.is_suppressed();
        if should_run {
            self.scheduler.start();
        } else {
            self.scheduler.cancel();
        }
    }

    fn invalid(&self, operation: &'static str) -> Error {
        Error::InvalidTransition {
            operation,
            state: self.state,
        }
    }
}
