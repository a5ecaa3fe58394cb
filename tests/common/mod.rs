//! Shared test utilities
//!
//! Recording mock collaborators. Speech and recognizer calls land in one
//! shared log so tests can check their interleaving. Speech can be given a
//! playback length; the recognizer counts every session started while some
//! utterance is still sounding.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use beacon_sight::{
    BackendId, CaptureSource, Collaborators, Error, InteractionState, Orchestrator,
    PreferenceStore, RecognitionSink, Result, Settings, SpeechOutput, SpeechRecognizer, Trigger,
    VisionAnalyzer,
};

/// How long `settle` waits for the queue to go quiet
pub const QUIET: Duration = Duration::from_millis(50);

const TRIGGERS: [Trigger; 8] = [
    Trigger::ListenRequested,
    Trigger::PromptSpoken,
    Trigger::FinalTranscript,
    Trigger::EmptyTranscript,
    Trigger::IntentResolved,
    Trigger::ListenAborted,
    Trigger::ManualRequested,
    Trigger::ManualFinished,
];

/// One audio-side action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioEvent {
    Speak(String),
    SpeechStopped,
    ListenStart(u64),
    ListenStop,
    /// The test answered a session
    Heard(String),
}

pub type AudioLog = Arc<Mutex<Vec<AudioEvent>>>;

/// Ids of utterances currently coming out of the speaker
pub type Sounding = Arc<Mutex<HashSet<u64>>>;

/// Speech output that records what it was asked to say
///
/// Like real playback, an utterance whose `speak` future is dropped keeps
/// sounding until `stop` is called.
pub struct MockSpeech {
    log: AudioLog,
    sounding: Sounding,
    next_id: AtomicU64,
    duration_ms: AtomicU64,
}

impl MockSpeech {
    /// How long each utterance plays (zero returns immediately)
    pub fn set_duration(&self, duration: Duration) {
        let millis = u64::try_from(duration.as_millis()).unwrap();
        self.duration_ms.store(millis, Ordering::SeqCst);
    }

    /// Utterances still sounding
    pub fn sounding(&self) -> usize {
        self.sounding.lock().unwrap().len()
    }
}

#[async_trait]
impl SpeechOutput for MockSpeech {
    async fn speak(&self, text: &str) -> Result<()> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.log
            .lock()
            .unwrap()
            .push(AudioEvent::Speak(text.to_string()));
        self.sounding.lock().unwrap().insert(id);

        let millis = self.duration_ms.load(Ordering::SeqCst);
        if millis > 0 {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }

        self.sounding.lock().unwrap().remove(&id);
        Ok(())
    }

    async fn stop(&self) {
        self.log.lock().unwrap().push(AudioEvent::SpeechStopped);
        self.sounding.lock().unwrap().clear();
    }
}

/// Recognizer that keeps each session's sink so tests can answer it
pub struct MockRecognizer {
    log: AudioLog,
    sounding: Sounding,
    sinks: Mutex<Vec<RecognitionSink>>,
    accept: AtomicBool,
    overlaps: AtomicUsize,
}

impl MockRecognizer {
    /// Make future `listen` calls fail to start
    pub fn refuse(&self) {
        self.accept.store(false, Ordering::SeqCst);
    }

    /// Sink of the most recent session
    pub fn last_sink(&self) -> RecognitionSink {
        self.sinks
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("recognizer was never started")
    }

    /// Sink of the first session ever started
    pub fn first_sink(&self) -> RecognitionSink {
        self.sinks
            .lock()
            .unwrap()
            .first()
            .cloned()
            .expect("recognizer was never started")
    }

    /// Number of sessions started
    pub fn sessions(&self) -> usize {
        self.sinks.lock().unwrap().len()
    }

    /// Sessions started while speech was still sounding
    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    /// Deliver a final transcript on the latest session
    pub async fn hear(&self, text: &str) {
        self.log
            .lock()
            .unwrap()
            .push(AudioEvent::Heard(text.to_string()));
        self.last_sink().final_text(text).await;
    }
}

#[async_trait]
impl SpeechRecognizer for MockRecognizer {
    async fn listen(&self, _locale: &str, sink: RecognitionSink) -> bool {
        if !self.accept.load(Ordering::SeqCst) {
            return false;
        }
        if !self.sounding.lock().unwrap().is_empty() {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        self.log
            .lock()
            .unwrap()
            .push(AudioEvent::ListenStart(sink.session()));
        self.sinks.lock().unwrap().push(sink);
        true
    }

    async fn stop(&self) {
        self.log.lock().unwrap().push(AudioEvent::ListenStop);
    }
}

/// Camera that returns a fixed frame or fails on demand
pub struct MockCapture {
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl MockCapture {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptureSource for MockCapture {
    async fn capture(&self) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            Err(Error::Capture("camera unavailable".to_string()))
        } else {
            Ok(vec![0xFF, 0xD8, 0xFF, 0xE0])
        }
    }
}

/// Analyzer replying from a script, then with a fixed default
pub struct MockAnalyzer {
    replies: Mutex<VecDeque<Result<String>>>,
    default: Mutex<String>,
    calls: Mutex<Vec<(String, BackendId)>>,
}

impl MockAnalyzer {
    /// Queue one reply
    pub fn push_reply(&self, reply: Result<String>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    /// Reply used once the script runs out
    pub fn set_default(&self, text: &str) {
        *self.default.lock().unwrap() = text.to_string();
    }

    /// (prompt, backend) of every call
    pub fn calls(&self) -> Vec<(String, BackendId)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl VisionAnalyzer for MockAnalyzer {
    async fn analyze(&self, _image: &[u8], prompt: &str, backend: BackendId) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((prompt.to_string(), backend));
        let scripted = self.replies.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(self.default.lock().unwrap().clone()))
    }
}

/// In-memory preference store
#[derive(Default)]
pub struct MemoryPrefs {
    backend: Mutex<Option<BackendId>>,
    writes: AtomicUsize,
}

impl MemoryPrefs {
    pub fn with_backend(backend: BackendId) -> Self {
        Self {
            backend: Mutex::new(Some(backend)),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl PreferenceStore for MemoryPrefs {
    fn selected_backend(&self) -> Option<BackendId> {
        *self.backend.lock().unwrap()
    }

    fn set_selected_backend(&self, backend: BackendId) -> Result<()> {
        *self.backend.lock().unwrap() = Some(backend);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Orchestrator wired to mocks
pub struct Harness {
    pub orchestrator: Orchestrator,
    pub log: AudioLog,
    pub speech: Arc<MockSpeech>,
    pub recognizer: Arc<MockRecognizer>,
    pub capture: Arc<MockCapture>,
    pub analyzer: Arc<MockAnalyzer>,
    pub prefs: Arc<MemoryPrefs>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(Settings::default(), MemoryPrefs::default())
    }

    pub fn with(settings: Settings, prefs: MemoryPrefs) -> Self {
        let log: AudioLog = Arc::new(Mutex::new(Vec::new()));
        let sounding: Sounding = Arc::new(Mutex::new(HashSet::new()));
        let speech = Arc::new(MockSpeech {
            log: Arc::clone(&log),
            sounding: Arc::clone(&sounding),
            next_id: AtomicU64::new(0),
            duration_ms: AtomicU64::new(0),
        });
        let recognizer = Arc::new(MockRecognizer {
            log: Arc::clone(&log),
            sounding,
            sinks: Mutex::new(Vec::new()),
            accept: AtomicBool::new(true),
            overlaps: AtomicUsize::new(0),
        });
        let capture = Arc::new(MockCapture {
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        });
        let analyzer = Arc::new(MockAnalyzer {
            replies: Mutex::new(VecDeque::new()),
            default: Mutex::new("前方OK".to_string()),
            calls: Mutex::new(Vec::new()),
        });
        let prefs = Arc::new(prefs);

        let orchestrator = Orchestrator::new(
            settings,
            Collaborators {
                capture: capture.clone(),
                analyzer: analyzer.clone(),
                recognizer: recognizer.clone(),
                speech: speech.clone(),
                preferences: prefs.clone(),
            },
        );

        Self {
            orchestrator,
            log,
            speech,
            recognizer,
            capture,
            analyzer,
            prefs,
        }
    }

    /// Handle queued events until quiet
    pub async fn settle(&mut self) -> usize {
        self.orchestrator.settle(QUIET).await
    }

    /// Let one scheduler interval elapse and handle what it produced
    pub async fn tick(&mut self) {
        tokio::time::sleep(Duration::from_secs(5) + Duration::from_millis(10)).await;
        self.settle().await;
    }

    /// Listen and answer with `text`, handling everything that follows
    pub async fn command(&mut self, text: &str) {
        self.orchestrator.request_listen().await.unwrap();
        assert_eq!(self.orchestrator.state(), InteractionState::Listening);
        self.recognizer.hear(text).await;
        self.settle().await;
    }

    /// Everything spoken so far
    pub fn spoken(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                AudioEvent::Speak(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn audio(&self) -> Vec<AudioEvent> {
        self.log.lock().unwrap().clone()
    }

    pub fn clear_audio(&self) {
        self.log.lock().unwrap().clear();
    }

    /// Every consecutive pair of recorded states is a legal transition
    pub fn assert_history_follows_table(&self) {
        let history = self.orchestrator.history();
        for pair in history.windows(2) {
            let (from, to) = (pair[0], pair[1]);
            assert!(
                TRIGGERS.iter().any(|t| from.next(*t) == Some(to)),
                "illegal transition {from} -> {to} in {history:?}"
            );
        }
    }

    /// Scheduler armed exactly when idle and not suppressed
    pub fn assert_scheduler_invariant(&self) {
        let o = &self.orchestrator;
        assert_eq!(
            o.scheduler_active(),
            o.state() == InteractionState::Idle && !o.is_suppressed(),
            "scheduler_active out of sync in {} (suppressed: {})",
            o.state(),
            o.is_suppressed()
        );
    }
}
