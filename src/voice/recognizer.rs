//! Microphone speech recognizer
//!
//! One session = one utterance. The microphone runs on a dedicated thread
//! (the `cpal` stream cannot cross threads); the utterance is handed back
//! to the runtime for cloud transcription.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::capture::{AudioCapture, SAMPLE_RATE, samples_to_wav};
use super::stt::SpeechToText;
use super::utterance::{UtteranceDetector, UtteranceState};
use crate::collab::{RecognitionSink, SpeechRecognizer};

/// Default time to wait for the user to start speaking
pub const DEFAULT_LISTEN_TIMEOUT: Duration = Duration::from_secs(6);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

enum Utterance {
    Speech(Vec<f32>),
    Silence,
    Failed(String),
}

/// Records one utterance and transcribes it with a cloud STT provider
pub struct CloudRecognizer {
    stt: Arc<SpeechToText>,
    listen_timeout: Duration,
    current: Mutex<Option<Arc<AtomicBool>>>,
}

impl CloudRecognizer {
    /// Create a recognizer over `stt`
    #[must_use]
    pub fn new(stt: SpeechToText, listen_timeout: Duration) -> Self {
        Self {
            stt: Arc::new(stt),
            listen_timeout,
            current: Mutex::new(None),
        }
    }

    fn replace_session(&self, flag: Option<Arc<AtomicBool>>) {
        if let Ok(mut current) = self.current.lock() {
            if let Some(previous) = current.take() {
                previous.store(true, Ordering::SeqCst);
            }
            *current = flag;
        }
    }
}

#[async_trait]
impl SpeechRecognizer for CloudRecognizer {
    async fn listen(&self, locale: &str, sink: RecognitionSink) -> bool {
        let stopped = Arc::new(AtomicBool::new(false));
        self.replace_session(Some(Arc::clone(&stopped)));

        let (ready_tx, ready_rx) = oneshot::channel();
        let (utterance_tx, utterance_rx) = oneshot::channel();
        let max_wait =
            usize::try_from(self.listen_timeout.as_millis() * u128::from(SAMPLE_RATE) / 1000)
                .unwrap_or(usize::MAX);

        let flag = Arc::clone(&stopped);
        let spawned = std::thread::Builder::new()
            .name("sight-mic".to_string())
            .spawn(move || record_utterance(&flag, max_wait, ready_tx, utterance_tx));
        if let Err(e) = spawned {
            tracing::error!(error = %e, "failed to spawn microphone thread");
            return false;
        }

        if !ready_rx.await.unwrap_or(false) {
            return false;
        }

        let stt = Arc::clone(&self.stt);
        let locale = locale.to_string();
        tokio::spawn(async move {
            // A dropped sender means the session was stopped
            let Ok(utterance) = utterance_rx.await else {
                return;
            };

            match utterance {
                Utterance::Silence => sink.final_text("").await,
                Utterance::Failed(message) => sink.error(message).await,
                Utterance::Speech(samples) => {
                    let transcript = match samples_to_wav(&samples, SAMPLE_RATE) {
                        Ok(wav) => stt.transcribe(&wav, &locale).await,
                        Err(e) => Err(e),
                    };
                    if stopped.load(Ordering::SeqCst) {
                        return;
                    }
                    match transcript {
                        Ok(text) => sink.final_text(text.trim()).await,
                        Err(e) => sink.error(e.to_string()).await,
                    }
                }
            }
        });

        true
    }

    async fn stop(&self) {
        self.replace_session(None);
    }
}

fn record_utterance(
    stopped: &AtomicBool,
    max_wait: usize,
    ready: oneshot::Sender<bool>,
    done: oneshot::Sender<Utterance>,
) {
    let mut capture = match open_microphone() {
        Ok(capture) => capture,
        Err(e) => {
            tracing::warn!(error = %e, "microphone unavailable");
            let _ = ready.send(false);
            return;
        }
    };
    let _ = ready.send(true);

    let mut detector = UtteranceDetector::new(max_wait);
    loop {
        std::thread::sleep(POLL_INTERVAL);

        if stopped.load(Ordering::SeqCst) {
            capture.stop();
            tracing::debug!("listening stopped");
            return;
        }

        if !capture.is_capturing() {
            let _ = done.send(Utterance::Failed("microphone stream closed".to_string()));
            return;
        }

        match detector.process(&capture.take_buffer()) {
            UtteranceState::Waiting | UtteranceState::Speaking => {}
            UtteranceState::Complete => {
                capture.stop();
                let _ = done.send(Utterance::Speech(detector.take_buffer()));
                return;
            }
            UtteranceState::TimedOut => {
                capture.stop();
                tracing::debug!("no speech before listen timeout");
                let _ = done.send(Utterance::Silence);
                return;
            }
        }
    }
}

fn open_microphone() -> crate::Result<AudioCapture> {
    let mut capture = AudioCapture::new()?;
    capture.start()?;
    Ok(capture)
}

/// Recognizer used when no STT provider is configured; never starts
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledRecognizer;

#[async_trait]
impl SpeechRecognizer for DisabledRecognizer {
    async fn listen(&self, _locale: &str, _sink: RecognitionSink) -> bool {
        tracing::warn!("speech recognition is not configured");
        false
    }

    async fn stop(&self) {}
}
