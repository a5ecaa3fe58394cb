//! Speech output adapters

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::playback::{decode_mp3, play_blocking};
use super::tts::TextToSpeech;
use crate::collab::SpeechOutput;
use crate::{Error, Result};

/// Stop flags of every utterance that may still be sounding
///
/// A flag stays registered until its playback returns, so an utterance whose
/// caller was cancelled can still be silenced by [`Self::stop_all`].
#[derive(Debug, Default)]
pub struct ActivePlayback {
    flags: Mutex<Vec<Arc<AtomicBool>>>,
}

impl ActivePlayback {
    /// Register a new utterance and return its stop flag
    pub fn begin(&self) -> Arc<AtomicBool> {
        let flag = Arc::new(AtomicBool::new(false));
        if let Ok(mut flags) = self.flags.lock() {
            flags.push(Arc::clone(&flag));
        }
        flag
    }

    /// Forget an utterance whose playback has returned
    pub fn finish(&self, flag: &Arc<AtomicBool>) {
        if let Ok(mut flags) = self.flags.lock() {
            flags.retain(|f| !Arc::ptr_eq(f, flag));
        }
    }

    /// Set every registered stop flag
    pub fn stop_all(&self) {
        if let Ok(mut flags) = self.flags.lock() {
            for flag in flags.drain(..) {
                flag.store(true, Ordering::SeqCst);
            }
        }
    }

    /// Utterances not yet finished
    #[must_use]
    pub fn len(&self) -> usize {
        self.flags.lock().map_or(0, |f| f.len())
    }

    /// Whether nothing is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Synthesizes with a cloud TTS provider and plays on the speakers
pub struct TtsSpeaker {
    tts: TextToSpeech,
    active: Arc<ActivePlayback>,
}

impl TtsSpeaker {
    #[must_use]
    pub fn new(tts: TextToSpeech) -> Self {
        Self {
            tts,
            active: Arc::new(ActivePlayback::default()),
        }
    }
}

#[async_trait]
impl SpeechOutput for TtsSpeaker {
    async fn speak(&self, text: &str) -> Result<()> {
        let stop = self.active.begin();
        tracing::info!(text, "speaking");

        let mp3 = match self.tts.synthesize(text).await {
            Ok(mp3) => mp3,
            Err(e) => {
                self.active.finish(&stop);
                return Err(e);
            }
        };
        if stop.load(Ordering::SeqCst) {
            return Ok(());
        }

        let pcm = match decode_mp3(&mp3) {
            Ok(pcm) => pcm,
            Err(e) => {
                self.active.finish(&stop);
                return Err(e);
            }
        };

        // The blocking task unregisters itself, even if this future is dropped
        let active = Arc::clone(&self.active);
        tokio::task::spawn_blocking(move || {
            let result = play_blocking(pcm, &stop);
            active.finish(&stop);
            result
        })
        .await
        .map_err(|e| Error::Audio(format!("playback task failed: {e}")))?
    }

    async fn stop(&self) {
        self.active.stop_all();
    }
}

/// Writes utterances to stdout; used when no TTS provider is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSpeaker;

#[async_trait]
impl SpeechOutput for ConsoleSpeaker {
    async fn speak(&self, text: &str) -> Result<()> {
        println!("🔊 {text}");
        Ok(())
    }

    async fn stop(&self) {}
}
