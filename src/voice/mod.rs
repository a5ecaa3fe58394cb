//! Voice I/O
//!
//! Microphone capture, utterance detection, cloud STT/TTS and speaker
//! playback, wrapped as the `SpeechRecognizer` and `SpeechOutput` adapters.

mod capture;
mod playback;
mod recognizer;
mod speaker;
mod stt;
mod tts;
mod utterance;

pub use capture::{AudioCapture, SAMPLE_RATE, samples_to_wav};
pub use playback::{Pcm, decode_mp3, play_blocking};
pub use recognizer::{CloudRecognizer, DEFAULT_LISTEN_TIMEOUT, DisabledRecognizer};
pub use speaker::{ActivePlayback, ConsoleSpeaker, TtsSpeaker};
pub use stt::{SpeechToText, SttProvider, language_code};
pub use tts::{DEFAULT_ELEVENLABS_MODEL, DEFAULT_OPENAI_MODEL, TextToSpeech, TtsProvider};
pub use utterance::{UtteranceDetector, UtteranceState, calculate_energy};
