//! Utterance segmentation
//!
//! Energy-based detector that cuts one spoken command out of a microphone
//! stream: wait for speech, accumulate, finish on trailing silence. Gives up
//! if nobody speaks within the listen window.

use super::capture::SAMPLE_RATE;

/// Minimum RMS energy considered speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum speech length for a usable command (0.3 s)
const MIN_SPEECH_SAMPLES: usize = 4800;

/// Trailing silence that ends an utterance (0.7 s)
const SILENCE_SAMPLES: usize = 11200;

/// Longest utterance kept (10 s)
const MAX_UTTERANCE_SAMPLES: usize = SAMPLE_RATE as usize * 10;

/// Where the detector is in the current utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtteranceState {
    /// No speech yet
    Waiting,
    /// Speech started, accumulating
    Speaking,
    /// Speech followed by enough silence
    Complete,
    /// Listen window passed without usable speech
    TimedOut,
}

/// Cuts a single utterance out of streamed samples
#[derive(Debug)]
pub struct UtteranceDetector {
    state: UtteranceState,
    buffer: Vec<f32>,
    speech_samples: usize,
    silence_counter: usize,
    waited: usize,
    max_wait: usize,
}

impl UtteranceDetector {
    /// Create a detector that times out after `max_wait_samples` without speech
    #[must_use]
    pub const fn new(max_wait_samples: usize) -> Self {
        Self {
            state: UtteranceState::Waiting,
            buffer: Vec::new(),
            speech_samples: 0,
            silence_counter: 0,
            waited: 0,
            max_wait: max_wait_samples,
        }
    }

    /// Feed samples and return the new state
    pub fn process(&mut self, samples: &[f32]) -> UtteranceState {
        if samples.is_empty() {
            return self.state;
        }

        let is_speech = calculate_energy(samples) > ENERGY_THRESHOLD;

        match self.state {
            UtteranceState::Waiting => {
                if is_speech {
                    self.state = UtteranceState::Speaking;
                    self.buffer.extend_from_slice(samples);
                    self.speech_samples = samples.len();
                    self.silence_counter = 0;
                    tracing::trace!("speech started");
                } else {
                    self.waited += samples.len();
                    if self.waited >= self.max_wait {
                        self.state = UtteranceState::TimedOut;
                    }
                }
            }
            UtteranceState::Speaking => {
                self.buffer.extend_from_slice(samples);

                if is_speech {
                    self.speech_samples += samples.len();
                    self.silence_counter = 0;
                } else {
                    self.silence_counter += samples.len();
                }

                if self.silence_counter > SILENCE_SAMPLES {
                    self.state = if self.speech_samples > MIN_SPEECH_SAMPLES {
                        UtteranceState::Complete
                    } else {
                        // A click or cough; keep waiting for real speech
                        self.restart_waiting();
                        UtteranceState::Waiting
                    };
                } else if self.buffer.len() >= MAX_UTTERANCE_SAMPLES {
                    self.state = UtteranceState::Complete;
                }
            }
            UtteranceState::Complete | UtteranceState::TimedOut => {}
        }

        self.state
    }

    fn restart_waiting(&mut self) {
        self.waited += self.buffer.len();
        self.buffer.clear();
        self.speech_samples = 0;
        self.silence_counter = 0;
        if self.waited >= self.max_wait {
            self.state = UtteranceState::TimedOut;
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> UtteranceState {
        self.state
    }

    /// Samples accumulated for the current utterance
    #[must_use]
    pub fn buffer(&self) -> &[f32] {
        &self.buffer
    }

    /// Take the utterance, leaving the buffer empty
    pub fn take_buffer(&mut self) -> Vec<f32> {
        std::mem::take(&mut self.buffer)
    }
}

/// RMS energy of a block of samples
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
