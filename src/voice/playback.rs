//! Audio playback to speakers
//!
//! Playback blocks the calling thread; run it under `spawn_blocking`. The
//! shared stop flag cuts an utterance short at the next audio callback.

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use crate::{Error, Result};

/// Input frames per resampler call
const RESAMPLE_CHUNK: usize = 1024;

const RESAMPLE_SUB_CHUNKS: usize = 2;

/// Decoded mono PCM
#[derive(Debug, Clone, Default)]
pub struct Pcm {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Pcm {
    /// Playback length
    #[must_use]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(self.samples.len() as u64 * 1000 / u64::from(self.sample_rate))
    }

    /// Resample to `rate` with a band-limited FFT resampler
    ///
    /// # Errors
    ///
    /// Returns error if the resampler rejects the rates
    #[allow(clippy::cast_possible_truncation)]
    pub fn resample(self, rate: u32) -> Result<Self> {
        use rubato::{FftFixedIn, Resampler};

        let degenerate = self.sample_rate == 0 || rate == 0 || self.samples.is_empty();
        if degenerate || rate == self.sample_rate {
            return Ok(self);
        }

        let mut resampler = FftFixedIn::<f64>::new(
            self.sample_rate as usize,
            rate as usize,
            RESAMPLE_CHUNK,
            RESAMPLE_SUB_CHUNKS,
            1,
        )
        .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

        let expected =
            (self.samples.len() as u64 * u64::from(rate) / u64::from(self.sample_rate)) as usize;
        let delay = resampler.output_delay();
        let chunk_len = resampler.input_frames_next();

        let input: Vec<f64> = self.samples.iter().map(|&s| f64::from(s)).collect();
        let mut output = Vec::with_capacity(expected + delay + chunk_len);
        let mut pos = 0;

        // Zero-pad past the end so the filter delay drains
        while output.len() < expected + delay {
            let mut chunk = vec![0.0; chunk_len];
            if pos < input.len() {
                let end = (pos + chunk_len).min(input.len());
                chunk[..end - pos].copy_from_slice(&input[pos..end]);
            }
            pos += chunk_len;

            let frames = resampler
                .process(&[chunk], None)
                .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
            output.extend_from_slice(&frames[0]);
        }

        Ok(Self {
            samples: output
                .into_iter()
                .skip(delay)
                .take(expected)
                .map(|s| s as f32)
                .collect(),
            sample_rate: rate,
        })
    }
}

/// Play `pcm` on the default output device until done or `stop` is set
///
/// # Errors
///
/// Returns error if no output device is available or the stream fails
pub fn play_blocking(pcm: Pcm, stop: &Arc<AtomicBool>) -> Result<()> {
    if pcm.samples.is_empty() || stop.load(Ordering::SeqCst) {
        return Ok(());
    }

    let device = cpal::default_host()
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    let config = output_config(&device, pcm.sample_rate)?;
    let pcm = pcm.resample(config.sample_rate.0)?;
    let channels = usize::from(config.channels.max(1));
    let total = pcm.samples.len();
    let expected = pcm.duration();

    let samples: Arc<[f32]> = pcm.samples.into();
    let position = Arc::new(AtomicUsize::new(0));

    let stream = {
        let samples = Arc::clone(&samples);
        let position = Arc::clone(&position);
        let stop = Arc::clone(stop);
        device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let halted = stop.load(Ordering::Relaxed);
                    let mut pos = position.load(Ordering::Relaxed);
                    for frame in data.chunks_mut(channels) {
                        let sample = if halted {
                            0.0
                        } else {
                            samples.get(pos).copied().unwrap_or(0.0)
                        };
                        frame.fill(sample);
                        if pos < samples.len() {
                            pos += 1;
                        }
                    }
                    position.store(pos, Ordering::Relaxed);
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?
    };

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    let deadline = Instant::now() + expected + Duration::from_millis(500);
    while position.load(Ordering::Relaxed) < total {
        if stop.load(Ordering::SeqCst) {
            tracing::debug!("playback interrupted");
            return Ok(());
        }
        if Instant::now() > deadline {
            tracing::warn!("playback did not drain before deadline");
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    // Let the device flush its last buffer
    std::thread::sleep(Duration::from_millis(100));
    drop(stream);

    tracing::debug!(samples = total, "playback complete");
    Ok(())
}

fn output_config(device: &cpal::Device, rate: u32) -> Result<StreamConfig> {
    let matching = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .filter(|c| {
            c.min_sample_rate() <= SampleRate(rate) && c.max_sample_rate() >= SampleRate(rate)
        })
        .min_by_key(cpal::SupportedStreamConfigRange::channels);

    if let Some(range) = matching {
        return Ok(range.with_sample_rate(SampleRate(rate)).config());
    }

    device
        .default_output_config()
        .map(|c| c.config())
        .map_err(|e| Error::Audio(e.to_string()))
}

/// Decode MP3 bytes to mono PCM
///
/// # Errors
///
/// Returns error if the data is not valid MP3
pub fn decode_mp3(mp3_data: &[u8]) -> Result<Pcm> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut pcm = Pcm::default();

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                #[allow(clippy::cast_sign_loss)]
                {
                    pcm.sample_rate = frame.sample_rate as u32;
                }
                let channels = frame.channels.max(1);
                #[allow(clippy::cast_precision_loss)]
                pcm.samples.extend(frame.data.chunks(channels).map(|chunk| {
                    chunk.iter().map(|&s| f32::from(s) / 32768.0).sum::<f32>()
                        / chunk.len() as f32
                }));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    Ok(pcm)
}
