//! TOML configuration file
//!
//! `~/.config/omni/beacon-sight/config.toml` by default. Every field is
//! optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level file schema
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SightConfigFile {
    pub narration: NarrationFileConfig,
    pub prompts: PromptsFileConfig,
    pub voice: VoiceFileConfig,
    pub capture: CaptureFileConfig,
    pub vision: VisionFileConfig,
    pub api_keys: ApiKeysFileConfig,
    /// Data directory for preferences
    pub data_dir: Option<String>,
}

/// Narration loop tunables
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct NarrationFileConfig {
    pub interval_secs: Option<u64>,
    pub failure_threshold: Option<u32>,
    pub max_relisten_attempts: Option<u32>,
    pub min_command_chars: Option<usize>,
    /// Recognizer locale (e.g. "ja-JP")
    pub locale: Option<String>,
    /// Backend when nothing is persisted ("gemini", "openai", "claude")
    pub default_backend: Option<String>,
    /// Hazard words added to the built-in list
    pub hazard_words: Vec<String>,
}

/// Analyzer prompts and spoken phrases
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PromptsFileConfig {
    pub short: Option<String>,
    pub detailed: Option<String>,
    pub listen: Option<String>,
    pub help: Option<String>,
}

/// Speech in/out
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct VoiceFileConfig {
    /// "whisper" or "deepgram"
    pub stt_provider: Option<String>,
    pub stt_model: Option<String>,
    /// "openai" or "elevenlabs"
    pub tts_provider: Option<String>,
    pub tts_model: Option<String>,
    pub tts_voice: Option<String>,
    pub tts_speed: Option<f32>,
    pub listen_timeout_secs: Option<u64>,
}

/// Frame source
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CaptureFileConfig {
    /// Camera command line writing an image to stdout
    pub command: Option<String>,
    /// Image file read on every capture
    pub image: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// Vision model overrides
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct VisionFileConfig {
    pub gemini_model: Option<String>,
    pub openai_model: Option<String>,
    pub claude_model: Option<String>,
}

/// API keys
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ApiKeysFileConfig {
    pub gemini: Option<String>,
    pub openai: Option<String>,
    pub anthropic: Option<String>,
    pub elevenlabs: Option<String>,
    pub deepgram: Option<String>,
}

/// Load the overlay from `path`, or the standard path when `None`
///
/// Missing or unparsable files yield defaults (logged).
pub fn load_config_file(path: Option<&Path>) -> SightConfigFile {
    let Some(path) = path.map(Path::to_path_buf).or_else(config_file_path) else {
        return SightConfigFile::default();
    };

    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file");
        return SightConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                SightConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read config file");
            SightConfigFile::default()
        }
    }
}

/// Standard config path: `~/.config/omni/beacon-sight/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("omni")
            .join("beacon-sight")
            .join("config.toml")
    })
}
