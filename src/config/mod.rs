//! Configuration
//!
//! Precedence: environment > TOML file > defaults. CLI flags are applied by
//! the binary on top of the loaded [`Config`].

pub mod file;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;

use crate::capture::{CommandCapture, FileCapture};
use crate::collab::{CaptureSource, SpeechOutput, SpeechRecognizer};
use crate::intent::BackendId;
use crate::narration::Prompts;
use crate::orchestrator::{Phrases, Settings};
use crate::vision::{VisionClient, VisionKeys, VisionModels};
use crate::voice::{
    CloudRecognizer, ConsoleSpeaker, DEFAULT_ELEVENLABS_MODEL, DEFAULT_LISTEN_TIMEOUT,
    DEFAULT_OPENAI_MODEL, DisabledRecognizer, SpeechToText, SttProvider, TextToSpeech,
    TtsProvider, TtsSpeaker,
};
use crate::{Error, Result};

use self::file::SightConfigFile;

/// Resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Orchestrator tunables, prompts and phrases
    pub narration: Settings,

    /// Where frames come from
    pub capture: CaptureConfig,

    /// Speech in/out
    pub voice: VoiceConfig,

    /// Vision model identifiers
    pub vision_models: VisionModels,

    /// API keys
    pub api_keys: ApiKeys,

    /// Directory holding `preferences.json`
    pub data_dir: PathBuf,
}

/// Frame source selection
#[derive(Debug, Clone, Default)]
pub struct CaptureConfig {
    /// Camera command line writing one image to stdout
    pub command: Option<String>,
    /// Image file read on every capture
    pub image: Option<PathBuf>,
    /// Per-capture timeout for the command
    pub timeout: Option<Duration>,
}

/// Voice configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    pub stt_provider: SttProvider,
    /// STT model (e.g. "whisper-1", "nova-2")
    pub stt_model: String,
    pub tts_provider: TtsProvider,
    /// TTS model; provider default when `None`
    pub tts_model: Option<String>,
    /// TTS voice (`OpenAI` voice name or ElevenLabs voice id)
    pub tts_voice: String,
    /// TTS speed multiplier (`OpenAI` only)
    pub tts_speed: f32,
    /// How long to wait for the user to start speaking
    pub listen_timeout: Duration,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            stt_provider: SttProvider::Whisper,
            stt_model: "whisper-1".to_string(),
            tts_provider: TtsProvider::OpenAi,
            tts_model: None,
            tts_voice: "alloy".to_string(),
            tts_speed: 1.0,
            listen_timeout: DEFAULT_LISTEN_TIMEOUT,
        }
    }
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    pub gemini: Option<SecretString>,
    pub openai: Option<SecretString>,
    pub anthropic: Option<SecretString>,
    pub elevenlabs: Option<SecretString>,
    pub deepgram: Option<SecretString>,
}

impl Config {
    /// Load from the TOML file at `path` (or the standard path) and env
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid (unknown provider or
    /// backend name)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let fc = file::load_config_file(path);
        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Build from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid
    pub fn from_sources(fc: SightConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Settings::default();

        let interval = env("SIGHT_INTERVAL_SECS")
            .and_then(|s| s.parse().ok())
            .or(fc.narration.interval_secs)
            .map_or(defaults.interval, Duration::from_secs);
        if interval.is_zero() {
            return Err(Error::Config("narration interval must be positive".to_string()));
        }

        let default_backend = fc
            .narration
            .default_backend
            .as_deref()
            .map(str::parse::<BackendId>)
            .transpose()?
            .unwrap_or(defaults.default_backend);

        let prompts = Prompts {
            short: fc.prompts.short.unwrap_or(defaults.prompts.short),
            detailed: fc.prompts.detailed.unwrap_or(defaults.prompts.detailed),
        };

        let phrases = Phrases {
            listen_prompt: fc.prompts.listen.unwrap_or(defaults.phrases.listen_prompt.clone()),
            help: fc.prompts.help.unwrap_or(defaults.phrases.help.clone()),
            ..defaults.phrases
        };

        let narration = Settings {
            interval,
            failure_threshold: fc
                .narration
                .failure_threshold
                .unwrap_or(defaults.failure_threshold),
            locale: env("SIGHT_LOCALE")
                .or(fc.narration.locale)
                .unwrap_or(defaults.locale),
            min_command_chars: fc
                .narration
                .min_command_chars
                .unwrap_or(defaults.min_command_chars),
            max_relisten_attempts: fc
                .narration
                .max_relisten_attempts
                .unwrap_or(defaults.max_relisten_attempts),
            default_backend,
            prompts,
            phrases,
            hazard_words: fc.narration.hazard_words,
        };

        let capture = CaptureConfig {
            command: env("SIGHT_CAPTURE_COMMAND").or(fc.capture.command),
            image: fc.capture.image.map(PathBuf::from),
            timeout: fc.capture.timeout_secs.map(Duration::from_secs),
        };

        let voice_defaults = VoiceConfig::default();
        let voice = VoiceConfig {
            stt_provider: fc
                .voice
                .stt_provider
                .as_deref()
                .map(str::parse)
                .transpose()?
                .unwrap_or(voice_defaults.stt_provider),
            stt_model: fc.voice.stt_model.unwrap_or(voice_defaults.stt_model),
            tts_provider: fc
                .voice
                .tts_provider
                .as_deref()
                .map(str::parse)
                .transpose()?
                .unwrap_or(voice_defaults.tts_provider),
            tts_model: fc.voice.tts_model,
            tts_voice: fc.voice.tts_voice.unwrap_or(voice_defaults.tts_voice),
            tts_speed: fc.voice.tts_speed.unwrap_or(voice_defaults.tts_speed),
            listen_timeout: fc
                .voice
                .listen_timeout_secs
                .map_or(voice_defaults.listen_timeout, Duration::from_secs),
        };

        let model_defaults = VisionModels::default();
        let vision_models = VisionModels {
            gemini: fc.vision.gemini_model.unwrap_or(model_defaults.gemini),
            openai: fc.vision.openai_model.unwrap_or(model_defaults.openai),
            claude: fc.vision.claude_model.unwrap_or(model_defaults.claude),
        };

        let secret = |var: &str, from_file: Option<String>| {
            env(var).or(from_file).map(SecretString::from)
        };
        let api_keys = ApiKeys {
            gemini: secret("GEMINI_API_KEY", fc.api_keys.gemini),
            openai: secret("OPENAI_API_KEY", fc.api_keys.openai),
            anthropic: secret("ANTHROPIC_API_KEY", fc.api_keys.anthropic),
            elevenlabs: secret("ELEVENLABS_API_KEY", fc.api_keys.elevenlabs),
            deepgram: secret("DEEPGRAM_API_KEY", fc.api_keys.deepgram),
        };

        let data_dir = fc.data_dir.map_or_else(default_data_dir, PathBuf::from);

        Ok(Self {
            narration,
            capture,
            voice,
            vision_models,
            api_keys,
            data_dir,
        })
    }

    /// Path of the persisted preferences file
    #[must_use]
    pub fn preferences_path(&self) -> PathBuf {
        self.data_dir.join("preferences.json")
    }

    /// Vision keys for the configured backends
    #[must_use]
    pub fn vision_keys(&self) -> VisionKeys {
        VisionKeys {
            gemini: self.api_keys.gemini.clone(),
            openai: self.api_keys.openai.clone(),
            anthropic: self.api_keys.anthropic.clone(),
        }
    }

    /// Build the vision client
    ///
    /// # Errors
    ///
    /// Returns error if no backend has a key
    pub fn vision_client(&self) -> Result<VisionClient> {
        VisionClient::new(self.vision_keys(), self.vision_models.clone())
    }

    /// Build the frame source; an image file wins over a command
    ///
    /// # Errors
    ///
    /// Returns error if neither is configured or the command is empty
    pub fn capture_source(&self) -> Result<Arc<dyn CaptureSource>> {
        if let Some(image) = &self.capture.image {
            return Ok(Arc::new(FileCapture::new(image.clone())));
        }

        let command = self.capture.command.as_deref().ok_or_else(|| {
            Error::Config(
                "no capture source: set capture.command, capture.image or SIGHT_CAPTURE_COMMAND"
                    .to_string(),
            )
        })?;

        let mut capture = CommandCapture::from_command_line(command)?;
        if let Some(timeout) = self.capture.timeout {
            capture = capture.with_timeout(timeout);
        }
        Ok(Arc::new(capture))
    }

    /// Build the STT client
    ///
    /// # Errors
    ///
    /// Returns error if the provider's key is missing
    pub fn speech_to_text(&self) -> Result<SpeechToText> {
        let key = match self.voice.stt_provider {
            SttProvider::Whisper => self.api_keys.openai.clone(),
            SttProvider::Deepgram => self.api_keys.deepgram.clone(),
        };
        SpeechToText::new(
            self.voice.stt_provider,
            key.unwrap_or_else(missing_key),
            self.voice.stt_model.clone(),
        )
    }

    /// Build the TTS client
    ///
    /// # Errors
    ///
    /// Returns error if the provider's key is missing
    pub fn text_to_speech(&self) -> Result<TextToSpeech> {
        match self.voice.tts_provider {
            TtsProvider::OpenAi => TextToSpeech::openai(
                self.api_keys.openai.clone().unwrap_or_else(missing_key),
                self.voice.tts_voice.clone(),
                self.voice.tts_speed,
                self.voice
                    .tts_model
                    .clone()
                    .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            ),
            TtsProvider::ElevenLabs => TextToSpeech::elevenlabs(
                self.api_keys.elevenlabs.clone().unwrap_or_else(missing_key),
                self.voice.tts_voice.clone(),
                self.voice
                    .tts_model
                    .clone()
                    .unwrap_or_else(|| DEFAULT_ELEVENLABS_MODEL.to_string()),
            ),
        }
    }

    /// Recognizer, or a disabled one when STT is not configured
    #[must_use]
    pub fn recognizer(&self) -> Arc<dyn SpeechRecognizer> {
        match self.speech_to_text() {
            Ok(stt) => Arc::new(CloudRecognizer::new(stt, self.voice.listen_timeout)),
            Err(e) => {
                tracing::warn!(error = %e, "voice commands disabled");
                Arc::new(DisabledRecognizer)
            }
        }
    }

    /// Speaker, or console output when TTS is not configured
    #[must_use]
    pub fn speaker(&self) -> Arc<dyn SpeechOutput> {
        match self.text_to_speech() {
            Ok(tts) => Arc::new(TtsSpeaker::new(tts)),
            Err(e) => {
                tracing::warn!(error = %e, "speech output falls back to console");
                Arc::new(ConsoleSpeaker)
            }
        }
    }
}

/// Empty key; the client constructors reject it with a config error
fn missing_key() -> SecretString {
    SecretString::from(String::new())
}

/// Default data directory: `~/.local/share/omni/beacon-sight`
fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".local/share/omni/beacon-sight"),
        |d| d.data_dir().join("omni").join("beacon-sight"),
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn defaults_without_sources() {
        let config = Config::from_sources(SightConfigFile::default(), no_env).unwrap();

        assert_eq!(config.narration.interval, Duration::from_secs(5));
        assert_eq!(config.narration.failure_threshold, 3);
        assert_eq!(config.narration.locale, "ja-JP");
        assert_eq!(config.narration.default_backend, BackendId::Gemini);
        assert_eq!(config.voice.stt_provider, SttProvider::Whisper);
        assert!(config.api_keys.gemini.is_none());
        assert!(config.preferences_path().ends_with("preferences.json"));
    }

    #[test]
    fn env_overrides_file() {
        let fc: SightConfigFile = toml::from_str(
            r#"
            [narration]
            interval_secs = 8
            locale = "en-US"
            default_backend = "claude"

            [api_keys]
            gemini = "from-file"
            "#,
        )
        .unwrap();

        let env: HashMap<&str, &str> = [
            ("SIGHT_INTERVAL_SECS", "3"),
            ("GEMINI_API_KEY", "from-env"),
        ]
        .into_iter()
        .collect();

        let config = Config::from_sources(fc, |k| env.get(k).map(ToString::to_string)).unwrap();

        assert_eq!(config.narration.interval, Duration::from_secs(3));
        assert_eq!(config.narration.locale, "en-US");
        assert_eq!(config.narration.default_backend, BackendId::Claude);
        assert_eq!(
            config.api_keys.gemini.as_ref().map(ExposeSecret::expose_secret),
            Some("from-env")
        );
    }

    #[test]
    fn invalid_values_rejected() {
        let fc: SightConfigFile =
            toml::from_str("[narration]\ndefault_backend = \"bard\"").unwrap();
        assert!(Config::from_sources(fc, no_env).is_err());

        let fc: SightConfigFile = toml::from_str("[narration]\ninterval_secs = 0").unwrap();
        assert!(Config::from_sources(fc, no_env).is_err());
    }

    #[test]
    fn image_capture_wins_over_command() {
        let fc: SightConfigFile = toml::from_str(
            "[capture]\ncommand = \"rpicam-still -o -\"\nimage = \"/tmp/frame.jpg\"",
        )
        .unwrap();
        let config = Config::from_sources(fc, no_env).unwrap();
        assert!(config.capture_source().is_ok());

        let config = Config::from_sources(SightConfigFile::default(), no_env).unwrap();
        assert!(config.capture_source().is_err());
    }

    #[test]
    fn debug_redacts_keys() {
        let keys = ApiKeys {
            openai: Some(SecretString::from("sk-secret".to_string())),
            ..ApiKeys::default()
        };
        let printed = format!("{keys:?}");
        assert!(!printed.contains("sk-secret"));
        assert!(printed.contains("REDACTED"));
    }

    #[test]
    fn missing_tts_key_is_config_error() {
        let config = Config::from_sources(SightConfigFile::default(), no_env).unwrap();
        assert!(matches!(config.text_to_speech(), Err(Error::Config(_))));
    }
}
