use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use beacon_sight::capture::FileCapture;
use beacon_sight::narration::UrgencyClassifier;
use beacon_sight::voice::{AudioCapture, Pcm, calculate_energy, decode_mp3, play_blocking};
use beacon_sight::{
    BackendId, Collaborators, Config, JsonPreferenceStore, NarrationMode, NarrationPipeline,
    Orchestrator, OrchestratorHandle, PreferenceStore, VisionAnalyzer,
};

/// Beacon Sight - spoken scene narration with voice commands
#[derive(Parser)]
#[command(name = "sight", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/omni/beacon-sight/config.toml)
    #[arg(short, long, env = "SIGHT_CONFIG")]
    config: Option<PathBuf>,

    /// Camera command writing one image to stdout
    #[arg(long)]
    capture_command: Option<String>,

    /// Narrate this image file instead of a camera
    #[arg(long)]
    image: Option<PathBuf>,

    /// Seconds between automatic descriptions
    #[arg(long)]
    interval: Option<u64>,

    /// Vision backend for this run (gemini, openai, claude)
    #[arg(long)]
    backend: Option<BackendId>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Describe one image and exit
    Describe {
        /// Image file
        image: PathBuf,
        /// Use the detailed prompt
        #[arg(long)]
        detailed: bool,
        /// Speak the description as well as printing it
        #[arg(long)]
        speak: bool,
    },
    /// List vision backends
    Backends,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "音声案内のテストです。聞こえていますか。")]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info",
        1 => "info,beacon_sight=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;

    if let Some(command) = cli.capture_command {
        config.capture.command = Some(command);
    }
    if let Some(image) = cli.image {
        config.capture.image = Some(image);
    }
    if let Some(secs) = cli.interval {
        anyhow::ensure!(secs > 0, "interval must be at least one second");
        config.narration.interval = Duration::from_secs(secs);
    }
    if let Some(backend) = cli.backend {
        config.narration.default_backend = backend;
    }
    tracing::debug!(?config, "loaded configuration");

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::Describe {
                image,
                detailed,
                speak,
            } => describe(&config, cli.backend, image, detailed, speak).await,
            Command::Backends => backends(&config),
            Command::TestMic { duration } => test_mic(duration).await,
            Command::TestSpeaker => test_speaker().await,
            Command::TestTts { text } => test_tts(&config, &text).await,
        };
    }

    narrate(config, cli.backend).await
}

/// Run the interactive narration loop
async fn narrate(config: Config, backend: Option<BackendId>) -> anyhow::Result<()> {
    let preferences = Arc::new(JsonPreferenceStore::open_or_default(config.preferences_path()));
    if let Some(backend) = backend {
        preferences.set_selected_backend(backend)?;
    }

    let collaborators = Collaborators {
        capture: config.capture_source()?,
        analyzer: Arc::new(config.vision_client()?),
        recognizer: config.recognizer(),
        speech: config.speaker(),
        preferences,
    };

    let orchestrator = Orchestrator::new(config.narration.clone(), collaborators);
    let handle = orchestrator.handle();

    tokio::spawn(forward_keys(handle.clone()));
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted");
            let _ = handle.shutdown().await;
        }
    });

    println!("Enter: voice command | d: describe now | r: resume | q: quit");
    orchestrator.run().await?;
    Ok(())
}

/// Map keyboard lines to orchestrator requests
async fn forward_keys(handle: OrchestratorHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let result = match line.trim() {
            "" => handle.request_listen().await,
            "d" => handle.request_manual_analysis().await,
            "r" => handle.resume().await,
            "q" => {
                let _ = handle.shutdown().await;
                return;
            }
            other => {
                println!("unknown key: {other}");
                Ok(())
            }
        };

        if result.is_err() {
            return;
        }
    }
}

/// Describe one image file
async fn describe(
    config: &Config,
    backend: Option<BackendId>,
    image: PathBuf,
    detailed: bool,
    speak: bool,
) -> anyhow::Result<()> {
    let analyzer: Arc<dyn VisionAnalyzer> = Arc::new(config.vision_client()?);
    let pipeline = NarrationPipeline::new(
        Arc::new(FileCapture::new(image)),
        analyzer,
        config.narration.prompts.clone(),
        UrgencyClassifier::default().with_extra_words(config.narration.hazard_words.iter()),
    );

    let backend = backend
        .or_else(|| {
            JsonPreferenceStore::open_or_default(config.preferences_path()).selected_backend()
        })
        .unwrap_or(config.narration.default_backend);
    let mode = if detailed {
        NarrationMode::Detailed
    } else {
        NarrationMode::Manual
    };

    let snapshot = pipeline.capture().await?;
    let result = pipeline.analyze(&snapshot, mode, backend).await?;
    let spoken = result.spoken_text();
    println!("{spoken}");

    if speak {
        config.speaker().speak(&spoken).await?;
    }
    Ok(())
}

/// List backends and which have keys
fn backends(config: &Config) -> anyhow::Result<()> {
    let selected = JsonPreferenceStore::open_or_default(config.preferences_path())
        .selected_backend()
        .unwrap_or(config.narration.default_backend);
    let available = config
        .vision_client()
        .map(|c| c.available_backends())
        .unwrap_or_default();

    for backend in BackendId::ALL {
        let marker = if backend == selected { "*" } else { " " };
        let key = if available.contains(&backend) {
            "ready"
        } else {
            "no API key"
        };
        println!("{marker} {:<8} {:<12} {key}", backend.as_str(), backend.spoken_name());
    }
    Ok(())
}

/// Test microphone input
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let (tx, mut rx) = tokio::sync::mpsc::channel(8);
    std::thread::spawn(move || {
        let mut capture = match AudioCapture::new() {
            Ok(c) => c,
            Err(e) => {
                let _ = tx.blocking_send(Err(e));
                return;
            }
        };
        if let Err(e) = capture.start() {
            let _ = tx.blocking_send(Err(e));
            return;
        }
        for _ in 0..duration {
            std::thread::sleep(Duration::from_secs(1));
            if tx.blocking_send(Ok(capture.take_buffer())).is_err() {
                break;
            }
        }
        capture.stop();
    });

    let mut second = 0;
    while let Some(samples) = rx.recv().await {
        let samples = samples?;
        second += 1;
        let energy = calculate_energy(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);
        println!("[{second:2}s] RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]");
    }

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check arecord -l and your input levels.");
    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let sample_rate = 24_000_u32;
    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..sample_rate * 2)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.3
        })
        .collect();

    play(Pcm {
        samples,
        sample_rate,
    })
    .await?;

    println!("If you heard the tone, your speakers are working!");
    Ok(())
}

/// Test TTS synthesis and playback
async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let tts = config.text_to_speech()?;
    let mp3 = tts.synthesize(text).await?;
    println!("Got {} bytes of audio from {:?}", mp3.len(), tts.provider());

    play(decode_mp3(&mp3)?).await?;
    println!("If you heard the speech, TTS is working!");
    Ok(())
}

async fn play(pcm: Pcm) -> anyhow::Result<()> {
    let stop = Arc::new(AtomicBool::new(false));
    tokio::task::spawn_blocking(move || play_blocking(pcm, &stop)).await??;
    Ok(())
}
