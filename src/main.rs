//! voxbind - Voice control bridge for games
//!
//! Reads host messages on stdin, writes recognized commands to stdout.
//! Logs go to stderr.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use voxbind::audio::cue::FeedbackCue;
use voxbind::audio::AudioInput;
use voxbind::backend::{BackendAdapter, Backends, EventSender, SubprocessAdapter};
use voxbind::config::{Config, EngineKind};
use voxbind::grammar::GrammarCompiler;
use voxbind::host::{self, Host};
use voxbind::session::{RecognitionSession, SessionSettings};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Recognizer backend, overriding the config
    #[arg(short, long, value_enum)]
    engine: Option<EngineKind>,

    /// Audio input device name (substring match)
    #[arg(short, long)]
    device: Option<String>,

    /// List audio input devices and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(engine) = args.engine {
        config.engine = engine;
    }
    if args.device.is_some() {
        config.input_device = args.device.clone();
    }

    // Setup logging; stdout belongs to the host
    let level = if args.verbose { "debug" } else { config.log_level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("🎮 voxbind v{} starting...", env!("CARGO_PKG_VERSION"));

    if args.list_devices {
        return list_devices();
    }

    let compiler = GrammarCompiler::from_config(&config)?;
    let input = audio_input(&config);

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let primary = build_backend(config.engine, &config, input.clone(), events_tx.clone())?;
    let fallback = match config.fallback_engine {
        Some(kind) if kind != config.engine => {
            match build_backend(kind, &config, input.clone(), events_tx) {
                Ok(backend) => Some(backend),
                Err(e) => {
                    warn!("⚠️ Fallback recognizer unavailable: {}", e);
                    None
                }
            }
        }
        _ => None,
    };

    let settings = SessionSettings::from_config(&config, &compiler);
    let (session, recognitions, task) =
        RecognitionSession::new(settings, Backends::new(primary, fallback), events_rx, input)
            .with_cue(feedback_cue(&config))
            .with_poll_interval(config.device_poll_interval())
            .spawn();

    let host = Host::new(&config, compiler, session.clone());
    let stdin = BufReader::new(tokio::io::stdin());

    info!("✅ voxbind ready");
    let result = tokio::select! {
        result = host::run(host, stdin, recognitions, tokio::io::stdout()) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            Ok(())
        }
    };

    session.stop();
    task.await?;
    result?;

    info!("👋 voxbind stopped");
    Ok(())
}

fn build_backend(
    kind: EngineKind,
    config: &Config,
    input: Arc<dyn AudioInput>,
    events: EventSender,
) -> Result<Box<dyn BackendAdapter>> {
    match kind {
        EngineKind::Voice2json => {
            let adapter = SubprocessAdapter::new(
                config.voice2json.clone(),
                config.voice2json_profile(),
                input,
                events,
            )
            .with_signal_logging(config.log_audio_signal_issues);
            Ok(Box::new(adapter))
        }
        EngineKind::Local => local_backend(config, input, events),
    }
}

#[cfg(feature = "vosk")]
fn local_backend(
    config: &Config,
    input: Arc<dyn AudioInput>,
    events: EventSender,
) -> Result<Box<dyn BackendAdapter>> {
    use voxbind::backend::vosk::VoskEngine;
    use voxbind::backend::LocalAdapter;
    use voxbind::grammar::matcher::Matcher;

    let engine = VoskEngine::new(std::path::Path::new(&config.vosk_model_path))?;
    let adapter = LocalAdapter::new(Box::new(engine), input, events, Matcher::from_config(config))
        .with_signal_logging(config.log_audio_signal_issues);
    Ok(Box::new(adapter))
}

#[cfg(not(feature = "vosk"))]
fn local_backend(
    _config: &Config,
    _input: Arc<dyn AudioInput>,
    _events: EventSender,
) -> Result<Box<dyn BackendAdapter>> {
    anyhow::bail!("local engine requires building with the `vosk` feature")
}

#[cfg(feature = "native-audio")]
fn audio_input(config: &Config) -> Arc<dyn AudioInput> {
    Arc::new(voxbind::audio::capture::CpalInput::new(config.input_device.clone()))
}

#[cfg(not(feature = "native-audio"))]
fn audio_input(_config: &Config) -> Arc<dyn AudioInput> {
    warn!("Built without `native-audio`, no capture device available");
    Arc::new(voxbind::audio::ChannelInput::new(None))
}

#[cfg(feature = "native-audio")]
fn feedback_cue(config: &Config) -> Arc<dyn FeedbackCue> {
    use voxbind::audio::cue::{CueFiles, SoundCue};
    let files = CueFiles::new(&config.pause_audio_file, &config.resume_audio_file);
    Arc::new(SoundCue::new(files))
}

#[cfg(not(feature = "native-audio"))]
fn feedback_cue(_config: &Config) -> Arc<dyn FeedbackCue> {
    Arc::new(voxbind::audio::cue::LogCue)
}

#[cfg(feature = "native-audio")]
fn list_devices() -> Result<()> {
    voxbind::audio::capture::CpalInput::default().list_devices()
}

#[cfg(not(feature = "native-audio"))]
fn list_devices() -> Result<()> {
    anyhow::bail!("device listing requires building with the `native-audio` feature")
}
