use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use voice_tutor::agent::{GeminiClient, HttpTurnGenerator};
use voice_tutor::api::{ApiServer, ApiState};
use voice_tutor::config::{TtsProvider, TurnProvider};
use voice_tutor::db::{self, SessionHistoryRepo, SessionRecorder};
use voice_tutor::voice::{
    GOOGLE_WAVENET, MicCapture, OPENAI, PlaybackSink, SpeakerSink, SpeechSynthesizer,
    SpeechToText,
};
use voice_tutor::{
    Config, HostBinding, HostIdentity, Orchestrator, Role, ScriptedOpening, SessionConfig,
    SessionEvent, TurnGenerator,
};

/// Tutor - voice-driven AI tutoring sessions
#[derive(Parser)]
#[command(name = "tutor", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(flatten)]
    session: SessionArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

/// Parameters of a live tutoring call
#[derive(Args, Clone)]
struct SessionArgs {
    /// Subject area
    #[arg(long, env = "TUTOR_SUBJECT", default_value = "Math", global = true)]
    subject: String,

    /// Topic within the subject
    #[arg(long, env = "TUTOR_TOPIC", default_value = "Fractions", global = true)]
    topic: String,

    /// Conversation style
    #[arg(long, env = "TUTOR_STYLE", default_value = "casual", global = true)]
    style: String,

    /// Voice name, id, or gender
    #[arg(long, env = "TUTOR_VOICE", default_value = "john", global = true)]
    voice: String,

    /// Companion the session is recorded against
    #[arg(long, env = "TUTOR_COMPANION", default_value = "tutor", global = true)]
    companion: String,

    /// User the session is recorded against
    #[arg(long, env = "TUTOR_USER", default_value = "local", global = true)]
    user: String,
}

#[derive(Subcommand)]
enum Command {
    /// Run a live tutoring call (default)
    Session,
    /// Run the HTTP API server
    Serve {
        /// Port to listen on (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },
    /// List the voices of the configured TTS backend
    Voices,
    /// Show recently recorded sessions
    History {
        /// Only sessions for this user
        #[arg(long = "for")]
        for_user: Option<String>,
        /// Number of sessions to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Speak text through the configured playback sink
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,voice_tutor=info",
        1 => "info,voice_tutor=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load()?;
    tracing::debug!(
        turn = ?config.turn.provider,
        tts = ?config.voice.tts_provider,
        "loaded configuration"
    );

    match cli.command.unwrap_or(Command::Session) {
        Command::Session => run_session(config, cli.session).await,
        Command::Serve { port } => serve(config, port).await,
        Command::Voices => {
            list_voices(&config);
            Ok(())
        }
        Command::History { for_user, limit } => show_history(&config, for_user.as_deref(), limit),
        Command::TestTts { text } => test_tts(&config, &text, &cli.session.voice).await,
    }
}

/// Run one tutoring call until the user hangs up
async fn run_session(config: Config, args: SessionArgs) -> anyhow::Result<()> {
    let capture = Arc::new(build_capture(&config)?);
    let playback = Arc::new(build_speaker(&config)?);
    let generator = build_generator(&config)?;

    let orchestrator = Orchestrator::builder(capture, playback, generator)
        .playback_watchdog(config.voice.playback_watchdog)
        .build();

    let recorder: Option<Arc<dyn SessionRecorder>> = match db::init(config.db_path()) {
        Ok(pool) => Some(Arc::new(SessionHistoryRepo::new(pool))),
        Err(e) => {
            tracing::warn!(error = %e, "session history unavailable");
            None
        }
    };

    let host = Arc::new(HostBinding::attach(
        orchestrator,
        HostIdentity {
            companion_id: args.companion.clone(),
            user_id: args.user.clone(),
        },
        recorder,
    ));
    let mut events = host.orchestrator().subscribe();

    let session_config = SessionConfig::new(args.subject, args.topic, args.style, args.voice);
    let starter = Arc::clone(&host);
    let mut start = tokio::spawn(async move { starter.start(session_config).await });
    let mut started = false;

    println!("Connecting... type `m` + Enter to toggle the mic, `q` + Enter to hang up.");

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            joined = &mut start, if !started => {
                started = true;
                joined.context("session start task failed")??;
            }
            Some(event) = events.recv() => print_event(&event),
            line = stdin.next_line() => match line?.as_deref().map(str::trim) {
                Some("m") => {
                    let muted = host.toggle_mic();
                    println!("{}", if muted { "[mic muted]" } else { "[mic live]" });
                }
                Some("q") | None => break,
                Some(_) => {}
            },
            _ = &mut ctrl_c => break,
        }
    }

    host.disconnect();
    // let the history watcher record the call before the binding is dropped
    tokio::time::sleep(Duration::from_millis(250)).await;

    println!("Call ended.");
    Ok(())
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::CallStart => println!("[connected]"),
        SessionEvent::CallEnd => println!("[call ended]"),
        SessionEvent::Message(entry) => match entry.role {
            Role::Assistant => println!("tutor: {}", entry.content),
            Role::User => println!("you:   {}", entry.content),
        },
        SessionEvent::Error(fault) => eprintln!("[error] {fault}"),
        SessionEvent::SpeechStart | SessionEvent::SpeechEnd => {
            tracing::debug!(event = event.kind().as_str(), "speech");
        }
    }
}

fn build_capture(config: &Config) -> anyhow::Result<MicCapture> {
    let api_key = config
        .stt_api_key()
        .context("no API key configured for the speech-to-text provider")?;
    let stt = SpeechToText::new(
        config.voice.stt_provider,
        api_key.to_string(),
        config.voice.stt_model.clone(),
    )?;

    Ok(MicCapture::new(stt, tokio::runtime::Handle::current())
        .with_settings(config.voice.segmenter))
}

fn build_speaker(config: &Config) -> anyhow::Result<SpeakerSink> {
    let synthesizer = match config.voice.tts_provider {
        TtsProvider::Http => SpeechSynthesizer::endpoint(config.voice.tts_endpoint.clone())?,
        TtsProvider::OpenAi => {
            let api_key = config
                .api_keys
                .openai
                .clone()
                .context("OPENAI_API_KEY is required for the openai TTS provider")?;
            SpeechSynthesizer::openai(api_key, config.voice.tts_model.clone())?
        }
    };

    Ok(SpeakerSink::new(synthesizer).with_style(config.voice.speaking_style))
}

fn build_generator(config: &Config) -> anyhow::Result<Arc<dyn TurnGenerator>> {
    let generator: Arc<dyn TurnGenerator> = match config.turn.provider {
        TurnProvider::Gemini => {
            let api_key = config
                .api_keys
                .gemini
                .clone()
                .context("GEMINI_API_KEY is required for the gemini turn provider")?;
            Arc::new(GeminiClient::new(api_key, config.turn.gemini.clone())?)
        }
        TurnProvider::Http => {
            let mut http =
                HttpTurnGenerator::new(config.turn.endpoint.clone(), config.turn.gemini.timeout)?;
            if let Some(window) = config.turn.history_window {
                http = http.with_history_window(window);
            }
            Arc::new(http)
        }
    };

    if config.turn.scripted_greeting {
        Ok(Arc::new(ScriptedOpening::new(generator)))
    } else {
        Ok(generator)
    }
}

/// Run the HTTP API server until interrupted
async fn serve(config: Config, port: Option<u16>) -> anyhow::Result<()> {
    let gemini = config
        .api_keys
        .gemini
        .clone()
        .map(|key| GeminiClient::new(key, config.turn.gemini.clone()))
        .transpose()?;
    let tts = config
        .api_keys
        .google_tts
        .clone()
        .map(SpeechSynthesizer::google)
        .transpose()?;

    let port = port.unwrap_or(config.server.port);
    let server = ApiServer::with_state(ApiState { gemini, tts }, port);

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("shutting down"),
    }
    Ok(())
}

fn list_voices(config: &Config) {
    let catalog = match config.voice.tts_provider {
        TtsProvider::Http => GOOGLE_WAVENET,
        TtsProvider::OpenAi => OPENAI,
    };

    for (i, voice) in catalog.iter().enumerate() {
        let marker = if i == 0 { " (default)" } else { "" };
        println!("{:<10} {:<18} {:?}{marker}", voice.name, voice.id, voice.gender);
    }
}

fn show_history(config: &Config, user: Option<&str>, limit: usize) -> anyhow::Result<()> {
    let repo = SessionHistoryRepo::new(db::init(config.db_path())?);
    let records = match user {
        Some(user) => repo.for_user(user, limit)?,
        None => repo.recent(limit)?,
    };

    if records.is_empty() {
        println!("No sessions recorded yet.");
        return Ok(());
    }

    for record in records {
        println!(
            "{}  {:<16} {:<16} {}",
            record.created_at.format("%Y-%m-%d %H:%M"),
            record.companion_id,
            record.user_id,
            record.id
        );
    }
    Ok(())
}

/// Speak text through the configured playback sink
async fn test_tts(config: &Config, text: &str, voice: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let speaker = build_speaker(config)?;
    speaker.speak(text, voice).await?;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");
    Ok(())
}
