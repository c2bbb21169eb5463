use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use realtime_call::storage::FileStore;
use realtime_call::transport::native::{SpeakerSink, WebRtcBackend};
use realtime_call::transport::HttpSignaler;
use realtime_call::types::audio::Voice;
use realtime_call::types::ServerEvent;
use realtime_call::utils::device;
use realtime_call::{CallController, CallManager, Config, CredentialStore, HttpNegotiator, TerminalPrompt};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about = "Practice a conversation with a realtime voice tutor")]
struct Cli {
    /// What the conversation should be about
    #[arg(default_value = "Introduce yourself and ask me about my day.")]
    topic: String,
    /// Voice for the tutor, e.g. alloy, coral, verse
    #[arg(long)]
    voice: Option<String>,
    #[arg(long)]
    input_device: Option<String>,
    #[arg(long)]
    output_device: Option<String>,
    /// Print audio devices and exit
    #[arg(long)]
    list_devices: bool,
    /// Forget the stored API key and exit
    #[arg(long)]
    clear_key: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("failed to load configuration")?;

    if cli.list_devices {
        println!("inputs:\n{}", device::get_available_inputs()?);
        println!("outputs:\n{}", device::get_available_outputs()?);
        return Ok(());
    }

    let store = Arc::new(FileStore::new(config.store_path()));
    let credentials = CredentialStore::new(store, Arc::new(TerminalPrompt::new()))
        .with_prefix(config.credential_prefix())
        .with_max_attempts(config.credential_attempts());

    let negotiator = HttpNegotiator::new(&config, credentials.clone());
    let mut backend = WebRtcBackend::new();
    if let Some(name) = &cli.input_device {
        backend = backend.with_input_device(name);
    }
    let speaker = SpeakerSink::open(cli.output_device.clone())
        .await
        .context("failed to open speaker")?;
    let controller =
        CallController::new(&config, negotiator, backend, HttpSignaler::new(&config)).with_sink(Arc::new(speaker));
    let manager = CallManager::new(config, credentials, controller);

    if cli.clear_key {
        manager.clear_stored_credential()?;
        println!("API key cleared");
        return Ok(());
    }

    let voice = cli.voice.as_deref().map(|v| v.parse::<Voice>()).transpose()?;
    println!("Connecting...");
    let session = match manager.start_call(&cli.topic, voice, None).await {
        Ok(session) => session,
        Err(e) => {
            eprintln!("{}", e.user_message());
            return Err(e.into());
        }
    };
    println!("Connected. Speak into your microphone; press Ctrl-C to end the call.");

    let mut events = session.server_events();
    let mut watchdog = tokio::time::interval(Duration::from_millis(500));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = watchdog.tick() => {}
            event = events.recv() => match event {
                Ok(ServerEvent::InputAudioTranscriptionCompleted(e)) => println!("you: {}", e.transcript().trim()),
                Ok(ServerEvent::ResponseAudioTranscriptDone(e)) => println!("tutor: {}", e.transcript()),
                Ok(ServerEvent::Error(e)) => eprintln!("error: {}", e.error().message()),
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => tracing::warn!("missed {} server events", n),
                Err(RecvError::Closed) => break,
            },
        }
        if session.state().is_terminal() {
            println!("The call was closed by the server.");
            break;
        }
    }

    manager.end_call().await;
    let stats = session.stats();
    println!(
        "Call ended. responses={}, tokens={} (in {}, out {})",
        stats.responses(),
        stats.total_tokens(),
        stats.input_tokens(),
        stats.output_tokens()
    );
    Ok(())
}
