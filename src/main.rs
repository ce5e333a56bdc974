use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use voicebot_client::{
    create_router, AppState, CapturedAudio, Config, HttpTransport, PlaybackOutput,
    RendererFactory, SessionEvent, SessionEventKind, SessionOrchestrator,
};

/// Voice agent reply client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (without extension)
    #[arg(long, default_value = "config/voicebot")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send one recording and play the reply
    Ask {
        /// Recorded utterance (wav, webm, ogg, mp3)
        audio_file: PathBuf,

        /// Where reply speech goes (overrides the config file)
        #[arg(long, value_enum)]
        output: Option<PlaybackOutput>,

        /// Directory for WAV output (overrides the config file)
        #[arg(long)]
        wav_dir: Option<String>,
    },

    /// Run the local control API
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config))?;

    info!("Voicebot client v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);
    info!("Backend: {}", cfg.backend.base_url);

    match cli.command {
        Commands::Ask {
            audio_file,
            output,
            wav_dir,
        } => ask(cfg, audio_file, output, wav_dir).await,
        Commands::Serve => serve(cfg).await,
    }
}

async fn ask(
    cfg: Config,
    audio_file: PathBuf,
    output: Option<PlaybackOutput>,
    wav_dir: Option<String>,
) -> Result<()> {
    let mut playback = cfg.playback.clone();
    if let Some(dir) = wav_dir {
        playback.wav_output_dir = dir;
    }
    let output = output.unwrap_or(playback.output);

    let audio = CapturedAudio::from_file(&audio_file).await?;
    let transport = Arc::new(HttpTransport::new(cfg.backend.clone())?);
    let renderer = RendererFactory::create(output, &playback)?;

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let orchestrator = Arc::new(
        SessionOrchestrator::new(cfg.session_config(), transport, renderer).with_events(events_tx),
    );

    orchestrator.submit(audio).await?;

    let mut waiter = tokio::spawn({
        let orchestrator = Arc::clone(&orchestrator);
        async move { orchestrator.wait().await }
    });

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut printer = ReplyPrinter::default();
    let mut interrupted = false;

    let final_state = loop {
        tokio::select! {
            Some(event) = events_rx.recv() => printer.handle(&event),
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                warn!("Interrupted, cancelling");
                orchestrator.cancel().await;
            }
            joined = &mut waiter => break joined.context("Session waiter panicked")?,
        }
    };

    while let Ok(event) = events_rx.try_recv() {
        printer.handle(&event);
    }
    printer.finish();

    if let Some(stats) = orchestrator.stats().await {
        info!(
            "Session {} ended {:?}: {} segments received, {} played, {} failed",
            stats.session_id,
            final_state.unwrap_or(stats.state),
            stats.segments_received,
            stats.segments_played,
            stats.render_failures
        );
    }

    Ok(())
}

/// Writes transcript updates to stdout as deltas
#[derive(Default)]
struct ReplyPrinter {
    printed: usize,
}

impl ReplyPrinter {
    fn handle(&mut self, event: &SessionEvent) {
        match &event.kind {
            SessionEventKind::TranscriptUpdate { text } => {
                if let Some(delta) = text.get(self.printed..) {
                    print!("{}", delta);
                    let _ = std::io::stdout().flush();
                    self.printed = text.len();
                }
            }
            SessionEventKind::Status { status } => debug!("Status: {:?}", status),
            SessionEventKind::SpeakingChanged { speaking } => debug!("Speaking: {}", speaking),
        }
    }

    fn finish(&self) {
        if self.printed > 0 {
            println!();
        }
    }
}

async fn serve(cfg: Config) -> Result<()> {
    let transport = Arc::new(HttpTransport::new(cfg.backend.clone())?);
    let renderer = RendererFactory::create(cfg.playback.output, &cfg.playback)?;

    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<SessionEvent>();
    let orchestrator =
        SessionOrchestrator::new(cfg.session_config(), transport, renderer).with_events(events_tx);

    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            debug!("Session {}: {:?}", event.session_id, event.kind);
        }
    });

    let app = create_router(AppState::new(Arc::new(orchestrator)));

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Control API listening on {}", addr);
    axum::serve(listener, app).await.context("HTTP server failed")?;

    Ok(())
}
