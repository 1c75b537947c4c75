//! voxcore binary: run the speech loop or exercise the audio hardware

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use voxcore::audio::{AudioSink, CpalMicrophone, CpalSink, Microphone};
use voxcore::config::Config;
use voxcore::display::LogDisplay;
use voxcore::session::{Session, SinkBuilder};
use voxcore::transport::{self, TransportEvent};
use voxcore::uplink::HttpChunkUploader;

#[derive(Parser)]
#[command(name = "voxcore", about = "Real-time speech I/O core", version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, env = "VOXCORE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the uplink endpoint
    #[arg(long, env = "VOXCORE_ENDPOINT")]
    endpoint: Option<String>,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the speech loop (default)
    Run,

    /// Capture a few seconds of audio and report input levels
    TestMic {
        /// How long to capture
        #[arg(long, default_value_t = 3)]
        seconds: u64,
    },

    /// Play a short test tone on the default output device
    TestSpeaker,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::load_or_default().context("loading config")?,
    };
    if let Some(endpoint) = cli.endpoint {
        config.uplink.endpoint = endpoint;
    }

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::TestMic { seconds } => test_mic(&config, seconds).await,
        Command::TestSpeaker => test_speaker(&config).await,
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "info,voxcore=debug",
        _ => "debug,voxcore=trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(config: Config) -> anyhow::Result<()> {
    tracing::info!(
        endpoint = %config.uplink.endpoint,
        sample_rate = config.audio.sample_rate,
        "starting voxcore"
    );

    let microphone =
        CpalMicrophone::new(config.audio.sample_rate, config.audio.frame_samples)
            .context("opening microphone")?;
    let uploader = HttpChunkUploader::new(&config.uplink, config.audio.sample_rate)
        .context("building uplink client")?;

    let sample_rate = config.audio.sample_rate;
    let sink_builder: SinkBuilder = Arc::new(move || {
        CpalSink::new(sample_rate).map(|sink| Box::new(sink) as Box<dyn AudioSink>)
    });

    let (event_tx, event_rx) = transport::event_channel();
    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel(1);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(()).await;
        }
    });

    // No control connection of its own: the network client integrates via
    // the library seams. Standalone runs mark the session ready at once.
    event_tx
        .send(TransportEvent::Connected)
        .await
        .context("priming session")?;

    let mut session = Session::new(
        config,
        Box::new(microphone),
        Box::new(uploader),
        sink_builder,
        Box::new(LogDisplay),
        event_rx,
        shutdown_rx,
    )?;
    session.run().await?;

    tracing::info!("voxcore stopped");
    Ok(())
}

async fn test_mic(config: &Config, seconds: u64) -> anyhow::Result<()> {
    let mut microphone =
        CpalMicrophone::new(config.audio.sample_rate, config.audio.frame_samples)
            .context("opening microphone")?;
    microphone.start()?;
    tracing::info!(seconds, "capturing; speak into the microphone");

    let deadline = std::time::Instant::now() + Duration::from_secs(seconds);
    let mut total_frames = 0usize;
    while std::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(200)).await;
        for frame in microphone.take_frames() {
            total_frames += 1;
            let peak = frame
                .samples()
                .iter()
                .map(|&s| i32::from(s).abs())
                .max()
                .unwrap_or(0);
            tracing::info!(frame = total_frames, peak, "captured frame");
        }
    }

    microphone.stop();
    if total_frames == 0 {
        anyhow::bail!("no audio captured; check the input device");
    }
    tracing::info!(total_frames, "microphone test complete");
    Ok(())
}

async fn test_speaker(config: &Config) -> anyhow::Result<()> {
    let sample_rate = config.audio.sample_rate;
    let mut sink = CpalSink::new(sample_rate).context("opening speaker")?;

    // Half a second of 440 Hz
    let samples: Vec<u8> = (0..sample_rate / 2)
        .flat_map(|i| {
            let t = f64::from(i) / f64::from(sample_rate);
            let value = (t * 440.0 * 2.0 * std::f64::consts::PI).sin();
            #[allow(clippy::cast_possible_truncation)]
            let sample = (value * 8000.0) as i16;
            sample.to_le_bytes()
        })
        .collect();

    sink.queue_chunk(&samples)?;
    tracing::info!("playing test tone");
    while sink.queued_samples() > 0 && sink.is_active() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    tracing::info!("speaker test complete");
    Ok(())
}
