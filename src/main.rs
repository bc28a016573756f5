//! # Voice Session Client - Demo Entry Point
//!
//! Runs one complete voice session from the command line: create a session,
//! open the realtime channel, stream a WAV file as a single utterance, then
//! play whatever the backend synthesizes until Ctrl-C (or SIGTERM) ends the
//! session.
//!
//! ## Startup sequence:
//! 1. Load `.env` and layered configuration (`config.toml` + `APP_` vars)
//! 2. Initialize structured logging (`RUST_LOG` controls verbosity)
//! 3. Build the controller over the real audio output and a WAV capture
//!    device, then drive the session lifecycle
//!
//! The WAV path comes from the first CLI argument or `DEMO_WAV`.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use voice_session_client::audio::{RodioSink, WavFileDevice};
use voice_session_client::session::SessionPhase;
use voice_session_client::{AppConfig, SessionController, SessionParams};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting voice-session-client v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded: api={} realtime={}",
        config.api.base_url, config.realtime.url
    );

    let wav_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("DEMO_WAV").ok())
        .ok_or_else(|| anyhow::anyhow!("usage: voice-session-client <utterance.wav>"))?;

    let sink = Arc::new(RodioSink::new()?);
    let device = Box::new(WavFileDevice::new(&wav_path));
    let mut controller = SessionController::new(config, device, sink)?;

    controller
        .start_session(SessionParams {
            scenario: "free_conversation".to_string(),
            category: "demo".to_string(),
        })
        .await?;

    // The channel connects asynchronously; give it a moment before recording.
    wait_for_phase(&controller, SessionPhase::Connected, Duration::from_secs(10)).await?;

    info!("Streaming {} as one utterance", wav_path);
    controller.start_recording().await?;
    tokio::time::sleep(wav_stream_duration(&wav_path)).await;
    controller.stop_recording().await?;

    info!("Utterance sent; playing responses until Ctrl-C");
    wait_for_shutdown().await;

    controller.stop_session().await;
    info!("Session ended cleanly");
    Ok(())
}

/// Initialize the tracing (logging) system for the application.
///
/// Reads `RUST_LOG` if set; otherwise defaults to debug output for this
/// crate and info for the rest of the stack.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_session_client=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Poll the controller until it reaches `target`, bailing out on `Error`
/// or when the deadline passes.
async fn wait_for_phase(
    controller: &SessionController,
    target: SessionPhase,
    deadline: Duration,
) -> Result<()> {
    let started = std::time::Instant::now();
    loop {
        match controller.phase() {
            phase if phase == target => return Ok(()),
            SessionPhase::Error(message) => {
                anyhow::bail!("session failed while waiting to connect: {message}")
            }
            _ if started.elapsed() >= deadline => {
                anyhow::bail!("timed out waiting for phase {}", target.as_str())
            }
            _ => tokio::time::sleep(Duration::from_millis(100)).await,
        }
    }
}

/// How long to keep recording while the WAV device streams the file.
///
/// Uses the file's actual audio duration plus a small margin so the last
/// chunk makes it through the collector before finalize. Falls back to a
/// fixed window if the header can't be read; the recorder will simply
/// capture whatever arrived.
fn wav_stream_duration(path: &str) -> Duration {
    match hound::WavReader::open(path) {
        Ok(reader) => {
            let spec = reader.spec();
            let secs = reader.duration() as f64 / spec.sample_rate as f64;
            Duration::from_secs_f64(secs + 0.5)
        }
        Err(e) => {
            warn!("Could not read WAV duration for {}: {}", path, e);
            Duration::from_secs(5)
        }
    }
}

/// Wait for SIGINT (Ctrl-C) or SIGTERM, whichever arrives first.
async fn wait_for_shutdown() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {}", e);
                    let _ = ctrl_c.await;
                    return;
                }
            };

        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT"),
            _ = sigterm.recv() => info!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        info!("Received Ctrl-C");
    }
}
