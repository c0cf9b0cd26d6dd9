//! eeg-lab: phase markers and synthetic EEG for acquisition testing

mod cli;
mod session;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Command, OutputKind};
use eeg_core::{JsonLinesOutlet, MarkerOutlet, MonotonicClock, NullOutlet, SampleOutlet};
use session::{run_markers, run_stream, ExperimentConfig};
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr, stdout carries the published streams
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = ExperimentConfig::load_or_default(cli.config.as_deref())?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    let output = cli.output;
    match cli.command {
        Command::Markers(args) => {
            config.apply_phase_args(&args.phase)?;
            let duration = args.duration.unwrap_or(config.session.total_time);
            let report = run_markers(
                &config.markers,
                MonotonicClock::new(),
                marker_outlet(output),
                Duration::from_millis(config.marker_poll_ms),
                duration,
                shutdown(shutdown_rx),
            )
            .await?;
            info!(
                final_phase = %report.final_phase,
                accumulated_time = report.accumulated_time,
                "Markers done"
            );
        }
        Command::Stream(args) => {
            config.apply_signal_args(&args.signal)?;
            if let Some(duration) = args.duration {
                config.session.total_time = duration;
            }
            let stats = run_stream(
                config.signal,
                config.session,
                MonotonicClock::new(),
                sample_outlet(output),
                shutdown(shutdown_rx),
            )
            .await?;
            info!(samples = stats.samples_sent, chunks = stats.chunks_sent, "Stream done");
        }
        Command::Run(args) => {
            config.apply_phase_args(&args.phase)?;
            config.apply_signal_args(&args.signal)?;
            if let Some(duration) = args.duration {
                config.session.total_time = duration;
            }

            // One clock so marker and sample timestamps line up
            let clock = MonotonicClock::new();
            let markers = run_markers(
                &config.markers,
                clock,
                marker_outlet(output),
                Duration::from_millis(config.marker_poll_ms),
                config.session.total_time,
                shutdown(shutdown_rx.clone()),
            );
            let stream = run_stream(
                config.signal.clone(),
                config.session.clone(),
                clock,
                sample_outlet(output),
                shutdown(shutdown_rx),
            );

            let (markers, stream) = tokio::join!(markers, stream);
            let stats = stream.context("Signal stream failed")?;
            let report = markers.context("Marker session failed")?;
            info!(
                transitions = report.transitions,
                samples = stats.samples_sent,
                elapsed = stats.elapsed,
                "Session done"
            );
        }
        Command::Describe => {
            println!("{}", serde_json::to_string_pretty(&config.markers.stream)?);
            println!("{}", serde_json::to_string_pretty(&config.signal.stream)?);
        }
        Command::PrintConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn marker_outlet(kind: OutputKind) -> Box<dyn MarkerOutlet> {
    match kind {
        OutputKind::Jsonl => Box::new(JsonLinesOutlet::new(std::io::stdout())),
        OutputKind::None => Box::new(NullOutlet),
    }
}

fn sample_outlet(kind: OutputKind) -> Box<dyn SampleOutlet> {
    match kind {
        OutputKind::Jsonl => Box::new(JsonLinesOutlet::new(std::io::stdout())),
        OutputKind::None => Box::new(NullOutlet),
    }
}

/// Resolves once the shutdown flag is raised
async fn shutdown(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        // Sender gone: Ctrl-C can no longer be delivered
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
