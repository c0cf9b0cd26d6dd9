//! Command-line arguments for eeg-lab

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Emit experiment phase markers and synthetic EEG on a shared clock
#[derive(Parser, Debug)]
#[command(name = "eeg-lab", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Experiment configuration file (JSON)
    #[arg(short, long, global = true, env = "EEG_LAB_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    /// Where published markers and chunks go
    #[arg(long, value_enum, default_value = "jsonl", global = true)]
    pub output: OutputKind,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Walk the phase graph and publish a marker per transition
    Markers(MarkerArgs),
    /// Stream a synthetic EEG signal
    Stream(StreamArgs),
    /// Run the marker session and the signal stream concurrently
    Run(RunArgs),
    /// Print the stream descriptors as JSON
    Describe,
    /// Print the effective experiment configuration as JSON
    PrintConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputKind {
    /// JSON lines on stdout
    Jsonl,
    /// Discard everything
    None,
}

#[derive(Args, Debug, Clone, Default)]
pub struct MarkerArgs {
    /// Session length in seconds
    #[arg(short, long)]
    pub duration: Option<f64>,

    #[command(flatten)]
    pub phase: PhaseArgs,
}

#[derive(Args, Debug, Clone, Default)]
pub struct StreamArgs {
    /// Session length in seconds
    #[arg(short, long)]
    pub duration: Option<f64>,

    #[command(flatten)]
    pub signal: SignalArgs,
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Session length in seconds, shared by both components
    #[arg(short, long)]
    pub duration: Option<f64>,

    #[command(flatten)]
    pub phase: PhaseArgs,

    #[command(flatten)]
    pub signal: SignalArgs,
}

#[derive(Args, Debug, Clone, Default)]
pub struct PhaseArgs {
    /// Poll interval of the phase timer in milliseconds
    #[arg(long)]
    pub poll_ms: Option<u64>,

    /// Label appended to every marker
    #[arg(long)]
    pub label: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct SignalArgs {
    /// Nominal sample rate in Hz
    #[arg(long)]
    pub srate: Option<f64>,

    /// Number of generic channels (CH1..CHn)
    #[arg(long, conflicts_with = "montage")]
    pub channels: Option<usize>,

    /// Montage file with `label X Y Z` lines
    #[arg(long)]
    pub montage: Option<PathBuf>,

    /// Signal scale factor
    #[arg(long)]
    pub scale: Option<f32>,

    /// Random seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Spectral peak frequency in Hz
    #[arg(long)]
    pub peak_freq: Option<f32>,

    /// Spectral full width at half maximum in Hz
    #[arg(long)]
    pub fwhm: Option<f32>,

    /// Capture delay subtracted from chunk timestamps, seconds
    #[arg(long)]
    pub delay: Option<f64>,

    /// Poll interval of the delivery loop, seconds
    #[arg(long)]
    pub poll: Option<f64>,

    /// Chunk size hint passed to the outlet
    #[arg(long)]
    pub chunk: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "eeg-lab", "run", "-d", "5", "--label", "s1", "--srate", "256", "--peak-freq", "10",
        ])
        .unwrap();
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.duration, Some(5.0));
                assert_eq!(args.phase.label.as_deref(), Some("s1"));
                assert_eq!(args.signal.srate, Some(256.0));
                assert_eq!(args.signal.peak_freq, Some(10.0));
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert_eq!(cli.output, OutputKind::Jsonl);
    }

    #[test]
    fn test_channels_conflict_with_montage() {
        let result = Cli::try_parse_from(["eeg-lab", "stream", "--channels", "4", "--montage", "cap.sfp"]);
        assert!(result.is_err());
    }
}
