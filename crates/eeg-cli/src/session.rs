//! Marker and signal sessions driven from the command line

use crate::cli::{PhaseArgs, SignalArgs};
use anyhow::{Context, Result};
use eeg_core::{Clock, IntervalStats, LabError, LabResult, MarkerOutlet, Montage, SampleOutlet, StreamInfo};
use eeg_markers::MarkerConfig;
use eeg_simulation::{spawn_streaming, SessionParams, SignalConfig, SignalGenerator, SignalModel, SignalStreamer, StreamStats};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

fn default_marker_poll_ms() -> u64 {
    1
}

/// Complete experiment configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    #[serde(default)]
    pub markers: MarkerConfig,
    #[serde(default)]
    pub signal: SignalConfig,
    #[serde(default)]
    pub session: SessionParams,
    /// Poll interval of the phase timer in milliseconds
    #[serde(default = "default_marker_poll_ms")]
    pub marker_poll_ms: u64,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            markers: MarkerConfig::default(),
            signal: SignalConfig::default(),
            session: SessionParams::default(),
            marker_poll_ms: default_marker_poll_ms(),
        }
    }
}

impl ExperimentConfig {
    /// Load from a JSON file, or fall back to the presets
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            debug!("No configuration file given, using presets");
            return Ok(Self::default());
        };

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse configuration {}", path.display()))?;
        config.validate()?;
        info!(path = %path.display(), "Loaded experiment configuration");
        Ok(config)
    }

    pub fn validate(&self) -> LabResult<()> {
        if self.marker_poll_ms == 0 {
            return Err(LabError::config("Marker poll interval must be at least 1 ms"));
        }
        self.markers.validate()?;
        self.signal.validate()?;
        self.session.validate()
    }

    /// Apply marker command-line overrides
    pub fn apply_phase_args(&mut self, args: &PhaseArgs) -> Result<()> {
        if let Some(poll_ms) = args.poll_ms {
            self.marker_poll_ms = poll_ms;
        }
        if let Some(label) = &args.label {
            self.markers.label = label.clone();
        }

        self.validate()?;
        Ok(())
    }

    /// Apply signal command-line overrides
    pub fn apply_signal_args(&mut self, args: &SignalArgs) -> Result<()> {
        let srate = args.srate.unwrap_or(self.signal.stream.nominal_srate);
        let name = self.signal.stream.name.clone();
        let source_id = self.signal.stream.source_id.clone();

        if let Some(path) = &args.montage {
            let montage = Montage::load(path)
                .with_context(|| format!("Failed to load montage {}", path.display()))?;
            info!(electrodes = montage.len(), "Loaded montage");
            self.signal.stream = montage.into_stream_info(name, srate, source_id)?;
        } else if let Some(channels) = args.channels {
            let labels: Vec<String> = (1..=channels).map(|i| format!("CH{}", i)).collect();
            self.signal.stream = StreamInfo::eeg(name, srate, &labels, source_id);
        } else {
            self.signal.stream.nominal_srate = srate;
        }

        if let Some(scale) = args.scale {
            self.signal.scale = scale;
        }
        if let Some(seed) = args.seed {
            self.signal.seed = Some(seed);
        }
        if args.peak_freq.is_some() || args.fwhm.is_some() {
            let (peak, width) = match self.signal.model {
                SignalModel::Spectral { peak_freq, fwhm } => (peak_freq, fwhm),
                _ => (14.0, 15.0),
            };
            self.signal.model = SignalModel::Spectral {
                peak_freq: args.peak_freq.unwrap_or(peak),
                fwhm: args.fwhm.unwrap_or(width),
            };
        }
        if let Some(delay) = args.delay {
            self.session.capture_delay = delay;
        }
        if let Some(poll) = args.poll {
            self.session.poll_interval = poll;
        }
        if let Some(chunk) = args.chunk {
            self.session.chunk_hint = chunk;
        }

        self.validate()?;
        Ok(())
    }
}

/// Poll times kept for the timer report
const TIMER_WINDOW: usize = 10_000;

/// Most recent poll times, oldest dropped first
struct PollWindow {
    times: VecDeque<f64>,
    capacity: usize,
}

impl PollWindow {
    fn new(capacity: usize) -> Self {
        Self {
            times: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, time: f64) {
        if self.times.len() == self.capacity {
            self.times.pop_front();
        }
        self.times.push_back(time);
    }

    fn stats(&mut self) -> IntervalStats {
        IntervalStats::from_timestamps(self.times.make_contiguous())
    }
}

/// Outcome of a marker session
#[derive(Debug, Clone, Serialize)]
pub struct MarkerReport {
    pub transitions: usize,
    /// Transitions whose marker the outlet refused
    pub undelivered: usize,
    pub final_phase: String,
    pub accumulated_time: f64,
    pub elapsed_time: f64,
    /// Spacing of the phase timer's most recent polls
    pub timer: IntervalStats,
}

/// Poll a phase engine on a fixed timer for `duration` seconds
pub async fn run_markers<C, O, S>(
    config: &MarkerConfig,
    clock: C,
    outlet: O,
    poll: Duration,
    duration: f64,
    shutdown: S,
) -> LabResult<MarkerReport>
where
    C: Clock,
    O: MarkerOutlet,
    S: Future<Output = ()>,
{
    if poll.is_zero() {
        return Err(LabError::config("Marker poll interval must be non-zero"));
    }
    let mut engine = config.build_engine(clock, outlet)?;
    let mut ticker = tokio::time::interval(poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::pin!(shutdown);

    info!(
        stream = %config.stream.name,
        start_phase = config.start_phase(),
        duration,
        "Marker session started"
    );

    let mut polls = PollWindow::new(TIMER_WINDOW);
    let mut transitions = 0;
    let mut undelivered = 0;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut shutdown => {
                info!("Marker session interrupted");
                break;
            }
        }

        polls.push(engine.elapsed_time());
        if let Some(transition) = engine.tick(&config.label) {
            transitions += 1;
            if !transition.delivered {
                undelivered += 1;
            }
            debug!(
                marker = %transition.marker,
                accumulated = engine.accumulated_time(),
                "Marker sent"
            );
        }

        if engine.elapsed_time() >= duration {
            break;
        }
    }

    let report = MarkerReport {
        transitions,
        undelivered,
        final_phase: engine.current_phase().to_string(),
        accumulated_time: engine.accumulated_time(),
        elapsed_time: engine.elapsed_time(),
        timer: polls.stats(),
    };

    info!(
        transitions = report.transitions,
        timer_mean_ms = report.timer.mean * 1000.0,
        timer_std_ms = report.timer.std_dev * 1000.0,
        timer_max_ms = report.timer.max * 1000.0,
        "Marker session finished"
    );
    if report.undelivered > 0 {
        warn!(undelivered = report.undelivered, "Some markers were not delivered");
    }

    Ok(report)
}

/// Stream the configured signal until `params.total_time` or shutdown
pub async fn run_stream<C, O, S>(
    config: SignalConfig,
    params: SessionParams,
    clock: C,
    outlet: O,
    shutdown: S,
) -> Result<StreamStats>
where
    C: Clock + 'static,
    O: SampleOutlet + 'static,
    S: Future<Output = ()>,
{
    let generator = SignalGenerator::new(config).context("Invalid signal configuration")?;
    let streamer = SignalStreamer::new(generator, clock, outlet);
    let (mut task, stop) = spawn_streaming(streamer, params);
    tokio::pin!(shutdown);

    let finished = tokio::select! {
        joined = &mut task => Some(joined),
        _ = &mut shutdown => None,
    };
    let joined = match finished {
        Some(joined) => joined,
        None => {
            info!("Stopping signal stream");
            stop.stop();
            task.await
        }
    };

    let (_, result) = joined.context("Signal stream task panicked")?;
    let stats = result?;
    if stats.drift() != 0 {
        debug!(drift = stats.drift(), "Sample count differs from rate times duration");
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use eeg_core::{MemoryOutlet, MonotonicClock};
    use eeg_markers::PhaseGraph;
    use std::io::Write;

    fn fast_markers() -> MarkerConfig {
        let graph = PhaseGraph::from_phases([("on", "off", 0.02), ("off", "on", 0.02)]).unwrap();
        MarkerConfig::new(graph)
    }

    #[tokio::test]
    async fn test_marker_session_runs_for_duration() {
        let outlet = MemoryOutlet::new();
        let report = run_markers(
            &fast_markers(),
            MonotonicClock::new(),
            outlet.clone(),
            Duration::from_millis(1),
            0.15,
            std::future::pending(),
        )
        .await
        .unwrap();

        assert!(report.elapsed_time >= 0.15);
        assert!(report.transitions >= 3);
        assert_eq!(report.transitions, outlet.markers().len());
        assert_eq!(report.undelivered, 0);
        assert!(report.timer.count > 0);
        assert_eq!(outlet.marker_texts()[0], "on");
    }

    #[tokio::test]
    async fn test_zero_marker_poll_rejected() {
        let mut config = ExperimentConfig::default();
        let args = PhaseArgs {
            poll_ms: Some(0),
            ..Default::default()
        };
        assert!(config.apply_phase_args(&args).is_err());
        assert!(config.validate().is_err());

        let result = run_markers(
            &fast_markers(),
            MonotonicClock::new(),
            MemoryOutlet::new(),
            Duration::ZERO,
            0.1,
            std::future::pending(),
        )
        .await;
        assert!(matches!(result, Err(LabError::Configuration { .. })));
    }

    #[test]
    fn test_poll_window_keeps_recent_polls() {
        let mut window = PollWindow::new(3);
        for time in [0.0, 1.0, 2.0, 2.5, 3.0] {
            window.push(time);
        }

        let stats = window.stats();
        assert_eq!(window.times.len(), 3);
        assert_eq!(stats.count, 2);
        assert!((stats.mean - 0.5).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_marker_session_shutdown() {
        let report = run_markers(
            &fast_markers(),
            MonotonicClock::new(),
            MemoryOutlet::new(),
            Duration::from_millis(1),
            60.0,
            tokio::time::sleep(Duration::from_millis(30)),
        )
        .await
        .unwrap();

        assert!(report.elapsed_time < 5.0);
    }

    #[tokio::test]
    async fn test_stream_session() {
        let mut config = SignalConfig::dummy_hiamp();
        config.seed = Some(2);
        let params = SessionParams {
            total_time: 0.2,
            poll_interval: 0.005,
            ..Default::default()
        };
        let outlet = MemoryOutlet::new();

        let stats = run_stream(config, params, MonotonicClock::new(), outlet.clone(), std::future::pending())
            .await
            .unwrap();

        assert!(stats.samples_sent >= 102);
        assert_eq!(outlet.total_samples() as u64, stats.samples_sent);
        assert_eq!(outlet.opened_with().map(|(info, _)| info.channel_count), Some(8));
    }

    #[tokio::test]
    async fn test_stream_session_shutdown() {
        let params = SessionParams {
            total_time: 60.0,
            poll_interval: 0.005,
            ..Default::default()
        };
        let stats = run_stream(
            SignalConfig::default(),
            params,
            MonotonicClock::new(),
            MemoryOutlet::new(),
            tokio::time::sleep(Duration::from_millis(50)),
        )
        .await
        .unwrap();

        assert!(stats.cancelled);
    }

    #[test]
    fn test_signal_overrides() {
        let mut config = ExperimentConfig::default();
        let args = SignalArgs {
            srate: Some(256.0),
            channels: Some(4),
            peak_freq: Some(10.0),
            delay: Some(0.05),
            ..Default::default()
        };
        config.apply_signal_args(&args).unwrap();

        assert_eq!(config.signal.stream.channel_count, 4);
        assert_eq!(config.signal.stream.nominal_srate, 256.0);
        assert_eq!(config.signal.model, SignalModel::Spectral { peak_freq: 10.0, fwhm: 15.0 });
        assert_eq!(config.session.capture_delay, 0.05);

        let bad = SignalArgs {
            srate: Some(0.0),
            ..Default::default()
        };
        assert!(config.apply_signal_args(&bad).is_err());
    }

    #[test]
    fn test_montage_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Fz\t0.0\t0.07\t0.07").unwrap();
        writeln!(file, "Cz\t0.0\t0.0\t0.1").unwrap();

        let mut config = ExperimentConfig::default();
        let args = SignalArgs {
            montage: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        config.apply_signal_args(&args).unwrap();

        assert_eq!(config.signal.stream.channel_labels(), vec!["Fz", "Cz"]);
        assert_eq!(config.signal.stream.desc.channels[1].location, Some([0.0, 0.0, 0.1]));
    }

    #[test]
    fn test_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "markers": {{
                    "stream": {{"name": "Trial", "stream_type": "Markers", "channel_count": 1,
                               "nominal_srate": 0.0, "channel_format": "string", "source_id": "t1"}},
                    "phases": {{"fixation": {{"next": "stimulus", "duration": 1.0}},
                                "stimulus": {{"next": "fixation", "duration": 0.5}}}},
                    "initial_phase": "stimulus"
                }},
                "session": {{"chunk_hint": 64, "poll_interval": 0.01, "total_time": 5.0,
                             "capture_delay": 0.0, "terminate": true}}
            }}"#
        )
        .unwrap();

        let config = ExperimentConfig::load_or_default(Some(file.path())).unwrap();
        assert_eq!(config.markers.start_phase(), "stimulus");
        assert_eq!(config.session.chunk_hint, 64);
        assert_eq!(config.signal, SignalConfig::default());
        assert_eq!(config.marker_poll_ms, 1);

        let defaults = ExperimentConfig::load_or_default(None).unwrap();
        assert_eq!(defaults.markers.start_phase(), "evaluate");
    }
}
