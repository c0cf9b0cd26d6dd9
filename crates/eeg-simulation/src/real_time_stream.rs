//! Real-time delivery of synthetic samples
//!
//! The streamer keeps the number of published samples proportional to the
//! wall-clock time since the session started: on every poll it generates
//! exactly the samples that have become due and publishes them as one chunk.

use crate::signal_generator::{ScaleHandle, SignalGenerator};
use eeg_core::{Clock, LabError, LabResult, SampleOutlet};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Parameters of one streaming session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionParams {
    /// Chunk size hint handed to the outlet when it is opened
    pub chunk_hint: usize,
    /// Seconds to sleep between polls
    pub poll_interval: f64,
    /// Session length in seconds
    pub total_time: f64,
    /// Seconds subtracted from each chunk's timestamp to emulate hardware latency
    pub capture_delay: f64,
    /// Close the outlet when the session ends
    pub terminate: bool,
}

impl Default for SessionParams {
    fn default() -> Self {
        Self {
            chunk_hint: 32,
            poll_interval: 0.01,
            total_time: 60.0,
            capture_delay: 0.0,
            terminate: true,
        }
    }
}

impl SessionParams {
    pub fn validate(&self) -> LabResult<()> {
        if !self.poll_interval.is_finite() || self.poll_interval < 0.0 {
            return Err(LabError::config(format!(
                "Poll interval must be non-negative, got {}",
                self.poll_interval
            )));
        }
        if !self.total_time.is_finite() || self.total_time < 0.0 {
            return Err(LabError::config(format!(
                "Total time must be non-negative, got {}",
                self.total_time
            )));
        }
        if !self.capture_delay.is_finite() {
            return Err(LabError::config("Capture delay must be finite"));
        }
        Ok(())
    }
}

/// Stream statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamStats {
    pub chunks_sent: u64,
    pub samples_sent: u64,
    pub largest_chunk: u64,
    /// Session time when the loop stopped
    pub elapsed: f64,
    /// `floor(sample_rate * total_time)`
    pub expected_samples: u64,
    /// Stopped through a `StopHandle` before `total_time`
    pub cancelled: bool,
}

impl StreamStats {
    /// Samples sent beyond (positive) or short of (negative) the expected count
    pub fn drift(&self) -> i64 {
        self.samples_sent as i64 - self.expected_samples as i64
    }
}

/// A session that ended early because a chunk could not be produced or delivered
#[derive(Debug, thiserror::Error)]
#[error("streaming stopped after {} samples, {undelivered} samples not delivered: {source}", .stats.samples_sent)]
pub struct StreamFailure {
    /// What had been delivered before the failure
    pub stats: StreamStats,
    /// Size of the chunk that was lost
    pub undelivered: u64,
    #[source]
    pub source: LabError,
}

/// Cooperative cancellation flag, checked once per poll
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Clear a previous stop request
    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// Paces a `SignalGenerator` against a clock and publishes to an outlet
pub struct SignalStreamer<C: Clock, O: SampleOutlet> {
    generator: SignalGenerator,
    clock: C,
    outlet: O,
    stop: StopHandle,
}

impl<C: Clock, O: SampleOutlet> SignalStreamer<C, O> {
    pub fn new(generator: SignalGenerator, clock: C, outlet: O) -> Self {
        Self {
            generator,
            clock,
            outlet,
            stop: StopHandle::new(),
        }
    }

    /// Handle for stopping a running session from another thread
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Handle for changing the signal scale mid-stream
    pub fn scale_handle(&self) -> ScaleHandle {
        self.generator.scale_handle()
    }

    pub fn generator(&self) -> &SignalGenerator {
        &self.generator
    }

    pub fn generator_mut(&mut self) -> &mut SignalGenerator {
        &mut self.generator
    }

    pub fn outlet(&self) -> &O {
        &self.outlet
    }

    /// Run one session, blocking until `total_time` has elapsed
    ///
    /// A stop requested before or during the session cancels it and is then
    /// cleared, so the streamer can run again.
    ///
    /// A chunk that cannot be generated or published ends the session with a
    /// `StreamFailure` reporting the gap; nothing is dropped silently.
    pub fn run(&mut self, params: &SessionParams) -> Result<StreamStats, StreamFailure> {
        let sample_rate = self.generator.sample_rate();
        let mut stats = StreamStats {
            expected_samples: (sample_rate * params.total_time).floor() as u64,
            ..Default::default()
        };

        if let Err(source) = params.validate() {
            return Err(StreamFailure {
                stats,
                undelivered: 0,
                source,
            });
        }
        if let Err(e) = self.outlet.open(self.generator.info(), params.chunk_hint) {
            return Err(StreamFailure {
                stats,
                undelivered: 0,
                source: e.into(),
            });
        }

        info!(
            stream = %self.generator.info().name,
            sample_rate,
            channels = self.generator.channel_count(),
            total_time = params.total_time,
            model = self.generator.model().description(),
            "Now sending data"
        );

        let start_time = self.clock.now();
        loop {
            if self.stop.is_stopped() {
                // Consumed here so the next session starts fresh
                self.stop.reset();
                stats.cancelled = true;
                debug!("Stream stop requested");
                break;
            }

            let elapsed = self.clock.now() - start_time;
            stats.elapsed = elapsed;

            let due = (sample_rate * elapsed).floor().max(0.0) as u64;
            let required = due.saturating_sub(stats.samples_sent);
            if required > 0 {
                if let Err(source) = self.send_chunk(required, params.capture_delay) {
                    error!(
                        sent = stats.samples_sent,
                        undelivered = required,
                        error = %source,
                        "Streaming aborted"
                    );
                    if params.terminate {
                        self.outlet.close();
                    }
                    return Err(StreamFailure {
                        stats,
                        undelivered: required,
                        source,
                    });
                }
                stats.samples_sent += required;
                stats.chunks_sent += 1;
                stats.largest_chunk = stats.largest_chunk.max(required);
            }

            if elapsed > params.total_time {
                break;
            }

            self.clock.sleep(params.poll_interval);
        }

        info!(
            elapsed = stats.elapsed,
            samples = stats.samples_sent,
            chunks = stats.chunks_sent,
            "Finished streaming"
        );

        if params.terminate {
            self.outlet.close();
            debug!("Stream outlet closed");
        }

        Ok(stats)
    }

    fn send_chunk(&mut self, n_samples: u64, capture_delay: f64) -> LabResult<()> {
        let mut chunk = self.generator.next_chunk(n_samples as usize)?;
        chunk.timestamp = self.clock.now() - capture_delay;
        self.outlet.push_chunk(&chunk)?;
        Ok(())
    }
}

/// Run a streaming session on tokio's blocking pool
///
/// Must be called from within a tokio runtime. The streamer is handed back
/// together with the session result.
pub fn spawn_streaming<C, O>(
    mut streamer: SignalStreamer<C, O>,
    params: SessionParams,
) -> (
    JoinHandle<(SignalStreamer<C, O>, Result<StreamStats, StreamFailure>)>,
    StopHandle,
)
where
    C: Clock + 'static,
    O: SampleOutlet + 'static,
{
    let stop = streamer.stop_handle();
    let handle = tokio::task::spawn_blocking(move || {
        let result = streamer.run(&params);
        if let Err(e) = &result {
            error!("Signal stream error: {}", e);
        }
        (streamer, result)
    });
    (handle, stop)
}
