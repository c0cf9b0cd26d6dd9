//! EEG-Simulation: synthetic EEG generation and real-time streaming
//!
//! Provides a band-limited random signal generator for testing recorders and
//! a pacing loop that publishes it at the nominal sample rate.

pub mod real_time_stream;
pub mod signal_generator;

pub use real_time_stream::*;
pub use signal_generator::*;
