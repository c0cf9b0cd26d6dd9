//! EEG-Markers: timed experiment phases published as event markers
//!
//! A `PhaseEngine` walks a `PhaseGraph` and publishes one marker per phase
//! transition on a shared clock.

pub mod config;
pub mod phase_engine;
pub mod phase_graph;

pub use config::MarkerConfig;
pub use phase_engine::{format_marker, PhaseEngine, PhaseEngineState, Transition};
pub use phase_graph::{PhaseGraph, PhaseSpec};
