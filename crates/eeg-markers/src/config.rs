//! Configuration for marker sessions

use crate::phase_engine::PhaseEngine;
use crate::phase_graph::PhaseGraph;
use eeg_core::{Clock, LabError, LabResult, MarkerOutlet, StreamInfo};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Marker stream plus the phase graph it walks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerConfig {
    /// Descriptor of the marker stream
    pub stream: StreamInfo,
    /// Phase graph in declaration order
    pub phases: PhaseGraph,
    /// Phase the engine starts in; the last declared phase when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_phase: Option<String>,
    /// Label appended to every automatic marker
    #[serde(default)]
    pub label: String,
}

impl MarkerConfig {
    /// Create a configuration with a default marker stream descriptor
    pub fn new(phases: PhaseGraph) -> Self {
        Self {
            stream: StreamInfo::markers("MarkersGenerator", "Markers", None),
            phases,
            initial_phase: None,
            label: String::new(),
        }
    }

    /// Cue-based motor imagery trial: precue, cue, go, evaluate, repeat
    pub fn motor_imagery() -> Self {
        let phases = PhaseGraph::from_phases([
            ("precue", "cue", 1.0),
            ("cue", "go", 0.5),
            ("go", "evaluate", 2.0),
            ("evaluate", "precue", 0.5),
        ])
        .expect("motor imagery preset is invalid");

        let mut config = Self::new(phases);
        config.stream.name = "Test_Markers".to_string();
        config
    }

    /// Phase the engine will start in
    pub fn start_phase(&self) -> &str {
        match &self.initial_phase {
            Some(phase) => phase,
            None => self.phases.last_declared(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> LabResult<()> {
        if self.stream.channel_count != 1 {
            return Err(LabError::config(format!(
                "Marker stream must have exactly one channel, got {}",
                self.stream.channel_count
            )));
        }
        if self.stream.channel_format.is_numeric() {
            return Err(LabError::config("Marker stream must use the string channel format"));
        }
        if let Some(phase) = &self.initial_phase {
            if !self.phases.contains(phase) {
                return Err(LabError::config(format!(
                    "Initial phase '{}' is not defined in the phase graph",
                    phase
                )));
            }
        }
        Ok(())
    }

    /// Build an engine publishing to `outlet` on `clock`
    pub fn build_engine<C: Clock, O: MarkerOutlet>(&self, clock: C, outlet: O) -> LabResult<PhaseEngine<C, O>> {
        self.validate()?;
        if self.initial_phase.is_none() {
            debug!(phase = self.start_phase(), "No initial phase configured, using last declared phase");
        }
        PhaseEngine::new(self.phases.clone(), self.start_phase(), clock, outlet)
    }

    /// Export configuration to JSON
    pub fn to_json(&self) -> LabResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Import configuration from JSON
    pub fn from_json(json: &str) -> LabResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> LabResult<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self::motor_imagery()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eeg_core::{ManualClock, MemoryOutlet};

    #[test]
    fn test_motor_imagery_preset() {
        let config = MarkerConfig::motor_imagery();
        assert!(config.validate().is_ok());
        assert_eq!(config.start_phase(), "evaluate");
        assert_eq!(config.stream.name, "Test_Markers");
    }

    #[test]
    fn test_build_engine_uses_start_phase() {
        let clock = ManualClock::new(0.0);
        let outlet = MemoryOutlet::new();
        let mut engine = MarkerConfig::motor_imagery()
            .build_engine(clock, outlet.clone())
            .unwrap();

        assert_eq!(engine.tick("").map(|t| t.phase), Some("precue".to_string()));
        assert_eq!(outlet.marker_texts(), vec!["precue"]);
    }

    #[test]
    fn test_validation() {
        let mut config = MarkerConfig::motor_imagery();
        config.initial_phase = Some("rest".to_string());
        assert!(config.validate().is_err());

        let mut config = MarkerConfig::motor_imagery();
        config.stream.channel_count = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let mut config = MarkerConfig::motor_imagery();
        config.initial_phase = Some("go".to_string());
        config.label = "run1".to_string();

        let json = config.to_json().unwrap();
        let parsed = MarkerConfig::from_json(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_json_rejects_dangling_phase() {
        let json = r#"{
            "stream": {"name": "m", "stream_type": "Markers", "channel_count": 1,
                       "nominal_srate": 0.0, "channel_format": "string", "source_id": "m1"},
            "phases": {"rest": {"next": "task", "duration": 1.0}}
        }"#;
        assert!(MarkerConfig::from_json(json).is_err());
    }
}
