//! Phase engine: timed experiment phases with one marker per transition
//!
//! The engine is polled by a harness (GUI timer, script loop...). `tick`
//! moves to the next phase once the current phase's duration has run out,
//! `advance` moves immediately and `jump` teleports to any phase.
//!
//! Marker delivery never affects timing: a transition is committed before its
//! marker is published, and a failed publish is logged and reported on the
//! returned `Transition` without rolling anything back.

use crate::phase_graph::PhaseGraph;
use eeg_core::{Clock, LabError, LabResult, MarkerOutlet};
use tracing::{debug, error, warn};

/// Timing state of a `PhaseEngine`
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseEngineState {
    pub current_phase: String,
    /// Absolute time after which `tick` transitions
    pub next_transition_deadline: f64,
    pub creation_time: f64,
    /// Real time spent across all left phases since creation
    pub accumulated_active_time: f64,
    pub last_transition_time: f64,
}

/// Outcome of one transition
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// Phase that was left
    pub from: String,
    /// Phase that was entered
    pub phase: String,
    /// Published marker text
    pub marker: String,
    /// Clock time of the transition
    pub timestamp: f64,
    /// Whether the outlet accepted the marker
    pub delivered: bool,
}

/// Marker text for entering `phase` with an optional label
pub fn format_marker(phase: &str, label: &str) -> String {
    if label.is_empty() {
        phase.to_string()
    } else {
        format!("{}_{}", phase, label)
    }
}

/// Deterministic, single-threaded phase state machine
pub struct PhaseEngine<C: Clock, O: MarkerOutlet> {
    graph: PhaseGraph,
    clock: C,
    outlet: O,
    state: PhaseEngineState,
}

impl<C: Clock, O: MarkerOutlet> PhaseEngine<C, O> {
    /// Create an engine sitting in `initial_phase`
    ///
    /// The first deadline lies in the past, so the first `tick` transitions
    /// straight away to the successor of `initial_phase`.
    pub fn new(graph: PhaseGraph, initial_phase: &str, clock: C, outlet: O) -> LabResult<Self> {
        if !graph.contains(initial_phase) {
            return Err(LabError::config(format!(
                "Initial phase '{}' is not defined in the phase graph",
                initial_phase
            )));
        }

        let now = clock.now();
        debug!(phase = initial_phase, phases = graph.len(), "Phase engine created");

        Ok(PhaseEngine {
            state: PhaseEngineState {
                current_phase: initial_phase.to_string(),
                next_transition_deadline: f64::NEG_INFINITY,
                creation_time: now,
                accumulated_active_time: 0.0,
                last_transition_time: now,
            },
            graph,
            clock,
            outlet,
        })
    }

    /// Create an engine starting in the last declared phase
    pub fn from_last_declared(graph: PhaseGraph, clock: C, outlet: O) -> LabResult<Self> {
        let initial = graph.last_declared().to_string();
        Self::new(graph, &initial, clock, outlet)
    }

    /// Move to the successor of the current phase now
    pub fn advance(&mut self, label: &str) -> Transition {
        let now = self.clock.now();
        let next = self
            .graph
            .next_of(&self.state.current_phase)
            .unwrap_or(self.state.current_phase.as_str())
            .to_string();
        self.enter(next, now, label)
    }

    /// Advance if the current phase's deadline has passed
    ///
    /// Returns `None` when nothing was due.
    pub fn tick(&mut self, label: &str) -> Option<Transition> {
        let now = self.clock.now();
        if now > self.state.next_transition_deadline {
            let next = self
                .graph
                .next_of(&self.state.current_phase)
                .unwrap_or(self.state.current_phase.as_str())
                .to_string();
            Some(self.enter(next, now, label))
        } else {
            None
        }
    }

    /// Force the engine into `phase`, bypassing the graph's edges
    ///
    /// Time spent in the phase being left counts towards the accumulated
    /// time, the same as for `advance`. Unknown phases leave the engine
    /// untouched and publish nothing.
    pub fn jump(&mut self, phase: &str, label: &str) -> LabResult<Transition> {
        if !self.graph.contains(phase) {
            error!(phase, "Phase not found in the phase graph");
            return Err(LabError::InvalidPhase {
                phase: phase.to_string(),
            });
        }

        let now = self.clock.now();
        Ok(self.enter(phase.to_string(), now, label))
    }

    fn enter(&mut self, phase: String, now: f64, label: &str) -> Transition {
        let duration = self.graph.duration_of(&phase).unwrap_or(0.0);

        self.state.accumulated_active_time += now - self.state.last_transition_time;
        self.state.last_transition_time = now;
        let from = std::mem::replace(&mut self.state.current_phase, phase);
        self.state.next_transition_deadline = now + duration;

        let marker = format_marker(&self.state.current_phase, label);
        let delivered = match self.outlet.push_marker(&marker, now) {
            Ok(()) => true,
            Err(e) => {
                warn!(marker = %marker, error = %e, "Failed to publish marker");
                false
            }
        };

        debug!(
            from = %from,
            phase = %self.state.current_phase,
            accumulated = self.state.accumulated_active_time,
            "Phase transition"
        );

        Transition {
            from,
            phase: self.state.current_phase.clone(),
            marker,
            timestamp: now,
            delivered,
        }
    }

    /// Seconds since the engine was created
    pub fn elapsed_time(&self) -> f64 {
        self.clock.now() - self.state.creation_time
    }

    /// Seconds accumulated across transitions
    pub fn accumulated_time(&self) -> f64 {
        self.state.accumulated_active_time
    }

    pub fn current_phase(&self) -> &str {
        &self.state.current_phase
    }

    pub fn next_transition_deadline(&self) -> f64 {
        self.state.next_transition_deadline
    }

    /// Seconds left before `tick` transitions, zero once overdue
    pub fn time_until_transition(&self) -> f64 {
        (self.state.next_transition_deadline - self.clock.now()).max(0.0)
    }

    pub fn state(&self) -> &PhaseEngineState {
        &self.state
    }

    pub fn graph(&self) -> &PhaseGraph {
        &self.graph
    }

    pub fn outlet(&self) -> &O {
        &self.outlet
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eeg_core::{ManualClock, MemoryOutlet};
    use proptest::prelude::*;

    fn ab_graph() -> PhaseGraph {
        PhaseGraph::from_phases([("A", "B", 1.0), ("B", "A", 0.5)]).unwrap()
    }

    fn setup(graph: PhaseGraph) -> (PhaseEngine<ManualClock, MemoryOutlet>, ManualClock, MemoryOutlet) {
        let clock = ManualClock::new(100.0);
        let outlet = MemoryOutlet::new();
        let engine = PhaseEngine::from_last_declared(graph, clock.clone(), outlet.clone()).unwrap();
        (engine, clock, outlet)
    }

    #[test]
    fn test_tick_follows_durations() {
        let (mut engine, clock, outlet) = setup(ab_graph());
        assert_eq!(engine.current_phase(), "B");
        assert_eq!(engine.next_transition_deadline(), f64::NEG_INFINITY);

        let first = engine.tick("").unwrap();
        assert_eq!((first.from.as_str(), first.phase.as_str()), ("B", "A"));
        assert_eq!(engine.next_transition_deadline(), 101.0);

        clock.advance(0.5);
        assert!(engine.tick("").is_none());

        clock.advance(0.6);
        let second = engine.tick("").unwrap();
        assert_eq!(second.phase, "B");
        assert_eq!(outlet.marker_texts(), vec!["A", "B"]);
    }

    #[test]
    fn test_tick_at_exact_deadline_waits() {
        let (mut engine, clock, _) = setup(ab_graph());
        engine.advance("");
        clock.advance(1.0);
        assert!(engine.tick("").is_none());
        clock.advance(1e-6);
        assert!(engine.tick("").is_some());
    }

    #[test]
    fn test_tick_idempotent_within_instant() {
        let (mut engine, _, outlet) = setup(ab_graph());
        assert!(engine.tick("").is_some());
        assert!(engine.tick("").is_none());
        assert_eq!(outlet.markers().len(), 1);
    }

    #[test]
    fn test_jump_publishes_label() {
        let (mut engine, clock, outlet) = setup(ab_graph());
        engine.advance("");
        clock.advance(0.3);

        let transition = engine.jump("A", "manual").unwrap();
        assert_eq!(transition.marker, "A_manual");
        assert_eq!(transition.from, "A");
        assert!((engine.next_transition_deadline() - 101.3).abs() < 1e-9);
        assert_eq!(outlet.marker_texts(), vec!["A", "A_manual"]);
    }

    #[test]
    fn test_jump_to_unknown_phase_changes_nothing() {
        let (mut engine, clock, outlet) = setup(ab_graph());
        engine.advance("");
        let before = engine.state().clone();
        clock.advance(0.2);

        let result = engine.jump("C", "manual");
        assert!(matches!(result, Err(LabError::InvalidPhase { ref phase }) if phase == "C"));
        assert_eq!(engine.state(), &before);
        assert_eq!(outlet.markers().len(), 1);
    }

    #[test]
    fn test_accumulated_time_sums_delays() {
        let (mut engine, clock, _) = setup(ab_graph());
        let delays = [0.25, 1.5, 0.125, 2.0];
        for delay in delays {
            clock.advance(delay);
            engine.advance("");
        }
        let expected: f64 = delays.iter().sum();
        assert!((engine.accumulated_time() - expected).abs() < 1e-9);
        assert!((engine.elapsed_time() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_jump_accumulates_time() {
        let (mut engine, clock, _) = setup(ab_graph());
        clock.advance(1.0);
        engine.advance("");
        clock.advance(0.75);
        engine.jump("B", "").unwrap();
        assert!((engine.accumulated_time() - 1.75).abs() < 1e-9);
    }

    #[test]
    fn test_publish_failure_keeps_transition() {
        let (mut engine, clock, outlet) = setup(ab_graph());
        outlet.set_failing(true);

        let transition = engine.advance("cue");
        assert!(!transition.delivered);
        assert_eq!(transition.marker, "A_cue");
        assert_eq!(engine.current_phase(), "A");
        assert_eq!(engine.next_transition_deadline(), 101.0);

        outlet.set_failing(false);
        clock.advance(1.5);
        let next = engine.tick("").unwrap();
        assert!(next.delivered);
        assert_eq!(engine.outlet().marker_texts(), vec!["B"]);
    }

    #[test]
    fn test_explicit_initial_phase() {
        let clock = ManualClock::new(0.0);
        let mut engine = PhaseEngine::new(ab_graph(), "A", clock, MemoryOutlet::new()).unwrap();
        assert_eq!(engine.advance("").phase, "B");

        let missing = PhaseEngine::new(ab_graph(), "Z", ManualClock::new(0.0), MemoryOutlet::new());
        assert!(missing.is_err());
    }

    #[test]
    fn test_time_until_transition() {
        let (mut engine, clock, _) = setup(ab_graph());
        assert_eq!(engine.time_until_transition(), 0.0);
        engine.advance("");
        clock.advance(0.25);
        assert!((engine.time_until_transition() - 0.75).abs() < 1e-9);
    }

    fn ring(len: usize, durations: &[f64]) -> PhaseGraph {
        PhaseGraph::from_phases((0..len).map(|i| {
            (format!("p{}", i), format!("p{}", (i + 1) % len), durations[i % durations.len()])
        }))
        .unwrap()
    }

    proptest! {
        #[test]
        fn prop_advance_follows_edges(len in 1usize..8, laps in 1usize..4, durations in prop::collection::vec(0.01f64..5.0, 1..8)) {
            let graph = ring(len, &durations);
            let clock = ManualClock::new(0.0);
            let mut engine = PhaseEngine::new(graph.clone(), "p0", clock, MemoryOutlet::new()).unwrap();

            let mut visited = Vec::new();
            for _ in 0..len * laps {
                let expected = graph.next_of(engine.current_phase()).unwrap().to_string();
                let transition = engine.advance("");
                prop_assert_eq!(&transition.phase, &expected);
                visited.push(transition.phase);
            }

            for (i, phase) in visited.iter().enumerate() {
                prop_assert_eq!(phase, &visited[i % len]);
            }
            prop_assert_eq!(visited.last().map(String::as_str), Some("p0"));
        }

        #[test]
        fn prop_tick_transitions_once_per_instant(len in 1usize..6, polls in 2usize..6) {
            let clock = ManualClock::new(5.0);
            let outlet = MemoryOutlet::new();
            let mut engine = PhaseEngine::new(ring(len, &[1.0]), "p0", clock, outlet.clone()).unwrap();

            let fired = (0..polls).filter(|_| engine.tick("").is_some()).count();
            prop_assert_eq!(fired, 1);
            prop_assert_eq!(outlet.markers().len(), 1);
        }
    }
}
