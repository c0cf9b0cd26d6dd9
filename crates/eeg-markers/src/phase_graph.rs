//! Directed graph of experiment phases

use eeg_core::{LabError, LabResult};
use indexmap::IndexMap;
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// One phase: how long to dwell in it and where to go afterwards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSpec {
    /// Successor phase name
    pub next: String,
    /// Dwell time in seconds
    pub duration: f64,
}

impl PhaseSpec {
    pub fn new(next: impl Into<String>, duration: f64) -> Self {
        Self {
            next: next.into(),
            duration,
        }
    }
}

/// Closed, immutable phase graph
///
/// Declaration order is preserved. Every `next` names a phase of the graph;
/// cycles are expected and phases reachable only by an explicit jump are
/// allowed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "PhaseEntries",
    into = "IndexMap<String, PhaseSpec>"
)]
pub struct PhaseGraph {
    phases: IndexMap<String, PhaseSpec>,
}

impl PhaseGraph {
    /// Validate and wrap a phase map
    pub fn new(phases: IndexMap<String, PhaseSpec>) -> LabResult<Self> {
        if phases.is_empty() {
            return Err(LabError::config("Phase graph has no phases"));
        }

        for (name, spec) in &phases {
            if !spec.duration.is_finite() || spec.duration <= 0.0 {
                return Err(LabError::config(format!(
                    "Phase '{}' has non-positive duration {}",
                    name, spec.duration
                )));
            }
            if !phases.contains_key(&spec.next) {
                return Err(LabError::config(format!(
                    "Phase '{}' points to unknown phase '{}'",
                    name, spec.next
                )));
            }
        }

        Ok(Self { phases })
    }

    /// Build a graph from `(name, next, duration)` triples in declaration order
    pub fn from_phases<I, N, M>(phases: I) -> LabResult<Self>
    where
        I: IntoIterator<Item = (N, M, f64)>,
        N: Into<String>,
        M: Into<String>,
    {
        let mut map = IndexMap::new();
        for (name, next, duration) in phases {
            let name = name.into();
            if map.insert(name.clone(), PhaseSpec::new(next, duration)).is_some() {
                return Err(LabError::config(format!("Phase '{}' declared twice", name)));
            }
        }
        Self::new(map)
    }

    pub fn get(&self, name: &str) -> Option<&PhaseSpec> {
        self.phases.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.phases.contains_key(name)
    }

    /// Successor of `name`
    pub fn next_of(&self, name: &str) -> Option<&str> {
        self.phases.get(name).map(|spec| spec.next.as_str())
    }

    /// Dwell time of `name`
    pub fn duration_of(&self, name: &str) -> Option<f64> {
        self.phases.get(name).map(|spec| spec.duration)
    }

    /// Phase names in declaration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.phases.keys().map(String::as_str)
    }

    /// Last declared phase, the legacy implicit start phase
    pub fn last_declared(&self) -> &str {
        // A validated graph is never empty
        self.phases.keys().last().map_or("", String::as_str)
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// The cycle eventually entered when following `next` edges from `start`
    ///
    /// Returns the cycle's phases in traversal order, starting at the first
    /// phase of the cycle that is reached. Empty if `start` is unknown.
    pub fn cycle_from(&self, start: &str) -> Vec<&str> {
        let Some((key, _)) = self.phases.get_key_value(start) else {
            return Vec::new();
        };

        let mut path: Vec<&str> = Vec::new();
        let mut current = key.as_str();
        loop {
            if let Some(pos) = path.iter().position(|&seen| seen == current) {
                return path.split_off(pos);
            }
            path.push(current);
            match self.next_of(current) {
                Some(next) => current = next,
                None => return Vec::new(),
            }
        }
    }
}

/// Phase map entries as written, duplicate names included
struct PhaseEntries(Vec<(String, PhaseSpec)>);

impl<'de> Deserialize<'de> for PhaseEntries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = PhaseEntries;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of phase names to phases")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<String, PhaseSpec>()? {
                    entries.push(entry);
                }
                Ok(PhaseEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

impl TryFrom<PhaseEntries> for PhaseGraph {
    type Error = LabError;

    fn try_from(entries: PhaseEntries) -> Result<Self, Self::Error> {
        PhaseGraph::from_phases(entries.0.into_iter().map(|(name, spec)| (name, spec.next, spec.duration)))
    }
}

impl From<PhaseGraph> for IndexMap<String, PhaseSpec> {
    fn from(graph: PhaseGraph) -> Self {
        graph.phases
    }
}
