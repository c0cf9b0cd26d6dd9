//! Stream descriptor metadata
//!
//! A `StreamInfo` describes one published stream (markers or signal) the way
//! a recorder expects to discover it: identity, shape, rate and a free-form
//! description tree with manufacturer, per-channel and cap fields.

use crate::error::{LabError, LabResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Sample value format of a stream's channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelFormat {
    Float32,
    Double64,
    Int32,
    Int16,
    Int8,
    String,
}

impl ChannelFormat {
    /// Whether the format carries numeric samples
    pub fn is_numeric(&self) -> bool {
        !matches!(self, ChannelFormat::String)
    }
}

impl std::fmt::Display for ChannelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ChannelFormat::Float32 => "float32",
            ChannelFormat::Double64 => "double64",
            ChannelFormat::Int32 => "int32",
            ChannelFormat::Int16 => "int16",
            ChannelFormat::Int8 => "int8",
            ChannelFormat::String => "string",
        };
        f.write_str(name)
    }
}

/// Per-channel description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    pub label: String,
    pub unit: String,
    /// Channel type, e.g. "eeg"
    pub kind: String,
    pub scaling_factor: f64,
    /// X/Y/Z electrode position, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<[f64; 3]>,
}

/// EEG cap description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapDescriptor {
    pub name: String,
    pub size: String,
    pub label_scheme: String,
}

impl Default for CapDescriptor {
    fn default() -> Self {
        Self {
            name: "DummyCap".to_string(),
            size: "M".to_string(),
            label_scheme: "10-20".to_string(),
        }
    }
}

/// Free-form description block of a stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamDescription {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<ChannelDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cap: Option<CapDescriptor>,
    /// Additional user metadata (subject, session, ...)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

/// Descriptor of one published stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub name: String,
    pub stream_type: String,
    pub channel_count: usize,
    /// Nominal sampling rate in Hz, 0.0 for irregular streams
    pub nominal_srate: f64,
    pub channel_format: ChannelFormat,
    pub source_id: String,
    #[serde(default)]
    pub desc: StreamDescription,
}

impl StreamInfo {
    /// Create an EEG signal descriptor from channel labels
    ///
    /// Channel metadata (microvolts, scaling 1.0, type "eeg"), a default cap
    /// and the manufacturer field are filled in the same way a hardware
    /// amplifier would announce itself. Call `validate_signal` before
    /// streaming from it.
    pub fn eeg(
        name: impl Into<String>,
        nominal_srate: f64,
        channel_names: &[String],
        source_id: impl Into<String>,
    ) -> Self {
        let mut info = StreamInfo {
            name: name.into(),
            stream_type: "eeg".to_string(),
            channel_count: channel_names.len(),
            nominal_srate,
            channel_format: ChannelFormat::Float32,
            source_id: source_id.into(),
            desc: StreamDescription::default(),
        };
        info.desc.manufacturer = Some("DummyHiamp".to_string());
        info.desc.channels = channel_names
            .iter()
            .map(|label| ChannelDescriptor {
                label: label.clone(),
                unit: "microvolts".to_string(),
                kind: "eeg".to_string(),
                scaling_factor: 1.0,
                location: None,
            })
            .collect();
        info.desc.cap = Some(CapDescriptor::default());
        info
    }

    /// Create a single-channel, irregular-rate string marker descriptor
    ///
    /// A random source id is generated when none is supplied.
    pub fn markers(
        name: impl Into<String>,
        stream_type: impl Into<String>,
        source_id: Option<String>,
    ) -> Self {
        let source_id = source_id.unwrap_or_else(|| {
            let suffix = uuid::Uuid::new_v4().simple().to_string();
            format!("MarkersGenerator_{}", &suffix[..8])
        });

        StreamInfo {
            name: name.into(),
            stream_type: stream_type.into(),
            channel_count: 1,
            nominal_srate: 0.0,
            channel_format: ChannelFormat::String,
            source_id,
            desc: StreamDescription::default(),
        }
    }

    /// Channel labels in channel order
    pub fn channel_labels(&self) -> Vec<&str> {
        self.desc.channels.iter().map(|c| c.label.as_str()).collect()
    }

    /// Attach X/Y/Z positions to the channels, in channel order
    pub fn with_locations(mut self, locations: &[[f64; 3]]) -> LabResult<Self> {
        if locations.len() != self.desc.channels.len() {
            return Err(LabError::config(format!(
                "{} channel locations given for {} channels",
                locations.len(),
                self.desc.channels.len()
            )));
        }
        for (channel, location) in self.desc.channels.iter_mut().zip(locations) {
            channel.location = Some(*location);
        }
        Ok(self)
    }

    /// Overwrite unit, scaling factor and type of every channel
    pub fn with_channel_metadata(mut self, unit: &str, scaling_factor: f64, kind: &str) -> Self {
        for channel in &mut self.desc.channels {
            channel.unit = unit.to_string();
            channel.scaling_factor = scaling_factor;
            channel.kind = kind.to_string();
        }
        self
    }

    /// Replace the cap description
    pub fn with_cap(mut self, cap: CapDescriptor) -> Self {
        self.desc.cap = Some(cap);
        self
    }

    /// Rename channels using an old-label to new-label mapping
    ///
    /// Every key must name an existing channel; nothing is renamed otherwise.
    pub fn rename_channels(&mut self, mapping: &HashMap<String, String>) -> LabResult<()> {
        for old in mapping.keys() {
            if !self.desc.channels.iter().any(|c| &c.label == old) {
                return Err(LabError::config(format!("Unknown channel '{}'", old)));
            }
        }

        for channel in &mut self.desc.channels {
            if let Some(new) = mapping.get(&channel.label) {
                channel.label = new.clone();
            }
        }
        Ok(())
    }

    /// Merge free-form metadata into the description
    pub fn add_metadata<I, K, V>(&mut self, metadata: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.desc
            .extra
            .extend(metadata.into_iter().map(|(k, v)| (k.into(), v.into())));
    }

    /// Check the descriptor can carry a numeric signal
    pub fn validate_signal(&self) -> LabResult<()> {
        if self.channel_count == 0 {
            return Err(LabError::config("Signal stream needs at least one channel"));
        }
        if !self.nominal_srate.is_finite() || self.nominal_srate <= 0.0 {
            return Err(LabError::config(format!(
                "Sample rate must be positive, got {}",
                self.nominal_srate
            )));
        }
        if !self.channel_format.is_numeric() {
            return Err(LabError::config(format!(
                "Signal stream needs a numeric channel format, got {}",
                self.channel_format
            )));
        }
        if !self.desc.channels.is_empty() && self.desc.channels.len() != self.channel_count {
            return Err(LabError::config(format!(
                "Channel count {} does not match {} channel descriptors",
                self.channel_count,
                self.desc.channels.len()
            )));
        }
        Ok(())
    }

    /// Export the descriptor to JSON
    pub fn to_json(&self) -> LabResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_eeg_descriptor_defaults() {
        let info = StreamInfo::eeg("DummyHIAMP", 512.0, &labels(&["Fz", "Cz", "Pz"]), "Dummy2025");

        assert_eq!(info.stream_type, "eeg");
        assert_eq!(info.channel_count, 3);
        assert_eq!(info.channel_format, ChannelFormat::Float32);
        assert_eq!(info.channel_labels(), vec!["Fz", "Cz", "Pz"]);
        assert_eq!(info.desc.manufacturer.as_deref(), Some("DummyHiamp"));
        assert_eq!(info.desc.cap.as_ref().unwrap().label_scheme, "10-20");
        assert!(info.desc.channels.iter().all(|c| c.unit == "microvolts"));
    }

    #[test]
    fn test_eeg_descriptor_rejects_bad_config() {
        assert!(StreamInfo::eeg("x", 512.0, &labels(&["Cz"]), "id").validate_signal().is_ok());
        assert!(StreamInfo::eeg("x", 512.0, &[], "id").validate_signal().is_err());
        assert!(StreamInfo::eeg("x", 0.0, &labels(&["Cz"]), "id").validate_signal().is_err());
        assert!(StreamInfo::eeg("x", -5.0, &labels(&["Cz"]), "id").validate_signal().is_err());
        assert!(StreamInfo::eeg("x", f64::NAN, &labels(&["Cz"]), "id").validate_signal().is_err());

        let mut mismatched = StreamInfo::eeg("x", 512.0, &labels(&["Cz", "Pz"]), "id");
        mismatched.channel_count = 3;
        assert!(mismatched.validate_signal().is_err());
    }

    #[test]
    fn test_string_format_is_not_a_signal() {
        let mut info = StreamInfo::eeg("x", 256.0, &labels(&["Cz"]), "id");
        info.channel_format = ChannelFormat::String;
        assert!(info.validate_signal().is_err());
    }

    #[test]
    fn test_marker_descriptor() {
        let info = StreamInfo::markers("Test_Markers", "Markers", None);
        assert_eq!(info.channel_count, 1);
        assert_eq!(info.nominal_srate, 0.0);
        assert_eq!(info.channel_format, ChannelFormat::String);
        assert!(info.source_id.starts_with("MarkersGenerator_"));

        let named = StreamInfo::markers("m", "Markers", Some("fixed".to_string()));
        assert_eq!(named.source_id, "fixed");
    }

    #[test]
    fn test_locations_and_rename() {
        let mut info = StreamInfo::eeg("x", 256.0, &labels(&["CH1", "CH2"]), "id")
            .with_locations(&[[-0.07, 0.0, 0.06], [0.07, 0.0, 0.06]])
            .unwrap();
        assert_eq!(info.desc.channels[1].location, Some([0.07, 0.0, 0.06]));

        let mut mapping = HashMap::new();
        mapping.insert("CH1".to_string(), "Fz".to_string());
        info.rename_channels(&mapping).unwrap();
        assert_eq!(info.channel_labels(), vec!["Fz", "CH2"]);

        mapping.insert("CH9".to_string(), "Oz".to_string());
        assert!(info.rename_channels(&mapping).is_err());
        assert_eq!(info.channel_labels(), vec!["Fz", "CH2"]);

        assert!(info.clone().with_locations(&[[0.0, 0.0, 0.0]]).is_err());
    }

    #[test]
    fn test_metadata_and_json() {
        let mut info = StreamInfo::eeg("x", 256.0, &labels(&["Cz"]), "id")
            .with_channel_metadata("volts", 1e-6, "eeg");
        info.add_metadata([("subject", "S1")]);

        let json = info.to_json().unwrap();
        assert!(json.contains("\"subject\": \"S1\""));
        assert!(json.contains("\"channel_format\": \"float32\""));

        let parsed: StreamInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, info);
    }

    #[test]
    fn test_replace_cap() {
        let cap = CapDescriptor {
            name: "waveguard".to_string(),
            size: "L".to_string(),
            label_scheme: "10-10".to_string(),
        };
        let info = StreamInfo::eeg("x", 256.0, &labels(&["Cz"]), "id").with_cap(cap.clone());
        assert_eq!(info.desc.cap, Some(cap));
        assert!(info.to_json().unwrap().contains("\"label_scheme\": \"10-10\""));
    }
}
