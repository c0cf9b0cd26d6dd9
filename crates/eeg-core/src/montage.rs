//! Electrode montage loading
//!
//! Reads `.sfp` style files: one electrode per line, `label X Y Z`, separated
//! by tabs or spaces.

use crate::error::{LabError, LabResult};
use crate::stream_info::StreamInfo;
use std::io::BufRead;
use std::path::Path;

/// Electrode labels with their 3D positions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Montage {
    pub labels: Vec<String>,
    pub positions: Vec<[f64; 3]>,
}

impl Montage {
    /// Parse a montage from any buffered reader
    pub fn from_sfp<R: BufRead>(reader: R) -> LabResult<Self> {
        let mut montage = Montage::default();

        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != 4 {
                return Err(LabError::config(format!(
                    "Montage line {}: expected 'label X Y Z', got {} fields",
                    idx + 1,
                    fields.len()
                )));
            }

            let mut position = [0.0; 3];
            for (axis, raw) in position.iter_mut().zip(&fields[1..]) {
                *axis = raw.parse().map_err(|_| {
                    LabError::config(format!(
                        "Montage line {}: '{}' is not a number",
                        idx + 1,
                        raw
                    ))
                })?;
            }

            montage.labels.push(fields[0].to_string());
            montage.positions.push(position);
        }

        if montage.labels.is_empty() {
            return Err(LabError::config("Montage contains no electrodes"));
        }
        Ok(montage)
    }

    /// Load a montage file from disk
    pub fn load(path: impl AsRef<Path>) -> LabResult<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_sfp(std::io::BufReader::new(file))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Build an EEG descriptor with one located channel per electrode
    pub fn into_stream_info(
        self,
        name: impl Into<String>,
        nominal_srate: f64,
        source_id: impl Into<String>,
    ) -> LabResult<StreamInfo> {
        let info = StreamInfo::eeg(name, nominal_srate, &self.labels, source_id)
            .with_locations(&self.positions)?;
        info.validate_signal()?;
        Ok(info)
    }
}
