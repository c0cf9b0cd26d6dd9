//! SampleChunk: container for a batch of multichannel samples

use crate::error::{LabError, LabResult};
use crate::stats::ChannelStats;

/// Batch of samples delivered with one capture timestamp
///
/// Data is samples-major, channels-minor: row `i` holds sample `i` of every
/// channel, `[s0c0, s0c1, ..., s1c0, s1c1, ...]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleChunk {
    /// Interleaved sample data
    pub data: Vec<f32>,
    /// Number of channels per row
    pub channel_count: usize,
    /// Capture time of the chunk, seconds on the session clock
    pub timestamp: f64,
}

impl SampleChunk {
    /// Create a chunk from interleaved data
    pub fn new(data: Vec<f32>, channel_count: usize, timestamp: f64) -> LabResult<Self> {
        if channel_count == 0 {
            return Err(LabError::config("Chunk needs at least one channel"));
        }
        if data.len() % channel_count != 0 {
            return Err(LabError::config(format!(
                "Data length {} is not a multiple of {} channels",
                data.len(),
                channel_count
            )));
        }

        Ok(SampleChunk {
            data,
            channel_count,
            timestamp,
        })
    }

    /// Build a chunk from per-channel columns of equal length
    pub fn from_channels(channels: &[Vec<f32>], timestamp: f64) -> LabResult<Self> {
        let channel_count = channels.len();
        let samples = channels.first().map_or(0, Vec::len);
        if channels.iter().any(|c| c.len() != samples) {
            return Err(LabError::config("Channel columns differ in length"));
        }

        let mut data = Vec::with_capacity(samples * channel_count);
        for sample_idx in 0..samples {
            for channel in channels {
                data.push(channel[sample_idx]);
            }
        }

        SampleChunk::new(data, channel_count, timestamp)
    }

    /// Number of time steps in the chunk
    pub fn sample_count(&self) -> usize {
        self.data.len() / self.channel_count
    }

    /// Whether the chunk holds no samples
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// `(samples, channels)`
    pub fn shape(&self) -> (usize, usize) {
        (self.sample_count(), self.channel_count)
    }

    /// One time step across all channels
    pub fn row(&self, sample_index: usize) -> Option<&[f32]> {
        let start = sample_index.checked_mul(self.channel_count)?;
        self.data.get(start..start + self.channel_count)
    }

    /// Iterate over time steps
    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.channel_count)
    }

    /// Get data for a specific channel
    pub fn channel_data(&self, channel_index: usize) -> LabResult<Vec<f32>> {
        if channel_index >= self.channel_count {
            return Err(LabError::config(format!(
                "Channel index {} out of bounds (0-{})",
                channel_index,
                self.channel_count - 1
            )));
        }

        Ok(self.rows().map(|row| row[channel_index]).collect())
    }

    /// Basic statistics for a channel
    pub fn channel_stats(&self, channel_index: usize) -> LabResult<ChannelStats> {
        let data = self.channel_data(channel_index)?;
        Ok(ChannelStats::calculate(&data))
    }
}
