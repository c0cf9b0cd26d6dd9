//! Descriptive statistics for signal channels and timer intervals

use serde::{Deserialize, Serialize};

/// Basic statistics for a signal channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelStats {
    pub mean: f32,
    pub rms: f32,
    pub std_dev: f32,
    pub min: f32,
    pub max: f32,
    pub peak_to_peak: f32,
}

impl ChannelStats {
    pub fn calculate(data: &[f32]) -> Self {
        if data.is_empty() {
            return Self {
                mean: 0.0,
                rms: 0.0,
                std_dev: 0.0,
                min: 0.0,
                max: 0.0,
                peak_to_peak: 0.0,
            };
        }

        let n = data.len() as f32;
        let mean = data.iter().sum::<f32>() / n;
        let rms = (data.iter().map(|x| x * x).sum::<f32>() / n).sqrt();
        let std_dev = (data.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / n).sqrt();

        let min = data.iter().fold(f32::INFINITY, |a, &b| a.min(b));
        let max = data.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));

        Self {
            mean,
            rms,
            std_dev,
            min,
            max,
            peak_to_peak: max - min,
        }
    }
}

/// Summary of a series of intervals, e.g. the gaps between timer callbacks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntervalStats {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

impl IntervalStats {
    /// Summarize a list of intervals
    pub fn calculate(intervals: &[f64]) -> Self {
        if intervals.is_empty() {
            return Self::default();
        }

        let n = intervals.len() as f64;
        let mean = intervals.iter().sum::<f64>() / n;
        let std_dev = (intervals.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n).sqrt();

        let mut sorted = intervals.to_vec();
        sorted.sort_by(f64::total_cmp);
        let mid = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        };

        Self {
            count: intervals.len(),
            mean,
            median,
            std_dev,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
        }
    }

    /// Summarize the gaps between consecutive timestamps
    pub fn from_timestamps(timestamps: &[f64]) -> Self {
        let intervals: Vec<f64> = timestamps.windows(2).map(|w| w[1] - w[0]).collect();
        Self::calculate(&intervals)
    }
}
