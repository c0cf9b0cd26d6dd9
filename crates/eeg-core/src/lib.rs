//! EEG-Core: Foundation types for the EEG lab toolkit
//!
//! Shared clock, outlet and descriptor types used by the marker and
//! simulation crates.

pub mod chunk;
pub mod clock;
pub mod error;
pub mod montage;
pub mod outlet;
pub mod stats;
pub mod stream_info;

pub use chunk::SampleChunk;
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use error::{LabError, LabResult, PublishError};
pub use montage::Montage;
pub use outlet::*;
pub use stats::{ChannelStats, IntervalStats};
pub use stream_info::*;
