//! Publish sinks for marker and signal streams
//!
//! The transport that actually ships samples to a recorder lives outside the
//! toolkit. Components only see these two traits; each component owns its
//! own outlet instance.

use crate::chunk::SampleChunk;
use crate::error::PublishError;
use crate::stream_info::StreamInfo;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

/// Sink for single-channel string markers
pub trait MarkerOutlet: Send {
    /// Publish one marker stamped with `timestamp`
    fn push_marker(&mut self, marker: &str, timestamp: f64) -> Result<(), PublishError>;
}

/// Sink for chunked multichannel samples
pub trait SampleOutlet: Send {
    /// Announce the stream before the first chunk
    fn open(&mut self, _info: &StreamInfo, _chunk_hint: usize) -> Result<(), PublishError> {
        Ok(())
    }

    /// Publish one chunk; the chunk carries its own capture timestamp
    fn push_chunk(&mut self, chunk: &SampleChunk) -> Result<(), PublishError>;

    /// Tear the stream down
    fn close(&mut self) {}
}

impl<T: MarkerOutlet + ?Sized> MarkerOutlet for Box<T> {
    fn push_marker(&mut self, marker: &str, timestamp: f64) -> Result<(), PublishError> {
        (**self).push_marker(marker, timestamp)
    }
}

impl<T: SampleOutlet + ?Sized> SampleOutlet for Box<T> {
    fn open(&mut self, info: &StreamInfo, chunk_hint: usize) -> Result<(), PublishError> {
        (**self).open(info, chunk_hint)
    }

    fn push_chunk(&mut self, chunk: &SampleChunk) -> Result<(), PublishError> {
        (**self).push_chunk(chunk)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// One published item, as seen by stream subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    Marker { text: String, timestamp: f64 },
    Chunk(SampleChunk),
}

/// Fan-out outlet backed by a tokio broadcast channel
///
/// Publishing with no live subscribers is not an error: nobody was listening.
#[derive(Debug, Clone)]
pub struct BroadcastOutlet {
    sender: broadcast::Sender<StreamMessage>,
}

impl BroadcastOutlet {
    /// Create an outlet buffering up to `capacity` unread messages per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Get a receiver for published messages
    pub fn subscribe(&self) -> broadcast::Receiver<StreamMessage> {
        self.sender.subscribe()
    }
}

impl MarkerOutlet for BroadcastOutlet {
    fn push_marker(&mut self, marker: &str, timestamp: f64) -> Result<(), PublishError> {
        // Ignore if no receivers
        let _ = self.sender.send(StreamMessage::Marker {
            text: marker.to_string(),
            timestamp,
        });
        Ok(())
    }
}

impl SampleOutlet for BroadcastOutlet {
    fn push_chunk(&mut self, chunk: &SampleChunk) -> Result<(), PublishError> {
        let _ = self.sender.send(StreamMessage::Chunk(chunk.clone()));
        Ok(())
    }
}

/// A recorded marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerRecord {
    pub marker: String,
    pub timestamp: f64,
}

#[derive(Debug, Default)]
struct MemoryState {
    markers: Vec<MarkerRecord>,
    chunks: Vec<SampleChunk>,
    opened: Option<(StreamInfo, usize)>,
    closed: bool,
    failing: bool,
}

/// Outlet that records everything it is given
///
/// Clones share one buffer, so a caller can keep a handle while the outlet
/// itself is moved into an engine or streamer.
#[derive(Debug, Clone, Default)]
pub struct MemoryOutlet {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryOutlet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every following push fail with `Rejected`, or stop doing so
    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }

    pub fn markers(&self) -> Vec<MarkerRecord> {
        self.lock().markers.clone()
    }

    /// Marker texts in publish order
    pub fn marker_texts(&self) -> Vec<String> {
        self.lock().markers.iter().map(|m| m.marker.clone()).collect()
    }

    pub fn chunks(&self) -> Vec<SampleChunk> {
        self.lock().chunks.clone()
    }

    /// Total time steps received across all chunks
    pub fn total_samples(&self) -> usize {
        self.lock().chunks.iter().map(SampleChunk::sample_count).sum()
    }

    /// Descriptor and chunk hint the outlet was opened with
    pub fn opened_with(&self) -> Option<(StreamInfo, usize)> {
        self.lock().opened.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl MarkerOutlet for MemoryOutlet {
    fn push_marker(&mut self, marker: &str, timestamp: f64) -> Result<(), PublishError> {
        let mut state = self.lock();
        if state.failing {
            return Err(PublishError::Rejected {
                reason: "memory outlet set to fail".to_string(),
            });
        }
        state.markers.push(MarkerRecord {
            marker: marker.to_string(),
            timestamp,
        });
        Ok(())
    }
}

impl SampleOutlet for MemoryOutlet {
    fn open(&mut self, info: &StreamInfo, chunk_hint: usize) -> Result<(), PublishError> {
        let mut state = self.lock();
        state.opened = Some((info.clone(), chunk_hint));
        state.closed = false;
        Ok(())
    }

    fn push_chunk(&mut self, chunk: &SampleChunk) -> Result<(), PublishError> {
        let mut state = self.lock();
        if state.failing {
            return Err(PublishError::Rejected {
                reason: "memory outlet set to fail".to_string(),
            });
        }
        if state.closed {
            return Err(PublishError::Disconnected);
        }
        state.chunks.push(chunk.clone());
        Ok(())
    }

    fn close(&mut self) {
        self.lock().closed = true;
    }
}

/// Outlet that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullOutlet;

impl MarkerOutlet for NullOutlet {
    fn push_marker(&mut self, _marker: &str, _timestamp: f64) -> Result<(), PublishError> {
        Ok(())
    }
}

impl SampleOutlet for NullOutlet {
    fn push_chunk(&mut self, _chunk: &SampleChunk) -> Result<(), PublishError> {
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum JsonRecord<'a> {
    Stream { info: &'a StreamInfo, chunk_hint: usize },
    Marker { marker: &'a str, timestamp: f64 },
    Chunk { timestamp: f64, samples: Vec<&'a [f32]> },
}

/// Outlet writing one JSON object per line
///
/// `open` writes the stream descriptor, every marker or chunk follows on its
/// own line. Chunks are written as rows of channel values.
#[derive(Debug)]
pub struct JsonLinesOutlet<W: Write + Send> {
    writer: W,
    closed: bool,
}

impl<W: Write + Send> JsonLinesOutlet<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            closed: false,
        }
    }

    /// Recover the underlying writer
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_record(&mut self, record: &JsonRecord<'_>) -> Result<(), PublishError> {
        if self.closed {
            return Err(PublishError::Disconnected);
        }
        let mut line = serde_json::to_string(record).map_err(|e| PublishError::Rejected {
            reason: e.to_string(),
        })?;
        // One write per record keeps lines whole on shared writers such as stdout
        line.push('\n');
        self.writer.write_all(line.as_bytes())?;
        Ok(())
    }
}

impl<W: Write + Send> MarkerOutlet for JsonLinesOutlet<W> {
    fn push_marker(&mut self, marker: &str, timestamp: f64) -> Result<(), PublishError> {
        self.write_record(&JsonRecord::Marker { marker, timestamp })?;
        self.writer.flush()?;
        Ok(())
    }
}

impl<W: Write + Send> SampleOutlet for JsonLinesOutlet<W> {
    fn open(&mut self, info: &StreamInfo, chunk_hint: usize) -> Result<(), PublishError> {
        self.closed = false;
        self.write_record(&JsonRecord::Stream { info, chunk_hint })
    }

    fn push_chunk(&mut self, chunk: &SampleChunk) -> Result<(), PublishError> {
        self.write_record(&JsonRecord::Chunk {
            timestamp: chunk.timestamp,
            samples: chunk.rows().collect(),
        })
    }

    fn close(&mut self) {
        if let Err(e) = self.writer.flush() {
            tracing::warn!(error = %e, "Failed to flush JSON lines outlet");
        }
        self.closed = true;
    }
}
