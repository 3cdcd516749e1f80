//! Append-only accumulation of the chunks delivered by notifications.
//!
//! The transport never touches the accumulated buffer directly. It is handed a [`ChunkSender`],
//! which pushes chunks onto an ordered queue, and the [`AccumulatorSink`] drains that queue into
//! its buffer while the session is streaming. Chunks therefore end up in the buffer in exactly the
//! order in which `append` was called.

use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// One notification value as it was received, tagged with where and when it came from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Chunk {
    /// The characteristic which sent the notification.
    pub characteristic: Uuid,
    /// When the chunk was handed to the sink.
    pub received_at: Instant,
    pub data: Vec<u8>,
}

/// The sink has been frozen, so the chunk was not accepted.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("Accumulator is frozen, dropped chunk of {length} bytes")]
pub struct SinkFrozen {
    pub length: usize,
}

/// A cheaply cloneable handle for appending chunks to an [`AccumulatorSink`] from a notification
/// callback or another task.
#[derive(Clone, Debug)]
pub struct ChunkSender {
    sender: mpsc::UnboundedSender<Chunk>,
}

impl ChunkSender {
    /// Append a chunk to the tail of the sink's queue. Never blocks.
    pub fn append(&self, characteristic: Uuid, data: Vec<u8>) -> Result<(), SinkFrozen> {
        let chunk = Chunk {
            characteristic,
            received_at: Instant::now(),
            data,
        };
        self.sender.send(chunk).map_err(|e| SinkFrozen {
            length: e.0.data.len(),
        })
    }

    /// Returns true once the sink has been frozen and will accept no more chunks.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Accumulates the chunks received for one data characteristic.
#[derive(Debug)]
pub struct AccumulatorSink {
    characteristic: Uuid,
    sender: mpsc::UnboundedSender<Chunk>,
    receiver: mpsc::UnboundedReceiver<Chunk>,
    raw_stream: Vec<Chunk>,
    buffer: Vec<u8>,
    frozen: bool,
}

impl AccumulatorSink {
    /// Create an empty sink which accumulates values from the given data characteristic.
    pub fn new(characteristic: Uuid) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            characteristic,
            sender,
            receiver,
            raw_stream: vec![],
            buffer: vec![],
            frozen: false,
        }
    }

    /// The data characteristic whose chunks make up the buffer.
    pub fn characteristic(&self) -> Uuid {
        self.characteristic
    }

    /// Get a new handle for appending chunks. Handles taken from a frozen sink are already closed.
    pub fn sender(&self) -> ChunkSender {
        ChunkSender {
            sender: self.sender.clone(),
        }
    }

    /// Add a chunk to the tail of the raw stream. Only chunks from the data characteristic are
    /// added to the buffer.
    ///
    /// Returns false if the sink is frozen, in which case the chunk is dropped.
    pub fn append(&mut self, chunk: Chunk) -> bool {
        if self.frozen {
            log::warn!(
                "Dropping chunk of {} bytes from {} received after freeze",
                chunk.data.len(),
                chunk.characteristic
            );
            return false;
        }
        log::trace!(
            "Received {} bytes from {}: {:02X?}",
            chunk.data.len(),
            chunk.characteristic,
            chunk.data
        );
        if chunk.characteristic == self.characteristic {
            self.buffer.extend_from_slice(&chunk.data);
        }
        self.raw_stream.push(chunk);
        true
    }

    /// Move every chunk which is already waiting in the queue into the buffer, in queue order.
    /// Returns how many chunks were moved.
    pub fn drain_queued(&mut self) -> usize {
        let mut count = 0;
        while let Ok(chunk) = self.receiver.try_recv() {
            if self.append(chunk) {
                count += 1;
            }
        }
        count
    }

    /// Wait for the next chunk to arrive on the queue and append it, returning its length.
    ///
    /// Resolves to `None` if the sink is frozen.
    pub async fn receive(&mut self) -> Option<usize> {
        if self.frozen {
            return None;
        }
        let chunk = self.receiver.recv().await?;
        let length = chunk.data.len();
        self.append(chunk).then_some(length)
    }

    /// A copy of the buffer as it currently stands, including anything already queued.
    pub fn snapshot(&mut self) -> Vec<u8> {
        if !self.frozen {
            self.drain_queued();
        }
        self.buffer.clone()
    }

    /// Stop accepting chunks and return the final buffer.
    ///
    /// Chunks which were queued before the call are still included. Calling this again returns the
    /// same buffer.
    pub fn freeze(&mut self) -> &[u8] {
        if !self.frozen {
            self.receiver.close();
            self.drain_queued();
            self.frozen = true;
            log::debug!(
                "Froze accumulator with {} bytes in {} chunks",
                self.buffer.len(),
                self.raw_stream.len()
            );
        }
        &self.buffer
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// The number of bytes accumulated so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// All chunks received so far, in arrival order.
    pub fn raw_stream(&self) -> &[Chunk] {
        &self.raw_stream
    }

    /// Freeze the sink and hand over the raw stream and the accumulated buffer.
    pub fn into_parts(mut self) -> (Vec<Chunk>, Vec<u8>) {
        self.freeze();
        (self.raw_stream, self.buffer)
    }
}
