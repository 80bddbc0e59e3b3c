//! Response transport for streamed action output.
//!
//! The interaction protocol writes fragments through a [`ResponseWriter`];
//! HTTP adapters provide one. [`ChannelWriter`] forwards flushed chunks to an
//! mpsc channel that a streaming response body drains. [`MemoryWriter`] keeps
//! everything in memory for tests.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;

use crate::error::TransportError;

/// Headers an HTTP adapter sets on a streamed action response.
pub const STREAM_HEADERS: [(&str, &str); 2] = [
    ("Cache-Control", "no-store"),
    ("Transfer-Encoding", "chunked"),
];

/// Sink for streamed action output.
///
/// `write` may buffer; `flush` must push everything written so far to the
/// client before returning.
#[async_trait]
pub trait ResponseWriter: Send + Sync {
    async fn write(&self, chunk: Bytes) -> Result<(), TransportError>;

    async fn flush(&self) -> Result<(), TransportError>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Buffers writes and sends them down an mpsc channel on flush.
pub struct ChannelWriter {
    tx: mpsc::Sender<Bytes>,
    buffer: Mutex<BytesMut>,
}

impl ChannelWriter {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self {
            tx,
            buffer: Mutex::new(BytesMut::new()),
        }
    }

    /// A writer and the receiving end of its channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl ResponseWriter for ChannelWriter {
    async fn write(&self, chunk: Bytes) -> Result<(), TransportError> {
        if self.tx.is_closed() {
            return Err(TransportError::Closed);
        }
        lock(&self.buffer).extend_from_slice(&chunk);
        Ok(())
    }

    async fn flush(&self) -> Result<(), TransportError> {
        let chunk = lock(&self.buffer).split().freeze();
        if chunk.is_empty() {
            return Ok(());
        }
        self.tx
            .send(chunk)
            .await
            .map_err(|_| TransportError::Closed)
    }
}

/// Records every flushed chunk in memory.
#[derive(Default, Clone)]
pub struct MemoryWriter {
    pending: Arc<Mutex<BytesMut>>,
    flushed: Arc<Mutex<Vec<Bytes>>>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chunks delivered by each flush, in order.
    pub fn chunks(&self) -> Vec<Bytes> {
        lock(&self.flushed).clone()
    }

    /// Everything flushed so far as one string.
    pub fn body(&self) -> String {
        lock(&self.flushed)
            .iter()
            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
            .collect()
    }
}

#[async_trait]
impl ResponseWriter for MemoryWriter {
    async fn write(&self, chunk: Bytes) -> Result<(), TransportError> {
        lock(&self.pending).extend_from_slice(&chunk);
        Ok(())
    }

    async fn flush(&self) -> Result<(), TransportError> {
        let chunk = lock(&self.pending).split().freeze();
        if !chunk.is_empty() {
            lock(&self.flushed).push(chunk);
        }
        Ok(())
    }
}
