//! # Transport Layer
//!
//! The router never touches sockets. It sends through the [`Transport`]
//! trait: `send` reaches every connection, `send_to` one of them. Both must
//! return without waiting on the network, since the router calls them from
//! inside a synchronous handler pipeline.
//!
//! [`ConnectionRegistry`] implements the trait over bounded per-connection
//! writer queues, and [`tcp`] drives it from a Tokio TCP listener. A peer
//! that stops reading loses frames once its queue is full; other peers are
//! unaffected.

pub mod tcp;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace, warn};

use crate::config::ServerConfig;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::authority::ConnectionId;
use crate::utils::metrics::Metrics;

/// Frames buffered per connection when no capacity is configured.
pub const DEFAULT_WRITER_QUEUE_CAPACITY: usize = 256;

/// Outbound half of the byte-stream transport, as the router sees it.
pub trait Transport: Send + Sync {
    /// Send a frame to every open connection.
    fn send(&self, frame: Bytes) -> Result<()>;

    /// Send a frame to one connection.
    fn send_to(&self, connection: ConnectionId, frame: Bytes) -> Result<()>;
}

type Writers = HashMap<ConnectionId, mpsc::Sender<Bytes>>;

/// Writer queues of all open connections.
#[derive(Debug)]
pub struct ConnectionRegistry {
    writers: Mutex<Writers>,
    capacity: usize,
    metrics: Arc<Metrics>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_WRITER_QUEUE_CAPACITY)
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose writer queues hold at most `capacity` frames each.
    /// A capacity of zero is raised to one.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            writers: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::with_capacity(config.writer_queue_capacity)
    }

    /// Count dropped frames in `metrics` instead of a private collector.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Shared handle to the collector dropped frames are counted in.
    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> Result<MutexGuard<'_, Writers>> {
        self.writers
            .lock()
            .map_err(|_| ProtocolError::TransportError(constants::ERR_REGISTRY_LOCK.into()))
    }

    /// Register a connection and return the receiving end of its queue.
    pub fn register(&self, connection: ConnectionId) -> Result<mpsc::Receiver<Bytes>> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.lock()?.insert(connection, tx);
        debug!(connection, capacity = self.capacity, "Writer registered");
        Ok(rx)
    }

    pub fn unregister(&self, connection: ConnectionId) -> Result<()> {
        self.lock()?.remove(&connection);
        debug!(connection, "Writer unregistered");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lock().map(|w| w.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Transport for ConnectionRegistry {
    fn send(&self, frame: Bytes) -> Result<()> {
        let writers = self.lock()?;
        for (connection, tx) in writers.iter() {
            match tx.try_send(frame.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.metrics.frame_dropped();
                    warn!(connection, "Writer queue full, dropping broadcast frame");
                }
                Err(TrySendError::Closed(_)) => {
                    trace!(connection, "Skipping closed writer during broadcast");
                }
            }
        }
        Ok(())
    }

    fn send_to(&self, connection: ConnectionId, frame: Bytes) -> Result<()> {
        let writers = self.lock()?;
        let tx = writers.get(&connection).ok_or_else(|| {
            ProtocolError::TransportError(format!(
                "{} {connection}",
                constants::ERR_CONNECTION_GONE
            ))
        })?;
        tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => {
                self.metrics.frame_dropped();
                ProtocolError::TransportError(format!(
                    "{} {connection}",
                    constants::ERR_WRITER_BACKLOG
                ))
            }
            TrySendError::Closed(_) => ProtocolError::TransportError(format!(
                "{} {connection}",
                constants::ERR_CONNECTION_GONE
            )),
        })
    }
}
