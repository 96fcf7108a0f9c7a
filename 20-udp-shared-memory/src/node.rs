//! A replica: socket, state store, forwarder and listener wired together.
//!
//! [`Node`] is what an embedding application holds. Reads and writes are
//! synchronous and only touch the in-memory store and the outbound queue;
//! the network work happens on two background tasks started by
//! [`Node::start`]:
//!
//! - the **listener** owns the receive side of the socket and applies
//!   incoming records to the store;
//! - the **forwarder** owns the send side and fans each local write out to
//!   every peer.
//!
//! Propagation is single hop: received records are applied but never
//! re-forwarded, so the peer lists are expected to form a full mesh.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::codec::{BincodeCodec, Codec, Key, Value};
use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::forwarder::Forwarder;
use crate::listener::{Listener, apply_counted};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::record::Record;
use crate::store::{AppliedOutcome, StateStore};

/// Externally visible lifecycle of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Configured, socket not opened yet.
    Created,
    /// Socket bound, background tasks not running.
    Bound,
    /// Listener and forwarder running.
    Running,
    /// `stop` is joining the listener and flushing the outbound queue.
    Stopping,
    /// Terminal; the socket is closed.
    Stopped,
}

enum Lifecycle {
    Created,
    Bound(Arc<UdpSocket>),
    Running(Running),
    Stopping,
    Stopped,
}

struct Running {
    socket: Arc<UdpSocket>,
    shutdown: oneshot::Sender<()>,
    listener: JoinHandle<()>,
}

impl Lifecycle {
    fn state(&self) -> NodeState {
        match self {
            Lifecycle::Created => NodeState::Created,
            Lifecycle::Bound(_) => NodeState::Bound,
            Lifecycle::Running(_) => NodeState::Running,
            Lifecycle::Stopping => NodeState::Stopping,
            Lifecycle::Stopped => NodeState::Stopped,
        }
    }

    fn socket(&self) -> Option<&Arc<UdpSocket>> {
        match self {
            Lifecycle::Bound(socket) => Some(socket),
            Lifecycle::Running(running) => Some(&running.socket),
            _ => None,
        }
    }
}

pub struct Node<K, V, C = BincodeCodec> {
    config: NodeConfig,
    store: Arc<StateStore<K, V, C>>,
    forwarder: Forwarder,
    metrics: Arc<Metrics>,
    lifecycle: Mutex<Lifecycle>,
}

impl<K: Key, V: Value> Node<K, V> {
    /// Creates a node using the default bincode codec.
    ///
    /// # Errors
    /// [`Error::InvalidConfig`] if `config` fails validation.
    pub fn new(config: NodeConfig) -> Result<Self> {
        Self::with_codec(config, BincodeCodec)
    }
}

impl<K: Key, V: Value, C: Codec> Node<K, V, C> {
    pub fn with_codec(config: NodeConfig, codec: C) -> Result<Self> {
        config.validate()?;
        let metrics = Arc::new(Metrics::new());
        let store =
            StateStore::with_codec(codec).with_max_record_len(config.max_datagram_size);
        Ok(Self {
            forwarder: Forwarder::new(Arc::clone(&metrics)),
            store: Arc::new(store),
            metrics,
            config,
            lifecycle: Mutex::new(Lifecycle::Created),
        })
    }

    /// Configuration the node was built from.
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub async fn state(&self) -> NodeState {
        self.lifecycle.lock().await.state()
    }

    /// Address the socket is bound to, once bound.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        let lifecycle = self.lifecycle.lock().await;
        lifecycle.socket().and_then(|socket| socket.local_addr().ok())
    }

    /// Opens and binds the socket. Binding an already bound node is a no-op.
    ///
    /// # Errors
    /// - [`Error::Resolve`] or [`Error::Io`] if the listen endpoint is unusable.
    /// - [`Error::InvalidState`] once the node is stopping or stopped.
    pub async fn bind(&self) -> Result<SocketAddr> {
        let mut lifecycle = self.lifecycle.lock().await;
        let socket = self.ensure_bound(&mut lifecycle, "bind").await?;
        Ok(socket.local_addr()?)
    }

    /// Binds if necessary, then starts the forwarder and the listener.
    ///
    /// Calling `start` on a running node does nothing. A stopped node cannot
    /// be restarted; build a new one.
    pub async fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if matches!(*lifecycle, Lifecycle::Running(_)) {
            return Ok(());
        }
        let socket = self.ensure_bound(&mut lifecycle, "start").await?;

        let mut peers = Vec::with_capacity(self.config.peers.len());
        for peer in &self.config.peers {
            peers.push(peer.resolve().await?);
        }
        self.forwarder.start(Arc::clone(&socket), peers)?;

        let (shutdown, shutdown_rx) = oneshot::channel();
        let listener = Listener::new(
            Arc::clone(&socket),
            Arc::clone(&self.store),
            Arc::clone(&self.metrics),
            self.config.max_datagram_size,
        );
        let listener = tokio::spawn(listener.run_until(async move {
            let _ = shutdown_rx.await;
        }));

        info!(
            listen = %self.config.listen,
            peers = self.config.peers.len(),
            "node running"
        );
        *lifecycle = Lifecycle::Running(Running {
            socket,
            shutdown,
            listener,
        });
        Ok(())
    }

    /// Stops the listener, flushes queued records to peers and closes the socket.
    ///
    /// The lifecycle lock is released while draining, so [`state`](Self::state)
    /// reports [`NodeState::Stopping`] until the drain completes. Safe to call
    /// in any state; a second caller arriving mid-drain returns immediately.
    pub async fn stop(&self) {
        let previous = {
            let mut lifecycle = self.lifecycle.lock().await;
            match *lifecycle {
                Lifecycle::Stopping | Lifecycle::Stopped => return,
                _ => std::mem::replace(&mut *lifecycle, Lifecycle::Stopping),
            }
        };

        match previous {
            Lifecycle::Running(Running {
                socket,
                shutdown,
                listener,
            }) => {
                let _ = shutdown.send(());
                if let Err(err) = listener.await {
                    warn!(error = ?err, "listener task terminated abnormally");
                }
                self.forwarder.stop().await;
                drop(socket);
                info!(listen = %self.config.listen, "node stopped");
            }
            _ => self.forwarder.stop().await,
        }
        *self.lifecycle.lock().await = Lifecycle::Stopped;
    }

    /// Returns the current value for `key`, if any.
    pub fn get(&self, key: &K) -> Option<V> {
        self.store.get(key)
    }

    /// Returns the current value for `key`, or `default` when absent.
    pub fn get_or(&self, key: &K, default: V) -> V {
        self.store.get_or(key, default)
    }

    /// Last accepted record for `key`, including DELETE tombstones.
    pub fn version(&self, key: &K) -> Option<Record> {
        self.store.version(key)
    }

    /// Writes locally and queues the update for every peer.
    ///
    /// Returns the sequence number assigned to the write. Writes made before
    /// [`start`](Self::start) are held in the queue and sent once it runs.
    pub fn set(&self, key: K, value: V) -> Result<u64> {
        let record = self.store.set(key, value)?;
        self.forwarder.enqueue(record.to_bytes());
        Ok(record.seq)
    }

    /// Deletes locally and queues the tombstone for every peer.
    ///
    /// # Errors
    /// [`Error::NotFound`] if this node holds no value for `key`; nothing is
    /// queued in that case.
    pub fn delete(&self, key: &K) -> Result<u64> {
        let record = self.store.delete(key)?;
        self.forwarder.enqueue(record.to_bytes());
        Ok(record.seq)
    }

    /// Applies a record as if it had been received from a peer.
    ///
    /// Used for administrative injection and tests; the outcome is counted in
    /// the same metrics the listener feeds.
    pub fn apply(&self, record: Record) -> Result<AppliedOutcome> {
        apply_counted(&self.store, &self.metrics, record)
    }

    /// Point-in-time copy of the traffic counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Number of records handed to the forwarder so far.
    pub fn enqueued_records(&self) -> u64 {
        self.forwarder.enqueued()
    }

    /// Number of keys currently holding a value.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Copy of every live key and value.
    pub fn snapshot(&self) -> HashMap<K, V> {
        self.store.snapshot()
    }

    async fn ensure_bound(
        &self,
        lifecycle: &mut Lifecycle,
        operation: &'static str,
    ) -> Result<Arc<UdpSocket>> {
        match lifecycle {
            Lifecycle::Created => {
                let addr = self.config.listen.resolve().await?;
                let socket = Arc::new(UdpSocket::bind(addr).await?);
                let bound = socket.local_addr()?;
                info!(listen = %self.config.listen, addr = %bound, "node bound");
                *lifecycle = Lifecycle::Bound(Arc::clone(&socket));
                Ok(socket)
            }
            Lifecycle::Bound(socket) => Ok(Arc::clone(socket)),
            Lifecycle::Running(running) => Ok(Arc::clone(&running.socket)),
            Lifecycle::Stopping | Lifecycle::Stopped => Err(Error::InvalidState {
                state: lifecycle.state(),
                operation,
            }),
        }
    }
}
