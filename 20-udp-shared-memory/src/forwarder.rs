//! Outbound fan-out of locally originated records.
//!
//! Writers call [`Forwarder::enqueue`], which is a plain in-memory append; a
//! single background task owns the send side of the socket and turns each
//! queued record into one datagram per peer. Network latency therefore never
//! shows up on the write path.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::metrics::Metrics;

/// Items on the outbound queue. `Stop` is the shutdown sentinel: everything
/// queued before it is still sent.
enum Outbound {
    Datagram(Vec<u8>),
    Stop,
}

pub struct Forwarder {
    queue: mpsc::UnboundedSender<Outbound>,
    /// Receiving half, parked here until `start` hands it to the drain task.
    inbox: Mutex<Option<mpsc::UnboundedReceiver<Outbound>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    enqueued: AtomicU64,
    metrics: Arc<Metrics>,
}

impl Forwarder {
    /// Creates the queue. Records enqueued before [`start`](Self::start) are
    /// held and sent once the drain task runs.
    pub fn new(metrics: Arc<Metrics>) -> Self {
        let (queue, inbox) = mpsc::unbounded_channel();
        Self {
            queue,
            inbox: Mutex::new(Some(inbox)),
            worker: Mutex::new(None),
            enqueued: AtomicU64::new(0),
            metrics,
        }
    }

    /// Queues one encoded record for every peer. Never blocks.
    ///
    /// Once the drain task has exited the record is dropped; callers racing
    /// with `stop` get no delivery guarantee.
    pub fn enqueue(&self, datagram: Vec<u8>) {
        if self.queue.send(Outbound::Datagram(datagram)).is_err() {
            debug!("forwarder stopped, dropping outbound record");
            return;
        }
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    /// Total records accepted by [`enqueue`](Self::enqueue).
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    /// Spawns the drain task on the current Tokio runtime.
    ///
    /// # Errors
    /// [`Error::ForwarderStarted`] if the task was already spawned once.
    pub fn start(&self, socket: Arc<UdpSocket>, peers: Vec<SocketAddr>) -> Result<()> {
        let inbox = self.inbox.lock().take().ok_or(Error::ForwarderStarted)?;
        let metrics = Arc::clone(&self.metrics);
        let handle = tokio::spawn(drain(inbox, socket, peers, metrics));
        *self.worker.lock() = Some(handle);
        Ok(())
    }

    /// Flushes everything already queued, then stops the drain task.
    pub async fn stop(&self) {
        let _ = self.queue.send(Outbound::Stop);
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(err) = worker.await {
                warn!(error = ?err, "forwarder task terminated abnormally");
            }
        }
    }
}

async fn drain(
    mut inbox: mpsc::UnboundedReceiver<Outbound>,
    socket: Arc<UdpSocket>,
    peers: Vec<SocketAddr>,
    metrics: Arc<Metrics>,
) {
    while let Some(item) = inbox.recv().await {
        let datagram = match item {
            Outbound::Datagram(datagram) => datagram,
            Outbound::Stop => break,
        };
        for peer in &peers {
            // One failing peer must not starve the rest.
            match socket.send_to(&datagram, peer).await {
                Ok(_) => metrics.record_sent(),
                Err(err) => {
                    metrics.record_send_error();
                    warn!(peer = %peer, error = ?err, "failed to forward record");
                }
            }
        }
    }
    debug!("forwarder drained");
}
