//! Receive loop: datagrams in, state-store updates out.
//!
//! Nothing that arrives from the network is allowed to take the loop down.
//! Transport errors, malformed datagrams and undecodable keys or values are
//! logged and counted, then the loop goes back to waiting.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::select;
use tracing::{debug, warn};

use crate::codec::{Codec, Key, Value};
use crate::error::Result;
use crate::metrics::Metrics;
use crate::record::Record;
use crate::store::{AppliedOutcome, StateStore};

pub struct Listener<K, V, C> {
    socket: Arc<UdpSocket>,
    store: Arc<StateStore<K, V, C>>,
    metrics: Arc<Metrics>,
    max_datagram_size: usize,
}

impl<K: Key, V: Value, C: Codec> Listener<K, V, C> {
    pub fn new(
        socket: Arc<UdpSocket>,
        store: Arc<StateStore<K, V, C>>,
        metrics: Arc<Metrics>,
        max_datagram_size: usize,
    ) -> Self {
        Self {
            socket,
            store,
            metrics,
            max_datagram_size,
        }
    }

    /// Receives until `shutdown` resolves.
    ///
    /// The shutdown future is raced against every receive, so an idle socket
    /// does not delay termination.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        // One spare byte tells an exactly-full datagram apart from a truncated one.
        let mut buf = vec![0u8; self.max_datagram_size + 1];

        loop {
            select! {
                _ = &mut shutdown => break,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, from)) => self.handle_datagram(&buf[..len], from),
                    Err(err) => debug!(error = ?err, "transient receive error"),
                },
            }
        }
        debug!("listener stopped");
    }

    fn handle_datagram(&self, datagram: &[u8], from: SocketAddr) {
        self.metrics.record_received();

        if datagram.len() > self.max_datagram_size {
            self.metrics.record_oversized();
            warn!(
                peer = %from,
                limit = self.max_datagram_size,
                "dropping datagram larger than the configured limit"
            );
            return;
        }

        let record = match Record::from_bytes(datagram) {
            Ok(record) => record,
            Err(err) => {
                self.metrics.record_malformed();
                warn!(peer = %from, error = %err, "dropping malformed datagram");
                return;
            }
        };

        if let Err(err) = apply_counted(&self.store, &self.metrics, record) {
            warn!(peer = %from, error = %err, "dropping undecodable record");
        }
    }
}

/// Applies `record` and records the outcome in `metrics`.
///
/// Shared by the listener and by [`crate::node::Node::apply`] so that locally
/// injected records are accounted exactly like received ones.
pub(crate) fn apply_counted<K: Key, V: Value, C: Codec>(
    store: &StateStore<K, V, C>,
    metrics: &Metrics,
    record: Record,
) -> Result<AppliedOutcome> {
    let seq = record.seq;
    match store.apply(record) {
        Ok(outcome) => {
            metrics.record_outcome(outcome);
            debug!(seq, ?outcome, "applied record");
            Ok(outcome)
        }
        Err(err) => {
            metrics.record_malformed();
            Err(err)
        }
    }
}
