//! Eventually-consistent key-value store replicated over UDP.
//!
//! A fixed set of nodes, each bound to a UDP endpoint, share small pieces of
//! ephemeral state (flags, counters, presence). Every local write produces a
//! versioned [`Record`] that is sent once to each configured peer; peers keep
//! whichever record for a key carries the highest sequence number
//! (last-writer-wins). Lost datagrams are not retransmitted, so the cluster
//! converges on the last value written, not on every value written.
//!
//! # Architecture
//!
//! Each [`Node`] runs two background tasks next to the application:
//!
//! - **Listener**: receives datagrams, decodes them and applies them to the store
//! - **Forwarder**: drains the outbound queue and sends each record to every peer
//!
//! Both the application and the listener mutate the same [`StateStore`]; its
//! two tables sit behind a single mutex so no reader ever sees half a record.
//!
//! # Modules
//!
//! - [`record`]: wire record and its protobuf encoding
//! - [`codec`]: pluggable encoding of application keys and values
//! - [`store`]: version table, materialized map, conflict resolution
//! - [`forwarder`]: outbound queue and fan-out task
//! - [`listener`]: receive loop
//! - [`node`]: lifecycle and public API
//! - [`config`]: endpoints and node configuration
//! - [`metrics`]: per-node counters
//! - [`console`]: command parsing for the `node` binary

pub mod codec;
pub mod config;
pub mod console;
pub mod error;
pub mod forwarder;
pub mod listener;
pub mod metrics;
pub mod node;
pub mod record;
pub mod store;

pub use codec::{BincodeCodec, Codec, JsonCodec};
pub use config::{DEFAULT_MAX_DATAGRAM_SIZE, Endpoint, NodeConfig};
pub use error::{Error, Result};
pub use metrics::MetricsSnapshot;
pub use node::{Node, NodeState};
pub use record::{Operation, Record};
pub use store::{AppliedOutcome, StateStore};
