//! Node endpoints and static cluster configuration.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Largest datagram a node sends or accepts unless configured otherwise.
///
/// Records that encode to more than this are refused by `set`/`delete`, and
/// incoming datagrams above it are dropped and counted as oversized.
pub const DEFAULT_MAX_DATAGRAM_SIZE: usize = 1024;

/// Largest payload a single UDP datagram can carry over IPv4.
pub const MAX_UDP_PAYLOAD: usize = 65_507;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

/// A `(host, port)` pair as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// IPv6 when the host is written with a colon, IPv4 otherwise.
    pub fn family(&self) -> AddressFamily {
        if self.host.contains(':') {
            AddressFamily::V6
        } else {
            AddressFamily::V4
        }
    }

    /// Resolves the endpoint to the first address matching its family.
    pub async fn resolve(&self) -> Result<SocketAddr> {
        let family = self.family();
        let mut candidates = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|err| self.resolve_error(err.to_string()))?;

        candidates
            .find(|addr| match family {
                AddressFamily::V4 => addr.is_ipv4(),
                AddressFamily::V6 => addr.is_ipv6(),
            })
            .ok_or_else(|| self.resolve_error(format!("no {family:?} address")))
    }

    fn resolve_error(&self, reason: String) -> Error {
        Error::Resolve {
            endpoint: self.to_string(),
            reason,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.family() {
            AddressFamily::V6 => write!(f, "[{}]:{}", self.host, self.port),
            AddressFamily::V4 => write!(f, "{}:{}", self.host, self.port),
        }
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    /// Accepts `host:port` and `[v6-host]:port`.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidConfig(format!("expected host:port, got {s:?}"));

        let (host, port) = s.trim().rsplit_once(':').ok_or_else(invalid)?;
        let host = match host.strip_prefix('[') {
            Some(inner) => inner.strip_suffix(']').ok_or_else(invalid)?,
            None if host.contains(':') => return Err(invalid()),
            None => host,
        };
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse().map_err(|_| invalid())?;
        Ok(Self::new(host, port))
    }
}

/// Static configuration of one node: where it listens and whom it forwards to.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub listen: Endpoint,
    /// Destinations for locally originated records, in send order.
    pub peers: Vec<Endpoint>,
    pub max_datagram_size: usize,
}

impl NodeConfig {
    pub fn new(listen: Endpoint, peers: Vec<Endpoint>) -> Self {
        Self {
            listen,
            peers,
            max_datagram_size: DEFAULT_MAX_DATAGRAM_SIZE,
        }
    }

    pub fn with_max_datagram_size(mut self, max_datagram_size: usize) -> Self {
        self.max_datagram_size = max_datagram_size;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_datagram_size == 0 || self.max_datagram_size > MAX_UDP_PAYLOAD {
            return Err(Error::InvalidConfig(format!(
                "max datagram size must be within 1..={MAX_UDP_PAYLOAD}, got {}",
                self.max_datagram_size
            )));
        }
        for (i, peer) in self.peers.iter().enumerate() {
            if *peer == self.listen {
                return Err(Error::InvalidConfig(format!(
                    "peer list contains the listen endpoint {peer}"
                )));
            }
            if self.peers[..i].contains(peer) {
                return Err(Error::InvalidConfig(format!("duplicate peer {peer}")));
            }
        }
        Ok(())
    }
}
