//! Versioned update records exchanged between nodes.
//!
//! A [`Record`] is the unit of replication: one record per datagram, carrying
//! the encoded key, the per-key sequence number, the operation and (for SET)
//! the encoded value. The wire layout is a protobuf message with fixed tags so
//! nodes built from different revisions of this crate still understand each
//! other.

use prost::Message;

use crate::error::{Error, Result};

/// Operation carried by a [`Record`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Operation {
    Set = 0,
    Delete = 1,
}

/// A versioned update for a single key.
///
/// `seq` is strictly increasing per key and is assigned by whichever node
/// originates the change. The record is immutable once built; nodes keep the
/// last accepted one per key in their version table.
#[derive(Clone, PartialEq, Message)]
pub struct Record {
    #[prost(bytes = "vec", tag = "1")]
    pub key: Vec<u8>,
    #[prost(uint64, tag = "2")]
    pub seq: u64,
    #[prost(enumeration = "Operation", tag = "3")]
    pub op: i32,
    #[prost(bytes = "vec", tag = "4")]
    pub payload: Vec<u8>,
}

impl Record {
    /// Builds a record from already encoded key and payload bytes.
    pub fn new(key: Vec<u8>, seq: u64, operation: Operation, payload: Vec<u8>) -> Self {
        Self {
            key,
            seq,
            op: operation as i32,
            payload,
        }
    }

    /// A SET carrying the encoded value in `payload`.
    pub fn set(key: Vec<u8>, seq: u64, payload: Vec<u8>) -> Self {
        Self::new(key, seq, Operation::Set, payload)
    }

    /// A DELETE tombstone; the payload is empty.
    pub fn delete(key: Vec<u8>, seq: u64) -> Self {
        Self::new(key, seq, Operation::Delete, Vec::new())
    }

    /// Returns the typed operation, rejecting enum values this build does not know.
    pub fn operation(&self) -> Result<Operation> {
        Operation::try_from(self.op).map_err(|_| Error::UnknownOperation(self.op))
    }

    /// Protobuf wire form, ready to be sent as one datagram.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    /// Decodes one datagram.
    ///
    /// # Errors
    /// [`Error::Decode`] if `bytes` is not a valid protobuf record.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self::decode(bytes)?)
    }
}
