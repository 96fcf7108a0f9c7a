//! Pluggable serialization of application keys and values.
//!
//! The store never looks inside keys or values; it hands them to a [`Codec`]
//! before putting them on the wire and after taking them off. This is
//! independent of the [`crate::record::Record`] encoding itself.
//!
//! Keys must encode deterministically: two equal keys have to produce the
//! same bytes on every node. Primitives, strings, tuples and plain structs are
//! fine; maps with unspecified iteration order are not.

use std::hash::Hash;

use serde::{Serialize, de::DeserializeOwned};

use crate::error::CodecError;

pub trait Codec: Send + Sync + 'static {
    fn encode<T>(&self, value: &T) -> Result<Vec<u8>, CodecError>
    where
        T: Serialize + ?Sized;

    fn decode<T>(&self, bytes: &[u8]) -> Result<T, CodecError>
    where
        T: DeserializeOwned;
}

/// Bounds required of replicated keys.
pub trait Key: Eq + Hash + Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Key for T where T: Eq + Hash + Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Bounds required of replicated values.
pub trait Value: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Value for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Compact binary codec; the default.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl Codec for BincodeCodec {
    fn encode<T>(&self, value: &T) -> Result<Vec<u8>, CodecError>
    where
        T: Serialize + ?Sized,
    {
        Ok(bincode::serialize(value)?)
    }

    fn decode<T>(&self, bytes: &[u8]) -> Result<T, CodecError>
    where
        T: DeserializeOwned,
    {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// JSON codec. Larger on the wire but readable in packet captures.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T>(&self, value: &T) -> Result<Vec<u8>, CodecError>
    where
        T: Serialize + ?Sized,
    {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode<T>(&self, bytes: &[u8]) -> Result<T, CodecError>
    where
        T: DeserializeOwned,
    {
        Ok(serde_json::from_slice(bytes)?)
    }
}
