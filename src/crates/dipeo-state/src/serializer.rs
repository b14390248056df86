//! Serialization protocol for persisted execution records

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Protocol for encoding and decoding persisted execution state
///
/// Implementations can provide custom serialization strategies
/// (JSON, bincode, etc.). The in-memory repository stores encoded
/// bytes so a persisted record is always a whole-state snapshot.
pub trait SerializerProtocol: Send + Sync {
    /// Serialize a value to bytes
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;

    /// Deserialize a value from bytes
    fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T>;

    /// Serialize to JSON value (for inspection and queries)
    fn dumps_json<T: Serialize>(&self, value: &T) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(value)?)
    }
}

/// JSON-based serializer (default)
#[derive(Debug, Clone, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl SerializerProtocol for JsonSerializer {
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Binary serializer using bincode
#[derive(Debug, Clone, Default)]
pub struct BincodeSerializer;

impl BincodeSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl SerializerProtocol for BincodeSerializer {
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(bincode::serialize(value)?)
    }

    fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T> {
        Ok(bincode::deserialize(data)?)
    }
}
