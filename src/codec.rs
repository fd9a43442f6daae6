use anyhow::Result;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

/// Wire encoding for documents exchanged with the engine.
pub trait EngineCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T>;

    /// Untyped parse, used to inspect a response before committing to a shape.
    fn decode_value(&self, data: &[u8]) -> Result<Value> {
        self.decode(data)
    }
}

// Pretty-printed JSON; request files stay readable when kept for debugging
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl EngineCodec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(value)?)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(data)?)
    }
}
