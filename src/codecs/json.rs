//! JSON Codec using `serde_json`

use crate::traits::{CacheCodec, SizeEstimator};
use anyhow::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// JSON Codec using `serde_json`
///
/// Also the default [`SizeEstimator`]: a value is charged its encoded length.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl CacheCodec for JsonCodec {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn name(&self) -> &'static str {
        "serde_json"
    }
}

impl SizeEstimator for JsonCodec {
    fn estimate(&self, value: &serde_json::Value) -> Result<usize> {
        Ok(self.serialize(value)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_estimate_is_encoded_length() {
        let value = json!({"ticker": "AAPL"});
        let encoded = JsonCodec.serialize(&value).unwrap_or_default();
        assert_eq!(JsonCodec.estimate(&value).ok(), Some(encoded.len()));
    }
}
