//! Value encodings used by byte-oriented backends.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BackendError, BackendResult};

/// Encoding of a decoded value into bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueCodec {
    /// UTF-8 JSON text.
    #[default]
    Json,

    /// MessagePack with named map keys.
    MessagePack,
}

impl ValueCodec {
    pub fn encode(&self, value: &Value) -> BackendResult<Vec<u8>> {
        match self {
            Self::Json => serde_json::to_vec(value).map_err(|e| BackendError::Codec(e.to_string())),
            Self::MessagePack => {
                rmp_serde::to_vec_named(value).map_err(|e| BackendError::Codec(e.to_string()))
            }
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> BackendResult<Value> {
        match self {
            Self::Json => {
                serde_json::from_slice(bytes).map_err(|e| BackendError::Codec(e.to_string()))
            }
            Self::MessagePack => {
                rmp_serde::from_slice(bytes).map_err(|e| BackendError::Codec(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_encoding_is_plain_text() {
        let bytes = ValueCodec::Json.encode(&json!({ "a": 1 })).unwrap();
        assert_eq!(bytes, br#"{"a":1}"#);
    }

    #[test]
    fn message_pack_decodes_nested_structures() {
        let value = json!({ "user": { "name": "ada", "tags": ["x", "y"] }, "n": 3 });
        let bytes = ValueCodec::MessagePack.encode(&value).unwrap();
        assert_eq!(ValueCodec::MessagePack.decode(&bytes).unwrap(), value);
    }

    #[test]
    fn garbage_is_a_codec_error() {
        let err = ValueCodec::Json.decode(b"{not json").unwrap_err();
        assert!(matches!(err, BackendError::Codec(_)));
    }
}
