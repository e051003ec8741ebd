//! Conversion between client byte strings and backend JSON documents.

use bytes::Bytes;
use serde_json::Value;

use crate::error::{ProxyError, ProxyResult};

/// Parse a client-supplied value as a JSON document.
pub fn decode_document(key: &[u8], raw: &[u8]) -> ProxyResult<Value> {
    serde_json::from_slice(raw).map_err(|e| ProxyError::InvalidDocument {
        key: String::from_utf8_lossy(key).into_owned(),
        reason: e.to_string(),
    })
}

/// Compact JSON text of a stored document.
pub fn encode_document(doc: &Value) -> Bytes {
    Bytes::from(doc.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_accepts_any_json() {
        assert_eq!(decode_document(b"k", br#"{"a":[1,2]}"#).unwrap(), json!({"a": [1, 2]}));
        assert_eq!(decode_document(b"k", b"42").unwrap(), json!(42));
        assert_eq!(decode_document(b"k", br#""text""#).unwrap(), json!("text"));
        assert_eq!(decode_document(b"k", b"null").unwrap(), Value::Null);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode_document(b"user:1", b"not json").unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("ERR value for key 'user:1'"), "{msg}");
    }

    #[test]
    fn test_encode_is_compact() {
        let doc = decode_document(b"k", b"{ \"name\" : \"a\" }").unwrap();
        assert_eq!(encode_document(&doc), Bytes::from_static(br#"{"name":"a"}"#));
    }
}
