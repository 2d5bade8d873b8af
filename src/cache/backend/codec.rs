//! Value encoding shared by the remote backends
//!
//! JSON is always tried first so structured payloads stay readable when
//! inspecting a store by hand; anything that is not JSON is carried as binary.

use crate::cache::types::CacheValue;
use crate::error::{CacheError, Result};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

/// Leading byte of binary payloads; never valid at the start of UTF-8 JSON
pub const BINARY_MARKER: u8 = 0x80;

/// How a text-encoded value was written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueEncoding {
    Json,
    Binary,
}

/// Encode for byte-oriented stores
pub fn encode_bytes(value: &CacheValue) -> Result<Vec<u8>> {
    match value {
        CacheValue::Json(json) => Ok(serde_json::to_vec(json)?),
        CacheValue::Binary(bytes) => {
            let mut out = Vec::with_capacity(bytes.len() + 1);
            out.push(BINARY_MARKER);
            out.extend_from_slice(bytes);
            Ok(out)
        }
    }
}

/// Decode bytes written by [`encode_bytes`] or by another writer
pub fn decode_bytes(bytes: &[u8]) -> CacheValue {
    if let Ok(json) = serde_json::from_slice::<serde_json::Value>(bytes) {
        return CacheValue::Json(json);
    }
    match bytes.split_first() {
        Some((&BINARY_MARKER, rest)) => CacheValue::Binary(rest.to_vec()),
        _ => CacheValue::Binary(bytes.to_vec()),
    }
}

/// Encode for text-only stores
pub fn encode_text(value: &CacheValue) -> Result<(String, ValueEncoding)> {
    match value {
        CacheValue::Json(json) => Ok((serde_json::to_string(json)?, ValueEncoding::Json)),
        CacheValue::Binary(bytes) => Ok((BASE64_STANDARD.encode(bytes), ValueEncoding::Binary)),
    }
}

/// Decode text written by [`encode_text`]
pub fn decode_text(text: &str, encoding: Option<ValueEncoding>) -> Result<CacheValue> {
    if encoding != Some(ValueEncoding::Binary) {
        if let Ok(json) = serde_json::from_str::<serde_json::Value>(text) {
            return Ok(CacheValue::Json(json));
        }
    }
    BASE64_STANDARD
        .decode(text)
        .map(CacheValue::Binary)
        .map_err(|e| CacheError::Serialization(format!("value is neither JSON nor base64: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_stays_readable() {
        let value = CacheValue::Json(json!({"name": "Ann"}));
        let bytes = encode_bytes(&value).unwrap();
        assert_eq!(std::str::from_utf8(&bytes).unwrap(), r#"{"name":"Ann"}"#);
        assert_eq!(decode_bytes(&bytes), value);
    }

    #[test]
    fn test_binary_is_marked() {
        let value = CacheValue::Binary(b"{}".to_vec());
        let bytes = encode_bytes(&value).unwrap();
        assert_eq!(bytes[0], BINARY_MARKER);
        // Even JSON-looking bytes come back as binary
        assert_eq!(decode_bytes(&bytes), value);
    }

    #[test]
    fn test_foreign_bytes_fall_back_to_binary() {
        assert_eq!(
            decode_bytes(b"not json"),
            CacheValue::Binary(b"not json".to_vec())
        );
    }

    #[test]
    fn test_text_encoding() {
        let (text, encoding) = encode_text(&CacheValue::Binary(vec![1, 2, 3])).unwrap();
        assert_eq!(encoding, ValueEncoding::Binary);
        assert_eq!(
            decode_text(&text, Some(encoding)).unwrap(),
            CacheValue::Binary(vec![1, 2, 3])
        );

        // "1234" is valid JSON and valid base64; the encoding tag disambiguates
        let digits = CacheValue::Binary(BASE64_STANDARD.decode("1234").unwrap());
        let (text, encoding) = encode_text(&digits).unwrap();
        assert_eq!(decode_text(&text, Some(encoding)).unwrap(), digits);

        assert_eq!(
            decode_text("[1,2]", None).unwrap(),
            CacheValue::Json(json!([1, 2]))
        );
        assert!(decode_text("%%%", None).is_err());
    }
}
