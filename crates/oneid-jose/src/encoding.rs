//! Base64url and JSON segment helpers
//!
//! All JOSE segments are unpadded base64url. Decoding tolerates trailing `=`
//! padding since some peers emit it.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::Serialize;
use serde_json::Value;

use crate::{JoseError, Result};

/// Encode bytes as unpadded base64url
pub fn b64_encode(data: impl AsRef<[u8]>) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// Decode base64url, accepting optional padding
///
/// # Errors
/// Returns [`JoseError::InvalidFormat`] if the input is not base64url.
pub fn b64_decode(data: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(data.trim_end_matches('='))
        .map_err(|e| JoseError::InvalidFormat(format!("invalid base64url: {}", e)))
}

/// Serialize a value to JSON and base64url-encode it
///
/// # Errors
/// Returns [`JoseError::InvalidFormat`] if the value cannot be serialized.
pub fn b64_encode_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let json = serde_json::to_vec(value)?;
    Ok(b64_encode(json))
}

/// Decode a base64url segment holding a JSON object
///
/// # Errors
/// Returns [`JoseError::InvalidFormat`] if the segment is not base64url or not a JSON object.
pub fn b64_decode_json_object(data: &str) -> Result<serde_json::Map<String, Value>> {
    let bytes = b64_decode(data)?;
    match serde_json::from_slice(&bytes)? {
        Value::Object(map) => Ok(map),
        other => Err(JoseError::InvalidFormat(format!(
            "expected a JSON object, got {}",
            json_type_name(&other)
        ))),
    }
}

/// JSON type label used in error messages
pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
