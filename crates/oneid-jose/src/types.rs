//! Claims and JOSE wire structures
//!
//! This module holds the value types that travel on the wire: claim sets,
//! JSON-serialized JWS objects and their per-signature headers, and general
//! JWE objects with per-recipient wrapped keys. None of these types perform
//! cryptography; the engines in [`crate::jws`] and [`crate::jwe`] do.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::encoding::{b64_decode_json_object, b64_encode_json};
use crate::{JoseError, Result};

/// Open-ended claim set, insertion ordered
pub type Claims = Map<String, Value>;

/// Free-form JOSE header members
pub type Header = Map<String, Value>;

static COMPACT_JWS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-zA-Z_-]+\.[0-9a-zA-Z_-]+\.[0-9a-zA-Z_-]+$")
        .expect("compact JWS pattern is valid")
});

/// Whether `value` looks like a compact JWS/JWT (`header.payload.signature`)
pub fn is_compact_jws(value: &str) -> bool {
    COMPACT_JWS.is_match(value)
}

/// Whether `value` is a JSON-serialized JWS (`payload` and `signatures`)
pub fn is_jws(value: &Value) -> bool {
    value.as_object().is_some_and(is_jws_object)
}

/// Whether `value` is a general JWE (`iv`, `ciphertext`, `tag`, `recipients`)
pub fn is_jwe(value: &Value) -> bool {
    value.as_object().is_some_and(is_jwe_object)
}

pub(crate) fn is_jws_object(object: &Map<String, Value>) -> bool {
    object.contains_key("payload") && object.contains_key("signatures")
}

pub(crate) fn is_jwe_object(object: &Map<String, Value>) -> bool {
    ["iv", "ciphertext", "tag", "recipients"]
        .iter()
        .all(|member| object.contains_key(*member))
}

/// Header members owned by the JWS engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JwsReservedHeader {
    /// `typ`
    Typ,
    /// `alg`
    Alg,
    /// `kid`
    Kid,
    /// `sidx`
    Sidx,
}

impl JwsReservedHeader {
    /// Every reserved member
    pub const ALL: [Self; 4] = [Self::Typ, Self::Alg, Self::Kid, Self::Sidx];

    /// Header member name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Typ => "typ",
            Self::Alg => "alg",
            Self::Kid => "kid",
            Self::Sidx => "sidx",
        }
    }

    /// First reserved member present in `header`
    pub fn find_in(header: &Header) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|reserved| header.contains_key(reserved.as_str()))
    }
}

impl fmt::Display for JwsReservedHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared-header members owned by the JWE engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JweReservedHeader {
    /// `enc`
    Enc,
    /// `alg`
    Alg,
    /// `epk`
    Epk,
    /// `apu`
    Apu,
}

impl JweReservedHeader {
    /// Every reserved member
    pub const ALL: [Self; 4] = [Self::Enc, Self::Alg, Self::Epk, Self::Apu];

    /// Header member name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Enc => "enc",
            Self::Alg => "alg",
            Self::Epk => "epk",
            Self::Apu => "apu",
        }
    }

    /// First reserved member present in `claims`
    pub fn find_in(claims: &Claims) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|reserved| claims.contains_key(reserved.as_str()))
    }
}

impl fmt::Display for JweReservedHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded protected header of one JWS signature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JwsHeader {
    /// `JWT` for compact tokens, `JOSE+JSON` for JSON signatures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
    /// Signature algorithm
    pub alg: String,
    /// Signer identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// Signing order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sidx: Option<u64>,
    /// Caller-supplied members
    #[serde(flatten)]
    pub extra: Header,
}

impl JwsHeader {
    /// Decode a base64url protected header
    ///
    /// # Errors
    /// Returns [`JoseError::InvalidFormat`] if the segment is not a JSON object
    /// with a string `alg`.
    pub fn decode(segment: &str) -> Result<Self> {
        let object = b64_decode_json_object(segment)?;
        serde_json::from_value(Value::Object(object))
            .map_err(|e| JoseError::InvalidFormat(format!("invalid JWS header: {}", e)))
    }

    /// Encode as a base64url protected header
    ///
    /// # Errors
    /// Returns [`JoseError::InvalidFormat`] if serialization fails.
    pub fn encode(&self) -> Result<String> {
        b64_encode_json(self)
    }
}

/// One entry of a JSON JWS `signatures` array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwsSignature {
    /// Base64url protected header
    pub protected: String,
    /// Base64url raw `r||s` signature
    pub signature: String,
    /// Unprotected per-signature header
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<Header>,
}

impl JwsSignature {
    /// Decode the protected header
    ///
    /// # Errors
    /// See [`JwsHeader::decode`].
    pub fn protected_header(&self) -> Result<JwsHeader> {
        JwsHeader::decode(&self.protected)
    }

    /// Resolve the signer kid: protected `kid`, then unprotected `kid`, then `default_kid`
    ///
    /// # Errors
    /// Returns [`JoseError::InvalidFormat`] if the protected header does not decode.
    pub fn resolve_kid(&self, default_kid: Option<&str>) -> Result<Option<String>> {
        let protected = self.protected_header()?;
        Ok(protected
            .kid
            .or_else(|| {
                self.header
                    .as_ref()
                    .and_then(|header| header.get("kid"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .or_else(|| default_kid.map(str::to_string)))
    }
}

/// JSON-serialized (general) JWS
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralJws {
    /// Base64url claims
    pub payload: String,
    /// Signatures in the order they were appended
    pub signatures: Vec<JwsSignature>,
}

impl GeneralJws {
    /// Parse from a JSON value
    ///
    /// # Errors
    /// Returns [`JoseError::InvalidFormat`] if `payload` or `signatures` is missing or malformed.
    pub fn from_value(value: Value) -> Result<Self> {
        if !is_jws(&value) {
            return Err(JoseError::InvalidFormat(
                "JWS requires 'payload' and 'signatures'".to_string(),
            ));
        }
        serde_json::from_value(value)
            .map_err(|e| JoseError::InvalidFormat(format!("invalid JWS: {}", e)))
    }

    /// Parse from a JSON string
    ///
    /// # Errors
    /// See [`GeneralJws::from_value`].
    pub fn from_json(json: &str) -> Result<Self> {
        Self::from_value(serde_json::from_str(json)?)
    }

    /// Convert to a JSON value
    ///
    /// # Errors
    /// Returns [`JoseError::InvalidFormat`] if serialization fails.
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Serialize to a JSON string
    ///
    /// # Errors
    /// Returns [`JoseError::InvalidFormat`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode the payload as claims without verifying anything
    ///
    /// # Errors
    /// Returns [`JoseError::InvalidFormat`] if the payload is not a base64url JSON object.
    pub fn claims(&self) -> Result<Claims> {
        b64_decode_json_object(&self.payload)
    }
}

/// A JWS in either serialization
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JwsMessage {
    /// `header.payload.signature`
    Compact(String),
    /// `{"payload": ..., "signatures": [...]}`
    General(GeneralJws),
}

impl JwsMessage {
    /// Parse a compact token or a JSON JWS
    ///
    /// # Errors
    /// Returns [`JoseError::InvalidFormat`] if the input is neither.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.starts_with('{') {
            return GeneralJws::from_json(trimmed).map(Self::General);
        }
        if is_compact_jws(trimmed) {
            return Ok(Self::Compact(trimmed.to_string()));
        }
        Err(JoseError::InvalidFormat(
            "input is neither a compact nor a JSON JWS".to_string(),
        ))
    }

    /// Build from a JSON value, accepting a JSON JWS object or a compact string
    ///
    /// # Errors
    /// Returns [`JoseError::InvalidFormat`] if the value is neither.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::String(compact) if is_compact_jws(&compact) => Ok(Self::Compact(compact)),
            object @ Value::Object(_) => GeneralJws::from_value(object).map(Self::General),
            _ => Err(JoseError::InvalidFormat(
                "input is neither a compact nor a JSON JWS".to_string(),
            )),
        }
    }

    /// Whether this is the compact serialization
    pub fn is_compact(&self) -> bool {
        matches!(self, Self::Compact(_))
    }

    /// Decode the payload as claims without verifying anything
    ///
    /// # Errors
    /// Returns [`JoseError::InvalidFormat`] if the payload does not decode.
    pub fn claims(&self) -> Result<Claims> {
        match self {
            Self::Compact(token) => {
                let (_, payload, _) = split_compact(token)?;
                b64_decode_json_object(payload)
            }
            Self::General(jws) => jws.claims(),
        }
    }

    /// Lift into JSON form
    ///
    /// A compact token keeps its header byte-exact as `protected`; when that
    /// header has no `kid`, the kid inferred from the claims' `iss` or from
    /// `default_kid` is recorded in the unprotected `header`.
    ///
    /// # Errors
    /// Returns [`JoseError::InvalidFormat`] if a compact token does not decode.
    pub fn into_general(self, default_kid: Option<&str>) -> Result<GeneralJws> {
        match self {
            Self::General(jws) => Ok(jws),
            Self::Compact(token) => {
                let (protected, payload, signature) = split_compact(&token)?;
                let header = JwsHeader::decode(protected)?;

                let unprotected = match header.kid {
                    Some(_) => None,
                    None => {
                        let claims = b64_decode_json_object(payload)?;
                        claims
                            .get("iss")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                            .or_else(|| default_kid.map(str::to_string))
                            .map(|kid| {
                                let mut header = Header::new();
                                header.insert("kid".to_string(), Value::String(kid));
                                header
                            })
                    }
                };

                Ok(GeneralJws {
                    payload: payload.to_string(),
                    signatures: vec![JwsSignature {
                        protected: protected.to_string(),
                        signature: signature.to_string(),
                        header: unprotected,
                    }],
                })
            }
        }
    }
}

impl FromStr for JwsMessage {
    type Err = JoseError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<GeneralJws> for JwsMessage {
    fn from(jws: GeneralJws) -> Self {
        Self::General(jws)
    }
}

impl fmt::Display for JwsMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compact(token) => f.write_str(token),
            Self::General(jws) => {
                let json = serde_json::to_string(jws).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
        }
    }
}

/// Split a compact token into its three segments
pub(crate) fn split_compact(token: &str) -> Result<(&str, &str, &str)> {
    let mut parts = token.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(header), Some(payload), Some(signature), None)
            if !header.is_empty() && !payload.is_empty() && !signature.is_empty() =>
        {
            Ok((header, payload, signature))
        }
        _ => Err(JoseError::InvalidFormat(
            "compact JWS must have three non-empty segments".to_string(),
        )),
    }
}

/// Signer kid with its recorded signing position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyIdRecord {
    /// Resolved signer kid
    pub kid: String,
    /// Signing position, absent on signatures made without one
    pub sidx: Option<u64>,
}

/// Per-recipient JWE header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipientHeader {
    /// Recipient identity
    pub kid: String,
    /// Base64url PartyVInfo
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apv: Option<String>,
    /// Any other members
    #[serde(flatten)]
    pub extra: Header,
}

/// One entry of a JWE `recipients` array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JweRecipient {
    /// Recipient header
    pub header: RecipientHeader,
    /// Base64url AES-wrapped CEK
    pub encrypted_key: String,
}

/// General JSON JWE with per-recipient wrapped keys
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Jwe {
    /// Base64url integrity-protected shared header
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protected: Option<String>,
    /// Shared unprotected header
    #[serde(default)]
    pub unprotected: Header,
    /// Base64url 96-bit IV
    pub iv: String,
    /// Base64url ciphertext
    pub ciphertext: String,
    /// Base64url 128-bit authentication tag
    pub tag: String,
    /// Recipients, each with its own wrapped CEK
    pub recipients: Vec<JweRecipient>,
}

impl Jwe {
    /// Parse from a JSON value
    ///
    /// # Errors
    /// Returns [`JoseError::InvalidFormat`] if a required member is missing or malformed.
    pub fn from_value(value: Value) -> Result<Self> {
        if !is_jwe(&value) {
            return Err(JoseError::InvalidFormat(
                "JWE requires 'iv', 'ciphertext', 'tag' and 'recipients'".to_string(),
            ));
        }
        serde_json::from_value(value)
            .map_err(|e| JoseError::InvalidFormat(format!("invalid JWE: {}", e)))
    }

    /// Parse from a JSON string
    ///
    /// # Errors
    /// See [`Jwe::from_value`].
    pub fn from_json(json: &str) -> Result<Self> {
        Self::from_value(serde_json::from_str(json)?)
    }

    /// Convert to a JSON value
    ///
    /// # Errors
    /// Returns [`JoseError::InvalidFormat`] if serialization fails.
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Serialize to a JSON string
    ///
    /// # Errors
    /// Returns [`JoseError::InvalidFormat`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Merged shared header (`unprotected`, overlaid by decoded `protected`)
    ///
    /// # Errors
    /// Returns [`JoseError::InvalidFormat`] if `protected` is not a base64url JSON object.
    pub fn shared_header(&self) -> Result<Header> {
        let mut header = self.unprotected.clone();
        if let Some(protected) = &self.protected {
            header.extend(b64_decode_json_object(protected)?);
        }
        Ok(header)
    }

    /// Recipient entry addressed to `kid`
    pub fn recipient(&self, kid: &str) -> Option<&JweRecipient> {
        self.recipients
            .iter()
            .find(|recipient| recipient.header.kid == kid)
    }

    /// Recipient kids in order
    pub fn recipient_ids(&self) -> Vec<&str> {
        self.recipients
            .iter()
            .map(|recipient| recipient.header.kid.as_str())
            .collect()
    }
}
