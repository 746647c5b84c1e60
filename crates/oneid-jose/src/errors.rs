//! Error types for JOSE operations

use thiserror::Error;

/// Every failure reported by the signing, encryption and nonce layers
///
/// Verification failures collapse into a small set of variants so callers can
/// treat them uniformly as "reject this message". Decryption failures carry no
/// detail at all.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JoseError {
    /// Malformed JWT/JWS/JWE structure, bad base64url or missing members
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// A header declares an unsupported algorithm
    #[error("Invalid algorithm: {0}")]
    InvalidAlgorithm(String),

    /// Claims are expired, not yet valid, or carry a rejected nonce
    #[error("Invalid claims: {0}")]
    InvalidClaims(String),

    /// A cryptographic signature check failed
    #[error("Invalid signature for key {kid}")]
    InvalidSignature {
        /// Key id of the signature that failed
        kid: String,
    },

    /// None or not all of the expected signer keys matched the signatures
    #[error("Key/signature mismatch: {0}")]
    KeySignatureMismatch(String),

    /// A keypair is unusable for the requested operation
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Sender or recipient keypair has no identity
    #[error("Keypair identity required for {0}")]
    IdentityRequired(&'static str),

    /// No JWE recipient entry matches the decrypting keypair
    #[error("No matching recipient")]
    InvalidRecipient,

    /// AEAD authentication or key unwrap failure
    #[error("Decryption failed")]
    DecryptionFailed,

    /// Caller tried to set a header that the engine owns
    #[error("Reserved header: {0}")]
    ReservedHeader(String),

    /// Signature indexes are missing or duplicated
    #[error("Invalid signature indexes: {0}")]
    InvalidSignatureIndexes(String),

    /// Replay store could not be read or written
    #[error("Nonce store error: {0}")]
    NonceStore(String),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Key material could not be parsed or encoded
    #[error("Cryptographic error: {0}")]
    Cryptographic(String),
}

impl JoseError {
    /// Whether this error means the message itself must be rejected
    ///
    /// Caller misuse (reserved headers, missing identities) and environment
    /// failures (nonce store I/O, configuration) are not rejections.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            JoseError::InvalidFormat(_)
                | JoseError::InvalidAlgorithm(_)
                | JoseError::InvalidClaims(_)
                | JoseError::InvalidSignature { .. }
                | JoseError::KeySignatureMismatch(_)
                | JoseError::InvalidRecipient
                | JoseError::DecryptionFailed
        )
    }

    /// Get error category for metrics and logging
    pub fn category(&self) -> &'static str {
        match self {
            JoseError::InvalidFormat(_) => "invalid_format",
            JoseError::InvalidAlgorithm(_) => "invalid_algorithm",
            JoseError::InvalidClaims(_) => "invalid_claims",
            JoseError::InvalidSignature { .. } => "invalid_signature",
            JoseError::KeySignatureMismatch(_) => "key_signature_mismatch",
            JoseError::InvalidKey(_) => "invalid_key",
            JoseError::IdentityRequired(_) => "identity_required",
            JoseError::InvalidRecipient => "invalid_recipient",
            JoseError::DecryptionFailed => "decryption_failed",
            JoseError::ReservedHeader(_) => "reserved_header",
            JoseError::InvalidSignatureIndexes(_) => "invalid_signature_indexes",
            JoseError::NonceStore(_) => "nonce_store",
            JoseError::Configuration(_) => "configuration",
            JoseError::Cryptographic(_) => "cryptographic",
        }
    }
}

impl From<serde_json::Error> for JoseError {
    fn from(error: serde_json::Error) -> Self {
        JoseError::InvalidFormat(format!("JSON error: {}", error))
    }
}

impl From<std::io::Error> for JoseError {
    fn from(error: std::io::Error) -> Self {
        JoseError::NonceStore(format!("I/O operation failed: {}", error))
    }
}
