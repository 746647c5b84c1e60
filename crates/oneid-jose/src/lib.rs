//! # oneID JOSE - signing, encryption and replay protection
//!
//! The protocol core of oneID-connect: JSON Web Signatures (compact and
//! JSON-general serialization), flattened-recipient JSON Web Encryption with
//! `ECDH-ES+A256KW` / `A256GCM`, claim normalization, and self-expiring nonces
//! that are burned on successful verification.
//!
//! ## Core Features
//!
//! - ✅ **ES256 only** - ECDSA P-256 with raw `r||s` signatures (no DER)
//! - ✅ **Multi-party JWS** - ordered signers recorded via the `sidx` header
//! - ✅ **Multi-recipient JWE** - one CEK wrapped per recipient with ECDH-ES + Concat KDF
//! - ✅ **Replay Protection** - nonces carry their own expiry and are burned once
//! - ✅ **Pluggable Stores** - file-backed and in-memory [`NonceStore`] implementations
//!
//! ## Architecture
//!
//! - `errors` - error taxonomy shared by every operation
//! - `config` - engine and nonce configuration
//! - `encoding` - base64url / JSON segment helpers
//! - `keys` - P-256 keypairs, JWK import/export, ECDSA and ECDH
//! - `types` - claims, JWS/JWE wire structures and detection helpers
//! - `nonce` - nonce generation, verification and burn stores
//! - `claims` - default claim filling (`jti`, `nbf`, `exp`, `iss`)
//! - `jws` - JWS/JWT construction, extension, removal and verification
//! - `jwe` - JWE construction and decryption
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use oneid_jose::{JoseConfig, JwsEngine, Keypair, MemoryNonceStore, NonceService};
//!
//! # fn main() -> oneid_jose::Result<()> {
//! let config = JoseConfig::default();
//! let nonces = Arc::new(NonceService::with_store(
//!     &config.nonce,
//!     Arc::new(MemoryNonceStore::new()),
//! ));
//! let engine = JwsEngine::new(&config, nonces);
//!
//! let alice = Keypair::generate().with_identity("alice");
//! let mut claims = oneid_jose::Claims::new();
//! claims.insert("foo".into(), "bar".into());
//!
//! let jwt = engine.make_jwt(&claims, &alice)?;
//! let verified = engine.verify_jwt(&jwt, &alice)?;
//! assert_eq!(verified["foo"], "bar");
//! # Ok(())
//! # }
//! ```

pub mod claims;
pub mod config;
pub mod encoding;
pub mod errors;
pub mod jwe;
pub mod jws;
pub mod keys;
pub mod nonce;
pub mod types;

pub use claims::ClaimNormalizer;
pub use config::{JoseConfig, NonceConfig};
pub use errors::JoseError;
pub use jwe::JweEngine;
pub use jws::JwsEngine;
pub use keys::{Jwk, Keypair};
pub use nonce::{
    FileNonceStore, MemoryNonceStore, NonceContext, NonceService, NonceStore, NonceVersion,
    ParsedNonce,
};
pub use types::*;

/// Result type used across the crate
pub type Result<T> = std::result::Result<T, JoseError>;

/// Signature algorithm accepted and produced by this crate
pub const SIGNATURE_ALGORITHM: &str = "ES256";

/// `typ` header of a compact JWT
pub const JWT_TYPE: &str = "JWT";

/// `typ` header of each signature in a JSON-serialized JWS
pub const JOSE_JSON_TYPE: &str = "JOSE+JSON";

/// JWE key management algorithm
pub const KEY_AGREEMENT_ALGORITHM: &str = "ECDH-ES+A256KW";

/// JWE content encryption algorithm
pub const CONTENT_ENCRYPTION_ALGORITHM: &str = "A256GCM";

/// Default claim lifetime (1 hour)
pub const TOKEN_EXPIRATION_TIME_SEC: u64 = 3600;

/// Grace period after `exp` when verifying claims
pub const EXP_LEEWAY_SECONDS: u64 = 3;

/// Grace period before `nbf` when verifying claims
pub const NBF_LEEWAY_SECONDS: u64 = 120;
