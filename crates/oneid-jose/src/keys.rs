//! P-256 keypairs and JSON Web Keys
//!
//! A [`Keypair`] wraps a P-256 public key, optionally its private scalar, and
//! an identity used as the `kid` of everything it signs or decrypts. Keypairs
//! are immutable once built; the private scalar is zeroized on drop.
//!
//! Signatures are ES256 in the JOSE encoding: the raw 64-byte `r||s`
//! concatenation, each half big-endian and zero-padded to 32 bytes. ASN.1 DER
//! signatures are never produced or accepted.

use std::fmt;

use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use p256::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use p256::{EncodedPoint, FieldBytes, PublicKey, SecretKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, Zeroizing};

use crate::encoding::{b64_decode, b64_encode};
use crate::{JoseError, Result};

/// Length of a raw ES256 signature (`r||s`)
pub const SIGNATURE_LENGTH: usize = 64;

/// Length of a P-256 coordinate or scalar
const COORDINATE_LENGTH: usize = 32;

/// JSON Web Key for a P-256 key
///
/// `d` is present only for private keys and is zeroized on drop.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type - always "EC"
    pub kty: String,
    /// Curve - always "P-256"
    pub crv: String,
    /// X coordinate (base64url)
    pub x: String,
    /// Y coordinate (base64url)
    pub y: String,
    /// Private scalar (base64url)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,
    /// Key identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

impl Jwk {
    /// Parse a JWK from a JSON value
    ///
    /// # Errors
    /// Returns [`JoseError::InvalidFormat`] if required members are missing.
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| JoseError::InvalidFormat(format!("invalid JWK: {}", e)))
    }

    /// Convert to a JSON value
    ///
    /// # Errors
    /// Returns [`JoseError::InvalidFormat`] if serialization fails.
    pub fn to_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Whether this JWK carries a private scalar
    pub fn is_private(&self) -> bool {
        self.d.is_some()
    }

    /// Decode the public point
    ///
    /// # Errors
    /// Returns [`JoseError::InvalidKey`] for a non P-256 key and
    /// [`JoseError::InvalidFormat`] for malformed coordinates.
    pub fn public_key(&self) -> Result<PublicKey> {
        if self.kty != "EC" || self.crv != "P-256" {
            return Err(JoseError::InvalidKey(format!(
                "unsupported JWK kty={} crv={} (only EC P-256)",
                self.kty, self.crv
            )));
        }

        let x = decode_coordinate("x", &self.x)?;
        let y = decode_coordinate("y", &self.y)?;
        let point = EncodedPoint::from_affine_coordinates(
            FieldBytes::from_slice(&x),
            FieldBytes::from_slice(&y),
            false,
        );

        Option::from(PublicKey::from_encoded_point(&point))
            .ok_or_else(|| JoseError::InvalidFormat("JWK point is not on P-256".to_string()))
    }

    /// RFC 7638 thumbprint (base64url SHA-256 of the canonical public members)
    pub fn thumbprint(&self) -> String {
        // Members in lexicographic order, no whitespace
        let canonical = format!(
            r#"{{"crv":"{}","kty":"{}","x":"{}","y":"{}"}}"#,
            self.crv, self.kty, self.x, self.y
        );
        b64_encode(Sha256::digest(canonical.as_bytes()))
    }
}

impl fmt::Debug for Jwk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Jwk")
            .field("kty", &self.kty)
            .field("crv", &self.crv)
            .field("x", &self.x)
            .field("y", &self.y)
            .field("d", &self.d.as_ref().map(|_| "<redacted>"))
            .field("kid", &self.kid)
            .finish()
    }
}

impl Drop for Jwk {
    fn drop(&mut self) {
        if let Some(d) = self.d.as_mut() {
            d.zeroize();
        }
    }
}

/// P-256 keypair with an optional private key and an identity
#[derive(Clone)]
pub struct Keypair {
    identity: Option<String>,
    secret: Option<SecretKey>,
    public: PublicKey,
}

impl Keypair {
    /// Generate a new P-256 keypair without an identity
    #[must_use]
    pub fn generate() -> Self {
        Self::from_secret(SecretKey::random(&mut OsRng))
    }

    /// Generate a new P-256 keypair identified by a random UUID
    #[must_use]
    pub fn generate_identified() -> Self {
        Self::generate().with_identity(uuid::Uuid::new_v4().to_string())
    }

    fn from_secret(secret: SecretKey) -> Self {
        Self {
            identity: None,
            public: secret.public_key(),
            secret: Some(secret),
        }
    }

    /// Build a verification-only keypair from a public key
    #[must_use]
    pub fn from_public_key(public: PublicKey) -> Self {
        Self {
            identity: None,
            secret: None,
            public,
        }
    }

    /// Import a raw 32-byte private scalar
    ///
    /// # Errors
    /// Returns [`JoseError::Cryptographic`] if the bytes are not a valid scalar.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        SecretKey::from_slice(bytes)
            .map(Self::from_secret)
            .map_err(|e| JoseError::Cryptographic(format!("invalid P-256 private key: {}", e)))
    }

    /// Import a DER private key (PKCS#8, falling back to SEC1)
    ///
    /// # Errors
    /// Returns [`JoseError::Cryptographic`] if neither encoding parses.
    pub fn from_secret_der(der: &[u8]) -> Result<Self> {
        SecretKey::from_pkcs8_der(der)
            .or_else(|_| SecretKey::from_sec1_der(der))
            .map(Self::from_secret)
            .map_err(|e| JoseError::Cryptographic(format!("invalid DER private key: {}", e)))
    }

    /// Import a PEM private key (PKCS#8, falling back to SEC1)
    ///
    /// # Errors
    /// Returns [`JoseError::Cryptographic`] if neither encoding parses.
    pub fn from_secret_pem(pem: &str) -> Result<Self> {
        SecretKey::from_pkcs8_pem(pem)
            .or_else(|_| SecretKey::from_sec1_pem(pem))
            .map(Self::from_secret)
            .map_err(|e| JoseError::Cryptographic(format!("invalid PEM private key: {}", e)))
    }

    /// Import a SEC1 encoded public point (compressed or uncompressed)
    ///
    /// # Errors
    /// Returns [`JoseError::Cryptographic`] if the point is invalid.
    pub fn from_public_bytes(bytes: &[u8]) -> Result<Self> {
        PublicKey::from_sec1_bytes(bytes)
            .map(Self::from_public_key)
            .map_err(|e| JoseError::Cryptographic(format!("invalid P-256 public key: {}", e)))
    }

    /// Import a DER SubjectPublicKeyInfo
    ///
    /// # Errors
    /// Returns [`JoseError::Cryptographic`] if the document does not parse.
    pub fn from_public_der(der: &[u8]) -> Result<Self> {
        PublicKey::from_public_key_der(der)
            .map(Self::from_public_key)
            .map_err(|e| JoseError::Cryptographic(format!("invalid DER public key: {}", e)))
    }

    /// Import a PEM SubjectPublicKeyInfo
    ///
    /// # Errors
    /// Returns [`JoseError::Cryptographic`] if the document does not parse.
    pub fn from_public_pem(pem: &str) -> Result<Self> {
        PublicKey::from_public_key_pem(pem)
            .map(Self::from_public_key)
            .map_err(|e| JoseError::Cryptographic(format!("invalid PEM public key: {}", e)))
    }

    /// Import a JWK; `kid` becomes the identity and `d`, when present, the private key
    ///
    /// # Errors
    /// Returns [`JoseError::InvalidKey`] if `d` does not match `x`/`y`, or the
    /// errors of [`Jwk::public_key`].
    pub fn from_jwk(jwk: &Jwk) -> Result<Self> {
        let public = jwk.public_key()?;

        let mut keypair = match &jwk.d {
            Some(d) => {
                let scalar = Zeroizing::new(decode_coordinate("d", d)?);
                let keypair = Self::from_secret_bytes(scalar.as_slice())?;
                if keypair.public != public {
                    return Err(JoseError::InvalidKey(
                        "JWK private scalar does not match its public point".to_string(),
                    ));
                }
                keypair
            }
            None => Self::from_public_key(public),
        };

        keypair.identity = jwk.kid.clone();
        Ok(keypair)
    }

    /// Attach an identity
    #[must_use]
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// Identity used as `kid`
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Whether the private key is available
    pub fn is_private(&self) -> bool {
        self.secret.is_some()
    }

    /// Public key
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// A verification-only copy of this keypair
    #[must_use]
    pub fn to_public(&self) -> Self {
        Self {
            identity: self.identity.clone(),
            secret: None,
            public: self.public,
        }
    }

    fn secret(&self) -> Result<&SecretKey> {
        self.secret.as_ref().ok_or_else(|| {
            JoseError::InvalidKey(format!(
                "keypair {} has no private key",
                self.identity.as_deref().unwrap_or("<unidentified>")
            ))
        })
    }

    /// Public JWK (with `kid` when the keypair has an identity)
    pub fn to_jwk(&self) -> Jwk {
        public_jwk(&self.public, self.identity.clone())
    }

    /// Private JWK including `d`
    ///
    /// # Errors
    /// Returns [`JoseError::InvalidKey`] for a public-only keypair.
    pub fn to_private_jwk(&self) -> Result<Jwk> {
        let secret = self.secret()?;
        let mut jwk = self.to_jwk();
        jwk.d = Some(b64_encode(secret.to_bytes()));
        Ok(jwk)
    }

    /// PKCS#8 DER private key
    ///
    /// # Errors
    /// Returns [`JoseError::InvalidKey`] for a public-only keypair.
    pub fn secret_as_der(&self) -> Result<Zeroizing<Vec<u8>>> {
        let document = self
            .secret()?
            .to_pkcs8_der()
            .map_err(|e| JoseError::Cryptographic(format!("PKCS#8 encoding failed: {}", e)))?;
        Ok(Zeroizing::new(document.as_bytes().to_vec()))
    }

    /// PKCS#8 PEM private key
    ///
    /// # Errors
    /// Returns [`JoseError::InvalidKey`] for a public-only keypair.
    pub fn secret_as_pem(&self) -> Result<Zeroizing<String>> {
        self.secret()?
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| JoseError::Cryptographic(format!("PKCS#8 encoding failed: {}", e)))
    }

    /// DER SubjectPublicKeyInfo
    ///
    /// # Errors
    /// Returns [`JoseError::Cryptographic`] if encoding fails.
    pub fn public_as_der(&self) -> Result<Vec<u8>> {
        self.public
            .to_public_key_der()
            .map(|document| document.as_bytes().to_vec())
            .map_err(|e| JoseError::Cryptographic(format!("SPKI encoding failed: {}", e)))
    }

    /// PEM SubjectPublicKeyInfo
    ///
    /// # Errors
    /// Returns [`JoseError::Cryptographic`] if encoding fails.
    pub fn public_as_pem(&self) -> Result<String> {
        self.public
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| JoseError::Cryptographic(format!("SPKI encoding failed: {}", e)))
    }

    /// RFC 7638 thumbprint of the public key
    pub fn thumbprint(&self) -> String {
        public_jwk(&self.public, None).thumbprint()
    }

    /// Sign a message with ES256, returning the raw `r||s` signature
    ///
    /// # Errors
    /// Returns [`JoseError::InvalidKey`] for a public-only keypair.
    pub fn sign(&self, message: &[u8]) -> Result<[u8; SIGNATURE_LENGTH]> {
        let signing_key = SigningKey::from(self.secret()?);
        let signature: Signature = signing_key.sign(message);

        let mut raw = [0u8; SIGNATURE_LENGTH];
        raw.copy_from_slice(&signature.to_bytes());
        Ok(raw)
    }

    /// Verify a raw `r||s` ES256 signature
    ///
    /// # Errors
    /// Returns [`JoseError::InvalidSignature`] if the signature is malformed or does not verify.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<()> {
        let invalid = || JoseError::InvalidSignature {
            kid: self
                .identity
                .clone()
                .unwrap_or_else(|| "<unidentified>".to_string()),
        };

        if signature.len() != SIGNATURE_LENGTH {
            return Err(invalid());
        }
        let signature = Signature::from_slice(signature).map_err(|_| invalid())?;

        VerifyingKey::from(&self.public)
            .verify(message, &signature)
            .map_err(|_| invalid())
    }

    /// Raw ECDH shared secret with a peer public key
    ///
    /// # Errors
    /// Returns [`JoseError::InvalidKey`] for a public-only keypair.
    pub fn diffie_hellman(&self, peer: &PublicKey) -> Result<Zeroizing<[u8; COORDINATE_LENGTH]>> {
        let shared = p256::ecdh::diffie_hellman(self.secret()?.to_nonzero_scalar(), peer.as_affine());

        let mut raw = Zeroizing::new([0u8; COORDINATE_LENGTH]);
        raw.copy_from_slice(shared.raw_secret_bytes());
        Ok(raw)
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("identity", &self.identity)
            .field("private", &self.secret.is_some())
            .field("thumbprint", &self.thumbprint())
            .finish()
    }
}

/// Public JWK for a P-256 point
pub(crate) fn public_jwk(public: &PublicKey, kid: Option<String>) -> Jwk {
    let point = public.to_encoded_point(false);
    // Uncompressed points always carry both coordinates
    let x = point.x().map(b64_encode).unwrap_or_default();
    let y = point.y().map(b64_encode).unwrap_or_default();

    Jwk {
        kty: "EC".to_string(),
        crv: "P-256".to_string(),
        x,
        y,
        d: None,
        kid,
    }
}

fn decode_coordinate(name: &str, value: &str) -> Result<Vec<u8>> {
    let bytes = b64_decode(value)?;
    if bytes.len() > COORDINATE_LENGTH {
        return Err(JoseError::InvalidFormat(format!(
            "JWK member '{}' is {} bytes, expected {}",
            name,
            bytes.len(),
            COORDINATE_LENGTH
        )));
    }

    // Left-pad short encodings from peers that strip leading zeros
    let mut padded = vec![0u8; COORDINATE_LENGTH - bytes.len()];
    padded.extend_from_slice(&bytes);
    Ok(padded)
}
