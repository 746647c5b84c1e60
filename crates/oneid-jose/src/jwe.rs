//! JWE construction and decryption
//!
//! Messages are general JSON JWE objects using `ECDH-ES+A256KW` key agreement
//! and `A256GCM` content encryption. One ephemeral P-256 key and one CEK are
//! generated per message; each recipient gets the CEK wrapped under a KEK
//! derived from the ephemeral-static ECDH secret with Concat KDF.
//!
//! Decryption failures are reported as [`JoseError::DecryptionFailed`]
//! without saying which step failed.

use std::sync::Arc;

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce, Tag};
use aes_kw::KekAes256;
use p256::ecdh::EphemeralSecret;
use rand::RngCore;
use rand::rngs::OsRng;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;
use zeroize::Zeroizing;

use crate::claims::ClaimNormalizer;
use crate::config::JoseConfig;
use crate::encoding::{b64_decode, b64_encode, json_type_name};
use crate::keys::{Jwk, Keypair, public_jwk};
use crate::nonce::NonceService;
use crate::types::{Claims, Header, Jwe, JweReservedHeader, JweRecipient, RecipientHeader};
use crate::{CONTENT_ENCRYPTION_ALGORITHM, JoseError, KEY_AGREEMENT_ALGORITHM, Result};

/// Claims copied into the shared header
const SHARED_CLAIMS: [&str; 5] = ["iss", "jti", "nbf", "exp", "aud"];

const CEK_LENGTH: usize = 32;
const IV_LENGTH: usize = 12;
const TAG_LENGTH: usize = 16;
const WRAPPED_KEY_LENGTH: usize = CEK_LENGTH + 8;

/// Encrypts claims for one or more recipients and decrypts them
#[derive(Debug, Clone)]
pub struct JweEngine {
    normalizer: ClaimNormalizer,
}

impl JweEngine {
    /// Create an engine sharing `nonces` for `jti` generation
    pub fn new(config: &JoseConfig, nonces: Arc<NonceService>) -> Self {
        Self {
            normalizer: ClaimNormalizer::new(nonces, config.token_lifetime()),
        }
    }

    /// Encrypt `claims` from `sender` to every keypair in `recipients`
    ///
    /// The sender identity becomes `iss` unless the claims carry one.
    ///
    /// # Errors
    /// - [`JoseError::IdentityRequired`] if the sender or a recipient has no identity
    /// - [`JoseError::InvalidKey`] if `recipients` is empty
    /// - [`JoseError::ReservedHeader`] if the claims set `enc`, `alg`, `epk` or `apu`
    /// - [`JoseError::InvalidClaims`] if `exp` falls outside the years a nonce can carry
    pub fn make_jwe(&self, claims: &Claims, sender: &Keypair, recipients: &[Keypair]) -> Result<Jwe> {
        let sender_id = sender
            .identity()
            .ok_or(JoseError::IdentityRequired("JWE sender"))?;
        if recipients.is_empty() {
            return Err(JoseError::InvalidKey(
                "at least one JWE recipient is required".to_string(),
            ));
        }
        if recipients.iter().any(|recipient| recipient.identity().is_none()) {
            return Err(JoseError::IdentityRequired("JWE recipient"));
        }
        if let Some(reserved) = JweReservedHeader::find_in(claims) {
            return Err(JoseError::ReservedHeader(reserved.to_string()));
        }

        let claims = self.normalizer.normalize(claims, Some(sender_id))?;
        let nonce = claims
            .get("jti")
            .and_then(Value::as_str)
            .ok_or_else(|| JoseError::InvalidClaims("'jti' must be a string".to_string()))?;
        let plaintext = Zeroizing::new(serde_json::to_vec(&claims)?);

        let ephemeral = EphemeralSecret::random(&mut OsRng);
        let apu = format!("{}{}", sender_id, nonce);

        let mut unprotected = Header::new();
        unprotected.insert("enc".to_string(), CONTENT_ENCRYPTION_ALGORITHM.into());
        unprotected.insert("alg".to_string(), KEY_AGREEMENT_ALGORITHM.into());
        unprotected.insert(
            "epk".to_string(),
            public_jwk(&ephemeral.public_key(), None).to_value()?,
        );
        unprotected.insert("apu".to_string(), Value::String(b64_encode(&apu)));
        for name in SHARED_CLAIMS {
            if let Some(value) = claims.get(name) {
                unprotected.insert(name.to_string(), value.clone());
            }
        }

        let mut cek = Zeroizing::new([0u8; CEK_LENGTH]);
        OsRng.fill_bytes(cek.as_mut_slice());
        let mut iv = [0u8; IV_LENGTH];
        OsRng.fill_bytes(&mut iv);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(cek.as_slice()));
        let mut ciphertext = plaintext.to_vec();
        let tag = cipher
            .encrypt_in_place_detached(Nonce::from_slice(&iv), b"", &mut ciphertext)
            .map_err(|_| JoseError::Cryptographic("content encryption failed".to_string()))?;

        let mut entries = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            let recipient_id = recipient
                .identity()
                .ok_or(JoseError::IdentityRequired("JWE recipient"))?;
            let apv = format!("{}{}", recipient_id, nonce);

            let shared = ephemeral.diffie_hellman(recipient.public_key());
            let kek = concat_kdf::<CEK_LENGTH>(
                shared.raw_secret_bytes(),
                KEY_AGREEMENT_ALGORITHM,
                apu.as_bytes(),
                apv.as_bytes(),
            );

            let mut wrapped = [0u8; WRAPPED_KEY_LENGTH];
            KekAes256::from(*kek)
                .wrap(cek.as_slice(), &mut wrapped)
                .map_err(|_| JoseError::Cryptographic("key wrap failed".to_string()))?;

            entries.push(JweRecipient {
                header: RecipientHeader {
                    kid: recipient_id.to_string(),
                    apv: Some(b64_encode(&apv)),
                    extra: Header::new(),
                },
                encrypted_key: b64_encode(wrapped),
            });
        }

        debug!(
            sender = %sender_id,
            recipients = entries.len(),
            "Created JWE"
        );
        Ok(Jwe {
            protected: None,
            unprotected,
            iv: b64_encode(iv),
            ciphertext: b64_encode(ciphertext),
            tag: b64_encode(tag),
            recipients: entries,
        })
    }

    /// [`JweEngine::make_jwe`] serialized to JSON
    ///
    /// # Errors
    /// See [`JweEngine::make_jwe`].
    pub fn make_jwe_json(
        &self,
        claims: &Claims,
        sender: &Keypair,
        recipients: &[Keypair],
    ) -> Result<String> {
        self.make_jwe(claims, sender, recipients)?.to_json()
    }

    /// Decrypt a JWE addressed to `recipient` and return its claims
    ///
    /// Timing and nonce checks are left to the caller.
    ///
    /// # Errors
    /// - [`JoseError::IdentityRequired`] if `recipient` has no identity
    /// - [`JoseError::InvalidKey`] if `recipient` has no private key
    /// - [`JoseError::InvalidFormat`] for missing or malformed members, including
    ///   base64url segments whose trailing bits are not canonical; such input is
    ///   rejected before any key material is touched
    /// - [`JoseError::InvalidAlgorithm`] for a shared header other than `ECDH-ES+A256KW`/`A256GCM`
    /// - [`JoseError::InvalidRecipient`] if no recipient entry carries its identity
    /// - [`JoseError::DecryptionFailed`] if key unwrap or authentication fails
    pub fn decrypt_jwe(&self, jwe: &Jwe, recipient: &Keypair) -> Result<Claims> {
        let recipient_id = recipient
            .identity()
            .ok_or(JoseError::IdentityRequired("JWE recipient"))?;

        let shared = jwe.shared_header()?;
        check_member(&shared, "alg", KEY_AGREEMENT_ALGORITHM)?;
        check_member(&shared, "enc", CONTENT_ENCRYPTION_ALGORITHM)?;

        let entry = jwe.recipient(recipient_id).ok_or(JoseError::InvalidRecipient)?;

        let epk = shared
            .get("epk")
            .ok_or_else(|| JoseError::InvalidFormat("JWE header has no 'epk'".to_string()))
            .and_then(Jwk::from_value)?
            .public_key()?;
        let apu = shared
            .get("apu")
            .and_then(Value::as_str)
            .map(b64_decode)
            .transpose()?
            .unwrap_or_default();
        let apv = match shared.get("jti").and_then(Value::as_str) {
            Some(nonce) => format!("{}{}", recipient_id, nonce).into_bytes(),
            None => entry
                .header
                .apv
                .as_deref()
                .map(b64_decode)
                .transpose()?
                .unwrap_or_default(),
        };

        let iv = b64_decode(&jwe.iv)?;
        let tag = b64_decode(&jwe.tag)?;
        if iv.len() != IV_LENGTH || tag.len() != TAG_LENGTH {
            return Err(JoseError::InvalidFormat(format!(
                "JWE iv/tag must be {}/{} bytes, got {}/{}",
                IV_LENGTH,
                TAG_LENGTH,
                iv.len(),
                tag.len()
            )));
        }
        let wrapped = b64_decode(&entry.encrypted_key)?;
        let ciphertext = b64_decode(&jwe.ciphertext)?;

        let z = recipient.diffie_hellman(&epk)?;
        let kek = concat_kdf::<CEK_LENGTH>(z.as_slice(), KEY_AGREEMENT_ALGORITHM, &apu, &apv);

        if wrapped.len() != WRAPPED_KEY_LENGTH {
            return Err(JoseError::DecryptionFailed);
        }
        let mut cek = Zeroizing::new([0u8; CEK_LENGTH]);
        KekAes256::from(*kek)
            .unwrap(&wrapped, cek.as_mut_slice())
            .map_err(|_| JoseError::DecryptionFailed)?;

        let aad = jwe.protected.as_deref().unwrap_or_default();
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(cek.as_slice()));
        let mut plaintext = Zeroizing::new(ciphertext);
        cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(&iv),
                aad.as_bytes(),
                &mut *plaintext,
                Tag::from_slice(&tag),
            )
            .map_err(|_| JoseError::DecryptionFailed)?;

        let claims = match serde_json::from_slice(&plaintext)? {
            Value::Object(claims) => claims,
            other => {
                return Err(JoseError::InvalidFormat(format!(
                    "JWE plaintext must be a JSON object, got {}",
                    json_type_name(&other)
                )));
            }
        };

        debug!(recipient = %recipient_id, "Decrypted JWE");
        Ok(claims)
    }

    /// Parse a JSON JWE and decrypt it
    ///
    /// # Errors
    /// See [`Jwe::from_json`] and [`JweEngine::decrypt_jwe`].
    pub fn decrypt_jwe_json(&self, json: &str, recipient: &Keypair) -> Result<Claims> {
        self.decrypt_jwe(&Jwe::from_json(json)?, recipient)
    }
}

fn check_member(header: &Header, name: &str, expected: &str) -> Result<()> {
    match header.get(name).and_then(Value::as_str) {
        Some(value) if value == expected => Ok(()),
        Some(value) => Err(JoseError::InvalidAlgorithm(format!(
            "JWE '{}' must be {}, got {}",
            name, expected, value
        ))),
        None => Err(JoseError::InvalidFormat(format!(
            "JWE header has no '{}'",
            name
        ))),
    }
}

/// NIST SP 800-56A single-step KDF over SHA-256 with JOSE `OtherInfo`
fn concat_kdf<const N: usize>(
    z: &[u8],
    algorithm: &str,
    apu: &[u8],
    apv: &[u8],
) -> Zeroizing<[u8; N]> {
    let mut output = Zeroizing::new([0u8; N]);
    for (round, chunk) in output.chunks_mut(32).enumerate() {
        let mut hasher = Sha256::new();
        hasher.update((round as u32 + 1).to_be_bytes());
        hasher.update(z);
        for field in [algorithm.as_bytes(), apu, apv] {
            hasher.update((field.len() as u32).to_be_bytes());
            hasher.update(field);
        }
        hasher.update(((N * 8) as u32).to_be_bytes());

        let digest = hasher.finalize();
        chunk.copy_from_slice(&digest[..chunk.len()]);
    }
    output
}
