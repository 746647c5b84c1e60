//! JWS and JWT construction and verification
//!
//! Compact tokens carry a single `JWT` signature. JSON-serialized JWS objects
//! carry any number of `JOSE+JSON` signatures over one payload; each protected
//! header records its signer `kid` and its signing position `sidx`, so the
//! signing order survives serializers that reorder arrays or objects.
//!
//! Successful verification burns the claims' `jti` once per verified
//! signature through the shared [`NonceService`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use crate::claims::{ClaimNormalizer, numeric_date};
use crate::config::JoseConfig;
use crate::encoding::{b64_decode, b64_decode_json_object, b64_encode, b64_encode_json};
use crate::keys::Keypair;
use crate::nonce::{NonceContext, NonceService};
use crate::types::{
    Claims, GeneralJws, Header, JwsHeader, JwsMessage, JwsReservedHeader, JwsSignature,
    KeyIdRecord, split_compact,
};
use crate::{JOSE_JSON_TYPE, JWT_TYPE, JoseError, Result, SIGNATURE_ALGORITHM};

/// Signs and verifies compact and JSON-serialized JWS messages
#[derive(Debug, Clone)]
pub struct JwsEngine {
    normalizer: ClaimNormalizer,
    nonces: Arc<NonceService>,
    exp_leeway: i64,
    nbf_leeway: i64,
}

impl JwsEngine {
    /// Create an engine sharing `nonces` for `jti` generation and burning
    pub fn new(config: &JoseConfig, nonces: Arc<NonceService>) -> Self {
        Self {
            normalizer: ClaimNormalizer::new(nonces.clone(), config.token_lifetime()),
            nonces,
            exp_leeway: i64::try_from(config.exp_leeway_secs).unwrap_or(i64::MAX),
            nbf_leeway: i64::try_from(config.nbf_leeway_secs).unwrap_or(i64::MAX),
        }
    }

    /// Claim normalizer used before signing
    pub fn normalizer(&self) -> &ClaimNormalizer {
        &self.normalizer
    }

    /// Sign `claims` as a compact JWT
    ///
    /// # Errors
    /// - [`JoseError::InvalidKey`] if `keypair` has no private key
    /// - [`JoseError::InvalidClaims`] if `exp` falls outside the years a nonce can carry
    pub fn make_jwt(&self, claims: &Claims, keypair: &Keypair) -> Result<String> {
        let claims = self.normalizer.normalize(claims, None)?;
        let header = JwsHeader {
            typ: Some(JWT_TYPE.to_string()),
            alg: SIGNATURE_ALGORITHM.to_string(),
            kid: keypair.identity().map(str::to_string),
            sidx: None,
            extra: Header::new(),
        };

        let signing_input = format!("{}.{}", header.encode()?, b64_encode_json(&claims)?);
        let signature = keypair.sign(signing_input.as_bytes())?;

        debug!(kid = ?keypair.identity(), "Created JWT");
        Ok(format!("{}.{}", signing_input, b64_encode(signature)))
    }

    /// Sign `claims` with every keypair, in order, as a JSON JWS
    ///
    /// `headers`, when given, supplies one set of extra protected members per
    /// keypair; the engine-owned members (`typ`, `alg`, `kid`, `sidx`) may not
    /// appear in them.
    ///
    /// # Errors
    /// - [`JoseError::InvalidKey`] if `keypairs` is empty or a keypair has no identity or private key
    /// - [`JoseError::ReservedHeader`] if a header sets an engine-owned member
    /// - [`JoseError::InvalidFormat`] if `headers` and `keypairs` differ in length
    /// - [`JoseError::InvalidClaims`] if `exp` falls outside the years a nonce can carry
    pub fn make_jws(
        &self,
        claims: &Claims,
        keypairs: &[Keypair],
        headers: Option<&[Header]>,
    ) -> Result<GeneralJws> {
        if keypairs.is_empty() {
            return Err(JoseError::InvalidKey(
                "at least one signing keypair is required".to_string(),
            ));
        }
        let headers = prepare_headers(keypairs, headers, Some(0))?;

        let claims = self.normalizer.normalize(claims, None)?;
        let payload = b64_encode_json(&claims)?;
        let signatures = sign_all(&payload, keypairs, headers)?;

        debug!(signatures = signatures.len(), "Created JWS");
        Ok(GeneralJws {
            payload,
            signatures,
        })
    }

    /// Append signatures to an existing JWS or JWT
    ///
    /// Existing signatures are neither verified nor modified. New signers get
    /// contiguous `sidx` values after the highest existing one, unless more
    /// than one existing signature already lacks an index.
    ///
    /// # Errors
    /// Same as [`JwsEngine::make_jws`], plus [`JoseError::InvalidFormat`] if an
    /// existing protected header does not decode.
    pub fn extend_jws_signatures(
        &self,
        jws: &JwsMessage,
        keypairs: &[Keypair],
        default_kid: Option<&str>,
        headers: Option<&[Header]>,
    ) -> Result<GeneralJws> {
        let mut general = jws.clone().into_general(default_kid)?;

        let existing = general
            .signatures
            .iter()
            .map(JwsSignature::protected_header)
            .collect::<Result<Vec<_>>>()?;
        let unindexed = existing.iter().filter(|header| header.sidx.is_none()).count();
        let first_sidx = (unindexed <= 1).then(|| {
            existing
                .iter()
                .filter_map(|header| header.sidx)
                .max()
                .map_or(unindexed as u64, |max| max + 1)
        });

        let headers = prepare_headers(keypairs, headers, first_sidx)?;
        let added = sign_all(&general.payload, keypairs, headers)?;

        debug!(
            existing = general.signatures.len(),
            added = added.len(),
            first_sidx = ?first_sidx,
            "Extended JWS"
        );
        general.signatures.extend(added);
        Ok(general)
    }

    /// Drop every signature whose resolved kid is in `kids`
    ///
    /// The payload is untouched and the result may have no signatures.
    ///
    /// # Errors
    /// Returns [`JoseError::InvalidFormat`] if a protected header does not decode.
    pub fn remove_jws_signatures(jws: &JwsMessage, kids: &[&str]) -> Result<GeneralJws> {
        let mut general = jws.clone().into_general(None)?;
        let before = general.signatures.len();

        let mut kept = Vec::with_capacity(before);
        for signature in general.signatures {
            let remove = signature
                .resolve_kid(None)?
                .is_some_and(|kid| kids.contains(&kid.as_str()));
            if !remove {
                kept.push(signature);
            }
        }
        general.signatures = kept;

        debug!(removed = before - general.signatures.len(), "Removed JWS signatures");
        Ok(general)
    }

    /// Verify a compact JWT with `keypair` and return its claims
    ///
    /// # Errors
    /// - [`JoseError::InvalidFormat`] for a malformed token
    /// - [`JoseError::InvalidAlgorithm`] if the header `alg` is not ES256
    /// - [`JoseError::InvalidSignature`] if the signature does not verify
    /// - [`JoseError::InvalidClaims`] for expired, not yet valid or replayed claims
    pub fn verify_jwt(&self, jwt: &str, keypair: &Keypair) -> Result<Claims> {
        let (protected, payload, signature) = split_compact(jwt.trim())?;
        let header = JwsHeader::decode(protected)?;
        check_algorithm(&header)?;

        let kid = keypair
            .identity()
            .map(str::to_string)
            .or(header.kid)
            .unwrap_or_else(|| "<unidentified>".to_string());
        let signature =
            verify_signature(keypair, &kid, &format!("{}.{}", protected, payload), signature)?;

        let claims = b64_decode_json_object(payload)?;
        self.check_claims(&claims, &[NonceContext::new(kid.clone(), signature)])?;

        debug!(kid = %kid, "Verified JWT");
        Ok(claims)
    }

    /// Verify a JWS or JWT and return its claims
    ///
    /// With `verify_all`, every signature must be checked and the keypairs
    /// must match the signers exactly. Otherwise only signatures from the
    /// supplied keypairs are checked. Without keypairs nothing is verified
    /// cryptographically: claims are time-checked and the nonce is checked
    /// but not burned.
    ///
    /// # Errors
    /// - [`JoseError::KeySignatureMismatch`] if the keypairs do not line up with the signers
    /// - [`JoseError::InvalidFormat`] for a malformed message or a signature without a resolvable kid
    /// - [`JoseError::InvalidAlgorithm`] if any signature is not ES256
    /// - [`JoseError::InvalidSignature`] if a checked signature does not verify
    /// - [`JoseError::InvalidClaims`] for expired, not yet valid or replayed claims
    pub fn verify_jws(
        &self,
        jws: &JwsMessage,
        keypairs: Option<&[Keypair]>,
        verify_all: bool,
        default_kid: Option<&str>,
    ) -> Result<Claims> {
        let general = match jws {
            JwsMessage::Compact(token) => {
                let keypair = select_compact_keypair(token, keypairs, verify_all, default_kid)?;
                return self.verify_jwt(token, keypair);
            }
            JwsMessage::General(general) => general,
        };

        for signature in &general.signatures {
            check_algorithm(&signature.protected_header()?)?;
        }

        let mut contexts = Vec::new();
        if let Some(keypairs) = keypairs {
            let mut by_kid: HashMap<&str, &Keypair> = HashMap::with_capacity(keypairs.len());
            for keypair in keypairs {
                let kid = keypair.identity().ok_or_else(|| {
                    JoseError::InvalidKey("verification keypairs need an identity".to_string())
                })?;
                by_kid.insert(kid, keypair);
            }

            let mut signed = Vec::with_capacity(general.signatures.len());
            for signature in &general.signatures {
                let kid = signature.resolve_kid(default_kid)?.ok_or_else(|| {
                    JoseError::InvalidFormat("signature has no resolvable kid".to_string())
                })?;
                signed.push((kid, signature));
            }

            let signed_kids: HashSet<&str> = signed.iter().map(|(kid, _)| kid.as_str()).collect();
            let key_kids: HashSet<&str> = by_kid.keys().copied().collect();
            if signed_kids.is_disjoint(&key_kids) {
                warn!(keys = key_kids.len(), signatures = signed.len(), "No signature matches the supplied keys");
                return Err(JoseError::KeySignatureMismatch(
                    "no supplied key matches a signature".to_string(),
                ));
            }
            if verify_all && signed_kids != key_kids {
                warn!(keys = key_kids.len(), signatures = signed.len(), "Signers and keys differ");
                return Err(JoseError::KeySignatureMismatch(
                    "supplied keys do not match the signers".to_string(),
                ));
            }

            for (kid, signature) in &signed {
                let Some(keypair) = by_kid.get(kid.as_str()) else {
                    continue;
                };
                let raw = verify_signature(
                    keypair,
                    kid,
                    &format!("{}.{}", signature.protected, general.payload),
                    &signature.signature,
                )?;
                contexts.push(NonceContext::new(kid.clone(), raw));
            }
        }

        let claims = general.claims()?;
        self.check_claims(&claims, &contexts)?;

        debug!(
            signatures = general.signatures.len(),
            verified = contexts.len(),
            "Verified JWS"
        );
        Ok(claims)
    }

    /// Signer kids with their `sidx`, optionally sorted by signing order
    ///
    /// # Errors
    /// - [`JoseError::InvalidFormat`] if a kid cannot be resolved or a header does not decode
    /// - [`JoseError::InvalidSignatureIndexes`] when `ordered` and the indexes are ambiguous
    pub fn get_jws_key_ids(
        jws: &JwsMessage,
        default_kid: Option<&str>,
        ordered: bool,
    ) -> Result<Vec<KeyIdRecord>> {
        let general = jws.clone().into_general(default_kid)?;

        let mut records = Vec::with_capacity(general.signatures.len());
        for signature in &general.signatures {
            let kid = signature.resolve_kid(default_kid)?.ok_or_else(|| {
                JoseError::InvalidFormat("signature has no resolvable kid".to_string())
            })?;
            records.push(KeyIdRecord {
                kid,
                sidx: signature.protected_header()?.sidx,
            });
        }

        if ordered {
            check_indexes(records.iter().map(|record| record.sidx))?;
            records.sort_by_key(|record| record.sidx);
        }
        Ok(records)
    }

    /// Decoded protected headers, optionally sorted by signing order
    ///
    /// # Errors
    /// - [`JoseError::InvalidFormat`] if a header does not decode
    /// - [`JoseError::InvalidSignatureIndexes`] when `ordered` and the indexes are ambiguous
    pub fn get_jws_headers(jws: &JwsMessage, ordered: bool) -> Result<Vec<JwsHeader>> {
        let general = jws.clone().into_general(None)?;
        let mut headers = general
            .signatures
            .iter()
            .map(JwsSignature::protected_header)
            .collect::<Result<Vec<_>>>()?;

        if ordered {
            check_indexes(headers.iter().map(|header| header.sidx))?;
            headers.sort_by_key(|header| header.sidx);
        }
        Ok(headers)
    }

    fn check_claims(&self, claims: &Claims, contexts: &[NonceContext]) -> Result<()> {
        let now = Utc::now().timestamp();

        if let Some(exp) = claims.get("exp") {
            let exp = numeric_date(exp)
                .ok_or_else(|| JoseError::InvalidClaims("'exp' must be numeric".to_string()))?;
            if now > exp.saturating_add(self.exp_leeway) {
                return Err(JoseError::InvalidClaims("token has expired".to_string()));
            }
        }
        if let Some(nbf) = claims.get("nbf") {
            let nbf = numeric_date(nbf)
                .ok_or_else(|| JoseError::InvalidClaims("'nbf' must be numeric".to_string()))?;
            if now < nbf.saturating_sub(self.nbf_leeway) {
                return Err(JoseError::InvalidClaims("token is not yet valid".to_string()));
            }
        }

        let Some(jti) = claims.get("jti") else {
            return Ok(());
        };
        let jti = jti
            .as_str()
            .ok_or_else(|| JoseError::InvalidClaims("'jti' must be a string".to_string()))?;

        if contexts.is_empty() {
            if !self.nonces.verify_nonce(jti, None, None)? {
                return Err(JoseError::InvalidClaims("nonce rejected".to_string()));
            }
            return Ok(());
        }

        for context in contexts {
            if !self.nonces.verify_nonce(jti, None, Some(context))? {
                return Err(JoseError::InvalidClaims("nonce rejected".to_string()));
            }
        }
        for context in contexts {
            self.nonces.burn_nonce(jti, Some(context))?;
        }
        Ok(())
    }
}

/// Extra protected members per keypair, with their assigned `sidx`
fn prepare_headers(
    keypairs: &[Keypair],
    headers: Option<&[Header]>,
    first_sidx: Option<u64>,
) -> Result<Vec<(Header, Option<u64>)>> {
    if let Some(headers) = headers {
        if headers.len() != keypairs.len() {
            return Err(JoseError::InvalidFormat(format!(
                "expected {} signature headers, got {}",
                keypairs.len(),
                headers.len()
            )));
        }
        if let Some(reserved) = headers.iter().find_map(JwsReservedHeader::find_in) {
            return Err(JoseError::ReservedHeader(reserved.to_string()));
        }
    }
    if keypairs.iter().any(|keypair| keypair.identity().is_none()) {
        return Err(JoseError::InvalidKey(
            "keypair identity is required for JSON JWS".to_string(),
        ));
    }

    Ok((0..keypairs.len())
        .map(|position| {
            let extra = headers
                .and_then(|headers| headers.get(position))
                .cloned()
                .unwrap_or_default();
            (extra, first_sidx.map(|first| first + position as u64))
        })
        .collect())
}

fn sign_all(
    payload: &str,
    keypairs: &[Keypair],
    headers: Vec<(Header, Option<u64>)>,
) -> Result<Vec<JwsSignature>> {
    keypairs
        .iter()
        .zip(headers)
        .map(|(keypair, (extra, sidx))| {
            let header = JwsHeader {
                typ: Some(JOSE_JSON_TYPE.to_string()),
                alg: SIGNATURE_ALGORITHM.to_string(),
                kid: keypair.identity().map(str::to_string),
                sidx,
                extra,
            };
            let protected = header.encode()?;
            let signature = keypair.sign(format!("{}.{}", protected, payload).as_bytes())?;
            Ok(JwsSignature {
                protected,
                signature: b64_encode(signature),
                header: None,
            })
        })
        .collect()
}

fn check_algorithm(header: &JwsHeader) -> Result<()> {
    if header.alg == SIGNATURE_ALGORITHM {
        Ok(())
    } else {
        Err(JoseError::InvalidAlgorithm(format!(
            "expected {}, got {}",
            SIGNATURE_ALGORITHM, header.alg
        )))
    }
}

/// Verify one signature segment, returning the raw signature bytes
fn verify_signature(
    keypair: &Keypair,
    kid: &str,
    signing_input: &str,
    signature: &str,
) -> Result<Vec<u8>> {
    let invalid = || {
        warn!(kid = %kid, "Signature verification failed");
        JoseError::InvalidSignature {
            kid: kid.to_string(),
        }
    };

    let raw = b64_decode(signature).map_err(|_| invalid())?;
    keypair
        .verify(signing_input.as_bytes(), &raw)
        .map_err(|_| invalid())?;
    Ok(raw)
}

fn select_compact_keypair<'a>(
    token: &str,
    keypairs: Option<&'a [Keypair]>,
    verify_all: bool,
    default_kid: Option<&str>,
) -> Result<&'a Keypair> {
    let keypairs = keypairs.unwrap_or_default();
    if verify_all {
        return match keypairs {
            [keypair] => Ok(keypair),
            _ => Err(JoseError::KeySignatureMismatch(format!(
                "compact JWS needs exactly one keypair, got {}",
                keypairs.len()
            ))),
        };
    }

    let (protected, _, _) = split_compact(token)?;
    let kid = JwsHeader::decode(protected)?
        .kid
        .or_else(|| default_kid.map(str::to_string));
    match (kid, keypairs) {
        (_, [keypair]) => Ok(keypair),
        (Some(kid), _) => keypairs
            .iter()
            .find(|keypair| keypair.identity() == Some(kid.as_str()))
            .ok_or_else(|| {
                JoseError::KeySignatureMismatch(format!("no keypair for signer {}", kid))
            }),
        (None, _) => Err(JoseError::KeySignatureMismatch(
            "compact JWS signer cannot be matched to a keypair".to_string(),
        )),
    }
}

/// At most one missing `sidx` and no duplicates
fn check_indexes(indexes: impl Iterator<Item = Option<u64>>) -> Result<()> {
    let mut seen = HashSet::new();
    let mut unindexed = 0usize;
    for sidx in indexes {
        match sidx {
            None => unindexed += 1,
            Some(sidx) if !seen.insert(sidx) => {
                return Err(JoseError::InvalidSignatureIndexes(format!(
                    "sidx {} appears more than once",
                    sidx
                )));
            }
            Some(_) => {}
        }
    }
    if unindexed > 1 {
        return Err(JoseError::InvalidSignatureIndexes(format!(
            "{} signatures have no sidx",
            unindexed
        )));
    }
    Ok(())
}

/// Header value convenience for callers building per-signer headers
pub fn signer_header<I, K, V>(members: I) -> Header
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    members
        .into_iter()
        .map(|(name, value)| (name.into(), value.into()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NonceConfig;
    use crate::nonce::MemoryNonceStore;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn engine() -> JwsEngine {
        let nonces = NonceService::with_store(
            &NonceConfig::default(),
            Arc::new(MemoryNonceStore::new()),
        );
        JwsEngine::new(&JoseConfig::default(), Arc::new(nonces))
    }

    fn claims(value: Value) -> Claims {
        value.as_object().cloned().unwrap()
    }

    fn signers(names: &[&str]) -> Vec<Keypair> {
        names
            .iter()
            .map(|name| Keypair::generate().with_identity(*name))
            .collect()
    }

    fn kids(records: &[KeyIdRecord]) -> Vec<&str> {
        records.iter().map(|record| record.kid.as_str()).collect()
    }

    #[test]
    fn test_make_jwt_shape() {
        let alice = Keypair::generate().with_identity("alice");
        let jwt = engine().make_jwt(&claims(json!({"foo": "bar"})), &alice).unwrap();

        let segments: Vec<&str> = jwt.split('.').collect();
        assert_eq!(segments.len(), 3);
        assert_eq!(b64_decode(segments[2]).unwrap().len(), 64);

        let header = JwsHeader::decode(segments[0]).unwrap();
        assert_eq!(header.typ.as_deref(), Some("JWT"));
        assert_eq!(header.alg, "ES256");
        assert_eq!(header.kid.as_deref(), Some("alice"));

        let payload = b64_decode_json_object(segments[1]).unwrap();
        assert_eq!(payload["foo"], "bar");
        assert!(payload["jti"].as_str().unwrap().starts_with("002"));
        let lifetime = payload["exp"].as_i64().unwrap() - payload["nbf"].as_i64().unwrap();
        assert!((3540..=3600).contains(&lifetime));
    }

    #[test]
    fn test_jwt_round_trip_and_replay() {
        let engine = engine();
        let alice = Keypair::generate().with_identity("alice");
        let jwt = engine.make_jwt(&claims(json!({"foo": "bar"})), &alice).unwrap();

        let verified = engine.verify_jwt(&jwt, &alice.to_public()).unwrap();
        assert_eq!(verified["foo"], "bar");

        assert!(matches!(
            engine.verify_jwt(&jwt, &alice),
            Err(JoseError::InvalidClaims(_))
        ));
    }

    #[test]
    fn test_jwt_wrong_key() {
        let engine = engine();
        let alice = Keypair::generate().with_identity("alice");
        let mallory = Keypair::generate().with_identity("alice");
        let jwt = engine.make_jwt(&claims(json!({})), &alice).unwrap();

        assert_eq!(
            engine.verify_jwt(&jwt, &mallory),
            Err(JoseError::InvalidSignature {
                kid: "alice".to_string()
            })
        );
    }

    #[test]
    fn test_jwt_rejects_other_algorithms() {
        let engine = engine();
        let alice = Keypair::generate().with_identity("alice");
        let header = b64_encode_json(&json!({"typ": "JWT", "alg": "HS256"})).unwrap();
        let payload = b64_encode_json(&json!({"foo": 1})).unwrap();
        let input = format!("{}.{}", header, payload);
        let jwt = format!("{}.{}", input, b64_encode(alice.sign(input.as_bytes()).unwrap()));

        assert!(matches!(
            engine.verify_jwt(&jwt, &alice),
            Err(JoseError::InvalidAlgorithm(_))
        ));
    }

    #[test]
    fn test_expired_and_premature_claims() {
        let engine = engine();
        let alice = Keypair::generate().with_identity("alice");
        let now = Utc::now().timestamp();

        let expired = engine
            .make_jwt(&claims(json!({"exp": now - 10})), &alice)
            .unwrap();
        assert!(matches!(
            engine.verify_jwt(&expired, &alice),
            Err(JoseError::InvalidClaims(_))
        ));

        let premature = engine
            .make_jwt(&claims(json!({"nbf": now + 600})), &alice)
            .unwrap();
        assert!(matches!(
            engine.verify_jwt(&premature, &alice),
            Err(JoseError::InvalidClaims(_))
        ));

        // Within the nbf leeway
        let skewed = engine
            .make_jwt(&claims(json!({"nbf": now + 60})), &alice)
            .unwrap();
        assert!(engine.verify_jwt(&skewed, &alice).is_ok());
    }

    #[test]
    fn test_unverifiable_exp_rejected_at_signing() {
        let engine = engine();
        let alice = Keypair::generate().with_identity("alice");
        let far_future = claims(json!({"exp": 253_402_300_800_i64}));

        assert!(matches!(
            engine.make_jwt(&far_future, &alice),
            Err(JoseError::InvalidClaims(_))
        ));
        assert!(matches!(
            engine.make_jws(&far_future, std::slice::from_ref(&alice), None),
            Err(JoseError::InvalidClaims(_))
        ));
    }

    #[test]
    fn test_make_jws_headers() {
        let keypairs = signers(&["alice", "bob"]);
        let headers = [signer_header([("role", "author")]), Header::new()];
        let jws = engine()
            .make_jws(&claims(json!({"foo": "bar"})), &keypairs, Some(headers.as_slice()))
            .unwrap();

        let decoded = JwsEngine::get_jws_headers(&jws.into(), true).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].typ.as_deref(), Some("JOSE+JSON"));
        assert_eq!(decoded[0].kid.as_deref(), Some("alice"));
        assert_eq!(decoded[0].sidx, Some(0));
        assert_eq!(decoded[0].extra["role"], "author");
        assert_eq!(decoded[1].kid.as_deref(), Some("bob"));
        assert_eq!(decoded[1].sidx, Some(1));
    }

    #[test]
    fn test_make_jws_input_errors() {
        let engine = engine();
        let keypairs = signers(&["alice", "bob"]);
        let body = claims(json!({}));

        let reserved = [Header::new(), signer_header([("sidx", 7)])];
        assert_eq!(
            engine.make_jws(&body, &keypairs, Some(reserved.as_slice())),
            Err(JoseError::ReservedHeader("sidx".to_string()))
        );

        let short = [Header::new()];
        assert!(matches!(
            engine.make_jws(&body, &keypairs, Some(short.as_slice())),
            Err(JoseError::InvalidFormat(_))
        ));

        let anonymous = [Keypair::generate()];
        assert!(matches!(
            engine.make_jws(&body, &anonymous, None),
            Err(JoseError::InvalidKey(_))
        ));
        assert!(matches!(
            engine.make_jws(&body, &[], None),
            Err(JoseError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_verify_all_and_partial() {
        let engine = engine();
        let keypairs = signers(&["alice", "bob", "carol"]);
        let jws: JwsMessage = engine
            .make_jws(&claims(json!({"n": 1})), &keypairs, None)
            .unwrap()
            .into();

        assert!(matches!(
            engine.verify_jws(&jws, Some(&keypairs[..2]), true, None),
            Err(JoseError::KeySignatureMismatch(_))
        ));

        let stranger = signers(&["dave"]);
        assert!(matches!(
            engine.verify_jws(&jws, Some(stranger.as_slice()), false, None),
            Err(JoseError::KeySignatureMismatch(_))
        ));

        let verified = engine
            .verify_jws(&jws, Some(&keypairs[1..2]), false, None)
            .unwrap();
        assert_eq!(verified["n"], 1);
    }

    #[test]
    fn test_verify_without_keys_does_not_burn() {
        let engine = engine();
        let keypairs = signers(&["alice"]);
        let jws: JwsMessage = engine
            .make_jws(&claims(json!({})), &keypairs, None)
            .unwrap()
            .into();

        assert!(engine.verify_jws(&jws, None, true, None).is_ok());
        assert!(engine.verify_jws(&jws, None, true, None).is_ok());
        assert!(engine.verify_jws(&jws, Some(keypairs.as_slice()), true, None).is_ok());
        assert!(matches!(
            engine.verify_jws(&jws, Some(keypairs.as_slice()), true, None),
            Err(JoseError::InvalidClaims(_))
        ));
    }

    #[test]
    fn test_verify_compact_through_verify_jws() {
        let engine = engine();
        let keypairs = signers(&["alice", "bob"]);
        let jwt = engine.make_jwt(&claims(json!({})), &keypairs[1]).unwrap();
        let message = JwsMessage::parse(&jwt).unwrap();

        assert!(matches!(
            engine.verify_jws(&message, Some(keypairs.as_slice()), true, None),
            Err(JoseError::KeySignatureMismatch(_))
        ));
        assert!(matches!(
            engine.verify_jws(&message, None, false, None),
            Err(JoseError::KeySignatureMismatch(_))
        ));
        assert!(engine.verify_jws(&message, Some(keypairs.as_slice()), false, None).is_ok());
    }

    #[test]
    fn test_unresolvable_kid() {
        let engine = engine();
        let alice = Keypair::generate();
        let jwt = engine.make_jwt(&claims(json!({})), &alice).unwrap();
        let lifted: JwsMessage = JwsMessage::parse(&jwt)
            .unwrap()
            .into_general(None)
            .unwrap()
            .into();
        let keypairs = [alice.with_identity("alice")];

        assert!(matches!(
            engine.verify_jws(&lifted, Some(keypairs.as_slice()), true, None),
            Err(JoseError::InvalidFormat(_))
        ));
        assert!(
            engine
                .verify_jws(&lifted, Some(keypairs.as_slice()), true, Some("alice"))
                .is_ok()
        );
    }

    #[test]
    fn test_extend_assigns_following_indexes() {
        let engine = engine();
        let first = signers(&["alice", "bob"]);
        let second = signers(&["carol"]);
        let jws: JwsMessage = engine
            .make_jws(&claims(json!({})), &first, None)
            .unwrap()
            .into();

        let extended = engine
            .extend_jws_signatures(&jws, &second, None, None)
            .unwrap();
        let records = JwsEngine::get_jws_key_ids(&extended.into(), None, true).unwrap();
        assert_eq!(kids(&records), ["alice", "bob", "carol"]);
        assert_eq!(records[2].sidx, Some(2));
    }

    #[test]
    fn test_extend_compact_keeps_original_signature() {
        let engine = engine();
        let alice = Keypair::generate().with_identity("alice");
        let bob = Keypair::generate().with_identity("bob");
        let jwt = engine.make_jwt(&claims(json!({})), &alice).unwrap();

        let extended = engine
            .extend_jws_signatures(&JwsMessage::parse(&jwt).unwrap(), &[bob.clone()], None, None)
            .unwrap();
        assert_eq!(extended.signatures[0].protected, jwt.split('.').next().unwrap());

        let records = JwsEngine::get_jws_key_ids(&extended.clone().into(), None, true).unwrap();
        assert_eq!(kids(&records), ["alice", "bob"]);
        assert_eq!(records[0].sidx, None);
        assert_eq!(records[1].sidx, Some(1));

        assert!(
            engine
                .verify_jws(&extended.into(), Some([alice, bob].as_slice()), true, None)
                .is_ok()
        );
    }

    #[test]
    fn test_remove_signatures() {
        let engine = engine();
        let keypairs = signers(&["alice", "bob", "carol"]);
        let jws = engine.make_jws(&claims(json!({})), &keypairs, None).unwrap();
        let payload = jws.payload.clone();

        let trimmed = JwsEngine::remove_jws_signatures(&jws.into(), &["bob", "zed"]).unwrap();
        assert_eq!(trimmed.payload, payload);
        let records = JwsEngine::get_jws_key_ids(&trimmed.clone().into(), None, true).unwrap();
        assert_eq!(kids(&records), ["alice", "carol"]);

        let empty =
            JwsEngine::remove_jws_signatures(&trimmed.into(), &["alice", "carol"]).unwrap();
        assert!(empty.signatures.is_empty());
    }

    #[test]
    fn test_ordered_ids_reject_ambiguous_indexes() {
        let engine = engine();
        let keypairs = signers(&["alice", "bob"]);
        let mut jws = engine.make_jws(&claims(json!({})), &keypairs, None).unwrap();
        let duplicate = jws.signatures[0].clone();
        jws.signatures.push(duplicate);
        let message: JwsMessage = jws.into();

        assert!(matches!(
            JwsEngine::get_jws_key_ids(&message, None, true),
            Err(JoseError::InvalidSignatureIndexes(_))
        ));
        assert_eq!(JwsEngine::get_jws_key_ids(&message, None, false).unwrap().len(), 3);
    }

    #[test]
    fn test_sorted_by_sidx_not_array_position() {
        let engine = engine();
        let keypairs = signers(&["alice", "bob", "carol"]);
        let mut jws = engine.make_jws(&claims(json!({})), &keypairs, None).unwrap();
        jws.signatures.reverse();

        let records = JwsEngine::get_jws_key_ids(&jws.into(), None, true).unwrap();
        assert_eq!(kids(&records), ["alice", "bob", "carol"]);
    }

    #[test]
    fn test_check_indexes() {
        assert!(check_indexes([None, Some(1), Some(2)].into_iter()).is_ok());
        assert!(check_indexes([None, None].into_iter()).is_err());
        assert!(check_indexes([Some(1), Some(1)].into_iter()).is_err());
    }
}
