//! Default claim filling
//!
//! Every signed or encrypted claim set carries `jti`, `nbf` and `exp`. The
//! normalizer fills whichever are missing while keeping the nonce expiry and
//! the claim expiry in step: an explicit `exp` seeds the nonce, and a `002`
//! nonce without `exp` yields the expiry it carries.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use crate::nonce::{NonceService, NonceVersion};
use crate::types::{Claims, Jwe, is_jwe_object};
use crate::{JoseError, Result};

/// Fills `jti`, `nbf`, `exp` and `iss`
#[derive(Debug, Clone)]
pub struct ClaimNormalizer {
    nonces: Arc<NonceService>,
    token_lifetime: Duration,
}

impl ClaimNormalizer {
    /// Create a normalizer giving claims without `exp` the lifetime `token_lifetime`
    pub fn new(nonces: Arc<NonceService>, token_lifetime: Duration) -> Self {
        Self {
            nonces,
            token_lifetime,
        }
    }

    /// Nonce service used for `jti`
    pub fn nonces(&self) -> &Arc<NonceService> {
        &self.nonces
    }

    /// Produce a complete claim set
    ///
    /// When `claims` is itself a JWE, timing claims are read from its shared
    /// header. Caller-supplied members always win over computed defaults.
    ///
    /// # Errors
    /// Returns [`JoseError::InvalidFormat`] for a malformed embedded JWE and
    /// [`JoseError::InvalidClaims`] for an `exp` before 2000 or after 9999,
    /// which no nonce can carry.
    pub fn normalize(&self, claims: &Claims, issuer: Option<&str>) -> Result<Claims> {
        let shared;
        let source = if is_jwe_object(claims) {
            shared = Jwe::from_value(Value::Object(claims.clone()))?.shared_header()?;
            &shared
        } else {
            claims
        };

        let mut exp = source.get("exp").and_then(numeric_date);
        let nbf = source.get("nbf").and_then(numeric_date);
        let mut jti = source
            .get("jti")
            .and_then(Value::as_str)
            .map(str::to_string);
        let issuer = issuer
            .map(str::to_string)
            .or_else(|| source.get("iss").and_then(Value::as_str).map(str::to_string));

        match (exp, jti.as_deref()) {
            (Some(expiry), None) => {
                jti = Some(self.nonces.make_nonce(Some(to_datetime(expiry)?)));
                debug!(exp = expiry, "Derived jti from exp");
            }
            (None, Some(nonce)) => {
                if let Some(parsed) = NonceService::parse_nonce(nonce)
                    .filter(|parsed| parsed.version == NonceVersion::Current)
                {
                    exp = Some(parsed.timestamp.timestamp());
                    debug!(exp = ?exp, "Derived exp from jti");
                }
            }
            _ => {}
        }

        let now = Utc::now().timestamp();
        let lifetime = i64::try_from(self.token_lifetime.as_secs()).unwrap_or(i64::MAX);
        let default_exp = now.saturating_add(lifetime);

        let jti = match jti {
            Some(jti) => jti,
            None => self.nonces.make_nonce(Some(to_datetime(default_exp)?)),
        };

        let mut normalized = Claims::new();
        normalized.insert("jti".to_string(), Value::String(jti));
        normalized.insert("nbf".to_string(), Value::from(nbf.unwrap_or(now)));
        normalized.insert("exp".to_string(), Value::from(exp.unwrap_or(default_exp)));
        if let Some(issuer) = issuer {
            normalized.insert("iss".to_string(), Value::String(issuer));
        }

        for (name, value) in claims {
            normalized.insert(name.clone(), value.clone());
        }
        Ok(normalized)
    }
}

/// Integer seconds from a JSON number (fractions truncated)
pub(crate) fn numeric_date(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|seconds| seconds as i64))
}

/// Expiry for a generated nonce, rejecting instants a nonce cannot carry
fn to_datetime(timestamp: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(timestamp, 0)
        .filter(|instant| NonceService::can_encode(*instant))
        .ok_or_else(|| {
            JoseError::InvalidClaims(format!(
                "exp {} is outside the nonce range 2000-01-01..=9999-12-31",
                timestamp
            ))
        })
}
