//! Engine and nonce configuration
//!
//! A [`JoseConfig`] is built once (defaults, builder calls, serde, or
//! [`JoseConfig::from_env`]) and handed to the engines and the
//! [`NonceService`](crate::NonceService) by reference.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{EXP_LEEWAY_SECONDS, JoseError, NBF_LEEWAY_SECONDS, Result, TOKEN_EXPIRATION_TIME_SEC};

/// Default nonce lifetime when no expiry is given (1 hour)
pub const DEFAULT_NONCE_LIFETIME_SECONDS: u64 = 3600;

/// Clock skew allowance for legacy `001` nonces (2 minutes)
pub const NONCE_FUTURE_SKEW_SECONDS: u64 = 120;

/// Claim and verification settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoseConfig {
    /// Lifetime given to claims without an explicit `exp`
    pub token_lifetime_secs: u64,
    /// Grace period after `exp`
    pub exp_leeway_secs: u64,
    /// Grace period before `nbf`
    pub nbf_leeway_secs: u64,
    /// Nonce generation and replay settings
    pub nonce: NonceConfig,
}

impl Default for JoseConfig {
    fn default() -> Self {
        Self {
            token_lifetime_secs: TOKEN_EXPIRATION_TIME_SEC,
            exp_leeway_secs: EXP_LEEWAY_SECONDS,
            nbf_leeway_secs: NBF_LEEWAY_SECONDS,
            nonce: NonceConfig::default(),
        }
    }
}

impl JoseConfig {
    /// Load configuration from environment variables on top of the defaults
    ///
    /// Optional environment variables:
    /// - `ONEID_TOKEN_LIFETIME_SECS`: claim lifetime (default: 3600)
    /// - `ONEID_EXP_LEEWAY_SECS`: `exp` grace period (default: 3)
    /// - `ONEID_NBF_LEEWAY_SECS`: `nbf` grace period (default: 120)
    /// - `ONEID_NONCE_LIFETIME_SECS`: default nonce lifetime (default: 3600)
    /// - `ONEID_NONCE_PASS_CONTEXT`: `true`/`false`, forward verification context to the store
    /// - `ONEID_NONCE_LOG`: path of the used-nonce log
    ///
    /// # Errors
    /// Returns [`JoseError::Configuration`] if a variable is set but unparsable,
    /// or if the resulting configuration fails [`JoseConfig::validate`].
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(value) = env_u64("ONEID_TOKEN_LIFETIME_SECS")? {
            config.token_lifetime_secs = value;
        }
        if let Some(value) = env_u64("ONEID_EXP_LEEWAY_SECS")? {
            config.exp_leeway_secs = value;
        }
        if let Some(value) = env_u64("ONEID_NBF_LEEWAY_SECS")? {
            config.nbf_leeway_secs = value;
        }
        if let Some(value) = env_u64("ONEID_NONCE_LIFETIME_SECS")? {
            config.nonce.default_lifetime_secs = value;
        }
        if let Ok(value) = std::env::var("ONEID_NONCE_PASS_CONTEXT") {
            config.nonce.pass_context = value.parse().map_err(|_| {
                JoseError::Configuration(format!(
                    "ONEID_NONCE_PASS_CONTEXT must be true or false, got '{}'",
                    value
                ))
            })?;
        }
        if let Some(path) = std::env::var_os("ONEID_NONCE_LOG") {
            config.nonce.log_path = Some(PathBuf::from(path));
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for unusable values
    ///
    /// # Errors
    /// Returns [`JoseError::Configuration`] for a zero token or nonce lifetime.
    pub fn validate(&self) -> Result<()> {
        if self.token_lifetime_secs == 0 {
            return Err(JoseError::Configuration(
                "token lifetime must be greater than zero".to_string(),
            ));
        }
        if self.nonce.default_lifetime_secs == 0 {
            return Err(JoseError::Configuration(
                "nonce lifetime must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Set the default claim lifetime
    pub fn with_token_lifetime(mut self, lifetime: Duration) -> Self {
        self.token_lifetime_secs = lifetime.as_secs();
        self
    }

    /// Set the `exp` grace period
    pub fn with_exp_leeway(mut self, leeway: Duration) -> Self {
        self.exp_leeway_secs = leeway.as_secs();
        self
    }

    /// Set the `nbf` grace period
    pub fn with_nbf_leeway(mut self, leeway: Duration) -> Self {
        self.nbf_leeway_secs = leeway.as_secs();
        self
    }

    /// Replace the nonce configuration
    pub fn with_nonce(mut self, nonce: NonceConfig) -> Self {
        self.nonce = nonce;
        self
    }

    /// Default claim lifetime
    pub fn token_lifetime(&self) -> Duration {
        Duration::from_secs(self.token_lifetime_secs)
    }
}

/// Nonce generation and replay-store settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NonceConfig {
    /// Expiry offset used by `make_nonce` when none is given
    pub default_lifetime_secs: u64,
    /// How far in the future a legacy `001` nonce may be
    pub future_skew_secs: u64,
    /// Forward verification context (kid, signature) to the store
    pub pass_context: bool,
    /// Location of the used-nonce log (`~/.oneid/used_nonces.txt` when unset)
    pub log_path: Option<PathBuf>,
}

impl Default for NonceConfig {
    fn default() -> Self {
        Self {
            default_lifetime_secs: DEFAULT_NONCE_LIFETIME_SECONDS,
            future_skew_secs: NONCE_FUTURE_SKEW_SECONDS,
            pass_context: false,
            log_path: None,
        }
    }
}

impl NonceConfig {
    /// Set the default nonce lifetime
    pub fn with_default_lifetime(mut self, lifetime: Duration) -> Self {
        self.default_lifetime_secs = lifetime.as_secs();
        self
    }

    /// Set the legacy nonce clock skew allowance
    pub fn with_future_skew(mut self, skew: Duration) -> Self {
        self.future_skew_secs = skew.as_secs();
        self
    }

    /// Forward verification context to the nonce store
    pub fn with_pass_context(mut self, pass_context: bool) -> Self {
        self.pass_context = pass_context;
        self
    }

    /// Set the used-nonce log location
    pub fn with_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Default nonce lifetime
    pub fn default_lifetime(&self) -> Duration {
        Duration::from_secs(self.default_lifetime_secs)
    }

    /// Legacy nonce clock skew allowance
    pub fn future_skew(&self) -> Duration {
        Duration::from_secs(self.future_skew_secs)
    }

    /// Resolved log location
    pub fn resolved_log_path(&self) -> PathBuf {
        match &self.log_path {
            Some(path) => path.clone(),
            None => dirs::home_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(".oneid")
                .join("used_nonces.txt"),
        }
    }
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(value) => value.trim().parse().map(Some).map_err(|_| {
            JoseError::Configuration(format!("{} must be an integer, got '{}'", name, value))
        }),
        Err(_) => Ok(None),
    }
}
