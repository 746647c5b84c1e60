//! Self-expiring nonces and replay protection
//!
//! A nonce is `<version><expiry><suffix>`: a three digit version (`001` or
//! `002`), the expiry as `YYYY-MM-DDTHH:MM:SSZ`, and six random alphanumeric
//! characters. Verification checks the format and the carried timestamp and
//! then asks a [`NonceStore`] whether the nonce was already burned.
//!
//! The store is an injected strategy. [`FileNonceStore`] keeps the
//! append-only log used by default; [`MemoryNonceStore`] keeps burned nonces
//! in process. Neither provides cross-process atomicity: callers that need
//! strict replay guarantees under concurrent verification must supply a store
//! with an atomic check-and-set.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveDateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use rand::Rng;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use regex::Regex;
use tracing::{debug, warn};

use crate::config::NonceConfig;
use crate::{JoseError, Result};

/// `strftime` layout of the embedded timestamp
pub const NONCE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Number of random characters closing a nonce
pub const NONCE_SUFFIX_LENGTH: usize = 6;

static NONCE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(00[12])(\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}Z)[A-Za-z0-9]{6}$")
        .expect("nonce pattern is valid")
});

/// Nonce format version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NonceVersion {
    /// `001`: only checked against clock skew
    Legacy,
    /// `002`: the timestamp is the expiry
    Current,
}

impl NonceVersion {
    /// Three digit prefix
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Legacy => "001",
            Self::Current => "002",
        }
    }
}

impl fmt::Display for NonceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Decoded nonce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedNonce {
    /// Format version
    pub version: NonceVersion,
    /// Embedded timestamp (the expiry for `002`)
    pub timestamp: DateTime<Utc>,
}

/// Verification context forwarded to the store
#[derive(Clone, PartialEq, Eq)]
pub struct NonceContext {
    /// Kid of the key that verified the message
    pub kid: String,
    /// Raw signature bytes, never persisted by the bundled stores
    pub signature: Vec<u8>,
}

impl NonceContext {
    /// Create a new context
    pub fn new(kid: impl Into<String>, signature: impl Into<Vec<u8>>) -> Self {
        Self {
            kid: kid.into(),
            signature: signature.into(),
        }
    }
}

impl fmt::Debug for NonceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NonceContext")
            .field("kid", &self.kid)
            .field("signature_len", &self.signature.len())
            .finish()
    }
}

/// Replay-detection strategy
pub trait NonceStore: Send + Sync + fmt::Debug {
    /// Whether `nonce` has not been burned (within `context`, when given)
    fn is_fresh(&self, nonce: &str, context: Option<&NonceContext>) -> Result<bool>;

    /// Record `nonce` as used
    fn burn(&self, nonce: &str, context: Option<&NonceContext>) -> Result<()>;
}

/// Append-only log of burned nonces, one per line
///
/// Lines are `nonce` or `nonce<TAB>kid` when a context is passed. A nonce
/// burned without a kid is used for every context.
#[derive(Debug, Clone)]
pub struct FileNonceStore {
    path: PathBuf,
}

impl FileNonceStore {
    /// Store backed by the log at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Log location
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl NonceStore for FileNonceStore {
    fn is_fresh(&self, nonce: &str, context: Option<&NonceContext>) -> Result<bool> {
        let log = match fs::read_to_string(&self.path) {
            Ok(log) => log,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e.into()),
        };

        let seen = log.lines().any(|line| {
            let mut fields = line.splitn(2, '\t');
            let burned = fields.next().unwrap_or_default();
            let burned_kid = fields.next();
            burned == nonce
                && match (context, burned_kid) {
                    (Some(context), Some(kid)) => kid == context.kid,
                    _ => true,
                }
        });
        Ok(!seen)
    }

    fn burn(&self, nonce: &str, context: Option<&NonceContext>) -> Result<()> {
        let kid = context.map(|c| c.kid.as_str());
        if [Some(nonce), kid].into_iter().flatten().any(breaks_log_line) {
            return Err(JoseError::NonceStore(format!(
                "cannot log nonce '{}' for kid {:?}: line separators are not allowed",
                nonce.escape_debug(),
                kid
            )));
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        match context {
            Some(context) => writeln!(log, "{}\t{}", nonce, context.kid)?,
            None => writeln!(log, "{}", nonce)?,
        }
        Ok(())
    }
}

fn breaks_log_line(field: &str) -> bool {
    field.contains(['\t', '\n', '\r'])
}

/// In-process record of burned nonces, keyed by nonce
///
/// Each nonce maps to the kids it was burned for; `None` marks a burn without
/// context, which covers every kid.
#[derive(Debug, Default)]
pub struct MemoryNonceStore {
    used: RwLock<HashMap<String, HashSet<Option<String>>>>,
}

impl MemoryNonceStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of burned entries
    pub fn len(&self) -> usize {
        self.used.read().values().map(HashSet::len).sum()
    }

    /// Whether nothing has been burned
    pub fn is_empty(&self) -> bool {
        self.used.read().is_empty()
    }

    /// Forget every burned nonce
    pub fn clear(&self) {
        self.used.write().clear();
    }

    /// Drop `002` nonces whose expiry has passed, returning the entries removed
    ///
    /// Such nonces fail verification on their timestamp alone. `001` nonces
    /// carry no expiry and are kept.
    pub fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let mut used = self.used.write();
        let initial: usize = used.values().map(HashSet::len).sum();

        used.retain(|nonce, _| {
            NonceService::parse_nonce(nonce).is_none_or(|parsed| {
                parsed.version == NonceVersion::Legacy || parsed.timestamp >= now
            })
        });

        let removed = initial - used.values().map(HashSet::len).sum::<usize>();
        if removed > 0 {
            debug!(removed, "Dropped expired nonces");
        }
        removed
    }
}

impl NonceStore for MemoryNonceStore {
    fn is_fresh(&self, nonce: &str, context: Option<&NonceContext>) -> Result<bool> {
        let used = self.used.read();
        let seen = used.get(nonce).is_some_and(|kids| match context {
            Some(context) => {
                kids.contains(&None) || kids.iter().flatten().any(|kid| *kid == context.kid)
            }
            None => true,
        });
        Ok(!seen)
    }

    fn burn(&self, nonce: &str, context: Option<&NonceContext>) -> Result<()> {
        self.used
            .write()
            .entry(nonce.to_string())
            .or_default()
            .insert(context.map(|c| c.kid.clone()));
        Ok(())
    }
}

/// Nonce generation and verification
#[derive(Debug, Clone)]
pub struct NonceService {
    store: Arc<dyn NonceStore>,
    pass_context: bool,
    default_lifetime: Duration,
    future_skew: Duration,
}

impl NonceService {
    /// Service backed by the file store at the configured log path
    pub fn from_config(config: &NonceConfig) -> Self {
        Self::with_store(config, Arc::new(FileNonceStore::new(config.resolved_log_path())))
    }

    /// Service backed by an injected store
    pub fn with_store(config: &NonceConfig, store: Arc<dyn NonceStore>) -> Self {
        Self {
            store,
            pass_context: config.pass_context,
            default_lifetime: config.default_lifetime(),
            future_skew: config.future_skew(),
        }
    }

    /// Whether verification context reaches the store
    pub fn passes_context(&self) -> bool {
        self.pass_context
    }

    /// Generate a `002` nonce expiring at `expiry` (now + default lifetime when omitted)
    ///
    /// An expiry for which [`NonceService::can_encode`] is false yields a nonce
    /// that [`NonceService::parse_nonce`] rejects.
    pub fn make_nonce(&self, expiry: Option<DateTime<Utc>>) -> String {
        let expiry = expiry.unwrap_or_else(|| offset_from_now(self.default_lifetime));
        let suffix: String = OsRng
            .sample_iter(&Alphanumeric)
            .take(NONCE_SUFFIX_LENGTH)
            .map(char::from)
            .collect();

        format!(
            "{}{}{}",
            NonceVersion::Current.prefix(),
            expiry.format(NONCE_TIME_FORMAT),
            suffix
        )
    }

    /// Decode version and timestamp, `None` when malformed
    pub fn parse_nonce(nonce: &str) -> Option<ParsedNonce> {
        let captures = NONCE_PATTERN.captures(nonce)?;
        let version = match &captures[1] {
            "001" => NonceVersion::Legacy,
            _ => NonceVersion::Current,
        };
        let timestamp = NaiveDateTime::parse_from_str(&captures[2], NONCE_TIME_FORMAT)
            .ok()?
            .and_utc();
        if !Self::can_encode(timestamp) {
            return None;
        }

        Some(ParsedNonce { version, timestamp })
    }

    /// Whether `instant` fits a nonce timestamp (years 2000 through 9999)
    pub fn can_encode(instant: DateTime<Utc>) -> bool {
        (2000..=9999).contains(&instant.year())
    }

    /// Check format, timing and replay state
    ///
    /// Malformed or out-of-window nonces yield `Ok(false)`; only store
    /// failures are errors.
    ///
    /// # Errors
    /// Returns [`JoseError::NonceStore`] if the store cannot be read.
    pub fn verify_nonce(
        &self,
        nonce: &str,
        not_before: Option<DateTime<Utc>>,
        context: Option<&NonceContext>,
    ) -> Result<bool> {
        let Some(parsed) = Self::parse_nonce(nonce) else {
            debug!(nonce = %nonce, "Nonce rejected: malformed");
            return Ok(false);
        };

        if not_before.is_some_and(|not_before| parsed.timestamp < not_before) {
            debug!(nonce = %nonce, "Nonce rejected: before not_before");
            return Ok(false);
        }

        let now = Utc::now();
        match parsed.version {
            NonceVersion::Legacy => {
                if parsed.timestamp > offset_from(now, self.future_skew) {
                    debug!(nonce = %nonce, "Nonce rejected: too far in the future");
                    return Ok(false);
                }
            }
            NonceVersion::Current => {
                if now > parsed.timestamp {
                    debug!(nonce = %nonce, "Nonce rejected: expired");
                    return Ok(false);
                }
            }
        }

        let fresh = self.store.is_fresh(nonce, self.forwarded(context))?;
        if !fresh {
            warn!(nonce = %nonce, kid = ?context.map(|c| c.kid.as_str()), "Nonce replay detected");
        }
        Ok(fresh)
    }

    /// Record a nonce as used
    ///
    /// # Errors
    /// - [`JoseError::InvalidClaims`] if `nonce` is malformed
    /// - [`JoseError::NonceStore`] if the store cannot be written
    pub fn burn_nonce(&self, nonce: &str, context: Option<&NonceContext>) -> Result<()> {
        if Self::parse_nonce(nonce).is_none() {
            warn!(nonce = %nonce.escape_debug(), "Refusing to burn malformed nonce");
            return Err(JoseError::InvalidClaims(format!(
                "malformed nonce '{}'",
                nonce.escape_debug()
            )));
        }
        self.store.burn(nonce, self.forwarded(context))?;
        debug!(nonce = %nonce, kid = ?context.map(|c| c.kid.as_str()), "Nonce burned");
        Ok(())
    }

    fn forwarded<'a>(&self, context: Option<&'a NonceContext>) -> Option<&'a NonceContext> {
        context.filter(|_| self.pass_context)
    }
}

fn offset_from_now(offset: Duration) -> DateTime<Utc> {
    offset_from(Utc::now(), offset)
}

fn offset_from(instant: DateTime<Utc>, offset: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(offset)
        .ok()
        .and_then(|delta| instant.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
