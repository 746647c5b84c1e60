//! Common test utilities for integration tests
//!
//! Engines here share one in-memory nonce store so tests can observe burns.

#![allow(dead_code)]

use std::sync::Arc;

use oneid_jose::{
    Claims, JoseConfig, JweEngine, JwsEngine, Keypair, MemoryNonceStore, NonceConfig,
    NonceService,
};
use serde_json::Value;

/// Engines wired to a shared in-memory store
pub struct Harness {
    pub config: JoseConfig,
    pub store: Arc<MemoryNonceStore>,
    pub nonces: Arc<NonceService>,
    pub jws: JwsEngine,
    pub jwe: JweEngine,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_nonce_config(NonceConfig::default())
    }

    pub fn with_nonce_config(nonce: NonceConfig) -> Self {
        let config = JoseConfig::default().with_nonce(nonce);
        let store = Arc::new(MemoryNonceStore::new());
        let nonces = Arc::new(NonceService::with_store(&config.nonce, store.clone()));

        Self {
            jws: JwsEngine::new(&config, nonces.clone()),
            jwe: JweEngine::new(&config, nonces.clone()),
            config,
            store,
            nonces,
        }
    }
}

/// Keypair with the given identity
pub fn keypair(identity: &str) -> Keypair {
    Keypair::generate().with_identity(identity)
}

/// Keypairs for each identity, in order
pub fn keypairs(identities: &[&str]) -> Vec<Keypair> {
    identities.iter().map(|identity| keypair(identity)).collect()
}

/// Claims from a JSON object literal
pub fn claims(value: Value) -> Claims {
    match value {
        Value::Object(map) => map,
        other => panic!("claims must be a JSON object, got {other}"),
    }
}

/// Flip one bit of a base64url segment's decoded bytes
pub fn flip_bit(segment: &str, index: usize) -> String {
    let mut bytes = oneid_jose::encoding::b64_decode(segment).unwrap();
    let index = index % bytes.len();
    bytes[index] ^= 0x01;
    oneid_jose::encoding::b64_encode(bytes)
}

/// Install a fmt subscriber for debugging a failing test
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
