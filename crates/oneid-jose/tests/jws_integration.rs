//! End-to-end JWT and multi-signature JWS tests
//!
//! Covers:
//! - compact JWT round trips and claim defaults
//! - signer order recorded through `sidx`
//! - additive extension and removal of signatures
//! - tamper detection on payload and signature
//! - replay rejection after a successful verification

mod common;

use common::{Harness, claims, flip_bit, keypair, keypairs};
use oneid_jose::{JoseError, JwsEngine, JwsMessage, NonceConfig, NonceService, is_compact_jws};
use pretty_assertions::assert_eq;
use serde_json::json;

#[test]
fn test_jwt_concrete_scenario() {
    let harness = Harness::new();
    let alice = keypair("alice");

    let jwt = harness
        .jws
        .make_jwt(&claims(json!({"foo": "bar"})), &alice)
        .unwrap();
    assert!(is_compact_jws(&jwt));

    let payload = JwsMessage::parse(&jwt).unwrap().claims().unwrap();
    assert_eq!(payload["foo"], "bar");
    assert!(payload["jti"].as_str().unwrap().starts_with("002"));
    let lifetime = payload["exp"].as_i64().unwrap() - payload["nbf"].as_i64().unwrap();
    assert!((3540..=3600).contains(&lifetime));
}

#[test]
fn test_jwt_round_trip_returns_normalized_claims() {
    let harness = Harness::new();
    let alice = keypair("alice");
    let input = claims(json!({"foo": "bar", "n": [1, 2, 3]}));

    let jwt = harness.jws.make_jwt(&input, &alice).unwrap();
    let expected = JwsMessage::parse(&jwt).unwrap().claims().unwrap();
    let verified = harness.jws.verify_jwt(&jwt, &alice.to_public()).unwrap();

    assert_eq!(verified, expected);
    assert_eq!(verified["n"], json!([1, 2, 3]));
    assert_eq!(harness.store.len(), 1);
}

#[test]
fn test_jwt_replay_rejected() {
    let harness = Harness::new();
    let alice = keypair("alice");
    let jwt = harness.jws.make_jwt(&claims(json!({})), &alice).unwrap();

    harness.jws.verify_jwt(&jwt, &alice).unwrap();
    let replay = harness.jws.verify_jwt(&jwt, &alice).unwrap_err();
    assert!(matches!(replay, JoseError::InvalidClaims(_)));
    assert!(replay.is_rejection());
}

#[test]
fn test_replay_scoped_per_verifier_with_context() {
    let harness = Harness::with_nonce_config(NonceConfig::default().with_pass_context(true));
    let signers = keypairs(&["alice", "bob"]);
    let jws: JwsMessage = harness
        .jws
        .make_jws(&claims(json!({})), &signers, None)
        .unwrap()
        .into();

    harness
        .jws
        .verify_jws(&jws, Some(&signers[..1]), false, None)
        .unwrap();
    harness
        .jws
        .verify_jws(&jws, Some(&signers[1..]), false, None)
        .unwrap();
    assert!(matches!(
        harness.jws.verify_jws(&jws, Some(&signers[..1]), false, None),
        Err(JoseError::InvalidClaims(_))
    ));
}

#[test]
fn test_multi_signature_order_preserved() {
    let harness = Harness::new();
    let signers = keypairs(&["k1", "k2", "k3"]);
    let jws = harness
        .jws
        .make_jws(&claims(json!({"doc": "contract"})), &signers, None)
        .unwrap();

    let records = JwsEngine::get_jws_key_ids(&jws.into(), None, true).unwrap();
    let kids: Vec<&str> = records.iter().map(|record| record.kid.as_str()).collect();
    assert_eq!(kids, ["k1", "k2", "k3"]);
    let indexes: Vec<Option<u64>> = records.iter().map(|record| record.sidx).collect();
    assert_eq!(indexes, [Some(0), Some(1), Some(2)]);
}

#[test]
fn test_json_wire_form_round_trips() {
    let harness = Harness::new();
    let signers = keypairs(&["alice", "bob"]);
    let jws = harness
        .jws
        .make_jws(&claims(json!({"foo": 1})), &signers, None)
        .unwrap();

    let wire = jws.to_json().unwrap();
    let value: serde_json::Value = serde_json::from_str(&wire).unwrap();
    assert!(oneid_jose::is_jws(&value));
    assert!(value["signatures"][0].get("header").is_none());

    let parsed = JwsMessage::parse(&wire).unwrap();
    assert_eq!(parsed.to_string(), wire);
    assert_eq!(
        harness
            .jws
            .verify_jws(&parsed, Some(signers.as_slice()), true, None)
            .unwrap()["foo"],
        1
    );
}

#[test]
fn test_extension_is_additive() {
    let harness = Harness::new();
    let first = keypairs(&["a1", "a2"]);
    let second = keypairs(&["b1", "b2", "b3"]);
    let third = keypairs(&["c1"]);

    let jws = harness
        .jws
        .make_jws(&claims(json!({})), &first, None)
        .unwrap();
    let original = jws.signatures.clone();

    let once = harness
        .jws
        .extend_jws_signatures(&jws.into(), &second, None, None)
        .unwrap();
    let twice = harness
        .jws
        .extend_jws_signatures(&once.into(), &third, None, None)
        .unwrap();

    assert_eq!(twice.signatures.len(), first.len() + second.len() + third.len());
    assert_eq!(&twice.signatures[..2], &original[..]);

    let records = JwsEngine::get_jws_key_ids(&twice.clone().into(), None, true).unwrap();
    let kids: Vec<&str> = records.iter().map(|record| record.kid.as_str()).collect();
    assert_eq!(kids, ["a1", "a2", "b1", "b2", "b3", "c1"]);

    // Each original signer still verifies on its own
    let message: JwsMessage = twice.into();
    for signer in &first {
        let trimmed = JwsEngine::remove_jws_signatures(
            &message,
            &["a1", "a2", "b1", "b2", "b3", "c1"]
                .into_iter()
                .filter(|kid| Some(*kid) != signer.identity())
                .collect::<Vec<_>>(),
        )
        .unwrap();
        assert_eq!(trimmed.signatures.len(), 1);
        let fresh = Harness::new();
        assert!(
            fresh
                .jws
                .verify_jws(&trimmed.into(), Some(std::slice::from_ref(signer)), true, None)
                .is_ok()
        );
    }
}

#[test]
fn test_extension_with_headers_and_default_kid() {
    let harness = Harness::new();
    let anonymous = oneid_jose::Keypair::generate();
    let jwt = harness.jws.make_jwt(&claims(json!({})), &anonymous).unwrap();
    let witness = keypair("witness");
    let headers = [oneid_jose::jws::signer_header([("role", "witness")])];

    let extended = harness
        .jws
        .extend_jws_signatures(
            &JwsMessage::parse(&jwt).unwrap(),
            std::slice::from_ref(&witness),
            Some("origin"),
            Some(headers.as_slice()),
        )
        .unwrap();

    let message: JwsMessage = extended.into();
    let records = JwsEngine::get_jws_key_ids(&message, None, true).unwrap();
    assert_eq!(records[0].kid, "origin");
    assert_eq!(records[1].kid, "witness");

    let headers = JwsEngine::get_jws_headers(&message, true).unwrap();
    assert_eq!(headers[1].extra["role"], "witness");

    let origin = anonymous.with_identity("origin");
    assert!(
        harness
            .jws
            .verify_jws(&message, Some([origin, witness].as_slice()), true, None)
            .is_ok()
    );
}

#[test]
fn test_reserved_header_on_extension() {
    let harness = Harness::new();
    let signers = keypairs(&["alice"]);
    let jws: JwsMessage = harness
        .jws
        .make_jws(&claims(json!({})), &signers, None)
        .unwrap()
        .into();
    let headers = [oneid_jose::jws::signer_header([("kid", "spoofed")])];

    assert_eq!(
        harness
            .jws
            .extend_jws_signatures(&jws, &keypairs(&["bob"]), None, Some(headers.as_slice())),
        Err(JoseError::ReservedHeader("kid".to_string()))
    );
}

#[test]
fn test_tampered_payload_detected() {
    let harness = Harness::new();
    let signers = keypairs(&["alice", "bob"]);
    let mut jws = harness
        .jws
        .make_jws(&claims(json!({"amount": 10})), &signers, None)
        .unwrap();

    let mut forged = jws.claims().unwrap();
    forged.insert("amount".to_string(), json!(10_000));
    jws.payload = oneid_jose::encoding::b64_encode_json(&forged).unwrap();

    assert!(matches!(
        harness.jws.verify_jws(&jws.into(), Some(signers.as_slice()), true, None),
        Err(JoseError::InvalidSignature { .. })
    ));
}

#[test]
fn test_tampered_signature_detected() {
    let harness = Harness::new();
    let signers = keypairs(&["alice", "bob"]);
    let jws = harness
        .jws
        .make_jws(&claims(json!({})), &signers, None)
        .unwrap();

    for index in [0, 31, 32, 63] {
        let mut tampered = jws.clone();
        tampered.signatures[1].signature = flip_bit(&tampered.signatures[1].signature, index);
        assert_eq!(
            harness
                .jws
                .verify_jws(&tampered.into(), Some(signers.as_slice()), true, None),
            Err(JoseError::InvalidSignature {
                kid: "bob".to_string()
            })
        );
    }
    assert_eq!(harness.store.len(), 0);
}

#[test]
fn test_tampered_jwt_detected() {
    let harness = Harness::new();
    let alice = keypair("alice");
    let jwt = harness.jws.make_jwt(&claims(json!({})), &alice).unwrap();
    let segments: Vec<&str> = jwt.split('.').collect();

    let bad_payload = format!("{}.{}.{}", segments[0], flip_bit(segments[1], 5), segments[2]);
    let bad_signature = format!("{}.{}.{}", segments[0], segments[1], flip_bit(segments[2], 5));

    for token in [bad_payload, bad_signature] {
        assert!(matches!(
            harness.jws.verify_jwt(&token, &alice),
            Err(JoseError::InvalidSignature { .. })
        ));
    }
}

#[test]
fn test_expired_jws_rejected() {
    let harness = Harness::new();
    let signers = keypairs(&["alice"]);
    let nonces = NonceService::with_store(
        &NonceConfig::default(),
        std::sync::Arc::new(oneid_jose::MemoryNonceStore::new()),
    );
    let past = chrono::Utc::now() - chrono::TimeDelta::seconds(30);
    let jws = harness
        .jws
        .make_jws(
            &claims(json!({"exp": past.timestamp(), "jti": nonces.make_nonce(Some(past))})),
            &signers,
            None,
        )
        .unwrap();

    let error = harness
        .jws
        .verify_jws(&jws.into(), Some(signers.as_slice()), true, None)
        .unwrap_err();
    assert_eq!(error.category(), "invalid_claims");
}

#[test]
fn test_malformed_inputs() {
    let harness = Harness::new();
    let alice = keypair("alice");

    assert!(matches!(
        harness.jws.verify_jwt("only.two", &alice),
        Err(JoseError::InvalidFormat(_))
    ));
    assert!(matches!(
        harness.jws.verify_jwt("!!!.???.***", &alice),
        Err(JoseError::InvalidFormat(_))
    ));
    assert!(JwsMessage::parse(r#"{"signatures": []}"#).is_err());
}
