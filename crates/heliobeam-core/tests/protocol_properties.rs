//! Property-based tests for the beam authorization protocol.
//!
//! These tests use proptest to verify invariants hold for all inputs:
//! - Both ends agree on the session key for every nonce
//! - The power ceiling is exact
//! - A wrong nonce never installs a session key
//! - Rejected heartbeats never move the liveness window
//! - Emergency stop wins from any reachable state
//! - A late session ack never energizes the GRN

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use ed25519_dalek::SigningKey;
use heliobeam_core::{
    BeamState, Moment, NodeAction,
    activation::BeamCommand,
    beacon::{BeaconIssuer, BeaconPolicy, BeaconVerifier},
    challenge::{Authenticator, ChallengeConfig, answer_challenge},
    credential::TrustedRegistry,
    crypto::{Nonce, SessionKey},
    env::SystemEnv,
    error::BeamAuthError,
    ground::{GroundConfig, GroundNode},
    heartbeat::{HeartbeatEmitter, LivenessConfig, LivenessMonitor},
    identity::NodeId,
    orbital::{OrbitalConfig, OrbitalNode},
    secrets::{DeviceSecret, SecretStore},
};
use proptest::prelude::*;

const EPOCH: Duration = Duration::from_secs(1_700_000_000);

fn grn() -> NodeId {
    NodeId::from("GRN-001")
}

fn start() -> Moment {
    Moment::new(Instant::now(), EPOCH)
}

fn store_with(secret: &DeviceSecret) -> Arc<SecretStore> {
    let store = SecretStore::new();
    store.provision(grn(), secret.clone()).unwrap();
    Arc::new(store)
}

fn secret_strategy() -> impl Strategy<Value = DeviceSecret> {
    any::<[u8; 32]>().prop_map(DeviceSecret::from_bytes)
}

fn nonce_strategy() -> impl Strategy<Value = Nonce> {
    any::<[u8; 16]>().prop_map(Nonce::from_bytes)
}

#[test]
fn prop_key_agreement_for_all_nonces() {
    proptest!(|(secret in secret_strategy(), nonce in nonce_strategy())| {
        let (grn_key, response) = answer_challenge(&grn(), &secret, &nonce);
        let mor_key = SessionKey::derive(&secret, &nonce);

        prop_assert!(grn_key.ct_eq(&mor_key));
        prop_assert_eq!(response.response_hmac, mor_key.response_tag(&nonce).to_hex());
    });
}

#[test]
fn prop_power_ceiling_is_exact() {
    proptest!(|(max in 1u64..=10_000_000, requested in 0u64..=20_000_000)| {
        let issuer = BeaconIssuer::new(grn(), SigningKey::from_bytes(&[5; 32]));
        let policy = BeaconPolicy { max_power_w: max, ..BeaconPolicy::default() };
        let registry = TrustedRegistry::new().with(grn(), issuer.verifying_key());
        let verifier = BeaconVerifier::new(policy, Box::new(registry));

        let beacon = issuer.generate_beacon(requested, start());
        let accepted = verifier.receive_beacon(&beacon, start()).is_ok();

        prop_assert_eq!(accepted, requested <= max);
    });
}

#[test]
fn prop_nonce_mismatch_never_installs_key() {
    proptest!(|(secret in secret_strategy(), forged in nonce_strategy())| {
        let now = Instant::now();
        let mut auth = Authenticator::new(ChallengeConfig::default(), store_with(&secret));
        let pending = auth.send_challenge(&SystemEnv, grn(), now);
        prop_assume!(!pending.ct_eq(&forged));

        let (_, response) = answer_challenge(&grn(), &secret, &forged);
        let result = auth.receive_response(&response, now);

        prop_assert!(matches!(result, Err(BeamAuthError::InvalidResponse(_))));
        prop_assert!(auth.pending_nonce().is_some_and(|n| n.ct_eq(&pending)));
    });
}

#[test]
fn prop_tampered_heartbeat_leaves_window_unchanged() {
    proptest!(|(
        secret in secret_strategy(),
        nonce in nonce_strategy(),
        delta in 1u64..=500,
        received_after in 0u64..=90
    )| {
        let t0 = start();
        let key = SessionKey::derive(&secret, &nonce);
        let mut emitter = HeartbeatEmitter::new(Duration::from_millis(50));
        let mut monitor = LivenessMonitor::new(LivenessConfig::default());
        monitor.arm(t0.instant);

        let at = t0 + Duration::from_millis(received_after);
        let mut heartbeat = emitter.emit(&grn(), &key, at);
        heartbeat.timestamp = heartbeat.timestamp.wrapping_add(delta);

        prop_assert!(monitor.verify_heartbeat(&heartbeat, &grn(), &key, at).is_err());
        prop_assert_eq!(monitor.last_valid_heartbeat_time(), Some(t0.instant));
    });
}

#[test]
fn prop_wrong_key_heartbeat_leaves_window_unchanged() {
    proptest!(|(a in secret_strategy(), b in secret_strategy(), nonce in nonce_strategy())| {
        prop_assume!(a.expose() != b.expose());
        let t0 = start();
        let right = SessionKey::derive(&a, &nonce);
        let wrong = SessionKey::derive(&b, &nonce);
        let mut emitter = HeartbeatEmitter::new(Duration::from_millis(50));
        let mut monitor = LivenessMonitor::new(LivenessConfig::default());
        monitor.arm(t0.instant);

        let heartbeat = emitter.emit(&grn(), &wrong, t0);
        prop_assert!(monitor.verify_heartbeat(&heartbeat, &grn(), &right, t0).is_err());
        prop_assert_eq!(monitor.last_valid_heartbeat_time(), Some(t0.instant));
    });
}

/// Operations a driver might issue to a MOR in arbitrary order.
#[derive(Debug, Clone)]
enum Op {
    Beacon,
    Challenge,
    Respond,
    Activate,
    Advance(u64),
    Tick,
    Deactivate,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Beacon),
        Just(Op::Challenge),
        Just(Op::Respond),
        Just(Op::Activate),
        (0u64..=150).prop_map(Op::Advance),
        Just(Op::Tick),
        Just(Op::Deactivate),
    ]
}

#[test]
fn prop_emergency_defocus_from_any_state() {
    proptest!(|(ops in prop::collection::vec(op_strategy(), 0..24), repeats in 1usize..4)| {
        let secret = DeviceSecret::from_bytes([9; 32]);
        let issuer = BeaconIssuer::new(grn(), SigningKey::from_bytes(&[8; 32]));
        let registry = TrustedRegistry::new().with(grn(), issuer.verifying_key());
        let mut mor = OrbitalNode::new(OrbitalConfig::default(), Box::new(registry), store_with(&secret))
            .unwrap();

        let mut now = start();
        let mut last_nonce = None;
        for op in ops {
            match op {
                Op::Beacon => {
                    let _ = mor.receive_beacon(&issuer.generate_beacon(1_000, now), now);
                },
                Op::Challenge => {
                    if let Ok(challenge) = mor.send_challenge(&SystemEnv, now) {
                        last_nonce = Nonce::from_hex(&challenge.nonce).ok();
                    }
                },
                Op::Respond => {
                    if let Some(nonce) = &last_nonce {
                        let (_, response) = answer_challenge(&grn(), &secret, nonce);
                        let _ = mor.receive_response(&response, now);
                    }
                },
                Op::Activate => {
                    let _ = mor.activate_beam(now);
                },
                Op::Advance(ms) => now = now + Duration::from_millis(ms),
                Op::Tick => {
                    let _ = mor.tick(now);
                },
                Op::Deactivate => {
                    let _ = mor.deactivate();
                },
            }
        }

        for _ in 0..repeats {
            let actions = mor.emergency_defocus();
            prop_assert_eq!(actions, vec![NodeAction::Actuate(BeamCommand::Defocus)]);
            prop_assert_eq!(mor.state(), BeamState::Defocused);
            prop_assert!(!mor.has_session_key());
            prop_assert!(mor.should_defocus_beam(now));
        }
    });
}

#[test]
fn prop_active_implies_fresh_proof_of_life() {
    // Whatever the heartbeat gaps, the GRN is never Active past the window.
    proptest!(|(gaps in prop::collection::vec(0u64..=200, 1..16))| {
        let secret = DeviceSecret::from_bytes([4; 32]);
        let mut ground = GroundNode::new(
            GroundConfig::default(),
            SigningKey::from_bytes(&[4; 32]),
            store_with(&secret),
        )
        .unwrap();

        let t0 = start();
        let nonce = Nonce::from_bytes([1; 16]);
        ground.generate_beacon(1_000, t0).unwrap();
        let challenge = heliobeam_proto::Challenge { node_id: "MOR-001".to_string(), nonce: nonce.to_hex() };
        ground.handle_challenge(&challenge, t0).unwrap();
        let key = SessionKey::derive(&secret, &nonce);
        let ack = heliobeam_core::challenge::session_ack(&NodeId::from("MOR-001"), &key, &nonce);
        ground.activate_session(&ack, t0).unwrap();

        let mut now = t0;
        for gap in gaps {
            now = now + Duration::from_millis(gap);
            let _ = ground.tick(now);
            if ground.state() == BeamState::Active {
                prop_assert!(!ground.should_defocus_beam(now));
            }
        }
    });
}

#[test]
fn prop_session_ack_only_within_window() {
    // An ack held back past the liveness window never energizes the GRN.
    proptest!(|(delay_ms in 0u64..=400)| {
        let secret = DeviceSecret::from_bytes([5; 32]);
        let mut ground = GroundNode::new(
            GroundConfig::default(),
            SigningKey::from_bytes(&[5; 32]),
            store_with(&secret),
        )
        .unwrap();

        let t0 = start();
        let nonce = Nonce::from_bytes([2; 16]);
        ground.generate_beacon(1_000, t0).unwrap();
        let challenge = heliobeam_proto::Challenge { node_id: "MOR-001".to_string(), nonce: nonce.to_hex() };
        ground.handle_challenge(&challenge, t0).unwrap();
        let key = SessionKey::derive(&secret, &nonce);
        let ack = heliobeam_core::challenge::session_ack(&NodeId::from("MOR-001"), &key, &nonce);

        let delay = Duration::from_millis(delay_ms);
        let result = ground.activate_session(&ack, t0 + delay);
        if delay <= LivenessConfig::default().timeout_threshold {
            prop_assert_eq!(result, Ok(vec![NodeAction::Actuate(BeamCommand::Activate)]));
            prop_assert_eq!(ground.state(), BeamState::Active);
        } else {
            prop_assert_eq!(result, Err(BeamAuthError::LivenessTimeout { elapsed: delay }));
            prop_assert_eq!(ground.state(), BeamState::Idle);
            prop_assert!(!ground.has_session_key());
        }
    });
}
