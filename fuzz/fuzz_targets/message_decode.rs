//! Arbitrary bytes against the wire decoder and both node state machines.
//!
//! The input is decoded twice: once as a whole frame, and once as the payload
//! of the opcode named by the first byte (which skips the frame checks and
//! reaches the JSON and hex field parsers directly). Whatever decodes is
//! handed to a fresh GRN and a fresh MOR.
//!
//! Invariants:
//! - Decoding never panics
//! - A decoded message re-encodes and decodes to itself
//! - No single unsolicited message energizes either beam

#![no_main]

use std::sync::Arc;

use ed25519_dalek::SigningKey;
use heliobeam_core::{
    BeamCommand, GroundConfig, GroundNode, Moment, NodeAction, OrbitalConfig, OrbitalNode,
    SystemEnv, credential::PolicyOnlyVerifier, secrets::SecretStore,
};
use heliobeam_proto::{Message, Opcode};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(message) = Message::from_bytes(data) {
        check(&message);
    }

    let Some((&selector, payload)) = data.split_first() else {
        return;
    };
    let opcode = Opcode::ALL[usize::from(selector) % Opcode::ALL.len()];
    if let Ok(message) = Message::decode_payload(opcode, payload) {
        check(&message);
    }
});

fn check(message: &Message) {
    let bytes = message.to_bytes().expect("decoded message must re-encode");
    let decoded = Message::from_bytes(&bytes).expect("re-encoded message must decode");
    assert_eq!(&decoded, message);

    let env = SystemEnv;
    let at = Moment::capture(&env);
    let secrets = Arc::new(SecretStore::new());

    let mut orbital =
        OrbitalNode::new(OrbitalConfig::default(), Box::new(PolicyOnlyVerifier), secrets.clone())
            .expect("default MOR config is valid");
    if let Ok(actions) = orbital.handle_message(&env, message, at) {
        assert_never_energizes(&actions);
    }
    assert!(!orbital.state().is_active());

    let mut ground = GroundNode::new(
        GroundConfig::default(),
        SigningKey::from_bytes(&[7; 32]),
        secrets,
    )
    .expect("default GRN config is valid");
    if let Ok(actions) = ground.handle_message(message, at) {
        assert_never_energizes(&actions);
    }
    assert!(!ground.state().is_active());
}

fn assert_never_energizes(actions: &[NodeAction]) {
    assert!(
        actions.iter().all(|a| a.as_command() != Some(BeamCommand::Activate)),
        "unsolicited message energized the beam: {actions:?}"
    );
}
