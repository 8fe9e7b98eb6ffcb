//! Ground transmission node (GRN) state machine.
//!
//! # Lifecycle
//!
//! ```text
//! generate_beacon ──> handle_challenge ──> activate_session ──> tick / send_heartbeat
//!     (Idle)            (Authorized)          (Active)          handle_heartbeat_ack
//! ```
//!
//! The GRN derives its session key when it answers the challenge, but it
//! does not energize until the MOR's `SessionAck` proves the MOR derived
//! the same key. The ack must arrive within `timeout_threshold` of the
//! answer: by then an honest MOR has either confirmed or moved on, so a
//! later ack is refused and the unconfirmed key dropped. Once active, the
//! GRN's own liveness view comes from
//! verified `HeartbeatAck`s: if the MOR goes silent for longer than
//! `timeout_threshold`, the GRN defocuses on its own.
//!
//! Every method takes the current [`Moment`] and returns [`NodeAction`]s;
//! nothing here touches a clock, a socket or the actuator.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use ed25519_dalek::{SigningKey, VerifyingKey};
use heliobeam_proto::{Beacon, Challenge, HeartbeatAck, Message, Response, SessionAck};

use crate::{
    action::NodeAction,
    activation::{BeamController, BeamState, DefocusReason},
    beacon::BeaconIssuer,
    env::Environment,
    challenge::{ResponseRejection, answer_challenge, verify_session_ack},
    crypto::{Nonce, SessionKey},
    env::Moment,
    error::BeamAuthError,
    heartbeat::{HeartbeatEmitter, Liveness, LivenessConfig, LivenessMonitor},
    identity::NodeId,
    secrets::SecretProvider,
};

/// GRN configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroundConfig {
    /// This node
    pub node_id: NodeId,
    /// The MOR this node talks to
    pub orbital_id: NodeId,
    /// Heartbeat timing
    pub liveness: LivenessConfig,
}

impl Default for GroundConfig {
    fn default() -> Self {
        Self {
            node_id: NodeId::from("GRN-001"),
            orbital_id: NodeId::from("MOR-001"),
            liveness: LivenessConfig::default(),
        }
    }
}

struct Session {
    key: SessionKey,
    nonce: Nonce,
    answered_at: Instant,
}

/// GRN node.
pub struct GroundNode {
    config: GroundConfig,
    issuer: BeaconIssuer,
    secrets: Arc<dyn SecretProvider>,
    controller: BeamController,
    requested_power_w: Option<u64>,
    session: Option<Session>,
    emitter: HeartbeatEmitter,
    monitor: LivenessMonitor,
}

impl GroundNode {
    /// Create a GRN in `Idle`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the liveness timing is inconsistent.
    pub fn new(
        config: GroundConfig,
        signing_key: SigningKey,
        secrets: Arc<dyn SecretProvider>,
    ) -> Result<Self, BeamAuthError> {
        let issuer = BeaconIssuer::new(config.node_id.clone(), signing_key);
        Self::with_issuer(config, issuer, secrets)
    }

    /// Create a GRN in `Idle` with a signing key drawn from `env`.
    ///
    /// Register [`GroundNode::verifying_key`] with the MOR's credential
    /// verifier before the first beacon.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the liveness timing is inconsistent.
    pub fn with_generated_key(
        config: GroundConfig,
        env: &impl Environment,
        secrets: Arc<dyn SecretProvider>,
    ) -> Result<Self, BeamAuthError> {
        let issuer = BeaconIssuer::generate(config.node_id.clone(), env);
        Self::with_issuer(config, issuer, secrets)
    }

    fn with_issuer(
        config: GroundConfig,
        issuer: BeaconIssuer,
        secrets: Arc<dyn SecretProvider>,
    ) -> Result<Self, BeamAuthError> {
        config.liveness.validate()?;

        Ok(Self {
            issuer,
            secrets,
            controller: BeamController::new(),
            requested_power_w: None,
            session: None,
            emitter: HeartbeatEmitter::new(config.liveness.heartbeat_interval),
            monitor: LivenessMonitor::new(config.liveness),
            config,
        })
    }

    /// This node's identity.
    pub fn node_id(&self) -> &NodeId {
        &self.config.node_id
    }

    /// Key a MOR should trust for this node's beacons.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.issuer.verifying_key()
    }

    /// Current beam state.
    pub fn state(&self) -> BeamState {
        self.controller.state()
    }

    /// Whether a session key is held.
    pub fn has_session_key(&self) -> bool {
        self.session.is_some()
    }

    /// Power asked for in the current cycle.
    pub fn requested_power_w(&self) -> Option<u64> {
        self.requested_power_w
    }

    /// Why the beam was last cut.
    pub fn last_defocus(&self) -> Option<DefocusReason> {
        self.controller.last_defocus()
    }

    /// Liveness of the MOR as seen from here.
    pub fn liveness(&self, at: Moment) -> Liveness {
        self.monitor.check(at.instant)
    }

    /// Start a new authorization cycle and sign a beacon.
    ///
    /// Any previous session key is discarded.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` while the beam is active.
    pub fn generate_beacon(
        &mut self,
        requested_power_w: u64,
        at: Moment,
    ) -> Result<Beacon, BeamAuthError> {
        self.controller.begin_cycle()?;
        self.end_session();
        self.requested_power_w = Some(requested_power_w);

        tracing::debug!(node_id = %self.config.node_id, requested_power_w, "beacon issued");
        Ok(self.issuer.generate_beacon(requested_power_w, at))
    }

    /// Answer a challenge: derive the session key and build the response.
    ///
    /// A repeated challenge in the same cycle replaces the derived key.
    ///
    /// # Errors
    ///
    /// - `UnexpectedMessage` if no beacon was issued this cycle
    /// - `InvalidState` while Active or Defocused
    /// - `InvalidResponse` if the challenge is not from the configured MOR
    /// - `Protocol` for a malformed nonce
    /// - `MissingDeviceSecret` if this device has no secret
    pub fn handle_challenge(
        &mut self,
        challenge: &Challenge,
        at: Moment,
    ) -> Result<Response, BeamAuthError> {
        let state = self.controller.state();
        if matches!(state, BeamState::Active | BeamState::Defocused) {
            return Err(BeamAuthError::InvalidState { state, operation: "handle_challenge" });
        }
        if self.requested_power_w.is_none() {
            return Err(BeamAuthError::UnexpectedMessage {
                state,
                opcode: heliobeam_proto::Opcode::Challenge,
            });
        }
        if !self.config.orbital_id.matches(&challenge.node_id) {
            return Err(ResponseRejection::PeerMismatch {
                expected: self.config.orbital_id.clone(),
                actual: challenge.node_id.clone(),
            }
            .into());
        }

        let nonce = Nonce::from_hex(&challenge.nonce)?;
        let secret = self.secrets.device_secret(&self.config.node_id).ok_or_else(|| {
            BeamAuthError::MissingDeviceSecret { node_id: self.config.node_id.clone() }
        })?;

        let (key, response) = answer_challenge(&self.config.node_id, &secret, &nonce);
        self.controller.authorize()?;
        self.session = Some(Session { key, nonce, answered_at: at.instant });

        tracing::debug!(node_id = %self.config.node_id, state = ?self.controller.state(), "challenge answered");
        Ok(response)
    }

    /// Enter Active after verifying the MOR's session acknowledgment.
    ///
    /// A forged or mismatched ack is rejected without disturbing the
    /// pending session.
    ///
    /// # Errors
    ///
    /// - `SessionNotEstablished` if no challenge was answered
    /// - `InvalidState` unless Authorized
    /// - `LivenessTimeout` if the ack arrives more than `timeout_threshold`
    ///   after the challenge was answered; the session is dropped to Idle
    /// - `InvalidResponse` if the ack does not verify
    pub fn activate_session(
        &mut self,
        ack: &SessionAck,
        at: Moment,
    ) -> Result<Vec<NodeAction>, BeamAuthError> {
        if let Some(elapsed) = self.expire_authorization(at) {
            return Err(BeamAuthError::LivenessTimeout { elapsed });
        }
        let Some(session) = self.session.as_ref() else {
            return Err(BeamAuthError::SessionNotEstablished { operation: "activate_session" });
        };
        let state = self.controller.state();
        if state != BeamState::Authorized {
            return Err(BeamAuthError::InvalidState { state, operation: "activate_session" });
        }

        if let Err(rejection) =
            verify_session_ack(ack, &self.config.orbital_id, &session.key, &session.nonce)
        {
            tracing::warn!(node_id = %self.config.node_id, reason = %rejection, "session ack rejected");
            return Err(rejection.into());
        }

        let command = self.controller.activate(true)?;
        self.emitter.reset();
        self.monitor.arm(at.instant);

        tracing::debug!(node_id = %self.config.node_id, state = ?self.controller.state(), "session active");
        Ok(vec![NodeAction::Actuate(command)])
    }

    /// Emit a heartbeat now, regardless of cadence.
    ///
    /// If the MOR's liveness window has already closed the beam is cut and
    /// the `Defocus` command is returned instead.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotEstablished` without a key and `InvalidState`
    /// unless Active.
    pub fn send_heartbeat(&mut self, at: Moment) -> Result<Vec<NodeAction>, BeamAuthError> {
        if let Some(actions) = self.poll_timeout(at) {
            return Ok(actions);
        }
        let Some(session) = self.session.as_ref() else {
            return Err(BeamAuthError::SessionNotEstablished { operation: "send_heartbeat" });
        };
        let state = self.controller.state();
        if state != BeamState::Active {
            return Err(BeamAuthError::InvalidState { state, operation: "send_heartbeat" });
        }

        let heartbeat = self.emitter.emit(&self.config.node_id, &session.key, at);
        Ok(vec![NodeAction::Send(Message::Heartbeat(heartbeat))])
    }

    /// Verify a heartbeat ack and refresh the MOR's liveness window.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotEstablished` without a key, `InvalidState` unless
    /// Active, and `InvalidHeartbeat` if the ack fails verification.
    pub fn handle_heartbeat_ack(
        &mut self,
        ack: &HeartbeatAck,
        at: Moment,
    ) -> Result<Vec<NodeAction>, BeamAuthError> {
        if let Some(actions) = self.poll_timeout(at) {
            return Ok(actions);
        }
        let Some(session) = self.session.as_ref() else {
            return Err(BeamAuthError::SessionNotEstablished { operation: "handle_heartbeat_ack" });
        };
        let state = self.controller.state();
        if state != BeamState::Active {
            return Err(BeamAuthError::InvalidState { state, operation: "handle_heartbeat_ack" });
        }

        let last_sent = self.emitter.last_timestamp_ms();
        if let Err(rejection) =
            self.monitor.verify_ack(ack, &self.config.orbital_id, &session.key, last_sent, at)
        {
            tracing::warn!(node_id = %self.config.node_id, reason = %rejection, "heartbeat ack rejected");
            return Err(rejection.into());
        }

        Ok(Vec::new())
    }

    /// Timer entry point: drop an unconfirmed session that waited too long,
    /// cut the beam on timeout, otherwise emit a heartbeat if one is due.
    pub fn tick(&mut self, at: Moment) -> Vec<NodeAction> {
        if self.expire_authorization(at).is_some() {
            return Vec::new();
        }
        if let Some(actions) = self.poll_timeout(at) {
            return actions;
        }
        if self.controller.state() != BeamState::Active || !self.emitter.is_due(at.instant) {
            return Vec::new();
        }
        let Some(session) = self.session.as_ref() else {
            return Vec::new();
        };

        let heartbeat = self.emitter.emit(&self.config.node_id, &session.key, at);
        vec![NodeAction::Send(Message::Heartbeat(heartbeat))]
    }

    /// Whether the beam must be off at `at`.
    pub fn should_defocus_beam(&self, at: Moment) -> bool {
        !self.controller.state().is_active() || self.monitor.check(at.instant).should_defocus()
    }

    /// Emergency stop. Callable in any state, always emits `Defocus`.
    pub fn emergency_deactivate(&mut self) -> Vec<NodeAction> {
        let command = self.controller.emergency();
        self.end_session();
        self.requested_power_w = None;

        tracing::error!(node_id = %self.config.node_id, "emergency deactivation");
        vec![NodeAction::Actuate(command)]
    }

    /// Graceful teardown to Idle.
    pub fn deactivate(&mut self) -> Vec<NodeAction> {
        let command = self.controller.deactivate();
        self.end_session();
        self.requested_power_w = None;

        tracing::debug!(node_id = %self.config.node_id, state = ?self.controller.state(), "deactivated");
        command.map(NodeAction::Actuate).into_iter().collect()
    }

    /// Dispatch an incoming message.
    ///
    /// # Errors
    ///
    /// Propagates the handler's error; `UnexpectedMessage` for messages a
    /// GRN never receives.
    pub fn handle_message(
        &mut self,
        message: &Message,
        at: Moment,
    ) -> Result<Vec<NodeAction>, BeamAuthError> {
        match message {
            Message::Challenge(challenge) => {
                let response = self.handle_challenge(challenge, at)?;
                Ok(vec![NodeAction::Send(Message::Response(response))])
            },
            Message::SessionAck(ack) => self.activate_session(ack, at),
            Message::HeartbeatAck(ack) => self.handle_heartbeat_ack(ack, at),
            other => Err(BeamAuthError::UnexpectedMessage {
                state: self.controller.state(),
                opcode: other.opcode(),
            }),
        }
    }

    /// Tear an Authorized session down to Idle once its ack is overdue.
    ///
    /// Returns how long the session waited if it was dropped.
    fn expire_authorization(&mut self, at: Moment) -> Option<Duration> {
        if self.controller.state() != BeamState::Authorized {
            return None;
        }
        let waited = at.instant.saturating_duration_since(self.session.as_ref()?.answered_at);
        if waited <= self.config.liveness.timeout_threshold {
            return None;
        }

        self.controller.deactivate();
        self.end_session();
        self.requested_power_w = None;

        tracing::warn!(node_id = %self.config.node_id, ?waited, "no session ack within liveness window, dropping session");
        Some(waited)
    }

    fn poll_timeout(&mut self, at: Moment) -> Option<Vec<NodeAction>> {
        if !self.controller.state().is_active() {
            return None;
        }
        let Liveness::Expired { elapsed } = self.monitor.check(at.instant) else {
            return None;
        };

        let command = self.controller.defocus_on_timeout(elapsed)?;
        self.end_session();

        tracing::warn!(node_id = %self.config.node_id, ?elapsed, "no heartbeat ack within liveness window, defocusing");
        Some(vec![NodeAction::Actuate(command)])
    }

    fn end_session(&mut self) {
        self.session = None;
        self.emitter.reset();
        self.monitor.disarm();
    }
}

impl std::fmt::Debug for GroundNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroundNode")
            .field("node_id", &self.config.node_id)
            .field("state", &self.controller.state())
            .field("has_session_key", &self.session.is_some())
            .finish_non_exhaustive()
    }
}
