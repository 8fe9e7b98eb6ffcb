//! Orbital receiver (MOR) state machine.
//!
//! # Lifecycle
//!
//! ```text
//! receive_beacon ──> send_challenge ──> receive_response ──> activate_beam ──> receive_heartbeat*
//!   (Authorized)                        (key derived)         (Active)
//! ```
//!
//! The MOR is the gatekeeper. It verifies the beacon against policy and the
//! credential verifier, challenges the GRN, checks the response with its
//! own copy of the GRN's device secret and only then energizes. Activation
//! emits a `SessionAck` so the GRN can confirm key agreement before it
//! energizes too.
//!
//! While Active, every verified heartbeat refreshes a receiver-clock window
//! of `timeout_threshold`. [`OrbitalNode::tick`] is the timer: once the
//! window closes the beam is defocused and the session key destroyed.
//! Heartbeat handling polls the same timeout first, so a late heartbeat
//! can never revive an expired session.

use std::{sync::Arc, time::Duration};

use heliobeam_proto::{Beacon, Challenge, Heartbeat, HeartbeatAck, Message, Response};

use crate::{
    action::NodeAction,
    activation::{BeamController, BeamState, DefocusReason},
    beacon::{AuthorizedRequest, BeaconPolicy, BeaconVerifier},
    challenge::{Authenticator, ChallengeConfig, session_ack},
    credential::CredentialVerifier,
    crypto::{Nonce, SessionKey},
    env::{Environment, Moment},
    error::BeamAuthError,
    heartbeat::{Liveness, LivenessConfig, LivenessMonitor},
    identity::NodeId,
    safety::SafetyGate,
    secrets::SecretProvider,
};

/// MOR configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrbitalConfig {
    /// This node
    pub node_id: NodeId,
    /// Beacon acceptance policy
    pub policy: BeaconPolicy,
    /// Challenge timing
    pub challenge: ChallengeConfig,
    /// Heartbeat timing
    pub liveness: LivenessConfig,
}

impl Default for OrbitalConfig {
    fn default() -> Self {
        Self {
            node_id: NodeId::from("MOR-001"),
            policy: BeaconPolicy::default(),
            challenge: ChallengeConfig::default(),
            liveness: LivenessConfig::default(),
        }
    }
}

impl OrbitalConfig {
    /// Check every timing and policy constraint.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` describing the first violated constraint.
    pub fn validate(&self) -> Result<(), BeamAuthError> {
        self.liveness.validate()?;
        if self.challenge.ttl.is_zero() {
            return Err(BeamAuthError::InvalidConfig {
                reason: "challenge ttl must be non-zero".to_string(),
            });
        }
        if self.policy.allowed_nodes.is_empty() {
            return Err(BeamAuthError::InvalidConfig {
                reason: "beacon policy allows no nodes".to_string(),
            });
        }
        Ok(())
    }
}

struct Session {
    key: SessionKey,
    nonce: Nonce,
    peer: NodeId,
}

/// MOR node.
pub struct OrbitalNode {
    node_id: NodeId,
    verifier: BeaconVerifier,
    authenticator: Authenticator,
    controller: BeamController,
    monitor: LivenessMonitor,
    safety: Option<Box<dyn SafetyGate>>,
    request: Option<AuthorizedRequest>,
    session: Option<Session>,
}

impl OrbitalNode {
    /// Create a MOR in `Idle`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the configuration is inconsistent.
    pub fn new(
        config: OrbitalConfig,
        credentials: Box<dyn CredentialVerifier>,
        secrets: Arc<dyn SecretProvider>,
    ) -> Result<Self, BeamAuthError> {
        config.validate()?;

        Ok(Self {
            node_id: config.node_id,
            verifier: BeaconVerifier::new(config.policy, credentials),
            authenticator: Authenticator::new(config.challenge, secrets),
            controller: BeamController::new(),
            monitor: LivenessMonitor::new(config.liveness),
            safety: None,
            request: None,
            session: None,
        })
    }

    /// Gate activation on a safety analysis of the requested power.
    #[must_use]
    pub fn with_safety_gate(mut self, gate: Box<dyn SafetyGate>) -> Self {
        self.safety = Some(gate);
        self
    }

    /// This node's identity.
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Current beam state.
    pub fn state(&self) -> BeamState {
        self.controller.state()
    }

    /// Whether a session key is held.
    pub fn has_session_key(&self) -> bool {
        self.session.is_some()
    }

    /// Whether a challenge awaits its response.
    pub fn has_pending_challenge(&self) -> bool {
        self.authenticator.pending_nonce().is_some()
    }

    /// Request accepted in the current cycle.
    pub fn authorized_request(&self) -> Option<&AuthorizedRequest> {
        self.request.as_ref()
    }

    /// Power granted to the current session, for routing and safety.
    pub fn authorized_power_w(&self) -> Option<u64> {
        self.request.as_ref().map(|r| r.requested_power_w)
    }

    /// Receiver time of the last verified heartbeat (or activation).
    pub fn last_valid_heartbeat_time(&self) -> Option<std::time::Instant> {
        self.monitor.last_valid_heartbeat_time()
    }

    /// Why the beam was last cut.
    pub fn last_defocus(&self) -> Option<DefocusReason> {
        self.controller.last_defocus()
    }

    /// Verify a beacon and, if it passes, start a new cycle in Authorized.
    ///
    /// A rejected beacon leaves the node exactly as it was.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` while Active and `InvalidBeacon` for any
    /// failed gate.
    pub fn receive_beacon(
        &mut self,
        beacon: &Beacon,
        at: Moment,
    ) -> Result<AuthorizedRequest, BeamAuthError> {
        let state = self.controller.state();
        if state == BeamState::Active {
            return Err(BeamAuthError::InvalidState { state, operation: "receive_beacon" });
        }

        let request = self.verifier.receive_beacon(beacon, at)?;

        self.controller.begin_cycle()?;
        self.end_session();
        self.authenticator.cancel();
        self.controller.authorize()?;
        self.request = Some(request.clone());

        tracing::debug!(
            node_id = %self.node_id,
            peer = %request.node_id,
            requested_power_w = request.requested_power_w,
            "beacon accepted"
        );
        Ok(request)
    }

    /// Challenge the authorized GRN with a fresh nonce.
    ///
    /// Replaces any pending challenge and any key derived but not yet
    /// activated.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless Authorized.
    pub fn send_challenge(
        &mut self,
        env: &impl Environment,
        at: Moment,
    ) -> Result<Challenge, BeamAuthError> {
        let state = self.controller.state();
        let (BeamState::Authorized, Some(request)) = (state, self.request.as_ref()) else {
            return Err(BeamAuthError::InvalidState { state, operation: "send_challenge" });
        };

        let peer = request.node_id.clone();
        self.session = None;
        let nonce = self.authenticator.send_challenge(env, peer, at.instant);

        Ok(Challenge { node_id: self.node_id.to_string(), nonce: nonce.to_hex() })
    }

    /// Verify the GRN's response and install the session key.
    ///
    /// The beam is not energized until [`activate_beam`](Self::activate_beam).
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless Authorized, otherwise whatever the
    /// authenticator reports (`StaleOrDuplicateNonce`, `InvalidResponse`,
    /// `MissingDeviceSecret`).
    pub fn receive_response(&mut self, response: &Response, at: Moment) -> Result<(), BeamAuthError> {
        let state = self.controller.state();
        let (BeamState::Authorized, Some(request)) = (state, self.request.as_ref()) else {
            return Err(BeamAuthError::InvalidState { state, operation: "receive_response" });
        };
        let peer = request.node_id.clone();

        let key = self.authenticator.receive_response(response, at.instant).inspect_err(|err| {
            tracing::warn!(node_id = %self.node_id, peer = %peer, reason = %err, "response rejected");
        })?;
        let nonce = Nonce::from_hex(&response.nonce)?;

        self.session = Some(Session { key, nonce, peer });
        tracing::debug!(node_id = %self.node_id, "session key established");
        Ok(())
    }

    /// Energize the beam and confirm the session to the GRN.
    ///
    /// With a safety gate configured, a refused power level tears the
    /// session down to Idle.
    ///
    /// # Errors
    ///
    /// - `SessionNotEstablished` without a verified response
    /// - `InvalidState` unless Authorized
    /// - `UnsafeBeam` if the safety gate refuses
    pub fn activate_beam(&mut self, at: Moment) -> Result<Vec<NodeAction>, BeamAuthError> {
        if self.session.is_none() {
            return Err(BeamAuthError::SessionNotEstablished { operation: "activate_beam" });
        }
        let state = self.controller.state();
        if state != BeamState::Authorized {
            return Err(BeamAuthError::InvalidState { state, operation: "activate_beam" });
        }

        if let (Some(gate), Some(power)) = (self.safety.as_ref(), self.authorized_power_w()) {
            if let Err(violation) = gate.check(power) {
                tracing::warn!(node_id = %self.node_id, reason = %violation, "activation refused by safety gate");
                self.teardown();
                return Err(violation.into());
            }
        }

        let command = self.controller.activate(true)?;
        self.monitor.arm(at.instant);

        let Some(session) = self.session.as_ref() else {
            return Err(BeamAuthError::SessionNotEstablished { operation: "activate_beam" });
        };
        let ack = session_ack(&self.node_id, &session.key, &session.nonce);

        tracing::debug!(node_id = %self.node_id, peer = %session.peer, "beam active");
        Ok(vec![NodeAction::Actuate(command), NodeAction::Send(Message::SessionAck(ack))])
    }

    /// Verify a heartbeat, refresh the liveness window and acknowledge it.
    ///
    /// If the window already closed, the beam is cut and the `Defocus`
    /// command is returned; the heartbeat is not acknowledged.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotEstablished` without a key, `InvalidState` unless
    /// Active and `InvalidHeartbeat` if verification fails.
    pub fn receive_heartbeat(
        &mut self,
        heartbeat: &Heartbeat,
        at: Moment,
    ) -> Result<Vec<NodeAction>, BeamAuthError> {
        if let Some(actions) = self.poll_timeout(at) {
            return Ok(actions);
        }
        let Some(session) = self.session.as_ref() else {
            return Err(BeamAuthError::SessionNotEstablished { operation: "receive_heartbeat" });
        };
        let state = self.controller.state();
        if state != BeamState::Active {
            return Err(BeamAuthError::InvalidState { state, operation: "receive_heartbeat" });
        }

        if let Err(rejection) =
            self.monitor.verify_heartbeat(heartbeat, &session.peer, &session.key, at)
        {
            tracing::warn!(node_id = %self.node_id, reason = %rejection, "heartbeat rejected");
            return Err(rejection.into());
        }

        let ack = HeartbeatAck {
            node_id: self.node_id.to_string(),
            timestamp: heartbeat.timestamp,
            hmac: session.key.heartbeat_ack_tag(heartbeat.timestamp).to_hex(),
        };
        Ok(vec![NodeAction::Send(Message::HeartbeatAck(ack))])
    }

    /// Remaining liveness window.
    ///
    /// # Errors
    ///
    /// Returns `LivenessTimeout` once the window has closed and
    /// `SessionNotEstablished` when no session is active.
    pub fn check_liveness(&self, at: Moment) -> Result<Duration, BeamAuthError> {
        if !self.controller.state().is_active() || self.session.is_none() {
            return Err(BeamAuthError::SessionNotEstablished { operation: "check_liveness" });
        }
        match self.monitor.check(at.instant) {
            Liveness::Alive { remaining } => Ok(remaining),
            Liveness::Expired { elapsed } => Err(BeamAuthError::LivenessTimeout { elapsed }),
            Liveness::Disarmed => {
                Err(BeamAuthError::SessionNotEstablished { operation: "check_liveness" })
            },
        }
    }

    /// Whether the beam must be off at `at`.
    pub fn should_defocus_beam(&self, at: Moment) -> bool {
        !self.controller.state().is_active() || self.monitor.check(at.instant).should_defocus()
    }

    /// Timer entry point: expire stale challenges and cut the beam on
    /// liveness timeout.
    pub fn tick(&mut self, at: Moment) -> Vec<NodeAction> {
        self.authenticator.expire(at.instant);
        self.poll_timeout(at).unwrap_or_default()
    }

    /// Emergency stop. Callable in any state, always emits `Defocus`.
    pub fn emergency_defocus(&mut self) -> Vec<NodeAction> {
        let command = self.controller.emergency();
        self.end_session();
        self.authenticator.cancel();
        self.request = None;

        tracing::error!(node_id = %self.node_id, "emergency defocus");
        vec![NodeAction::Actuate(command)]
    }

    /// Graceful teardown to Idle.
    pub fn deactivate(&mut self) -> Vec<NodeAction> {
        let command = self.teardown();
        tracing::debug!(node_id = %self.node_id, state = ?self.controller.state(), "deactivated");
        command.map(NodeAction::Actuate).into_iter().collect()
    }

    /// Dispatch an incoming message.
    ///
    /// An accepted beacon is answered with a challenge and an accepted
    /// response activates the beam immediately.
    ///
    /// # Errors
    ///
    /// Propagates the handler's error; `UnexpectedMessage` for messages a
    /// MOR never receives.
    pub fn handle_message(
        &mut self,
        env: &impl Environment,
        message: &Message,
        at: Moment,
    ) -> Result<Vec<NodeAction>, BeamAuthError> {
        match message {
            Message::Beacon(beacon) => {
                self.receive_beacon(beacon, at)?;
                let challenge = self.send_challenge(env, at)?;
                Ok(vec![NodeAction::Send(Message::Challenge(challenge))])
            },
            Message::Response(response) => {
                self.receive_response(response, at)?;
                self.activate_beam(at)
            },
            Message::Heartbeat(heartbeat) => self.receive_heartbeat(heartbeat, at),
            other => Err(BeamAuthError::UnexpectedMessage {
                state: self.controller.state(),
                opcode: other.opcode(),
            }),
        }
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
        self.request = None;

        tracing::warn!(node_id = %self.node_id, ?elapsed, "heartbeat timeout, defocusing");
        Some(vec![NodeAction::Actuate(command)])
    }

    fn teardown(&mut self) -> Option<crate::activation::BeamCommand> {
        let command = self.controller.deactivate();
        self.end_session();
        self.authenticator.cancel();
        self.request = None;
        command
    }

    fn end_session(&mut self) {
        self.session = None;
        self.monitor.disarm();
    }
}

impl std::fmt::Debug for OrbitalNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrbitalNode")
            .field("node_id", &self.node_id)
            .field("state", &self.controller.state())
            .field("request", &self.request)
            .field("has_session_key", &self.session.is_some())
            .finish_non_exhaustive()
    }
}
