//! World state for scenario execution.
//!
//! The World owns one GRN, one MOR, an actuator for each and an in-memory
//! link between them. Every message is encoded to a frame and decoded on
//! the other side, so scenarios exercise the codec as well as the state
//! machines. Delivery is instant and in order. Loss is modeled either by
//! dropping every message of selected opcodes or by taking the link down.
//! Delay is modeled by holding messages of selected opcodes until the
//! scenario releases them.

use std::{collections::VecDeque, time::Duration};

use heliobeam_core::{
    BeamState, GroundNode, Moment, NodeAction, OrbitalNode, Role, action::execute,
    error::BeamAuthError,
};
use heliobeam_proto::{Message, Opcode};

use crate::{actuator::RecordingActuator, sim_env::SimEnv};

/// A message a node refused, kept for oracles.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    /// Node that refused it
    pub role: Role,
    /// Opcode of the refused message
    pub opcode: Option<Opcode>,
    /// Why
    pub error: BeamAuthError,
}

/// World state containing one GRN-MOR pair and link metrics.
pub struct World {
    env: SimEnv,
    now: Moment,
    ground: GroundNode,
    orbital: OrbitalNode,
    ground_actuator: RecordingActuator,
    orbital_actuator: RecordingActuator,
    dropped_opcodes: Vec<Opcode>,
    held_opcodes: Vec<Opcode>,
    held: VecDeque<(Role, Vec<u8>)>,
    link_up: bool,
    requested_power_w: Option<u64>,
    cycle_first_rejection: usize,
    ground_messages_sent: usize,
    orbital_messages_sent: usize,
    messages_dropped: usize,
    bytes_on_wire: usize,
    rejections: Vec<Rejection>,
}

impl World {
    /// Create a world at `now` with both actuators off.
    pub fn new(env: SimEnv, now: Moment, ground: GroundNode, orbital: OrbitalNode) -> Self {
        Self {
            env,
            now,
            ground,
            orbital,
            ground_actuator: RecordingActuator::new(),
            orbital_actuator: RecordingActuator::new(),
            dropped_opcodes: Vec::new(),
            held_opcodes: Vec::new(),
            held: VecDeque::new(),
            link_up: true,
            requested_power_w: None,
            cycle_first_rejection: 0,
            ground_messages_sent: 0,
            orbital_messages_sent: 0,
            messages_dropped: 0,
            bytes_on_wire: 0,
            rejections: Vec::new(),
        }
    }

    /// Silently drop every future message with this opcode.
    pub fn drop_opcode(&mut self, opcode: Opcode) {
        self.dropped_opcodes.push(opcode);
    }

    /// Delay every future message with this opcode until
    /// [`World::release_held`].
    pub fn hold_opcode(&mut self, opcode: Opcode) {
        self.held_opcodes.push(opcode);
    }

    /// Messages currently held on the link.
    pub fn held_messages(&self) -> usize {
        self.held.len()
    }

    /// Stop holding and deliver everything held so far, oldest first.
    pub fn release_held(&mut self) {
        self.held_opcodes.clear();
        let held = std::mem::take(&mut self.held);
        self.deliver(held);
    }

    /// Bring the link up or down. While down every message is lost.
    pub fn set_link_up(&mut self, up: bool) {
        self.link_up = up;
    }

    /// Current simulated time.
    pub fn now(&self) -> Moment {
        self.now
    }

    /// Move the clock forward.
    pub fn advance(&mut self, by: Duration) {
        self.now = self.now + by;
    }

    /// Set the clock, e.g. from a Turmoil-driven [`SimEnv`].
    pub fn set_now(&mut self, now: Moment) {
        self.now = now;
    }

    /// Start an authorization cycle from the GRN and deliver messages until
    /// the link is quiet.
    ///
    /// # Errors
    ///
    /// Returns an error if the GRN refuses to issue a beacon.
    pub fn start_cycle(&mut self, requested_power_w: u64) -> Result<(), String> {
        let beacon = self
            .ground
            .generate_beacon(requested_power_w, self.now)
            .map_err(|e| format!("GRN generate_beacon failed: {e}"))?;
        self.requested_power_w = Some(requested_power_w);
        self.cycle_first_rejection = self.rejections.len();
        self.dispatch(Role::Grn, vec![NodeAction::Send(Message::Beacon(beacon))]);
        Ok(())
    }

    /// Start a fresh cycle at the last requested power if the current one
    /// failed for a reason a retry can fix.
    ///
    /// Returns `true` if a new cycle was started.
    ///
    /// # Errors
    ///
    /// Returns an error if the GRN refuses to issue a beacon.
    pub fn restart_after_transient(&mut self) -> Result<bool, String> {
        let Some(requested_power_w) = self.requested_power_w else {
            return Ok(false);
        };
        if self.ground.state().is_active() {
            return Ok(false);
        }
        let Some(cause) =
            self.rejections[self.cycle_first_rejection..].iter().find(|r| r.error.is_transient())
        else {
            return Ok(false);
        };

        tracing::info!(node = %cause.role, error = %cause.error, "restarting authorization cycle");
        self.start_cycle(requested_power_w)?;
        Ok(true)
    }

    /// Tick both nodes (GRN first) and deliver whatever they emit.
    pub fn tick(&mut self) {
        let actions = self.ground.tick(self.now);
        self.dispatch(Role::Grn, actions);

        let actions = self.orbital.tick(self.now);
        self.dispatch(Role::Mor, actions);
    }

    /// Emergency stop on one node.
    pub fn emergency(&mut self, role: Role) {
        let actions = match role {
            Role::Grn => self.ground.emergency_deactivate(),
            Role::Mor => self.orbital.emergency_defocus(),
        };
        self.dispatch(role, actions);
    }

    /// Execute `actions` for `from`, then deliver messages until the link is
    /// quiet.
    pub fn dispatch(&mut self, from: Role, actions: Vec<NodeAction>) {
        let mut in_flight = VecDeque::new();
        self.run_actions(from, actions, &mut in_flight);
        self.deliver(in_flight);
    }

    fn deliver(&mut self, mut in_flight: VecDeque<(Role, Vec<u8>)>) {
        while let Some((to, bytes)) = in_flight.pop_front() {
            let message = match Message::from_bytes(&bytes) {
                Ok(message) => message,
                Err(e) => {
                    self.reject(to, None, e.into());
                    continue;
                },
            };

            let result = match to {
                Role::Grn => self.ground.handle_message(&message, self.now),
                Role::Mor => self.orbital.handle_message(&self.env, &message, self.now),
            };

            match result {
                Ok(actions) => self.run_actions(to, actions, &mut in_flight),
                Err(error) => self.reject(to, Some(message.opcode()), error),
            }
        }
    }

    fn run_actions(
        &mut self,
        from: Role,
        actions: Vec<NodeAction>,
        in_flight: &mut VecDeque<(Role, Vec<u8>)>,
    ) {
        let actuator = match from {
            Role::Grn => &mut self.ground_actuator,
            Role::Mor => &mut self.orbital_actuator,
        };

        for message in execute(actions, actuator) {
            match from {
                Role::Grn => self.ground_messages_sent += 1,
                Role::Mor => self.orbital_messages_sent += 1,
            }

            if !self.link_up || self.dropped_opcodes.contains(&message.opcode()) {
                tracing::debug!(from = %from, message = %message, "dropped on link");
                self.messages_dropped += 1;
                continue;
            }

            match message.to_bytes() {
                Ok(bytes) if self.held_opcodes.contains(&message.opcode()) => {
                    tracing::debug!(from = %from, message = %message, "held on link");
                    self.bytes_on_wire += bytes.len();
                    self.held.push_back((from.peer(), bytes));
                },
                Ok(bytes) => {
                    self.bytes_on_wire += bytes.len();
                    in_flight.push_back((from.peer(), bytes));
                },
                Err(e) => self.reject(from, Some(message.opcode()), e.into()),
            }
        }
    }

    fn reject(&mut self, role: Role, opcode: Option<Opcode>, error: BeamAuthError) {
        tracing::debug!(node = %role, ?opcode, %error, "message rejected");
        self.rejections.push(Rejection { role, opcode, error });
    }

    /// The GRN.
    pub fn ground(&self) -> &GroundNode {
        &self.ground
    }

    /// The MOR.
    pub fn orbital(&self) -> &OrbitalNode {
        &self.orbital
    }

    /// Mutable GRN, for steps a scenario drives by hand.
    pub fn ground_mut(&mut self) -> &mut GroundNode {
        &mut self.ground
    }

    /// Mutable MOR, for steps a scenario drives by hand.
    pub fn orbital_mut(&mut self) -> &mut OrbitalNode {
        &mut self.orbital
    }

    /// GRN actuator.
    pub fn ground_actuator(&self) -> &RecordingActuator {
        &self.ground_actuator
    }

    /// MOR actuator.
    pub fn orbital_actuator(&self) -> &RecordingActuator {
        &self.orbital_actuator
    }

    /// Messages the GRN emitted, dropped ones included.
    pub fn ground_messages_sent(&self) -> usize {
        self.ground_messages_sent
    }

    /// Messages the MOR emitted, dropped ones included.
    pub fn orbital_messages_sent(&self) -> usize {
        self.orbital_messages_sent
    }

    /// Messages lost on the link.
    pub fn messages_dropped(&self) -> usize {
        self.messages_dropped
    }

    /// Total encoded bytes delivered.
    pub fn bytes_on_wire(&self) -> usize {
        self.bytes_on_wire
    }

    /// Messages refused by either node.
    pub fn rejections(&self) -> &[Rejection] {
        &self.rejections
    }

    /// Beam state of (GRN, MOR).
    pub fn beam_states(&self) -> (BeamState, BeamState) {
        (self.ground.state(), self.orbital.state())
    }

    /// Check if both nodes are Active.
    pub fn both_active(&self) -> bool {
        self.beam_states() == (BeamState::Active, BeamState::Active)
    }

    /// Check if neither actuator is energized.
    pub fn beam_off(&self) -> bool {
        !self.ground_actuator.is_energized() && !self.orbital_actuator.is_energized()
    }

    /// Check if each actuator is energized exactly when its node is Active.
    pub fn actuators_match_states(&self) -> bool {
        self.ground_actuator.is_energized() == self.ground.state().is_active()
            && self.orbital_actuator.is_energized() == self.orbital.state().is_active()
    }
}
