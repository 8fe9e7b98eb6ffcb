//! Scenario builder API.
//!
//! Provides a declarative API for constructing scenario tests that enforce
//! the Oracle Pattern.

use std::{sync::Arc, time::Duration};

use heliobeam_core::{
    GroundConfig, GroundNode, Moment, OrbitalConfig, OrbitalNode, Role,
    credential::TrustedRegistry,
    safety::SafetyGate,
    secrets::{DeviceSecret, SecretStore},
};
use heliobeam_proto::Opcode;

use crate::{
    scenario::{OracleFn, World},
    sim_env::{SIM_EPOCH, SimEnv},
};

/// Scenario builder.
///
/// A scenario runs one authorization cycle, then a number of heartbeat
/// intervals on a healthy link, then an optional outage, then an optional
/// emergency stop, and finally the oracle.
pub struct Scenario {
    seed: u64,
    requested_power_w: u64,
    ground_config: GroundConfig,
    orbital_config: OrbitalConfig,
    heartbeats: usize,
    outage: Option<Duration>,
    dropped_opcodes: Vec<Opcode>,
    safety_gate: Option<Box<dyn SafetyGate>>,
    emergency: Option<Role>,
}

impl Scenario {
    /// Create a new scenario with default configuration: GRN-001 asking
    /// MOR-001 for 1 MW.
    pub fn new() -> Self {
        Self {
            seed: 0,
            requested_power_w: 1_000_000,
            ground_config: GroundConfig::default(),
            orbital_config: OrbitalConfig::default(),
            heartbeats: 0,
            outage: None,
            dropped_opcodes: Vec::new(),
            safety_gate: None,
            emergency: None,
        }
    }

    /// Seed for the simulated RNG (keys, secrets, nonces).
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Power the GRN asks for.
    pub fn with_requested_power(mut self, watts: u64) -> Self {
        self.requested_power_w = watts;
        self
    }

    /// Configure the GRN.
    pub fn with_ground_config(mut self, config: GroundConfig) -> Self {
        self.ground_config = config;
        self
    }

    /// Configure the MOR.
    pub fn with_orbital_config(mut self, config: OrbitalConfig) -> Self {
        self.orbital_config = config;
        self
    }

    /// Run this many heartbeat intervals after the handshake.
    pub fn with_heartbeats(mut self, count: usize) -> Self {
        self.heartbeats = count;
        self
    }

    /// Take the link down for `duration` after the heartbeats, ticking both
    /// nodes every heartbeat interval while it is down.
    pub fn with_outage(mut self, duration: Duration) -> Self {
        self.outage = Some(duration);
        self
    }

    /// Lose every message with this opcode for the whole run.
    pub fn dropping(mut self, opcode: Opcode) -> Self {
        self.dropped_opcodes.push(opcode);
        self
    }

    /// Gate MOR activation on a safety analysis.
    pub fn with_safety_gate(mut self, gate: Box<dyn SafetyGate>) -> Self {
        self.safety_gate = Some(gate);
        self
    }

    /// Trigger an emergency stop on `role` at the end of the run.
    pub fn with_emergency(mut self, role: Role) -> Self {
        self.emergency = Some(role);
        self
    }

    /// Set the oracle function and return a runnable scenario.
    ///
    /// The oracle is mandatory - you cannot run a scenario without
    /// verification.
    pub fn oracle(self, oracle: OracleFn) -> RunnableScenario {
        RunnableScenario { scenario: self, oracle }
    }

    /// Provision both nodes from `env` and place them in a fresh world.
    ///
    /// The GRN's device secret goes into a store shared by both ends and its
    /// freshly generated verifying key is registered with the MOR's
    /// credential registry.
    ///
    /// # Errors
    ///
    /// Returns an error if either node rejects its configuration.
    pub fn into_world(self, env: SimEnv, now: Moment) -> Result<World, String> {
        let ground_id = self.ground_config.node_id.clone();

        let secrets = Arc::new(SecretStore::new());
        secrets
            .provision(ground_id.clone(), DeviceSecret::generate(&env))
            .map_err(|e| format!("provisioning {ground_id} failed: {e}"))?;

        let ground = GroundNode::with_generated_key(self.ground_config, &env, secrets.clone())
            .map_err(|e| format!("GRN rejected config: {e}"))?;
        let mut registry = TrustedRegistry::new();
        registry.register(ground_id, ground.verifying_key());

        let mut orbital = OrbitalNode::new(self.orbital_config, Box::new(registry), secrets)
            .map_err(|e| format!("MOR rejected config: {e}"))?;
        if let Some(gate) = self.safety_gate {
            orbital = orbital.with_safety_gate(gate);
        }

        let mut world = World::new(env, now, ground, orbital);
        for opcode in self.dropped_opcodes {
            world.drop_opcode(opcode);
        }
        Ok(world)
    }
}

impl Default for Scenario {
    fn default() -> Self {
        Self::new()
    }
}

/// A scenario with an oracle function that can be executed.
pub struct RunnableScenario {
    scenario: Scenario,
    oracle: OracleFn,
}

impl RunnableScenario {
    /// Execute the scenario.
    ///
    /// 1. GRN issues a beacon; the handshake runs to completion on the link
    /// 2. For each heartbeat: advance one interval, tick both nodes
    /// 3. If an outage is set: link down, tick every interval until it ends
    /// 4. If an emergency is set: stop that node
    ///
    /// Finally, the oracle is invoked to verify global consistency.
    ///
    /// # Errors
    ///
    /// Returns an error if setup fails, the GRN cannot start a cycle, or the
    /// oracle reports a violation.
    pub fn run(self) -> Result<(), String> {
        let env = SimEnv::with_seed(self.scenario.seed);
        let now = Moment::new(std::time::Instant::now(), SIM_EPOCH);
        self.run_with(env, now)
    }

    /// Execute the scenario with an explicit environment and start time.
    ///
    /// # Errors
    ///
    /// See [`RunnableScenario::run`].
    pub fn run_with(self, env: SimEnv, now: Moment) -> Result<(), String> {
        let Self { scenario, oracle } = self;
        let interval = scenario.ground_config.liveness.heartbeat_interval;
        let requested_power_w = scenario.requested_power_w;
        let heartbeats = scenario.heartbeats;
        let outage = scenario.outage;
        let emergency = scenario.emergency;

        let mut world = scenario.into_world(env, now)?;
        world.start_cycle(requested_power_w)?;

        for _ in 0..heartbeats {
            world.advance(interval);
            world.tick();
        }

        if let Some(outage) = outage {
            world.set_link_up(false);
            let mut elapsed = Duration::ZERO;
            while elapsed < outage {
                let step = interval.min(outage - elapsed);
                world.advance(step);
                world.tick();
                elapsed += step;
            }
            world.set_link_up(true);
        }

        if let Some(role) = emergency {
            world.emergency(role);
        }

        oracle(&world)
    }
}
