//! Beam activation state machine.
//!
//! Holds the authoritative beam state for one node and decides which
//! commands go to the actuator. Each node runs its own controller; the two
//! controllers only agree through verified messages.
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐ authorize ┌────────────┐ activate ┌────────┐
//! │ Idle │─────────> │ Authorized │────────> │ Active │
//! └──────┘           └────────────┘          └────────┘
//!   ↑  ↑    deactivate     │                   │   │
//!   │  └───────────────────┴───────────────────┘   │ timeout / emergency
//!   │ begin_cycle   ┌───────────┐                  ↓
//!   └────────────── │ Defocused │ <────────────────┘
//!                   └───────────┘
//! ```
//!
//! - `Authorized → Active` requires a session key; there is no other path
//!   into Active.
//! - `Defocused` is left only by starting a fresh beacon and challenge cycle.
//! - Emergency is accepted in every state and always re-issues `Defocus`.

use std::{fmt, time::Duration};

use crate::error::BeamAuthError;

/// Beam state of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BeamState {
    /// No session. Initial state and the result of a graceful teardown
    Idle,
    /// Beacon accepted (MOR) or challenge answered (GRN); no beam yet
    Authorized,
    /// Session key verified; beam on while liveness holds
    Active,
    /// Beam cut by timeout or emergency
    Defocused,
}

impl BeamState {
    /// Whether the beam is energized in this state.
    #[must_use]
    pub fn is_active(self) -> bool {
        self == Self::Active
    }
}

/// Command for the beam actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeamCommand {
    /// Focus the beam
    Activate,
    /// Cut beam delivery
    Defocus,
}

impl BeamCommand {
    /// Forward this command to an actuator.
    pub fn apply(self, actuator: &mut (impl BeamActuator + ?Sized)) {
        match self {
            Self::Activate => actuator.activate(),
            Self::Defocus => actuator.defocus(),
        }
    }
}

/// Hardware-facing beam control.
///
/// Implementations must treat `defocus` as idempotent: it can arrive again
/// while already defocused.
pub trait BeamActuator {
    /// Focus the beam on the receiver.
    fn activate(&mut self);

    /// Terminate beam delivery.
    fn defocus(&mut self);
}

/// Why a beam was cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefocusReason {
    /// No verified proof of life within the liveness window
    LivenessTimeout {
        /// Time since the last verified message
        elapsed: Duration,
    },
    /// Operator or peer-independent emergency stop
    Emergency,
}

impl fmt::Display for DefocusReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LivenessTimeout { elapsed } => write!(f, "liveness timeout after {elapsed:?}"),
            Self::Emergency => f.write_str("emergency"),
        }
    }
}

/// Beam state holder for one node.
#[derive(Debug, Clone)]
pub struct BeamController {
    state: BeamState,
    last_defocus: Option<DefocusReason>,
}

impl BeamController {
    /// Create a controller in [`BeamState::Idle`].
    #[must_use]
    pub fn new() -> Self {
        Self { state: BeamState::Idle, last_defocus: None }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> BeamState {
        self.state
    }

    /// Reason for the most recent defocus, if any.
    #[must_use]
    pub fn last_defocus(&self) -> Option<DefocusReason> {
        self.last_defocus
    }

    /// Start a fresh authorization cycle.
    ///
    /// Moves Idle, Authorized and Defocused to Idle. An active beam must be
    /// torn down first.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` while Active.
    pub fn begin_cycle(&mut self) -> Result<(), BeamAuthError> {
        if self.state == BeamState::Active {
            return Err(BeamAuthError::InvalidState {
                state: self.state,
                operation: "begin_cycle",
            });
        }

        self.state = BeamState::Idle;
        Ok(())
    }

    /// Record a verified authorization.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless Idle or Authorized.
    pub fn authorize(&mut self) -> Result<(), BeamAuthError> {
        match self.state {
            BeamState::Idle | BeamState::Authorized => {
                self.state = BeamState::Authorized;
                Ok(())
            },
            state => Err(BeamAuthError::InvalidState { state, operation: "authorize" }),
        }
    }

    /// Enter Active.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotEstablished` without a session key and
    /// `InvalidState` unless Authorized.
    pub fn activate(&mut self, has_session_key: bool) -> Result<BeamCommand, BeamAuthError> {
        if !has_session_key {
            return Err(BeamAuthError::SessionNotEstablished { operation: "activate" });
        }
        if self.state != BeamState::Authorized {
            return Err(BeamAuthError::InvalidState { state: self.state, operation: "activate" });
        }

        self.state = BeamState::Active;
        Ok(BeamCommand::Activate)
    }

    /// Cut an active beam because liveness lapsed.
    ///
    /// Returns `None` if the beam was not active.
    pub fn defocus_on_timeout(&mut self, elapsed: Duration) -> Option<BeamCommand> {
        if self.state != BeamState::Active {
            return None;
        }

        self.state = BeamState::Defocused;
        self.last_defocus = Some(DefocusReason::LivenessTimeout { elapsed });
        Some(BeamCommand::Defocus)
    }

    /// Emergency stop from any state. Idempotent.
    pub fn emergency(&mut self) -> BeamCommand {
        self.state = BeamState::Defocused;
        self.last_defocus = Some(DefocusReason::Emergency);
        BeamCommand::Defocus
    }

    /// Graceful teardown to Idle.
    ///
    /// Returns `Defocus` if the beam was active. Defocused stays Defocused:
    /// only a fresh cycle leaves it.
    pub fn deactivate(&mut self) -> Option<BeamCommand> {
        match self.state {
            BeamState::Active => {
                self.state = BeamState::Idle;
                Some(BeamCommand::Defocus)
            },
            BeamState::Authorized => {
                self.state = BeamState::Idle;
                None
            },
            BeamState::Idle | BeamState::Defocused => None,
        }
    }
}

impl Default for BeamController {
    fn default() -> Self {
        Self::new()
    }
}
