//! Beam actuator that records every command it receives.

use heliobeam_core::{BeamActuator, BeamCommand};

/// In-memory actuator for scenarios.
///
/// Tracks whether the beam is energized and keeps the full command log so
/// oracles can check that every defocus actually reached the hardware.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordingActuator {
    energized: bool,
    log: Vec<BeamCommand>,
}

impl RecordingActuator {
    /// Actuator with the beam off.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the beam is currently on.
    pub fn is_energized(&self) -> bool {
        self.energized
    }

    /// Every command received, in order.
    pub fn log(&self) -> &[BeamCommand] {
        &self.log
    }

    /// Number of `Activate` commands received.
    pub fn activations(&self) -> usize {
        self.log.iter().filter(|c| **c == BeamCommand::Activate).count()
    }

    /// Number of `Defocus` commands received.
    pub fn defocuses(&self) -> usize {
        self.log.iter().filter(|c| **c == BeamCommand::Defocus).count()
    }
}

impl BeamActuator for RecordingActuator {
    fn activate(&mut self) {
        self.energized = true;
        self.log.push(BeamCommand::Activate);
    }

    fn defocus(&mut self) {
        self.energized = false;
        self.log.push(BeamCommand::Defocus);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defocus_is_idempotent() {
        let mut actuator = RecordingActuator::new();
        BeamCommand::Activate.apply(&mut actuator);
        BeamCommand::Defocus.apply(&mut actuator);
        BeamCommand::Defocus.apply(&mut actuator);

        assert!(!actuator.is_energized());
        assert_eq!(actuator.activations(), 1);
        assert_eq!(actuator.defocuses(), 2);
    }
}
