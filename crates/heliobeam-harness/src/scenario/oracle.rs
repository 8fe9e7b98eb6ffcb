//! Oracle functions for scenario verification.
//!
//! Oracle functions run at the end of scenarios to verify global consistency.
//! They receive a snapshot of the entire world state and assert invariants.

use heliobeam_core::BeamState;

use crate::scenario::World;

/// Oracle function type.
///
/// Receives immutable reference to world state and returns:
/// - `Ok(())` if all invariants hold
/// - `Err(message)` if verification fails
pub type OracleFn = Box<dyn FnOnce(&World) -> Result<(), String>>;

/// Both nodes Active with their beams energized.
pub fn both_active() -> OracleFn {
    Box::new(|world| {
        if world.both_active()
            && world.ground_actuator().is_energized()
            && world.orbital_actuator().is_energized()
        {
            Ok(())
        } else {
            Err(format!("expected both Active and energized, got {:?}", world.beam_states()))
        }
    })
}

/// Neither actuator is energized.
pub fn beam_off() -> OracleFn {
    Box::new(|world| {
        if world.beam_off() {
            Ok(())
        } else {
            Err(format!("beam still energized in states {:?}", world.beam_states()))
        }
    })
}

/// GRN and MOR are in exactly these states.
pub fn states(ground: BeamState, orbital: BeamState) -> OracleFn {
    Box::new(move |world| {
        let actual = world.beam_states();
        if actual == (ground, orbital) {
            Ok(())
        } else {
            Err(format!("expected states {:?}, got {actual:?}", (ground, orbital)))
        }
    })
}

/// Each actuator is energized exactly when its node is Active.
pub fn actuators_match_states() -> OracleFn {
    Box::new(|world| {
        if world.actuators_match_states() {
            Ok(())
        } else {
            Err(format!(
                "actuators (GRN {}, MOR {}) disagree with states {:?}",
                world.ground_actuator().is_energized(),
                world.orbital_actuator().is_energized(),
                world.beam_states()
            ))
        }
    })
}

/// No node refused any message.
pub fn no_rejections() -> OracleFn {
    Box::new(|world| match world.rejections() {
        [] => Ok(()),
        rejections => Err(format!("unexpected rejections: {rejections:?}")),
    })
}

/// Combine multiple oracles into one.
pub fn all_of(oracles: Vec<OracleFn>) -> OracleFn {
    Box::new(move |world| {
        for oracle in oracles {
            oracle(world)?;
        }
        Ok(())
    })
}
