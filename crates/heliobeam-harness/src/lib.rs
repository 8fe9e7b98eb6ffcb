//! Deterministic simulation harness for Heliosphere beam authorization.
//!
//! This crate provides a Turmoil-compatible implementation of the
//! `Environment` trait, a recording beam actuator, and a scenario framework
//! that runs a GRN and a MOR against each other with every message passing
//! through the wire codec.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod actuator;
pub mod scenario;
pub mod sim_env;

pub use actuator::RecordingActuator;
pub use sim_env::SimEnv;
