//! Scenario testing framework for deterministic simulation tests.
//!
//! A scenario wires one GRN to one MOR, runs the full authorization
//! handshake through the wire codec, drives heartbeats on a virtual clock
//! and finally hands the world to a mandatory oracle.

mod builder;
pub mod oracle;
mod world;

pub use builder::{RunnableScenario, Scenario};
pub use oracle::OracleFn;
pub use world::{Rejection, World};
