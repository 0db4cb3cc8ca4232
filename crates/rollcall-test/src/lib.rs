//! Rollcall Test Harness - Simulation and convergence testing
//!
//! This crate provides:
//! - Chaotic change-event delivery (reorder, duplicate, drop)
//! - Synchronous roster simulation producing authoritative change logs
//! - Simulated clients wired to a live engine

pub mod chaos;
pub mod simulator;
pub mod integration;

pub use chaos::*;
pub use simulator::*;
pub use integration::*;
