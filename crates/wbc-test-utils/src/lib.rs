//! Shared test fixtures and utilities for the whole-body controller crates.
//!
//! Provides reference robot models, mock QP backends, and deterministic RNG
//! setup for objective sets.

pub mod mocks;
pub mod models;
pub mod rng;

// ---------------------------------------------------------------------------
// Re-exports for convenience
// ---------------------------------------------------------------------------

pub use mocks::{NonConvergingBackend, RecordingBackend};
pub use models::{biped, fixed_arm, single_foot_robot, standing_config, stance};
pub use rng::{random_jointspace_objective, seeded_rng};
