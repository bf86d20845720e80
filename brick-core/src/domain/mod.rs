//! Core domain types
//!
//! This module contains the core domain structures used across Brick crates.
//! Targets and steps are produced by the descriptor loader and consumed by
//! the engine; run types describe what the engine did with them.

pub mod log;
pub mod run;
pub mod target;
