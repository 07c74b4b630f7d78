//! Execution control
//!
//! Drives the restricted launcher lifecycle with type-state enforcement.

pub mod launcher;

pub use launcher::{LaunchStatus, Launcher};
