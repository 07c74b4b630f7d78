//! Configuration & Policy
//!
//! Error types, launcher configuration and the enabled-policy set.

pub mod launcher;
pub mod policy;
pub mod types;
