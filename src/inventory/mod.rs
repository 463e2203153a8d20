//! Environment inventory: targets and their shared configuration
//!
//! The controller core treats targets as read-only; this module owns loading
//! the operator-authored environment file and rendering the CM-engine hosts
//! inventory from it.

pub mod generator;
pub mod loader;
pub mod models;
