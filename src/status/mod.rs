//! Per-target lifecycle status

pub mod models;
pub mod store;
