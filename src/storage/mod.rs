//! On-disk state for the controller

pub mod layout;
