//! Member sync API models
//!
//! This module defines the lock-update messages pushed to cluster members and
//! the snapshot format used to export or bootstrap lock state.

pub mod model;

pub use model::*;
