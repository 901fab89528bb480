//! Object lock API models
//!
//! This module defines lock modes, lock entries, leader epochs, and the
//! acquire/release request and response models.

pub mod model;

pub use model::*;
