//! Object lock bookkeeping
//!
//! This module provides:
//! - Per-member lock info with pending/granted/releasing entry states
//! - The registry mapping every member to its lock info

mod model;
mod registry;

pub use model::*;
pub use registry::*;
