//! ddlock API - object lock wire models
//!
//! This crate provides:
//! - Cluster member models
//! - Object lock request/response models and leader epochs
//! - Member lock-update push messages and the export transfer format

pub mod lock;
pub mod model;
pub mod sync;

// Re-export commonly used types
pub use lock::*;
pub use model::*;
pub use sync::*;
