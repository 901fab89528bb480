//! ddlock Core - object lock coordination
//!
//! This crate provides:
//! - Configuration access
//! - The cluster member directory and membership events
//! - The member transport seam and the fan-out broadcaster
//! - The object lock manager facade

pub mod model;
pub mod service;

// Re-export cluster module
pub mod cluster {
    pub use crate::service::cluster::{ClusterHealthSummary, MemberDirectory};
}

// Re-export commonly used types
pub use model::Configuration;
pub use service::{
    Broadcaster, LockStats, MemberTransport, ObjectLockConfig, ObjectLockManager,
    ObjectLockService,
};
