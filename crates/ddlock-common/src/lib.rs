//! ddlock Common - Shared error types and utilities
//!
//! This crate provides the foundational types used across all ddlock components:
//! - The lock error taxonomy and its stable error codes
//! - Identifier validation
//! - Timestamp helpers

pub mod error;
pub mod utils;

// Re-exports for convenience
pub use error::{ErrorCode, LockError};
pub use utils::{current_timestamp, is_valid_identifier};
