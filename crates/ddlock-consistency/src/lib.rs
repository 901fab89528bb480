//! ddlock Consistency - leader-side lock state and epoch fencing
//!
//! This crate provides:
//! - The lock registry (per-member lock bookkeeping)
//! - Leader epoch fencing and cancellation tokens

pub mod epoch;
pub mod lock;

// Re-export commonly used types
pub use epoch::{EpochGuard, EpochToken};
pub use lock::{LockConflict, LockRegistry, MemberLockInfo, MemberReservation, ReservationSet};
