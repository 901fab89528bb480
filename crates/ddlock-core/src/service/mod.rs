// Core services for object lock coordination

pub mod broadcast;
pub mod cluster;
pub mod member_event;
pub mod object_lock;
pub mod transport;

// Re-export commonly used types
pub use broadcast::{
    AckHandler, BroadcastConfig, BroadcastReport, BroadcastStatus, Broadcaster, CompletionPolicy,
    MemberCall, MemberOutcome, QueuedPush, RetryPolicy,
};
pub use cluster::MemberDirectory;
pub use member_event::{MemberChangeEvent, MemberChangeEventPublisher, MemberChangeType};
pub use object_lock::{LockStats, ObjectLockConfig, ObjectLockManager, ObjectLockService};
pub use transport::{LockUpdateCall, MemberTransport};
