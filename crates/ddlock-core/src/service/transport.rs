// Member transport seam
// The network layer that delivers lock updates to members lives outside this crate

use std::sync::Arc;

use ddlock_api::{LockUpdateRequest, Member, MemberCallError};

use super::broadcast::MemberCall;

/// Delivers lock-update pushes to cluster members.
///
/// Implementations must make a push idempotent for the member: the same
/// request may arrive more than once when an earlier attempt timed out after
/// the member had already applied it.
#[async_trait::async_trait]
pub trait MemberTransport: Send + Sync {
    async fn push_lock_update(
        &self,
        member: &Member,
        request: &LockUpdateRequest,
    ) -> Result<(), MemberCallError>;
}

/// One lock update pushed to every member of a broadcast
pub struct LockUpdateCall {
    transport: Arc<dyn MemberTransport>,
    request: LockUpdateRequest,
}

impl LockUpdateCall {
    pub fn new(transport: Arc<dyn MemberTransport>, request: LockUpdateRequest) -> Self {
        Self { transport, request }
    }
}

#[async_trait::async_trait]
impl MemberCall for LockUpdateCall {
    fn name(&self) -> &'static str {
        self.request.update.kind()
    }

    async fn call(&self, member: &Member) -> Result<(), MemberCallError> {
        self.transport.push_lock_update(member, &self.request).await
    }
}
