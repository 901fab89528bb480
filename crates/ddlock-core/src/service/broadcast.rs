//! Fan-out of one update to a set of cluster members
//!
//! Every target gets its own task that retries transient failures with
//! exponential backoff. Acknowledgments are committed through the epoch token
//! as they arrive, so the registry converges even for acknowledgments that
//! land after the broadcast has already reported a timeout. Tasks stop on
//! their own once they reach a terminal outcome, exhaust their attempts, or
//! see the epoch change.
//!
//! Pushes to the same member are serialized through a per-member lane: a
//! push starts only once every push queued before it for that member has
//! reached a terminal outcome.

use std::{collections::BTreeMap, fmt, sync::Arc, time::Duration};

use dashmap::DashMap;
use ddlock_api::{Member, MemberCallError, MemberId, NodeState};
use ddlock_consistency::EpochToken;
use tokio::{
    sync::{mpsc, oneshot},
    time::Instant,
};
use tracing::{debug, error, info, warn};

use crate::model::Configuration;

use super::cluster::MemberDirectory;

/// Applies one update to one member
#[async_trait::async_trait]
pub trait MemberCall: Send + Sync {
    /// Short operation name for logs and metrics
    fn name(&self) -> &'static str;

    async fn call(&self, member: &Member) -> Result<(), MemberCallError>;
}

/// Registry-side effects of per-member outcomes.
///
/// Called while the broadcast's epoch is held, so implementations must not
/// block or re-enter the epoch guard.
pub trait AckHandler: Send + Sync {
    fn on_ack(&self, member_id: &MemberId);

    fn on_permanent_failure(&self, _member_id: &MemberId, _reason: &str) {}

    fn on_no_longer_relevant(&self, _member_id: &MemberId) {}
}

/// Retry policy for a single member
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: crate::model::DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(crate::model::DEFAULT_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(crate::model::DEFAULT_MAX_BACKOFF_MS),
            multiplier: crate::model::DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let delay = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::from_secs_f64(delay.min(self.max_backoff.as_secs_f64()))
    }
}

/// Configuration for the broadcaster
#[derive(Clone, Debug, PartialEq)]
pub struct BroadcastConfig {
    /// Total deadline of one broadcast
    pub deadline: Duration,
    /// Timeout of a single member call
    pub rpc_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_millis(crate::model::DEFAULT_FANOUT_DEADLINE_MS),
            rpc_timeout: Duration::from_millis(crate::model::DEFAULT_RPC_TIMEOUT_MS),
            retry: RetryPolicy::default(),
        }
    }
}

impl BroadcastConfig {
    /// Create a BroadcastConfig from application Configuration
    pub fn from_configuration(config: &Configuration) -> Self {
        Self {
            deadline: Duration::from_millis(config.object_lock_fanout_deadline_ms()),
            rpc_timeout: Duration::from_millis(config.object_lock_rpc_timeout_ms()),
            retry: RetryPolicy {
                max_attempts: config.object_lock_max_attempts(),
                initial_backoff: Duration::from_millis(config.object_lock_initial_backoff_ms()),
                max_backoff: Duration::from_millis(config.object_lock_max_backoff_ms()),
                multiplier: config.object_lock_backoff_multiplier(),
            },
        }
    }
}

/// When a broadcast counts as done
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CompletionPolicy {
    /// Every target must acknowledge or stop being relevant
    #[default]
    AllRequired,
    /// Report whatever was reached by the deadline, never a timeout
    BestEffort,
}

/// Terminal outcome for one member
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MemberOutcome {
    Acked { attempts: u32 },
    /// Decommissioned or removed from the directory
    NoLongerRelevant,
    PermanentFailure { reason: String },
    /// Retries exhausted on transient errors
    Unreachable { last_error: String },
    /// No outcome yet when the deadline passed
    TimedOut,
    /// The epoch changed before the outcome could be committed
    Abandoned,
}

impl MemberOutcome {
    /// Whether the member is settled for completion purposes
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            MemberOutcome::Acked { .. }
                | MemberOutcome::NoLongerRelevant
                | MemberOutcome::PermanentFailure { .. }
        )
    }
}

impl fmt::Display for MemberOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberOutcome::Acked { attempts } => write!(f, "ACKED({})", attempts),
            MemberOutcome::NoLongerRelevant => write!(f, "NO_LONGER_RELEVANT"),
            MemberOutcome::PermanentFailure { reason } => write!(f, "PERMANENT_FAILURE({})", reason),
            MemberOutcome::Unreachable { last_error } => write!(f, "UNREACHABLE({})", last_error),
            MemberOutcome::TimedOut => write!(f, "TIMED_OUT"),
            MemberOutcome::Abandoned => write!(f, "ABANDONED"),
        }
    }
}

/// Overall status of a broadcast under its completion policy
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BroadcastStatus {
    Completed,
    /// All other members settled, some rejected the update permanently
    PartialFailure,
    /// These members neither acknowledged nor settled
    TimedOut { pending: Vec<MemberId> },
    /// The epoch changed mid-broadcast
    Abandoned,
}

#[derive(Clone, Debug)]
pub struct BroadcastReport {
    pub status: BroadcastStatus,
    pub outcomes: BTreeMap<MemberId, MemberOutcome>,
    pub elapsed: Duration,
}

impl BroadcastReport {
    pub fn acknowledged(&self) -> Vec<MemberId> {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, MemberOutcome::Acked { .. }))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Members without a settled outcome
    pub fn pending(&self) -> Vec<MemberId> {
        self.outcomes
            .iter()
            .filter(|(_, o)| !o.is_settled())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn permanent_failures(&self) -> Vec<(MemberId, String)> {
        self.outcomes
            .iter()
            .filter_map(|(id, o)| match o {
                MemberOutcome::PermanentFailure { reason } => Some((id.clone(), reason.clone())),
                _ => None,
            })
            .collect()
    }
}

/// Per-member FIFO of pushes
#[derive(Clone, Debug, Default)]
pub struct PushLanes {
    tails: Arc<DashMap<MemberId, oneshot::Receiver<()>>>,
}

impl PushLanes {
    /// Queue a push to `member` behind the pushes already queued for it
    pub fn enqueue(&self, member: Member) -> QueuedPush {
        let (done, tail) = oneshot::channel();
        let after = self.tails.insert(member.id.clone(), tail);
        QueuedPush {
            member,
            after,
            done,
        }
    }
}

/// A slot in one member's lane.
///
/// Dropping it without running lets the next push to the member proceed.
#[derive(Debug)]
pub struct QueuedPush {
    member: Member,
    after: Option<oneshot::Receiver<()>>,
    done: oneshot::Sender<()>,
}

impl QueuedPush {
    pub fn member(&self) -> &Member {
        &self.member
    }
}

/// Sends updates to cluster members and gathers their outcomes
#[derive(Clone, Debug)]
pub struct Broadcaster {
    config: BroadcastConfig,
    directory: MemberDirectory,
    lanes: PushLanes,
}

impl Broadcaster {
    pub fn new(config: BroadcastConfig, directory: MemberDirectory) -> Self {
        Self {
            config,
            directory,
            lanes: PushLanes::default(),
        }
    }

    /// Reserve lane slots for a later `broadcast_queued`.
    ///
    /// Callers that mutate lock state for these members should enqueue under
    /// the same epoch commit, so members see pushes in commit order.
    pub fn enqueue(&self, members: impl IntoIterator<Item = Member>) -> Vec<QueuedPush> {
        members
            .into_iter()
            .map(|member| self.lanes.enqueue(member))
            .collect()
    }

    /// Deliver `call` to every target concurrently and wait for the policy to be satisfied.
    ///
    /// Returns at the deadline at the latest. Member tasks that are still
    /// retrying keep running afterwards and commit late acknowledgments.
    pub async fn broadcast(
        &self,
        targets: Vec<Member>,
        call: Arc<dyn MemberCall>,
        handler: Arc<dyn AckHandler>,
        token: EpochToken,
        policy: CompletionPolicy,
    ) -> BroadcastReport {
        let queued = self.enqueue(targets);
        self.broadcast_queued(queued, call, handler, token, policy)
            .await
    }

    /// Like `broadcast`, for slots reserved earlier with `enqueue`
    pub async fn broadcast_queued(
        &self,
        targets: Vec<QueuedPush>,
        call: Arc<dyn MemberCall>,
        handler: Arc<dyn AckHandler>,
        token: EpochToken,
        policy: CompletionPolicy,
    ) -> BroadcastReport {
        let started = Instant::now();
        let deadline = started + self.config.deadline;
        let name = call.name();
        let target_ids: Vec<MemberId> = targets.iter().map(|p| p.member.id.clone()).collect();

        let (tx, mut rx) = mpsc::unbounded_channel();
        for push in targets {
            let task = MemberTask {
                config: self.config.clone(),
                directory: self.directory.clone(),
                call: call.clone(),
                handler: handler.clone(),
                token: token.clone(),
            };
            let tx = tx.clone();
            tokio::spawn(async move {
                let member_id = push.member.id.clone();
                let outcome = task.run(push).await;
                // The receiver is gone once the broadcast has reported
                let _ = tx.send((member_id, outcome));
            });
        }
        drop(tx);

        let mut outcomes: BTreeMap<MemberId, MemberOutcome> = BTreeMap::new();
        let mut cancel = token.clone();
        let mut abandoned = false;

        while outcomes.len() < target_ids.len() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    abandoned = true;
                    break;
                }
                received = rx.recv() => match received {
                    Some((member_id, outcome)) => {
                        if outcome == MemberOutcome::Abandoned {
                            abandoned = true;
                        }
                        outcomes.insert(member_id, outcome);
                    }
                    None => break,
                },
                _ = tokio::time::sleep_until(deadline) => break,
            }
        }

        for member_id in &target_ids {
            outcomes
                .entry(member_id.clone())
                .or_insert(if abandoned {
                    MemberOutcome::Abandoned
                } else {
                    MemberOutcome::TimedOut
                });
        }

        let status = Self::resolve(&outcomes, abandoned, policy);
        let elapsed = started.elapsed();
        match &status {
            BroadcastStatus::Completed => {
                debug!(op = name, epoch = %token.epoch(), members = outcomes.len(), "Broadcast completed");
            }
            BroadcastStatus::PartialFailure => {
                warn!(op = name, epoch = %token.epoch(), "Broadcast completed with permanent member failures");
            }
            BroadcastStatus::TimedOut { pending } => {
                warn!(
                    op = name,
                    epoch = %token.epoch(),
                    pending = pending.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Broadcast did not reach every member"
                );
            }
            BroadcastStatus::Abandoned => {
                info!(op = name, epoch = %token.epoch(), "Broadcast abandoned after epoch change");
            }
        }

        BroadcastReport {
            status,
            outcomes,
            elapsed,
        }
    }

    fn resolve(
        outcomes: &BTreeMap<MemberId, MemberOutcome>,
        abandoned: bool,
        policy: CompletionPolicy,
    ) -> BroadcastStatus {
        if abandoned {
            return BroadcastStatus::Abandoned;
        }

        let pending: Vec<MemberId> = outcomes
            .iter()
            .filter(|(_, o)| !o.is_settled())
            .map(|(id, _)| id.clone())
            .collect();
        if policy == CompletionPolicy::AllRequired && !pending.is_empty() {
            return BroadcastStatus::TimedOut { pending };
        }

        if outcomes
            .values()
            .any(|o| matches!(o, MemberOutcome::PermanentFailure { .. }))
        {
            BroadcastStatus::PartialFailure
        } else {
            BroadcastStatus::Completed
        }
    }
}

/// Delivery of one broadcast to one member
struct MemberTask {
    config: BroadcastConfig,
    directory: MemberDirectory,
    call: Arc<dyn MemberCall>,
    handler: Arc<dyn AckHandler>,
    token: EpochToken,
}

impl MemberTask {
    async fn run(mut self, push: QueuedPush) -> MemberOutcome {
        let QueuedPush {
            mut member,
            after,
            done,
        } = push;
        let name = self.call.name();
        let waited = after.is_some();

        if let Some(mut earlier) = after {
            let cancelled = tokio::select! {
                _ = self.token.cancelled() => true,
                _ = &mut earlier => false,
            };
            if cancelled {
                // The lane stays closed until the earlier push settles
                tokio::spawn(async move {
                    let _ = earlier.await;
                    drop(done);
                });
                return MemberOutcome::Abandoned;
            }
        }
        let _done = done;

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;

            if attempt > 1 || waited {
                match self.directory.get_member(&member.id) {
                    Some(current) if current.state != NodeState::Decommissioned => member = current,
                    _ => return self.no_longer_relevant(&member.id),
                }
            }
            if !self.token.is_valid() {
                return MemberOutcome::Abandoned;
            }

            let result = tokio::time::timeout(self.config.rpc_timeout, self.call.call(&member))
                .await
                .unwrap_or(Err(MemberCallError::Timeout));

            let error = match result {
                Ok(()) => {
                    return match self.token.commit(|| self.handler.on_ack(&member.id)) {
                        Ok(()) => {
                            debug!(op = name, member = %member.id, attempts = attempt, "Member acknowledged");
                            MemberOutcome::Acked { attempts: attempt }
                        }
                        Err(_) => MemberOutcome::Abandoned,
                    };
                }
                Err(MemberCallError::Decommissioned) => {
                    return self.no_longer_relevant(&member.id);
                }
                Err(e) if !e.is_retryable() => {
                    let reason = e.to_string();
                    return match self
                        .token
                        .commit(|| self.handler.on_permanent_failure(&member.id, &reason))
                    {
                        Ok(()) => {
                            error!(op = name, member = %member.id, reason = %reason, "Member rejected update");
                            metrics::counter!("ddlock_member_permanent_failures_total", "op" => name)
                                .increment(1);
                            MemberOutcome::PermanentFailure { reason }
                        }
                        Err(_) => MemberOutcome::Abandoned,
                    };
                }
                Err(e) => e,
            };

            if attempt >= self.config.retry.max_attempts {
                warn!(
                    op = name,
                    member = %member.id,
                    attempts = attempt,
                    error = %error,
                    "Giving up on member after exhausting retries"
                );
                return MemberOutcome::Unreachable {
                    last_error: error.to_string(),
                };
            }

            let delay = self.config.retry.backoff(attempt);
            warn!(
                op = name,
                member = %member.id,
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Member call failed, retrying"
            );
            metrics::counter!("ddlock_broadcast_member_retries_total", "op" => name).increment(1);

            tokio::select! {
                _ = self.token.cancelled() => return MemberOutcome::Abandoned,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn no_longer_relevant(&self, member_id: &MemberId) -> MemberOutcome {
        match self
            .token
            .commit(|| self.handler.on_no_longer_relevant(member_id))
        {
            Ok(()) => {
                debug!(op = self.call.name(), member = %member_id, "Member no longer relevant");
                MemberOutcome::NoLongerRelevant
            }
            Err(_) => MemberOutcome::Abandoned,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(1000),
            multiplier: 2.0,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(4), Duration::from_millis(800));
        assert_eq!(policy.backoff(5), Duration::from_millis(1000));
        assert_eq!(policy.backoff(40), Duration::from_millis(1000));
    }

    #[test]
    fn test_config_from_configuration() {
        let config = config::Config::builder()
            .set_default("ddlock.object-lock.fanout-deadline", 3000)
            .unwrap()
            .set_default("ddlock.object-lock.max-attempts", 2)
            .unwrap()
            .build()
            .unwrap();
        let config = BroadcastConfig::from_configuration(&Configuration::from_config(config));

        assert_eq!(config.deadline, Duration::from_secs(3));
        assert_eq!(config.rpc_timeout, Duration::from_secs(2));
        assert_eq!(config.retry.max_attempts, 2);
    }

    #[test]
    fn test_resolve_policies() {
        let mut outcomes = BTreeMap::new();
        outcomes.insert(MemberId::new("a"), MemberOutcome::Acked { attempts: 1 });
        outcomes.insert(
            MemberId::new("b"),
            MemberOutcome::PermanentFailure {
                reason: "gone".to_string(),
            },
        );
        assert_eq!(
            Broadcaster::resolve(&outcomes, false, CompletionPolicy::AllRequired),
            BroadcastStatus::PartialFailure
        );

        outcomes.insert(MemberId::new("c"), MemberOutcome::TimedOut);
        assert_eq!(
            Broadcaster::resolve(&outcomes, false, CompletionPolicy::AllRequired),
            BroadcastStatus::TimedOut {
                pending: vec![MemberId::new("c")]
            }
        );
        assert_eq!(
            Broadcaster::resolve(&outcomes, false, CompletionPolicy::BestEffort),
            BroadcastStatus::PartialFailure
        );
        assert_eq!(
            Broadcaster::resolve(&outcomes, true, CompletionPolicy::BestEffort),
            BroadcastStatus::Abandoned
        );
    }

    #[test]
    fn test_empty_targets_complete() {
        let outcomes = BTreeMap::new();
        assert_eq!(
            Broadcaster::resolve(&outcomes, false, CompletionPolicy::AllRequired),
            BroadcastStatus::Completed
        );
    }

    proptest! {
        #[test]
        fn prop_backoff_is_monotonic_and_capped(
            initial_ms in 1u64..500,
            max_ms in 500u64..5000,
            multiplier in 1.0f64..4.0,
            attempt in 1u32..20,
        ) {
            let policy = RetryPolicy {
                max_attempts: 20,
                initial_backoff: Duration::from_millis(initial_ms),
                max_backoff: Duration::from_millis(max_ms),
                multiplier,
            };
            let current = policy.backoff(attempt);
            prop_assert!(current <= policy.max_backoff);
            prop_assert!(current <= policy.backoff(attempt + 1));
        }
    }
}
