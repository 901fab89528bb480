//! Object lock manager
//!
//! Leader-side facade over the lock registry: acquires reserve entries on
//! every live member and fan the grant out, releases mark entries releasing
//! and fan the release out, and both reply once the broadcast resolves.
//! Registry changes commit member by member as acknowledgments arrive.

use std::sync::{
    Arc, Weak,
    atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use serde::Serialize;
use tokio::{
    sync::{Mutex, broadcast::error::RecvError},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use ddlock_api::{
    AcquireObjectLockRequest, AcquireObjectLockResponse, DdlLockEntries, LeaderEpoch, LockEntry,
    LockUpdate, LockUpdateRequest, MemberFailure, MemberId, ObjectId, ObjectLockResponse,
    OwnerId, ReleaseObjectLockRequest, ReleaseObjectLockResponse, ResponseStatus,
};
use ddlock_common::{LockError, current_timestamp};
use ddlock_consistency::{EpochGuard, EpochToken, LockConflict, LockRegistry, MemberLockInfo};

use crate::model::Configuration;

use super::{
    broadcast::{
        AckHandler, BroadcastConfig, BroadcastReport, BroadcastStatus, Broadcaster,
        CompletionPolicy, QueuedPush,
    },
    cluster::MemberDirectory,
    member_event::MemberChangeEvent,
    transport::{LockUpdateCall, MemberTransport},
};

/// Object lock manager configuration
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectLockConfig {
    pub broadcast: BroadcastConfig,
    /// Push a full resync to members that join or come back up
    pub resync_on_join: bool,
}

impl Default for ObjectLockConfig {
    fn default() -> Self {
        Self {
            broadcast: BroadcastConfig::default(),
            resync_on_join: true,
        }
    }
}

impl ObjectLockConfig {
    pub fn from_configuration(config: &Configuration) -> Self {
        Self {
            broadcast: BroadcastConfig::from_configuration(config),
            resync_on_join: config.object_lock_resync_on_join(),
        }
    }
}

/// Object lock statistics
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockStats {
    /// Epoch currently held, if leader
    pub epoch: Option<LeaderEpoch>,
    /// Members with tracked lock state
    pub members: usize,
    /// Entries across all members, any state
    pub registry_entries: usize,
    pub total_acquisitions: u64,
    pub granted_acquisitions: u64,
    pub total_releases: u64,
    pub lock_conflicts: u64,
    pub epoch_rejections: u64,
    pub propagation_timeouts: u64,
    pub partial_failures: u64,
    pub member_resyncs: u64,
}

#[derive(Default)]
struct LockStatsCollector {
    total_acquisitions: AtomicU64,
    granted_acquisitions: AtomicU64,
    total_releases: AtomicU64,
    lock_conflicts: AtomicU64,
    epoch_rejections: AtomicU64,
    propagation_timeouts: AtomicU64,
    partial_failures: AtomicU64,
    member_resyncs: AtomicU64,
}

impl LockStatsCollector {
    fn record(&self, op: &'static str, status: ResponseStatus) {
        match op {
            "acquire" => {
                self.total_acquisitions.fetch_add(1, Ordering::Relaxed);
                if status.is_success() {
                    self.granted_acquisitions.fetch_add(1, Ordering::Relaxed);
                }
            }
            "release" => {
                self.total_releases.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                self.member_resyncs.fetch_add(1, Ordering::Relaxed);
            }
        }
        let counter = match status {
            ResponseStatus::LockConflict => &self.lock_conflicts,
            ResponseStatus::EpochStale => &self.epoch_rejections,
            ResponseStatus::PropagationTimeout => &self.propagation_timeouts,
            ResponseStatus::PartialFailure => &self.partial_failures,
            ResponseStatus::Ok | ResponseStatus::InvalidArgument => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Object lock service trait
#[async_trait]
pub trait ObjectLockService: Send + Sync {
    /// Acquire locks on objects for an owner on every live member
    async fn acquire_lock(
        &self,
        epoch: LeaderEpoch,
        request: AcquireObjectLockRequest,
    ) -> AcquireObjectLockResponse;

    /// Release an owner's locks on every member that holds them
    async fn release_lock(
        &self,
        epoch: LeaderEpoch,
        request: ReleaseObjectLockRequest,
    ) -> ReleaseObjectLockResponse;

    /// Point-in-time copy of the lock registry
    fn export_lock_info(&self) -> DdlLockEntries;

    /// Replace one member's lock state without broadcasting
    fn insert_or_assign(&self, member_id: MemberId, info: MemberLockInfo) -> bool;

    /// Drop all lock state
    fn clear(&self);

    fn get_stats(&self) -> LockStats;
}

/// Leader-side object lock manager
pub struct ObjectLockManager {
    config: ObjectLockConfig,
    guard: Arc<EpochGuard>,
    registry: Arc<LockRegistry>,
    directory: MemberDirectory,
    transport: Arc<dyn MemberTransport>,
    broadcaster: Broadcaster,
    stats: LockStatsCollector,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ObjectLockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectLockManager")
            .field("epoch", &self.guard.current())
            .field("members", &self.registry.member_count())
            .field("entries", &self.registry.total_entries())
            .finish()
    }
}

impl ObjectLockManager {
    pub fn new(
        config: ObjectLockConfig,
        directory: MemberDirectory,
        transport: Arc<dyn MemberTransport>,
    ) -> Self {
        let broadcaster = Broadcaster::new(config.broadcast.clone(), directory.clone());
        Self {
            config,
            guard: Arc::new(EpochGuard::new()),
            registry: Arc::new(LockRegistry::new()),
            directory,
            transport,
            broadcaster,
            stats: LockStatsCollector::default(),
            event_task: Mutex::new(None),
        }
    }

    pub fn from_configuration(
        config: &Configuration,
        directory: MemberDirectory,
        transport: Arc<dyn MemberTransport>,
    ) -> Self {
        Self::new(ObjectLockConfig::from_configuration(config), directory, transport)
    }

    pub fn registry(&self) -> &Arc<LockRegistry> {
        &self.registry
    }

    pub fn epoch_guard(&self) -> &Arc<EpochGuard> {
        &self.guard
    }

    pub fn directory(&self) -> &MemberDirectory {
        &self.directory
    }

    // ===================== Leadership =====================

    /// Install the epoch of a new leadership term
    pub fn become_leader(&self, epoch: LeaderEpoch) -> Result<(), LockError> {
        self.guard.become_leader(epoch)
    }

    /// Give up leadership and drop the lock state it was built under
    pub fn step_down(&self) -> Option<LeaderEpoch> {
        let previous = self.guard.step_down();
        self.clear();
        previous
    }

    /// Rehydrate the registry from an export; returns the members loaded
    pub fn load_snapshot(&self, snapshot: &DdlLockEntries) -> usize {
        for member in &snapshot.members {
            self.registry
                .insert_or_assign(MemberLockInfo::from_export(member));
        }
        self.update_gauge();
        info!(
            members = snapshot.members.len(),
            entries = snapshot.entry_count(),
            "Loaded object lock snapshot"
        );
        snapshot.members.len()
    }

    // ===================== Lock operations =====================

    pub async fn acquire_lock(
        &self,
        epoch: LeaderEpoch,
        request: AcquireObjectLockRequest,
    ) -> AcquireObjectLockResponse {
        let response = self
            .do_acquire(epoch, &request)
            .await
            .unwrap_or_else(|e| ObjectLockResponse::from_error(&e));
        self.record("acquire", &response);
        response
    }

    async fn do_acquire(
        &self,
        epoch: LeaderEpoch,
        request: &AcquireObjectLockRequest,
    ) -> Result<ObjectLockResponse, LockError> {
        request.validate()?;
        let token = self.guard.token(epoch)?;
        let entries = request.entries();

        let live = self.directory.live_members();
        let live_ids: Vec<MemberId> = live.iter().map(|m| m.id.clone()).collect();
        // Lane slots are taken in the same commit as the registry change
        let targets = token
            .commit(|| -> Result<Vec<QueuedPush>, LockConflict> {
                self.registry.reserve_all(&live_ids, &entries)?;
                Ok(self.broadcaster.enqueue(
                    live.into_iter()
                        .filter(|m| !self.registry.all_granted(&m.id, &entries)),
                ))
            })?
            .map_err(|conflict| {
                debug!(
                    owner = %request.owner,
                    object = %conflict.requested.object_id,
                    holder = %conflict.held.owner,
                    "Object lock request conflicts with a held lock"
                );
                LockError::from(conflict)
            })?;
        self.update_gauge();

        if targets.is_empty() {
            debug!(owner = %request.owner, "Object locks already granted on every live member");
            return Ok(ObjectLockResponse::ok());
        }

        let call = Arc::new(LockUpdateCall::new(
            self.transport.clone(),
            LockUpdateRequest::new(
                epoch,
                LockUpdate::Acquire {
                    entries: entries.clone(),
                },
            ),
        ));
        let handler = Arc::new(AcquireAckHandler {
            registry: self.registry.clone(),
            entries,
        });
        let report = self
            .broadcaster
            .broadcast_queued(targets, call, handler, token.clone(), CompletionPolicy::AllRequired)
            .await;

        let response = response_from_report(&report, &token);
        if response.is_success() {
            info!(
                owner = %request.owner,
                mode = %request.mode,
                objects = request.object_ids.len(),
                epoch = %epoch,
                "Granted object locks"
            );
        }
        Ok(response)
    }

    /// Releasing locks that are not held is a success
    pub async fn release_lock(
        &self,
        epoch: LeaderEpoch,
        request: ReleaseObjectLockRequest,
    ) -> ReleaseObjectLockResponse {
        let response = self
            .do_release(epoch, &request)
            .await
            .unwrap_or_else(|e| ObjectLockResponse::from_error(&e));
        self.record("release", &response);
        response
    }

    async fn do_release(
        &self,
        epoch: LeaderEpoch,
        request: &ReleaseObjectLockRequest,
    ) -> Result<ObjectLockResponse, LockError> {
        request.validate()?;
        let token = self.guard.token(epoch)?;

        let live = self.directory.live_members();
        let targets = token.commit(|| {
            self.registry
                .begin_release(&request.owner, &request.object_ids);
            let releasing = self
                .registry
                .releasing_members(&request.owner, &request.object_ids);
            // Queued behind any push still in flight to the same member
            self.broadcaster.enqueue(
                live.into_iter()
                    .filter(|m| releasing.binary_search(&m.id).is_ok()),
            )
        })?;
        if targets.is_empty() {
            debug!(owner = %request.owner, "No live member holds the released locks");
            return Ok(ObjectLockResponse::ok());
        }

        let call = Arc::new(LockUpdateCall::new(
            self.transport.clone(),
            LockUpdateRequest::new(
                epoch,
                LockUpdate::Release {
                    owner: request.owner.clone(),
                    object_ids: request.object_ids.clone(),
                },
            ),
        ));
        let handler = Arc::new(ReleaseAckHandler {
            registry: self.registry.clone(),
            owner: request.owner.clone(),
            object_ids: request.object_ids.clone(),
        });
        let report = self
            .broadcaster
            .broadcast_queued(targets, call, handler, token.clone(), CompletionPolicy::AllRequired)
            .await;

        let response = response_from_report(&report, &token);
        if response.is_success() {
            info!(
                owner = %request.owner,
                objects = request.object_ids.len(),
                epoch = %epoch,
                "Released object locks"
            );
        }
        Ok(response)
    }

    /// Push a member its full lock view, replacing whatever it holds
    pub async fn bootstrap_member(
        &self,
        epoch: LeaderEpoch,
        member_id: &MemberId,
    ) -> ObjectLockResponse {
        self.resync(epoch, member_id, CompletionPolicy::AllRequired)
            .await
    }

    async fn resync(
        &self,
        epoch: LeaderEpoch,
        member_id: &MemberId,
        policy: CompletionPolicy,
    ) -> ObjectLockResponse {
        let response = self
            .do_resync(epoch, member_id, policy)
            .await
            .unwrap_or_else(|e| ObjectLockResponse::from_error(&e));
        self.record("bootstrap", &response);
        response
    }

    async fn do_resync(
        &self,
        epoch: LeaderEpoch,
        member_id: &MemberId,
        policy: CompletionPolicy,
    ) -> Result<ObjectLockResponse, LockError> {
        let token = self.guard.token(epoch)?;
        let member = self
            .directory
            .get_member(member_id)
            .filter(|m| m.is_live())
            .ok_or_else(|| LockError::InvalidArgument(format!("member {} is not live", member_id)))?;

        let (entries, targets) = token.commit(|| {
            let entries = self.registry.lock_set();
            self.registry.prepare_bootstrap(member_id, &entries);
            (entries, self.broadcaster.enqueue([member]))
        })?;
        debug!(member = %member_id, entries = entries.len(), "Resyncing member lock view");

        let call = Arc::new(LockUpdateCall::new(
            self.transport.clone(),
            LockUpdateRequest::new(
                epoch,
                LockUpdate::Bootstrap {
                    entries: entries.clone(),
                },
            ),
        ));
        let handler = Arc::new(BootstrapAckHandler {
            registry: self.registry.clone(),
            sent: entries,
        });
        let report = self
            .broadcaster
            .broadcast_queued(targets, call, handler, token.clone(), policy)
            .await;
        Ok(response_from_report(&report, &token))
    }

    // ===================== State access =====================

    /// Point-in-time copy of the registry; no epoch check
    pub fn export_lock_info(&self) -> DdlLockEntries {
        DdlLockEntries {
            epoch: self.guard.current(),
            taken_at: current_timestamp(),
            members: self
                .registry
                .snapshot()
                .iter()
                .map(MemberLockInfo::to_export)
                .collect(),
        }
    }

    /// Replace a member's lock state with already-durable entries.
    ///
    /// Returns whether the member had state before.
    pub fn insert_or_assign(&self, member_id: MemberId, mut info: MemberLockInfo) -> bool {
        info.member_id = member_id;
        let existed = self.registry.insert_or_assign(info);
        self.update_gauge();
        existed
    }

    pub fn clear(&self) {
        self.registry.clear();
        self.update_gauge();
        info!("Cleared object lock registry");
    }

    pub fn get_stats(&self) -> LockStats {
        LockStats {
            epoch: self.guard.current(),
            members: self.registry.member_count(),
            registry_entries: self.registry.total_entries(),
            total_acquisitions: self.stats.total_acquisitions.load(Ordering::Relaxed),
            granted_acquisitions: self.stats.granted_acquisitions.load(Ordering::Relaxed),
            total_releases: self.stats.total_releases.load(Ordering::Relaxed),
            lock_conflicts: self.stats.lock_conflicts.load(Ordering::Relaxed),
            epoch_rejections: self.stats.epoch_rejections.load(Ordering::Relaxed),
            propagation_timeouts: self.stats.propagation_timeouts.load(Ordering::Relaxed),
            partial_failures: self.stats.partial_failures.load(Ordering::Relaxed),
            member_resyncs: self.stats.member_resyncs.load(Ordering::Relaxed),
        }
    }

    // ===================== Membership =====================

    /// Follow membership changes: forget departed members and resync returning ones
    pub async fn start(self: &Arc<Self>) {
        let mut task = self.event_task.lock().await;
        if task.is_some() {
            return;
        }

        let mut events = self.directory.subscribe_events();
        let manager: Weak<Self> = Arc::downgrade(self);
        *task = Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => match manager.upgrade() {
                        Some(manager) => manager.on_member_event(&event),
                        None => break,
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Object lock manager missed member change events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));
        info!("Object lock manager started");
    }

    pub async fn shutdown(&self) {
        if let Some(task) = self.event_task.lock().await.take() {
            task.abort();
        }
        info!("Object lock manager stopped");
    }

    fn on_member_event(self: &Arc<Self>, event: &MemberChangeEvent) {
        let member_id = event.member.id.clone();

        if event.is_departure() {
            if self.registry.remove_member(&member_id).is_some() {
                self.update_gauge();
                info!(member = %member_id, "Dropped lock state of departed member");
            }
            return;
        }

        if !self.config.resync_on_join || !event.needs_resync() {
            return;
        }
        let Some(epoch) = self.guard.current() else {
            return;
        };

        let manager = self.clone();
        tokio::spawn(async move {
            let response = manager
                .resync(epoch, &member_id, CompletionPolicy::BestEffort)
                .await;
            if !response.is_success() {
                warn!(
                    member = %member_id,
                    status = %response.status,
                    "Member lock resync did not complete"
                );
            }
        });
    }

    fn record(&self, op: &'static str, response: &ObjectLockResponse) {
        self.stats.record(op, response.status);
        metrics::counter!(
            "ddlock_lock_requests_total",
            "op" => op,
            "status" => response.status.as_str()
        )
        .increment(1);
        self.update_gauge();
    }

    fn update_gauge(&self) {
        metrics::gauge!("ddlock_registry_entries").set(self.registry.total_entries() as f64);
    }
}

#[async_trait]
impl ObjectLockService for ObjectLockManager {
    async fn acquire_lock(
        &self,
        epoch: LeaderEpoch,
        request: AcquireObjectLockRequest,
    ) -> AcquireObjectLockResponse {
        ObjectLockManager::acquire_lock(self, epoch, request).await
    }

    async fn release_lock(
        &self,
        epoch: LeaderEpoch,
        request: ReleaseObjectLockRequest,
    ) -> ReleaseObjectLockResponse {
        ObjectLockManager::release_lock(self, epoch, request).await
    }

    fn export_lock_info(&self) -> DdlLockEntries {
        ObjectLockManager::export_lock_info(self)
    }

    fn insert_or_assign(&self, member_id: MemberId, info: MemberLockInfo) -> bool {
        ObjectLockManager::insert_or_assign(self, member_id, info)
    }

    fn clear(&self) {
        ObjectLockManager::clear(self)
    }

    fn get_stats(&self) -> LockStats {
        ObjectLockManager::get_stats(self)
    }
}

/// Map a broadcast report to the caller-visible response
fn response_from_report(report: &BroadcastReport, token: &EpochToken) -> ObjectLockResponse {
    let failures: Vec<(MemberId, LockError)> = report
        .permanent_failures()
        .into_iter()
        .map(|(member_id, reason)| {
            let err = LockError::MemberPermanentFailure {
                member: member_id.to_string(),
                reason,
            };
            (member_id, err)
        })
        .collect();
    let member_failures: Vec<MemberFailure> = failures
        .iter()
        .map(|(member_id, err)| MemberFailure::from_error(member_id.clone(), err))
        .collect();

    match &report.status {
        BroadcastStatus::Completed => ObjectLockResponse {
            acknowledged: report.acknowledged(),
            ..ObjectLockResponse::ok()
        },
        BroadcastStatus::PartialFailure => match failures.first() {
            Some((_, first)) => ObjectLockResponse {
                message: Some(format!(
                    "{} of {} members rejected the update, first: {}",
                    member_failures.len(),
                    report.outcomes.len(),
                    first
                )),
                acknowledged: report.acknowledged(),
                member_failures,
                ..ObjectLockResponse::from_error(first)
            },
            None => ObjectLockResponse {
                acknowledged: report.acknowledged(),
                ..ObjectLockResponse::ok()
            },
        },
        BroadcastStatus::TimedOut { pending } => {
            let err = LockError::PropagationTimeout {
                pending: pending.iter().map(|m| m.to_string()).collect(),
            };
            ObjectLockResponse {
                acknowledged: report.acknowledged(),
                member_failures,
                ..ObjectLockResponse::from_error(&err)
            }
        }
        BroadcastStatus::Abandoned => ObjectLockResponse::from_error(&token.stale_error()),
    }
}

struct AcquireAckHandler {
    registry: Arc<LockRegistry>,
    entries: Vec<LockEntry>,
}

impl AckHandler for AcquireAckHandler {
    fn on_ack(&self, member_id: &MemberId) {
        self.registry.mark_granted(member_id, &self.entries);
    }

    fn on_permanent_failure(&self, member_id: &MemberId, _reason: &str) {
        self.registry.drop_pending(member_id, &self.entries);
    }

    fn on_no_longer_relevant(&self, member_id: &MemberId) {
        self.registry.remove_member(member_id);
    }
}

struct ReleaseAckHandler {
    registry: Arc<LockRegistry>,
    owner: OwnerId,
    object_ids: Vec<ObjectId>,
}

impl AckHandler for ReleaseAckHandler {
    fn on_ack(&self, member_id: &MemberId) {
        self.registry
            .complete_release(member_id, &self.owner, &self.object_ids);
    }

    fn on_no_longer_relevant(&self, member_id: &MemberId) {
        self.registry.remove_member(member_id);
    }
}

struct BootstrapAckHandler {
    registry: Arc<LockRegistry>,
    sent: Vec<LockEntry>,
}

impl AckHandler for BootstrapAckHandler {
    fn on_ack(&self, member_id: &MemberId) {
        if !self.registry.complete_bootstrap(member_id, &self.sent) {
            debug!(member = %member_id, "Dropping resync ack of a departed member");
        }
    }

    fn on_no_longer_relevant(&self, member_id: &MemberId) {
        self.registry.remove_member(member_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddlock_api::{EntryState, LockMode, Member, MemberBuilder, MemberCallError, NodeState};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingTransport {
        pushes: StdMutex<Vec<(MemberId, LockUpdateRequest)>>,
    }

    #[async_trait]
    impl MemberTransport for RecordingTransport {
        async fn push_lock_update(
            &self,
            member: &Member,
            request: &LockUpdateRequest,
        ) -> Result<(), MemberCallError> {
            self.pushes
                .lock()
                .unwrap()
                .push((member.id.clone(), request.clone()));
            Ok(())
        }
    }

    async fn setup(ids: &[&str]) -> (ObjectLockManager, Arc<RecordingTransport>) {
        let directory = MemberDirectory::default();
        for id in ids {
            directory.register(MemberBuilder::new(format!("{}:7100", id)).id(*id).build());
        }
        let transport = Arc::new(RecordingTransport::default());
        let manager = ObjectLockManager::new(ObjectLockConfig::default(), directory, transport.clone());
        manager.become_leader(LeaderEpoch::term(1)).unwrap();
        (manager, transport)
    }

    fn obj(id: u32) -> ObjectId {
        ObjectId::new(16384, id)
    }

    #[tokio::test]
    async fn test_acquire_grants_on_every_live_member() {
        let (manager, transport) = setup(&["ts-1", "ts-2"]).await;

        let response = manager
            .acquire_lock(
                LeaderEpoch::term(1),
                AcquireObjectLockRequest::new("s1", vec![obj(1)], LockMode::Exclusive),
            )
            .await;

        assert_eq!(response.status, ResponseStatus::Ok);
        assert_eq!(response.acknowledged.len(), 2);
        assert_eq!(transport.pushes.lock().unwrap().len(), 2);

        let entry = LockEntry::new(obj(1), LockMode::Exclusive, OwnerId::new("s1"));
        for id in ["ts-1", "ts-2"] {
            let info = manager.registry().get(&MemberId::new(id)).unwrap();
            assert_eq!(info.state_of(&entry), Some(EntryState::Granted));
        }
    }

    #[tokio::test]
    async fn test_reacquire_is_noop_without_pushes() {
        let (manager, transport) = setup(&["ts-1"]).await;
        let request = AcquireObjectLockRequest::new("s1", vec![obj(1)], LockMode::Shared);

        assert!(manager.acquire_lock(LeaderEpoch::term(1), request.clone()).await.is_success());
        let response = manager.acquire_lock(LeaderEpoch::term(1), request).await;

        assert_eq!(response.status, ResponseStatus::Ok);
        assert_eq!(transport.pushes.lock().unwrap().len(), 1);
        assert_eq!(manager.get_stats().granted_acquisitions, 2);
    }

    #[tokio::test]
    async fn test_invalid_request_rejected_before_epoch_check() {
        let (manager, _) = setup(&["ts-1"]).await;

        let response = manager
            .acquire_lock(
                LeaderEpoch::term(9),
                AcquireObjectLockRequest::new("s1", vec![], LockMode::Shared),
            )
            .await;
        assert_eq!(response.status, ResponseStatus::InvalidArgument);
    }

    #[tokio::test]
    async fn test_release_of_absent_lock_is_success() {
        let (manager, transport) = setup(&["ts-1"]).await;

        let response = manager
            .release_lock(
                LeaderEpoch::term(1),
                ReleaseObjectLockRequest::new("s1", vec![obj(1)]),
            )
            .await;

        assert_eq!(response.status, ResponseStatus::Ok);
        assert!(transport.pushes.lock().unwrap().is_empty());
        assert_eq!(manager.get_stats().total_releases, 1);
    }

    #[tokio::test]
    async fn test_step_down_clears_and_fences() {
        let (manager, _) = setup(&["ts-1"]).await;
        manager
            .acquire_lock(
                LeaderEpoch::term(1),
                AcquireObjectLockRequest::new("s1", vec![obj(1)], LockMode::Shared),
            )
            .await;

        assert_eq!(manager.step_down(), Some(LeaderEpoch::term(1)));
        assert!(!manager.epoch_guard().is_leader());
        assert!(manager.export_lock_info().is_empty());

        let response = manager
            .acquire_lock(
                LeaderEpoch::term(1),
                AcquireObjectLockRequest::new("s1", vec![obj(1)], LockMode::Shared),
            )
            .await;
        assert_eq!(response.status, ResponseStatus::EpochStale);
        assert_eq!(manager.registry().total_entries(), 0);
    }

    #[tokio::test]
    async fn test_bootstrap_requires_live_member() {
        let (manager, _) = setup(&["ts-1"]).await;
        manager.directory().register(
            MemberBuilder::new("ts-2:7100")
                .id("ts-2")
                .node_state(NodeState::Down)
                .build(),
        );

        let response = manager
            .bootstrap_member(LeaderEpoch::term(1), &MemberId::new("ts-2"))
            .await;
        assert_eq!(response.status, ResponseStatus::InvalidArgument);

        let response = manager
            .bootstrap_member(LeaderEpoch::term(1), &MemberId::new("ts-1"))
            .await;
        assert_eq!(response.status, ResponseStatus::Ok);
        assert_eq!(manager.get_stats().member_resyncs, 2);
    }

    #[tokio::test]
    async fn test_insert_or_assign_overrides_member_id() {
        let (manager, _) = setup(&[]).await;
        let entry = LockEntry::new(obj(1), LockMode::Shared, OwnerId::new("s1"));
        let info = MemberLockInfo::granted(MemberId::new("other"), vec![entry]);

        assert!(!manager.insert_or_assign(MemberId::new("ts-1"), info.clone()));
        assert!(manager.insert_or_assign(MemberId::new("ts-1"), info));

        let export = manager.export_lock_info();
        assert_eq!(export.members.len(), 1);
        assert_eq!(export.members[0].member_id, MemberId::new("ts-1"));
        assert_eq!(export.epoch, Some(LeaderEpoch::term(1)));
    }

    #[tokio::test]
    async fn test_stats_serialize_camel_case() {
        let (manager, _) = setup(&["ts-1"]).await;
        manager
            .acquire_lock(
                LeaderEpoch::term(1),
                AcquireObjectLockRequest::new("s1", vec![obj(1)], LockMode::Shared),
            )
            .await;

        let json = serde_json::to_value(manager.get_stats()).unwrap();
        assert_eq!(json["grantedAcquisitions"], 1);
        assert_eq!(json["registryEntries"], 1);
        assert_eq!(json["epoch"]["leaderTerm"], 1);
    }
}
