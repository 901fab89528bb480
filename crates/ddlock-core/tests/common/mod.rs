//! Common test utilities for object lock integration testing
//!
//! This module provides shared test infrastructure including:
//! - ScriptedTransport: an in-memory member transport with per-member failure scripts
//! - TestCluster: a leader-side manager wired to a member directory and the transport

#![allow(dead_code)]

use std::{
    collections::{BTreeSet, HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use ddlock_api::{
    LeaderEpoch, LockEntry, LockMode, LockUpdate, LockUpdateRequest, Member, MemberBuilder,
    MemberCallError, MemberId, ObjectId, OwnerId,
};
use ddlock_core::{
    MemberTransport, ObjectLockConfig, ObjectLockManager,
    cluster::MemberDirectory,
    service::{BroadcastConfig, RetryPolicy},
};

/// Epoch installed by `TestCluster::start`
pub const EPOCH: LeaderEpoch = LeaderEpoch {
    leader_term: 1,
    pitr_count: 0,
};

/// Install a test log subscriber once; honours RUST_LOG
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// How a member answers one push
#[derive(Clone, Debug)]
pub enum Behavior {
    Ack,
    Fail(MemberCallError),
    /// Apply and acknowledge after a delay
    Delay(Duration),
    /// Never answer
    Hang,
}

/// In-memory transport; members apply updates they acknowledge
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<MemberId, VecDeque<Behavior>>>,
    defaults: Mutex<HashMap<MemberId, Behavior>>,
    pushes: Mutex<Vec<(MemberId, LockUpdateRequest)>>,
    views: Mutex<HashMap<MemberId, BTreeSet<LockEntry>>>,
}

impl ScriptedTransport {
    /// Behaviors used, in order, before falling back to the default
    pub fn script(&self, member: &str, behaviors: Vec<Behavior>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(MemberId::new(member), behaviors.into());
    }

    /// Behavior once the script is exhausted (acknowledge when unset)
    pub fn set_default(&self, member: &str, behavior: Behavior) {
        self.defaults
            .lock()
            .unwrap()
            .insert(MemberId::new(member), behavior);
    }

    pub fn push_count(&self, member: &str) -> usize {
        let id = MemberId::new(member);
        self.pushes
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| *m == id)
            .count()
    }

    pub fn total_pushes(&self) -> usize {
        self.pushes.lock().unwrap().len()
    }

    pub fn last_push(&self, member: &str) -> Option<LockUpdateRequest> {
        let id = MemberId::new(member);
        self.pushes
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(m, _)| *m == id)
            .map(|(_, r)| r.clone())
    }

    /// Entries the member currently applies
    pub fn view(&self, member: &str) -> BTreeSet<LockEntry> {
        self.views
            .lock()
            .unwrap()
            .get(&MemberId::new(member))
            .cloned()
            .unwrap_or_default()
    }

    fn next_behavior(&self, member: &MemberId) -> Behavior {
        if let Some(next) = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(member)
            .and_then(|s| s.pop_front())
        {
            return next;
        }
        self.defaults
            .lock()
            .unwrap()
            .get(member)
            .cloned()
            .unwrap_or(Behavior::Ack)
    }

    fn apply(&self, member: &MemberId, update: &LockUpdate) {
        let mut views = self.views.lock().unwrap();
        let view = views.entry(member.clone()).or_default();
        match update {
            LockUpdate::Acquire { entries } => view.extend(entries.iter().cloned()),
            LockUpdate::Release { owner, object_ids } => view.retain(|e| {
                !(&e.owner == owner
                    && (object_ids.is_empty() || object_ids.contains(&e.object_id)))
            }),
            LockUpdate::Bootstrap { entries } => *view = entries.iter().cloned().collect(),
        }
    }
}

#[async_trait]
impl MemberTransport for ScriptedTransport {
    async fn push_lock_update(
        &self,
        member: &Member,
        request: &LockUpdateRequest,
    ) -> Result<(), MemberCallError> {
        self.pushes
            .lock()
            .unwrap()
            .push((member.id.clone(), request.clone()));

        match self.next_behavior(&member.id) {
            Behavior::Ack => {
                self.apply(&member.id, &request.update);
                Ok(())
            }
            Behavior::Fail(err) => Err(err),
            Behavior::Delay(delay) => {
                tokio::time::sleep(delay).await;
                self.apply(&member.id, &request.update);
                Ok(())
            }
            Behavior::Hang => std::future::pending().await,
        }
    }
}

/// Short timings so paused-clock tests stay readable
pub fn fast_config() -> ObjectLockConfig {
    ObjectLockConfig {
        broadcast: BroadcastConfig {
            deadline: Duration::from_secs(1),
            rpc_timeout: Duration::from_millis(100),
            retry: RetryPolicy {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(10),
                max_backoff: Duration::from_millis(50),
                multiplier: 2.0,
            },
        },
        resync_on_join: true,
    }
}

pub struct TestCluster {
    pub manager: Arc<ObjectLockManager>,
    pub directory: MemberDirectory,
    pub transport: Arc<ScriptedTransport>,
}

impl TestCluster {
    /// Leader at `EPOCH` with every member up
    pub async fn start(members: &[&str], config: ObjectLockConfig) -> Self {
        init_tracing();
        let directory = MemberDirectory::default();
        for id in members {
            directory.register(member(id));
        }
        let transport = Arc::new(ScriptedTransport::default());
        let manager = Arc::new(ObjectLockManager::new(
            config,
            directory.clone(),
            transport.clone(),
        ));
        manager
            .become_leader(EPOCH)
            .expect("fresh manager accepts its first epoch");
        Self {
            manager,
            directory,
            transport,
        }
    }
}

pub fn member(id: &str) -> Member {
    MemberBuilder::new(format!("{}:7100", id)).id(id).build()
}

pub fn obj(id: u32) -> ObjectId {
    ObjectId::new(16384, id)
}

pub fn entry(object: u32, mode: LockMode, owner: &str) -> LockEntry {
    LockEntry::new(obj(object), mode, OwnerId::new(owner))
}

pub fn ids(members: &[&str]) -> Vec<MemberId> {
    members.iter().map(|m| MemberId::new(*m)).collect()
}
