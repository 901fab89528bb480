// Cluster member directory
// Tracks the members that receive lock updates and publishes membership changes

use std::{collections::HashSet, sync::Arc};

use dashmap::DashMap;
use tracing::info;

use ddlock_api::{Member, MemberId, NodeState};

use crate::model::Configuration;

use super::member_event::{MemberChangeEvent, MemberChangeEventPublisher};

/// Directory of cluster members known to the lock leader
#[derive(Clone)]
pub struct MemberDirectory {
    members: Arc<DashMap<MemberId, Member>>,
    event_publisher: Arc<MemberChangeEventPublisher>,
}

impl std::fmt::Debug for MemberDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemberDirectory")
            .field("member_count", &self.members.len())
            .finish()
    }
}

impl Default for MemberDirectory {
    fn default() -> Self {
        Self::with_queue_size(crate::model::DEFAULT_EVENT_QUEUE_SIZE)
    }
}

impl MemberDirectory {
    pub fn new(config: &Configuration) -> Self {
        Self::with_queue_size(config.member_event_queue_size())
    }

    pub fn with_queue_size(event_queue_size: usize) -> Self {
        Self {
            members: Arc::new(DashMap::new()),
            event_publisher: Arc::new(MemberChangeEventPublisher::new(event_queue_size)),
        }
    }

    /// Add a member, or replace the record of a known one.
    ///
    /// A replaced record publishes a state change if the state differs.
    pub fn register(&self, member: Member) {
        let previous = self.members.insert(member.id.clone(), member.clone());
        match previous {
            None => {
                info!(member = %member.id, address = %member.address, state = %member.state, "Adding cluster member");
                self.event_publisher
                    .publish(MemberChangeEvent::member_join(member));
            }
            Some(previous) if previous.state != member.state => {
                info!(member = %member.id, from = %previous.state, to = %member.state, "Cluster member state changed");
                self.event_publisher
                    .publish(MemberChangeEvent::member_state_change(
                        member,
                        previous.state,
                    ));
            }
            Some(_) => {}
        }
    }

    /// Reconcile the directory with a full member list.
    ///
    /// Members absent from `members` are removed and publish a leave event.
    pub fn sync_members(&self, members: Vec<Member>) {
        let new_ids: HashSet<MemberId> = members.iter().map(|m| m.id.clone()).collect();

        for member in members {
            self.register(member);
        }

        let stale: Vec<MemberId> = self
            .members
            .iter()
            .filter(|e| !new_ids.contains(e.key()))
            .map(|e| e.key().clone())
            .collect();
        for id in stale {
            self.remove(&id);
        }
    }

    /// Forget a member; returns its last record
    pub fn remove(&self, member_id: &MemberId) -> Option<Member> {
        let (_, member) = self.members.remove(member_id)?;
        info!(member = %member_id, "Removing cluster member");
        self.event_publisher
            .publish(MemberChangeEvent::member_leave(member.clone()));
        Some(member)
    }

    /// Update a member's state; returns false for unknown members
    pub fn update_member_state(&self, member_id: &MemberId, state: NodeState) -> bool {
        let changed = match self.members.get_mut(member_id) {
            Some(mut member) => {
                let previous_state = member.state;
                member.state = state;
                (previous_state != state).then(|| (member.clone(), previous_state))
            }
            None => return false,
        };

        if let Some((member, previous_state)) = changed {
            info!(member = %member_id, from = %previous_state, to = %state, "Cluster member state changed");
            self.event_publisher
                .publish(MemberChangeEvent::member_state_change(
                    member,
                    previous_state,
                ));
        }
        true
    }

    /// Mark a member permanently out of the cluster
    pub fn decommission(&self, member_id: &MemberId) -> bool {
        self.update_member_state(member_id, NodeState::Decommissioned)
    }

    pub fn get_member(&self, member_id: &MemberId) -> Option<Member> {
        self.members.get(member_id).map(|m| m.clone())
    }

    /// All members, ordered by id
    pub fn all_members(&self) -> Vec<Member> {
        let mut members: Vec<Member> = self.members.iter().map(|e| e.value().clone()).collect();
        members.sort_by(|a, b| a.id.cmp(&b.id));
        members
    }

    /// Members that must receive lock updates, ordered by id
    pub fn live_members(&self) -> Vec<Member> {
        let mut members: Vec<Member> = self
            .members
            .iter()
            .filter(|e| e.value().is_live())
            .map(|e| e.value().clone())
            .collect();
        members.sort_by(|a, b| a.id.cmp(&b.id));
        members
    }

    /// Whether a member still needs lock updates (known and not decommissioned)
    pub fn is_relevant(&self, member_id: &MemberId) -> bool {
        self.members
            .get(member_id)
            .is_some_and(|m| m.state != NodeState::Decommissioned)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<MemberChangeEvent> {
        self.event_publisher.subscribe()
    }

    pub fn health_summary(&self) -> ClusterHealthSummary {
        let mut summary = ClusterHealthSummary::default();

        for member in self.members.iter() {
            summary.total += 1;
            match member.value().state {
                NodeState::Up => summary.up += 1,
                NodeState::Down => summary.down += 1,
                NodeState::Suspicious => summary.suspicious += 1,
                NodeState::Starting => summary.starting += 1,
                NodeState::Isolation => summary.isolation += 1,
                NodeState::Decommissioned => summary.decommissioned += 1,
            }
        }

        summary
    }
}

/// Cluster health summary
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClusterHealthSummary {
    pub total: usize,
    pub up: usize,
    pub down: usize,
    pub suspicious: usize,
    pub starting: usize,
    pub isolation: usize,
    pub decommissioned: usize,
}

impl ClusterHealthSummary {
    /// Members that lock updates fan out to
    pub fn live(&self) -> usize {
        self.up + self.suspicious + self.starting
    }
}
