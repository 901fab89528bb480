//! Lock registry: the leader's view of every member's lock entries
//!
//! Synchronization is per member (a `DashMap` shard lock held only for the
//! duration of one member's mutation), so acquire and release paths for
//! different members never serialize behind each other. `clear` is the only
//! whole-map operation and runs on leadership loss.

use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use ddlock_api::{LockEntry, MemberId, ObjectId, OwnerId};
use tracing::debug;

use super::model::{LockConflict, MemberLockInfo, MemberReservation};

/// Reservations made by one acquire across its target members
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationSet {
    pub members: Vec<(MemberId, MemberReservation)>,
}

impl ReservationSet {
    pub fn is_noop(&self) -> bool {
        self.members.iter().all(|(_, r)| r.is_noop())
    }
}

/// Per-member map of held and pending lock entries
#[derive(Default)]
pub struct LockRegistry {
    members: DashMap<MemberId, MemberLockInfo>,
    total_entries: AtomicUsize,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` on a member's info, creating it on first use, and keep the
    /// entry count in step.
    fn with_member<R>(&self, member_id: &MemberId, f: impl FnOnce(&mut MemberLockInfo) -> R) -> R {
        let mut info = self
            .members
            .entry(member_id.clone())
            .or_insert_with(|| MemberLockInfo::new(member_id.clone()));
        let before = info.len();
        let result = f(&mut info);
        let after = info.len();
        drop(info);
        self.adjust_total(before, after);
        result
    }

    /// Like `with_member` but does nothing for unknown members
    fn with_existing_member<R>(
        &self,
        member_id: &MemberId,
        f: impl FnOnce(&mut MemberLockInfo) -> R,
    ) -> Option<R> {
        let mut info = self.members.get_mut(member_id)?;
        let before = info.len();
        let result = f(&mut info);
        let after = info.len();
        drop(info);
        self.adjust_total(before, after);
        Some(result)
    }

    fn adjust_total(&self, before: usize, after: usize) {
        if after > before {
            self.total_entries.fetch_add(after - before, Ordering::Relaxed);
        } else if before > after {
            self.total_entries.fetch_sub(before - after, Ordering::Relaxed);
        }
    }

    /// Merge already-acknowledged entries into a member's view
    pub fn upsert(&self, member_id: &MemberId, entries: &[LockEntry]) {
        self.with_member(member_id, |info| info.upsert_granted(entries));
    }

    /// Delete every entry on `object_ids` held at a member
    pub fn remove(&self, member_id: &MemberId, object_ids: &[ObjectId]) -> usize {
        self.with_existing_member(member_id, |info| info.remove_objects(object_ids))
            .unwrap_or(0)
    }

    /// Replace a member's info wholesale; returns whether one existed before
    pub fn insert_or_assign(&self, info: MemberLockInfo) -> bool {
        let added = info.len();
        let previous = self.members.insert(info.member_id.clone(), info);
        let removed = previous.as_ref().map_or(0, |p| p.len());
        self.adjust_total(removed, added);
        previous.is_some()
    }

    /// Forget a member entirely (decommissioned or removed from the cluster)
    pub fn remove_member(&self, member_id: &MemberId) -> Option<MemberLockInfo> {
        let removed = self.members.remove(member_id).map(|(_, info)| info);
        if let Some(info) = &removed {
            self.adjust_total(info.len(), 0);
        }
        removed
    }

    /// Reserve `entries` as pending on every member, all or nothing.
    ///
    /// Members are visited in id order so that two racing acquires on the same
    /// object meet at the same first member; the loser fails fast with a
    /// conflict and its reservations on earlier members are rolled back.
    pub fn reserve_all(
        &self,
        member_ids: &[MemberId],
        entries: &[LockEntry],
    ) -> Result<ReservationSet, LockConflict> {
        let mut ordered: Vec<&MemberId> = member_ids.iter().collect();
        ordered.sort();
        ordered.dedup();

        let mut reserved = ReservationSet::default();
        for member_id in ordered {
            match self.with_member(member_id, |info| info.reserve(entries)) {
                Ok(reservation) => reserved.members.push((member_id.clone(), reservation)),
                Err(conflict) => {
                    debug!(
                        member = %member_id,
                        object = %conflict.requested.object_id,
                        holder = %conflict.held.owner,
                        "Reservation conflict, rolling back"
                    );
                    self.rollback(&reserved);
                    return Err(conflict);
                }
            }
        }
        Ok(reserved)
    }

    pub fn rollback(&self, reserved: &ReservationSet) {
        for (member_id, reservation) in &reserved.members {
            if !reservation.is_noop() {
                self.with_existing_member(member_id, |info| info.rollback(reservation));
            }
        }
    }

    pub fn mark_granted(&self, member_id: &MemberId, entries: &[LockEntry]) -> usize {
        self.with_existing_member(member_id, |info| info.mark_granted(entries))
            .unwrap_or(0)
    }

    /// Whether the member already holds every entry as granted
    pub fn all_granted(&self, member_id: &MemberId, entries: &[LockEntry]) -> bool {
        self.members
            .get(member_id)
            .is_some_and(|info| info.all_granted(entries))
    }

    pub fn drop_pending(&self, member_id: &MemberId, entries: &[LockEntry]) -> usize {
        self.with_existing_member(member_id, |info| info.drop_pending(entries))
            .unwrap_or(0)
    }

    /// Mark the owner's entries releasing on every known member
    pub fn begin_release(&self, owner: &OwnerId, object_ids: &[ObjectId]) -> usize {
        let mut marked = 0;
        for mut info in self.members.iter_mut() {
            marked += info.begin_release(owner, object_ids).len();
        }
        marked
    }

    /// Members that still owe an acknowledgment for the owner's release
    pub fn releasing_members(&self, owner: &OwnerId, object_ids: &[ObjectId]) -> Vec<MemberId> {
        let mut ids: Vec<MemberId> = self
            .members
            .iter()
            .filter(|info| info.has_releasing(owner, object_ids))
            .map(|info| info.member_id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn complete_release(
        &self,
        member_id: &MemberId,
        owner: &OwnerId,
        object_ids: &[ObjectId],
    ) -> usize {
        self.with_existing_member(member_id, |info| info.complete_release(owner, object_ids))
            .unwrap_or(0)
    }

    /// Every entry held or being acquired on any member, deduplicated.
    ///
    /// This is the view a member should hold after a full resync.
    pub fn lock_set(&self) -> Vec<LockEntry> {
        let mut entries: Vec<LockEntry> = self
            .members
            .iter()
            .flat_map(|info| info.held_entries())
            .collect();
        entries.sort();
        entries.dedup();
        entries
    }

    pub fn prepare_bootstrap(&self, member_id: &MemberId, entries: &[LockEntry]) {
        self.with_member(member_id, |info| info.prepare_bootstrap(entries));
    }

    /// Settle a member's acknowledged resync; returns false if the member
    /// was forgotten while the resync was in flight
    pub fn complete_bootstrap(&self, member_id: &MemberId, sent: &[LockEntry]) -> bool {
        self.with_existing_member(member_id, |info| info.complete_bootstrap(sent))
            .is_some()
    }

    /// Point-in-time copy of one member's info
    pub fn get(&self, member_id: &MemberId) -> Option<MemberLockInfo> {
        self.members.get(member_id).map(|info| info.clone())
    }

    /// Point-in-time copy of every member's info, ordered by member id.
    ///
    /// Each member's copy is taken under that member's lock.
    pub fn snapshot(&self) -> Vec<MemberLockInfo> {
        let mut infos: Vec<MemberLockInfo> =
            self.members.iter().map(|info| info.value().clone()).collect();
        infos.sort_by(|a, b| a.member_id.cmp(&b.member_id));
        infos
    }

    /// Drop all state
    pub fn clear(&self) {
        self.members.clear();
        self.total_entries.store(0, Ordering::Relaxed);
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn total_entries(&self) -> usize {
        self.total_entries.load(Ordering::Relaxed)
    }
}
