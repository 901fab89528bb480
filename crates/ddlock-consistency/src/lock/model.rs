//! Per-member lock bookkeeping

use std::collections::BTreeMap;

use ddlock_api::{
    EntryState, ExportedLockEntry, LockEntry, MemberId, MemberLockEntries, ObjectId, OwnerId,
};
use ddlock_common::{LockError, current_timestamp};

/// A reservation refused because another owner holds a conflicting entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockConflict {
    pub member_id: MemberId,
    pub requested: LockEntry,
    pub held: LockEntry,
    pub held_state: EntryState,
}

impl From<LockConflict> for LockError {
    fn from(conflict: LockConflict) -> Self {
        LockError::LockConflict {
            object: conflict.requested.object_id.to_string(),
            holder: conflict.held.owner.to_string(),
            held_mode: conflict.held.mode.to_string(),
            member: conflict.member_id.to_string(),
        }
    }
}

/// Entries changed by a successful reservation on one member
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberReservation {
    /// Entries that did not exist before
    pub inserted: Vec<LockEntry>,
    /// Entries that were releasing and are pending again
    pub reactivated: Vec<LockEntry>,
}

impl MemberReservation {
    pub fn is_noop(&self) -> bool {
        self.inserted.is_empty() && self.reactivated.is_empty()
    }
}

/// Lock entries of one cluster member as known to the leader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberLockInfo {
    pub member_id: MemberId,
    entries: BTreeMap<LockEntry, EntryState>,
    /// Incremented on each change
    pub version: u64,
    /// Last update timestamp (Unix millis)
    pub updated_at: i64,
}

impl MemberLockInfo {
    pub fn new(member_id: MemberId) -> Self {
        Self {
            member_id,
            entries: BTreeMap::new(),
            version: 0,
            updated_at: current_timestamp(),
        }
    }

    /// Build from already-durable entries, e.g. a persisted catalog record
    pub fn with_entries(
        member_id: MemberId,
        entries: impl IntoIterator<Item = (LockEntry, EntryState)>,
    ) -> Self {
        let mut info = Self::new(member_id);
        info.entries.extend(entries);
        info
    }

    /// Build granted entries from already-durable locks
    pub fn granted(member_id: MemberId, entries: impl IntoIterator<Item = LockEntry>) -> Self {
        Self::with_entries(
            member_id,
            entries.into_iter().map(|e| (e, EntryState::Granted)),
        )
    }

    pub fn from_export(exported: &MemberLockEntries) -> Self {
        Self::with_entries(
            exported.member_id.clone(),
            exported
                .entries
                .iter()
                .map(|e| (e.entry.clone(), e.state)),
        )
    }

    pub fn to_export(&self) -> MemberLockEntries {
        MemberLockEntries {
            member_id: self.member_id.clone(),
            entries: self
                .entries
                .iter()
                .map(|(entry, state)| ExportedLockEntry {
                    entry: entry.clone(),
                    state: *state,
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn state_of(&self, entry: &LockEntry) -> Option<EntryState> {
        self.entries.get(entry).copied()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&LockEntry, EntryState)> {
        self.entries.iter().map(|(e, s)| (e, *s))
    }

    /// First entry that would block `requested`, in any state
    pub fn find_conflict(&self, requested: &LockEntry) -> Option<(&LockEntry, EntryState)> {
        self.entries
            .iter()
            .find(|(held, _)| held.conflicts_with(requested))
            .map(|(e, s)| (e, *s))
    }

    /// Reserve `requested` as pending, all or nothing.
    ///
    /// Entries already pending or granted for the same owner and mode are left
    /// untouched; releasing ones become pending again.
    pub fn reserve(&mut self, requested: &[LockEntry]) -> Result<MemberReservation, LockConflict> {
        for entry in requested {
            if let Some((held, held_state)) = self.find_conflict(entry) {
                return Err(LockConflict {
                    member_id: self.member_id.clone(),
                    requested: entry.clone(),
                    held: held.clone(),
                    held_state,
                });
            }
        }

        let mut reservation = MemberReservation::default();
        for entry in requested {
            match self.entries.get_mut(entry) {
                None => {
                    self.entries.insert(entry.clone(), EntryState::Pending);
                    reservation.inserted.push(entry.clone());
                }
                Some(state) if *state == EntryState::Releasing => {
                    *state = EntryState::Pending;
                    reservation.reactivated.push(entry.clone());
                }
                Some(_) => {}
            }
        }
        if !reservation.is_noop() {
            self.touch();
        }
        Ok(reservation)
    }

    /// Undo a reservation made by `reserve`
    pub fn rollback(&mut self, reservation: &MemberReservation) {
        for entry in &reservation.inserted {
            if self.entries.get(entry) == Some(&EntryState::Pending) {
                self.entries.remove(entry);
            }
        }
        for entry in &reservation.reactivated {
            if let Some(state) = self.entries.get_mut(entry)
                && *state == EntryState::Pending
            {
                *state = EntryState::Releasing;
            }
        }
        self.touch();
    }

    /// Merge already-acknowledged entries, overwriting their state
    pub fn upsert_granted(&mut self, entries: &[LockEntry]) {
        for entry in entries {
            self.entries.insert(entry.clone(), EntryState::Granted);
        }
        self.touch();
    }

    /// Pending entries acknowledged by the member become granted.
    ///
    /// Entries removed or released in the meantime are not resurrected.
    pub fn mark_granted(&mut self, entries: &[LockEntry]) -> usize {
        let mut granted = 0;
        for entry in entries {
            if let Some(state) = self.entries.get_mut(entry)
                && *state == EntryState::Pending
            {
                *state = EntryState::Granted;
                granted += 1;
            }
        }
        if granted > 0 {
            self.touch();
        }
        granted
    }

    /// Drop entries that are still pending (the member refused them)
    pub fn drop_pending(&mut self, entries: &[LockEntry]) -> usize {
        let before = self.entries.len();
        for entry in entries {
            if self.entries.get(entry) == Some(&EntryState::Pending) {
                self.entries.remove(entry);
            }
        }
        let dropped = before - self.entries.len();
        if dropped > 0 {
            self.touch();
        }
        dropped
    }

    fn matches_release(entry: &LockEntry, owner: &OwnerId, object_ids: &[ObjectId]) -> bool {
        &entry.owner == owner && (object_ids.is_empty() || object_ids.contains(&entry.object_id))
    }

    /// Whether every entry is held and acknowledged
    pub fn all_granted(&self, entries: &[LockEntry]) -> bool {
        entries
            .iter()
            .all(|e| self.entries.get(e) == Some(&EntryState::Granted))
    }

    /// Whether a release of the owner's entries on `object_ids` is still unacknowledged here
    pub fn has_releasing(&self, owner: &OwnerId, object_ids: &[ObjectId]) -> bool {
        self.entries.iter().any(|(entry, state)| {
            *state == EntryState::Releasing && Self::matches_release(entry, owner, object_ids)
        })
    }

    /// Mark the owner's entries on `object_ids` (all when empty) as releasing
    pub fn begin_release(&mut self, owner: &OwnerId, object_ids: &[ObjectId]) -> Vec<LockEntry> {
        let mut marked = Vec::new();
        for (entry, state) in self.entries.iter_mut() {
            if Self::matches_release(entry, owner, object_ids) && *state != EntryState::Releasing {
                *state = EntryState::Releasing;
                marked.push(entry.clone());
            }
        }
        if !marked.is_empty() {
            self.touch();
        }
        marked
    }

    /// Remove releasing entries the member has acknowledged dropping.
    ///
    /// Entries re-acquired since the release began are pending, not releasing,
    /// and survive.
    pub fn complete_release(&mut self, owner: &OwnerId, object_ids: &[ObjectId]) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry, state| {
            !(Self::matches_release(entry, owner, object_ids) && *state == EntryState::Releasing)
        });
        let removed = before - self.entries.len();
        if removed > 0 {
            self.touch();
        }
        removed
    }

    /// Remove every entry on the given objects regardless of owner or state
    pub fn remove_objects(&mut self, object_ids: &[ObjectId]) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|entry, _| !object_ids.contains(&entry.object_id));
        let removed = before - self.entries.len();
        if removed > 0 {
            self.touch();
        }
        removed
    }

    /// Entries held or being acquired, i.e. everything not releasing
    pub fn held_entries(&self) -> Vec<LockEntry> {
        self.entries
            .iter()
            .filter(|(_, state)| **state != EntryState::Releasing)
            .map(|(e, _)| e.clone())
            .collect()
    }

    /// Stage a full resync carrying `entries`: missing ones become pending and
    /// releasing ones are reactivated.
    pub fn prepare_bootstrap(&mut self, entries: &[LockEntry]) {
        for entry in entries {
            match self.entries.get_mut(entry) {
                None => {
                    self.entries.insert(entry.clone(), EntryState::Pending);
                }
                Some(state) if *state == EntryState::Releasing => *state = EntryState::Pending,
                Some(_) => {}
            }
        }
        self.touch();
    }

    /// Apply a member's acknowledgment of a full resync carrying `sent`.
    ///
    /// Sent pending entries become granted; releasing entries the member no
    /// longer has (they were not sent) are dropped.
    pub fn complete_bootstrap(&mut self, sent: &[LockEntry]) {
        self.mark_granted(sent);
        self.entries
            .retain(|entry, state| *state != EntryState::Releasing || sent.contains(entry));
        self.touch();
    }

    fn touch(&mut self) {
        self.version += 1;
        self.updated_at = current_timestamp();
    }
}
