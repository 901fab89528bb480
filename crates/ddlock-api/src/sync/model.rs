//! Member sync API models

use serde::{Deserialize, Serialize};

use crate::{
    lock::{EntryState, LeaderEpoch, LockEntry, ObjectId, OwnerId},
    model::MemberId,
};

/// A lock-state change pushed to a member
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockUpdate {
    /// Grant the entries; re-applying an already held entry is a no-op
    Acquire { entries: Vec<LockEntry> },
    /// Drop the owner's entries on the objects (all of them when empty)
    Release {
        owner: OwnerId,
        object_ids: Vec<ObjectId>,
    },
    /// Replace the member's whole lock view with these entries
    Bootstrap { entries: Vec<LockEntry> },
}

impl LockUpdate {
    pub fn kind(&self) -> &'static str {
        match self {
            LockUpdate::Acquire { .. } => "acquire",
            LockUpdate::Release { .. } => "release",
            LockUpdate::Bootstrap { .. } => "bootstrap",
        }
    }
}

/// Lock update request sent to one member, fenced by the sender's epoch
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockUpdateRequest {
    pub epoch: LeaderEpoch,
    pub update: LockUpdate,
}

impl LockUpdateRequest {
    pub fn new(epoch: LeaderEpoch, update: LockUpdate) -> Self {
        Self { epoch, update }
    }
}

/// Failure of a single call to a member
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MemberCallError {
    #[error("transient error: {0}")]
    Transient(String),

    #[error("call timed out")]
    Timeout,

    #[error("permanent error: {0}")]
    Permanent(String),

    #[error("member is decommissioned")]
    Decommissioned,
}

impl MemberCallError {
    /// Whether the call may succeed if attempted again
    pub fn is_retryable(&self) -> bool {
        matches!(self, MemberCallError::Transient(_) | MemberCallError::Timeout)
    }
}

/// An exported lock entry together with its propagation state
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedLockEntry {
    #[serde(flatten)]
    pub entry: LockEntry,
    pub state: EntryState,
}

/// Lock entries of one member
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberLockEntries {
    pub member_id: MemberId,
    pub entries: Vec<ExportedLockEntry>,
}

/// Point-in-time export of the whole lock registry.
///
/// This is a copy; it does not track later changes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DdlLockEntries {
    /// Epoch the exporting leader held, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epoch: Option<LeaderEpoch>,
    /// Export timestamp (Unix millis)
    pub taken_at: i64,
    pub members: Vec<MemberLockEntries>,
}

impl DdlLockEntries {
    pub fn is_empty(&self) -> bool {
        self.members.iter().all(|m| m.entries.is_empty())
    }

    pub fn entry_count(&self) -> usize {
        self.members.iter().map(|m| m.entries.len()).sum()
    }

    pub fn entries_for(&self, member_id: &MemberId) -> Option<&[ExportedLockEntry]> {
        self.members
            .iter()
            .find(|m| &m.member_id == member_id)
            .map(|m| m.entries.as_slice())
    }

    /// Encode into the JSON transfer format
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode from the JSON transfer format
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
