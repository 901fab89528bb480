//! Object lock API models

use std::fmt::{Display, Formatter};

use ddlock_common::{LockError, error::SUCCESS, is_valid_identifier};
use serde::{Deserialize, Serialize};

use crate::model::MemberId;

/// Maximum number of objects named by a single request
pub const MAX_OBJECTS_PER_REQUEST: usize = 1024;

/// Catalog object identifier (database oid plus object oid of a table or schema)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectId {
    pub database_oid: u32,
    pub object_oid: u32,
}

impl ObjectId {
    pub fn new(database_oid: u32, object_oid: u32) -> Self {
        Self {
            database_oid,
            object_oid,
        }
    }
}

impl Display for ObjectId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.database_oid, self.object_oid)
    }
}

/// Owning session or transaction identifier
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for OwnerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Lock mode, ordered from weakest to strongest
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockMode {
    #[default]
    Shared,
    Exclusive,
}

impl LockMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockMode::Shared => "SHARED",
            LockMode::Exclusive => "EXCLUSIVE",
        }
    }

    /// Whether two entries held by different owners on the same object conflict
    pub fn conflicts_with(self, other: LockMode) -> bool {
        self == LockMode::Exclusive || other == LockMode::Exclusive
    }
}

impl Display for LockMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single lock on a catalog object held by one owner
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockEntry {
    pub object_id: ObjectId,
    pub mode: LockMode,
    pub owner: OwnerId,
}

impl LockEntry {
    pub fn new(object_id: ObjectId, mode: LockMode, owner: OwnerId) -> Self {
        Self {
            object_id,
            mode,
            owner,
        }
    }

    /// Whether this entry blocks `other` from being held at the same time
    pub fn conflicts_with(&self, other: &LockEntry) -> bool {
        self.object_id == other.object_id
            && self.owner != other.owner
            && self.mode.conflicts_with(other.mode)
    }
}

impl Display for LockEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}/{}", self.owner, self.object_id, self.mode)
    }
}

/// Propagation state of a lock entry as known to the leader
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryState {
    /// Reserved by an in-flight acquire, not yet acknowledged by the member
    #[default]
    Pending,
    /// Acknowledged by the member
    Granted,
    /// Release in flight, not yet acknowledged by the member
    Releasing,
}

impl EntryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryState::Pending => "PENDING",
            EntryState::Granted => "GRANTED",
            EntryState::Releasing => "RELEASING",
        }
    }
}

impl Display for EntryState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Leadership epoch: leader term plus point-in-time-restore count.
///
/// Ordered lexicographically, so a later term always wins and a restore within
/// a term still fences operations started before it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderEpoch {
    pub leader_term: u64,
    pub pitr_count: u64,
}

impl LeaderEpoch {
    pub fn new(leader_term: u64, pitr_count: u64) -> Self {
        Self {
            leader_term,
            pitr_count,
        }
    }

    pub fn term(leader_term: u64) -> Self {
        Self::new(leader_term, 0)
    }
}

impl Display for LeaderEpoch {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.leader_term, self.pitr_count)
    }
}

/// Request to acquire locks on one or more objects
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcquireObjectLockRequest {
    pub owner: OwnerId,
    pub object_ids: Vec<ObjectId>,
    pub mode: LockMode,
}

impl AcquireObjectLockRequest {
    pub fn new(owner: impl Into<OwnerId>, object_ids: Vec<ObjectId>, mode: LockMode) -> Self {
        Self {
            owner: owner.into(),
            object_ids,
            mode,
        }
    }

    pub fn validate(&self) -> Result<(), LockError> {
        validate_owner(&self.owner)?;
        if self.object_ids.is_empty() {
            return Err(LockError::InvalidArgument(
                "acquire request names no objects".to_string(),
            ));
        }
        validate_object_count(self.object_ids.len())
    }

    /// Lock entries requested, one per distinct object
    pub fn entries(&self) -> Vec<LockEntry> {
        let mut object_ids = self.object_ids.clone();
        object_ids.sort();
        object_ids.dedup();
        object_ids
            .into_iter()
            .map(|object_id| LockEntry::new(object_id, self.mode, self.owner.clone()))
            .collect()
    }
}

/// Request to release locks.
///
/// An empty object list releases every lock held by the owner.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseObjectLockRequest {
    pub owner: OwnerId,
    #[serde(default)]
    pub object_ids: Vec<ObjectId>,
}

impl ReleaseObjectLockRequest {
    pub fn new(owner: impl Into<OwnerId>, object_ids: Vec<ObjectId>) -> Self {
        Self {
            owner: owner.into(),
            object_ids,
        }
    }

    pub fn release_all(owner: impl Into<OwnerId>) -> Self {
        Self::new(owner, Vec::new())
    }

    pub fn is_release_all(&self) -> bool {
        self.object_ids.is_empty()
    }

    pub fn validate(&self) -> Result<(), LockError> {
        validate_owner(&self.owner)?;
        validate_object_count(self.object_ids.len())
    }
}

fn validate_owner(owner: &OwnerId) -> Result<(), LockError> {
    if !is_valid_identifier(owner.as_str()) {
        return Err(LockError::InvalidArgument(format!(
            "invalid owner id '{}'",
            owner
        )));
    }
    Ok(())
}

fn validate_object_count(count: usize) -> Result<(), LockError> {
    if count > MAX_OBJECTS_PER_REQUEST {
        return Err(LockError::InvalidArgument(format!(
            "request names {} objects, limit is {}",
            count, MAX_OBJECTS_PER_REQUEST
        )));
    }
    Ok(())
}

/// Caller-visible status of an acquire or release
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseStatus {
    /// Every live member acknowledged (or was decommissioned)
    #[default]
    Ok,
    /// Some members rejected the update permanently, the rest acknowledged
    PartialFailure,
    EpochStale,
    LockConflict,
    /// Outcome unknown; some members may hold the lock
    PropagationTimeout,
    InvalidArgument,
}

impl ResponseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStatus::Ok => "OK",
            ResponseStatus::PartialFailure => "PARTIAL_FAILURE",
            ResponseStatus::EpochStale => "EPOCH_STALE",
            ResponseStatus::LockConflict => "LOCK_CONFLICT",
            ResponseStatus::PropagationTimeout => "PROPAGATION_TIMEOUT",
            ResponseStatus::InvalidArgument => "INVALID_ARGUMENT",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ResponseStatus::Ok | ResponseStatus::PartialFailure)
    }
}

impl Display for ResponseStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&LockError> for ResponseStatus {
    fn from(err: &LockError) -> Self {
        match err {
            LockError::InvalidArgument(_) => ResponseStatus::InvalidArgument,
            LockError::EpochStale { .. } => ResponseStatus::EpochStale,
            LockError::LockConflict { .. } => ResponseStatus::LockConflict,
            LockError::PropagationTimeout { .. } => ResponseStatus::PropagationTimeout,
            LockError::MemberPermanentFailure { .. } => ResponseStatus::PartialFailure,
        }
    }
}

/// A member that rejected a lock update for a non-transient reason
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberFailure {
    pub member_id: MemberId,
    pub error_code: i32,
    pub reason: String,
}

impl MemberFailure {
    /// Per-member entry for a `LockError::MemberPermanentFailure`
    pub fn from_error(member_id: MemberId, err: &LockError) -> Self {
        let reason = match err {
            LockError::MemberPermanentFailure { reason, .. } => reason.clone(),
            other => other.to_string(),
        };
        Self {
            member_id,
            error_code: err.error_code().code,
            reason,
        }
    }
}

/// Response to an acquire, release, or member bootstrap
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectLockResponse {
    pub status: ResponseStatus,
    pub error_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Members that acknowledged the update before the response was sent
    #[serde(default)]
    pub acknowledged: Vec<MemberId>,
    /// Members with no terminal outcome when the response was sent
    #[serde(default)]
    pub pending: Vec<MemberId>,
    #[serde(default)]
    pub member_failures: Vec<MemberFailure>,
}

pub type AcquireObjectLockResponse = ObjectLockResponse;
pub type ReleaseObjectLockResponse = ObjectLockResponse;

impl ObjectLockResponse {
    pub fn ok() -> Self {
        Self {
            status: ResponseStatus::Ok,
            error_code: SUCCESS.code,
            ..Default::default()
        }
    }

    pub fn from_error(err: &LockError) -> Self {
        let pending = match err {
            LockError::PropagationTimeout { pending } => {
                pending.iter().map(|m| MemberId::new(m.as_str())).collect()
            }
            _ => Vec::new(),
        };
        Self {
            status: ResponseStatus::from(err),
            error_code: err.error_code().code,
            message: Some(err.to_string()),
            pending,
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn obj(n: u32) -> ObjectId {
        ObjectId::new(16384, n)
    }

    #[test]
    fn test_mode_compatibility() {
        assert!(!LockMode::Shared.conflicts_with(LockMode::Shared));
        assert!(LockMode::Shared.conflicts_with(LockMode::Exclusive));
        assert!(LockMode::Exclusive.conflicts_with(LockMode::Shared));
        assert!(LockMode::Exclusive.conflicts_with(LockMode::Exclusive));
        assert!(LockMode::Shared < LockMode::Exclusive);
    }

    #[test]
    fn test_entry_conflicts_ignore_same_owner_and_other_objects() {
        let x1 = LockEntry::new(obj(1), LockMode::Exclusive, "s1".into());
        let s1 = LockEntry::new(obj(1), LockMode::Shared, "s1".into());
        let s2 = LockEntry::new(obj(1), LockMode::Shared, "s2".into());
        let x2_other = LockEntry::new(obj(2), LockMode::Exclusive, "s2".into());

        assert!(!x1.conflicts_with(&s1));
        assert!(x1.conflicts_with(&s2));
        assert!(!x1.conflicts_with(&x2_other));
        assert!(!s1.conflicts_with(&s2));
    }

    #[test]
    fn test_epoch_ordering() {
        assert!(LeaderEpoch::term(2) > LeaderEpoch::new(1, 9));
        assert!(LeaderEpoch::new(2, 1) > LeaderEpoch::term(2));
        assert_eq!(LeaderEpoch::new(3, 1).to_string(), "3.1");
    }

    #[test]
    fn test_acquire_request_validation() {
        let req = AcquireObjectLockRequest::new("s1", vec![obj(1)], LockMode::Shared);
        assert!(req.validate().is_ok());

        let empty = AcquireObjectLockRequest::new("s1", vec![], LockMode::Shared);
        assert!(matches!(
            empty.validate(),
            Err(LockError::InvalidArgument(_))
        ));

        let bad_owner = AcquireObjectLockRequest::new("bad owner", vec![obj(1)], LockMode::Shared);
        assert!(bad_owner.validate().is_err());

        let too_many = AcquireObjectLockRequest::new(
            "s1",
            (0..=MAX_OBJECTS_PER_REQUEST as u32).map(obj).collect(),
            LockMode::Shared,
        );
        assert!(too_many.validate().is_err());
    }

    #[test]
    fn test_acquire_entries_are_deduplicated() {
        let req = AcquireObjectLockRequest::new("s1", vec![obj(2), obj(1), obj(2)], LockMode::Exclusive);
        let entries = req.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].object_id, obj(1));
        assert!(entries.iter().all(|e| e.mode == LockMode::Exclusive));
    }

    #[test]
    fn test_release_all_request() {
        let req = ReleaseObjectLockRequest::release_all("s1");
        assert!(req.is_release_all());
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_response_from_error() {
        let err = LockError::PropagationTimeout {
            pending: vec!["ts-2".to_string()],
        };
        let resp = ObjectLockResponse::from_error(&err);
        assert_eq!(resp.status, ResponseStatus::PropagationTimeout);
        assert_eq!(resp.error_code, 30003);
        assert_eq!(resp.pending, vec![MemberId::new("ts-2")]);
        assert!(!resp.is_success());

        let ok = ObjectLockResponse::ok();
        assert!(ok.is_success());
        assert_eq!(ok.error_code, 0);
    }

    #[test]
    fn test_member_failure_from_error() {
        let err = LockError::MemberPermanentFailure {
            member: "ts-2".to_string(),
            reason: "object not found".to_string(),
        };
        let failure = MemberFailure::from_error(MemberId::new("ts-2"), &err);
        assert_eq!(failure.error_code, 30004);
        assert_eq!(failure.reason, "object not found");

        let resp = ObjectLockResponse::from_error(&err);
        assert_eq!(resp.status, ResponseStatus::PartialFailure);
        assert!(resp.message.unwrap().contains("ts-2"));
    }

    #[test]
    fn test_request_json_shape() {
        let req = AcquireObjectLockRequest::new("s1", vec![obj(7)], LockMode::Exclusive);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["owner"], "s1");
        assert_eq!(json["mode"], "EXCLUSIVE");
        assert_eq!(json["objectIds"][0]["objectOid"], 7);
    }

    proptest! {
        #[test]
        fn prop_epoch_orders_by_term_then_restore(
            a in (0u64..100, 0u64..100),
            b in (0u64..100, 0u64..100),
        ) {
            let ea = LeaderEpoch::new(a.0, a.1);
            let eb = LeaderEpoch::new(b.0, b.1);
            prop_assert_eq!(ea.cmp(&eb), a.cmp(&b));
        }

        #[test]
        fn prop_epoch_json_round_trips(term in any::<u64>(), pitr in any::<u64>()) {
            let epoch = LeaderEpoch::new(term, pitr);
            let json = serde_json::to_string(&epoch).unwrap();
            prop_assert_eq!(serde_json::from_str::<LeaderEpoch>(&json).unwrap(), epoch);
        }
    }
}
