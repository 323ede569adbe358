//! Tasks: units of queued work.
//!
//! A [`NewTask`] is what callers hand to the queue. Its payload is encoded
//! eagerly, so every failure to produce canonical bytes surfaces at
//! construction time and the persistence layer only ever moves bytes
//! around. A [`Task`] is the stored row the queue hands back, carrying the
//! store-assigned id and timestamps. Its payload is decoded lazily.
//!
//! # Deduplication
//!
//! The dedup key is `"<operation>:<sha256>"` where the digest covers the
//! canonical JSON of the fields listed by [`Operation::dedup_fields`]. At
//! most one pending task may exist per key. Every dedup field must be
//! present and non-null, otherwise construction fails.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::TaskError;
use crate::operation::{Operation, TrackableType};
use crate::payload::Payload;
use crate::status::Trackable;

/// Named priority tiers. Higher is more urgent.
///
/// Choreography offsets stay well below the gap between tiers, so every
/// phase of a higher-tier pipeline outranks every phase of a lower one.
pub struct QueuePriority;

impl QueuePriority {
    pub const BACKGROUND: i64 = 1_000;
    pub const NORMAL: i64 = 2_000;
    pub const USER_INITIATED: i64 = 5_000;
}

/// A task that has not been stored yet.
#[derive(Clone, Debug, PartialEq)]
pub struct NewTask {
    pub dedup_key: String,
    pub operation: Operation,
    pub priority: i64,
    pub payload: Vec<u8>,
}

impl NewTask {
    /// Build a task, encoding `payload` and deriving its dedup key.
    ///
    /// # Errors
    ///
    /// [`TaskError::Encode`] or [`TaskError::PayloadNotObject`] if the
    /// payload cannot be encoded as a canonical key/value object.
    pub fn new<T: Serialize>(operation: Operation, priority: i64, payload: &T) -> Result<Self, TaskError> {
        let decoded = Payload::from_serializable(operation, payload)?;
        Self::from_payload(operation, priority, &decoded)
    }

    pub fn from_payload(operation: Operation, priority: i64, payload: &Payload) -> Result<Self, TaskError> {
        let bytes = payload.to_bytes(operation)?;
        let dedup_key = dedup_key(operation, payload)?;
        Ok(Self {
            dedup_key,
            operation,
            priority,
            payload: bytes,
        })
    }

    /// Replace the derived dedup key, e.g. to force a fresh retry.
    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = key.into();
        self
    }

    pub fn payload(&self) -> Result<Payload, TaskError> {
        Payload::from_bytes(&self.payload, &self.dedup_key)
    }
}

/// Derive the dedup key for `operation` from the relevant payload fields.
///
/// # Errors
///
/// [`TaskError::MissingField`] if a dedup field is absent or `null`.
pub fn dedup_key(operation: Operation, payload: &Payload) -> Result<String, TaskError> {
    for &field in operation.dedup_fields() {
        if payload.get(field).map_or(true, Value::is_null) {
            return Err(TaskError::MissingField {
                dedup_key: operation.to_string(),
                field,
            });
        }
    }
    let subset = payload.project(operation.dedup_fields());
    let canonical =
        serde_json::to_vec(&subset).map_err(|source| TaskError::Encode { operation, source })?;
    let mut hasher = Sha256::new();
    hasher.update(operation.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(&canonical);
    Ok(format!("{}:{:x}", operation, hasher.finalize()))
}

/// A pending task as stored in the queue.
#[derive(Clone, Debug, PartialEq)]
pub struct Task {
    pub id: i64,
    pub dedup_key: String,
    pub operation: Operation,
    pub priority: i64,
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Decode the payload.
    ///
    /// # Errors
    ///
    /// [`TaskError::Decode`] if the stored bytes are corrupt.
    pub fn payload(&self) -> Result<Payload, TaskError> {
        Payload::from_bytes(&self.payload, &self.dedup_key)
    }

    /// Decode the payload into a typed option struct.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, TaskError> {
        self.payload()?.decode(&self.dedup_key)
    }

    /// The entity this task's progress is tracked against.
    ///
    /// Uses the identifier field of the operation's scope (`commit_sha` for
    /// commit operations and so on). Branch and tag names are only unique
    /// within a repository, so their ids are `"<repo_id>/<name>"`.
    pub fn trackable(&self) -> Result<Trackable, TaskError> {
        let kind = self.operation.trackable_type();
        let payload = self.payload()?;
        let required = |field: &'static str| {
            payload.id_string(field).ok_or_else(|| TaskError::MissingField {
                dedup_key: self.dedup_key.clone(),
                field,
            })
        };
        let id = match kind {
            TrackableType::Branch | TrackableType::Tag => {
                format!("{}/{}", required("repo_id")?, required(kind.id_field())?)
            }
            _ => required(kind.id_field())?,
        };
        Ok(Trackable::new(kind, id))
    }

    /// Dequeue ordering: `Less` means `self` is dequeued first.
    ///
    /// Priority descending, then creation time ascending, then id ascending
    /// as a tie-break for rows created within the same clock tick.
    pub fn dequeue_order(&self, other: &Task) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then(self.created_at.cmp(&other.created_at))
            .then(self.id.cmp(&other.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{BranchOptions, CommitOptions, RepositoryOptions};
    use chrono::Duration;
    use serde_json::json;

    fn stored(id: i64, priority: i64, offset_ms: i64) -> Task {
        let base = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        Task {
            id,
            dedup_key: format!("k{}", id),
            operation: Operation::RepositoryClone,
            priority,
            payload: b"{}".to_vec(),
            created_at: base + Duration::milliseconds(offset_ms),
            updated_at: base + Duration::milliseconds(offset_ms),
        }
    }

    #[test]
    fn dedup_key_ignores_unrelated_fields() {
        let a = NewTask::new(
            Operation::RepositoryClone,
            10,
            &json!({"repo_id": 1, "requested_by": "api"}),
        )
        .unwrap();
        let b = NewTask::new(
            Operation::RepositoryClone,
            50,
            &json!({"repo_id": 1, "requested_by": "sync"}),
        )
        .unwrap();
        assert_eq!(a.dedup_key, b.dedup_key);
        assert!(a.dedup_key.starts_with("repo.clone:"));
    }

    #[test]
    fn dedup_key_separates_operations_and_entities() {
        let clone = NewTask::new(Operation::RepositoryClone, 1, &RepositoryOptions { repo_id: 1 }).unwrap();
        let pull = NewTask::new(Operation::RepositoryPull, 1, &RepositoryOptions { repo_id: 1 }).unwrap();
        let other = NewTask::new(Operation::RepositoryClone, 1, &RepositoryOptions { repo_id: 2 }).unwrap();
        assert_ne!(clone.dedup_key, pull.dedup_key);
        assert_ne!(clone.dedup_key, other.dedup_key);
    }

    #[test]
    fn commit_dedup_uses_sha() {
        let a = NewTask::new(
            Operation::CommitScan,
            1,
            &CommitOptions { repo_id: 1, commit_sha: "aaa".into() },
        )
        .unwrap();
        let b = NewTask::new(
            Operation::CommitScan,
            1,
            &CommitOptions { repo_id: 1, commit_sha: "bbb".into() },
        )
        .unwrap();
        assert_ne!(a.dedup_key, b.dedup_key);
    }

    #[test]
    fn with_dedup_key_overrides() {
        let t = NewTask::new(Operation::IndexRefresh, 1, &json!({"index_id": 3}))
            .unwrap()
            .with_dedup_key("retry-2");
        assert_eq!(t.dedup_key, "retry-2");
    }

    #[test]
    fn construction_rejects_missing_dedup_fields() {
        let err = NewTask::new(Operation::RepositoryClone, 10, &json!({"repo": 1})).unwrap_err();
        assert!(matches!(err, TaskError::MissingField { field: "repo_id", .. }));

        let err = NewTask::new(Operation::CommitScan, 10, &json!({"repo_id": 1, "commit_sha": null}))
            .unwrap_err();
        assert!(matches!(err, TaskError::MissingField { field: "commit_sha", .. }));
        assert!(err.to_string().contains("commit.scan"));
    }

    #[test]
    fn construction_rejects_scalar_payload() {
        let err = NewTask::new(Operation::RepositoryClone, 1, &"repo").unwrap_err();
        assert!(matches!(err, TaskError::PayloadNotObject { .. }));
    }

    #[test]
    fn lazy_decode_reports_corruption() {
        let mut t = stored(1, 10, 0);
        t.payload = b"\xff\xfe".to_vec();
        assert!(matches!(t.payload(), Err(TaskError::Decode { .. })));
    }

    #[test]
    fn trackable_comes_from_scope_field() {
        let mut t = stored(1, 10, 0);
        t.payload = br#"{"repo_id":1}"#.to_vec();
        let tr = t.trackable().unwrap();
        assert_eq!(tr.trackable_type, TrackableType::Repository);
        assert_eq!(tr.trackable_id, "1");

        t.operation = Operation::CommitScan;
        assert!(matches!(
            t.trackable(),
            Err(TaskError::MissingField { field: "commit_sha", .. })
        ));
    }

    #[test]
    fn branch_trackables_are_scoped_to_their_repository() {
        let trackable_of = |repo_id: i64| {
            let new = NewTask::new(
                Operation::BranchScan,
                1,
                &BranchOptions { repo_id, branch_name: "main".into() },
            )
            .unwrap();
            let mut t = stored(repo_id, 1, 0);
            t.operation = new.operation;
            t.dedup_key = new.dedup_key;
            t.payload = new.payload;
            t.trackable().unwrap()
        };
        let first = trackable_of(1);
        let second = trackable_of(2);
        assert_eq!(first, Trackable::branch(1, "main"));
        assert_eq!(first.to_string(), "branch:1/main");
        assert_ne!(first, second);
    }

    #[test]
    fn dequeue_order_is_priority_then_fifo() {
        let mut tasks = vec![stored(1, 10, 0), stored(2, 50, 5), stored(3, 30, 1), stored(4, 50, 2)];
        tasks.sort_by(|a, b| a.dequeue_order(b));
        let ids: Vec<i64> = tasks.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![4, 2, 3, 1]);
    }

    #[test]
    fn same_instant_falls_back_to_id() {
        let mut tasks = vec![stored(9, 10, 0), stored(3, 10, 0)];
        tasks.sort_by(|a, b| a.dequeue_order(b));
        assert_eq!(tasks[0].id, 3);
    }
}
