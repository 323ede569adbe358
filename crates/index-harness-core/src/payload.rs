//! Task payloads and the typed option structs callers build them from.
//!
//! A payload is always a JSON object. Keys live in a `BTreeMap`, so the
//! encoded bytes are canonical: the same logical payload always produces the
//! same bytes and the same dedup key.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TaskError;
use crate::operation::Operation;

/// Decoded key/value payload of a task.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(BTreeMap<String, Value>);

impl Payload {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Convert any serializable value into a payload for `operation`.
    pub fn from_serializable<T: Serialize>(operation: Operation, value: &T) -> Result<Self, TaskError> {
        let value = serde_json::to_value(value)
            .map_err(|source| TaskError::Encode { operation, source })?;
        match value {
            Value::Object(map) => Ok(Self(map.into_iter().collect())),
            _ => Err(TaskError::PayloadNotObject { operation }),
        }
    }

    /// Canonical byte encoding.
    pub fn to_bytes(&self, operation: Operation) -> Result<Vec<u8>, TaskError> {
        serde_json::to_vec(&self.0).map_err(|source| TaskError::Encode { operation, source })
    }

    pub fn from_bytes(bytes: &[u8], dedup_key: &str) -> Result<Self, TaskError> {
        serde_json::from_slice(bytes).map_err(|source| TaskError::Decode {
            dedup_key: dedup_key.to_string(),
            source,
        })
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(Value::as_i64)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Render a field as an identifier string (`1`, `"abc123"` → `abc123`).
    pub fn id_string(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Sub-map containing exactly `fields`; absent fields map to `null`.
    pub fn project(&self, fields: &[&str]) -> BTreeMap<String, Value> {
        fields
            .iter()
            .map(|f| (f.to_string(), self.0.get(*f).cloned().unwrap_or(Value::Null)))
            .collect()
    }

    /// Deserialize into a typed option struct.
    pub fn decode<T: DeserializeOwned>(&self, dedup_key: &str) -> Result<T, TaskError> {
        let value = Value::Object(self.0.clone().into_iter().collect());
        serde_json::from_value(value).map_err(|source| TaskError::Decode {
            dedup_key: dedup_key.to_string(),
            source,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Options for repository-scoped operations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryOptions {
    pub repo_id: i64,
}

/// Options for commit-scoped operations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitOptions {
    pub repo_id: i64,
    pub commit_sha: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchOptions {
    pub repo_id: i64,
    pub branch_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagOptions {
    pub repo_id: i64,
    pub tag_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexOptions {
    pub index_id: i64,
}
