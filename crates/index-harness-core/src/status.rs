//! Task status: the hierarchical progress record of an operation.
//!
//! ```text
//! STARTED ──▶ IN_PROGRESS* ──▶ COMPLETED | FAILED | SKIPPED
//!    └──────────────────────────▲
//! ```
//!
//! Terminal states are absorbing: every transition method returns
//! [`StatusError::AlreadyTerminal`] once one is reached. Parent/child
//! links form a tree whose roll-up is computed on demand by [`rollup`],
//! never maintained incrementally.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StatusError;
use crate::operation::{Operation, TrackableType};

/// State of a single status node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportingState {
    Started,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl ReportingState {
    pub const ALL: [ReportingState; 5] = [
        ReportingState::Started,
        ReportingState::InProgress,
        ReportingState::Completed,
        ReportingState::Failed,
        ReportingState::Skipped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportingState::Started => "started",
            ReportingState::InProgress => "in_progress",
            ReportingState::Completed => "completed",
            ReportingState::Failed => "failed",
            ReportingState::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReportingState::Completed | ReportingState::Failed | ReportingState::Skipped
        )
    }
}

impl fmt::Display for ReportingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportingState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReportingState::ALL
            .iter()
            .copied()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| format!("unknown reporting state '{}'", s))
    }
}

/// Identifies the entity a status describes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Trackable {
    pub trackable_type: TrackableType,
    pub trackable_id: String,
}

impl Trackable {
    pub fn new(trackable_type: TrackableType, trackable_id: impl Into<String>) -> Self {
        Self {
            trackable_type,
            trackable_id: trackable_id.into(),
        }
    }

    pub fn repository(id: i64) -> Self {
        Self::new(TrackableType::Repository, id.to_string())
    }

    pub fn commit(sha: impl Into<String>) -> Self {
        Self::new(TrackableType::Commit, sha)
    }

    /// Branch names repeat across repositories, so the id carries both.
    pub fn branch(repo_id: i64, name: &str) -> Self {
        Self::new(TrackableType::Branch, format!("{}/{}", repo_id, name))
    }

    pub fn tag(repo_id: i64, name: &str) -> Self {
        Self::new(TrackableType::Tag, format!("{}/{}", repo_id, name))
    }
}

impl fmt::Display for Trackable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.trackable_type, self.trackable_id)
    }
}

/// Progress record for one operation on one trackable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub id: String,
    pub operation: Operation,
    pub trackable: Trackable,
    pub parent_id: Option<String>,
    pub state: ReportingState,
    pub message: String,
    pub error: Option<String>,
    pub total: u64,
    pub current: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskStatus {
    /// A freshly started status with a new id.
    pub fn started(operation: Operation, trackable: Trackable, parent_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            operation,
            trackable,
            parent_id,
            state: ReportingState::Started,
            message: String::new(),
            error: None,
            total: 0,
            current: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    fn transition(&mut self, next: ReportingState) -> Result<(), StatusError> {
        if self.state.is_terminal() {
            return Err(StatusError::AlreadyTerminal {
                id: self.id.clone(),
                state: self.state,
                attempted: next,
            });
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Set the expected amount of work. Moves to `in_progress`.
    pub fn set_total(&mut self, total: u64) -> Result<(), StatusError> {
        self.transition(ReportingState::InProgress)?;
        self.total = total;
        Ok(())
    }

    /// Record progress. Moves to `in_progress`.
    pub fn set_current(&mut self, current: u64, message: impl Into<String>) -> Result<(), StatusError> {
        self.transition(ReportingState::InProgress)?;
        self.current = current;
        self.message = message.into();
        Ok(())
    }

    pub fn complete(&mut self) -> Result<(), StatusError> {
        self.transition(ReportingState::Completed)?;
        if self.total > 0 {
            self.current = self.total;
        }
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), StatusError> {
        self.transition(ReportingState::Failed)?;
        let error = error.into();
        self.message = error.clone();
        self.error = Some(error);
        Ok(())
    }

    pub fn skip(&mut self, reason: impl Into<String>) -> Result<(), StatusError> {
        self.transition(ReportingState::Skipped)?;
        self.message = reason.into();
        Ok(())
    }

    /// Percentage of work done, 0–100. Terminal statuses report 100.
    pub fn completion_percent(&self) -> u8 {
        if self.is_terminal() {
            return 100;
        }
        if self.total == 0 {
            return 0;
        }
        let pct = self.current.min(self.total).saturating_mul(100) / self.total;
        u8::try_from(pct).unwrap_or(100)
    }
}

/// Aggregate state of a status tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rollup {
    Pending,
    Completed,
    Failed,
}

impl Rollup {
    fn of_state(state: ReportingState) -> Self {
        match state {
            ReportingState::Failed => Rollup::Failed,
            ReportingState::Completed | ReportingState::Skipped => Rollup::Completed,
            ReportingState::Started | ReportingState::InProgress => Rollup::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Rollup::Pending => "pending",
            Rollup::Completed => "completed",
            Rollup::Failed => "failed",
        }
    }
}

impl fmt::Display for Rollup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Roll up `node` from its descendants in `all` (any order, may contain
/// unrelated statuses).
///
/// Any failed child makes the node failed; otherwise any non-terminal child
/// makes it pending; otherwise it is completed. A node without children
/// rolls up to its own state.
pub fn rollup(node: &TaskStatus, all: &[TaskStatus]) -> Rollup {
    let children: Vec<&TaskStatus> = all
        .iter()
        .filter(|s| s.parent_id.as_deref() == Some(node.id.as_str()))
        .collect();
    if children.is_empty() {
        return Rollup::of_state(node.state);
    }
    let mut pending = false;
    for child in children {
        match rollup(child, all) {
            Rollup::Failed => return Rollup::Failed,
            Rollup::Pending => pending = true,
            Rollup::Completed => {}
        }
    }
    if pending {
        Rollup::Pending
    } else {
        Rollup::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> TaskStatus {
        TaskStatus::started(Operation::RepositoryClone, Trackable::repository(1), None)
    }

    fn child_of(parent: &TaskStatus) -> TaskStatus {
        TaskStatus::started(
            Operation::CommitScan,
            Trackable::commit("abc"),
            Some(parent.id.clone()),
        )
    }

    #[test]
    fn progress_moves_to_in_progress() {
        let mut s = root();
        assert_eq!(s.state, ReportingState::Started);
        s.set_total(4).unwrap();
        s.set_current(1, "cloning").unwrap();
        assert_eq!(s.state, ReportingState::InProgress);
        assert_eq!(s.completion_percent(), 25);
        assert_eq!(s.message, "cloning");
    }

    #[test]
    fn started_may_finish_directly() {
        let mut s = root();
        s.complete().unwrap();
        assert_eq!(s.state, ReportingState::Completed);
        assert_eq!(s.completion_percent(), 100);
    }

    #[test]
    fn terminal_states_are_absorbing() {
        for finish in [
            TaskStatus::complete as fn(&mut TaskStatus) -> Result<(), StatusError>,
            |s| s.fail("boom"),
            |s| s.skip("nothing to do"),
        ] {
            let mut s = root();
            finish(&mut s).unwrap();
            let frozen = s.clone();

            assert!(matches!(
                s.set_current(1, "late"),
                Err(StatusError::AlreadyTerminal { .. })
            ));
            assert!(s.set_total(9).is_err());
            assert!(s.complete().is_err());
            assert!(s.fail("again").is_err());
            assert!(s.skip("again").is_err());
            assert_eq!(s, frozen, "rejected transitions must not mutate");
        }
    }

    #[test]
    fn fail_records_error() {
        let mut s = root();
        s.fail("network unreachable").unwrap();
        assert_eq!(s.error.as_deref(), Some("network unreachable"));
        assert_eq!(s.message, "network unreachable");
    }

    #[test]
    fn completion_fills_counters() {
        let mut s = root();
        s.set_total(10).unwrap();
        s.set_current(3, "").unwrap();
        s.complete().unwrap();
        assert_eq!(s.current, 10);
    }

    #[test]
    fn rollup_without_children_uses_own_state() {
        let mut s = root();
        assert_eq!(rollup(&s, &[]), Rollup::Pending);
        s.skip("up to date").unwrap();
        assert_eq!(rollup(&s, &[]), Rollup::Completed);
    }

    #[test]
    fn rollup_any_failed_child_fails() {
        let parent = root();
        let mut a = child_of(&parent);
        let mut b = child_of(&parent);
        let c = child_of(&parent);
        a.complete().unwrap();
        b.fail("x").unwrap();
        let all = vec![parent.clone(), a, b, c];
        assert_eq!(rollup(&parent, &all), Rollup::Failed);
    }

    #[test]
    fn rollup_pending_until_all_terminal() {
        let parent = root();
        let mut a = child_of(&parent);
        let mut b = child_of(&parent);
        a.complete().unwrap();
        let all = vec![a.clone(), b.clone()];
        assert_eq!(rollup(&parent, &all), Rollup::Pending);
        b.skip("cached").unwrap();
        let all = vec![a, b];
        assert_eq!(rollup(&parent, &all), Rollup::Completed);
    }

    #[test]
    fn rollup_recurses_into_grandchildren() {
        let parent = root();
        let mut child = child_of(&parent);
        child.complete().unwrap();
        let mut grandchild = child_of(&child);
        grandchild.fail("deep").unwrap();
        let all = vec![child, grandchild];
        assert_eq!(rollup(&parent, &all), Rollup::Failed);
    }

    #[test]
    fn state_strings_round_trip() {
        for st in ReportingState::ALL {
            assert_eq!(st.as_str().parse::<ReportingState>().unwrap(), st);
        }
        assert_eq!(
            serde_json::to_string(&ReportingState::InProgress).unwrap(),
            "\"in_progress\""
        );
    }
}
