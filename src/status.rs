//! Status inspection: `ixh status <trackable_type> <trackable_id>`.
//!
//! Loads every status recorded against a trackable plus all of their
//! descendants, then prints them as a tree with each node's rolled-up
//! state:
//!
//! ```text
//! repo.clone repository:7 completed 100% [completed]
//!   commit.scan commit:ab12f failed 40% [failed] error: disk full
//! ```

use std::collections::{HashSet, VecDeque};

use anyhow::Result;

use index_harness_core::status::rollup;
use index_harness_core::store::{StatusQuery, StatusStore};
use index_harness_core::{TaskStatus, Trackable, TrackableType};

use crate::config::Config;
use crate::sqlite_store::SqliteStore;

/// Statuses of `trackable` and all their descendants, oldest first.
pub async fn load_tree(store: &dyn StatusStore, trackable: &Trackable) -> Result<Vec<TaskStatus>> {
    let mut all = store
        .find(&StatusQuery::new().trackable(trackable.clone()))
        .await?;
    let mut seen: HashSet<String> = all.iter().map(|s| s.id.clone()).collect();
    let mut frontier: VecDeque<String> = all.iter().map(|s| s.id.clone()).collect();

    while let Some(parent) = frontier.pop_front() {
        for child in store.find(&StatusQuery::new().parent(parent)).await? {
            if seen.insert(child.id.clone()) {
                frontier.push_back(child.id.clone());
                all.push(child);
            }
        }
    }

    all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    Ok(all)
}

/// Indented tree lines. Nodes whose parent is not in `all` are roots.
pub fn render_tree(all: &[TaskStatus]) -> Vec<String> {
    let ids: HashSet<&str> = all.iter().map(|s| s.id.as_str()).collect();
    let mut lines = Vec::new();
    for root in all
        .iter()
        .filter(|s| s.parent_id.as_deref().map_or(true, |p| !ids.contains(p)))
    {
        render_node(root, all, 0, &mut lines);
    }
    lines
}

fn render_node(node: &TaskStatus, all: &[TaskStatus], depth: usize, lines: &mut Vec<String>) {
    let mut line = format!(
        "{}{} {} {} {}% [{}]",
        "  ".repeat(depth),
        node.operation,
        node.trackable,
        node.state,
        node.completion_percent(),
        rollup(node, all)
    );
    if let Some(error) = &node.error {
        line.push_str(&format!(" error: {}", error));
    } else if !node.message.is_empty() {
        line.push_str(&format!(" {}", node.message));
    }
    lines.push(line);

    for child in all
        .iter()
        .filter(|s| s.parent_id.as_deref() == Some(node.id.as_str()))
    {
        render_node(child, all, depth + 1, lines);
    }
}

pub async fn run_status(config: &Config, trackable_type: &str, trackable_id: &str) -> Result<()> {
    let kind: TrackableType = trackable_type.parse().map_err(anyhow::Error::msg)?;
    let trackable = Trackable::new(kind, trackable_id);

    let store = SqliteStore::open(config).await?;
    let tree = load_tree(&store, &trackable).await?;
    if tree.is_empty() {
        println!("no status recorded for {}", trackable);
    } else {
        for line in render_tree(&tree) {
            println!("{}", line);
        }
    }
    store.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use index_harness_core::store::memory::InMemoryStore;
    use index_harness_core::Operation;

    #[tokio::test]
    async fn loads_descendants_across_trackables() {
        let store = InMemoryStore::new();
        let mut root = TaskStatus::started(Operation::RepositoryClone, Trackable::repository(7), None);
        let mut child = TaskStatus::started(
            Operation::CommitScan,
            Trackable::commit("ab12f"),
            Some(root.id.clone()),
        );
        let grandchild = TaskStatus::started(
            Operation::CommitExtractSnippets,
            Trackable::commit("ab12f"),
            Some(child.id.clone()),
        );
        let unrelated = TaskStatus::started(Operation::RepositoryPull, Trackable::repository(8), None);
        child.fail("disk full").unwrap();
        root.complete().unwrap();
        for s in [&root, &child, &grandchild, &unrelated] {
            StatusStore::save(&store, s).await.unwrap();
        }

        let tree = load_tree(&store, &Trackable::repository(7)).await.unwrap();
        assert_eq!(tree.len(), 3);

        let lines = render_tree(&tree);
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("repo.clone repository:7 completed 100% [failed]"));
        assert!(lines[1].starts_with("  commit.scan commit:ab12f failed"));
        assert!(lines[1].ends_with("error: disk full"));
        assert!(lines[2].starts_with("    commit.extract_snippets"));
        assert!(lines[2].contains("[pending]"));
    }

    #[test]
    fn orphan_children_render_as_roots() {
        let child = TaskStatus::started(
            Operation::TagScan,
            Trackable::new(TrackableType::Tag, "v1"),
            Some("gone".to_string()),
        );
        let lines = render_tree(std::slice::from_ref(&child));
        assert_eq!(lines, vec!["tag.scan tag:v1 started 0% [pending]".to_string()]);
    }
}
