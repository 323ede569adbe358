//! Prescribed operations: the static table expanding a composite operation
//! into its ordered phases.
//!
//! Each phase carries a priority offset added to the caller's base
//! priority. Offsets strictly decrease along a pipeline, so with the flat
//! `(priority DESC, created_at ASC)` dequeue order earlier phases always
//! run before later ones, and a pipeline started at a higher base priority
//! preempts the remaining phases of a lower one.
//!
//! ```text
//! commit.index @ base 2000
//!   commit.scan                      2060
//!   commit.extract_snippets          2050
//!   commit.extract_examples          2040
//!   commit.create_bm25_index         2030
//!   commit.create_code_embeddings    2020
//!   commit.create_summary_enrichment 2010
//!   commit.create_summary_embeddings 2000
//! ```

use crate::operation::Operation;

/// One step of a composite operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Phase {
    pub operation: Operation,
    pub priority_offset: i64,
}

const fn phase(operation: Operation, priority_offset: i64) -> Phase {
    Phase {
        operation,
        priority_offset,
    }
}

const REPOSITORY_CREATE: &[Phase] = &[
    phase(Operation::RepositoryClone, 20),
    phase(Operation::RepositoryScanBranches, 10),
    phase(Operation::RepositoryScanTags, 0),
];

const REPOSITORY_SYNC: &[Phase] = &[
    phase(Operation::RepositoryPull, 20),
    phase(Operation::RepositoryScanBranches, 10),
    phase(Operation::RepositoryScanTags, 0),
];

const COMMIT_INDEX: &[Phase] = &[
    phase(Operation::CommitScan, 60),
    phase(Operation::CommitExtractSnippets, 50),
    phase(Operation::CommitExtractExamples, 40),
    phase(Operation::CommitCreateBm25Index, 30),
    phase(Operation::CommitCreateCodeEmbeddings, 20),
    phase(Operation::CommitCreateSummaryEnrichment, 10),
    phase(Operation::CommitCreateSummaryEmbeddings, 0),
];

const COMMIT_ENRICH: &[Phase] = &[
    phase(Operation::CommitCreateArchitectureEnrichment, 50),
    phase(Operation::CommitCreateApiDocsEnrichment, 40),
    phase(Operation::CommitCreateCookbookEnrichment, 30),
    phase(Operation::CommitCreateDatabaseSchemaEnrichment, 20),
    phase(Operation::CommitCreateCommitDescriptionEnrichment, 10),
    phase(Operation::CommitCreateSummaryEnrichment, 0),
];

const COMMIT_RESCAN: &[Phase] = &[
    phase(Operation::CommitDeleteIndex, 70),
    phase(Operation::CommitScan, 60),
    phase(Operation::CommitExtractSnippets, 50),
    phase(Operation::CommitExtractExamples, 40),
    phase(Operation::CommitCreateBm25Index, 30),
    phase(Operation::CommitCreateCodeEmbeddings, 20),
    phase(Operation::CommitCreateSummaryEnrichment, 10),
    phase(Operation::CommitCreateSummaryEmbeddings, 0),
];

/// Phases of `operation`, or `None` if it is not composite.
pub fn phases(operation: Operation) -> Option<&'static [Phase]> {
    match operation {
        Operation::RepositoryCreate => Some(REPOSITORY_CREATE),
        Operation::RepositorySync => Some(REPOSITORY_SYNC),
        Operation::CommitIndex => Some(COMMIT_INDEX),
        Operation::CommitEnrich => Some(COMMIT_ENRICH),
        Operation::CommitRescan => Some(COMMIT_RESCAN),
        _ => None,
    }
}

/// All composite operations, in vocabulary order.
pub fn composites() -> impl Iterator<Item = Operation> {
    Operation::ALL.into_iter().filter(|op| phases(*op).is_some())
}

/// Expand `operation` into `(phase operation, absolute priority)` pairs.
pub fn expand(operation: Operation, base_priority: i64) -> Option<Vec<(Operation, i64)>> {
    phases(operation).map(|ps| {
        ps.iter()
            .map(|p| (p.operation, base_priority.saturating_add(p.priority_offset)))
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_strictly_decrease_in_every_pipeline() {
        for op in composites() {
            let ps = phases(op).unwrap();
            assert!(!ps.is_empty(), "{} has no phases", op);
            for pair in ps.windows(2) {
                assert!(
                    pair[0].priority_offset > pair[1].priority_offset,
                    "{}: {} (+{}) does not outrank {} (+{})",
                    op,
                    pair[0].operation,
                    pair[0].priority_offset,
                    pair[1].operation,
                    pair[1].priority_offset
                );
            }
        }
    }

    #[test]
    fn phases_are_never_composite() {
        for op in composites() {
            for p in phases(op).unwrap() {
                assert!(!p.operation.is_composite(), "{} nests {}", op, p.operation);
            }
        }
    }

    #[test]
    fn phases_share_the_composite_scope() {
        for op in composites() {
            for p in phases(op).unwrap() {
                assert_eq!(p.operation.trackable_type(), op.trackable_type());
            }
        }
    }

    #[test]
    fn offsets_stay_below_tier_gap() {
        use crate::task::QueuePriority;
        let gap = QueuePriority::NORMAL - QueuePriority::BACKGROUND;
        for op in composites() {
            for p in phases(op).unwrap() {
                assert!(p.priority_offset >= 0 && p.priority_offset < gap);
            }
        }
    }

    #[test]
    fn expand_adds_base_priority() {
        let expanded = expand(Operation::RepositoryCreate, 50).unwrap();
        assert_eq!(
            expanded,
            vec![
                (Operation::RepositoryClone, 70),
                (Operation::RepositoryScanBranches, 60),
                (Operation::RepositoryScanTags, 50),
            ]
        );
        assert!(expand(Operation::RepositoryClone, 50).is_none());
    }

    #[test]
    fn five_composites() {
        assert_eq!(composites().count(), 5);
    }
}
