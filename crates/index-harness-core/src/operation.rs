//! The closed operation vocabulary shared by the queue, the handler
//! registry, and every handler.
//!
//! Operations are dotted identifiers (`repo.clone`, `commit.create_bm25_index`).
//! Each one knows which kind of entity its progress is tracked against and
//! which payload fields identify "the same unit of work" for deduplication.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::choreography;
use crate::error::TaskError;

/// The entity a task status describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TrackableType {
    Repository,
    Commit,
    Branch,
    Tag,
    Index,
}

impl TrackableType {
    pub const ALL: [TrackableType; 5] = [
        TrackableType::Repository,
        TrackableType::Commit,
        TrackableType::Branch,
        TrackableType::Tag,
        TrackableType::Index,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackableType::Repository => "repository",
            TrackableType::Commit => "commit",
            TrackableType::Branch => "branch",
            TrackableType::Tag => "tag",
            TrackableType::Index => "index",
        }
    }

    /// Payload field holding the identifier of this kind of entity.
    pub fn id_field(&self) -> &'static str {
        match self {
            TrackableType::Repository => "repo_id",
            TrackableType::Commit => "commit_sha",
            TrackableType::Branch => "branch_name",
            TrackableType::Tag => "tag_name",
            TrackableType::Index => "index_id",
        }
    }
}

impl fmt::Display for TrackableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackableType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TrackableType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| {
                format!(
                    "unknown trackable type '{}'. Must be repository, commit, branch, tag, or index.",
                    s
                )
            })
    }
}

impl Serialize for TrackableType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TrackableType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A member of the closed set of operations the scheduler understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    RepositoryCreate,
    RepositorySync,
    RepositoryClone,
    RepositoryPull,
    RepositoryDelete,
    RepositoryScanBranches,
    RepositoryScanTags,
    CommitIndex,
    CommitEnrich,
    CommitRescan,
    CommitScan,
    CommitExtractSnippets,
    CommitExtractExamples,
    CommitCreateBm25Index,
    CommitCreateCodeEmbeddings,
    CommitCreateSummaryEmbeddings,
    CommitCreateSummaryEnrichment,
    CommitCreateArchitectureEnrichment,
    CommitCreateApiDocsEnrichment,
    CommitCreateCookbookEnrichment,
    CommitCreateDatabaseSchemaEnrichment,
    CommitCreateCommitDescriptionEnrichment,
    CommitDeleteIndex,
    BranchScan,
    TagScan,
    IndexRefresh,
    IndexDelete,
    IndexCompact,
}

const REPOSITORY_FIELDS: &[&str] = &["repo_id"];
const COMMIT_FIELDS: &[&str] = &["repo_id", "commit_sha"];
const BRANCH_FIELDS: &[&str] = &["repo_id", "branch_name"];
const TAG_FIELDS: &[&str] = &["repo_id", "tag_name"];
const INDEX_FIELDS: &[&str] = &["index_id"];

impl Operation {
    pub const ALL: [Operation; 28] = [
        Operation::RepositoryCreate,
        Operation::RepositorySync,
        Operation::RepositoryClone,
        Operation::RepositoryPull,
        Operation::RepositoryDelete,
        Operation::RepositoryScanBranches,
        Operation::RepositoryScanTags,
        Operation::CommitIndex,
        Operation::CommitEnrich,
        Operation::CommitRescan,
        Operation::CommitScan,
        Operation::CommitExtractSnippets,
        Operation::CommitExtractExamples,
        Operation::CommitCreateBm25Index,
        Operation::CommitCreateCodeEmbeddings,
        Operation::CommitCreateSummaryEmbeddings,
        Operation::CommitCreateSummaryEnrichment,
        Operation::CommitCreateArchitectureEnrichment,
        Operation::CommitCreateApiDocsEnrichment,
        Operation::CommitCreateCookbookEnrichment,
        Operation::CommitCreateDatabaseSchemaEnrichment,
        Operation::CommitCreateCommitDescriptionEnrichment,
        Operation::CommitDeleteIndex,
        Operation::BranchScan,
        Operation::TagScan,
        Operation::IndexRefresh,
        Operation::IndexDelete,
        Operation::IndexCompact,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::RepositoryCreate => "repo.create",
            Operation::RepositorySync => "repo.sync",
            Operation::RepositoryClone => "repo.clone",
            Operation::RepositoryPull => "repo.pull",
            Operation::RepositoryDelete => "repo.delete",
            Operation::RepositoryScanBranches => "repo.scan_branches",
            Operation::RepositoryScanTags => "repo.scan_tags",
            Operation::CommitIndex => "commit.index",
            Operation::CommitEnrich => "commit.enrich",
            Operation::CommitRescan => "commit.rescan",
            Operation::CommitScan => "commit.scan",
            Operation::CommitExtractSnippets => "commit.extract_snippets",
            Operation::CommitExtractExamples => "commit.extract_examples",
            Operation::CommitCreateBm25Index => "commit.create_bm25_index",
            Operation::CommitCreateCodeEmbeddings => "commit.create_code_embeddings",
            Operation::CommitCreateSummaryEmbeddings => "commit.create_summary_embeddings",
            Operation::CommitCreateSummaryEnrichment => "commit.create_summary_enrichment",
            Operation::CommitCreateArchitectureEnrichment => {
                "commit.create_architecture_enrichment"
            }
            Operation::CommitCreateApiDocsEnrichment => "commit.create_api_docs_enrichment",
            Operation::CommitCreateCookbookEnrichment => "commit.create_cookbook_enrichment",
            Operation::CommitCreateDatabaseSchemaEnrichment => {
                "commit.create_database_schema_enrichment"
            }
            Operation::CommitCreateCommitDescriptionEnrichment => {
                "commit.create_commit_description_enrichment"
            }
            Operation::CommitDeleteIndex => "commit.delete_index",
            Operation::BranchScan => "branch.scan",
            Operation::TagScan => "tag.scan",
            Operation::IndexRefresh => "index.refresh",
            Operation::IndexDelete => "index.delete",
            Operation::IndexCompact => "index.compact",
        }
    }

    /// Kind of entity whose status this operation reports against.
    pub fn trackable_type(&self) -> TrackableType {
        match self {
            Operation::RepositoryCreate
            | Operation::RepositorySync
            | Operation::RepositoryClone
            | Operation::RepositoryPull
            | Operation::RepositoryDelete
            | Operation::RepositoryScanBranches
            | Operation::RepositoryScanTags => TrackableType::Repository,
            Operation::CommitIndex
            | Operation::CommitEnrich
            | Operation::CommitRescan
            | Operation::CommitScan
            | Operation::CommitExtractSnippets
            | Operation::CommitExtractExamples
            | Operation::CommitCreateBm25Index
            | Operation::CommitCreateCodeEmbeddings
            | Operation::CommitCreateSummaryEmbeddings
            | Operation::CommitCreateSummaryEnrichment
            | Operation::CommitCreateArchitectureEnrichment
            | Operation::CommitCreateApiDocsEnrichment
            | Operation::CommitCreateCookbookEnrichment
            | Operation::CommitCreateDatabaseSchemaEnrichment
            | Operation::CommitCreateCommitDescriptionEnrichment
            | Operation::CommitDeleteIndex => TrackableType::Commit,
            Operation::BranchScan => TrackableType::Branch,
            Operation::TagScan => TrackableType::Tag,
            Operation::IndexRefresh | Operation::IndexDelete | Operation::IndexCompact => {
                TrackableType::Index
            }
        }
    }

    /// Payload fields that identify one logical unit of this operation.
    ///
    /// Two tasks of the same operation whose values for these fields are
    /// equal share a dedup key; every other payload field is ignored.
    pub fn dedup_fields(&self) -> &'static [&'static str] {
        match self.trackable_type() {
            TrackableType::Repository => REPOSITORY_FIELDS,
            TrackableType::Commit => COMMIT_FIELDS,
            TrackableType::Branch => BRANCH_FIELDS,
            TrackableType::Tag => TAG_FIELDS,
            TrackableType::Index => INDEX_FIELDS,
        }
    }

    /// Whether this operation expands into phases instead of running directly.
    pub fn is_composite(&self) -> bool {
        choreography::phases(*self).is_some()
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| TaskError::UnknownOperation(s.to_string()))
    }
}

impl Serialize for Operation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Operation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
