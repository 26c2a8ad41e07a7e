//! Domain model for pull requests, comments and merge state.
//!
//! These types are produced fresh on every poll cycle and never cached.

use std::cmp::Ordering;

/// Lifecycle state of a pull request as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullRequestState {
    Open,
    Merged,
    Declined,
    /// Any other value, including a missing state.
    Other(String),
}

impl PullRequestState {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("OPEN") => Self::Open,
            Some("MERGED") => Self::Merged,
            Some("DECLINED") => Self::Declined,
            Some(other) => Self::Other(other.to_string()),
            None => Self::Other(String::new()),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

/// Repository owning one side of a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RepositoryRef {
    /// Project (owner) key, e.g. `PROJ` or `~USER`.
    pub project_key: String,
    /// Repository slug.
    pub slug: String,
}

/// Source or destination side of a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Ref {
    /// Branch name with `refs/` and `heads/` prefixes removed.
    pub branch: String,
    /// Latest commit hash on this side.
    pub latest_commit: String,
    pub repository: RepositoryRef,
}

/// An open (or otherwise) pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    /// Server-assigned identifier, stable for the lifetime of the PR.
    pub id: String,
    pub state: PullRequestState,
    pub title: String,
    /// Opaque version token required by the merge endpoint.
    pub version: String,
    pub source: Ref,
    pub destination: Ref,
}

/// A comment on the pull request thread with its direct replies.
///
/// Equality and ordering use only the id. A missing id compares equal to
/// another missing id and sorts before any present id.
#[derive(Debug, Clone)]
pub struct Comment {
    pub id: Option<i64>,
    pub text: String,
    pub replies: Vec<Comment>,
}

impl Comment {
    pub fn new(id: i64, text: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            text: text.into(),
            replies: Vec::new(),
        }
    }

    pub fn with_replies(mut self, replies: Vec<Comment>) -> Self {
        self.replies = replies;
        self
    }
}

impl PartialEq for Comment {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Comment {}

impl PartialOrd for Comment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Comment {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

/// Answer of the merge-status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MergeStatus {
    pub can_merge: bool,
    pub conflicted: bool,
    /// Human-readable veto messages, if any.
    pub vetoes: Vec<String>,
}

/// Domain outcome of a merge request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Merged,
    /// The server refused the merge (e.g. HTTP 409, PR out of date). Carries
    /// the raw server body for logging.
    Rejected(String),
}
