//! Bitbucket Server (Stash) REST client used by the pull request build trigger.
//!
//! Exposes a single [`StashClient`] that lists pull requests and their comment
//! activity, posts and deletes comments, and queries or performs merges. Every
//! call is bounded by a hard deadline and yields a typed [`StashApiError`].

mod client;
mod errors;
mod types;

pub use client::{ClientConfig, StashClient};
pub use errors::{StashApiError, StashApiResult};
pub use types::{
    Comment, MergeOutcome, MergeStatus, PullRequest, PullRequestState, Ref, RepositoryRef,
};
