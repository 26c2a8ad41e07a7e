//! Build-target resolution.
//!
//! Decides, per pull request, whether a build is needed. There is no local
//! state: what was already built is re-derived on every poll from this job's
//! marker comments. Everything here is pure and takes comments as data.

use std::collections::BTreeMap;
use std::fmt;

use stash_api::{Comment, MergeStatus, PullRequest};
use tracing::trace;

use crate::config::TriggerConfig;
use crate::errors::ConfigError;
use crate::parser::{BranchFilter, MarkerMatcher, PhraseList, extract_parameters};

/// One unit of work handed to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildTarget {
    pub pull_request: PullRequest,
    /// `p:name=value` parameters from the triggering comment.
    pub additional_parameters: BTreeMap<String, String>,
    /// Comment that requested the build (only-on-comment mode).
    pub command_comment_id: Option<i64>,
}

impl BuildTarget {
    fn new(pull_request: &PullRequest) -> Self {
        Self {
            pull_request: pull_request.clone(),
            additional_parameters: BTreeMap::new(),
            command_comment_id: None,
        }
    }
}

/// Why a pull request produced no build target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NotOpen,
    TitleSkipPhrase,
    BranchNotTargeted(String),
    NotMergeable,
    /// A marker for the current commit pair exists.
    AlreadyBuilt,
    SkipPhraseInComment,
    /// Only-on-comment mode and no un-actioned build command.
    NoBuildCommand,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NotOpen => f.write_str("it is not open"),
            SkipReason::TitleSkipPhrase => f.write_str("its title contains the skip phrase"),
            SkipReason::BranchNotTargeted(branch) => write!(f, "it targets branch {branch}"),
            SkipReason::NotMergeable => f.write_str("it cannot be merged"),
            SkipReason::AlreadyBuilt => f.write_str("its current commits were already built"),
            SkipReason::SkipPhraseInComment => f.write_str("a comment contains the skip phrase"),
            SkipReason::NoBuildCommand => f.write_str("no comment asks for a build"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Skip(SkipReason),
    Build(Vec<BuildTarget>),
}

#[derive(Debug, Clone)]
pub struct BuildTargetResolver {
    markers: MarkerMatcher,
    target_branches: BranchFilter,
    skip_phrases: PhraseList,
    build_phrases: PhraseList,
    check_destination_commit: bool,
    check_mergeable: bool,
    check_not_conflicted: bool,
    only_build_on_comment: bool,
}

impl BuildTargetResolver {
    pub fn new(cfg: &TriggerConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            markers: MarkerMatcher::new(cfg.job_name.clone())?,
            target_branches: cfg.target_branches.clone(),
            skip_phrases: cfg.skip_phrases.clone(),
            build_phrases: cfg.build_phrases.clone(),
            check_destination_commit: cfg.check_destination_commit,
            check_mergeable: cfg.check_mergeable,
            check_not_conflicted: cfg.check_not_conflicted,
            only_build_on_comment: cfg.only_build_on_comment,
        })
    }

    /// Checks that need nothing but the pull request itself.
    pub fn prefilter(&self, pr: &PullRequest) -> Option<SkipReason> {
        if !pr.state.is_open() {
            return Some(SkipReason::NotOpen);
        }
        if self.skip_phrases.matches(&pr.title) {
            return Some(SkipReason::TitleSkipPhrase);
        }
        if !self.target_branches.accepts(&pr.destination.branch) {
            return Some(SkipReason::BranchNotTargeted(pr.destination.branch.clone()));
        }
        None
    }

    /// Logical AND of the enabled merge checks. A probe-only configuration
    /// always passes.
    pub fn merge_gate(&self, status: &MergeStatus) -> bool {
        (!self.check_mergeable || status.can_merge)
            && (!self.check_not_conflicted || !status.conflicted)
    }

    /// Replays the comment thread of an open pull request.
    pub fn resolve(&self, pr: &PullRequest, mut comments: Vec<Comment>) -> Resolution {
        // Newest first; stable, so id-less comments keep server order.
        comments.sort_by(|a, b| b.cmp(a));

        if self.only_build_on_comment {
            self.resolve_on_command(pr, &comments)
        } else {
            self.resolve_legacy(pr, &comments)
        }
    }

    fn resolve_legacy(&self, pr: &PullRequest, comments: &[Comment]) -> Resolution {
        for comment in comments {
            if comment.text.is_empty() {
                continue;
            }

            if let Some((source, destination)) = self.markers.classify(&comment.text).hashes() {
                if self.is_current(pr, source, destination) {
                    trace!(pr = %pr.id, comment_id = ?comment.id, "marker matches current commits");
                    return Resolution::Skip(SkipReason::AlreadyBuilt);
                }
                trace!(pr = %pr.id, comment_id = ?comment.id, "stale marker");
                continue;
            }

            if self.skip_phrases.matches(&comment.text) {
                return Resolution::Skip(SkipReason::SkipPhraseInComment);
            }
            if self.build_phrases.matches(&comment.text) {
                let mut target = BuildTarget::new(pr);
                target.additional_parameters = extract_parameters(&comment.text);
                return Resolution::Build(vec![target]);
            }
        }

        // Nothing decisive: commits never built by this job.
        Resolution::Build(vec![BuildTarget::new(pr)])
    }

    fn resolve_on_command(&self, pr: &PullRequest, comments: &[Comment]) -> Resolution {
        let targets: Vec<BuildTarget> = comments
            .iter()
            .filter(|c| !c.text.is_empty())
            .filter(|c| !self.is_actioned(c))
            .filter(|c| self.build_phrases.matches(&c.text))
            .map(|c| BuildTarget {
                pull_request: pr.clone(),
                additional_parameters: extract_parameters(&c.text),
                command_comment_id: c.id,
            })
            .collect();

        if targets.is_empty() {
            Resolution::Skip(SkipReason::NoBuildCommand)
        } else {
            Resolution::Build(targets)
        }
    }

    /// A comment that is, or was answered by, one of this job's markers.
    fn is_actioned(&self, comment: &Comment) -> bool {
        self.markers.classify(&comment.text).is_marker()
            || comment
                .replies
                .iter()
                .any(|r| self.markers.classify(&r.text).is_marker())
    }

    fn is_current(&self, pr: &PullRequest, source: &str, destination: &str) -> bool {
        source.eq_ignore_ascii_case(&pr.source.latest_commit)
            && (!self.check_destination_commit
                || destination.eq_ignore_ascii_case(&pr.destination.latest_commit))
    }
}
