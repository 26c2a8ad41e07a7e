//! Build cause: everything a scheduled build knows about its pull request.

use std::collections::BTreeMap;

use crate::resolver::BuildTarget;
use crate::scheduler::{ParameterDefinition, ParameterValue};

/// Record attached to every scheduled build and handed back on completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StashCause {
    /// Server root without trailing `/`.
    pub host: String,
    pub source_branch: String,
    pub target_branch: String,
    pub source_repository_owner: String,
    pub source_repository_name: String,
    pub pull_request_id: String,
    pub destination_repository_owner: String,
    pub destination_repository_name: String,
    pub pull_request_title: String,
    pub source_commit_hash: String,
    pub destination_commit_hash: String,
    /// Start marker posted for this build.
    pub build_start_comment_id: Option<i64>,
    pub build_command_comment_id: Option<i64>,
    pub pull_request_version: String,
    pub additional_parameters: BTreeMap<String, String>,
}

impl StashCause {
    pub fn from_target(host: &str, target: &BuildTarget, start_comment_id: Option<i64>) -> Self {
        let pr = &target.pull_request;
        Self {
            host: host.trim_end_matches('/').to_string(),
            source_branch: pr.source.branch.clone(),
            target_branch: pr.destination.branch.clone(),
            source_repository_owner: pr.source.repository.project_key.clone(),
            source_repository_name: pr.source.repository.slug.clone(),
            pull_request_id: pr.id.clone(),
            destination_repository_owner: pr.destination.repository.project_key.clone(),
            destination_repository_name: pr.destination.repository.slug.clone(),
            pull_request_title: pr.title.clone(),
            source_commit_hash: pr.source.latest_commit.clone(),
            destination_commit_hash: pr.destination.latest_commit.clone(),
            build_start_comment_id: start_comment_id,
            build_command_comment_id: target.command_comment_id,
            pull_request_version: pr.version.clone(),
            additional_parameters: target.additional_parameters.clone(),
        }
    }

    /// Fixed variables exported to the build. They take precedence over
    /// comment-supplied parameters of the same name.
    pub fn environment(&self) -> BTreeMap<String, String> {
        [
            ("sourceBranch", &self.source_branch),
            ("targetBranch", &self.target_branch),
            ("sourceRepositoryOwner", &self.source_repository_owner),
            ("sourceRepositoryName", &self.source_repository_name),
            ("pullRequestId", &self.pull_request_id),
            ("destinationRepositoryOwner", &self.destination_repository_owner),
            ("destinationRepositoryName", &self.destination_repository_name),
            ("pullRequestTitle", &self.pull_request_title),
            ("sourceCommitHash", &self.source_commit_hash),
            ("destinationCommitHash", &self.destination_commit_hash),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
    }

    /// Two causes describe the same work when PR id and source repository
    /// name are equal. Used to cancel superseded builds.
    pub fn matches(&self, other: &StashCause) -> bool {
        self.pull_request_id == other.pull_request_id
            && self.source_repository_name == other.source_repository_name
    }

    /// HTML link used as build description.
    pub fn short_description(&self) -> String {
        format!(
            "<a href=\"{}/projects/{}/repos/{}/pull-requests/{}\" >PR #{} {} </a>",
            self.host,
            self.destination_repository_owner,
            self.destination_repository_name,
            self.pull_request_id,
            self.pull_request_id,
            self.pull_request_title
        )
    }

    /// Values for the job's declared parameters: fixed environment first,
    /// then comment parameters, then the job default. Parameters with no
    /// value from any source are omitted.
    pub fn compute_parameters(&self, definitions: &[ParameterDefinition]) -> Vec<ParameterValue> {
        let env = self.environment();
        definitions
            .iter()
            .filter_map(|def| {
                let value = env
                    .get(&def.name)
                    .or_else(|| self.additional_parameters.get(&def.name))
                    .cloned()
                    .or_else(|| def.default_value.clone())?;
                Some(ParameterValue {
                    name: def.name.clone(),
                    value,
                })
            })
            .collect()
    }
}
