//! Marker and result comments around a build, plus merge-on-success.
//!
//! Start markers are posted while polling; finish markers and merges run from
//! the build-completion callback. Only the start post is fatal (an
//! unannounced build could never be de-duplicated); cleanup and result
//! reporting are best-effort.

use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;

use regex::{Captures, Regex};
use stash_api::{MergeOutcome, PullRequest, StashClient};
use tracing::{debug, info, instrument, warn};

use crate::cause::StashCause;
use crate::config::TriggerConfig;
use crate::errors::{ConfigError, TriggerResult};
use crate::parser::MarkerMatcher;
use crate::poll_log::PollLog;
use crate::resolver::BuildTarget;

static TEMPLATE_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{(\w+)\}|\$(\w+)").expect("valid template variable regex")
});

/// Final result of a completed build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildResult {
    Success,
    Failure,
    Unstable,
    Aborted,
    NotBuilt,
}

impl BuildResult {
    /// Status text shown in the finish marker.
    pub fn label(self) -> &'static str {
        match self {
            BuildResult::Success => "✓ BUILD SUCCESS",
            BuildResult::Failure => "✕ BUILD FAILURE",
            BuildResult::Unstable => "⁉ BUILD UNSTABLE",
            BuildResult::Aborted => "‼ BUILD ABORTED",
            BuildResult::NotBuilt => "✕ BUILD INCOMPLETE",
        }
    }
}

/// What the completion callback reports back for one build.
#[derive(Debug, Clone)]
pub struct CompletedBuild {
    pub cause: StashCause,
    pub result: BuildResult,
    pub build_url: String,
    pub build_number: u64,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeAttempt {
    /// Merge-on-success is off or the build did not succeed.
    NotAttempted,
    Merged,
    /// Server refused the merge; carries its message.
    Rejected(String),
    /// Transport or protocol failure.
    Failed,
}

#[derive(Debug, Clone)]
pub struct CommentLifecycle {
    client: StashClient,
    markers: MarkerMatcher,
    delete_previous_finish_comments: bool,
    merge_on_success: bool,
    build_success_comment: Option<String>,
    build_failed_comment: Option<String>,
}

impl CommentLifecycle {
    pub fn new(client: StashClient, cfg: &TriggerConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            client,
            markers: MarkerMatcher::new(cfg.job_name.clone())?,
            delete_previous_finish_comments: cfg.delete_previous_finish_comments,
            merge_on_success: cfg.merge_on_success,
            build_success_comment: cfg.build_success_comment.clone(),
            build_failed_comment: cfg.build_failed_comment.clone(),
        })
    }

    /// Posts the start marker for `target` and returns its comment id.
    ///
    /// Old finish markers are removed first when configured; failing that is
    /// only logged. An error means the build must not be scheduled.
    #[instrument(skip_all, fields(pr = %target.pull_request.id, job = %self.markers.job()))]
    pub async fn announce_start(
        &self,
        target: &BuildTarget,
        log: &mut PollLog,
    ) -> TriggerResult<Option<i64>> {
        let pr = &target.pull_request;

        if self.delete_previous_finish_comments {
            if let Err(e) = self.purge_finish_markers(pr).await {
                log.log_error(
                    &format!("Cannot delete old \"BuildFinished\" comments for PR #{}", pr.id),
                    &e,
                );
                warn!(error = %e, "cannot delete old finish markers");
            }
        }

        let text = self
            .markers
            .render_started(&pr.source.latest_commit, &pr.destination.latest_commit);
        let posted = match target.command_comment_id {
            Some(parent) => self.client.post_reply(&pr.id, &text, parent).await?,
            None => self.client.post_comment(&pr.id, &text).await?,
        };
        debug!(comment_id = ?posted.id, "start marker posted");
        Ok(posted.id)
    }

    /// Replaces the start marker with a finish marker. Never fails: every
    /// error is logged.
    #[instrument(skip_all, fields(pr = %build.cause.pull_request_id, build = build.build_number))]
    pub async fn announce_finish(&self, build: &CompletedBuild) {
        let cause = &build.cause;

        if let Some(start_id) = cause.build_start_comment_id {
            if let Err(e) = self
                .client
                .delete_comment(&cause.pull_request_id, start_id)
                .await
            {
                warn!(comment_id = start_id, error = %e, "cannot delete start marker");
            }
        }

        let mut text = self.markers.render_finished(
            &cause.source_commit_hash,
            &cause.destination_commit_hash,
            build.result.label(),
            &build.build_url,
            build.build_number,
            &format_duration(build.duration),
        );
        text.push_str(&self.additional_comment(cause, build.result));

        let posted = match cause.build_command_comment_id {
            Some(parent) => {
                self.client
                    .post_reply(&cause.pull_request_id, &text, parent)
                    .await
            }
            None => self.client.post_comment(&cause.pull_request_id, &text).await,
        };
        match posted {
            Ok(c) => debug!(comment_id = ?c.id, result = ?build.result, "finish marker posted"),
            Err(e) => warn!(error = %e, "cannot post finish marker"),
        }
    }

    /// Merges the pull request when configured and the build succeeded.
    #[instrument(skip_all, fields(pr = %build.cause.pull_request_id))]
    pub async fn maybe_merge(&self, build: &CompletedBuild) -> MergeAttempt {
        if !self.merge_on_success || build.result != BuildResult::Success {
            return MergeAttempt::NotAttempted;
        }
        let cause = &build.cause;

        match self
            .client
            .merge(&cause.pull_request_id, &cause.pull_request_version)
            .await
        {
            Ok(MergeOutcome::Merged) => {
                info!(
                    "Merged pull request {}({}) to branch {}",
                    cause.pull_request_id, cause.source_branch, cause.target_branch
                );
                MergeAttempt::Merged
            }
            Ok(MergeOutcome::Rejected(message)) => {
                info!(
                    server_message = %message,
                    "Failed to merge pull request {}({}) to branch {} because it's out of date",
                    cause.pull_request_id,
                    cause.source_branch,
                    cause.target_branch
                );
                MergeAttempt::Rejected(message)
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "Failed to merge pull request {}({}) to branch {}",
                    cause.pull_request_id,
                    cause.source_branch,
                    cause.target_branch
                );
                MergeAttempt::Failed
            }
        }
    }

    /// Build-completion entry point: finish marker, then optional merge.
    pub async fn on_build_completed(&self, build: &CompletedBuild) -> MergeAttempt {
        self.announce_finish(build).await;
        self.maybe_merge(build).await
    }

    async fn purge_finish_markers(&self, pr: &PullRequest) -> TriggerResult<()> {
        let comments = self
            .client
            .list_comments(
                &pr.destination.repository.project_key,
                &pr.destination.repository.slug,
                &pr.id,
            )
            .await?;

        for comment in comments {
            if comment.text.is_empty() || !self.markers.is_finished(&comment.text) {
                continue;
            }
            if let Some(id) = comment.id {
                self.client.delete_comment(&pr.id, id).await?;
                debug!(comment_id = id, "old finish marker deleted");
            }
        }
        Ok(())
    }

    fn additional_comment(&self, cause: &StashCause, result: BuildResult) -> String {
        let template = if result == BuildResult::Success {
            self.build_success_comment.as_deref()
        } else {
            self.build_failed_comment.as_deref()
        };
        let Some(template) = template else {
            return String::new();
        };

        let expanded = expand_template(template, &cause.environment());
        let expanded = expanded.trim();
        if expanded.is_empty() {
            String::new()
        } else {
            format!("\n\n{expanded}")
        }
    }
}

/// Replaces `${name}` and `$name` with values from `vars`; unknown names stay.
pub fn expand_template(template: &str, vars: &BTreeMap<String, String>) -> String {
    TEMPLATE_VAR
        .replace_all(template, |caps: &Captures<'_>| {
            let name = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            match vars.get(name) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Human-readable duration: `1 hr 2 min`, `2 min 3 sec`, `12 sec`,
/// `4.5 sec`, `300 ms`.
pub fn format_duration(d: Duration) -> String {
    let total_ms = d.as_millis();
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms / 60_000) % 60;
    let seconds = (total_ms / 1_000) % 60;

    if hours > 0 {
        format!("{hours} hr {minutes} min")
    } else if minutes > 0 {
        format!("{minutes} min {seconds} sec")
    } else if seconds >= 10 {
        format!("{seconds} sec")
    } else if seconds >= 1 {
        format!("{seconds}.{} sec", (total_ms % 1_000) / 100)
    } else {
        format!("{total_ms} ms")
    }
}
