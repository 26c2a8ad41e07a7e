//! Trigger configuration.
//!
//! One [`TriggerConfig`] describes one polled repository and the job it
//! feeds. It is normally read from `STASH_*` environment variables; tests
//! build it with [`TriggerConfig::new`] and adjust the public fields.

use std::time::Duration;

use stash_api::ClientConfig;
use tracing::debug;

use crate::errors::{ConfigError, env_bool, env_opt, env_u64, must_env};
use crate::parser::{BranchFilter, PhraseList};

pub const DEFAULT_SKIP_PHRASES: &str = "NO TEST";
pub const DEFAULT_BUILD_PHRASES: &str = "test this please";

#[derive(Debug, Clone)]
pub struct TriggerConfig {
    /// Server, credentials and repository coordinates.
    pub client: ClientConfig,
    /// Job identity embedded in marker comments.
    pub job_name: String,
    pub target_branches: BranchFilter,
    pub skip_phrases: PhraseList,
    pub build_phrases: PhraseList,

    /// Rebuild when the destination commit moved since the last marker.
    pub check_destination_commit: bool,
    pub check_mergeable: bool,
    pub check_not_conflicted: bool,
    /// Query merge status only to make the server refresh its refs.
    pub check_probe_merge_status: bool,

    pub merge_on_success: bool,
    pub delete_previous_finish_comments: bool,
    pub cancel_outdated_jobs: bool,
    pub only_build_on_comment: bool,

    /// Text appended to the finish marker of a successful build.
    pub build_success_comment: Option<String>,
    /// Text appended to the finish marker of any other build.
    pub build_failed_comment: Option<String>,

    pub poll_interval: Duration,
}

impl TriggerConfig {
    /// Defaults: stock phrases, all branches, probe merge status on,
    /// everything else off, 5 minute poll interval.
    pub fn new(client: ClientConfig, job_name: impl Into<String>) -> Self {
        Self {
            client,
            job_name: job_name.into(),
            target_branches: BranchFilter::default(),
            skip_phrases: PhraseList::parse(DEFAULT_SKIP_PHRASES),
            build_phrases: PhraseList::parse(DEFAULT_BUILD_PHRASES),
            check_destination_commit: false,
            check_mergeable: false,
            check_not_conflicted: false,
            check_probe_merge_status: true,
            merge_on_success: false,
            delete_previous_finish_comments: false,
            cancel_outdated_jobs: false,
            only_build_on_comment: false,
            build_success_comment: None,
            build_failed_comment: None,
            poll_interval: Duration::from_secs(300),
        }
    }

    /// Reads the whole configuration from `STASH_*` variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut client = ClientConfig::new(
            must_env("STASH_HOST")?,
            must_env("STASH_USERNAME")?,
            must_env("STASH_PASSWORD")?,
            must_env("STASH_PROJECT")?,
            must_env("STASH_REPOSITORY")?,
        );
        client.ignore_ssl = env_bool("STASH_IGNORE_SSL", false);
        client.request_timeout = Duration::from_secs(env_u64("STASH_REQUEST_TIMEOUT_SECS", 60)?);
        client.connect_timeout = Duration::from_secs(env_u64("STASH_CONNECT_TIMEOUT_SECS", 15)?);
        client.read_timeout = Duration::from_secs(env_u64("STASH_READ_TIMEOUT_SECS", 30)?);

        let mut cfg = Self::new(client, must_env("STASH_JOB_NAME")?);

        if let Some(raw) = env_opt("STASH_TARGET_BRANCHES") {
            cfg.target_branches = BranchFilter::parse(&raw)?;
        }
        if let Some(raw) = env_opt("STASH_SKIP_PHRASES") {
            cfg.skip_phrases = PhraseList::parse(&raw);
        }
        if let Some(raw) = env_opt("STASH_BUILD_PHRASES") {
            cfg.build_phrases = PhraseList::parse(&raw);
        }

        cfg.check_destination_commit = env_bool("STASH_CHECK_DESTINATION_COMMIT", false);
        cfg.check_mergeable = env_bool("STASH_CHECK_MERGEABLE", false);
        cfg.check_not_conflicted = env_bool("STASH_CHECK_NOT_CONFLICTED", false);
        cfg.check_probe_merge_status = env_bool("STASH_CHECK_PROBE_MERGE_STATUS", true);
        cfg.merge_on_success = env_bool("STASH_MERGE_ON_SUCCESS", false);
        cfg.delete_previous_finish_comments =
            env_bool("STASH_DELETE_PREVIOUS_FINISH_COMMENTS", false);
        cfg.cancel_outdated_jobs = env_bool("STASH_CANCEL_OUTDATED_JOBS", false);
        cfg.only_build_on_comment = env_bool("STASH_ONLY_BUILD_ON_COMMENT", false);

        cfg.build_success_comment = env_opt("STASH_BUILD_SUCCESS_COMMENT");
        cfg.build_failed_comment = env_opt("STASH_BUILD_FAILED_COMMENT");
        cfg.poll_interval = Duration::from_secs(env_u64("STASH_POLL_INTERVAL_SECS", 300)?);

        debug!(
            host = %cfg.client.host,
            project = %cfg.client.project,
            repo = %cfg.client.repository,
            job = %cfg.job_name,
            only_on_comment = cfg.only_build_on_comment,
            "trigger config loaded"
        );
        Ok(cfg)
    }

    /// Whether any flag requires a merge-status call before resolving.
    pub fn needs_merge_status(&self) -> bool {
        self.check_mergeable || self.check_not_conflicted || self.check_probe_merge_status
    }
}
