//! One poll cycle: list pull requests, resolve targets, announce and queue.
//!
//! A cycle never fails as a whole. Every error is logged and turns into a
//! skipped pull request or a dropped target; the next cycle retries.

use std::time::Instant;

use stash_api::{PullRequest, StashClient};
use tracing::{debug, info, instrument, warn};

use crate::cause::StashCause;
use crate::config::TriggerConfig;
use crate::errors::TriggerResult;
use crate::lifecycle::{CommentLifecycle, format_duration};
use crate::poll_log::PollLog;
use crate::resolver::{BuildTarget, BuildTargetResolver, Resolution, SkipReason};
use crate::scheduler::{BuildScheduler, ScheduleRequest};

/// Counters of one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub pull_requests: usize,
    pub targets: usize,
    pub queued: usize,
    /// Targets dropped because the start marker could not be posted.
    pub dropped: usize,
    /// Targets the scheduler refused.
    pub rejected: usize,
}

pub struct Poller<S> {
    client: StashClient,
    host: String,
    job: String,
    resolver: BuildTargetResolver,
    lifecycle: CommentLifecycle,
    scheduler: S,
    needs_merge_status: bool,
    cancel_outdated_jobs: bool,
    log: PollLog,
}

impl<S: BuildScheduler> Poller<S> {
    pub fn new(cfg: &TriggerConfig, scheduler: S) -> TriggerResult<Self> {
        let client = StashClient::new(cfg.client.clone())?;
        Ok(Self {
            lifecycle: CommentLifecycle::new(client.clone(), cfg)?,
            resolver: BuildTargetResolver::new(cfg)?,
            client,
            host: cfg.client.host.clone(),
            job: cfg.job_name.clone(),
            scheduler,
            needs_merge_status: cfg.needs_merge_status(),
            cancel_outdated_jobs: cfg.cancel_outdated_jobs,
            log: PollLog::new(),
        })
    }

    /// Lifecycle handle for the build-completion callback.
    pub fn lifecycle(&self) -> &CommentLifecycle {
        &self.lifecycle
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    /// Lines of the most recent cycle.
    pub fn last_poll_log(&self) -> &[String] {
        self.log.lines()
    }

    #[instrument(skip_all, fields(job = %self.job))]
    pub async fn poll_once(&mut self) -> PollSummary {
        let started = Instant::now();
        self.log.reset();
        self.log
            .log(format!("{}: poll started", PollLog::timestamp()));

        let pull_requests = match self.client.list_pull_requests().await {
            Ok(prs) => prs,
            Err(e) => {
                self.log.log_error("Cannot fetch pull request list", &e);
                warn!(error = %e, "cannot fetch pull request list");
                Vec::new()
            }
        };
        self.log.log(format!(
            "Number of open pull requests: {}",
            pull_requests.len()
        ));

        let mut targets = Vec::new();
        for pr in &pull_requests {
            targets.extend(self.build_targets(pr).await);
        }
        self.log.log(format!(
            "Number of build targets to be built: {}",
            targets.len()
        ));

        let mut summary = PollSummary {
            pull_requests: pull_requests.len(),
            targets: targets.len(),
            ..PollSummary::default()
        };
        for target in targets {
            self.start_build(target, &mut summary).await;
        }

        let elapsed = format_duration(started.elapsed());
        self.log.log(format!(
            "{}: poll completed in {}",
            PollLog::timestamp(),
            elapsed
        ));
        info!(
            pull_requests = summary.pull_requests,
            targets = summary.targets,
            queued = summary.queued,
            dropped = summary.dropped,
            rejected = summary.rejected,
            elapsed = %elapsed,
            "poll completed"
        );
        summary
    }

    async fn build_targets(&mut self, pr: &PullRequest) -> Vec<BuildTarget> {
        if let Some(reason) = self.resolver.prefilter(pr) {
            self.log_skip(pr, &reason);
            return Vec::new();
        }

        if self.needs_merge_status {
            match self.client.merge_status(&pr.id).await {
                Ok(status) if self.resolver.merge_gate(&status) => {}
                Ok(status) => {
                    debug!(pr = %pr.id, vetoes = ?status.vetoes, "merge checks failed");
                    self.log_skip(pr, &SkipReason::NotMergeable);
                    return Vec::new();
                }
                Err(e) => {
                    self.log.log_error(
                        &format!("Cannot determine if PR #{} can be merged, not building", pr.id),
                        &e,
                    );
                    warn!(pr = %pr.id, error = %e, "cannot fetch merge status");
                    return Vec::new();
                }
            }
        }

        let comments = match self
            .client
            .list_comments(
                &pr.destination.repository.project_key,
                &pr.destination.repository.slug,
                &pr.id,
            )
            .await
        {
            Ok(c) => c,
            Err(e) => {
                self.log.log_error(
                    &format!("Cannot read comments for PR #{}, not building", pr.id),
                    &e,
                );
                warn!(pr = %pr.id, error = %e, "cannot read pull request comments");
                return Vec::new();
            }
        };

        match self.resolver.resolve(pr, comments) {
            Resolution::Build(targets) => {
                debug!(pr = %pr.id, count = targets.len(), "build targets resolved");
                targets
            }
            Resolution::Skip(reason) => {
                self.log_skip(pr, &reason);
                Vec::new()
            }
        }
    }

    async fn start_build(&mut self, target: BuildTarget, summary: &mut PollSummary) {
        let pr_id = target.pull_request.id.clone();

        let start_comment_id = match self.lifecycle.announce_start(&target, &mut self.log).await {
            Ok(id) => id,
            Err(e) => {
                self.log.log_error(
                    &format!("Cannot post \"BuildStarted\" comment for PR #{pr_id}, not building"),
                    &e,
                );
                warn!(pr = %pr_id, error = %e, "cannot post start marker, not building");
                summary.dropped += 1;
                return;
            }
        };

        let cause = StashCause::from_target(&self.host, &target, start_comment_id);
        let parameters = cause.compute_parameters(&self.scheduler.parameter_definitions());

        if self.cancel_outdated_jobs {
            self.cancel_outdated(&cause);
        }

        let request = ScheduleRequest {
            cause,
            parameters,
            allow_folding: false,
        };
        match self.scheduler.schedule_build(request) {
            Some(item) => {
                self.log.log(format!("Queued job for PR #{pr_id}"));
                info!(pr = %pr_id, item = item.id, "queued job");
                summary.queued += 1;
            }
            None => {
                self.log.log(format!("Failed to queue job for PR #{pr_id}"));
                warn!(pr = %pr_id, "failed to queue job");
                summary.rejected += 1;
            }
        }
    }

    /// Cancels queued items and interrupts running builds for the same PR.
    fn cancel_outdated(&self, cause: &StashCause) {
        for item in self.scheduler.queued_items() {
            if item.cause.matches(cause) {
                info!(pr = %cause.pull_request_id, item = item.id, "canceling item in queue");
                self.scheduler.cancel_queued_item(&item);
            }
        }
        for build in self.scheduler.running_builds() {
            if build.cause.matches(cause) {
                info!(pr = %cause.pull_request_id, build = build.number, "aborting outdated build");
                self.scheduler.interrupt_running_build(&build);
            }
        }
    }

    fn log_skip(&mut self, pr: &PullRequest, reason: &SkipReason) {
        debug!(pr = %pr.id, %reason, "not building");
        if *reason != SkipReason::NotOpen {
            self.log
                .log(format!("Not building PR #{} as {}", pr.id, reason));
        }
    }
}
