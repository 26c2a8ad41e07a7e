//! Poll-based pull request build trigger for Bitbucket Server.
//!
//! A [`Poller`] runs one cycle per call to [`Poller::poll_once`]:
//!   * list pull requests of the configured repository
//!   * resolve build targets from title, branch, merge status and comments
//!   * post a start marker for each target and queue it on a [`BuildScheduler`]
//!
//! The build-completion side goes through [`CommentLifecycle`]: finish marker,
//! then optional merge.

pub mod cause;
pub mod config;
pub mod errors;
pub mod lifecycle;
pub mod orchestrator;
pub mod parser;
pub mod poll_log;
pub mod resolver;
pub mod scheduler;
pub mod telemetry;

pub use cause::StashCause;
pub use config::TriggerConfig;
pub use errors::{ConfigError, TriggerError, TriggerResult};
pub use lifecycle::{BuildResult, CommentLifecycle, CompletedBuild, MergeAttempt};
pub use orchestrator::{PollSummary, Poller};
pub use poll_log::PollLog;
pub use resolver::{BuildTarget, BuildTargetResolver, Resolution, SkipReason};
pub use scheduler::{
    BuildScheduler, InMemoryScheduler, ParameterDefinition, ParameterValue, QueuedItem,
    RunningBuild, ScheduleRequest,
};
