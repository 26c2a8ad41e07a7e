//! Seam to the host job scheduler.
//!
//! The trigger never runs builds itself. It hands a [`ScheduleRequest`] to a
//! [`BuildScheduler`] and, when superseded work must go, asks the same
//! scheduler to cancel queued items and interrupt running builds.

use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info};

use crate::cause::StashCause;

/// A parameter declared by the job, with its optional default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterDefinition {
    pub name: String,
    pub default_value: Option<String>,
}

impl ParameterDefinition {
    pub fn new(name: impl Into<String>, default_value: Option<&str>) -> Self {
        Self {
            name: name.into(),
            default_value: default_value.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterValue {
    pub name: String,
    pub value: String,
}

impl ParameterValue {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScheduleRequest {
    pub cause: StashCause,
    pub parameters: Vec<ParameterValue>,
    /// Whether the scheduler may fold this request into an equal queued one.
    /// The trigger always sends `false`.
    pub allow_folding: bool,
}

/// Build waiting in the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedItem {
    pub id: u64,
    pub cause: StashCause,
    pub parameters: Vec<ParameterValue>,
}

/// Build currently executing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningBuild {
    pub number: u64,
    pub cause: StashCause,
}

/// Host scheduler operations the trigger relies on.
///
/// Cancellation is fire-and-forget: the trigger neither waits for nor
/// verifies it.
pub trait BuildScheduler {
    /// Parameters declared by the job.
    fn parameter_definitions(&self) -> Vec<ParameterDefinition>;

    /// Enqueues a build; `None` when the scheduler refused it.
    fn schedule_build(&self, request: ScheduleRequest) -> Option<QueuedItem>;

    fn queued_items(&self) -> Vec<QueuedItem>;

    fn cancel_queued_item(&self, item: &QueuedItem);

    fn running_builds(&self) -> Vec<RunningBuild>;

    /// Interrupts a running build, recording it as aborted.
    fn interrupt_running_build(&self, build: &RunningBuild);
}

/// Scheduler that keeps everything in memory. Used for dry runs and tests.
#[derive(Debug, Default)]
pub struct InMemoryScheduler {
    definitions: Vec<ParameterDefinition>,
    state: Mutex<SchedulerState>,
}

#[derive(Debug, Default)]
struct SchedulerState {
    next_id: u64,
    queue: Vec<QueuedItem>,
    running: Vec<RunningBuild>,
    cancelled: Vec<QueuedItem>,
    interrupted: Vec<RunningBuild>,
    reject_all: bool,
}

impl InMemoryScheduler {
    pub fn new(definitions: Vec<ParameterDefinition>) -> Self {
        Self {
            definitions,
            state: Mutex::default(),
        }
    }

    /// Makes every subsequent `schedule_build` fail.
    pub fn reject_all(&self, reject: bool) {
        self.lock().reject_all = reject;
    }

    /// Moves the oldest queued item to the running list, as an executor would.
    pub fn start_next(&self) -> Option<RunningBuild> {
        let mut state = self.lock();
        if state.queue.is_empty() {
            return None;
        }
        let item = state.queue.remove(0);
        let build = RunningBuild {
            number: item.id,
            cause: item.cause,
        };
        state.running.push(build.clone());
        Some(build)
    }

    pub fn cancelled(&self) -> Vec<QueuedItem> {
        self.lock().cancelled.clone()
    }

    pub fn interrupted(&self) -> Vec<RunningBuild> {
        self.lock().interrupted.clone()
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        // State stays consistent even if a holder panicked.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl BuildScheduler for InMemoryScheduler {
    fn parameter_definitions(&self) -> Vec<ParameterDefinition> {
        self.definitions.clone()
    }

    fn schedule_build(&self, request: ScheduleRequest) -> Option<QueuedItem> {
        let mut state = self.lock();
        if state.reject_all {
            return None;
        }
        state.next_id += 1;
        let item = QueuedItem {
            id: state.next_id,
            cause: request.cause,
            parameters: request.parameters,
        };
        info!(
            item = item.id,
            pr = %item.cause.pull_request_id,
            params = item.parameters.len(),
            "build queued"
        );
        state.queue.push(item.clone());
        Some(item)
    }

    fn queued_items(&self) -> Vec<QueuedItem> {
        self.lock().queue.clone()
    }

    fn cancel_queued_item(&self, item: &QueuedItem) {
        let mut state = self.lock();
        if let Some(pos) = state.queue.iter().position(|q| q.id == item.id) {
            let removed = state.queue.remove(pos);
            debug!(item = removed.id, "queued item cancelled");
            state.cancelled.push(removed);
        }
    }

    fn running_builds(&self) -> Vec<RunningBuild> {
        self.lock().running.clone()
    }

    fn interrupt_running_build(&self, build: &RunningBuild) {
        let mut state = self.lock();
        if let Some(pos) = state.running.iter().position(|r| r.number == build.number) {
            let removed = state.running.remove(pos);
            debug!(build = removed.number, "running build interrupted (aborted)");
            state.interrupted.push(removed);
        }
    }
}
