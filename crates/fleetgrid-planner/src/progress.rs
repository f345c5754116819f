//! Progress reporting for planner stages and tasks.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use tracing::{error, info};

/// Receives stage and task events as a plan is built.
pub trait ProgressTracker: Send + Sync {
    /// A new stage of `total` tasks begins.
    fn begin_stage(&self, stage: &str, total: usize);

    fn task_started(&self, task: &str);

    /// `error` is set when the task failed.
    fn task_finished(&self, task: &str, error: Option<&str>);
}

/// Run `body` as a tracked task, reporting start and finish.
pub fn track<T, E, F>(tracker: &dyn ProgressTracker, task: &str, body: F) -> Result<T, E>
where
    E: fmt::Display,
    F: FnOnce() -> Result<T, E>,
{
    tracker.task_started(task);
    let result = body();
    match &result {
        Ok(_) => tracker.task_finished(task, None),
        Err(e) => tracker.task_finished(task, Some(&e.to_string())),
    }
    result
}

/// [`track`], also logging the task and any failure.
pub fn track_and_log<T, E, F>(tracker: &dyn ProgressTracker, task: &str, body: F) -> Result<T, E>
where
    E: fmt::Display,
    F: FnOnce() -> Result<T, E>,
{
    info!(task, "starting");
    let result = track(tracker, task, body);
    match &result {
        Ok(_) => info!(task, "finished"),
        Err(e) => error!(task, error = %e, "failed"),
    }
    result
}

/// Reports progress through `tracing` only.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressTracker for TracingProgress {
    fn begin_stage(&self, stage: &str, total: usize) {
        info!(stage, total, "stage started");
    }

    fn task_started(&self, task: &str) {
        tracing::debug!(task, "task started");
    }

    fn task_finished(&self, task: &str, error: Option<&str>) {
        match error {
            None => tracing::debug!(task, "task finished"),
            Some(reason) => tracing::debug!(task, reason, "task failed"),
        }
    }
}

/// A progress event, as captured by [`RecordingProgress`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Stage { name: String, total: usize },
    Started(String),
    Finished { task: String, error: Option<String> },
}

/// Keeps every event in memory, in order.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Names of the stages begun so far.
    pub fn stages(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ProgressEvent::Stage { name, .. } => Some(name),
                _ => None,
            })
            .collect()
    }

    /// Tasks that finished without error.
    pub fn finished_tasks(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ProgressEvent::Finished { task, error: None } => Some(task),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: ProgressEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl ProgressTracker for RecordingProgress {
    fn begin_stage(&self, stage: &str, total: usize) {
        self.push(ProgressEvent::Stage {
            name: stage.to_string(),
            total,
        });
    }

    fn task_started(&self, task: &str) {
        self.push(ProgressEvent::Started(task.to_string()));
    }

    fn task_finished(&self, task: &str, error: Option<&str>) {
        self.push(ProgressEvent::Finished {
            task: task.to_string(),
            error: error.map(str::to_string),
        });
    }
}
