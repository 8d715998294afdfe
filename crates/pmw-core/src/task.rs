//! Task record (spec §4.2, C2).

use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::backend::{Backend, WorkerHandle};
use crate::bundle::PreparedBundle;
use crate::error::PmwError;

/// Either a registered handler bundle or an opaque external program path.
#[derive(Debug, Clone)]
pub enum TaskPayload {
    /// A registered handler plus its packaged closure (modules/data files).
    Handler {
        /// The handler name registered in a [`crate::worker_proto::HandlerTable`].
        handler: &'static str,
        /// The prepared bundle (descriptor + archives), if any was needed.
        bundle: Option<PreparedBundle>,
    },
    /// An opaque external program, run as a separate process by the backend.
    ExternalProgram(PathBuf),
    /// The synthetic composite task created by the map-reduce orchestrator.
    /// Has no executable of its own and is finished directly by that
    /// orchestrator rather than by a backend.
    Composite,
}

/// Lifecycle state (spec §3 invariants: Submitted -> Running -> (Finished | Error), monotonic).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Enqueued, not yet dispatched.
    Submitted,
    /// Dispatched to a backend/worker.
    Running,
    /// Completed successfully; `output` is set.
    Finished,
    /// Completed with an error; `error` is set.
    Error,
}

/// The decoded result of a finished task.
#[derive(Debug, Clone)]
pub enum TaskOutput {
    /// A single task's result plus its captured stdout/stderr.
    Single {
        /// The handler's (still-encoded) return value.
        result: Vec<u8>,
        /// Captured standard output from the worker run.
        stdout: String,
        /// Captured standard error from the worker run.
        stderr: String,
    },
    /// The aggregated reduce outputs of a composite map-reduce task.
    Many(Vec<Vec<u8>>),
}

struct TaskInner {
    lifecycle: Lifecycle,
    execute_time: Option<DateTime<Utc>>,
    finish_time: Option<DateTime<Utc>>,
    output: Option<TaskOutput>,
    error: Option<PmwError>,
    assigned_worker: Option<WorkerHandle>,
    release: Option<Box<dyn FnOnce(WorkerHandle) + Send>>,
}

/// A unit of work: a payload, its input/output file bindings, timing, and a
/// one-shot completion latch. Always shared behind `Arc<Task>`.
pub struct Task {
    name: String,
    payload: TaskPayload,
    input_path: PathBuf,
    output_path: PathBuf,
    submit_time: DateTime<Utc>,
    backend: Arc<dyn Backend>,
    state: Mutex<TaskInner>,
    done: Condvar,
    on_finish: Box<dyn Fn(Arc<Task>) + Send + Sync>,
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}
impl Eq for Task {}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task").field("name", &self.name).finish()
    }
}

impl Task {
    /// Construct a new, `Submitted` task. `on_finish` is invoked once, at
    /// the end of `finish`, to append this task to the owning master's
    /// finished list (kept as a callback so this module does not need to
    /// depend on `crate::master`).
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: String,
        payload: TaskPayload,
        input_path: PathBuf,
        output_path: PathBuf,
        backend: Arc<dyn Backend>,
        on_finish: Box<dyn Fn(Arc<Task>) + Send + Sync>,
    ) -> Arc<Task> {
        Arc::new(Task {
            name,
            payload,
            input_path,
            output_path,
            submit_time: Utc::now(),
            backend,
            state: Mutex::new(TaskInner {
                lifecycle: Lifecycle::Submitted,
                execute_time: None,
                finish_time: None,
                output: None,
                error: None,
                assigned_worker: None,
                release: None,
            }),
            done: Condvar::new(),
            on_finish,
        })
    }

    /// The task's stable identity (function name + start-time tag + counter).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The task's payload descriptor.
    pub fn payload(&self) -> &TaskPayload {
        &self.payload
    }

    /// Path to the serialized input blob.
    pub fn input_path(&self) -> &std::path::Path {
        &self.input_path
    }

    /// Path the worker is expected to write its serialized output to.
    pub fn output_path(&self) -> &std::path::Path {
        &self.output_path
    }

    /// When the task was submitted.
    pub fn submit_time(&self) -> DateTime<Utc> {
        self.submit_time
    }

    /// When the task started executing, if it has.
    pub fn execute_time(&self) -> Option<DateTime<Utc>> {
        self.lock().execute_time
    }

    /// When the task finished, if it has.
    pub fn finish_time(&self) -> Option<DateTime<Utc>> {
        self.lock().finish_time
    }

    /// Time from submission to completion; `None` until finished.
    pub fn total_time(&self) -> Option<Duration> {
        let state = self.lock();
        let finish = state.finish_time?;
        (finish - self.submit_time).to_std().ok()
    }

    /// Time from start of execution to completion; `None` until finished.
    pub fn execution_time(&self) -> Option<Duration> {
        let state = self.lock();
        let finish = state.finish_time?;
        let execute = state.execute_time?;
        (finish - execute).to_std().ok()
    }

    /// Coarse progress in `[0, 1]`: `0.0` while queued/running/errored, `1.0`
    /// once finished successfully (matches the original's `get_progress`,
    /// which only special-cases `TASK_FINISHED`).
    pub fn progress(&self) -> f64 {
        match self.lock().lifecycle {
            Lifecycle::Finished => 1.0,
            _ => 0.0,
        }
    }

    /// Current lifecycle state.
    pub fn lifecycle(&self) -> Lifecycle {
        self.lock().lifecycle
    }

    /// Whether the task reached a terminal state.
    pub fn is_done(&self) -> bool {
        matches!(self.lifecycle(), Lifecycle::Finished | Lifecycle::Error)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TaskInner> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Called by the scheduler immediately before dispatch: records
    /// `execute_time` and transitions `Submitted -> Running`.
    pub(crate) fn mark_running(self: &Arc<Self>, worker: WorkerHandle, release: Box<dyn FnOnce(WorkerHandle) + Send>) {
        let mut state = self.lock();
        state.lifecycle = Lifecycle::Running;
        state.execute_time = Some(Utc::now());
        state.assigned_worker = Some(worker);
        state.release = Some(release);
    }

    /// Called by the backend (or the map-reduce orchestrator, for the
    /// composite task) exactly once on any exit path. Implements the
    /// finish protocol of spec §4.2.
    pub fn finish(self: &Arc<Self>, err: Option<PmwError>, result: Option<TaskOutput>) {
        let (worker, release) = {
            let mut state = self.lock();

            if let Some(err) = err {
                state.error = Some(err);
            } else if let Some(result) = result {
                state.output = Some(result);
            } else {
                match self.backend.master_read(&self.output_path) {
                    Ok(output) => state.output = Some(output),
                    Err(_) => {
                        state.error = Some(PmwError::serialization(
                            self.output_path.clone(),
                            anyhow::anyhow!(
                                "Error reading task result {}",
                                self.output_path.display()
                            ),
                        ))
                    }
                }
            }

            state.finish_time = Some(Utc::now());
            state.lifecycle = if state.error.is_some() {
                Lifecycle::Error
            } else {
                Lifecycle::Finished
            };

            (state.assigned_worker.take(), state.release.take())
        };

        (self.on_finish)(self.clone());
        self.done.notify_all();

        if let (Some(worker), Some(release)) = (worker, release) {
            release(worker);
        }
    }

    /// Block the calling thread until the completion latch fires.
    pub fn await_done(&self) {
        let mut state = self.lock();
        while !matches!(state.lifecycle, Lifecycle::Finished | Lifecycle::Error) {
            state = self.done.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// The error slot, if the task ended in `Error`.
    pub fn error(&self) -> Option<PmwError> {
        self.lock().error.clone()
    }

    /// The output slot, if the task ended in `Finished`. Returned by value
    /// since `TaskOutput` is cheap to clone-by-move here (taken, not cloned).
    pub(crate) fn take_output(&self) -> Option<TaskOutput> {
        self.lock().output.take()
    }

    /// Remove input/output files. Missing files are not an error.
    pub(crate) fn cleanup_files(&self, delete_files: bool) {
        if !delete_files {
            return;
        }
        let _ = std::fs::remove_file(&self.input_path);
        let _ = std::fs::remove_file(&self.output_path);
    }
}
