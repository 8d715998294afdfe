//! Master facade (spec §4.6, C6): the crate's main entry point.

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::backend::Backend;
use crate::bundle::{BundleGenerator, FunctionBundle, PreparedBundle};
use crate::error::PmwError;
use crate::events::{EventBus, MasterEvent};
use crate::scheduler::{MatchFn, Scheduler, default_match_fn};
use crate::task::{Task, TaskOutput, TaskPayload};
use crate::tasklist::TaskList;

/// What a task should run: a registered handler, or an external program.
#[derive(Debug, Clone)]
pub enum Executable {
    /// A registered handler plus its packaged extras.
    Handler(FunctionBundle),
    /// A standalone program the backend is expected to invoke directly.
    ExternalProgram(PathBuf),
}

/// A task submission: what to run and its pre-encoded positional input.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    /// The handler or program to run.
    pub executable: Executable,
    /// Positional arguments, each already encoded by a caller-side helper.
    pub input: Vec<Vec<u8>>,
    /// Whether `input` should be written to a file rather than passed
    /// inline (mirrors the original's `input_data` vs. file-based input).
    pub input_from_file: bool,
}

/// A registered handler name, wrapped so it can be named through
/// [`TaskSpec::from_dynamic`]'s `&dyn Any` boundary without colliding with
/// a bare `&str` (which `from_dynamic` treats as an external program path).
#[derive(Debug, Clone, Copy)]
pub struct HandlerRef(pub &'static str);

impl TaskSpec {
    /// A handler-backed task with no extra modules or data files.
    pub fn handler(handler: &'static str, input: Vec<Vec<u8>>) -> Self {
        TaskSpec {
            executable: Executable::Handler(FunctionBundle::new(handler)),
            input,
            input_from_file: false,
        }
    }

    /// Build a `TaskSpec` from a dynamically-typed executable value, for a
    /// boundary that cannot express [`Executable`] statically (e.g. a
    /// scripting front-end deserializing a driver's request). Accepts a
    /// [`HandlerRef`] or a path-like (`PathBuf`/`&str`) value; anything else
    /// fails with [`PmwError::BadExecutableKind`], giving that error a
    /// concrete, reachable call site rather than leaving it as dead code
    /// under the statically-typed [`Executable`] enum.
    pub fn from_dynamic(
        value: &dyn std::any::Any,
        input: Vec<Vec<u8>>,
        input_from_file: bool,
    ) -> Result<Self, PmwError> {
        let executable = if let Some(handler) = value.downcast_ref::<HandlerRef>() {
            Executable::Handler(FunctionBundle::new(handler.0))
        } else if let Some(path) = value.downcast_ref::<PathBuf>() {
            Executable::ExternalProgram(path.clone())
        } else if let Some(path) = value.downcast_ref::<&str>() {
            Executable::ExternalProgram(PathBuf::from(path))
        } else if let Some(path) = value.downcast_ref::<String>() {
            Executable::ExternalProgram(PathBuf::from(path))
        } else {
            return Err(PmwError::BadExecutableKind);
        };

        Ok(TaskSpec {
            executable,
            input,
            input_from_file,
        })
    }
}

/// Which finished task(s) a caller is waiting for.
#[derive(Clone)]
pub enum TaskSelector {
    /// The next task to finish, regardless of which one it is.
    Any,
    /// A specific task.
    One(Arc<Task>),
    /// Any task among this set.
    Many(Vec<Arc<Task>>),
}

/// Tunables for a [`Master`].
#[derive(Clone)]
pub struct MasterOptions {
    /// Whether `shutdown` removes generated input/output/bundle files.
    pub delete_files: bool,
    /// Directory task input/output/bundle files are written under.
    pub task_dir: PathBuf,
    /// Override for the default first-task/first-worker matching policy.
    pub match_fn: Option<MatchFn>,
}

impl Default for MasterOptions {
    fn default() -> Self {
        MasterOptions {
            delete_files: true,
            task_dir: PathBuf::from("tasks"),
            match_fn: None,
        }
    }
}

/// A point-in-time view of the master's state, merged with backend status.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StatusSnapshot {
    /// Backend-reported key/value status (opaque to the core).
    pub interface_status: serde_json::Map<String, serde_json::Value>,
    /// One summary entry per submitted task.
    pub tasks: Vec<TaskSummary>,
}

/// A per-task line in a [`StatusSnapshot`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct TaskSummary {
    /// The task's identity string.
    pub name: String,
    /// `"submitted"`, `"running"`, `"finished"`, or `"error"`.
    pub state: &'static str,
}

struct MasterInner {
    backend: Arc<dyn Backend>,
    options: MasterOptions,
    submitted: Mutex<Vec<Arc<Task>>>,
    finished: Arc<TaskList<Option<Arc<Task>>>>,
    queued: Arc<TaskList<Option<Arc<Task>>>>,
    scheduler: Arc<Scheduler>,
    bundles: BundleGenerator,
    start_time: String,
    counter: AtomicU64,
    events: EventBus,
}

/// The master-side API: submit tasks, retrieve results, inspect status.
///
/// Cheaply cloneable; every clone shares the same underlying queue,
/// scheduler, and backend.
#[derive(Clone)]
pub struct Master {
    inner: Arc<MasterInner>,
}

impl Master {
    /// A master with default options (`tasks/` scratch dir, files deleted
    /// on shutdown, first-task/first-worker matching).
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Master::with_options(backend, MasterOptions::default())
    }

    /// A master with explicit options.
    pub fn with_options(backend: Arc<dyn Backend>, options: MasterOptions) -> Self {
        let queued: Arc<TaskList<Option<Arc<Task>>>> = Arc::new(TaskList::new());
        let match_fn = options.match_fn.clone().unwrap_or_else(|| Arc::new(default_match_fn));
        let scheduler = Scheduler::new(backend.clone(), queued.clone(), match_fn);

        Master {
            inner: Arc::new(MasterInner {
                backend,
                options,
                submitted: Mutex::new(Vec::new()),
                finished: Arc::new(TaskList::new()),
                queued,
                scheduler,
                bundles: BundleGenerator::new(),
                start_time: Utc::now().format("%Y%m%d%H%M%S%f").to_string(),
                counter: AtomicU64::new(0),
                events: EventBus::default(),
            }),
        }
    }

    /// The scratch directory task files are written under.
    pub fn task_dir(&self) -> &Path {
        &self.inner.options.task_dir
    }

    /// Subscribe to this master's internal diagnostic events (task
    /// terminations, best-effort failures). Each subscriber gets its own
    /// queue; a dropped receiver is pruned on the next emission.
    pub fn subscribe(&self) -> Receiver<MasterEvent> {
        self.inner.events.subscribe()
    }

    /// Submit a task, writing its input and enqueuing it before returning.
    pub fn submit_task(&self, spec: TaskSpec) -> Result<Arc<Task>, PmwError> {
        let index = self.inner.counter.fetch_add(1, Ordering::SeqCst);

        let (name, payload) = match &spec.executable {
            Executable::Handler(bundle) => {
                let name = format!("{}_{}_{}", bundle.handler, self.inner.start_time, index);
                let prepared: PreparedBundle = self.inner.bundles.prepare(
                    bundle,
                    &self.inner.options.task_dir,
                    &self.inner.start_time,
                    spec.input_from_file,
                )?;
                (
                    name,
                    TaskPayload::Handler {
                        handler: bundle.handler,
                        bundle: Some(prepared),
                    },
                )
            }
            Executable::ExternalProgram(path) => {
                let name = format!("program_{}_{}", self.inner.start_time, index);
                (name, TaskPayload::ExternalProgram(path.clone()))
            }
        };

        std::fs::create_dir_all(&self.inner.options.task_dir)
            .map_err(|e| PmwError::serialization(&self.inner.options.task_dir, e))?;

        let input_path = self.inner.options.task_dir.join(format!("in_{name}.dat"));
        let output_path = self.inner.options.task_dir.join(format!("out_{name}.dat"));

        self.inner.backend.master_write(&spec.input, &input_path)?;

        let finished = self.inner.finished.clone();
        let inner = self.inner.clone();
        let task = Task::new(
            name,
            payload,
            input_path,
            output_path,
            self.inner.backend.clone(),
            Box::new(move |task| {
                inner.events.emit(MasterEvent::TaskFinished {
                    name: task.name().to_string(),
                    errored: task.error().is_some(),
                });
                finished.append(Some(task));
            }),
        );

        self.inner
            .submitted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(task.clone());
        self.inner.queued.append(Some(task.clone()));
        self.inner.scheduler.start();

        Ok(task)
    }

    /// Append an already-constructed task directly to the submitted list
    /// without enqueueing it for dispatch. Used by the map-reduce
    /// orchestrator for its synthetic composite task.
    pub(crate) fn register_composite_task(&self, task: Arc<Task>) {
        self.inner
            .submitted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(task);
    }

    pub(crate) fn backend(&self) -> Arc<dyn Backend> {
        self.inner.backend.clone()
    }

    pub(crate) fn finished_list(&self) -> Arc<TaskList<Option<Arc<Task>>>> {
        self.inner.finished.clone()
    }

    fn validate_selector(&self, tasks: &TaskSelector) -> Result<Vec<Arc<Task>>, PmwError> {
        let submitted = self.inner.submitted.lock().unwrap_or_else(|e| e.into_inner());
        if submitted.is_empty() {
            return Err(PmwError::NoSubmissions);
        }

        let candidates = match tasks {
            TaskSelector::Any => submitted.clone(),
            TaskSelector::One(task) => vec![task.clone()],
            TaskSelector::Many(tasks) => tasks.clone(),
        };

        for task in &candidates {
            if !submitted.iter().any(|t| t == task) {
                return Err(PmwError::UnknownTask(task.name().to_string()));
            }
        }

        Ok(candidates)
    }

    /// Wait for (or poll for) one of the selected tasks to finish.
    pub fn get_result(
        &self,
        tasks: TaskSelector,
        blocking: bool,
    ) -> Result<Option<(Arc<Task>, TaskOutput)>, PmwError> {
        let candidates = self.validate_selector(&tasks)?;
        let wrapped: Vec<Option<Arc<Task>>> = candidates.into_iter().map(Some).collect();

        let Some(Some(task)) = self.inner.finished.pop_specific(&wrapped, blocking) else {
            return Ok(None);
        };

        if let Some(err) = task.error() {
            return Err(err);
        }

        let output = task.take_output().ok_or_else(|| {
            PmwError::Backend(format!("task {} finished with neither output nor error", task.name()))
        })?;

        Ok(Some((task, output)))
    }

    /// Per-task progress for the selected tasks (`0.0` until `Finished`).
    pub fn get_progress(&self, tasks: TaskSelector) -> Result<Vec<f64>, PmwError> {
        let candidates = self.validate_selector(&tasks)?;
        Ok(candidates.iter().map(|t| t.progress()).collect())
    }

    /// A snapshot merging backend status with a per-task summary line.
    pub fn get_status(&self) -> StatusSnapshot {
        let interface_status = panic::catch_unwind(AssertUnwindSafe(|| self.inner.backend.status()))
            .unwrap_or_else(|_| {
                eprintln!("warning: backend status() panicked");
                self.inner.events.emit(MasterEvent::Warning {
                    message: "backend status() panicked".to_string(),
                });
                let mut map = serde_json::Map::new();
                map.insert("interface_status".to_string(), serde_json::Value::from("error"));
                map
            });

        let submitted = self.inner.submitted.lock().unwrap_or_else(|e| e.into_inner());
        let tasks = submitted
            .iter()
            .map(|task| TaskSummary {
                name: task.name().to_string(),
                state: match task.lifecycle() {
                    crate::task::Lifecycle::Submitted => "submitted",
                    crate::task::Lifecycle::Running => "running",
                    crate::task::Lifecycle::Finished => "finished",
                    crate::task::Lifecycle::Error => "error",
                },
            })
            .collect();

        StatusSnapshot {
            interface_status,
            tasks,
        }
    }

    /// Stop accepting new dispatch, release backend resources, and
    /// optionally delete generated task files.
    pub fn shutdown(&self) {
        self.inner.queued.append(None);

        if panic::catch_unwind(AssertUnwindSafe(|| self.inner.backend.cleanup())).is_err() {
            eprintln!("warning: backend cleanup() panicked");
            self.inner.events.emit(MasterEvent::Warning {
                message: "backend cleanup() panicked".to_string(),
            });
        }

        let submitted = self.inner.submitted.lock().unwrap_or_else(|e| e.into_inner());
        for task in submitted.iter() {
            task.cleanup_files(self.inner.options.delete_files);
            if self.inner.options.delete_files {
                if let TaskPayload::Handler { bundle: Some(prepared), .. } = task.payload() {
                    let _ = std::fs::remove_file(&prepared.descriptor_path);
                    if let Some(path) = &prepared.data_archive_path {
                        let _ = std::fs::remove_file(path);
                    }
                    if let Some(path) = &prepared.module_archive_path {
                        let _ = std::fs::remove_file(path);
                    }
                }
            }
        }

        if self.inner.options.delete_files {
            if let Ok(mut entries) = std::fs::read_dir(&self.inner.options.task_dir) {
                if entries.next().is_none() {
                    let _ = std::fs::remove_dir(&self.inner.options.task_dir);
                }
            }
        }
    }
}
