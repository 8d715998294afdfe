//! Scheduling loop (spec §4.5, C5).
//!
//! One OS thread, started lazily on first submission and idempotently
//! restarted whenever the queue goes from empty to non-empty. It matches
//! queued tasks to available workers under an interface lock shared with
//! the backend's worker-pool bookkeeping, then hands each match off to a
//! short-lived dispatcher thread so a slow `execute_task` call never blocks
//! the scheduling of the next match.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::backend::{Backend, WorkerHandle};
use crate::error::PmwError;
use crate::task::Task;
use crate::tasklist::TaskList;

/// A worker-selection policy: given the queued tasks and currently
/// available workers, pick one pairing to dispatch next.
pub type MatchFn = Arc<dyn Fn(&[Arc<Task>], &[WorkerHandle]) -> Option<(Arc<Task>, WorkerHandle)> + Send + Sync>;

/// First-queued-task, first-available-worker: the default matching policy.
pub fn default_match_fn(tasks: &[Arc<Task>], workers: &[WorkerHandle]) -> Option<(Arc<Task>, WorkerHandle)> {
    match (tasks.first(), workers.first()) {
        (Some(task), Some(worker)) => Some((task.clone(), worker.clone())),
        _ => None,
    }
}

/// Caps how many dispatcher threads may be live at once (mirrors the
/// original's `threading.activeCount() > 100` throttle).
const MAX_LIVE_DISPATCHERS: usize = 100;

pub(crate) struct Scheduler {
    backend: Arc<dyn Backend>,
    queued: Arc<TaskList<Option<Arc<Task>>>>,
    match_fn: MatchFn,
    interface: Mutex<()>,
    interface_cond: Condvar,
    running: AtomicBool,
    live_dispatchers: Arc<AtomicUsize>,
}

impl Scheduler {
    pub(crate) fn new(
        backend: Arc<dyn Backend>,
        queued: Arc<TaskList<Option<Arc<Task>>>>,
        match_fn: MatchFn,
    ) -> Arc<Scheduler> {
        Arc::new(Scheduler {
            backend,
            queued,
            match_fn,
            interface: Mutex::new(()),
            interface_cond: Condvar::new(),
            running: AtomicBool::new(false),
            live_dispatchers: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Start the scheduler thread if it is not already running. Safe to
    /// call from any thread, any number of times.
    pub(crate) fn start(self: &Arc<Self>) {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let scheduler = self.clone();
        std::thread::spawn(move || scheduler.run());
    }

    /// Called by a worker's release callback after the scheduler's
    /// bookkeeping for that worker is updated, to wake a scheduler thread
    /// that may be waiting for an available worker.
    pub(crate) fn notify_worker_available(&self) {
        let _guard = self.interface.lock().unwrap_or_else(|e| e.into_inner());
        self.interface_cond.notify_all();
    }

    fn run(self: Arc<Self>) {
        loop {
            if self.queued.is_empty() {
                self.running.store(false, Ordering::SeqCst);
                // A submission racing the check above will see `running`
                // flip back to false and call `start()` again.
                return;
            }

            if self.queued.contains(&None) {
                // Shutdown sentinel: consume it and exit. Any task still
                // queued behind it is left for a future scheduler run
                // (restarted by the next `submit_task`, if one ever comes).
                self.queued.pop_specific(&[None], false);
                self.running.store(false, Ordering::SeqCst);
                return;
            }

            let mut guard = self.interface.lock().unwrap_or_else(|e| e.into_inner());

            let workers = self.backend.available_workers();
            if workers.is_empty() {
                if self.backend.try_avail_check_again() {
                    continue;
                }
                let (g, _timeout) = self
                    .interface_cond
                    .wait_timeout(guard, Duration::from_secs(1))
                    .unwrap_or_else(|e| e.into_inner());
                guard = g;
                drop(guard);
                continue;
            }

            let queued_tasks: Vec<Arc<Task>> = self
                .queued
                .snapshot()
                .into_iter()
                .flatten()
                .collect();

            let Some((chosen_task, mut chosen_worker)) = (self.match_fn)(&queued_tasks, &workers) else {
                if self.backend.try_avail_check_again() {
                    drop(guard);
                    continue;
                }
                drop(guard);
                std::thread::sleep(Duration::from_millis(50));
                continue;
            };

            if !workers.contains(&chosen_worker) {
                chosen_worker = workers[0].clone();
            }

            let Some(popped) = self
                .queued
                .pop_specific(&[Some(chosen_task.clone())], false)
                .flatten()
            else {
                // Raced away (another dispatch already took it, or it was
                // withdrawn); retry the cycle without blocking.
                drop(guard);
                continue;
            };

            self.backend.reserve_worker(&chosen_worker);

            let backend = self.backend.clone();
            let live_dispatchers = self.live_dispatchers.clone();
            let scheduler = self.clone();
            let worker = chosen_worker;

            if live_dispatchers.load(Ordering::SeqCst) > MAX_LIVE_DISPATCHERS {
                std::thread::sleep(Duration::from_millis(100));
            }

            live_dispatchers.fetch_add(1, Ordering::SeqCst);
            std::thread::spawn(move || {
                dispatch(backend, popped, worker, &scheduler);
                live_dispatchers.fetch_sub(1, Ordering::SeqCst);
            });

            drop(guard);
        }
    }
}

fn dispatch(backend: Arc<dyn Backend>, task: Arc<Task>, worker: WorkerHandle, scheduler: &Arc<Scheduler>) {
    let scheduler = scheduler.clone();
    let release_backend = backend.clone();
    task.mark_running(
        worker.clone(),
        Box::new(move |w| {
            release_backend.worker_finished(&w);
            scheduler.notify_worker_available();
        }),
    );

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| backend.execute_task(task.clone(), worker.clone())));

    match outcome {
        Ok(Ok(())) => {
            // The backend already called `task.finish(...)` on success per
            // its contract; nothing further to do here.
        }
        Ok(Err(err)) => {
            if !task.is_done() {
                task.finish(Some(err), None);
            }
        }
        Err(panic) => {
            if !task.is_done() {
                let message = panic_message(&panic);
                task.finish(
                    Some(PmwError::TaskExecution {
                        exit_code: None,
                        stderr: message,
                    }),
                    None,
                );
            }
        }
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "backend panicked during task execution".to_string()
    }
}
