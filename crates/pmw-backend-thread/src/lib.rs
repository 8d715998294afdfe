#![forbid(unsafe_code)]

//! A minimal in-process backend: a fixed pool of named worker slots, each
//! task run on whatever OS thread the scheduler already dispatched it on.
//!
//! This is the reference [`pmw_core::Backend`] implementation used by
//! `pmw-core`'s integration tests and `pmw-demo`; it is intentionally the
//! simplest backend that can satisfy the contract, not a production one.

use std::io::Read;
use std::path::Path;
use std::sync::{Arc, Mutex};

use gag::BufferRedirect;

use pmw_core::backend::WorkerHandle;
use pmw_core::task::{Task, TaskPayload};
use pmw_core::worker_proto::HandlerTable;
use pmw_core::{Backend, PmwError};

/// Real OS-level stdout/stderr redirection is process-wide, not per-thread;
/// since this backend's tasks run concurrently on dispatcher threads, a
/// capture in progress on one thread would otherwise swallow another
/// thread's output. Serializing the redirected section of each handler call
/// on this lock keeps captures from crossing between concurrent tasks — a
/// real limitation of an in-process reference backend, not of the contract
/// itself (a process-per-worker backend has no such conflict).
static CAPTURE_LOCK: Mutex<()> = Mutex::new(());

/// Run `f` with process stdout/stderr redirected into buffers, returning
/// its result alongside the captured text (spec §4.3 harness steps 1, 5-6).
fn capture_stdio<T>(f: impl FnOnce() -> T) -> (T, String, String) {
    let _guard = CAPTURE_LOCK.lock().unwrap_or_else(|e| e.into_inner());

    let stdout_buf = BufferRedirect::stdout().ok();
    let stderr_buf = BufferRedirect::stderr().ok();

    let result = f();

    let mut stdout_text = String::new();
    if let Some(mut buf) = stdout_buf {
        let _ = buf.read_to_string(&mut stdout_text);
    }
    let mut stderr_text = String::new();
    if let Some(mut buf) = stderr_buf {
        let _ = buf.read_to_string(&mut stderr_text);
    }

    (result, stdout_text, stderr_text)
}

/// A backend whose "workers" are just a bounded number of available slots;
/// actual execution happens on the scheduler's dispatcher thread.
pub struct ThreadBackend {
    available: Mutex<Vec<WorkerHandle>>,
}

impl ThreadBackend {
    /// Build a backend with `num_workers` available slots.
    pub fn new(num_workers: usize) -> Arc<Self> {
        let available = (0..num_workers)
            .map(|i| WorkerHandle::named(format!("worker-{i}")))
            .collect();
        Arc::new(ThreadBackend {
            available: Mutex::new(available),
        })
    }
}

impl Backend for ThreadBackend {
    fn execute_task(&self, task: Arc<Task>, _worker: WorkerHandle) -> Result<(), PmwError> {
        match task.payload().clone() {
            TaskPayload::Handler { handler, .. } => run_handler(&task, handler),
            TaskPayload::ExternalProgram(path) => run_program(&task, &path),
            TaskPayload::Composite => {
                // The map-reduce orchestrator finishes composite tasks
                // itself; a backend never sees one through `execute_task`.
                Ok(())
            }
        }
    }

    fn available_workers(&self) -> Vec<WorkerHandle> {
        self.available.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn reserve_worker(&self, worker: &WorkerHandle) {
        let mut available = self.available.lock().unwrap_or_else(|e| e.into_inner());
        available.retain(|w| w != worker);
    }

    fn worker_finished(&self, worker: &WorkerHandle) {
        let mut available = self.available.lock().unwrap_or_else(|e| e.into_inner());
        if !available.contains(worker) {
            available.push(worker.clone());
        }
    }

    fn status(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut map = serde_json::Map::new();
        let available = self.available_workers().len();
        map.insert("available_workers".to_string(), serde_json::Value::from(available));
        map
    }
}

fn run_handler(task: &Arc<Task>, handler: &'static str) -> Result<(), PmwError> {
    let input = read_input(task.input_path())?;

    let Some(func) = HandlerTable::resolve(handler) else {
        task.finish(
            Some(PmwError::Backend(format!("no handler registered under {handler:?}"))),
            None,
        );
        return Ok(());
    };

    let (outcome, stdout, stderr) = capture_stdio(|| func(&input));

    match outcome {
        Ok(result) => {
            write_output(task.output_path(), &result, &stdout, &stderr)?;
            task.finish(None, None);
        }
        Err(err) => {
            let message = if stderr.is_empty() {
                format!("{err:#}")
            } else {
                format!("{err:#}\n{stderr}")
            };
            task.finish(
                Some(PmwError::TaskExecution {
                    exit_code: None,
                    stderr: message,
                }),
                None,
            );
        }
    }

    Ok(())
}

fn run_program(task: &Arc<Task>, path: &Path) -> Result<(), PmwError> {
    let output = std::process::Command::new(path)
        .arg(task.input_path())
        .arg(task.output_path())
        .output();

    match output {
        Ok(output) if output.status.success() => {
            task.finish(None, None);
        }
        Ok(output) => {
            task.finish(
                Some(PmwError::TaskExecution {
                    exit_code: output.status.code(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                }),
                None,
            );
        }
        Err(err) => {
            task.finish(
                Some(PmwError::TaskExecution {
                    exit_code: None,
                    stderr: err.to_string(),
                }),
                None,
            );
        }
    }

    Ok(())
}

fn read_input(path: &Path) -> Result<Vec<Vec<u8>>, PmwError> {
    let bytes = std::fs::read(path).map_err(|e| PmwError::serialization(path, e))?;
    bincode::deserialize(&bytes).map_err(|e| PmwError::serialization(path, anyhow::anyhow!(e)))
}

fn write_output(path: &Path, result: &[u8], stdout: &str, stderr: &str) -> Result<(), PmwError> {
    let encoded = bincode::serialize(&(result.to_vec(), stdout.to_string(), stderr.to_string()))
        .map_err(|e| PmwError::serialization(path, anyhow::anyhow!(e)))?;
    std::fs::write(path, encoded).map_err(|e| PmwError::serialization(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_pool_round_trips_reservation() {
        let backend = ThreadBackend::new(2);
        assert_eq!(backend.available_workers().len(), 2);

        let worker = backend.available_workers().remove(0);
        backend.reserve_worker(&worker);
        assert_eq!(backend.available_workers().len(), 1);

        backend.worker_finished(&worker);
        assert_eq!(backend.available_workers().len(), 2);
    }
}
