//! Backend contract (spec §4.4): the pluggable substrate that runs workers.
//!
//! Every optional operation has a default implementation here, so a concrete
//! backend overrides only what it needs instead of the caller probing for
//! attribute presence at call time.

use std::path::Path;
use std::sync::Arc;

use crate::error::PmwError;
use crate::task::{Task, TaskOutput};

/// An opaque handle identifying an execution slot in a backend.
///
/// Identity is chosen by the backend; the core only compares it for
/// equality and lists it. [`WorkerHandle::NONE`] is the single-slot
/// "no worker concept" sentinel used by backends without a worker pool
/// (mirroring the original's bare `[None]` worker list).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerHandle(Option<Arc<str>>);

impl WorkerHandle {
    /// The sentinel handle for backends that expose no distinct workers.
    pub const NONE: WorkerHandle = WorkerHandle(None);

    /// Build a named worker handle.
    pub fn named(id: impl Into<Arc<str>>) -> Self {
        WorkerHandle(Some(id.into()))
    }

    /// The handle's identity string, if any.
    pub fn as_str(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

/// The pluggable substrate the core dispatches work onto.
///
/// Implementations must call `task.finish(...)` exactly once on every path
/// through `execute_task`, including failure; the scheduler additionally
/// catches panics and unreturned errors so a misbehaving backend can never
/// leave a waiter blocked forever.
pub trait Backend: Send + Sync {
    /// Arrange for `task` to run on `worker`, then call `task.finish(..)`.
    ///
    /// May run synchronously or hand off to another thread; the scheduler's
    /// dispatcher thread is the caller, so blocking here only holds up that
    /// one task's dispatch, not the scheduler loop itself.
    fn execute_task(&self, task: Arc<Task>, worker: WorkerHandle) -> Result<(), PmwError>;

    /// List currently available workers. Defaults to a single `NONE` slot.
    fn available_workers(&self) -> Vec<WorkerHandle> {
        vec![WorkerHandle::NONE]
    }

    /// Remove `worker` from the available pool immediately before dispatch.
    fn reserve_worker(&self, _worker: &WorkerHandle) {}

    /// Return `worker` to the pool after its task completes.
    fn worker_finished(&self, _worker: &WorkerHandle) {}

    /// A key/value status snapshot, merged into `Master::get_status`.
    fn status(&self) -> serde_json::Map<String, serde_json::Value> {
        serde_json::Map::new()
    }

    /// Called after a scheduling cycle finds no worker/task match. Returning
    /// `true` asks the scheduler to re-poll immediately (used by simulated
    /// backends to advance virtual time) instead of waiting on the interface
    /// condition variable.
    fn try_avail_check_again(&self) -> bool {
        false
    }

    /// Release external resources at master shutdown.
    fn cleanup(&self) {}

    /// Encode `value` to `path` (master-side write of a task's input).
    /// Defaults to `bincode`, matching the original's `pickle`-based
    /// `pymw_master_write`.
    fn master_write(&self, value: &[Vec<u8>], path: &Path) -> Result<(), PmwError> {
        let bytes = bincode::serialize(value)
            .map_err(|e| PmwError::serialization(path, anyhow::anyhow!(e)))?;
        std::fs::write(path, bytes).map_err(|e| PmwError::serialization(path, e))
    }

    /// Decode a task's output blob from `path` (master-side read).
    /// Defaults to `bincode`, matching `pymw_master_read`.
    fn master_read(&self, path: &Path) -> Result<TaskOutput, PmwError> {
        let bytes = std::fs::read(path).map_err(|e| PmwError::serialization(path, e))?;
        let (result, stdout, stderr): (Vec<u8>, String, String) = bincode::deserialize(&bytes)
            .map_err(|e| PmwError::serialization(path, anyhow::anyhow!(e)))?;
        Ok(TaskOutput::Single {
            result,
            stdout,
            stderr,
        })
    }
}
