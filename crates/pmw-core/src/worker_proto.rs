//! Shared worker-side protocol types (spec §4.3, §6).
//!
//! A worker program — whatever the backend spawns or drives — resolves a
//! task's `handler` name in a [`HandlerTable`] and invokes it with the
//! decoded positional arguments, producing a `(result, stdout, stderr)`
//! triple. This module defines that contract; it does not implement a
//! worker process itself (that is a backend's job, per spec §1).

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

/// A registered task handler: takes bincode-encoded positional arguments,
/// returns a bincode-encoded result or an error.
pub type HandlerFn = fn(&[Vec<u8>]) -> anyhow::Result<Vec<u8>>;

/// The `(result, captured_stdout, captured_stderr)` triple a worker harness
/// writes to the output channel (spec §6).
pub type WorkerOutput = (Vec<u8>, String, String);

/// Process-wide registry mapping a handler name to its function pointer.
///
/// This replaces the original's "read the function's source and embed it in
/// a generated script" (Design Note 9a, option (a)): both the driver process
/// and any worker process link against the same handler table.
#[derive(Default)]
pub struct HandlerTable {
    handlers: Mutex<HashMap<&'static str, HandlerFn>>,
}

impl HandlerTable {
    fn global() -> &'static HandlerTable {
        static TABLE: OnceLock<HandlerTable> = OnceLock::new();
        TABLE.get_or_init(HandlerTable::default)
    }

    /// Register `name` as pointing to `func`. Call this from `main()` or any
    /// process start-up path shared by the driver and whatever worker binary
    /// resolves the same name, before the first task referencing it is
    /// submitted. Re-registering the same name overwrites the previous entry.
    pub fn register(name: &'static str, func: HandlerFn) {
        Self::global()
            .handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name, func);
    }

    /// Look up a registered handler by name.
    pub fn resolve(name: &str) -> Option<HandlerFn> {
        Self::global()
            .handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .copied()
    }
}

/// Run a registered handler against encoded positional arguments without
/// capturing stdout/stderr (spec §4.3 steps 3-5 only). A convenience for
/// callers that don't need the captured-output triple — property tests
/// exercising handler logic directly, or a backend whose worker process
/// already discards output. `pmw-backend-thread`'s harness performs the
/// real OS-level redirection (steps 1, 6) itself, around a call to the
/// registered handler, rather than through this helper.
pub fn run_captured(handler: HandlerFn, args: &[Vec<u8>]) -> anyhow::Result<WorkerOutput> {
    let result = handler(args)?;
    Ok((result, String::new(), String::new()))
}
