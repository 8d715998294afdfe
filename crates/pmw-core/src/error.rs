//! Error kinds surfaced across the master/backend/task boundary (spec §7).

use std::path::PathBuf;
use std::sync::Arc;

/// Errors raised synchronously by misuse of the facade, or attached
/// asynchronously to a [`crate::task::Task`] and surfaced the first time a
/// caller retrieves that task through `get_result`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PmwError {
    /// `executable` was neither a registered handler nor a program path.
    #[error("executable must be a registered handler or an external program path")]
    BadExecutableKind,

    /// `get_result`/`get_progress` called before any task was submitted.
    #[error("no tasks have been submitted")]
    NoSubmissions,

    /// `get_result`/`get_progress` referenced a task this master never submitted.
    #[error("task {0:?} was not submitted through this master")]
    UnknownTask(String),

    /// The worker exited non-zero, or the handler panicked/errored.
    #[error("task failed (exit code {exit_code:?}): {stderr}")]
    TaskExecution {
        /// Process exit code, when the backend runs a separate process.
        exit_code: Option<i32>,
        /// Captured standard error from the failing run.
        stderr: String,
    },

    /// A backend operation (dispatch, status, reservation) failed.
    #[error("backend error: {0}")]
    Backend(String),

    /// Input could not be written, or output could not be read/decoded.
    #[error("serialization error for {path}: {source}")]
    Serialization {
        /// Path of the blob that failed to (de)serialize.
        path: PathBuf,
        /// Underlying cause, kept as a displayable string so `PmwError`
        /// stays `Clone` (tasks hand the same error to every caller that
        /// asks for it).
        #[source]
        source: SharedError,
    },
}

/// A `Clone`-able wrapper around an [`anyhow::Error`]'s display text.
///
/// `anyhow::Error` itself is not `Clone`; a finished task's error slot must
/// be readable by every concurrent `get_result` caller without consuming it,
/// so the source is captured as text once and shared behind an `Arc`.
#[derive(Debug, Clone)]
pub struct SharedError(pub Arc<str>);

impl std::fmt::Display for SharedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for SharedError {}

impl From<anyhow::Error> for SharedError {
    fn from(err: anyhow::Error) -> Self {
        SharedError(Arc::from(format!("{err:#}")))
    }
}

impl PmwError {
    /// Build a [`PmwError::Serialization`] from a path and any displayable cause.
    pub fn serialization(path: impl Into<PathBuf>, source: impl Into<anyhow::Error>) -> Self {
        PmwError::Serialization {
            path: path.into(),
            source: source.into().into(),
        }
    }
}
