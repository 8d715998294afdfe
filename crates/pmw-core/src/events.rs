//! Internal diagnostics event bus (ambient stack addition, not a spec
//! [MODULE]). Grounded on the teacher's `broadcast::Sender<EngineEvent>`
//! (`client-engine/src/engine.rs`), adapted to `std::sync::mpsc` since this
//! core is deliberately Tokio-free (see `DESIGN.md`). Best-effort failures
//! that must not crash the process (a backend's `status()`/`cleanup()`
//! panicking, a module that could not be packaged) are both logged via
//! `eprintln!` as the teacher does and emitted here for a subscriber that
//! wants them structured, e.g. a CLI driver's own status line.

use std::sync::Mutex;
use std::sync::mpsc::{Receiver, Sender, channel};

/// A diagnostic event emitted by a [`crate::master::Master`].
#[derive(Debug, Clone)]
pub enum MasterEvent {
    /// A submitted task reached a terminal state.
    TaskFinished {
        /// The task's identity string.
        name: String,
        /// Whether it finished in the `Error` state.
        errored: bool,
    },
    /// A non-fatal condition, surfaced but not acted on.
    Warning {
        /// Human-readable detail.
        message: String,
    },
    /// A best-effort operation failed without aborting its caller.
    Error {
        /// Human-readable detail.
        message: String,
    },
}

/// A fan-out channel subscribers can read [`MasterEvent`]s from. Unlike a
/// `tokio::sync::broadcast` channel this never drops events for a lagging
/// subscriber (each gets its own unbounded `mpsc` queue); a subscriber that
/// stops draining its receiver is simply pruned on the next `emit`.
#[derive(Default)]
pub(crate) struct EventBus {
    subscribers: Mutex<Vec<Sender<MasterEvent>>>,
}

impl EventBus {
    pub(crate) fn subscribe(&self) -> Receiver<MasterEvent> {
        let (tx, rx) = channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    pub(crate) fn emit(&self, event: MasterEvent) {
        let mut subs = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscriber_observes_emitted_events() {
        let bus = EventBus::default();
        let rx = bus.subscribe();
        bus.emit(MasterEvent::Warning {
            message: "test warning".to_string(),
        });
        match rx.recv().unwrap() {
            MasterEvent::Warning { message } => assert_eq!(message, "test warning"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn dropped_subscriber_is_pruned_without_error() {
        let bus = EventBus::default();
        {
            let _rx = bus.subscribe();
        }
        bus.emit(MasterEvent::Error {
            message: "no one is listening".to_string(),
        });
        assert!(bus.subscribers.lock().unwrap().is_empty());
    }
}
