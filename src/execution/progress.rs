//! User-visible progress toast for long-running submissions

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

pub type ToastId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToastOutcome {
    Success(String),
    Error(String),
}

/// UI seam for the single loading toast shown per operation attempt.
///
/// `resolve` replaces the loading toast in place; `dismiss` removes it.
pub trait ProgressSink: Send + Sync {
    fn show_loading(&self, message: &str) -> ToastId;
    fn resolve(&self, id: ToastId, outcome: ToastOutcome);
    fn dismiss(&self, id: ToastId);
}

/// Owns a loading toast and dismisses it on drop unless it was resolved
pub struct PendingToast {
    sink: Arc<dyn ProgressSink>,
    id: ToastId,
    resolved: bool,
}

impl PendingToast {
    pub fn show(sink: Arc<dyn ProgressSink>, message: &str) -> Self {
        let id = sink.show_loading(message);
        Self {
            sink,
            id,
            resolved: false,
        }
    }

    pub fn succeed(mut self, message: impl Into<String>) {
        self.resolved = true;
        self.sink.resolve(self.id, ToastOutcome::Success(message.into()));
    }

    pub fn fail(mut self, message: impl Into<String>) {
        self.resolved = true;
        self.sink.resolve(self.id, ToastOutcome::Error(message.into()));
    }
}

impl Drop for PendingToast {
    fn drop(&mut self) {
        if !self.resolved {
            self.sink.dismiss(self.id);
        }
    }
}

/// Headless sink that writes toasts to the log
#[derive(Default)]
pub struct LogProgress {
    next_id: AtomicU64,
}

impl ProgressSink for LogProgress {
    fn show_loading(&self, message: &str) -> ToastId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        info!(toast = id, message, "Loading");
        id
    }

    fn resolve(&self, id: ToastId, outcome: ToastOutcome) {
        match outcome {
            ToastOutcome::Success(message) => info!(toast = id, message = %message, "Succeeded"),
            ToastOutcome::Error(message) => info!(toast = id, message = %message, "Failed"),
        }
    }

    fn dismiss(&self, id: ToastId) {
        info!(toast = id, "Dismissed");
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum ToastEvent {
        Shown(ToastId, String),
        Resolved(ToastId, ToastOutcome),
        Dismissed(ToastId),
    }

    /// Records every toast call for assertions
    #[derive(Default)]
    pub struct RecordingProgress {
        pub events: Mutex<Vec<ToastEvent>>,
    }

    impl RecordingProgress {
        pub fn events(&self) -> Vec<ToastEvent> {
            self.events.lock().unwrap().clone()
        }

        /// Loading toasts that were neither resolved nor dismissed
        pub fn dangling(&self) -> Vec<ToastId> {
            let events = self.events();
            events
                .iter()
                .filter_map(|e| match e {
                    ToastEvent::Shown(id, _) => Some(*id),
                    _ => None,
                })
                .filter(|id| {
                    !events.iter().any(|e| {
                        matches!(e, ToastEvent::Resolved(r, _) | ToastEvent::Dismissed(r) if r == id)
                    })
                })
                .collect()
        }
    }

    impl ProgressSink for RecordingProgress {
        fn show_loading(&self, message: &str) -> ToastId {
            let mut events = self.events.lock().unwrap();
            let id = events.len() as ToastId;
            events.push(ToastEvent::Shown(id, message.to_string()));
            id
        }

        fn resolve(&self, id: ToastId, outcome: ToastOutcome) {
            self.events.lock().unwrap().push(ToastEvent::Resolved(id, outcome));
        }

        fn dismiss(&self, id: ToastId) {
            self.events.lock().unwrap().push(ToastEvent::Dismissed(id));
        }
    }
}
