//! Adapter creation and state-change notifications.
//!
//! Notifiers run in priority order. A notifier that fails or panics is
//! logged and skipped. Adapter state is settled before any notifier runs.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use orb_protocol::{AdapterEvent, AdapterId, ManagerState};
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::adapter::AdapterInfo;

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct NotifyError {
    pub message: String,
}

impl NotifyError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Observer of adapter lifecycle events (interceptor frameworks and the like).
pub trait RuntimeNotifier: Send + Sync {
    /// Called once per adapter incarnation, before it admits any request.
    fn adapter_created(&self, _info: &AdapterInfo) -> Result<(), NotifyError> {
        Ok(())
    }

    /// Called on every state transition with the externally visible state.
    fn adapter_state_changed(
        &self,
        _adapter: AdapterId,
        _state: ManagerState,
    ) -> Result<(), NotifyError> {
        Ok(())
    }

    fn name(&self) -> &str;

    /// Priority (lower runs first).
    fn priority(&self) -> i32 {
        0
    }
}

/// Logs every event at info level.
pub struct LoggingNotifier;

impl RuntimeNotifier for LoggingNotifier {
    fn adapter_created(&self, info: &AdapterInfo) -> Result<(), NotifyError> {
        info!(
            "Adapter created: {} (id: {}, {:?})",
            info.name, info.id, info.lifespan
        );
        Ok(())
    }

    fn adapter_state_changed(&self, adapter: AdapterId, state: ManagerState) -> Result<(), NotifyError> {
        info!("Adapter {} state -> {:?}", adapter, state);
        Ok(())
    }

    fn name(&self) -> &str {
        "logging"
    }

    fn priority(&self) -> i32 {
        i32::MAX
    }
}

/// Notifiers in priority order plus a broadcast channel of [`AdapterEvent`]s.
pub struct NotifierChain {
    notifiers: RwLock<Vec<Arc<dyn RuntimeNotifier>>>,
    events: broadcast::Sender<AdapterEvent>,
    failures: AtomicU64,
}

impl NotifierChain {
    pub fn new(event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            notifiers: RwLock::new(Vec::new()),
            events,
            failures: AtomicU64::new(0),
        }
    }

    pub fn add(&self, notifier: Arc<dyn RuntimeNotifier>) {
        let mut notifiers = self.notifiers.write();
        notifiers.push(notifier);
        notifiers.sort_by_key(|n| n.priority());
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AdapterEvent> {
        self.events.subscribe()
    }

    pub fn names(&self) -> Vec<String> {
        self.notifiers.read().iter().map(|n| n.name().to_string()).collect()
    }

    /// Deliveries that returned an error or panicked.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn adapter_created(&self, info: &AdapterInfo) {
        self.each(|n| n.adapter_created(info));
        let _ = self.events.send(AdapterEvent::Created {
            adapter_id: info.id,
            name: info.name.clone(),
            lifespan: info.lifespan,
            incarnation: info.incarnation,
        });
    }

    pub fn adapter_state_changed(&self, adapter: AdapterId, state: ManagerState) {
        self.each(|n| n.adapter_state_changed(adapter, state));
        let _ = self.events.send(AdapterEvent::StateChanged {
            adapter_id: adapter,
            state,
        });
    }

    fn each<F>(&self, f: F)
    where
        F: Fn(&dyn RuntimeNotifier) -> Result<(), NotifyError>,
    {
        // Snapshot so a notifier may register further notifiers.
        let notifiers: Vec<Arc<dyn RuntimeNotifier>> = self.notifiers.read().clone();
        for notifier in notifiers {
            match catch_unwind(AssertUnwindSafe(|| f(notifier.as_ref()))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    warn!("Notifier {} failed: {}", notifier.name(), e);
                }
                Err(_) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    warn!("Notifier {} panicked", notifier.name());
                }
            }
        }
    }
}
