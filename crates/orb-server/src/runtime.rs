//! OrbRuntime — owns the registry, the notifier chain and dispatch accounting.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use orb_protocol::{AdapterEvent, AdapterId, OrbError};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::{ConfigError, DispatchConfig};
use crate::notify::{LoggingNotifier, NotifierChain, RuntimeNotifier};
use crate::registry::{AdapterEnv, AdapterFactory, AdapterRegistry};

pub struct OrbRuntime {
    config: DispatchConfig,
    notifier: Arc<NotifierChain>,
    registry: AdapterRegistry,
    dispatches: AtomicUsize,
    shutting_down: AtomicBool,
}

/// Marks one dispatch as in progress until dropped.
#[must_use]
pub struct DispatchTicket<'r> {
    runtime: &'r OrbRuntime,
}

impl Drop for DispatchTicket<'_> {
    fn drop(&mut self) {
        self.runtime.finished_dispatch();
    }
}

impl OrbRuntime {
    pub fn new(config: DispatchConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let notifier = Arc::new(NotifierChain::new(config.event_capacity));
        notifier.add(Arc::new(LoggingNotifier));
        let env = AdapterEnv {
            server_id: config.server_id,
            orb_id: config.orb_id.clone(),
            endpoints: config.endpoints.clone(),
            notifier: notifier.clone(),
        };
        Ok(Self {
            registry: AdapterRegistry::new(env),
            notifier,
            config,
            dispatches: AtomicUsize::new(0),
            shutting_down: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    pub fn notifier(&self) -> &Arc<NotifierChain> {
        &self.notifier
    }

    pub fn add_notifier(&self, notifier: Arc<dyn RuntimeNotifier>) {
        info!("Adding runtime notifier: {}", notifier.name());
        self.notifier.add(notifier);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AdapterEvent> {
        self.notifier.subscribe()
    }

    pub fn register_adapter(&self, id: AdapterId, factory: AdapterFactory) -> Result<(), OrbError> {
        self.registry.register(id, factory)
    }

    /// Finish configuration: seal the registry and create every adapter.
    pub fn start(&self) -> Result<(), OrbError> {
        self.registry.seal();
        self.registry.instantiate_all()?;
        info!(
            "Runtime {} started with {} adapters",
            self.config.orb_id,
            self.registry.len()
        );
        Ok(())
    }

    pub fn starting_dispatch(&self) -> Result<DispatchTicket<'_>, OrbError> {
        self.dispatches.fetch_add(1, Ordering::AcqRel);
        if self.is_shutting_down() {
            self.finished_dispatch();
            return Err(OrbError::ShuttingDown);
        }
        Ok(DispatchTicket { runtime: self })
    }

    fn finished_dispatch(&self) {
        let prev = self
            .dispatches
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if prev.is_err() {
            warn!("finished_dispatch() with no dispatch in progress");
        }
    }

    pub fn dispatches_in_progress(&self) -> usize {
        self.dispatches.load(Ordering::Acquire)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Refuse new dispatches, destroy every adapter and wait for admitted
    /// requests to drain, all within `completionTimeoutMs`.
    pub async fn shutdown(&self) -> Result<(), OrbError> {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let adapters = self.registry.adapters();
        info!("Shutting down runtime ({} adapters)", adapters.len());
        for adapter in &adapters {
            adapter.destroy();
        }

        let deadline = Instant::now() + self.config.completion_timeout();
        for adapter in &adapters {
            let remaining = deadline.saturating_duration_since(Instant::now());
            adapter.wait_for_completion(remaining).await?;
        }
        info!("Runtime shut down");
        Ok(())
    }
}
