//! Maps adapter ids to factories and to the adapter each one last created.
//!
//! Factories are registered at startup. The adapter behind an id is created
//! on first lookup and, for factories that allow it, re-created on the next
//! lookup after the previous incarnation was destroyed.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use orb_protocol::{AdapterId, Endpoint, Lifespan, OrbError, ReferenceTemplate};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::adapter::{AdapterBuilder, ObjectAdapter};
use crate::notify::NotifierChain;
use crate::resolver::ResolutionStrategy;

/// Runtime-provided inputs every factory needs.
#[derive(Clone)]
pub struct AdapterEnv {
    pub server_id: u32,
    pub orb_id: String,
    pub endpoints: Vec<Endpoint>,
    pub notifier: Arc<NotifierChain>,
}

/// Runs while the adapter is under construction; the only window in which
/// its template, reference factory and policies can be changed.
pub type CreationCallback = Arc<dyn Fn(&mut AdapterBuilder) -> Result<(), OrbError> + Send + Sync>;

#[derive(Clone)]
pub struct AdapterOptions {
    pub name: String,
    /// Go straight to ACTIVE after the creation notification.
    pub activate_on_create: bool,
    /// Build a new incarnation on lookup once the current one is destroyed.
    pub recreate_on_destroy: bool,
    pub on_create: Option<CreationCallback>,
}

impl AdapterOptions {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            activate_on_create: true,
            recreate_on_destroy: false,
            on_create: None,
        }
    }
}

/// Factory for adapters whose object identities and reference template
/// survive re-creation.
pub struct PersistentFactory {
    options: AdapterOptions,
    next_system_id: Arc<AtomicU64>,
}

/// Factory for adapters whose identities are valid for one incarnation.
pub struct TransientFactory {
    options: AdapterOptions,
    incarnations: AtomicU32,
}

pub enum AdapterFactory {
    Persistent(PersistentFactory),
    Transient(TransientFactory),
}

impl AdapterFactory {
    pub fn persistent(name: impl Into<String>) -> Self {
        Self::Persistent(PersistentFactory {
            options: AdapterOptions::new(name),
            next_system_id: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn transient(name: impl Into<String>) -> Self {
        Self::Transient(TransientFactory {
            options: AdapterOptions::new(name),
            incarnations: AtomicU32::new(0),
        })
    }

    fn options_mut(&mut self) -> &mut AdapterOptions {
        match self {
            Self::Persistent(f) => &mut f.options,
            Self::Transient(f) => &mut f.options,
        }
    }

    pub fn options(&self) -> &AdapterOptions {
        match self {
            Self::Persistent(f) => &f.options,
            Self::Transient(f) => &f.options,
        }
    }

    pub fn on_create<F>(mut self, callback: F) -> Self
    where
        F: Fn(&mut AdapterBuilder) -> Result<(), OrbError> + Send + Sync + 'static,
    {
        self.options_mut().on_create = Some(Arc::new(callback));
        self
    }

    pub fn activate_on_create(mut self, yes: bool) -> Self {
        self.options_mut().activate_on_create = yes;
        self
    }

    pub fn recreate_on_destroy(mut self, yes: bool) -> Self {
        self.options_mut().recreate_on_destroy = yes;
        self
    }

    pub fn name(&self) -> &str {
        &self.options().name
    }

    pub fn lifespan(&self) -> Lifespan {
        match self {
            Self::Persistent(_) => Lifespan::Persistent,
            Self::Transient(_) => Lifespan::Transient,
        }
    }

    /// Build, announce and (optionally) activate one adapter incarnation.
    ///
    /// The "adapter created" notification goes out exactly once, after the
    /// creation callback and before the adapter can admit a request.
    pub fn create(&self, id: AdapterId, env: &AdapterEnv) -> Result<Arc<ObjectAdapter>, OrbError> {
        let options = self.options();
        let path = vec![options.name.clone()];

        let (template, strategy) = match self {
            Self::Persistent(f) => (
                ReferenceTemplate::new(env.server_id, &env.orb_id, id, path, Lifespan::Persistent),
                ResolutionStrategy::Persistent {
                    next_id: f.next_system_id.clone(),
                },
            ),
            Self::Transient(f) => {
                let incarnation = f.incarnations.fetch_add(1, Ordering::AcqRel) + 1;
                (
                    ReferenceTemplate::new(env.server_id, &env.orb_id, id, path, Lifespan::Transient)
                        .with_incarnation(incarnation),
                    ResolutionStrategy::Transient {
                        incarnation,
                        next_id: AtomicU64::new(0),
                    },
                )
            }
        };

        let mut builder = AdapterBuilder::new(id, &options.name, template, strategy);
        builder.template_mut().set_endpoints(env.endpoints.clone());
        if let Some(callback) = &options.on_create {
            callback(&mut builder)?;
        }
        let adapter = builder.build(env.notifier.clone())?;

        env.notifier.adapter_created(&adapter.info());
        if options.activate_on_create {
            adapter.activate()?;
        }
        Ok(adapter)
    }
}

struct RegistryEntry {
    factory: AdapterFactory,
    current: Mutex<Option<Arc<ObjectAdapter>>>,
}

/// Adapter id to factory table, scoped to one runtime.
pub struct AdapterRegistry {
    entries: RwLock<HashMap<AdapterId, Arc<RegistryEntry>>>,
    sealed: AtomicBool,
    env: AdapterEnv,
}

impl AdapterRegistry {
    pub fn new(env: AdapterEnv) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            sealed: AtomicBool::new(false),
            env,
        }
    }

    /// Register `factory` under `id`.
    ///
    /// Before [`seal`](Self::seal) a repeated registration replaces the
    /// earlier one (startup configuration may be re-run). Afterwards an id
    /// that is already taken fails with `DuplicateAdapter`.
    pub fn register(&self, id: AdapterId, factory: AdapterFactory) -> Result<(), OrbError> {
        let mut entries = self.entries.write();
        if entries.contains_key(&id) {
            if self.is_sealed() {
                return Err(OrbError::DuplicateAdapter(id));
            }
            debug!("Replacing factory for adapter id {}", id);
        }
        info!("Registering adapter factory: {} (id: {}, {:?})", factory.name(), id, factory.lifespan());
        entries.insert(
            id,
            Arc::new(RegistryEntry {
                factory,
                current: Mutex::new(None),
            }),
        );
        Ok(())
    }

    pub fn seal(&self) {
        if !self.sealed.swap(true, Ordering::AcqRel) {
            info!("Adapter registry sealed ({} adapters)", self.len());
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn ids(&self) -> Vec<AdapterId> {
        let mut ids: Vec<_> = self.entries.read().keys().copied().collect();
        ids.sort();
        ids
    }

    /// The adapter currently serving `id`, creating it if needed.
    ///
    /// A destroyed adapter is returned as is unless its factory re-creates
    /// on destroy; callers then see `Destroyed` from `enter`.
    pub fn lookup(&self, id: AdapterId) -> Result<Arc<ObjectAdapter>, OrbError> {
        let entry = self
            .entries
            .read()
            .get(&id)
            .cloned()
            .ok_or(OrbError::AdapterNotFound(id))?;

        // Creation holds only this entry's lock, so lookups of other ids
        // proceed. Creation callbacks must not look up their own id.
        let mut current = entry.current.lock();
        if let Some(adapter) = current.as_ref() {
            let stale = adapter.state().is_destroyed() && entry.factory.options().recreate_on_destroy;
            if !stale {
                return Ok(adapter.clone());
            }
            info!("Re-creating destroyed adapter {} (id: {})", entry.factory.name(), id);
        }

        let adapter = entry.factory.create(id, &self.env)?;
        *current = Some(adapter.clone());
        Ok(adapter)
    }

    /// The live adapter for `id` without creating one.
    pub fn current(&self, id: AdapterId) -> Option<Arc<ObjectAdapter>> {
        let entry = self.entries.read().get(&id).cloned()?;
        let current = entry.current.lock();
        current.clone()
    }

    /// Every adapter created so far (destroyed ones included).
    pub fn adapters(&self) -> Vec<Arc<ObjectAdapter>> {
        let entries: Vec<_> = self.entries.read().values().cloned().collect();
        entries
            .iter()
            .filter_map(|e| e.current.lock().clone())
            .collect()
    }

    /// Create the adapter for every registered id that has none yet.
    pub fn instantiate_all(&self) -> Result<(), OrbError> {
        for id in self.ids() {
            self.lookup(id)?;
        }
        Ok(())
    }
}
