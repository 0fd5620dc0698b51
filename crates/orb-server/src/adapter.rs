//! The object adapter: admission control, servant resolution and the
//! adapter state machine.
//!
//! Two independent pairs guard a request:
//!
//! - `enter`/`exit` admit a request into the adapter and are what draining
//!   waits on.
//! - `resolve`/`release` pin a servant for the duration of one use.
//!
//! Keeping them apart lets an adapter stop admitting (DISCARDING) while
//! servant uses that were already admitted run to completion.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use orb_protocol::{
    AdapterId, AdapterState, IdAssignment, Lifespan, ObjectId, ObjectReference, OrbError, Policy,
    PolicySet, PolicyType, ReferenceTemplate, RequestProcessing, ServantRetention,
};
use orb_servants::{Incarnation, ServantManager, ServantRef};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::context::InvocationContext;
use crate::notify::NotifierChain;
use crate::resolver::{
    ActiveObjectMap, MapEntryValue, Resolution, ResolutionStrategy, ServantHandle, ServantOrigin,
};

/// Identity of one adapter incarnation, as reported to notifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    pub id: AdapterId,
    pub name: String,
    pub lifespan: Lifespan,
    pub incarnation: Option<u32>,
}

/// Builds outgoing references from the adapter's template.
///
/// Replaceable only while the adapter is being created.
pub trait ReferenceFactory: Send + Sync {
    fn make_reference(
        &self,
        template: &ReferenceTemplate,
        object_id: ObjectId,
        type_id: &str,
    ) -> ObjectReference;

    fn name(&self) -> &str;
}

/// Uses the template as is.
pub struct TemplateReferenceFactory;

impl ReferenceFactory for TemplateReferenceFactory {
    fn make_reference(
        &self,
        template: &ReferenceTemplate,
        object_id: ObjectId,
        type_id: &str,
    ) -> ObjectReference {
        template.make_reference(object_id, type_id)
    }

    fn name(&self) -> &str {
        "template"
    }
}

/// Mutable view of an adapter under construction.
///
/// Handed to the creation callback. Everything set here is frozen when the
/// builder is consumed; the adapter exposes no way to change it afterwards.
pub struct AdapterBuilder {
    id: AdapterId,
    name: String,
    template: ReferenceTemplate,
    reference_factory: Arc<dyn ReferenceFactory>,
    policies: PolicySet,
    strategy: ResolutionStrategy,
    manager: Option<Arc<dyn ServantManager>>,
    default_servant: Option<ServantRef>,
    staged: Vec<(ObjectId, MapEntryValue)>,
}

impl AdapterBuilder {
    pub(crate) fn new(
        id: AdapterId,
        name: impl Into<String>,
        template: ReferenceTemplate,
        strategy: ResolutionStrategy,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            template,
            reference_factory: Arc::new(TemplateReferenceFactory),
            policies: PolicySet::defaults_for(strategy.lifespan()),
            strategy,
            manager: None,
            default_servant: None,
            staged: Vec::new(),
        }
    }

    pub fn id(&self) -> AdapterId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn template(&self) -> &ReferenceTemplate {
        &self.template
    }

    pub fn template_mut(&mut self) -> &mut ReferenceTemplate {
        &mut self.template
    }

    pub fn set_reference_factory(&mut self, factory: Arc<dyn ReferenceFactory>) {
        self.reference_factory = factory;
    }

    pub fn policies(&self) -> &PolicySet {
        &self.policies
    }

    /// The lifespan is fixed by the factory kind and cannot be overridden.
    pub fn set_policy(&mut self, policy: Policy) -> Result<(), OrbError> {
        if let Policy::Lifespan(l) = policy {
            if l != self.strategy.lifespan() {
                return Err(OrbError::wrong_policy(format!(
                    "lifespan of adapter {} is fixed to {:?}",
                    self.name,
                    self.strategy.lifespan()
                )));
            }
        }
        self.policies.set(policy);
        Ok(())
    }

    pub fn set_servant_manager(&mut self, manager: Arc<dyn ServantManager>) {
        self.manager = Some(manager);
    }

    pub fn set_default_servant(&mut self, servant: ServantRef) {
        self.default_servant = Some(servant);
    }

    /// Bind a servant under a user-chosen id before the adapter goes live.
    pub fn activate_object_with_id(&mut self, id: impl Into<ObjectId>, servant: ServantRef) {
        self.staged.push((id.into(), MapEntryValue::Servant(servant)));
    }

    /// Redirect requests for `id` to `reference` from the start.
    pub fn forward_object(&mut self, id: impl Into<ObjectId>, reference: ObjectReference) {
        self.staged.push((id.into(), MapEntryValue::Forward(reference)));
    }

    fn validate(&self) -> Result<(), OrbError> {
        let retention = self.policies.servant_retention();
        let processing = self.policies.request_processing();

        if retention == Some(ServantRetention::NonRetain)
            && processing == Some(RequestProcessing::ActiveObjectMapOnly)
        {
            return Err(OrbError::wrong_policy(
                "NON_RETAIN requires a servant manager or a default servant",
            ));
        }
        if processing == Some(RequestProcessing::UseServantManager) && self.manager.is_none() {
            return Err(OrbError::wrong_policy("USE_SERVANT_MANAGER without a servant manager"));
        }
        if processing == Some(RequestProcessing::UseDefaultServant) && self.default_servant.is_none() {
            return Err(OrbError::wrong_policy("USE_DEFAULT_SERVANT without a default servant"));
        }
        let staged_servants = self
            .staged
            .iter()
            .any(|(_, v)| matches!(v, MapEntryValue::Servant(_)));
        if staged_servants && retention == Some(ServantRetention::NonRetain) {
            return Err(OrbError::wrong_policy("NON_RETAIN adapters keep no active objects"));
        }
        Ok(())
    }

    pub(crate) fn build(self, notifier: Arc<NotifierChain>) -> Result<Arc<ObjectAdapter>, OrbError> {
        self.validate()?;

        let objects = ActiveObjectMap::default();
        for (id, value) in self.staged {
            if !objects.insert_new(id.clone(), value) {
                return Err(OrbError::ObjectAlreadyActive {
                    adapter: self.id,
                    object_id: id,
                });
            }
        }

        let (idle, _) = watch::channel(true);
        Ok(Arc::new(ObjectAdapter {
            id: self.id,
            name: self.name,
            template: Arc::new(self.template),
            reference_factory: self.reference_factory,
            policies: self.policies,
            strategy: self.strategy,
            objects,
            manager: self.manager,
            default_servant: self.default_servant,
            lifecycle: Mutex::new(Lifecycle {
                state: AdapterState::Holding,
                in_flight: 0,
                pending: VecDeque::new(),
            }),
            notify_gate: Mutex::new(()),
            destroyed: AtomicBool::new(false),
            retired: AtomicBool::new(false),
            idle,
            outstanding: AtomicUsize::new(0),
            notifier,
        }))
    }
}

struct Lifecycle {
    state: AdapterState,
    in_flight: usize,
    /// Transitions not yet handed to the notifier chain, oldest first.
    pending: VecDeque<AdapterState>,
}

impl Lifecycle {
    fn transition(&mut self, to: AdapterState) {
        self.state = to;
        self.pending.push_back(to);
    }
}

pub struct ObjectAdapter {
    id: AdapterId,
    name: String,
    template: Arc<ReferenceTemplate>,
    reference_factory: Arc<dyn ReferenceFactory>,
    policies: PolicySet,
    strategy: ResolutionStrategy,
    objects: ActiveObjectMap,
    manager: Option<Arc<dyn ServantManager>>,
    default_servant: Option<ServantRef>,
    lifecycle: Mutex<Lifecycle>,
    /// Held by whichever thread is delivering `Lifecycle::pending`.
    notify_gate: Mutex<()>,
    /// Mirrors `state == Destroyed` for the lock-free object map operations.
    destroyed: AtomicBool,
    /// Set once the last admitted request has left a destroyed adapter and
    /// the active object map has been dropped.
    retired: AtomicBool,
    /// `true` whenever nothing is in flight.
    idle: watch::Sender<bool>,
    outstanding: AtomicUsize,
    notifier: Arc<NotifierChain>,
}

impl ObjectAdapter {
    pub fn id(&self) -> AdapterId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lifespan(&self) -> Lifespan {
        self.strategy.lifespan()
    }

    pub fn incarnation(&self) -> Option<u32> {
        self.strategy.incarnation()
    }

    pub fn info(&self) -> AdapterInfo {
        AdapterInfo {
            id: self.id,
            name: self.name.clone(),
            lifespan: self.lifespan(),
            incarnation: self.incarnation(),
        }
    }

    pub fn state(&self) -> AdapterState {
        self.lifecycle.lock().state
    }

    /// Requests admitted by `enter` and not yet `exit`ed.
    pub fn in_flight(&self) -> usize {
        self.lifecycle.lock().in_flight
    }

    /// Servant handles resolved and not yet released.
    pub fn outstanding_servants(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn reference_template(&self) -> &Arc<ReferenceTemplate> {
        &self.template
    }

    pub fn reference_factory_name(&self) -> &str {
        self.reference_factory.name()
    }

    pub fn effective_policy(&self, policy_type: PolicyType) -> Option<Policy> {
        self.policies.get(policy_type)
    }

    pub fn policies(&self) -> &PolicySet {
        &self.policies
    }

    /// A fresh context for `object_id`; touches no adapter state.
    pub fn make_invocation_context(self: &Arc<Self>, object_id: ObjectId) -> InvocationContext {
        InvocationContext::new(self.clone(), object_id)
    }

    // ── Request path ──────────────────────────────────────────────────────

    /// Admit one request. Every `Ok` must be matched by exactly one `exit`.
    pub fn enter(&self) -> Result<(), OrbError> {
        let mut lc = self.lifecycle.lock();
        match lc.state {
            AdapterState::Active => {
                lc.in_flight += 1;
                if lc.in_flight == 1 {
                    self.idle.send_replace(false);
                }
                Ok(())
            }
            AdapterState::Destroyed => Err(OrbError::Destroyed { adapter: self.id }),
            state => Err(OrbError::NotActive {
                adapter: self.id,
                state,
            }),
        }
    }

    /// The last `exit` after `destroy` drops the active object map.
    pub fn exit(&self) {
        let retire = {
            let mut lc = self.lifecycle.lock();
            if lc.in_flight == 0 {
                warn!("exit() on adapter {} with nothing in flight", self.id);
                return;
            }
            lc.in_flight -= 1;
            if lc.in_flight > 0 {
                return;
            }
            match lc.state {
                AdapterState::Destroyed => true,
                AdapterState::Discarding => {
                    lc.transition(AdapterState::Inactive);
                    self.idle.send_replace(true);
                    false
                }
                _ => {
                    self.idle.send_replace(true);
                    false
                }
            }
        };
        self.flush_transitions();
        if retire {
            // Waiters wake after etherealization; `enter` fails from here on.
            self.retire();
            self.idle.send_replace(true);
        }
    }

    /// Find the servant for `object_id`. A `Resolved` outcome must be
    /// matched by exactly one `release`.
    ///
    /// Requests admitted before `destroy` still resolve against the active
    /// object map; it is only dropped after the last of them exits.
    pub fn resolve(&self, object_id: &ObjectId) -> Resolution {
        if self.retired.load(Ordering::Acquire) {
            return Resolution::NotFound;
        }
        let ids = self.policies.id_assignment().unwrap_or(IdAssignment::User);
        if !self.strategy.recognizes(object_id, ids) {
            debug!("Adapter {} does not recognize id {}", self.id, object_id);
            return Resolution::NotFound;
        }

        let resolution = match self.objects.get(object_id) {
            Some(MapEntryValue::Servant(servant)) => Resolution::Resolved(ServantHandle::new(
                object_id.clone(),
                servant,
                ServantOrigin::ActiveObjectMap,
            )),
            Some(MapEntryValue::Forward(reference)) => Resolution::Forward(reference),
            None => self.resolve_unmapped(object_id),
        };

        match &resolution {
            Resolution::Resolved(_) => {
                self.outstanding.fetch_add(1, Ordering::AcqRel);
            }
            Resolution::Forward(to) => debug!("Adapter {} forwards {} to {}", self.id, object_id, to),
            Resolution::NotFound => debug!("Adapter {} has no servant for {}", self.id, object_id),
        }
        resolution
    }

    fn resolve_unmapped(&self, object_id: &ObjectId) -> Resolution {
        match self.policies.request_processing() {
            Some(RequestProcessing::UseDefaultServant) => match &self.default_servant {
                Some(servant) => Resolution::Resolved(ServantHandle::new(
                    object_id.clone(),
                    servant.clone(),
                    ServantOrigin::DefaultServant,
                )),
                None => Resolution::NotFound,
            },
            Some(RequestProcessing::UseServantManager) => {
                let Some(manager) = &self.manager else {
                    return Resolution::NotFound;
                };
                match manager.incarnate(self.id, object_id) {
                    Incarnation::Servant(servant) => self.adopt_incarnation(manager, object_id, servant),
                    Incarnation::Forward(reference) => Resolution::Forward(reference),
                    Incarnation::NotFound => Resolution::NotFound,
                }
            }
            _ => Resolution::NotFound,
        }
    }

    fn adopt_incarnation(
        &self,
        manager: &Arc<dyn ServantManager>,
        object_id: &ObjectId,
        servant: ServantRef,
    ) -> Resolution {
        if self.policies.servant_retention() == Some(ServantRetention::NonRetain) {
            return Resolution::Resolved(ServantHandle::new(
                object_id.clone(),
                servant,
                ServantOrigin::Incarnated,
            ));
        }
        let (winner, kept) = self.objects.insert_or_existing(object_id.clone(), servant.clone());
        if !kept {
            // Lost a race with a concurrent incarnation of the same id.
            manager.etherealize(self.id, object_id, &servant, false);
        }
        match winner {
            MapEntryValue::Servant(s) => Resolution::Resolved(ServantHandle::new(
                object_id.clone(),
                s,
                ServantOrigin::ActiveObjectMap,
            )),
            MapEntryValue::Forward(reference) => Resolution::Forward(reference),
        }
    }

    /// End one use of a resolved servant.
    pub fn release(&self, handle: ServantHandle) {
        let prev = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if prev.is_err() {
            warn!("release() on adapter {} with no outstanding servants", self.id);
        }
        if handle.origin() == ServantOrigin::Incarnated {
            if let Some(manager) = &self.manager {
                manager.etherealize(self.id, handle.object_id(), handle.servant(), false);
            }
        }
    }

    // ── Administrative path ───────────────────────────────────────────────

    pub fn activate(&self) -> Result<(), OrbError> {
        let changed = {
            let mut lc = self.lifecycle.lock();
            match lc.state {
                AdapterState::Destroyed => return Err(OrbError::Destroyed { adapter: self.id }),
                AdapterState::Active => false,
                _ => {
                    lc.transition(AdapterState::Active);
                    true
                }
            }
        };
        if changed {
            info!("Adapter {} ({}) activated", self.name, self.id);
            self.flush_transitions();
        }
        Ok(())
    }

    /// Stop admitting requests. With requests in flight the adapter drains
    /// through DISCARDING; the last `exit` moves it to INACTIVE.
    pub fn hold(&self) -> Result<(), OrbError> {
        let changed = {
            let mut lc = self.lifecycle.lock();
            match lc.state {
                AdapterState::Destroyed => return Err(OrbError::Destroyed { adapter: self.id }),
                AdapterState::Active if lc.in_flight > 0 => {
                    lc.transition(AdapterState::Discarding);
                    Some(AdapterState::Discarding)
                }
                AdapterState::Active => {
                    lc.transition(AdapterState::Inactive);
                    Some(AdapterState::Inactive)
                }
                _ => None,
            }
        };
        if let Some(state) = changed {
            info!("Adapter {} ({}) holding -> {}", self.name, self.id, state);
            self.flush_transitions();
        }
        Ok(())
    }

    /// Destroy the adapter. Requests already admitted finish normally,
    /// servant resolution included; every later `enter` fails with
    /// `Destroyed`. Destroying twice is a no-op.
    pub fn destroy(&self) {
        let idle = {
            let mut lc = self.lifecycle.lock();
            if lc.state == AdapterState::Destroyed {
                return;
            }
            lc.transition(AdapterState::Destroyed);
            self.destroyed.store(true, Ordering::Release);
            info!(
                "Adapter {} ({}) destroyed with {} requests in flight",
                self.name, self.id, lc.in_flight
            );
            lc.in_flight == 0
        };
        self.flush_transitions();
        if idle {
            self.retire();
        }
    }

    /// Wait until nothing is in flight, bounded by `timeout`.
    pub async fn wait_for_completion(&self, timeout: Duration) -> Result<(), OrbError> {
        let mut idle = self.idle.subscribe();
        match tokio::time::timeout(timeout, idle.wait_for(|now_idle| *now_idle)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(OrbError::Internal(format!(
                "completion channel of adapter {} closed",
                self.id
            ))),
            Err(_) => Err(OrbError::Timeout(format!(
                "adapter {} still has {} requests in flight",
                self.id,
                self.in_flight()
            ))),
        }
    }

    pub async fn destroy_and_wait(&self, timeout: Duration) -> Result<(), OrbError> {
        self.destroy();
        self.wait_for_completion(timeout).await
    }

    fn retire(&self) {
        if self.retired.swap(true, Ordering::AcqRel) {
            return;
        }
        let entries = self.objects.drain();
        let Some(manager) = &self.manager else {
            return;
        };
        for (id, entry) in entries {
            if let MapEntryValue::Servant(servant) = entry {
                manager.etherealize(self.id, &id, &servant, true);
            }
        }
    }

    /// Deliver queued transitions in the order they happened.
    ///
    /// One thread delivers at a time. A caller that finds the gate taken
    /// leaves its transition to the current holder, which re-checks the
    /// queue after letting go of the gate. A notifier that changes the state
    /// of this adapter therefore sees its own transition delivered after the
    /// one it is handling.
    fn flush_transitions(&self) {
        loop {
            {
                let Some(_gate) = self.notify_gate.try_lock() else {
                    return;
                };
                while let Some(state) = self.next_transition() {
                    self.notifier.adapter_state_changed(self.id, state.external());
                }
            }
            if self.lifecycle.lock().pending.is_empty() {
                return;
            }
        }
    }

    fn next_transition(&self) -> Option<AdapterState> {
        self.lifecycle.lock().pending.pop_front()
    }

    // ── Active object map ─────────────────────────────────────────────────

    fn ensure_alive(&self) -> Result<(), OrbError> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(OrbError::Destroyed { adapter: self.id });
        }
        Ok(())
    }

    fn ensure_retain(&self) -> Result<(), OrbError> {
        if self.policies.servant_retention() == Some(ServantRetention::NonRetain) {
            return Err(OrbError::wrong_policy("operation requires RETAIN"));
        }
        Ok(())
    }

    /// Bind `servant` under a freshly generated system id.
    pub fn activate_object(&self, servant: ServantRef) -> Result<ObjectId, OrbError> {
        self.ensure_alive()?;
        self.ensure_retain()?;
        if self.policies.id_assignment() != Some(IdAssignment::System) {
            return Err(OrbError::wrong_policy("activate_object requires SYSTEM_ID"));
        }
        let id = self.strategy.generate_id();
        if !self.objects.insert_new(id.clone(), MapEntryValue::Servant(servant)) {
            return Err(OrbError::ObjectAlreadyActive {
                adapter: self.id,
                object_id: id,
            });
        }
        debug!("Adapter {} activated object {}", self.id, id);
        Ok(id)
    }

    pub fn activate_object_with_id(
        &self,
        id: impl Into<ObjectId>,
        servant: ServantRef,
    ) -> Result<(), OrbError> {
        self.ensure_alive()?;
        self.ensure_retain()?;
        if self.policies.id_assignment() != Some(IdAssignment::User) {
            return Err(OrbError::wrong_policy("activate_object_with_id requires USER_ID"));
        }
        let id = id.into();
        if id.is_empty() {
            return Err(OrbError::InvalidObjectId("empty object id".into()));
        }
        if !self.objects.insert_new(id.clone(), MapEntryValue::Servant(servant)) {
            return Err(OrbError::ObjectAlreadyActive {
                adapter: self.id,
                object_id: id,
            });
        }
        debug!("Adapter {} activated object {}", self.id, id);
        Ok(())
    }

    /// Unbind `id`. Handles already resolved stay usable until released.
    pub fn deactivate_object(&self, id: &ObjectId) -> Result<(), OrbError> {
        self.ensure_alive()?;
        match self.objects.remove(id) {
            Some(MapEntryValue::Servant(servant)) => {
                if let Some(manager) = &self.manager {
                    manager.etherealize(self.id, id, &servant, false);
                }
                Ok(())
            }
            Some(MapEntryValue::Forward(_)) => Ok(()),
            None => Err(OrbError::ObjectNotFound {
                adapter: self.id,
                object_id: id.clone(),
            }),
        }
    }

    /// Redirect requests for `id` to `reference`, replacing any binding.
    pub fn forward_object(&self, id: impl Into<ObjectId>, reference: ObjectReference) -> Result<(), OrbError> {
        self.ensure_alive()?;
        self.objects.upsert(id.into(), MapEntryValue::Forward(reference));
        Ok(())
    }

    pub fn create_reference(&self, object_id: impl Into<ObjectId>, type_id: &str) -> ObjectReference {
        self.reference_factory
            .make_reference(&self.template, object_id.into(), type_id)
    }

    /// Reference to an active object, typed after its servant.
    pub fn id_to_reference(&self, id: &ObjectId) -> Result<ObjectReference, OrbError> {
        match self.objects.get(id) {
            Some(MapEntryValue::Servant(servant)) => {
                Ok(self.create_reference(id.clone(), servant.repository_id_dyn()))
            }
            Some(MapEntryValue::Forward(reference)) => Ok(reference),
            None => Err(OrbError::ObjectNotFound {
                adapter: self.id,
                object_id: id.clone(),
            }),
        }
    }
}

impl std::fmt::Debug for ObjectAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectAdapter")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("lifespan", &self.lifespan())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{active_adapter, holding_adapter, transient_builder};
    use orb_protocol::{AdapterEvent, ManagerState};
    use orb_servants::demo::{EchoActivator, EchoServant};
    use orb_servants::{Current, servant};

    fn states(rx: &mut tokio::sync::broadcast::Receiver<AdapterEvent>) -> Vec<ManagerState> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let AdapterEvent::StateChanged { state, .. } = event {
                out.push(state);
            }
        }
        out
    }

    // ── State machine ─────────────────────────────────────────────────────

    #[test]
    fn starts_holding_and_rejects() {
        let (adapter, _) = holding_adapter();
        assert_eq!(adapter.state(), AdapterState::Holding);
        assert_eq!(
            adapter.enter(),
            Err(OrbError::NotActive {
                adapter: adapter.id(),
                state: AdapterState::Holding
            })
        );
        adapter.activate().unwrap();
        adapter.enter().unwrap();
        assert_eq!(adapter.in_flight(), 1);
        adapter.exit();
        assert_eq!(adapter.in_flight(), 0);
    }

    #[test]
    fn hold_drains_through_discarding() {
        let (adapter, notifier) = holding_adapter();
        let mut rx = notifier.subscribe();
        adapter.activate().unwrap();
        adapter.enter().unwrap();
        adapter.enter().unwrap();

        adapter.hold().unwrap();
        assert_eq!(adapter.state(), AdapterState::Discarding);
        assert!(matches!(adapter.enter(), Err(OrbError::NotActive { .. })));

        adapter.exit();
        assert_eq!(adapter.state(), AdapterState::Discarding);
        adapter.exit();
        assert_eq!(adapter.state(), AdapterState::Inactive);

        assert_eq!(
            states(&mut rx),
            vec![ManagerState::Active, ManagerState::Discarding, ManagerState::Inactive]
        );
    }

    #[test]
    fn hold_when_idle_goes_inactive() {
        let adapter = active_adapter();
        adapter.hold().unwrap();
        assert_eq!(adapter.state(), AdapterState::Inactive);
        adapter.activate().unwrap();
        assert_eq!(adapter.state(), AdapterState::Active);
    }

    #[test]
    fn destroy_is_terminal_and_idempotent() {
        let (adapter, notifier) = holding_adapter();
        let mut rx = notifier.subscribe();
        adapter.destroy();
        adapter.destroy();

        assert_eq!(adapter.enter(), Err(OrbError::Destroyed { adapter: adapter.id() }));
        assert_eq!(adapter.enter(), Err(OrbError::Destroyed { adapter: adapter.id() }));
        assert!(adapter.activate().is_err());
        assert!(adapter.hold().is_err());
        assert_eq!(states(&mut rx), vec![ManagerState::NonExistent]);
    }

    #[test]
    fn exit_underflow_is_ignored() {
        let adapter = active_adapter();
        adapter.exit();
        assert_eq!(adapter.in_flight(), 0);
    }

    #[tokio::test]
    async fn wait_for_completion_times_out() {
        let adapter = active_adapter();
        adapter.enter().unwrap();
        let err = adapter
            .wait_for_completion(Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, OrbError::Timeout(_)));

        adapter.exit();
        adapter.wait_for_completion(Duration::from_millis(20)).await.unwrap();
    }

    #[tokio::test]
    async fn destroy_and_wait_returns_after_last_exit() {
        let adapter = active_adapter();
        adapter.enter().unwrap();
        let waiter = {
            let adapter = adapter.clone();
            tokio::spawn(async move { adapter.destroy_and_wait(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());
        adapter.exit();
        waiter.await.unwrap().unwrap();
    }

    // ── Resolution ────────────────────────────────────────────────────────

    #[test]
    fn resolve_counts_outstanding() {
        let adapter = active_adapter();
        let id = adapter.activate_object(servant(EchoServant::new())).unwrap();
        let Resolution::Resolved(handle) = adapter.resolve(&id) else {
            panic!("expected a servant");
        };
        assert_eq!(handle.origin(), ServantOrigin::ActiveObjectMap);
        assert_eq!(adapter.outstanding_servants(), 1);
        adapter.release(handle);
        assert_eq!(adapter.outstanding_servants(), 0);
    }

    #[test]
    fn foreign_incarnation_ids_not_found() {
        let adapter = active_adapter();
        let other = ResolutionStrategy::Transient {
            incarnation: 9,
            next_id: Default::default(),
        };
        assert!(matches!(adapter.resolve(&other.generate_id()), Resolution::NotFound));
    }

    #[test]
    fn destroyed_adapter_resolves_nothing() {
        let adapter = active_adapter();
        let id = adapter.activate_object(servant(EchoServant::new())).unwrap();
        adapter.destroy();
        assert!(matches!(adapter.resolve(&id), Resolution::NotFound));
        assert_eq!(adapter.object_count(), 0);
    }

    #[test]
    fn default_servant_serves_unmapped_ids() {
        let mut b = transient_builder(3);
        b.set_policy(Policy::IdAssignment(IdAssignment::User)).unwrap();
        b.set_policy(Policy::RequestProcessing(RequestProcessing::UseDefaultServant))
            .unwrap();
        b.set_default_servant(servant(EchoServant::new()));
        let adapter = b.build(Arc::new(NotifierChain::new(4))).unwrap();

        let Resolution::Resolved(handle) = adapter.resolve(&ObjectId::from("anything")) else {
            panic!("expected default servant");
        };
        assert_eq!(handle.origin(), ServantOrigin::DefaultServant);
        adapter.release(handle);
    }

    #[test]
    fn retained_incarnation_is_kept() {
        let activator = Arc::new(EchoActivator::new("x"));
        let mut b = transient_builder(3);
        b.set_policy(Policy::IdAssignment(IdAssignment::User)).unwrap();
        b.set_policy(Policy::RequestProcessing(RequestProcessing::UseServantManager))
            .unwrap();
        b.set_servant_manager(activator.clone());
        let adapter = b.build(Arc::new(NotifierChain::new(4))).unwrap();

        let id = ObjectId::from("x1");
        for _ in 0..2 {
            let Resolution::Resolved(handle) = adapter.resolve(&id) else {
                panic!("expected incarnation");
            };
            adapter.release(handle);
        }
        assert_eq!(activator.log(), vec!["incarnate:x1"]);
        assert_eq!(adapter.object_count(), 1);

        adapter.deactivate_object(&id).unwrap();
        assert_eq!(activator.log(), vec!["incarnate:x1", "etherealize:x1"]);
        assert!(matches!(adapter.resolve(&ObjectId::from("y")), Resolution::NotFound));
    }

    // ── Policies and the active object map ────────────────────────────────

    #[test]
    fn invalid_policy_combinations_rejected() {
        let mut b = transient_builder(1);
        b.set_policy(Policy::ServantRetention(ServantRetention::NonRetain)).unwrap();
        assert!(matches!(
            b.build(Arc::new(NotifierChain::new(4))),
            Err(OrbError::WrongPolicy(_))
        ));

        let mut b = transient_builder(1);
        b.set_policy(Policy::RequestProcessing(RequestProcessing::UseServantManager))
            .unwrap();
        assert!(b.build(Arc::new(NotifierChain::new(4))).is_err());

        let mut b = transient_builder(1);
        assert!(b.set_policy(Policy::Lifespan(Lifespan::Persistent)).is_err());
    }

    #[test]
    fn id_assignment_gates_activation() {
        let adapter = active_adapter();
        let err = adapter
            .activate_object_with_id("mine", servant(EchoServant::new()))
            .unwrap_err();
        assert!(matches!(err, OrbError::WrongPolicy(_)));

        let id = adapter.activate_object(servant(EchoServant::new())).unwrap();
        let r = adapter.id_to_reference(&id).unwrap();
        assert_eq!(r.object_id, id);
        assert_eq!(r.type_id, EchoServant::REPOSITORY_ID);
        assert_eq!(r.adapter_id, adapter.id());
    }

    #[test]
    fn deactivate_unknown_object() {
        let adapter = active_adapter();
        let err = adapter.deactivate_object(&ObjectId::from("nope")).unwrap_err();
        assert!(matches!(err, OrbError::ObjectNotFound { .. }));
    }

    #[test]
    fn staged_duplicates_rejected() {
        let mut b = transient_builder(1);
        b.set_policy(Policy::IdAssignment(IdAssignment::User)).unwrap();
        b.activate_object_with_id("dup", servant(EchoServant::new()));
        b.activate_object_with_id("dup", servant(EchoServant::new()));
        assert!(matches!(
            b.build(Arc::new(NotifierChain::new(4))),
            Err(OrbError::ObjectAlreadyActive { .. })
        ));
    }

    #[test]
    fn custom_reference_factory() {
        struct Typed;
        impl ReferenceFactory for Typed {
            fn make_reference(&self, template: &ReferenceTemplate, object_id: ObjectId, _: &str) -> ObjectReference {
                template.make_reference(object_id, "IDL:override:1.0")
            }
            fn name(&self) -> &str {
                "typed"
            }
        }

        let mut b = transient_builder(1);
        b.set_reference_factory(Arc::new(Typed));
        let adapter = b.build(Arc::new(NotifierChain::new(4))).unwrap();
        assert_eq!(adapter.reference_factory_name(), "typed");
        let r = adapter.create_reference("o", EchoServant::REPOSITORY_ID);
        assert_eq!(r.type_id, "IDL:override:1.0");
        assert_eq!(
            adapter.effective_policy(PolicyType::Lifespan),
            Some(Policy::Lifespan(Lifespan::Transient))
        );
    }

    // ── Destroy with admitted requests ────────────────────────────────────

    fn managed_adapter(activator: Arc<EchoActivator>) -> Arc<ObjectAdapter> {
        let mut b = transient_builder(3);
        b.set_policy(Policy::IdAssignment(IdAssignment::User)).unwrap();
        b.set_policy(Policy::RequestProcessing(RequestProcessing::UseServantManager))
            .unwrap();
        b.set_servant_manager(activator);
        b.activate_object_with_id("obj-42", servant(EchoServant::new()));
        let adapter = b.build(Arc::new(NotifierChain::new(16))).unwrap();
        adapter.activate().unwrap();
        adapter
    }

    #[tokio::test]
    async fn admitted_request_resolves_after_destroy() {
        let activator = Arc::new(EchoActivator::new("x"));
        let adapter = managed_adapter(activator.clone());

        adapter.enter().unwrap();
        adapter.destroy();
        assert_eq!(adapter.enter(), Err(OrbError::Destroyed { adapter: adapter.id() }));

        let id = ObjectId::from("obj-42");
        let Resolution::Resolved(handle) = adapter.resolve(&id) else {
            panic!("admitted request lost its servant");
        };
        let current = Current::new(adapter.id(), &id, "ping");
        let reply = handle.servant().invoke_dyn(current, None).await.unwrap();
        assert_eq!(reply, serde_json::json!("pong"));

        let incarnated = ObjectId::from("x1");
        let Resolution::Resolved(other) = adapter.resolve(&incarnated) else {
            panic!("servant manager not consulted");
        };
        adapter.release(handle);
        adapter.release(other);
        assert_eq!(activator.log(), vec!["incarnate:x1"]);
        assert_eq!(adapter.object_count(), 2);

        adapter.exit();
        let mut log = activator.log();
        log.sort();
        assert_eq!(log, vec!["etherealize:obj-42", "etherealize:x1", "incarnate:x1"]);
        assert_eq!(adapter.object_count(), 0);
        assert!(matches!(adapter.resolve(&id), Resolution::NotFound));
    }

    #[tokio::test]
    async fn waiters_wake_after_cleanup() {
        let activator = Arc::new(EchoActivator::new("x"));
        let adapter = managed_adapter(activator.clone());
        adapter.enter().unwrap();

        let waiter = {
            let adapter = adapter.clone();
            tokio::spawn(async move { adapter.destroy_and_wait(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(activator.log().is_empty());

        adapter.exit();
        waiter.await.unwrap().unwrap();
        assert_eq!(activator.log(), vec!["etherealize:obj-42"]);
    }

    // ── Notification order ────────────────────────────────────────────────

    #[derive(Default)]
    struct StateLog {
        seen: parking_lot::Mutex<Vec<ManagerState>>,
        /// Re-activates the adapter whenever it reports INACTIVE.
        reactivate: parking_lot::Mutex<Option<std::sync::Weak<ObjectAdapter>>>,
    }

    impl crate::notify::RuntimeNotifier for StateLog {
        fn adapter_state_changed(
            &self,
            _adapter: AdapterId,
            state: ManagerState,
        ) -> Result<(), crate::notify::NotifyError> {
            self.seen.lock().push(state);
            if state == ManagerState::Inactive {
                let target = self.reactivate.lock().as_ref().and_then(std::sync::Weak::upgrade);
                if let Some(adapter) = target {
                    adapter.activate().map_err(|e| crate::notify::NotifyError::new(e.to_string()))?;
                }
            }
            Ok(())
        }

        fn name(&self) -> &str {
            "state-log"
        }
    }

    #[test]
    fn notifier_transition_is_delivered_after_the_current_one() {
        let (adapter, notifier) = holding_adapter();
        let log = Arc::new(StateLog::default());
        *log.reactivate.lock() = Some(Arc::downgrade(&adapter));
        notifier.add(log.clone());

        adapter.activate().unwrap();
        adapter.hold().unwrap();

        assert_eq!(
            *log.seen.lock(),
            vec![ManagerState::Active, ManagerState::Inactive, ManagerState::Active]
        );
        assert_eq!(adapter.state(), AdapterState::Active);
        assert_eq!(notifier.failures(), 0);
    }

    #[test]
    fn concurrent_transitions_notify_in_order() {
        let (adapter, notifier) = holding_adapter();
        let log = Arc::new(StateLog::default());
        notifier.add(log.clone());
        adapter.activate().unwrap();

        std::thread::scope(|s| {
            for _ in 0..3 {
                s.spawn(|| {
                    for _ in 0..500 {
                        if adapter.enter().is_ok() {
                            adapter.exit();
                        }
                    }
                });
            }
            s.spawn(|| {
                for _ in 0..500 {
                    adapter.hold().unwrap();
                }
            });
            s.spawn(|| {
                for _ in 0..500 {
                    adapter.activate().unwrap();
                }
            });
        });

        let seen = log.seen.lock();
        assert_eq!(seen.last().copied(), Some(adapter.state().external()));
        // DISCARDING only ever ends in INACTIVE, or is cut short by ACTIVE.
        for pair in seen.windows(2) {
            if pair[0] == ManagerState::Discarding {
                assert!(matches!(pair[1], ManagerState::Inactive | ManagerState::Active), "{pair:?}");
            }
            assert_ne!(pair[0], pair[1], "duplicate transition in {seen:?}");
        }
    }
}
