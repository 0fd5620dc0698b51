//! Fixtures shared by the unit tests of this crate.

use std::sync::Arc;

use orb_protocol::{AdapterId, InvocationResult, Lifespan, ObjectReference, OrbError, ReferenceTemplate};
use orb_servants::{Current, Servant};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{Barrier, Semaphore};

use crate::adapter::{AdapterBuilder, ObjectAdapter};
use crate::config::DispatchConfig;
use crate::notify::NotifierChain;
use crate::registry::{AdapterEnv, AdapterFactory};
use crate::resolver::ResolutionStrategy;
use crate::runtime::OrbRuntime;

pub(crate) fn env() -> AdapterEnv {
    AdapterEnv {
        server_id: 1,
        orb_id: "test".into(),
        endpoints: Vec::new(),
        notifier: Arc::new(NotifierChain::new(64)),
    }
}

pub(crate) fn transient_builder(id: u32) -> AdapterBuilder {
    let template = ReferenceTemplate::new(1, "test", AdapterId(id), vec![format!("a{id}")], Lifespan::Transient)
        .with_incarnation(1);
    let strategy = ResolutionStrategy::Transient {
        incarnation: 1,
        next_id: Default::default(),
    };
    AdapterBuilder::new(AdapterId(id), format!("a{id}"), template, strategy)
}

/// A bare transient adapter in HOLDING, with its notifier chain.
pub(crate) fn holding_adapter() -> (Arc<ObjectAdapter>, Arc<NotifierChain>) {
    let notifier = Arc::new(NotifierChain::new(64));
    let adapter = transient_builder(1)
        .build(notifier.clone())
        .unwrap();
    (adapter, notifier)
}

pub(crate) fn active_adapter() -> Arc<ObjectAdapter> {
    let (adapter, _) = holding_adapter();
    adapter.activate().unwrap();
    adapter
}

/// A started runtime with default config and the given adapters.
pub(crate) fn runtime_with(factories: Vec<(AdapterId, AdapterFactory)>) -> Arc<OrbRuntime> {
    let runtime = OrbRuntime::new(DispatchConfig::default()).unwrap();
    for (id, factory) in factories {
        runtime.register_adapter(id, factory).unwrap();
    }
    runtime.start().unwrap();
    Arc::new(runtime)
}

/// Parks requests until the test lets them through.
///
/// `wait` signals `arrived` and blocks on `release`; `meet` waits on the
/// shared barrier.
pub(crate) struct GateServant {
    pub arrived: Arc<Semaphore>,
    pub release: Arc<Semaphore>,
    pub barrier: Option<Arc<Barrier>>,
}

impl Default for GateServant {
    fn default() -> Self {
        Self {
            arrived: Arc::new(Semaphore::new(0)),
            release: Arc::new(Semaphore::new(0)),
            barrier: None,
        }
    }
}

impl GateServant {
    pub(crate) fn with_barrier(barrier: Arc<Barrier>) -> Self {
        Self {
            barrier: Some(barrier),
            ..Default::default()
        }
    }
}

impl Servant for GateServant {
    fn repository_id(&self) -> &str {
        "IDL:test/Gate:1.0"
    }

    async fn invoke(&self, current: Current<'_>, _args: Option<Value>) -> InvocationResult {
        match current.operation {
            "wait" => {
                self.arrived.add_permits(1);
                self.release
                    .acquire()
                    .await
                    .map_err(|_| OrbError::Internal("gate closed".into()))?
                    .forget();
                Ok(json!("opened"))
            }
            "meet" => match &self.barrier {
                Some(barrier) => {
                    barrier.wait().await;
                    Ok(json!("met"))
                }
                None => Err(OrbError::bad_operation("meet")),
            },
            other => Err(OrbError::bad_operation(other)),
        }
    }
}

/// Records the `Current` it was invoked with.
#[derive(Default)]
pub(crate) struct FlagServant {
    pub seen: Arc<Mutex<Vec<String>>>,
}

impl Servant for FlagServant {
    fn repository_id(&self) -> &str {
        "IDL:test/Flag:1.0"
    }

    async fn invoke(&self, current: Current<'_>, _args: Option<Value>) -> InvocationResult {
        self.seen.lock().push(format!(
            "{}/{}:{}",
            current.adapter_id, current.object_id, current.operation
        ));
        Ok(Value::Null)
    }
}

/// Reports the worker stack depth it runs at; `relay` first calls `next`
/// through the outcall and reports both depths.
#[derive(Default)]
pub(crate) struct RelayServant {
    pub next: Option<ObjectReference>,
}

impl RelayServant {
    pub(crate) fn to(next: ObjectReference) -> Self {
        Self { next: Some(next) }
    }
}

impl Servant for RelayServant {
    fn repository_id(&self) -> &str {
        "IDL:test/Relay:1.0"
    }

    async fn invoke(&self, mut current: Current<'_>, args: Option<Value>) -> InvocationResult {
        let operation = current.operation;
        let Some(outcall) = current.outcall() else {
            return Err(OrbError::Internal("invoked without an outcall".into()));
        };
        match operation {
            "depth" => Ok(json!(outcall.depth())),
            "relay" => {
                let next = self
                    .next
                    .clone()
                    .ok_or_else(|| OrbError::bad_operation("relay"))?;
                let outer = outcall.depth();
                let inner = outcall.call(next, "depth", args).await?;
                Ok(json!({ "outer": outer, "inner": inner, "after": outcall.depth() }))
            }
            other => Err(OrbError::bad_operation(other)),
        }
    }
}
