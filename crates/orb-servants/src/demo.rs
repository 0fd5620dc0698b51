//! Small servants used by the CLI driver and the tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use orb_protocol::{AdapterId, InvocationResult, ObjectId, OrbError};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tracing::debug;

use crate::{Current, Incarnation, Servant, ServantManager, ServantRef};

/// Echoes its arguments back, tagged with the object it was addressed to.
#[derive(Debug, Default)]
pub struct EchoServant;

impl EchoServant {
    pub const REPOSITORY_ID: &str = "IDL:demo/Echo:1.0";

    pub fn new() -> Self {
        Self
    }
}

impl Servant for EchoServant {
    fn repository_id(&self) -> &str {
        Self::REPOSITORY_ID
    }

    async fn invoke(&self, current: Current<'_>, args: Option<Value>) -> InvocationResult {
        match current.operation {
            "echo" => Ok(json!({
                "object": current.object_id.to_string(),
                "args": args.unwrap_or(Value::Null),
            })),
            "ping" => Ok(json!("pong")),
            "fail" => Err(OrbError::servant("echo asked to fail")),
            other => Err(OrbError::bad_operation(other)),
        }
    }
}

/// A shared counter.
#[derive(Debug, Default)]
pub struct CounterServant {
    value: AtomicI64,
}

impl CounterServant {
    pub const REPOSITORY_ID: &str = "IDL:demo/Counter:1.0";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self) -> i64 {
        self.value.load(Ordering::SeqCst)
    }
}

impl Servant for CounterServant {
    fn repository_id(&self) -> &str {
        Self::REPOSITORY_ID
    }

    async fn invoke(&self, current: Current<'_>, args: Option<Value>) -> InvocationResult {
        match current.operation {
            "increment" => {
                let by = args.as_ref().and_then(Value::as_i64).unwrap_or(1);
                let now = self.value.fetch_add(by, Ordering::SeqCst) + by;
                Ok(json!(now))
            }
            "get" => Ok(json!(self.value())),
            "reset" => {
                self.value.store(0, Ordering::SeqCst);
                Ok(Value::Null)
            }
            other => Err(OrbError::bad_operation(other)),
        }
    }
}

/// Incarnates an [`EchoServant`] for any id that starts with `prefix`, and
/// records every incarnate/etherealize call.
pub struct EchoActivator {
    prefix: Vec<u8>,
    log: Mutex<Vec<String>>,
    live: Mutex<HashMap<ObjectId, usize>>,
}

impl EchoActivator {
    pub fn new(prefix: impl Into<Vec<u8>>) -> Self {
        Self {
            prefix: prefix.into(),
            log: Mutex::new(Vec::new()),
            live: Mutex::new(HashMap::new()),
        }
    }

    /// Calls seen so far, as `"incarnate:<id>"` / `"etherealize:<id>"`.
    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    /// Servants currently incarnated and not yet etherealized.
    pub fn live(&self) -> usize {
        self.live.lock().values().sum()
    }
}

impl ServantManager for EchoActivator {
    fn incarnate(&self, adapter: AdapterId, object_id: &ObjectId) -> Incarnation {
        if !object_id.as_bytes().starts_with(&self.prefix) {
            return Incarnation::NotFound;
        }
        debug!("Incarnating echo servant for {} in adapter {}", object_id, adapter);
        self.log.lock().push(format!("incarnate:{object_id}"));
        *self.live.lock().entry(object_id.clone()).or_insert(0) += 1;
        Incarnation::Servant(crate::servant(EchoServant::new()))
    }

    fn etherealize(
        &self,
        _adapter: AdapterId,
        object_id: &ObjectId,
        _servant: &ServantRef,
        _cleanup_in_progress: bool,
    ) {
        self.log.lock().push(format!("etherealize:{object_id}"));
        let mut live = self.live.lock();
        if let Some(count) = live.get_mut(object_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                live.remove(object_id);
            }
        }
    }

    fn name(&self) -> &str {
        "echo-activator"
    }
}
