//! Servants and servant managers.
//!
//! A servant services the requests addressed to one or more object ids.
//! Adapters hold servants as [`ServantRef`] and call them through the
//! object-safe [`ServantDyn`] wrapper. A [`ServantManager`] produces servants
//! on demand for ids that are not in an adapter's active object map.

pub mod demo;
pub mod manager;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use orb_protocol::{AdapterId, InvocationResult, ObjectId, ObjectReference};
use serde_json::Value;

pub use manager::{Incarnation, ServantManager};

/// Pseudo-operations answered for every servant without reaching `invoke`.
pub const OP_IS_A: &str = "_is_a";
pub const OP_NON_EXISTENT: &str = "_non_existent";

/// Way back into the dispatcher for collocated calls made while a servant
/// is running. Calls land on the calling worker's context stack, above the
/// context of the invocation that made them.
pub trait Outcall: Send {
    fn call<'a>(
        &'a mut self,
        target: ObjectReference,
        operation: &'a str,
        args: Option<Value>,
    ) -> Pin<Box<dyn Future<Output = InvocationResult> + Send + 'a>>;

    /// Contexts on the calling worker's stack, the caller's own included.
    fn depth(&self) -> usize;
}

/// The view of the current invocation handed to a servant.
pub struct Current<'a> {
    pub adapter_id: AdapterId,
    pub object_id: &'a ObjectId,
    pub operation: &'a str,
    outcall: Option<&'a mut (dyn Outcall + 'a)>,
}

impl<'a> Current<'a> {
    pub fn new(adapter_id: AdapterId, object_id: &'a ObjectId, operation: &'a str) -> Self {
        Self {
            adapter_id,
            object_id,
            operation,
            outcall: None,
        }
    }

    pub fn with_outcall(mut self, outcall: &'a mut (dyn Outcall + 'a)) -> Self {
        self.outcall = Some(outcall);
        self
    }

    /// `None` when the servant is called outside a dispatcher.
    pub fn outcall(&mut self) -> Option<&mut (dyn Outcall + 'a)> {
        self.outcall.as_deref_mut()
    }
}

impl std::fmt::Debug for Current<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Current")
            .field("adapter_id", &self.adapter_id)
            .field("object_id", &self.object_id)
            .field("operation", &self.operation)
            .field("outcall", &self.outcall.is_some())
            .finish()
    }
}

/// Trait implemented by all servants.
pub trait Servant: Send + Sync {
    /// Repository id of the most derived interface (e.g. "IDL:demo/Echo:1.0").
    fn repository_id(&self) -> &str;

    /// Service one operation.
    ///
    /// `args` is the already-decoded argument payload; this layer never
    /// looks inside it.
    fn invoke(
        &self,
        current: Current<'_>,
        args: Option<Value>,
    ) -> impl Future<Output = InvocationResult> + Send;

    fn is_a(&self, type_id: &str) -> bool {
        self.repository_id() == type_id
    }

    fn non_existent(&self) -> bool {
        false
    }
}

/// Object-safe version of [`Servant`].
pub trait ServantDyn: Send + Sync {
    fn repository_id_dyn(&self) -> &str;

    fn invoke_dyn<'a>(
        &'a self,
        current: Current<'a>,
        args: Option<Value>,
    ) -> Pin<Box<dyn Future<Output = InvocationResult> + Send + 'a>>;

    fn is_a_dyn(&self, type_id: &str) -> bool;
}

impl<T: Servant> ServantDyn for T {
    fn repository_id_dyn(&self) -> &str {
        self.repository_id()
    }

    fn invoke_dyn<'a>(
        &'a self,
        current: Current<'a>,
        args: Option<Value>,
    ) -> Pin<Box<dyn Future<Output = InvocationResult> + Send + 'a>> {
        let operation = current.operation;
        match operation {
            OP_IS_A => {
                let asked = args.as_ref().and_then(Value::as_str).unwrap_or("");
                let answer = self.is_a(asked);
                Box::pin(async move { Ok(Value::Bool(answer)) })
            }
            OP_NON_EXISTENT => {
                let answer = self.non_existent();
                Box::pin(async move { Ok(Value::Bool(answer)) })
            }
            _ => Box::pin(self.invoke(current, args)),
        }
    }

    fn is_a_dyn(&self, type_id: &str) -> bool {
        self.is_a(type_id)
    }
}

/// Shared handle to a servant.
pub type ServantRef = Arc<dyn ServantDyn>;

/// Wrap a concrete servant into a [`ServantRef`].
pub fn servant<S: Servant + 'static>(s: S) -> ServantRef {
    Arc::new(s)
}
