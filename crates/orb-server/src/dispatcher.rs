//! Request dispatch: the remote, local and fast-local invocation patterns.
//!
//! Every pattern runs inside a [`DispatchScope`], which records what has
//! been acquired (`enter`, push, `resolve`) and undoes it on drop in the
//! order release → exit → pop. Errors, panics in servant code and dropped
//! futures all go through the same path, so the pairs stay balanced
//! without any bookkeeping at the call sites.
//!
//! A running servant reaches the dispatcher again through the [`Outcall`]
//! in its `Current`. Nested calls push onto the same worker stack.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use orb_protocol::{InvocationResult, ObjectReference, OrbError};
use orb_servants::{Current, Outcall};
use serde_json::Value;
use tracing::{debug, warn};

use crate::adapter::ObjectAdapter;
use crate::context::{ContextStack, InvocationContext, ReplyPath};
use crate::resolver::{Resolution, ServantHandle};
use crate::runtime::OrbRuntime;

/// An incoming request.
#[derive(Debug, Clone)]
pub struct Request {
    pub target: ObjectReference,
    pub operation: String,
    pub args: Option<Value>,
    pub response_expected: bool,
}

impl Request {
    pub fn new(target: ObjectReference, operation: impl Into<String>) -> Self {
        Self {
            target,
            operation: operation.into(),
            args: None,
            response_expected: true,
        }
    }

    pub fn with_args(mut self, args: Value) -> Self {
        self.args = Some(args);
        self
    }

    pub fn oneway(mut self) -> Self {
        self.response_expected = false;
        self
    }
}

/// Reply built for a remote request once the servant has returned.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// The reference that finally served the request.
    pub target: ObjectReference,
    pub operation: String,
    pub forwards: usize,
    pub body: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LocateReply {
    ObjectHere,
    ObjectForward(ObjectReference),
    UnknownObject,
}

/// A servant resolved once and reused by [`Dispatcher::invoke_fast`].
///
/// Holds the resolution-only context captured at bind time. The servant
/// handle inside it is released when the binding is dropped.
pub struct LocalBinding {
    target: ObjectReference,
    context: InvocationContext,
}

impl LocalBinding {
    /// The reference the binding was made for (before any forwarding).
    pub fn target(&self) -> &ObjectReference {
        &self.target
    }

    pub fn context(&self) -> &InvocationContext {
        &self.context
    }

    pub fn adapter(&self) -> &Arc<ObjectAdapter> {
        self.context.adapter()
    }
}

impl Drop for LocalBinding {
    fn drop(&mut self) {
        if let Some(handle) = self.context.take_servant() {
            self.context.adapter().release(handle);
        }
    }
}

impl std::fmt::Debug for LocalBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBinding")
            .field("target", &self.target)
            .field("context", &self.context)
            .finish()
    }
}

/// Caller-side cache for the fast-local pattern: binds lazily, drops the
/// binding when its adapter turns out to be destroyed and rebinds on the
/// next call.
#[derive(Debug)]
pub struct LocalStub {
    target: ObjectReference,
    binding: Option<LocalBinding>,
    invalidations: usize,
}

impl LocalStub {
    pub fn new(target: ObjectReference) -> Self {
        Self {
            target,
            binding: None,
            invalidations: 0,
        }
    }

    pub fn target(&self) -> &ObjectReference {
        &self.target
    }

    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    /// Times a cached binding was thrown away.
    pub fn invalidations(&self) -> usize {
        self.invalidations
    }

    pub fn invalidate(&mut self) {
        if self.binding.take().is_some() {
            self.invalidations += 1;
        }
    }
}

/// Acquisitions of one dispatch attempt, undone on drop.
struct DispatchScope<'s> {
    stack: &'s mut ContextStack,
    adapter: Arc<ObjectAdapter>,
    entered: bool,
    pushed: bool,
    resolved: bool,
}

impl<'s> DispatchScope<'s> {
    fn new(stack: &'s mut ContextStack, adapter: Arc<ObjectAdapter>) -> Self {
        Self {
            stack,
            adapter,
            entered: false,
            pushed: false,
            resolved: false,
        }
    }

    fn enter(&mut self) -> Result<(), OrbError> {
        self.adapter.enter()?;
        self.entered = true;
        Ok(())
    }

    fn push(&mut self, context: InvocationContext) {
        self.stack.push(context);
        self.pushed = true;
    }

    fn top(&self) -> Result<&InvocationContext, OrbError> {
        if !self.pushed {
            return Err(OrbError::Internal("no invocation context pushed".into()));
        }
        self.stack
            .peek()
            .ok_or_else(|| OrbError::Internal("context stack is empty".into()))
    }

    /// Resolve the pushed context's object id and attach the servant.
    fn resolve(&mut self) -> Result<Resolution, OrbError> {
        let object_id = self.top()?.object_id().clone();
        let resolution = self.adapter.resolve(&object_id);
        if let Resolution::Resolved(handle) = &resolution {
            self.resolved = true;
            if let Some(ctx) = self.stack.peek_mut() {
                ctx.set_servant(handle.clone());
            }
        }
        Ok(resolution)
    }

    /// Run the servant of the pushed context. The stack stays available to
    /// the servant for nested calls through `dispatcher`.
    async fn invoke(&mut self, dispatcher: &Dispatcher, args: Option<Value>) -> InvocationResult {
        let ctx = self.top()?;
        let (Some(handle), Some(operation)) = (ctx.servant(), ctx.operation()) else {
            return Err(OrbError::Internal(format!(
                "context for {} is missing its servant or operation",
                ctx.object_id()
            )));
        };
        let servant = handle.servant().clone();
        let object_id = ctx.object_id().clone();
        let operation = operation.to_string();
        let adapter_id = ctx.adapter_id();

        let mut nested = NestedCalls {
            dispatcher,
            stack: &mut *self.stack,
        };
        let current = Current::new(adapter_id, &object_id, &operation).with_outcall(&mut nested);
        servant.invoke_dyn(current, args).await
    }

    /// Pop the pushed context and keep its servant unreleased.
    fn detach(mut self) -> Option<InvocationContext> {
        if !self.pushed {
            return None;
        }
        self.pushed = false;
        self.resolved = false;
        self.stack.pop()
    }
}

impl Drop for DispatchScope<'_> {
    fn drop(&mut self) {
        if self.resolved {
            let handle: Option<ServantHandle> =
                self.stack.peek_mut().and_then(InvocationContext::take_servant);
            if let Some(handle) = handle {
                self.adapter.release(handle);
            }
        }
        if self.entered {
            self.adapter.exit();
        }
        if self.pushed {
            self.stack.pop();
        }
    }
}

/// Collocated calls made by a running servant, dispatched with the local
/// pattern on the stack of the worker that is running it.
struct NestedCalls<'d, 's> {
    dispatcher: &'d Dispatcher,
    stack: &'s mut ContextStack,
}

impl Outcall for NestedCalls<'_, '_> {
    fn call<'a>(
        &'a mut self,
        target: ObjectReference,
        operation: &'a str,
        args: Option<Value>,
    ) -> Pin<Box<dyn Future<Output = InvocationResult> + Send + 'a>> {
        let request = Request {
            target,
            operation: operation.to_string(),
            args,
            response_expected: true,
        };
        Box::pin(self.dispatcher.invoke_local(&mut *self.stack, request))
    }

    fn depth(&self) -> usize {
        self.stack.depth()
    }
}

/// Outcome of one attempt against one reference.
enum Attempt {
    Done(Value),
    Forward(ObjectReference),
    Destroyed(OrbError),
    Failed { error: OrbError, admitted: bool },
}

struct Dispatched {
    target: ObjectReference,
    forwards: usize,
    body: Value,
}

/// Runs requests against the adapters of one runtime.
///
/// Cheap to clone; every worker passes its own [`ContextStack`].
#[derive(Clone)]
pub struct Dispatcher {
    runtime: Arc<OrbRuntime>,
}

impl Dispatcher {
    pub fn new(runtime: Arc<OrbRuntime>) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &Arc<OrbRuntime> {
        &self.runtime
    }

    /// Remote pattern. The reply is built after the servant returns.
    pub async fn invoke_remote(&self, stack: &mut ContextStack, request: Request) -> Result<Reply, OrbError> {
        let operation = request.operation.clone();
        let done = self.dispatch(stack, request, ReplyPath::Deferred).await?;
        Ok(Reply {
            target: done.target,
            operation,
            forwards: done.forwards,
            body: done.body,
        })
    }

    /// Local pattern: same sequence as remote, no reply construction.
    pub async fn invoke_local(&self, stack: &mut ContextStack, request: Request) -> InvocationResult {
        let done = self.dispatch(stack, request, ReplyPath::Direct).await?;
        Ok(done.body)
    }

    /// Resolve `target` once for the fast-local pattern.
    ///
    /// Pushes a resolution-only context, resolves, pops, and keeps the
    /// resolved context. Forwards are followed up to `maxForwards`.
    pub fn bind(&self, stack: &mut ContextStack, target: &ObjectReference) -> Result<LocalBinding, OrbError> {
        let limit = self.runtime.config().max_forwards;
        let mut current = target.clone();
        let mut forwards = 0;
        loop {
            // `lookup` has already re-created the adapter if its factory allows it.
            let adapter = self.runtime.registry().lookup(current.adapter_id)?;
            if adapter.state().is_destroyed() {
                return Err(OrbError::Destroyed { adapter: adapter.id() });
            }
            let mut scope = DispatchScope::new(stack, adapter.clone());
            scope.push(adapter.make_invocation_context(current.object_id.clone()));
            match scope.resolve()? {
                Resolution::Resolved(_) => {
                    let context = scope
                        .detach()
                        .ok_or_else(|| OrbError::Internal("resolved context vanished".into()))?;
                    debug!("Bound {} to adapter {}", target, adapter.id());
                    return Ok(LocalBinding {
                        target: target.clone(),
                        context,
                    });
                }
                Resolution::Forward(next) => {
                    drop(scope);
                    forwards += 1;
                    if forwards > limit {
                        return Err(OrbError::TooManyForwards { limit });
                    }
                    current = next;
                }
                Resolution::NotFound => {
                    return Err(OrbError::ObjectNotFound {
                        adapter: adapter.id(),
                        object_id: current.object_id.clone(),
                    });
                }
            }
        }
    }

    /// Fast-local pattern: clone the cached context, push, enter, invoke,
    /// exit, pop. No per-call resolve or release.
    pub async fn invoke_fast(
        &self,
        stack: &mut ContextStack,
        binding: &LocalBinding,
        operation: &str,
        args: Option<Value>,
    ) -> InvocationResult {
        let _ticket = self.runtime.starting_dispatch()?;
        let mut context = binding.context.clone();
        context.set_operation(operation);

        let mut scope = DispatchScope::new(stack, binding.adapter().clone());
        scope.push(context);
        scope.enter()?;
        scope.invoke(self, args).await
    }

    /// Fast-local call through a stub. A destroyed adapter invalidates the
    /// binding and the call falls back to the local pattern.
    pub async fn invoke_stub(
        &self,
        stack: &mut ContextStack,
        stub: &mut LocalStub,
        operation: &str,
        args: Option<Value>,
    ) -> InvocationResult {
        let binding = match stub.binding.take() {
            Some(binding) => binding,
            None => match self.bind(stack, &stub.target) {
                Ok(binding) => binding,
                Err(e) => {
                    debug!("Cannot bind {}: {}; using local pattern", stub.target, e);
                    return self.invoke_local(stack, stub_request(stub, operation, args)).await;
                }
            },
        };

        match self.invoke_fast(stack, &binding, operation, args.clone()).await {
            Err(OrbError::Destroyed { adapter }) => {
                debug!("Cached binding for {} hit destroyed adapter {}", stub.target, adapter);
                drop(binding);
                stub.invalidations += 1;
                self.invoke_local(stack, stub_request(stub, operation, args)).await
            }
            result => {
                stub.binding = Some(binding);
                result
            }
        }
    }

    /// Answer where `target` lives without invoking its servant.
    pub fn locate(&self, stack: &mut ContextStack, target: &ObjectReference) -> Result<LocateReply, OrbError> {
        let _ticket = self.runtime.starting_dispatch()?;
        let adapter = match self.runtime.registry().lookup(target.adapter_id) {
            Ok(adapter) => adapter,
            Err(OrbError::AdapterNotFound(_)) => return Ok(LocateReply::UnknownObject),
            Err(e) => return Err(e),
        };

        let mut scope = DispatchScope::new(stack, adapter.clone());
        match scope.enter() {
            Ok(()) => {}
            Err(OrbError::Destroyed { .. }) => return Ok(LocateReply::UnknownObject),
            Err(e) => return Err(e),
        }
        scope.push(adapter.make_invocation_context(target.object_id.clone()));
        let reply = match scope.resolve()? {
            Resolution::Resolved(_) => LocateReply::ObjectHere,
            Resolution::Forward(to) => LocateReply::ObjectForward(to),
            Resolution::NotFound => LocateReply::UnknownObject,
        };
        Ok(reply)
    }

    async fn dispatch(
        &self,
        stack: &mut ContextStack,
        request: Request,
        reply: ReplyPath,
    ) -> Result<Dispatched, OrbError> {
        let _ticket = self.runtime.starting_dispatch()?;
        let config = self.runtime.config();
        let mut target = request.target.clone();
        let mut forwards = 0;
        let mut destroyed_retries = 0;

        loop {
            match self.attempt(stack, &target, &request, reply).await {
                Attempt::Done(body) => {
                    return Ok(Dispatched {
                        target,
                        forwards,
                        body,
                    });
                }
                Attempt::Forward(next) => {
                    forwards += 1;
                    if forwards > config.max_forwards {
                        warn!(
                            "Request {} on {} exceeded {} forwards",
                            request.operation, request.target, config.max_forwards
                        );
                        return Err(OrbError::TooManyForwards {
                            limit: config.max_forwards,
                        });
                    }
                    debug!("Forwarding {} from {} to {}", request.operation, target, next);
                    target = next;
                }
                Attempt::Destroyed(e) => {
                    destroyed_retries += 1;
                    if destroyed_retries > config.destroy_retries {
                        return Err(OrbError::AdapterUnavailable(target.adapter_id));
                    }
                    debug!("{}; retrying lookup of adapter {}", e, target.adapter_id);
                }
                Attempt::Failed { error, admitted } => {
                    if admitted && !request.response_expected {
                        warn!(
                            "One-way request {} on {} failed: {}",
                            request.operation, target, error
                        );
                        return Ok(Dispatched {
                            target,
                            forwards,
                            body: Value::Null,
                        });
                    }
                    return Err(error);
                }
            }
        }
    }

    async fn attempt(
        &self,
        stack: &mut ContextStack,
        target: &ObjectReference,
        request: &Request,
        reply: ReplyPath,
    ) -> Attempt {
        let adapter = match self.runtime.registry().lookup(target.adapter_id) {
            Ok(adapter) => adapter,
            Err(error) => return Attempt::Failed { error, admitted: false },
        };

        let mut scope = DispatchScope::new(stack, adapter.clone());
        match scope.enter() {
            Ok(()) => {}
            Err(e @ OrbError::Destroyed { .. }) => return Attempt::Destroyed(e),
            Err(error) => return Attempt::Failed { error, admitted: false },
        }

        let mut context = adapter.make_invocation_context(target.object_id.clone());
        context.set_operation(&request.operation);
        scope.push(context);

        let resolution = match scope.resolve() {
            Ok(resolution) => resolution,
            Err(error) => return Attempt::Failed { error, admitted: true },
        };
        match resolution {
            Resolution::Resolved(_) => {}
            Resolution::Forward(next) => return Attempt::Forward(next),
            Resolution::NotFound => {
                return Attempt::Failed {
                    error: OrbError::ObjectNotFound {
                        adapter: adapter.id(),
                        object_id: target.object_id.clone(),
                    },
                    admitted: true,
                };
            }
        }

        if reply == ReplyPath::Deferred {
            if let Some(ctx) = scope.stack.peek_mut() {
                ctx.defer_reply();
            }
        }

        match scope.invoke(self, request.args.clone()).await {
            Ok(body) => Attempt::Done(body),
            Err(error) => Attempt::Failed { error, admitted: true },
        }
    }
}

fn stub_request(stub: &LocalStub, operation: &str, args: Option<Value>) -> Request {
    Request {
        target: stub.target.clone(),
        operation: operation.to_string(),
        args,
        response_expected: true,
    }
}
