//! Per-request invocation contexts and the per-worker stack that holds them.
//!
//! A [`ContextStack`] is owned by exactly one worker and threaded through the
//! dispatcher as `&mut`, so pushes and pops never synchronize with other
//! workers.

use std::sync::Arc;

use orb_protocol::{AdapterId, ObjectId};
use orb_servants::Current;

use crate::adapter::ObjectAdapter;
use crate::resolver::ServantHandle;

/// How the reply for the current request gets built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplyPath {
    /// Caller shares the process; no reply is built.
    #[default]
    Direct,
    /// Reply is constructed after the servant returns.
    Deferred,
}

/// The record of one dispatch attempt.
///
/// The operation and servant start out empty: the fast-local binding
/// resolves before any operation is known, and every pattern attaches the
/// servant only once resolution succeeds. Cloning is cheap and yields an
/// independent record, which is what the fast-local cache relies on.
#[derive(Clone)]
pub struct InvocationContext {
    object_id: ObjectId,
    operation: Option<String>,
    servant: Option<ServantHandle>,
    adapter: Arc<ObjectAdapter>,
    reply: ReplyPath,
}

impl InvocationContext {
    pub(crate) fn new(adapter: Arc<ObjectAdapter>, object_id: ObjectId) -> Self {
        Self {
            object_id,
            operation: None,
            servant: None,
            adapter,
            reply: ReplyPath::Direct,
        }
    }

    pub fn object_id(&self) -> &ObjectId {
        &self.object_id
    }

    pub fn operation(&self) -> Option<&str> {
        self.operation.as_deref()
    }

    pub fn set_operation(&mut self, operation: impl Into<String>) {
        self.operation = Some(operation.into());
    }

    pub fn servant(&self) -> Option<&ServantHandle> {
        self.servant.as_ref()
    }

    pub fn set_servant(&mut self, servant: ServantHandle) {
        self.servant = Some(servant);
    }

    pub(crate) fn take_servant(&mut self) -> Option<ServantHandle> {
        self.servant.take()
    }

    pub fn adapter(&self) -> &Arc<ObjectAdapter> {
        &self.adapter
    }

    pub fn adapter_id(&self) -> AdapterId {
        self.adapter.id()
    }

    pub fn reply_path(&self) -> ReplyPath {
        self.reply
    }

    pub fn defer_reply(&mut self) {
        self.reply = ReplyPath::Deferred;
    }

    /// The servant-facing view; `None` until an operation is attached.
    /// Carries no outcall; the dispatcher adds one when it invokes.
    pub fn current(&self) -> Option<Current<'_>> {
        let operation = self.operation.as_deref()?;
        Some(Current::new(self.adapter.id(), &self.object_id, operation))
    }
}

impl std::fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationContext")
            .field("adapter", &self.adapter.id())
            .field("object_id", &self.object_id)
            .field("operation", &self.operation)
            .field("resolved", &self.servant.is_some())
            .field("reply", &self.reply)
            .finish()
    }
}

/// Stack of contexts for the requests a worker is currently dispatching.
///
/// Empty between dispatches on an idle worker.
#[derive(Debug, Default)]
pub struct ContextStack {
    frames: Vec<InvocationContext>,
}

impl ContextStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, context: InvocationContext) {
        self.frames.push(context);
    }

    pub fn pop(&mut self) -> Option<InvocationContext> {
        self.frames.pop()
    }

    pub fn peek(&self) -> Option<&InvocationContext> {
        self.frames.last()
    }

    pub fn peek_mut(&mut self) -> Option<&mut InvocationContext> {
        self.frames.last_mut()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::active_adapter;

    #[test]
    fn push_pop_nests() {
        let adapter = active_adapter();
        let mut stack = ContextStack::new();
        assert!(stack.is_empty());

        stack.push(adapter.make_invocation_context(ObjectId::from("a")));
        stack.push(adapter.make_invocation_context(ObjectId::from("b")));
        assert_eq!(stack.depth(), 2);
        assert_eq!(stack.peek().unwrap().object_id(), &ObjectId::from("b"));

        assert_eq!(stack.pop().unwrap().object_id(), &ObjectId::from("b"));
        assert_eq!(stack.pop().unwrap().object_id(), &ObjectId::from("a"));
        assert!(stack.pop().is_none());
    }

    #[test]
    fn clone_is_isolated() {
        let adapter = active_adapter();
        let cached = adapter.make_invocation_context(ObjectId::from("obj"));

        let mut copy = cached.clone();
        copy.set_operation("echo");
        copy.defer_reply();

        assert_eq!(cached.operation(), None);
        assert_eq!(cached.reply_path(), ReplyPath::Direct);
        assert_eq!(copy.operation(), Some("echo"));
    }

    #[test]
    fn current_requires_operation() {
        let adapter = active_adapter();
        let mut ctx = adapter.make_invocation_context(ObjectId::from("obj"));
        assert!(ctx.current().is_none());

        ctx.set_operation("ping");
        let current = ctx.current().unwrap();
        assert_eq!(current.operation, "ping");
        assert_eq!(current.adapter_id, adapter.id());
    }

    #[test]
    fn peek_mut_attaches_operation() {
        let adapter = active_adapter();
        let mut stack = ContextStack::new();
        stack.push(adapter.make_invocation_context(ObjectId::from("obj")));
        stack.peek_mut().unwrap().set_operation("get");
        assert_eq!(stack.peek().unwrap().operation(), Some("get"));
    }
}
