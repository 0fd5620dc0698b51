//! ORB Server — object adapters and the request dispatcher.
//!
//! The runtime owns the adapter registry and the notifier chain. The
//! dispatcher drives requests through adapters using one of three
//! invocation patterns, each worker with its own context stack.

pub mod adapter;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod notify;
pub mod registry;
pub mod resolver;
pub mod runtime;

#[cfg(test)]
pub(crate) mod testing;

pub use adapter::{AdapterBuilder, AdapterInfo, ObjectAdapter, ReferenceFactory};
pub use config::{ConfigError, DispatchConfig};
pub use context::{ContextStack, InvocationContext, ReplyPath};
pub use dispatcher::{Dispatcher, LocalBinding, LocalStub, LocateReply, Reply, Request};
pub use notify::{LoggingNotifier, NotifierChain, NotifyError, RuntimeNotifier};
pub use registry::{AdapterFactory, AdapterRegistry};
pub use resolver::{Resolution, ServantHandle, ServantOrigin};
pub use runtime::{DispatchTicket, OrbRuntime};
