//! Object adapter protocol types.
//!
//! Identifiers, object references, reference templates, policies, adapter
//! states, runtime events and the error taxonomy shared by the servant and
//! server crates. This crate holds no runtime state.

pub mod error;
pub mod events;
pub mod ids;
pub mod policy;
pub mod reference;
pub mod state;

pub use error::{ErrorCode, InvocationResult, OrbError};
pub use events::{AdapterEvent, EventName, Events};
pub use ids::{AdapterId, ObjectId};
pub use policy::{
    IdAssignment, Lifespan, Policy, PolicySet, PolicyType, RequestProcessing, ServantRetention,
};
pub use reference::{Endpoint, ObjectReference, ReferenceTemplate};
pub use state::{AdapterState, ManagerState};
