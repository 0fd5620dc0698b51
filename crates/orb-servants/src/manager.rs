//! On-demand servant production for ids missing from the active object map.

use orb_protocol::{AdapterId, ObjectId, ObjectReference};

use crate::ServantRef;

/// Outcome of asking a manager for the servant behind an object id.
pub enum Incarnation {
    Servant(ServantRef),
    /// The object lives elsewhere; the request must be redirected.
    Forward(ObjectReference),
    NotFound,
}

impl std::fmt::Debug for Incarnation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Servant(s) => f.debug_tuple("Servant").field(&s.repository_id_dyn()).finish(),
            Self::Forward(r) => f.debug_tuple("Forward").field(r).finish(),
            Self::NotFound => f.write_str("NotFound"),
        }
    }
}

/// Produces servants for ids the adapter has no entry for.
///
/// Under a retaining adapter an incarnated servant is kept in the active
/// object map until the object is deactivated. Under a non-retaining adapter
/// `incarnate` runs on every resolution and `etherealize` on the paired
/// release. Both calls sit on the request path and must not block.
pub trait ServantManager: Send + Sync {
    fn incarnate(&self, adapter: AdapterId, object_id: &ObjectId) -> Incarnation;

    /// `cleanup_in_progress` is set when the adapter itself is going away.
    fn etherealize(
        &self,
        _adapter: AdapterId,
        _object_id: &ObjectId,
        _servant: &ServantRef,
        _cleanup_in_progress: bool,
    ) {
    }

    fn name(&self) -> &str;
}
