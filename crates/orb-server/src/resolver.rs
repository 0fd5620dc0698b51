//! Object-id to servant resolution.
//!
//! The state machine in [`crate::adapter`] is shared by every adapter kind;
//! what differs between persistent and transient adapters is how object ids
//! are minted and which ids an incarnation recognises. That part lives in
//! [`ResolutionStrategy`]. The active object map is common to both.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use orb_protocol::{IdAssignment, Lifespan, ObjectId, ObjectReference};
use orb_servants::ServantRef;

/// Where a resolved servant came from; decides what `release` must do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServantOrigin {
    ActiveObjectMap,
    DefaultServant,
    /// Incarnated for this resolution only; etherealized on release.
    Incarnated,
}

/// A resolved servant, valid from `resolve` until the paired `release`.
#[derive(Clone)]
pub struct ServantHandle {
    object_id: ObjectId,
    servant: ServantRef,
    origin: ServantOrigin,
}

impl ServantHandle {
    pub(crate) fn new(object_id: ObjectId, servant: ServantRef, origin: ServantOrigin) -> Self {
        Self {
            object_id,
            servant,
            origin,
        }
    }

    pub fn object_id(&self) -> &ObjectId {
        &self.object_id
    }

    pub fn servant(&self) -> &ServantRef {
        &self.servant
    }

    pub fn origin(&self) -> ServantOrigin {
        self.origin
    }

    pub fn repository_id(&self) -> &str {
        self.servant.repository_id_dyn()
    }
}

impl std::fmt::Debug for ServantHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServantHandle")
            .field("object_id", &self.object_id)
            .field("repository_id", &self.repository_id())
            .field("origin", &self.origin)
            .finish()
    }
}

/// Outcome of `resolve`. Forwarding is an ordinary outcome, not an error.
#[derive(Debug)]
pub enum Resolution {
    Resolved(ServantHandle),
    Forward(ObjectReference),
    NotFound,
}

#[derive(Clone)]
pub(crate) enum MapEntryValue {
    Servant(ServantRef),
    Forward(ObjectReference),
}

/// Object ids currently bound in one adapter incarnation.
#[derive(Default)]
pub(crate) struct ActiveObjectMap {
    entries: DashMap<ObjectId, MapEntryValue>,
}

impl ActiveObjectMap {
    pub(crate) fn get(&self, id: &ObjectId) -> Option<MapEntryValue> {
        self.entries.get(id).map(|e| e.value().clone())
    }

    /// Insert if vacant; returns `false` when the id is already bound.
    pub(crate) fn insert_new(&self, id: ObjectId, value: MapEntryValue) -> bool {
        match self.entries.entry(id) {
            MapEntry::Occupied(_) => false,
            MapEntry::Vacant(v) => {
                v.insert(value);
                true
            }
        }
    }

    /// Bind `servant` unless another servant got there first; the winner is
    /// returned either way together with whether ours was kept.
    pub(crate) fn insert_or_existing(&self, id: ObjectId, servant: ServantRef) -> (MapEntryValue, bool) {
        match self.entries.entry(id) {
            MapEntry::Occupied(o) => (o.get().clone(), false),
            MapEntry::Vacant(v) => {
                v.insert(MapEntryValue::Servant(servant.clone()));
                (MapEntryValue::Servant(servant), true)
            }
        }
    }

    pub(crate) fn upsert(&self, id: ObjectId, value: MapEntryValue) {
        self.entries.insert(id, value);
    }

    pub(crate) fn remove(&self, id: &ObjectId) -> Option<MapEntryValue> {
        self.entries.remove(id).map(|(_, v)| v)
    }

    pub(crate) fn drain(&self) -> Vec<(ObjectId, MapEntryValue)> {
        let keys: Vec<ObjectId> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.into_iter()
            .filter_map(|k| self.entries.remove(&k))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

const TRANSIENT_TAG: u8 = b'T';
const PERSISTENT_TAG: u8 = b'P';
const TRANSIENT_ID_LEN: usize = 1 + 4 + 8;

/// Id minting and recognition, per adapter kind.
pub(crate) enum ResolutionStrategy {
    /// Ids stay meaningful across incarnations. The counter is owned by the
    /// factory so system ids never repeat between incarnations.
    Persistent { next_id: Arc<AtomicU64> },
    /// Ids are valid for one incarnation only.
    Transient { incarnation: u32, next_id: AtomicU64 },
}

impl ResolutionStrategy {
    pub(crate) fn lifespan(&self) -> Lifespan {
        match self {
            Self::Persistent { .. } => Lifespan::Persistent,
            Self::Transient { .. } => Lifespan::Transient,
        }
    }

    pub(crate) fn incarnation(&self) -> Option<u32> {
        match self {
            Self::Persistent { .. } => None,
            Self::Transient { incarnation, .. } => Some(*incarnation),
        }
    }

    pub(crate) fn generate_id(&self) -> ObjectId {
        match self {
            Self::Persistent { next_id } => {
                let n = next_id.fetch_add(1, Ordering::Relaxed);
                let mut bytes = Vec::with_capacity(9);
                bytes.push(PERSISTENT_TAG);
                bytes.extend_from_slice(&n.to_be_bytes());
                ObjectId::from(bytes)
            }
            Self::Transient {
                incarnation,
                next_id,
            } => {
                let n = next_id.fetch_add(1, Ordering::Relaxed);
                let mut bytes = Vec::with_capacity(TRANSIENT_ID_LEN);
                bytes.push(TRANSIENT_TAG);
                bytes.extend_from_slice(&incarnation.to_be_bytes());
                bytes.extend_from_slice(&n.to_be_bytes());
                ObjectId::from(bytes)
            }
        }
    }

    /// Whether an id could have been issued by this incarnation.
    ///
    /// Only system-assigned transient ids carry an incarnation; anything
    /// else is left to the active object map.
    pub(crate) fn recognizes(&self, id: &ObjectId, ids: IdAssignment) -> bool {
        match (self, ids) {
            (Self::Transient { incarnation, .. }, IdAssignment::System) => {
                let b = id.as_bytes();
                b.len() == TRANSIENT_ID_LEN
                    && b[0] == TRANSIENT_TAG
                    && b[1..5] == incarnation.to_be_bytes()
            }
            _ => true,
        }
    }
}
