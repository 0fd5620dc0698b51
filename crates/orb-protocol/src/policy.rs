//! Adapter policies.
//!
//! A [`PolicySet`] is assembled while an adapter is being created and is
//! frozen afterwards; lookups on the frozen set need no synchronization.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PolicyType {
    Lifespan,
    IdAssignment,
    ServantRetention,
    RequestProcessing,
}

/// Whether object identities outlive the adapter incarnation that made them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Lifespan {
    Persistent,
    Transient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IdAssignment {
    User,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ServantRetention {
    Retain,
    NonRetain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestProcessing {
    ActiveObjectMapOnly,
    UseServantManager,
    UseDefaultServant,
}

/// One effective policy value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum Policy {
    Lifespan(Lifespan),
    IdAssignment(IdAssignment),
    ServantRetention(ServantRetention),
    RequestProcessing(RequestProcessing),
}

impl Policy {
    pub fn policy_type(&self) -> PolicyType {
        match self {
            Self::Lifespan(_) => PolicyType::Lifespan,
            Self::IdAssignment(_) => PolicyType::IdAssignment,
            Self::ServantRetention(_) => PolicyType::ServantRetention,
            Self::RequestProcessing(_) => PolicyType::RequestProcessing,
        }
    }
}

/// Effective policies indexed by type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySet {
    policies: BTreeMap<PolicyType, Policy>,
}

impl PolicySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults for an adapter with the given lifespan: user ids for
    /// persistent adapters, system ids for transient ones, retain and
    /// active-object-map-only for both.
    pub fn defaults_for(lifespan: Lifespan) -> Self {
        let ids = match lifespan {
            Lifespan::Persistent => IdAssignment::User,
            Lifespan::Transient => IdAssignment::System,
        };
        let mut set = Self::new();
        set.set(Policy::Lifespan(lifespan));
        set.set(Policy::IdAssignment(ids));
        set.set(Policy::ServantRetention(ServantRetention::Retain));
        set.set(Policy::RequestProcessing(RequestProcessing::ActiveObjectMapOnly));
        set
    }

    /// Insert or replace the policy of the same type.
    pub fn set(&mut self, policy: Policy) {
        self.policies.insert(policy.policy_type(), policy);
    }

    pub fn get(&self, policy_type: PolicyType) -> Option<Policy> {
        self.policies.get(&policy_type).copied()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Policy> {
        self.policies.values()
    }

    pub fn lifespan(&self) -> Option<Lifespan> {
        match self.get(PolicyType::Lifespan)? {
            Policy::Lifespan(v) => Some(v),
            _ => None,
        }
    }

    pub fn id_assignment(&self) -> Option<IdAssignment> {
        match self.get(PolicyType::IdAssignment)? {
            Policy::IdAssignment(v) => Some(v),
            _ => None,
        }
    }

    pub fn servant_retention(&self) -> Option<ServantRetention> {
        match self.get(PolicyType::ServantRetention)? {
            Policy::ServantRetention(v) => Some(v),
            _ => None,
        }
    }

    pub fn request_processing(&self) -> Option<RequestProcessing> {
        match self.get(PolicyType::RequestProcessing)? {
            Policy::RequestProcessing(v) => Some(v),
            _ => None,
        }
    }
}
