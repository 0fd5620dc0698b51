//! Runtime notifications emitted by adapters.
//!
//! Observers receive these through the runtime's notifier chain and its
//! broadcast channel.

use serde::{Deserialize, Serialize};

use crate::ids::AdapterId;
use crate::policy::Lifespan;
use crate::state::ManagerState;

/// Event name constants.
pub struct Events;

impl Events {
    pub const ADAPTER_CREATED: &str = "adapter/created";
    pub const ADAPTER_STATE_CHANGED: &str = "adapter/stateChanged";
}

/// Type alias for event names.
pub type EventName = &'static str;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum AdapterEvent {
    #[serde(rename = "adapter/created")]
    Created {
        #[serde(rename = "adapterId")]
        adapter_id: AdapterId,
        name: String,
        lifespan: Lifespan,
        #[serde(skip_serializing_if = "Option::is_none")]
        incarnation: Option<u32>,
    },
    #[serde(rename = "adapter/stateChanged")]
    StateChanged {
        #[serde(rename = "adapterId")]
        adapter_id: AdapterId,
        state: ManagerState,
    },
}

impl AdapterEvent {
    pub fn name(&self) -> EventName {
        match self {
            Self::Created { .. } => Events::ADAPTER_CREATED,
            Self::StateChanged { .. } => Events::ADAPTER_STATE_CHANGED,
        }
    }

    pub fn adapter_id(&self) -> AdapterId {
        match self {
            Self::Created { adapter_id, .. } | Self::StateChanged { adapter_id, .. } => *adapter_id,
        }
    }
}
