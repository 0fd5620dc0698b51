//! Adapter states: the internal state machine and the externally visible
//! adapter-manager enumeration it is reported as.

use serde::{Deserialize, Serialize};

/// Coarse state of an object adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdapterState {
    Holding,
    Active,
    Discarding,
    Inactive,
    Destroyed,
}

impl AdapterState {
    pub fn is_destroyed(&self) -> bool {
        matches!(self, Self::Destroyed)
    }

    /// Only an active adapter admits new requests.
    pub fn admits_requests(&self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn external(&self) -> ManagerState {
        match self {
            Self::Holding => ManagerState::Holding,
            Self::Active => ManagerState::Active,
            Self::Discarding => ManagerState::Discarding,
            Self::Inactive => ManagerState::Inactive,
            Self::Destroyed => ManagerState::NonExistent,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Holding => "HOLDING",
            Self::Active => "ACTIVE",
            Self::Discarding => "DISCARDING",
            Self::Inactive => "INACTIVE",
            Self::Destroyed => "DESTROYED",
        }
    }
}

impl std::fmt::Display for AdapterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Adapter-manager state as published to interceptors and observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ManagerState {
    Holding,
    Active,
    Discarding,
    Inactive,
    NonExistent,
}

impl ManagerState {
    pub fn code(&self) -> i16 {
        match self {
            Self::Holding => 0,
            Self::Active => 1,
            Self::Discarding => 2,
            Self::Inactive => 3,
            Self::NonExistent => 4,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(Self::Holding),
            1 => Some(Self::Active),
            2 => Some(Self::Discarding),
            3 => Some(Self::Inactive),
            4 => Some(Self::NonExistent),
            _ => None,
        }
    }
}
