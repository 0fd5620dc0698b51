//! Dispatch error taxonomy and the system-exception codes it maps onto.

use thiserror::Error;

use crate::ids::{AdapterId, ObjectId};
use crate::state::AdapterState;

/// System-exception families an [`OrbError`] is reported as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ObjectNotExist,
    Transient,
    ObjAdapter,
    BadOperation,
    BadParam,
    BadInvOrder,
    Timeout,
    Internal,
    Unknown,
}

impl ErrorCode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ObjectNotExist => "OBJECT_NOT_EXIST",
            Self::Transient => "TRANSIENT",
            Self::ObjAdapter => "OBJ_ADAPTER",
            Self::BadOperation => "BAD_OPERATION",
            Self::BadParam => "BAD_PARAM",
            Self::BadInvOrder => "BAD_INV_ORDER",
            Self::Timeout => "TIMEOUT",
            Self::Internal => "INTERNAL",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "OBJECT_NOT_EXIST" => Some(Self::ObjectNotExist),
            "TRANSIENT" => Some(Self::Transient),
            "OBJ_ADAPTER" => Some(Self::ObjAdapter),
            "BAD_OPERATION" => Some(Self::BadOperation),
            "BAD_PARAM" => Some(Self::BadParam),
            "BAD_INV_ORDER" => Some(Self::BadInvOrder),
            "TIMEOUT" => Some(Self::Timeout),
            "INTERNAL" => Some(Self::Internal),
            "UNKNOWN" => Some(Self::Unknown),
            _ => None,
        }
    }

    /// Whether the caller may reissue the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Every failure the adapter layer can surface.
///
/// Forwarding has no variant here; a redirection is a resolution outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrbError {
    #[error("adapter {adapter} has been destroyed")]
    Destroyed { adapter: AdapterId },

    #[error("adapter {adapter} is not accepting requests (state: {state})")]
    NotActive { adapter: AdapterId, state: AdapterState },

    #[error("object {object_id} not found in adapter {adapter}")]
    ObjectNotFound { adapter: AdapterId, object_id: ObjectId },

    #[error("no adapter registered under id {0}")]
    AdapterNotFound(AdapterId),

    #[error("adapter id {0} is already registered")]
    DuplicateAdapter(AdapterId),

    #[error("forwarding chain exceeded {limit} hops")]
    TooManyForwards { limit: usize },

    #[error("adapter {0} unavailable after retry")]
    AdapterUnavailable(AdapterId),

    #[error("object {object_id} is already active in adapter {adapter}")]
    ObjectAlreadyActive { adapter: AdapterId, object_id: ObjectId },

    #[error("operation not permitted by adapter policy: {0}")]
    WrongPolicy(String),

    #[error("invalid object id: {0}")]
    InvalidObjectId(String),

    #[error("operation not supported: {0}")]
    BadOperation(String),

    #[error("servant failure: {message}")]
    Servant { message: String },

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("runtime is shutting down")]
    ShuttingDown,

    #[error("internal error: {0}")]
    Internal(String),
}

impl OrbError {
    pub fn servant(message: impl Into<String>) -> Self {
        Self::Servant {
            message: message.into(),
        }
    }

    pub fn bad_operation(operation: &str) -> Self {
        Self::BadOperation(operation.to_string())
    }

    pub fn wrong_policy(message: impl Into<String>) -> Self {
        Self::WrongPolicy(message.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Destroyed { .. } | Self::ObjectNotFound { .. } => ErrorCode::ObjectNotExist,
            Self::NotActive { .. } => ErrorCode::Transient,
            Self::AdapterNotFound(_) | Self::AdapterUnavailable(_) => ErrorCode::ObjAdapter,
            Self::DuplicateAdapter(_) | Self::WrongPolicy(_) => ErrorCode::ObjAdapter,
            Self::TooManyForwards { .. } => ErrorCode::ObjAdapter,
            Self::ObjectAlreadyActive { .. } | Self::InvalidObjectId(_) => ErrorCode::BadParam,
            Self::BadOperation(_) => ErrorCode::BadOperation,
            Self::Servant { .. } => ErrorCode::Unknown,
            Self::Timeout(_) => ErrorCode::Timeout,
            Self::ShuttingDown => ErrorCode::BadInvOrder,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Failures that end the request without any retry by the dispatcher.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Destroyed { .. })
    }
}

/// Result produced by a servant invocation.
pub type InvocationResult = Result<serde_json::Value, OrbError>;
