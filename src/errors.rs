use crate::peer::state::CallState;
use crate::peer::types::CallId;
use crate::store::StoreError;
use thiserror::Error;

/// Failure reported by a connection endpoint.
#[derive(Debug, Clone, Error)]
#[error("{operation} failed: {reason}")]
pub struct EndpointError {
    pub operation: &'static str,
    pub reason: String,
}

impl EndpointError {
    pub fn new(operation: &'static str, reason: impl ToString) -> Self {
        Self {
            operation,
            reason: reason.to_string(),
        }
    }
}

/// Errors surfaced by the negotiation coordinator.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("local media unavailable: {0}")]
    MediaUnavailable(String),

    #[error("call `{0}` not found")]
    CallNotFound(CallId),

    #[error("call `{0}` has no offer yet")]
    OfferMissing(CallId),

    #[error("call `{0}` already has an offer")]
    OfferAlreadySet(CallId),

    #[error("call `{0}` already has an answer")]
    AnswerAlreadySet(CallId),

    #[error("negotiation store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("connection endpoint error: {0}")]
    Endpoint(#[from] EndpointError),

    #[error("malformed call document `{id}`: {reason}")]
    MalformedDocument { id: CallId, reason: String },

    #[error("cannot {action} while session is {state:?}")]
    InvalidState {
        action: &'static str,
        state: CallState,
    },
}

impl From<StoreError> for CallError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(reason) => CallError::StoreUnavailable(reason),
            StoreError::NotFound { id, .. } => CallError::CallNotFound(CallId::new(id)),
            other => CallError::StoreUnavailable(other.to_string()),
        }
    }
}

pub type CallResult<T> = Result<T, CallError>;
