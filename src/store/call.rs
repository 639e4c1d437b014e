//! Layout of a call in the store: one document in `calls` holding the offer
//! and the answer, plus two candidate sub-collections under it.

use super::{Fields, NegotiationStore, Precondition, StoreError};
use crate::errors::{CallError, CallResult};
use crate::peer::types::{CallId, Role, SdpKind, SessionDescription};
use serde::{Deserialize, Serialize};

pub const CALLS: &str = "calls";

/// Direction of a candidate sub-collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateDirection {
    Offerer,
    Answerer,
}

impl CandidateDirection {
    /// Collection this role appends its own candidates to.
    pub fn local(role: Role) -> Self {
        match role {
            Role::Caller => CandidateDirection::Offerer,
            Role::Callee => CandidateDirection::Answerer,
        }
    }

    /// Collection this role reads the peer's candidates from.
    pub fn remote(role: Role) -> Self {
        match Self::local(role) {
            CandidateDirection::Offerer => CandidateDirection::Answerer,
            CandidateDirection::Answerer => CandidateDirection::Offerer,
        }
    }

    fn name(self) -> &'static str {
        match self {
            CandidateDirection::Offerer => "offerCandidates",
            CandidateDirection::Answerer => "answerCandidates",
        }
    }
}

pub fn candidates_path(call: &CallId, direction: CandidateDirection) -> String {
    format!("{CALLS}/{call}/{}", direction.name())
}

/// Decoded call document.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct CallDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<SessionDescription>,
}

impl CallDocument {
    /// Decodes the negotiation fields, ignoring any other field.
    pub fn from_fields(id: &CallId, fields: &Fields) -> CallResult<Self> {
        serde_json::from_value(serde_json::Value::Object(fields.clone())).map_err(|e| {
            CallError::MalformedDocument {
                id: id.clone(),
                reason: e.to_string(),
            }
        })
    }
}

/// Writes `desc` into its field of the call document, once.
///
/// The presence check and the merge happen atomically in the store, so of two
/// peers racing to answer the same call exactly one succeeds.
pub async fn write_description(
    store: &dyn NegotiationStore,
    call: &CallId,
    desc: &SessionDescription,
) -> CallResult<()> {
    let field = desc.kind.field();
    let mut fields = Fields::new();
    let value = serde_json::to_value(desc).map_err(|e| CallError::MalformedDocument {
        id: call.clone(),
        reason: e.to_string(),
    })?;
    fields.insert(field.to_owned(), value);

    match store
        .set_fields(
            CALLS,
            call.as_str(),
            fields,
            Precondition::FieldsAbsent(vec![field.to_owned()]),
        )
        .await
    {
        Ok(()) => Ok(()),
        Err(StoreError::PreconditionFailed { .. }) => Err(match desc.kind {
            SdpKind::Offer => CallError::OfferAlreadySet(call.clone()),
            SdpKind::Answer => CallError::AnswerAlreadySet(call.clone()),
        }),
        Err(e) => Err(e.into()),
    }
}
