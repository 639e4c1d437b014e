use crate::peer::state::CallState;
use crate::store::Fields;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Opaque identity of a call document, generated by the store.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for CallId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Which side of the negotiation this process plays.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Caller,
    Callee,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

impl SdpKind {
    /// Name of the call document field holding this kind of description.
    pub fn field(self) -> &'static str {
        match self {
            SdpKind::Offer => "offer",
            SdpKind::Answer => "answer",
        }
    }
}

/// Session description exchanged through the call document.
///
/// The payload is an opaque negotiation blob (SDP for WebRTC endpoints).
/// Browser peers store `{type, sdp}`, which is accepted on read.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    #[serde(alias = "type")]
    pub kind: SdpKind,
    #[serde(alias = "sdp")]
    pub payload: String,
}

impl SessionDescription {
    pub fn offer(payload: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            payload: payload.into(),
        }
    }

    pub fn answer(payload: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            payload: payload.into(),
        }
    }
}

/// Network path candidate.
///
/// Structurally a map of string keys to scalar values. The core only forwards
/// it; the WebRTC adapter uses the browser `RTCIceCandidate.toJSON()` keys.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(transparent)]
pub struct Candidate(Fields);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("candidate attribute `{0}` is not a scalar value")]
pub struct NonScalarAttribute(pub String);

impl Candidate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Builds a candidate from a store document, rejecting nested values.
    pub fn from_fields(fields: Fields) -> Result<Self, NonScalarAttribute> {
        if let Some((key, _)) = fields
            .iter()
            .find(|(_, v)| matches!(v, Value::Array(_) | Value::Object(_)))
        {
            return Err(NonScalarAttribute(key.clone()));
        }
        Ok(Self(fields))
    }

    pub fn fields(&self) -> &Fields {
        &self.0
    }

    pub fn into_fields(self) -> Fields {
        self.0
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Candidate type (`host`, `srflx`, `prflx`, `relay`) read from the
    /// `typ` token of the conventional `candidate` attribute.
    pub fn candidate_type(&self) -> Option<&str> {
        let line = self.get_str("candidate")?;
        let mut tokens = line.split_whitespace();
        while let Some(token) = tokens.next() {
            if token == "typ" {
                return tokens.next();
            }
        }
        None
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// Track produced by the local capture layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTrack {
    pub id: String,
    pub stream_id: String,
    pub kind: TrackKind,
}

/// Track received from the remote peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub id: String,
    pub stream_id: String,
    pub kind: TrackKind,
}

/// Transport condition reported by the connection endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Notifications published by a coordinator to the application layer.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(CallState),
    RemoteTrack(RemoteTrack),
    Connected,
    Disconnected,
    ConnectionProblem,
    ConnectionRecovering,
    ConnectionRecovered,
    /// The remote side stayed unreachable past the grace period.
    RemoteUnreachable,
    CandidateForwardFailed { reason: String },
    CandidateRejected { doc_id: String, reason: String },
}

/// ICE server as configured by the user.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub id: String,
    pub r#type: String, // 'stun' or 'turn'
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}
