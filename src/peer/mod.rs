pub mod connection;
pub mod endpoint;
pub mod ice;
pub mod state;
pub mod types;

pub use connection::WebRtcEndpoint;
pub use endpoint::{ConnectionEndpoint, MediaSource};
pub use ice::CandidateChannel;
pub use state::{CallSession, CallState};
pub use types::{
    CallId, Candidate, EndpointState, LocalTrack, RemoteTrack, Role, SdpKind, ServerConfig,
    SessionDescription, SessionEvent, TrackKind,
};
