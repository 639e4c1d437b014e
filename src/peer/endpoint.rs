use crate::errors::EndpointError;
use crate::peer::types::{Candidate, EndpointState, LocalTrack, RemoteTrack, SessionDescription};
use async_trait::async_trait;

/// Called for every locally discovered candidate, then once with `None` when
/// discovery is complete.
pub type LocalCandidateHandler = Box<dyn Fn(Option<Candidate>) + Send + Sync>;
pub type RemoteTrackHandler = Box<dyn Fn(RemoteTrack) + Send + Sync>;
pub type ConnectionStateHandler = Box<dyn Fn(EndpointState) + Send + Sync>;

pub type EndpointResult<T> = Result<T, EndpointError>;

/// Local end of the peer connection (media transport and ICE agent).
///
/// Handlers registered with `on_*` replace the previous handler and must not
/// block; they are invoked from the endpoint's own tasks.
#[async_trait]
pub trait ConnectionEndpoint: Send + Sync + 'static {
    async fn add_local_track(&self, track: LocalTrack) -> EndpointResult<()>;

    fn on_remote_track(&self, handler: RemoteTrackHandler);

    async fn create_offer(&self) -> EndpointResult<SessionDescription>;

    /// Requires the remote offer to be set.
    async fn create_answer(&self) -> EndpointResult<SessionDescription>;

    /// Applying a local description starts candidate discovery.
    async fn set_local_description(&self, desc: SessionDescription) -> EndpointResult<()>;

    async fn set_remote_description(&self, desc: SessionDescription) -> EndpointResult<()>;

    async fn add_remote_candidate(&self, candidate: Candidate) -> EndpointResult<()>;

    fn on_local_candidate(&self, handler: LocalCandidateHandler);

    fn on_connection_state(&self, handler: ConnectionStateHandler);

    async fn close(&self) -> EndpointResult<()>;
}

/// Capture layer producing the tracks sent to the remote peer.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn capture(&self) -> Result<Vec<LocalTrack>, String>;
}
