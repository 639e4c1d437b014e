use crate::config::LoggingSettings;
use crate::peer::state::CallState;
use crate::peer::types::{Candidate, RemoteTrack, SessionEvent};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

const EVENT_CAPACITY: usize = 64;

/// Installs the global `tracing` subscriber. Does nothing when logging is
/// disabled or a subscriber is already installed.
pub fn init(settings: &LoggingSettings) {
    if !settings.enabled {
        return;
    }
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".into()))
        .with_target(false)
        .try_init();
}

/// Trace of a candidate crossing the signaling channel (trickle ICE).
pub fn dump_candidate(label: &str, cand: &Candidate) {
    debug!(
        direction = label,
        candidate = cand.get_str("candidate").unwrap_or_default(),
        sdp_mid = ?cand.get_str("sdpMid"),
        kind = ?cand.candidate_type(),
        "trickle candidate"
    );
}

/// Publishes [`SessionEvent`]s to the application layer.
#[derive(Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<SessionEvent>,
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventEmitter {
    pub fn new() -> Self {
        Self {
            tx: broadcast::channel(EVENT_CAPACITY).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    fn emit(&self, evt: SessionEvent) {
        debug!(event = ?evt, "emit");
        // No receiver is a normal condition.
        let _ = self.tx.send(evt);
    }

    pub fn emit_state(&self, state: CallState) {
        info!(?state, "call state changed");
        self.emit(SessionEvent::StateChanged(state));
    }

    pub fn emit_remote_track(&self, track: RemoteTrack) {
        info!(track = %track.id, kind = ?track.kind, "remote track");
        self.emit(SessionEvent::RemoteTrack(track));
    }

    pub fn emit_connected(&self) {
        self.emit(SessionEvent::Connected);
    }

    pub fn emit_disconnected(&self) {
        self.emit(SessionEvent::Disconnected);
    }

    pub fn emit_connection_problem(&self) {
        warn!("connection issues detected");
        self.emit(SessionEvent::ConnectionProblem);
    }

    pub fn emit_connection_recovering(&self) {
        self.emit(SessionEvent::ConnectionRecovering);
    }

    pub fn emit_connection_recovered(&self) {
        info!("connection recovered");
        self.emit(SessionEvent::ConnectionRecovered);
    }

    pub fn emit_remote_unreachable(&self) {
        warn!("remote peer unreachable, giving up");
        self.emit(SessionEvent::RemoteUnreachable);
    }

    pub fn emit_candidate_forward_failed(&self, reason: String) {
        self.emit(SessionEvent::CandidateForwardFailed { reason });
    }

    pub fn emit_candidate_rejected(&self, doc_id: &str, reason: String) {
        self.emit(SessionEvent::CandidateRejected {
            doc_id: doc_id.to_owned(),
            reason,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events_in_order() {
        let emitter = EventEmitter::new();
        let mut rx = emitter.subscribe();
        emitter.emit_state(CallState::LocalMediaReady);
        emitter.emit_connected();

        assert_eq!(
            rx.recv().await.unwrap(),
            SessionEvent::StateChanged(CallState::LocalMediaReady)
        );
        assert_eq!(rx.recv().await.unwrap(), SessionEvent::Connected);
    }

    #[test]
    fn emitting_without_subscribers_is_fine() {
        EventEmitter::new().emit_disconnected();
    }
}
