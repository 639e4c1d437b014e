//! Offer/answer negotiation driven through a [`NegotiationStore`].
//!
//! The caller creates a call document, writes its offer and trickles its
//! candidates into `offerCandidates`; the callee reads the offer, writes an
//! answer and trickles into `answerCandidates`. Each side applies what the
//! other wrote to its own [`ConnectionEndpoint`].
//!
//! Every protocol step and every listener runs while holding the session
//! lock, so handlers for one call never interleave.

use crate::config::Settings;
use crate::errors::{CallError, CallResult};
use crate::logger::{dump_candidate, EventEmitter};
use crate::peer::endpoint::{ConnectionEndpoint, MediaSource};
use crate::peer::ice::CandidateChannel;
use crate::peer::state::{CallSession, CallState, CandidateDisposition, SubscriptionTable};
use crate::peer::types::{CallId, Candidate, EndpointState, RemoteTrack, Role, SessionEvent};
use crate::store::call::{candidates_path, write_description, CallDocument, CandidateDirection, CALLS};
use crate::store::{AddedDocument, Fields, NegotiationStore, Subscription};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

#[derive(Clone)]
struct Shared {
    listeners: SubscriptionTable,
    store: Arc<dyn NegotiationStore>,
    endpoint: Arc<dyn ConnectionEndpoint>,
    session: Arc<Mutex<CallSession>>,
    events: EventEmitter,
    grace_period: Duration,
}

/// Drives one call on this peer, either as caller or as callee.
pub struct NegotiationCoordinator {
    shared: Shared,
}

impl NegotiationCoordinator {
    pub fn new(
        store: Arc<dyn NegotiationStore>,
        endpoint: Arc<dyn ConnectionEndpoint>,
        settings: &Settings,
    ) -> Self {
        let session = CallSession::new();
        Self {
            shared: Shared {
                listeners: session.subscriptions.clone(),
                store,
                endpoint,
                session: Arc::new(Mutex::new(session)),
                events: EventEmitter::new(),
                grace_period: settings.grace_period(),
            },
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    pub async fn state(&self) -> CallState {
        self.shared.session.lock().await.state()
    }

    pub async fn call_id(&self) -> Option<CallId> {
        self.shared.session.lock().await.call_id().cloned()
    }

    /// Captures local media and hands the tracks to the endpoint.
    pub async fn open_local_media(&self, source: &dyn MediaSource) -> CallResult<()> {
        let sh = &self.shared;
        let mut session = sh.session.lock().await;
        if session.state() != CallState::Idle {
            return Err(CallError::InvalidState {
                action: "open local media",
                state: session.state(),
            });
        }

        let tracks = source.capture().await.map_err(CallError::MediaUnavailable)?;
        if tracks.is_empty() {
            return Err(CallError::MediaUnavailable(
                "capture produced no tracks".into(),
            ));
        }
        for track in tracks {
            debug!(track = %track.id, kind = ?track.kind, "adding local track");
            sh.endpoint
                .add_local_track(track)
                .await
                .map_err(|e| CallError::MediaUnavailable(e.to_string()))?;
        }

        let events = sh.events.clone();
        sh.endpoint.on_remote_track(Box::new(move |track: RemoteTrack| {
            events.emit_remote_track(track)
        }));
        session
            .subscriptions
            .register("connection state", watch_connection_state(sh.clone()));

        session.media_ready()?;
        sh.events.emit_state(session.state());
        Ok(())
    }

    /// Starts a call as the offerer and returns the id the callee joins with.
    pub async fn create_call(&self) -> CallResult<CallId> {
        let mut session = self.shared.session.lock().await;
        session.ensure_can_negotiate(Role::Caller)?;

        let mark = session.subscriptions.len();
        match self.offer(&mut session).await {
            Ok(id) => Ok(id),
            Err(e) => {
                warn!(error = %e, "create call failed");
                session.subscriptions.truncate(mark);
                Err(e)
            }
        }
    }

    async fn offer(&self, session: &mut CallSession) -> CallResult<CallId> {
        let sh = &self.shared;
        let id = CallId::new(sh.store.create_document(CALLS).await?);
        info!(call = %id, "call created");

        // Must be in place before the local description starts discovery.
        let forwarder = CandidateChannel::attach(sh.endpoint.as_ref()).forward_to(
            sh.store.clone(),
            candidates_path(&id, CandidateDirection::local(Role::Caller)),
            sh.events.clone(),
        );
        session.subscriptions.register("local candidates", forwarder);

        let offer = sh.endpoint.create_offer().await?;
        sh.endpoint.set_local_description(offer.clone()).await?;

        // Subscribe first: the set-once write must be the last step that can
        // fail, or a retry would find the offer already taken.
        let changes = sh.store.subscribe_document(CALLS, id.as_str()).await?;
        let remote = sh
            .store
            .subscribe_added(&candidates_path(
                &id,
                CandidateDirection::remote(Role::Caller),
            ))
            .await?;
        write_description(sh.store.as_ref(), &id, &offer).await?;
        debug!(call = %id, "offer written");

        session.begin_negotiation(Role::Caller, id.clone())?;
        session.subscriptions.register(
            "answer",
            tokio::spawn(watch_answer(sh.clone(), id.clone(), changes)),
        );
        session.subscriptions.register(
            "remote candidates",
            tokio::spawn(apply_remote_candidates(sh.clone(), remote)),
        );
        sh.events.emit_state(session.state());
        Ok(id)
    }

    /// Joins the call `id` as the answerer.
    pub async fn join_call(&self, id: impl Into<CallId>) -> CallResult<()> {
        let id = id.into();
        let mut session = self.shared.session.lock().await;
        session.ensure_can_negotiate(Role::Callee)?;

        let mark = session.subscriptions.len();
        match self.answer(&mut session, &id).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(call = %id, error = %e, "join call failed");
                session.subscriptions.truncate(mark);
                Err(e)
            }
        }
    }

    async fn answer(&self, session: &mut CallSession, id: &CallId) -> CallResult<()> {
        let sh = &self.shared;
        let fields = sh
            .store
            .get_document(CALLS, id.as_str())
            .await?
            .ok_or_else(|| CallError::CallNotFound(id.clone()))?;
        let offer = CallDocument::from_fields(id, &fields)?
            .offer
            .ok_or_else(|| CallError::OfferMissing(id.clone()))?;

        let forwarder = CandidateChannel::attach(sh.endpoint.as_ref()).forward_to(
            sh.store.clone(),
            candidates_path(id, CandidateDirection::local(Role::Callee)),
            sh.events.clone(),
        );
        session.subscriptions.register("local candidates", forwarder);

        sh.endpoint.set_remote_description(offer).await?;
        let answer = sh.endpoint.create_answer().await?;
        sh.endpoint.set_local_description(answer.clone()).await?;

        let remote = sh
            .store
            .subscribe_added(&candidates_path(
                id,
                CandidateDirection::remote(Role::Callee),
            ))
            .await?;
        write_description(sh.store.as_ref(), id, &answer).await?;
        info!(call = %id, "answer written");

        session.begin_negotiation(Role::Callee, id.clone())?;
        // Nothing can be buffered yet, the candidate listener starts below.
        session.mark_remote_description_applied();
        session.subscriptions.register(
            "remote candidates",
            tokio::spawn(apply_remote_candidates(sh.clone(), remote)),
        );
        sh.events.emit_state(session.state());
        Ok(())
    }

    /// Cancels every listener and closes the endpoint. Idempotent.
    pub async fn hangup(&self) -> CallResult<()> {
        let mut session = self.shared.session.lock().await;
        if session.is_closed() {
            return Ok(());
        }
        info!(call = ?session.call_id(), "hanging up");
        close_session(&self.shared, &mut session).await;
        Ok(())
    }
}

impl Drop for NegotiationCoordinator {
    fn drop(&mut self) {
        // Listeners keep the session alive; stop them with the coordinator.
        self.shared.listeners.cancel_all();
    }
}

/// Closes the endpoint, then the session.
///
/// The endpoint goes first: closing the session aborts the listeners, which
/// may include the task running this function.
async fn close_session(sh: &Shared, session: &mut CallSession) -> bool {
    if session.is_closed() {
        return false;
    }
    if let Err(e) = sh.endpoint.close().await {
        warn!(error = %e, "failed to close connection endpoint");
    }
    session.close();
    sh.events.emit_state(CallState::Closed);
    sh.events.emit_disconnected();
    true
}

async fn watch_answer(sh: Shared, id: CallId, mut changes: Subscription<Fields>) {
    while let Some(fields) = changes.next().await {
        let mut session = sh.session.lock().await;
        if session.is_closed() {
            break;
        }
        if !session.awaiting_answer() {
            continue;
        }
        let answer = match CallDocument::from_fields(&id, &fields) {
            Ok(doc) => doc.answer,
            Err(e) => {
                warn!(call = %id, error = %e, "ignoring unreadable call document");
                continue;
            }
        };
        let Some(answer) = answer else {
            continue;
        };

        if let Err(e) = sh.endpoint.set_remote_description(answer).await {
            warn!(call = %id, error = %e, "failed to apply answer");
            continue;
        }
        info!(call = %id, "answer applied");

        let released = session.mark_remote_description_applied();
        if !released.is_empty() {
            debug!(count = released.len(), "applying buffered remote candidates");
        }
        for (doc_id, candidate) in released {
            apply_candidate(&sh, &doc_id, candidate).await;
        }
    }
}

async fn apply_remote_candidates(sh: Shared, mut added: Subscription<AddedDocument>) {
    while let Some(doc) = added.next().await {
        let lag = Utc::now().signed_duration_since(doc.created_at);
        debug!(doc = %doc.id, lag_ms = lag.num_milliseconds(), "remote candidate delivered");
        let candidate = match Candidate::from_fields(doc.fields) {
            Ok(c) => c,
            Err(e) => {
                warn!(doc = %doc.id, error = %e, "skipping malformed remote candidate");
                sh.events.emit_candidate_rejected(&doc.id, e.to_string());
                continue;
            }
        };

        let mut session = sh.session.lock().await;
        match session.accept_remote_candidate(&doc.id, candidate) {
            CandidateDisposition::Apply(c) => apply_candidate(&sh, &doc.id, c).await,
            CandidateDisposition::Buffered => {
                debug!(doc = %doc.id, "remote description not set yet, queuing candidate")
            }
            CandidateDisposition::Duplicate => {
                debug!(doc = %doc.id, "candidate redelivered, already handled")
            }
            CandidateDisposition::Ignored => break,
        }
    }
}

async fn apply_candidate(sh: &Shared, doc_id: &str, candidate: Candidate) {
    dump_candidate("REMOTE", &candidate);
    if let Err(e) = sh.endpoint.add_remote_candidate(candidate).await {
        warn!(doc = doc_id, error = %e, "failed to add remote candidate");
        sh.events.emit_candidate_rejected(doc_id, e.to_string());
    }
}

fn watch_connection_state(sh: Shared) -> JoinHandle<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    sh.endpoint.on_connection_state(Box::new(move |st: EndpointState| {
        let _ = tx.send(st);
    }));

    tokio::spawn(async move {
        while let Some(st) = rx.recv().await {
            let mut session = sh.session.lock().await;
            if session.is_closed() {
                break;
            }
            on_connection_state(&sh, &mut session, st).await;
        }
    })
}

async fn on_connection_state(sh: &Shared, session: &mut CallSession, st: EndpointState) {
    debug!(state = ?st, call_state = ?session.state(), "endpoint state");
    match st {
        EndpointState::Connected => {
            if let Some(handle) = session.disconnect_task.take() {
                debug!("aborting pending disconnect task");
                handle.abort();
                sh.events.emit_connection_recovered();
            }
            if session.mark_connected() {
                sh.events.emit_state(session.state());
                sh.events.emit_connected();
            }
        }

        EndpointState::Disconnected | EndpointState::Failed => {
            if !matches!(
                session.state(),
                CallState::Negotiating(_) | CallState::Connected
            ) {
                return;
            }
            if session.disconnect_task.is_some() {
                debug!("disconnect task already pending");
                return;
            }
            sh.events.emit_connection_problem();
            sh.events.emit_connection_recovering();
            info!(
                grace_ms = sh.grace_period.as_millis() as u64,
                "grace period started"
            );
            let timer = tokio::spawn(expire_grace_period(sh.clone()));
            session.disconnect_task = Some(timer.abort_handle());
            session.subscriptions.register("grace period", timer);
        }

        EndpointState::Closed => {
            info!("connection endpoint closed");
            close_session(sh, session).await;
        }

        EndpointState::New | EndpointState::Connecting => {}
    }
}

async fn expire_grace_period(sh: Shared) {
    sleep(sh.grace_period).await;
    let mut session = sh.session.lock().await;
    // A recovered connection aborts this task before it gets here.
    session.disconnect_task.take();
    if session.is_closed() {
        return;
    }
    sh.events.emit_remote_unreachable();
    close_session(&sh, &mut session).await;
}
