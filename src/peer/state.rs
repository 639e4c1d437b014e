use crate::errors::{CallError, CallResult};
use crate::peer::types::{CallId, Candidate, Role};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::debug;

/// Lifecycle of one call on this peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    LocalMediaReady,
    Negotiating(Role),
    Connected,
    Closed,
}

/// What to do with a remote candidate delivered by the store.
#[derive(Debug, Clone, PartialEq)]
pub enum CandidateDisposition {
    Apply(Candidate),
    /// Held until the remote description is applied.
    Buffered,
    /// Already seen under the same document id.
    Duplicate,
    /// Session is closed, nothing may touch the endpoint.
    Ignored,
}

/// Background listeners owned by one session, cancelled together.
///
/// Clones share the same table, so a holder of a clone can cancel every
/// listener without going through the session lock.
#[derive(Clone, Default)]
pub struct SubscriptionTable {
    tasks: Arc<Mutex<Vec<(&'static str, AbortHandle)>>>,
}

impl SubscriptionTable {
    pub fn register(&self, name: &'static str, task: JoinHandle<()>) {
        self.tasks.lock().push((name, task.abort_handle()));
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Keeps the first `len` listeners and aborts the rest.
    pub fn truncate(&self, len: usize) {
        let mut tasks = self.tasks.lock();
        let start = len.min(tasks.len());
        for (name, task) in tasks.drain(start..) {
            debug!(listener = name, "cancelling listener");
            task.abort();
        }
    }

    pub fn cancel_all(&self) {
        self.truncate(0);
    }
}

/// Per-call negotiation state, owned by one coordinator.
pub struct CallSession {
    state: CallState,
    role: Option<Role>,
    call_id: Option<CallId>,
    remote_description_applied: bool,
    pending_remote_candidates: VecDeque<(String, Candidate)>,
    seen_candidates: HashSet<String>,
    pub(crate) subscriptions: SubscriptionTable,
    pub(crate) disconnect_task: Option<AbortHandle>,
}

impl Default for CallSession {
    fn default() -> Self {
        Self::new()
    }
}

impl CallSession {
    pub fn new() -> Self {
        Self {
            state: CallState::Idle,
            role: None,
            call_id: None,
            remote_description_applied: false,
            pending_remote_candidates: VecDeque::new(),
            seen_candidates: HashSet::new(),
            subscriptions: SubscriptionTable::default(),
            disconnect_task: None,
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn call_id(&self) -> Option<&CallId> {
        self.call_id.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.state == CallState::Closed
    }

    pub fn pending_remote_candidates(&self) -> usize {
        self.pending_remote_candidates.len()
    }

    /// `Idle → LocalMediaReady`.
    pub fn media_ready(&mut self) -> CallResult<()> {
        self.expect(CallState::Idle, "open local media")?;
        self.state = CallState::LocalMediaReady;
        Ok(())
    }

    /// Checks that a new negotiation may start as `role`.
    pub fn ensure_can_negotiate(&self, role: Role) -> CallResult<()> {
        if role == Role::Caller && self.role == Some(Role::Caller) {
            if let Some(id) = &self.call_id {
                return Err(CallError::OfferAlreadySet(id.clone()));
            }
        }
        let action = match role {
            Role::Caller => "create a call",
            Role::Callee => "join a call",
        };
        self.expect(CallState::LocalMediaReady, action)
    }

    /// `LocalMediaReady → Negotiating(role)`.
    pub fn begin_negotiation(&mut self, role: Role, call_id: CallId) -> CallResult<()> {
        self.ensure_can_negotiate(role)?;
        self.role = Some(role);
        self.call_id = Some(call_id);
        self.state = CallState::Negotiating(role);
        Ok(())
    }

    /// `Negotiating → Connected`. Returns whether the state changed.
    pub fn mark_connected(&mut self) -> bool {
        match self.state {
            CallState::Negotiating(_) => {
                self.state = CallState::Connected;
                true
            }
            _ => false,
        }
    }

    /// Whether an `answer` observed on the call document must be applied.
    pub fn awaiting_answer(&self) -> bool {
        self.role == Some(Role::Caller) && !self.remote_description_applied && !self.is_closed()
    }

    /// Records that the remote description is set and releases the buffered
    /// candidates in arrival order.
    pub fn mark_remote_description_applied(&mut self) -> Vec<(String, Candidate)> {
        self.remote_description_applied = true;
        self.pending_remote_candidates.drain(..).collect()
    }

    /// Accounts for a remote candidate delivered under store document `doc_id`.
    pub fn accept_remote_candidate(
        &mut self,
        doc_id: &str,
        candidate: Candidate,
    ) -> CandidateDisposition {
        if self.is_closed() {
            return CandidateDisposition::Ignored;
        }
        if !self.seen_candidates.insert(doc_id.to_owned()) {
            return CandidateDisposition::Duplicate;
        }
        if self.remote_description_applied {
            CandidateDisposition::Apply(candidate)
        } else {
            self.pending_remote_candidates
                .push_back((doc_id.to_owned(), candidate));
            CandidateDisposition::Buffered
        }
    }

    /// Any state `→ Closed`: cancels every listener and drops buffered
    /// candidates. Returns whether the state changed.
    pub fn close(&mut self) -> bool {
        if self.is_closed() {
            return false;
        }
        self.state = CallState::Closed;
        self.subscriptions.cancel_all();
        if let Some(task) = self.disconnect_task.take() {
            task.abort();
        }
        self.pending_remote_candidates.clear();
        true
    }

    fn expect(&self, expected: CallState, action: &'static str) -> CallResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(CallError::InvalidState {
                action,
                state: self.state,
            })
        }
    }
}
