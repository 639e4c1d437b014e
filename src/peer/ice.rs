use crate::logger::{dump_candidate, EventEmitter};
use crate::peer::endpoint::ConnectionEndpoint;
use crate::peer::types::Candidate;
use crate::store::NegotiationStore;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

enum Discovery {
    Found(Candidate),
    Complete,
}

/// Locally discovered candidates, in discovery order.
///
/// Attaching registers the endpoint's candidate handler; the handler only
/// enqueues, so it never blocks the endpoint.
pub struct CandidateChannel {
    rx: mpsc::UnboundedReceiver<Discovery>,
}

impl CandidateChannel {
    pub fn attach(endpoint: &dyn ConnectionEndpoint) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        endpoint.on_local_candidate(Box::new(move |cand: Option<Candidate>| {
            let item = match cand {
                Some(c) => Discovery::Found(c),
                None => Discovery::Complete,
            };
            // Receiver gone means the session was torn down.
            let _ = tx.send(item);
        }));
        Self { rx }
    }

    /// Appends every candidate to `collection`, one at a time.
    ///
    /// A failed append is reported and skipped; forwarding goes on, also after
    /// the endpoint declared discovery complete.
    pub fn forward_to(
        mut self,
        store: Arc<dyn NegotiationStore>,
        collection: String,
        events: EventEmitter,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut forwarded = Vec::new();
            while let Some(item) = self.rx.recv().await {
                match item {
                    Discovery::Found(cand) => {
                        dump_candidate("LOCAL", &cand);
                        match store.add_document(&collection, cand.fields().clone()).await {
                            Ok(_) => forwarded.push(cand),
                            Err(e) => {
                                warn!(%collection, error = %e, "failed to forward local candidate");
                                events.emit_candidate_forward_failed(e.to_string());
                            }
                        }
                    }
                    Discovery::Complete => {
                        info!(%collection, count = forwarded.len(), "candidate discovery completed");
                        analyze_candidates(&forwarded);
                    }
                }
            }
        })
    }
}

/// Candidate counts by type.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateSurvey {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
    pub other: usize,
}

pub fn analyze_candidates(candidates: &[Candidate]) -> CandidateSurvey {
    let mut survey = CandidateSurvey::default();
    for candidate in candidates {
        match candidate.candidate_type() {
            Some("host") => survey.host += 1,
            Some("srflx") => survey.srflx += 1,
            Some("relay") => survey.relay += 1,
            _ => survey.other += 1,
        }
    }

    info!(
        host = survey.host,
        srflx = survey.srflx,
        relay = survey.relay,
        other = survey.other,
        "candidate analysis"
    );
    if survey.relay == 0 {
        warn!("no TURN relay candidates found, connection through NAT may fail");
    }
    survey
}
