//! Multi-party commit protocol.
//!
//! One `CommitProtocol` drives one transition for the proposing participant through
//! `Built -> LocallySigned -> PeerSessionsOpen -> Submitted -> Finalized`, or into
//! `Aborted(reason)` from any non-terminal state. Counterparties run `Responder::receive_finality`.
//!
//! # Suspension points
//! Opening a session and waiting for the peer's answer (bounded by the session timeout), and
//! waiting for the ordering service (bounded by the finality timeout). Expiry of either aborts.
//!
//! # Atomicity
//! Nothing is written to any record store before the ordering service finalizes. After that
//! the verdict is authoritative: the proposer records it and forwards it to every counterparty.
//! A counterparty that fails to acknowledge is listed in `CommitOutcome::unacknowledged`; the
//! finalized transition is not undone.
//!
//! # Record relevance
//! Each participant stores only produced records it issued or owns, and flags every consumed
//! input it holds.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::core::ordering::{OrderingOutcome, OrderingService};
use crate::core::record::StateAndRef;
use crate::core::session::{FlowMessage, IncomingSession, PeerChannel, Session};
use crate::core::transition::{NotarisedTransition, SignedTransition, Transition};
use crate::core::validator::verify_transition;
use crate::core::vault::RecordStore;
use crate::error::{LedgerError, Result};
use crate::identity::{LocalIdentity, Party};

/// Observable protocol phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolState {
    Built,
    LocallySigned,
    PeerSessionsOpen,
    Submitted,
    Finalized,
    Aborted(String),
}

impl ProtocolState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProtocolState::Finalized | ProtocolState::Aborted(_))
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_advance_to(&self, next: &ProtocolState) -> bool {
        use ProtocolState::*;
        match (self, next) {
            (Built, LocallySigned)
            | (LocallySigned, PeerSessionsOpen)
            | (PeerSessionsOpen, Submitted)
            | (Submitted, Finalized) => true,
            (current, Aborted(_)) => !current.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolState::Built => write!(f, "Built"),
            ProtocolState::LocallySigned => write!(f, "LocallySigned"),
            ProtocolState::PeerSessionsOpen => write!(f, "PeerSessionsOpen"),
            ProtocolState::Submitted => write!(f, "Submitted"),
            ProtocolState::Finalized => write!(f, "Finalized"),
            ProtocolState::Aborted(reason) => write!(f, "Aborted({})", reason),
        }
    }
}

/// Called with the new state on every transition.
pub type ProgressObserver = Arc<dyn Fn(&ProtocolState) + Send + Sync>;

/// Bounds on the protocol's suspension points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolTimeouts {
    pub session: Duration,
    pub finality: Duration,
}

impl From<&NodeConfig> for ProtocolTimeouts {
    fn from(config: &NodeConfig) -> Self {
        Self {
            session: config.session_timeout(),
            finality: config.finality_timeout(),
        }
    }
}

/// Result of a finalized run. Finality cannot be undone, so counterparties that did not
/// acknowledge the transition are reported here rather than as an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    pub notarised: NotarisedTransition,
    pub unacknowledged: Vec<Party>,
}

impl CommitOutcome {
    /// Whether every counterparty confirmed it recorded the transition.
    pub fn fully_recorded(&self) -> bool {
        self.unacknowledged.is_empty()
    }
}

/// Produced states `party` is issuer or owner of.
fn states_for(notarised: &NotarisedTransition, party: &Party) -> Vec<StateAndRef> {
    notarised
        .produced_states()
        .into_iter()
        .filter(|s| {
            s.record
                .participants()
                .iter()
                .any(|p| p.owning_key == party.owning_key)
        })
        .collect()
}

/// Stores the records `party` takes part in and flags every consumed input it holds.
fn record_finality(
    store: &dyn RecordStore,
    notarised: &NotarisedTransition,
    party: &Party,
) -> Result<()> {
    store.persist(
        &states_for(notarised, party),
        &notarised.signed.transition.consumed_refs(),
    )
}

fn reason_of(err: LedgerError) -> String {
    match err {
        LedgerError::ProtocolAbort(reason) => reason,
        other => other.to_string(),
    }
}

/// Drives a single transition to a terminal state.
pub struct CommitProtocol {
    identity: Arc<LocalIdentity>,
    ordering: Arc<dyn OrderingService>,
    channel: Arc<dyn PeerChannel>,
    store: Arc<dyn RecordStore>,
    timeouts: ProtocolTimeouts,
    state: ProtocolState,
    observer: Option<ProgressObserver>,
}

impl CommitProtocol {
    pub fn new(
        identity: Arc<LocalIdentity>,
        ordering: Arc<dyn OrderingService>,
        channel: Arc<dyn PeerChannel>,
        store: Arc<dyn RecordStore>,
        timeouts: ProtocolTimeouts,
    ) -> Self {
        Self {
            identity,
            ordering,
            channel,
            store,
            timeouts,
            state: ProtocolState::Built,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Option<ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn state(&self) -> &ProtocolState {
        &self.state
    }

    fn advance(&mut self, next: ProtocolState) {
        debug_assert!(
            self.state.can_advance_to(&next),
            "illegal protocol step {} -> {}",
            self.state,
            next
        );
        info!("{}: {} -> {}", self.identity.party().name, self.state, next);
        self.state = next;
        if let Some(observer) = &self.observer {
            observer(&self.state);
        }
    }

    /// Tells every open session, moves to `Aborted`, and returns the error for the caller.
    fn abort(&mut self, reason: String, sessions: &[Session]) -> LedgerError {
        for session in sessions {
            if let Err(e) = session.send(FlowMessage::Abort(reason.clone())) {
                debug!("Could not tell {} about the abort: {}", session.peer().name, e);
            }
        }
        warn!("{}: aborting: {}", self.identity.party().name, reason);
        self.advance(ProtocolState::Aborted(reason.clone()));
        LedgerError::ProtocolAbort(reason)
    }

    /// Counterparties in first-seen order, without duplicates or the local party.
    fn session_peers(&self, counterparties: &[Party]) -> Vec<Party> {
        let me = &self.identity.party().owning_key;
        let mut peers: Vec<Party> = Vec::with_capacity(counterparties.len());
        for party in counterparties {
            if party.owning_key != *me && !peers.iter().any(|p| p.owning_key == party.owning_key) {
                peers.push(party.clone());
            }
        }
        peers
    }

    fn sign(&self, transition: Transition) -> Result<SignedTransition> {
        let signature = self.identity.sign_transition(&transition)?;
        let mut signed = SignedTransition::new(transition)?;
        signed.add_signature(signature);
        Ok(signed)
    }

    async fn open(
        &self,
        peer: &Party,
        transition_id: &str,
    ) -> std::result::Result<Session, String> {
        let mut session = self
            .channel
            .open_session(self.identity.party(), peer)
            .await
            .map_err(reason_of)?;
        session
            .send(FlowMessage::Open { transition_id: transition_id.to_string() })
            .map_err(reason_of)?;
        match timeout(self.timeouts.session, session.receive()).await {
            Err(_) => Err(format!(
                "{} did not answer within {:?}",
                peer.name, self.timeouts.session
            )),
            Ok(Err(e)) => Err(reason_of(e)),
            Ok(Ok(FlowMessage::Accept)) => Ok(session),
            Ok(Ok(FlowMessage::Decline(reason))) => {
                info!("{} declined the session: {}", peer.name, reason);
                Err(reason)
            }
            Ok(Ok(other)) => Err(format!("unexpected {} from {}", other.kind(), peer.name)),
        }
    }

    /// Forwards the verdict and waits for the peer's `Ack`. Returns whether it came.
    async fn deliver(&self, session: &mut Session, notarised: &NotarisedTransition) -> bool {
        let peer = session.peer().name.clone();
        let id = notarised.id();
        if let Err(e) = session.send(FlowMessage::Finalized(Box::new(notarised.clone()))) {
            warn!("Could not forward {} to {}: {}", id, peer, e);
            return false;
        }
        match timeout(self.timeouts.session, session.receive()).await {
            Ok(Ok(FlowMessage::Ack)) => {
                debug!("{} recorded {}", peer, id);
                true
            }
            Ok(Ok(other)) => {
                warn!("{} answered {} instead of Ack for {}", peer, other.kind(), id);
                false
            }
            Ok(Err(e)) => {
                warn!("{} did not acknowledge {}: {}", peer, id, e);
                false
            }
            Err(_) => {
                warn!("{} did not acknowledge {} in time", peer, id);
                false
            }
        }
    }

    /// Runs the protocol for `transition`, opening a session with each counterparty.
    ///
    /// Returns the finalized transition with any counterparties that did not acknowledge it,
    /// or the error that aborted it. Local validation failures surface as
    /// `LedgerError::Validation`; everything after signing surfaces as
    /// `LedgerError::ProtocolAbort` with the reason given by the rejecting party.
    pub async fn run(
        &mut self,
        transition: Transition,
        counterparties: &[Party],
    ) -> Result<CommitOutcome> {
        if self.state != ProtocolState::Built {
            return Err(LedgerError::ProtocolAbort(format!(
                "protocol already ran (state {})",
                self.state
            )));
        }

        if let Err(e) = verify_transition(&transition) {
            self.advance(ProtocolState::Aborted(e.to_string()));
            return Err(e.into());
        }
        let signed = match self.sign(transition) {
            Ok(signed) => signed,
            Err(e) => {
                self.advance(ProtocolState::Aborted(e.to_string()));
                return Err(e);
            }
        };
        self.advance(ProtocolState::LocallySigned);

        let mut sessions = Vec::new();
        for peer in self.session_peers(counterparties) {
            match self.open(&peer, &signed.id).await {
                Ok(session) => sessions.push(session),
                Err(reason) => return Err(self.abort(reason, &sessions)),
            }
        }
        self.advance(ProtocolState::PeerSessionsOpen);

        self.advance(ProtocolState::Submitted);
        let outcome = match timeout(self.timeouts.finality, self.ordering.submit(signed)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let reason = format!(
                    "no answer from ordering service within {:?}",
                    self.timeouts.finality
                );
                return Err(self.abort(reason, &sessions));
            }
        };
        let notarised = match outcome {
            OrderingOutcome::Finalized(notarised) => notarised,
            OrderingOutcome::Rejected(reason) => return Err(self.abort(reason, &sessions)),
        };

        if let Err(e) = record_finality(self.store.as_ref(), &notarised, self.identity.party()) {
            let reason = format!("local record store refused {}: {}", notarised.id(), e);
            return Err(self.abort(reason, &sessions));
        }
        let mut unacknowledged = Vec::new();
        for session in sessions.iter_mut() {
            if !self.deliver(session, &notarised).await {
                unacknowledged.push(session.peer().clone());
            }
        }
        self.advance(ProtocolState::Finalized);
        Ok(CommitOutcome {
            notarised,
            unacknowledged,
        })
    }
}

/// Counterparty side of the protocol.
pub struct Responder {
    party: Party,
    notary: Party,
    store: Arc<dyn RecordStore>,
    accept_sessions: bool,
    timeouts: ProtocolTimeouts,
}

impl Responder {
    pub fn new(
        party: Party,
        notary: Party,
        store: Arc<dyn RecordStore>,
        accept_sessions: bool,
        timeouts: ProtocolTimeouts,
    ) -> Self {
        Self {
            party,
            notary,
            store,
            accept_sessions,
            timeouts,
        }
    }

    fn check(&self, notarised: &NotarisedTransition) -> Result<()> {
        notarised.verify_notary(&self.notary)?;
        notarised.signed.verify_signatures()?;
        verify_transition(&notarised.signed.transition)?;
        Ok(())
    }

    /// Handles one incoming session. `Ok(None)` means the session ended without a finalized
    /// transition (declined here, or aborted by the initiator).
    pub async fn receive_finality(
        &self,
        incoming: IncomingSession,
    ) -> Result<Option<NotarisedTransition>> {
        let IncomingSession { initiator, mut session } = incoming;

        let transition_id = match timeout(self.timeouts.session, session.receive()).await {
            Ok(Ok(FlowMessage::Open { transition_id })) => transition_id,
            Ok(Ok(other)) => {
                return Err(LedgerError::ProtocolAbort(format!(
                    "expected Open from {}, got {}",
                    initiator.name,
                    other.kind()
                )))
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(LedgerError::ProtocolAbort(format!(
                    "{} opened a session but sent nothing",
                    initiator.name
                )))
            }
        };

        if !self.accept_sessions {
            info!(
                "{} declines session from {} for {}",
                self.party.name, initiator.name, transition_id
            );
            session.send(FlowMessage::Decline("not accepting sessions".to_string()))?;
            return Ok(None);
        }
        session.send(FlowMessage::Accept)?;

        // After our Accept the initiator may still open one more session, wait for the ordering
        // service, and deliver to one earlier peer. Assumes every node runs the same timeouts.
        let wait = self.timeouts.finality + self.timeouts.session * 2;
        let notarised = match timeout(wait, session.receive()).await {
            Ok(Ok(FlowMessage::Finalized(notarised))) => *notarised,
            Ok(Ok(FlowMessage::Abort(reason))) => {
                info!(
                    "{}: {} aborted {}: {}",
                    self.party.name, initiator.name, transition_id, reason
                );
                return Ok(None);
            }
            Ok(Ok(other)) => {
                return Err(LedgerError::ProtocolAbort(format!(
                    "expected Finalized from {}, got {}",
                    initiator.name,
                    other.kind()
                )))
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(LedgerError::ProtocolAbort(format!(
                    "no verdict from {} for {}",
                    initiator.name, transition_id
                )))
            }
        };

        if notarised.id() != transition_id {
            return Err(LedgerError::ProtocolAbort(format!(
                "{} finalized {} on a session opened for {}",
                initiator.name,
                notarised.id(),
                transition_id
            )));
        }
        if let Err(e) = self.check(&notarised) {
            warn!("{} refuses {} from {}: {}", self.party.name, transition_id, initiator.name, e);
            return Err(e);
        }
        record_finality(self.store.as_ref(), &notarised, &self.party)?;
        session.send(FlowMessage::Ack)?;
        info!(
            "{} recorded {} from {} at position {}",
            self.party.name, transition_id, initiator.name, notarised.order_position
        );
        Ok(Some(notarised))
    }
}
