//! Peer sessions for the commit protocol and an in-process network that carries them.
//!
//! A session is a bidirectional, ordered message stream between the initiating party and one
//! counterparty. The initiator opens it through a `PeerChannel`; the counterparty receives it
//! from the inbox returned when it registered.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::core::transition::NotarisedTransition;
use crate::error::{LedgerError, Result};
use crate::identity::{OwningKey, Party};

/// Messages exchanged over a session.
#[derive(Debug, Clone)]
pub enum FlowMessage {
    /// Initiator announces the transition the session is about.
    Open { transition_id: String },
    Accept,
    Decline(String),
    /// The ordering service's verdict, forwarded for recording.
    Finalized(Box<NotarisedTransition>),
    Ack,
    Abort(String),
}

impl FlowMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            FlowMessage::Open { .. } => "Open",
            FlowMessage::Accept => "Accept",
            FlowMessage::Decline(_) => "Decline",
            FlowMessage::Finalized(_) => "Finalized",
            FlowMessage::Ack => "Ack",
            FlowMessage::Abort(_) => "Abort",
        }
    }
}

/// One end of a session.
#[derive(Debug)]
pub struct Session {
    peer: Party,
    outbound: mpsc::UnboundedSender<FlowMessage>,
    inbound: mpsc::UnboundedReceiver<FlowMessage>,
}

impl Session {
    /// Creates both ends: the first is held by `a` and talks to `b`, the second the reverse.
    pub fn pair(a: Party, b: Party) -> (Session, Session) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            Session { peer: b, outbound: a_tx, inbound: a_rx },
            Session { peer: a, outbound: b_tx, inbound: b_rx },
        )
    }

    pub fn peer(&self) -> &Party {
        &self.peer
    }

    pub fn send(&self, message: FlowMessage) -> Result<()> {
        debug!("-> {}: {}", self.peer.name, message.kind());
        self.outbound.send(message).map_err(|_| {
            LedgerError::ProtocolAbort(format!("session with {} is closed", self.peer.name))
        })
    }

    /// Waits for the next message from the peer.
    pub async fn receive(&mut self) -> Result<FlowMessage> {
        let message = self.inbound.recv().await.ok_or_else(|| {
            LedgerError::ProtocolAbort(format!("session with {} is closed", self.peer.name))
        })?;
        debug!("<- {}: {}", self.peer.name, message.kind());
        Ok(message)
    }
}

/// A session opened towards us by another party.
#[derive(Debug)]
pub struct IncomingSession {
    pub initiator: Party,
    pub session: Session,
}

pub type Inbox = mpsc::UnboundedReceiver<IncomingSession>;

/// Transport between participants.
#[async_trait]
pub trait PeerChannel: Send + Sync {
    /// Makes `party` reachable; sessions opened towards it arrive on the returned inbox.
    fn register(&self, party: &Party) -> Result<Inbox>;

    async fn open_session(&self, from: &Party, to: &Party) -> Result<Session>;
}

/// In-process network: one unbounded inbox per registered party.
#[derive(Debug, Default)]
pub struct MockNetwork {
    inboxes: RwLock<HashMap<OwningKey, mpsc::UnboundedSender<IncomingSession>>>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PeerChannel for MockNetwork {
    fn register(&self, party: &Party) -> Result<Inbox> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inboxes = self.inboxes.write().unwrap_or_else(PoisonError::into_inner);
        if inboxes.insert(party.owning_key.clone(), tx).is_some() {
            debug!("Re-registered {}; previous inbox dropped", party.name);
        }
        Ok(rx)
    }

    async fn open_session(&self, from: &Party, to: &Party) -> Result<Session> {
        let inbox = self
            .inboxes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&to.owning_key)
            .cloned()
            .ok_or_else(|| LedgerError::ProtocolAbort(format!("unknown peer {}", to.name)))?;

        let (ours, theirs) = Session::pair(from.clone(), to.clone());
        inbox
            .send(IncomingSession { initiator: from.clone(), session: theirs })
            .map_err(|_| LedgerError::ProtocolAbort(format!("peer {} is not listening", to.name)))?;
        debug!("Opened session {} -> {}", from.name, to.name);
        Ok(ours)
    }
}
