// Core module: the participant node and the ledger machinery behind it.
//
// DETERMINISM GUARANTEES:
// =======================
// 1. A transition's id is a pure function of its canonical encoding
// 2. Validation depends only on (consumed, produced, intent, signers)
// 3. Input selection is a pure function of the record store's contents and order
// 4. The ordering service assigns positions in the order it finalizes transitions
//
// INVARIANTS:
// - No record store is written before the ordering service finalizes a transition
// - A record is consumed by at most one finalized transition
// - A produced record's issuer is always copied from the consumed record on transfer

pub mod asset;
pub mod ordering;
pub mod proposer;
pub mod protocol;
pub mod record;
pub mod selector;
pub mod session;
pub mod transition;
pub mod validator;
pub mod vault;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::core::ordering::OrderingService;
use crate::core::proposer::{propose_issue, propose_transfer};
use crate::core::protocol::{
    CommitOutcome, CommitProtocol, ProgressObserver, ProtocolTimeouts, Responder,
};
use crate::core::record::StateAndRef;
use crate::core::session::PeerChannel;
use crate::core::transition::Transition;
use crate::core::vault::{QueryCriteria, RecordStore, StateStatus, Vault};
use crate::error::Result;
use crate::identity::{LocalIdentity, Party};

/// Snapshot of a node's vault split by status, each list in store order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VaultReport {
    pub unconsumed: Vec<StateAndRef>,
    pub consumed: Vec<StateAndRef>,
}

/// A participant: its identity, its vault, and its links to the ordering service and peers.
///
/// While a node is alive it answers every session opened towards it; dropping the node stops
/// the responder.
pub struct Node {
    identity: Arc<LocalIdentity>,
    vault: Arc<Vault>,
    ordering: Arc<dyn OrderingService>,
    network: Arc<dyn PeerChannel>,
    config: NodeConfig,
    observer: Option<ProgressObserver>,
    responder: JoinHandle<()>,
}

impl Node {
    /// Registers `identity` on `network` and starts answering incoming sessions.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        identity: LocalIdentity,
        ordering: Arc<dyn OrderingService>,
        network: Arc<dyn PeerChannel>,
        config: NodeConfig,
    ) -> Result<Self> {
        let identity = Arc::new(identity);
        let vault = Arc::new(Vault::new());
        let mut inbox = network.register(identity.party())?;

        let responder = Arc::new(Responder::new(
            identity.party().clone(),
            ordering.identity().clone(),
            vault.clone(),
            config.accept_incoming_sessions,
            ProtocolTimeouts::from(&config),
        ));
        let name = identity.party().name.clone();
        let responder = tokio::spawn(async move {
            while let Some(incoming) = inbox.recv().await {
                let responder = Arc::clone(&responder);
                let name = name.clone();
                tokio::spawn(async move {
                    let initiator = incoming.initiator.name.clone();
                    if let Err(e) = responder.receive_finality(incoming).await {
                        warn!("{}: session from {} failed: {}", name, initiator, e);
                    }
                });
            }
            debug!("{}: inbox closed", name);
        });

        info!("Started node {}", identity.party());
        Ok(Self {
            identity,
            vault,
            ordering,
            network,
            config,
            observer: None,
            responder,
        })
    }

    /// Observer handed to every protocol run this node initiates.
    pub fn with_progress_observer(mut self, observer: ProgressObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn party(&self) -> &Party {
        self.identity.party()
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    fn protocol(&self) -> CommitProtocol {
        CommitProtocol::new(
            Arc::clone(&self.identity),
            Arc::clone(&self.ordering),
            Arc::clone(&self.network),
            self.vault.clone(),
            ProtocolTimeouts::from(&self.config),
        )
        .with_observer(self.observer.clone())
    }

    async fn commit(
        &self,
        transition: Transition,
        counterparties: &[Party],
    ) -> Result<CommitOutcome> {
        self.protocol().run(transition, counterparties).await
    }

    /// Issues a new record attested by this node and held by `owner`.
    pub async fn issue_metal(
        &self,
        asset_kind: &str,
        quantity: i64,
        owner: &Party,
    ) -> Result<CommitOutcome> {
        let transition = propose_issue(self.party(), asset_kind, quantity, owner)?;
        self.commit(transition, &[owner.clone()]).await
    }

    /// Hands one of this node's matching unspent records to `new_owner`.
    ///
    /// The new owner and the record's issuer are both told about the result.
    pub async fn transfer_metal(
        &self,
        asset_kind: &str,
        quantity: i64,
        new_owner: &Party,
    ) -> Result<CommitOutcome> {
        let transition =
            propose_transfer(self.vault.as_ref(), self.party(), asset_kind, quantity, new_owner)?;
        let issuer = transition.inputs[0].record.issuer.clone();
        self.commit(transition, &[new_owner.clone(), issuer]).await
    }

    /// Lists everything this node has recorded and logs it.
    pub fn search_vault(&self) -> VaultReport {
        let criteria = QueryCriteria::default();
        let report = VaultReport {
            unconsumed: self.vault.query(StateStatus::Unconsumed, &criteria),
            consumed: self.vault.query(StateStatus::Consumed, &criteria),
        };
        info!(
            "{}: {} unconsumed, {} consumed",
            self.party().name,
            report.unconsumed.len(),
            report.consumed.len()
        );
        for state in &report.unconsumed {
            info!("  unconsumed {} {}", state.reference, state.record);
        }
        for state in &report.consumed {
            info!("  consumed {} {}", state.reference, state.record);
        }
        report
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.responder.abort();
    }
}
