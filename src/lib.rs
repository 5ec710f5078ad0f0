pub mod signature;
pub mod identity;
pub mod error;
pub mod config;
pub mod logging;
pub mod core;

pub use signature::{verify_signature, hash_message, sign_message, SignatureComponents};
pub use identity::{LocalIdentity, OwningKey, Party};
pub use error::{LedgerError, Result};
pub use config::NodeConfig;
pub use logging::log_init;

// Core API exports
pub use crate::core::{Node, VaultReport};
pub use crate::core::asset::{AssetKind, SUPPORTED_ASSET_KINDS};
pub use crate::core::record::{OwnershipRecord, RecordRef, StateAndRef};
pub use crate::core::transition::{
    CanonicalCommand,
    CanonicalTransition,
    Command,
    FinalityCertificate,
    Intent,
    NotarisedTransition,
    SignedTransition,
    Transition,
    TransitionSignature,
};
pub use crate::core::validator::{validate, verify_transition, ValidationError, ValidationResult};
pub use crate::core::vault::{QueryCriteria, RecordStore, StateStatus, Vault, VaultError};
pub use crate::core::selector::{select_input, SelectionError};
pub use crate::core::proposer::{propose_issue, propose_transfer};
pub use crate::core::session::{FlowMessage, IncomingSession, Inbox, MockNetwork, PeerChannel, Session};
pub use crate::core::ordering::{InMemoryNotary, OrderingOutcome, OrderingService};
pub use crate::core::protocol::{
    CommitOutcome,
    CommitProtocol,
    ProgressObserver,
    ProtocolState,
    ProtocolTimeouts,
    Responder,
};
