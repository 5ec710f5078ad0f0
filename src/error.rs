use thiserror::Error;

use crate::core::selector::SelectionError;
use crate::core::validator::ValidationError;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Validation error: {0}")]
    Validation(ValidationError),

    #[error("Selection error: {0}")]
    Selection(SelectionError),

    #[error("Protocol aborted: {0}")]
    ProtocolAbort(String),

    #[error("Vault error: {0}")]
    Vault(String),

    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("Signature error: {0}")]
    Signature(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

impl From<secp256k1::Error> for LedgerError {
    fn from(err: secp256k1::Error) -> Self {
        LedgerError::Crypto(err.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Encoding(err.to_string())
    }
}
