//! Input selection for transfers: picks the unspent record a transfer will consume.

use thiserror::Error;

use crate::core::record::StateAndRef;
use crate::core::vault::{QueryCriteria, RecordStore, StateStatus};
use crate::error::LedgerError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error("no matching unspent record for {asset_kind} x{quantity}")]
    NotFound { asset_kind: String, quantity: i64 },
}

impl From<SelectionError> for LedgerError {
    fn from(err: SelectionError) -> Self {
        LedgerError::Selection(err)
    }
}

/// Returns the first unconsumed record, in store order, whose kind and quantity equal the
/// request. Pure with respect to the store: an unchanged store always yields the same pick.
pub fn select_input(
    store: &dyn RecordStore,
    asset_kind: &str,
    quantity: i64,
) -> std::result::Result<StateAndRef, SelectionError> {
    store
        .query(StateStatus::Unconsumed, &QueryCriteria::default())
        .into_iter()
        .find(|s| s.record.asset_kind == asset_kind && s.record.quantity == quantity)
        .ok_or_else(|| SelectionError::NotFound {
            asset_kind: asset_kind.to_string(),
            quantity,
        })
}
