//! Local record store: each participant's view of the records it holds.
//!
//! # Ordering
//! Entries are kept in insertion order and every query returns them in that order. This is
//! the order the input selector scans, so ties between equally matching records are broken
//! by which record this vault learned about first.
//!
//! # Invariants
//! - Append-only: records are never edited or removed. Consumption only sets a flag.
//! - A record consumed once stays consumed; consuming it again is an error.
//! - `persist` checks everything before mutating anything, so it applies fully or not at all.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;
use tracing::debug;

use crate::core::record::{RecordRef, StateAndRef};
use crate::error::{LedgerError, Result};
use crate::identity::OwningKey;

/// Consumption status filter for queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateStatus {
    Unconsumed,
    Consumed,
    All,
}

/// Optional attribute filters; `None` matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryCriteria {
    pub asset_kind: Option<String>,
    pub owner: Option<OwningKey>,
}

impl QueryCriteria {
    pub fn asset_kind(mut self, asset_kind: impl Into<String>) -> Self {
        self.asset_kind = Some(asset_kind.into());
        self
    }

    pub fn owner(mut self, owner: impl Into<OwningKey>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    fn matches(&self, state: &StateAndRef) -> bool {
        self.asset_kind
            .as_ref()
            .map_or(true, |k| *k == state.record.asset_kind)
            && self
                .owner
                .as_ref()
                .map_or(true, |o| *o == state.record.owner.owning_key)
    }
}

/// Errors produced by vault operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VaultError {
    #[error("Record {0} is already consumed")]
    AlreadyConsumed(RecordRef),

    #[error("Record {0} is listed twice")]
    DuplicateRef(RecordRef),
}

impl From<VaultError> for LedgerError {
    fn from(err: VaultError) -> Self {
        LedgerError::Vault(err.to_string())
    }
}

/// Storage contract used by the input selector and by finalization.
pub trait RecordStore: Send + Sync {
    /// Records with the given status that match `criteria`, in store order.
    fn query(&self, status: StateStatus, criteria: &QueryCriteria) -> Vec<StateAndRef>;

    /// Appends `produced` and flags `consumed` as spent. Consumed refs this store never held are ignored.
    fn persist(&self, produced: &[StateAndRef], consumed: &[RecordRef]) -> Result<()>;
}

#[derive(Debug, Clone)]
struct VaultEntry {
    state: StateAndRef,
    consumed: bool,
}

#[derive(Debug, Default, Clone)]
struct VaultData {
    entries: Vec<VaultEntry>,
    /// Position of each ref in `entries`.
    index: HashMap<RecordRef, usize>,
}

/// In-memory, append-only record store.
#[derive(Debug, Default)]
pub struct Vault {
    data: RwLock<Arc<VaultData>>,
}

impl Vault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `reference` is held and flagged consumed.
    pub fn is_consumed(&self, reference: &RecordRef) -> bool {
        let data = self.read();
        data.index
            .get(reference)
            .map_or(false, |&i| data.entries[i].consumed)
    }

    /// Snapshot of the current contents; later writes do not affect it.
    fn read(&self) -> Arc<VaultData> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl RecordStore for Vault {
    fn query(&self, status: StateStatus, criteria: &QueryCriteria) -> Vec<StateAndRef> {
        self.read()
            .entries
            .iter()
            .filter(|e| match status {
                StateStatus::Unconsumed => !e.consumed,
                StateStatus::Consumed => e.consumed,
                StateStatus::All => true,
            })
            .filter(|e| criteria.matches(&e.state))
            .map(|e| e.state.clone())
            .collect()
    }

    fn persist(&self, produced: &[StateAndRef], consumed: &[RecordRef]) -> Result<()> {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);

        let mut seen = std::collections::HashSet::new();
        for reference in consumed {
            if !seen.insert(reference) {
                return Err(VaultError::DuplicateRef(reference.clone()).into());
            }
            if let Some(&i) = guard.index.get(reference) {
                if guard.entries[i].consumed {
                    return Err(VaultError::AlreadyConsumed(reference.clone()).into());
                }
            }
        }

        let data = Arc::make_mut(&mut guard);
        for reference in consumed {
            if let Some(&i) = data.index.get(reference) {
                data.entries[i].consumed = true;
                debug!("Vault: marked {} consumed", reference);
            }
        }
        for state in produced {
            // Re-delivery of an already finalized record is a no-op.
            if data.index.contains_key(&state.reference) {
                continue;
            }
            data.index.insert(state.reference.clone(), data.entries.len());
            data.entries.push(VaultEntry {
                state: state.clone(),
                consumed: false,
            });
            debug!("Vault: stored {} as {}", state.record, state.reference);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::OwnershipRecord;
    use crate::identity::Party;

    fn state(tx: &str, kind: &str, qty: i64, owner: &str) -> StateAndRef {
        StateAndRef {
            record: OwnershipRecord::new(
                kind,
                qty,
                Party::new("Mint", "k-mint"),
                Party::new(owner, format!("k-{}", owner)),
            ),
            reference: RecordRef::new(tx, 0),
        }
    }

    #[test]
    fn test_new_vault_is_empty() {
        let vault = Vault::new();
        assert!(vault.is_empty());
        assert!(vault.query(StateStatus::All, &QueryCriteria::default()).is_empty());
    }

    #[test]
    fn test_persist_and_query_in_insertion_order() {
        let vault = Vault::new();
        vault.persist(&[state("t2", "Gold", 10, "A")], &[]).unwrap();
        vault.persist(&[state("t1", "Silver", 5, "A")], &[]).unwrap();

        let all = vault.query(StateStatus::Unconsumed, &QueryCriteria::default());
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].reference.transition_id, "t2");
        assert_eq!(all[1].reference.transition_id, "t1");
    }

    #[test]
    fn test_consume_moves_record_between_statuses() {
        let vault = Vault::new();
        let issued = state("t1", "Gold", 10, "A");
        vault.persist(&[issued.clone()], &[]).unwrap();

        let moved = state("t2", "Gold", 10, "B");
        vault.persist(&[moved.clone()], &[issued.reference.clone()]).unwrap();

        assert!(vault.is_consumed(&issued.reference));
        assert_eq!(
            vault.query(StateStatus::Consumed, &QueryCriteria::default()),
            vec![issued]
        );
        assert_eq!(
            vault.query(StateStatus::Unconsumed, &QueryCriteria::default()),
            vec![moved]
        );
        assert_eq!(vault.len(), 2);
    }

    #[test]
    fn test_double_consume_rejected_without_side_effects() {
        let vault = Vault::new();
        let issued = state("t1", "Gold", 10, "A");
        vault.persist(&[issued.clone()], &[]).unwrap();
        vault.persist(&[state("t2", "Gold", 10, "B")], &[issued.reference.clone()]).unwrap();

        let result = vault.persist(&[state("t3", "Gold", 10, "C")], &[issued.reference.clone()]);
        assert!(matches!(result, Err(LedgerError::Vault(_))));
        assert_eq!(vault.len(), 2);
    }

    #[test]
    fn test_unknown_consumed_ref_ignored() {
        let vault = Vault::new();
        vault
            .persist(&[state("t2", "Gold", 10, "B")], &[RecordRef::new("never-seen", 0)])
            .unwrap();
        assert_eq!(vault.len(), 1);
    }

    #[test]
    fn test_persist_is_idempotent_for_produced() {
        let vault = Vault::new();
        let issued = state("t1", "Gold", 10, "A");
        vault.persist(&[issued.clone()], &[]).unwrap();
        vault.persist(&[issued], &[]).unwrap();
        assert_eq!(vault.len(), 1);
    }

    #[test]
    fn test_criteria_filters() {
        let vault = Vault::new();
        vault
            .persist(
                &[
                    state("t1", "Gold", 10, "A"),
                    StateAndRef {
                        reference: RecordRef::new("t1", 1),
                        ..state("t1", "Silver", 10, "B")
                    },
                ],
                &[],
            )
            .unwrap();

        let gold = vault.query(StateStatus::All, &QueryCriteria::default().asset_kind("Gold"));
        assert_eq!(gold.len(), 1);
        let owned_by_b = vault.query(StateStatus::All, &QueryCriteria::default().owner("k-B"));
        assert_eq!(owned_by_b.len(), 1);
        assert_eq!(owned_by_b[0].record.asset_kind, "Silver");
    }
}
