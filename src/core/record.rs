//! Ownership records: the immutable, versioned unit of ledger state.
//!
//! A record is never mutated. A transfer consumes one version and produces a new one
//! owned by someone else. The issuer is carried forward unchanged across every version
//! of a lineage: issuer identity is immutable once issued.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::identity::Party;

/// A quantity of a named metal, attested by `issuer` and held by `owner`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnershipRecord {
    pub asset_kind: String,
    /// Not required to be positive; see DESIGN.md.
    pub quantity: i64,
    pub issuer: Party,
    pub owner: Party,
}

impl OwnershipRecord {
    pub fn new(asset_kind: impl Into<String>, quantity: i64, issuer: Party, owner: Party) -> Self {
        Self {
            asset_kind: asset_kind.into(),
            quantity,
            issuer,
            owner,
        }
    }

    /// The next version of this record held by `new_owner`; issuer is carried forward.
    pub fn with_owner(&self, new_owner: Party) -> Self {
        Self {
            owner: new_owner,
            ..self.clone()
        }
    }

    /// Parties that store this record when it is finalized.
    pub fn participants(&self) -> [&Party; 2] {
        [&self.issuer, &self.owner]
    }
}

impl fmt::Display for OwnershipRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} x{} issuer={} owner={}",
            self.asset_kind, self.quantity, self.issuer.name, self.owner.name
        )
    }
}

/// Points at output `index` of the transition with id `transition_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordRef {
    pub transition_id: String,
    pub index: u32,
}

impl RecordRef {
    pub fn new(transition_id: impl Into<String>, index: u32) -> Self {
        Self {
            transition_id: transition_id.into(),
            index,
        }
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.transition_id, self.index)
    }
}

/// A record together with the reference under which it was finalized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateAndRef {
    pub record: OwnershipRecord,
    pub reference: RecordRef,
}
