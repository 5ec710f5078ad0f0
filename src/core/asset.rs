//! Asset kinds a record may hold. Records carry the kind as a plain string so that an unsupported kind can be represented and rejected by the validator rather than by the type system.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of metals the ledger recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetKind {
    Gold,
    Silver,
}

pub const SUPPORTED_ASSET_KINDS: [AssetKind; 2] = [AssetKind::Gold, AssetKind::Silver];

impl AssetKind {
    /// Returns the canonical name stored in records.
    pub fn as_canonical(&self) -> &'static str {
        match self {
            AssetKind::Gold => "Gold",
            AssetKind::Silver => "Silver",
        }
    }

    /// Exact, case-sensitive membership test against the supported set.
    pub fn is_supported(name: &str) -> bool {
        name.parse::<AssetKind>().is_ok()
    }
}

impl FromStr for AssetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SUPPORTED_ASSET_KINDS
            .iter()
            .copied()
            .find(|kind| kind.as_canonical() == s)
            .ok_or_else(|| format!("unsupported asset kind: {}", s))
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_canonical())
    }
}
