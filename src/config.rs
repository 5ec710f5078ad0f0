//! Per-node settings, loaded from JSON. Every field is optional in the file.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Upper bound on the wait for the ordering service's verdict.
    #[serde(default = "default_finality_timeout_ms")]
    pub finality_timeout_ms: u64,
    /// Upper bound on the wait for any single counterparty reply.
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
    /// When false, every incoming session is declined.
    #[serde(default = "default_accept_incoming_sessions")]
    pub accept_incoming_sessions: bool,
}

fn default_finality_timeout_ms() -> u64 {
    30_000
}

fn default_session_timeout_ms() -> u64 {
    10_000
}

fn default_accept_incoming_sessions() -> bool {
    true
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            finality_timeout_ms: default_finality_timeout_ms(),
            session_timeout_ms: default_session_timeout_ms(),
            accept_incoming_sessions: default_accept_incoming_sessions(),
        }
    }
}

impl NodeConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| LedgerError::Config(format!("invalid node config: {}", e)))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| LedgerError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    pub fn finality_timeout(&self) -> Duration {
        Duration::from_millis(self.finality_timeout_ms)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }
}
