//! Participant identities. A `Party` is the public face of a participant (name plus owning key);
//! a `LocalIdentity` additionally holds the secret key and is only ever constructed by the node that owns it.

use std::fmt;

use rand::Rng;
use secp256k1::{PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};

use crate::core::transition::{Transition, TransitionSignature};
use crate::error::{LedgerError, Result};
use crate::signature::{sign_message, SignatureComponents};

/// Hex of a compressed secp256k1 public key (66 hex chars).
pub type OwningKey = String;

/// A named participant and the key it signs with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Party {
    pub name: String,
    pub owning_key: OwningKey,
}

impl Party {
    pub fn new(name: impl Into<String>, owning_key: impl Into<OwningKey>) -> Self {
        Self {
            name: name.into(),
            owning_key: owning_key.into(),
        }
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.owning_key.get(..12).unwrap_or(&self.owning_key);
        write!(f, "{} ({}..)", self.name, short)
    }
}

/// A party together with its secret key.
#[derive(Clone)]
pub struct LocalIdentity {
    party: Party,
    secret_key: SecretKey,
}

impl LocalIdentity {
    /// Generates a fresh random identity
    pub fn generate(name: impl Into<String>) -> Result<Self> {
        let mut entropy = [0u8; 32];
        rand::thread_rng().fill(&mut entropy);
        let secret_key = SecretKey::from_slice(&entropy)?;
        Ok(Self::from_secret_key(name, secret_key))
    }

    /// Restores an identity from a 64-char hex secret key
    pub fn from_secret_hex(name: impl Into<String>, secret_hex: &str) -> Result<Self> {
        if secret_hex.len() != 64 {
            return Err(LedgerError::Crypto(
                "secret key must be 32 bytes of hex".to_string(),
            ));
        }
        let bytes = hex::decode(secret_hex)
            .map_err(|e| LedgerError::Crypto(format!("Invalid secret key hex: {}", e)))?;
        let secret_key = SecretKey::from_slice(&bytes)?;
        Ok(Self::from_secret_key(name, secret_key))
    }

    fn from_secret_key(name: impl Into<String>, secret_key: SecretKey) -> Self {
        let secp = Secp256k1::new();
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        Self {
            party: Party::new(name, hex::encode(public_key.serialize())),
            secret_key,
        }
    }

    pub fn party(&self) -> &Party {
        &self.party
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret_key.secret_bytes())
    }

    pub fn sign_message(&self, message: &impl Serialize) -> Result<SignatureComponents> {
        sign_message(&self.secret_key, message)
    }

    /// Signs the canonical encoding of a transition.
    pub fn sign_transition(&self, transition: &Transition) -> Result<TransitionSignature> {
        let components = self.sign_message(&transition.signable())?;
        Ok(TransitionSignature {
            by: components.pub_key,
            signature: components.signature_compact,
        })
    }
}

impl fmt::Debug for LocalIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalIdentity")
            .field("party", &self.party)
            .finish_non_exhaustive()
    }
}
