//! Canonical transition format for the metal ledger.
//!
//! **Shape:** A transition consumes zero or more finalized records, produces new records, and declares its intent through commands. Each command names the keys that must co-sign.
//!
//! **Determinism:** The canonical encoding has a fixed field order and signer sets are sorted (`BTreeSet`); no randomness or system time. Same transition data yields the same bytes, the same id, and signatures that verify on every participant.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::core::record::{OwnershipRecord, RecordRef, StateAndRef};
use crate::core::validator::ValidationError;
use crate::error::{LedgerError, Result};
use crate::identity::{OwningKey, Party};
use crate::signature::{hash_message, verify_signature};

/// Declared purpose of a transition. Selects the rule set the validator applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    Issue,
    Transfer,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Issue => "Issue",
            Intent::Transfer => "Transfer",
        }
    }
}

impl FromStr for Intent {
    type Err = ValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Issue" => Ok(Intent::Issue),
            "Transfer" => Ok(Intent::Transfer),
            other => Err(ValidationError::UnrecognizedIntent(other.to_string())),
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An intent plus the keys required to sign for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub intent: Intent,
    pub signers: BTreeSet<OwningKey>,
}

impl Command {
    pub fn new(intent: Intent, signers: impl IntoIterator<Item = OwningKey>) -> Self {
        Self {
            intent,
            signers: signers.into_iter().collect(),
        }
    }
}

/// Proposed ledger update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub inputs: Vec<StateAndRef>,
    pub outputs: Vec<OwnershipRecord>,
    pub commands: Vec<Command>,
}

/// Wire form of a command. The intent travels as a tag so that unknown intents can be reported instead of failing deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalCommand {
    pub intent: String,
    pub signers: BTreeSet<OwningKey>,
}

/// Wire form of a transition; field order is the signing order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalTransition {
    pub inputs: Vec<StateAndRef>,
    pub outputs: Vec<OwnershipRecord>,
    pub commands: Vec<CanonicalCommand>,
}

impl TryFrom<CanonicalTransition> for Transition {
    type Error = ValidationError;

    fn try_from(canonical: CanonicalTransition) -> std::result::Result<Self, Self::Error> {
        let commands = canonical
            .commands
            .into_iter()
            .map(|c| -> std::result::Result<Command, ValidationError> {
                Ok(Command { intent: c.intent.parse()?, signers: c.signers })
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Transition {
            inputs: canonical.inputs,
            outputs: canonical.outputs,
            commands,
        })
    }
}

impl Transition {
    pub fn new(inputs: Vec<StateAndRef>, outputs: Vec<OwnershipRecord>, command: Command) -> Self {
        Self {
            inputs,
            outputs,
            commands: vec![command],
        }
    }

    /// The canonical structure that is hashed and signed.
    pub fn signable(&self) -> CanonicalTransition {
        CanonicalTransition {
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
            commands: self
                .commands
                .iter()
                .map(|c| CanonicalCommand {
                    intent: c.intent.as_str().to_string(),
                    signers: c.signers.clone(),
                })
                .collect(),
        }
    }

    /// Computes the transition id. Same transition data -> same id.
    pub fn id(&self) -> Result<String> {
        let hash = hash_message(&self.signable())?;
        Ok(hex::encode(hash))
    }

    /// Deterministic byte encoding.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.signable())?)
    }

    /// Decodes a canonical encoding. An unknown intent tag is a validation failure, not an encoding failure.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let canonical: CanonicalTransition = serde_json::from_slice(bytes)?;
        Ok(Transition::try_from(canonical)?)
    }

    pub fn consumed_records(&self) -> Vec<OwnershipRecord> {
        self.inputs.iter().map(|s| s.record.clone()).collect()
    }

    pub fn consumed_refs(&self) -> Vec<RecordRef> {
        self.inputs.iter().map(|s| s.reference.clone()).collect()
    }

    /// Union of the signer sets of every command.
    pub fn required_signers(&self) -> BTreeSet<OwningKey> {
        self.commands
            .iter()
            .flat_map(|c| c.signers.iter().cloned())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionSignature {
    pub by: OwningKey,
    pub signature: String,
}

/// A transition plus the signatures collected for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransition {
    pub transition: Transition,
    pub id: String,
    pub signatures: Vec<TransitionSignature>,
}

impl SignedTransition {
    pub fn new(transition: Transition) -> Result<Self> {
        let id = transition.id()?;
        Ok(Self {
            transition,
            id,
            signatures: Vec::new(),
        })
    }

    pub fn add_signature(&mut self, signature: TransitionSignature) {
        self.signatures.push(signature);
    }

    pub fn signed_by(&self) -> BTreeSet<&str> {
        self.signatures.iter().map(|s| s.by.as_str()).collect()
    }

    /// Checks the id, every attached signature, and that each required signer has signed.
    pub fn verify_signatures(&self) -> Result<()> {
        let id = self.transition.id()?;
        if id != self.id {
            return Err(LedgerError::Signature(format!(
                "Transition id mismatch: expected {}, got {}",
                self.id, id
            )));
        }
        let signable = self.transition.signable();
        for sig in &self.signatures {
            if !verify_signature(&signable, &sig.signature, &sig.by)? {
                return Err(LedgerError::Signature(format!(
                    "Invalid signature from {}",
                    sig.by
                )));
            }
        }
        let signed_by = self.signed_by();
        for key in self.transition.required_signers() {
            if !signed_by.contains(key.as_str()) {
                return Err(LedgerError::Signature(format!(
                    "Missing signature from required signer {}",
                    key
                )));
            }
        }
        Ok(())
    }

    /// Output records keyed by `(id, index)`.
    pub fn produced_states(&self) -> Vec<StateAndRef> {
        self.transition
            .outputs
            .iter()
            .enumerate()
            .map(|(i, record)| StateAndRef {
                record: record.clone(),
                reference: RecordRef::new(self.id.clone(), i as u32),
            })
            .collect()
    }
}

/// What the ordering service signs when it finalizes a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinalityCertificate {
    pub transition_id: String,
    pub order_position: u64,
}

/// A signed transition accepted and ordered by the ordering service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotarisedTransition {
    pub signed: SignedTransition,
    pub order_position: u64,
    pub notary: OwningKey,
    pub notary_signature: String,
}

impl NotarisedTransition {
    pub fn id(&self) -> &str {
        &self.signed.id
    }

    pub fn certificate(&self) -> FinalityCertificate {
        FinalityCertificate {
            transition_id: self.signed.id.clone(),
            order_position: self.order_position,
        }
    }

    pub fn verify_notary(&self, notary: &Party) -> Result<()> {
        if self.notary != notary.owning_key {
            return Err(LedgerError::Signature(format!(
                "Finalized by unexpected notary {}",
                self.notary
            )));
        }
        if !verify_signature(&self.certificate(), &self.notary_signature, &self.notary)? {
            return Err(LedgerError::Signature(
                "Invalid notary signature".to_string(),
            ));
        }
        Ok(())
    }

    pub fn produced_states(&self) -> Vec<StateAndRef> {
        self.signed.produced_states()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::LocalIdentity;

    fn issue(mint: &Party, owner: &Party) -> Transition {
        Transition::new(
            vec![],
            vec![OwnershipRecord::new("Gold", 10, mint.clone(), owner.clone())],
            Command::new(Intent::Issue, [mint.owning_key.clone()]),
        )
    }

    #[test]
    fn test_id_determinism() {
        let mint = Party::new("Mint", "k-mint");
        let a = Party::new("A", "k-a");
        let t1 = issue(&mint, &a);
        let t2 = issue(&mint, &a);
        assert_eq!(t1.id().unwrap(), t2.id().unwrap());
        assert_eq!(t1.encode().unwrap(), t2.encode().unwrap());
    }

    #[test]
    fn test_signer_order_does_not_change_id() {
        let records = vec![OwnershipRecord::new(
            "Gold",
            1,
            Party::new("Mint", "k1"),
            Party::new("A", "k2"),
        )];
        let t1 = Transition::new(
            vec![],
            records.clone(),
            Command::new(Intent::Issue, ["k1".to_string(), "k2".to_string()]),
        );
        let t2 = Transition::new(
            vec![],
            records,
            Command::new(Intent::Issue, ["k2".to_string(), "k1".to_string()]),
        );
        assert_eq!(t1.id().unwrap(), t2.id().unwrap());
    }

    #[test]
    fn test_id_changes_with_content() {
        let mint = Party::new("Mint", "k-mint");
        let a = Party::new("A", "k-a");
        let mut t2 = issue(&mint, &a);
        t2.outputs[0].quantity = 11;
        assert_ne!(issue(&mint, &a).id().unwrap(), t2.id().unwrap());
    }

    #[test]
    fn test_decode_encoded() {
        let t = issue(&Party::new("Mint", "k-mint"), &Party::new("A", "k-a"));
        let decoded = Transition::decode(&t.encode().unwrap()).unwrap();
        assert_eq!(decoded, t);
    }

    #[test]
    fn test_decode_unknown_intent() {
        let mut canonical = issue(&Party::new("Mint", "k-mint"), &Party::new("A", "k-a")).signable();
        canonical.commands[0].intent = "Redeem".to_string();
        let bytes = serde_json::to_vec(&canonical).unwrap();
        match Transition::decode(&bytes) {
            Err(LedgerError::Validation(ValidationError::UnrecognizedIntent(tag))) => {
                assert_eq!(tag, "Redeem")
            }
            other => panic!("Expected UnrecognizedIntent, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(
            Transition::decode(b"{not json"),
            Err(LedgerError::Encoding(_))
        ));
    }

    #[test]
    fn test_signed_transition_verification() {
        let mint = LocalIdentity::generate("Mint").unwrap();
        let a = LocalIdentity::generate("A").unwrap();
        let t = issue(mint.party(), a.party());

        let mut signed = SignedTransition::new(t.clone()).unwrap();
        assert!(signed.verify_signatures().is_err());

        signed.add_signature(mint.sign_transition(&t).unwrap());
        assert!(signed.verify_signatures().is_ok());
        assert_eq!(signed.produced_states()[0].reference, RecordRef::new(signed.id.clone(), 0));
    }

    #[test]
    fn test_tampered_transition_fails_verification() {
        let mint = LocalIdentity::generate("Mint").unwrap();
        let a = LocalIdentity::generate("A").unwrap();
        let t = issue(mint.party(), a.party());
        let mut signed = SignedTransition::new(t.clone()).unwrap();
        signed.add_signature(mint.sign_transition(&t).unwrap());

        signed.transition.outputs[0].quantity = 1_000;
        assert!(matches!(
            signed.verify_signatures(),
            Err(LedgerError::Signature(_))
        ));
    }

    #[test]
    fn test_signature_from_wrong_key_fails() {
        let mint = LocalIdentity::generate("Mint").unwrap();
        let a = LocalIdentity::generate("A").unwrap();
        let t = issue(mint.party(), a.party());
        let mut signed = SignedTransition::new(t.clone()).unwrap();
        let mut forged = a.sign_transition(&t).unwrap();
        forged.by = mint.party().owning_key.clone();
        signed.add_signature(forged);
        assert!(signed.verify_signatures().is_err());
    }
}
