//! Ordering service: the single authority that finalizes transitions and prevents double consumption.
//!
//! # Verdicts
//! A submission is finalized only if it passes the transition validator, carries a valid
//! signature from every required signer, and every input is a record this service finalized
//! earlier (same content) that no other finalized transition has consumed. The first
//! submission to consume a record wins; later ones are rejected with the winner's id.
//!
//! # Ordering
//! Finalized transitions receive consecutive positions starting at 0. The position and the
//! transition id are signed together as the finality certificate.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::core::record::{OwnershipRecord, RecordRef};
use crate::core::transition::{FinalityCertificate, NotarisedTransition, SignedTransition};
use crate::core::validator::verify_transition;
use crate::error::Result;
use crate::identity::{LocalIdentity, Party};

/// Outcome of a submission. Rejections carry the reason verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderingOutcome {
    Finalized(NotarisedTransition),
    Rejected(String),
}

#[async_trait]
pub trait OrderingService: Send + Sync {
    /// Identity whose signature appears on finality certificates.
    fn identity(&self) -> &Party;

    async fn submit(&self, signed: SignedTransition) -> OrderingOutcome;
}

#[derive(Debug, Default)]
struct NotaryLedger {
    /// Every record this service has finalized.
    produced: HashMap<RecordRef, OwnershipRecord>,
    /// Consumed record -> id of the transition that consumed it.
    spent: HashMap<RecordRef, String>,
    next_position: u64,
}

/// In-process ordering service with first-writer-wins conflict resolution.
#[derive(Debug)]
pub struct InMemoryNotary {
    identity: LocalIdentity,
    ledger: Mutex<NotaryLedger>,
}

impl InMemoryNotary {
    pub fn new(identity: LocalIdentity) -> Self {
        Self {
            identity,
            ledger: Mutex::new(NotaryLedger::default()),
        }
    }

    /// Number of transitions finalized so far.
    pub async fn finalized_count(&self) -> u64 {
        self.ledger.lock().await.next_position
    }

    /// Id of the transition that consumed `reference`, if any.
    pub async fn consumed_by(&self, reference: &RecordRef) -> Option<String> {
        self.ledger.lock().await.spent.get(reference).cloned()
    }

    fn check(&self, signed: &SignedTransition, ledger: &NotaryLedger) -> std::result::Result<(), String> {
        verify_transition(&signed.transition).map_err(|e| e.to_string())?;
        signed.verify_signatures().map_err(|e| e.to_string())?;
        for input in &signed.transition.inputs {
            match ledger.produced.get(&input.reference) {
                None => return Err(format!("Unknown input {}", input.reference)),
                Some(record) if *record != input.record => {
                    return Err(format!("Input {} does not match the finalized record", input.reference))
                }
                Some(_) => {}
            }
            if let Some(winner) = ledger.spent.get(&input.reference) {
                return Err(format!(
                    "Double spend: input {} already consumed by {}",
                    input.reference, winner
                ));
            }
        }
        Ok(())
    }

    fn certify(&self, signed: SignedTransition, order_position: u64) -> Result<NotarisedTransition> {
        let certificate = FinalityCertificate {
            transition_id: signed.id.clone(),
            order_position,
        };
        let sig = self.identity.sign_message(&certificate)?;
        Ok(NotarisedTransition {
            signed,
            order_position,
            notary: sig.pub_key,
            notary_signature: sig.signature_compact,
        })
    }
}

#[async_trait]
impl OrderingService for InMemoryNotary {
    fn identity(&self) -> &Party {
        self.identity.party()
    }

    async fn submit(&self, signed: SignedTransition) -> OrderingOutcome {
        let mut ledger = self.ledger.lock().await;

        if let Err(reason) = self.check(&signed, &ledger) {
            warn!("Notary rejected {}: {}", signed.id, reason);
            return OrderingOutcome::Rejected(reason);
        }

        let position = ledger.next_position;
        let produced = signed.produced_states();
        let consumed = signed.transition.consumed_refs();
        let id = signed.id.clone();

        let notarised = match self.certify(signed, position) {
            Ok(n) => n,
            Err(e) => return OrderingOutcome::Rejected(format!("Notary signing failed: {}", e)),
        };

        for reference in consumed {
            ledger.spent.insert(reference, id.clone());
        }
        for state in produced {
            ledger.produced.insert(state.reference, state.record);
        }
        ledger.next_position += 1;

        info!("Notary finalized {} at position {}", id, position);
        OrderingOutcome::Finalized(notarised)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::proposer::propose_issue;
    use crate::core::transition::{Command, Intent, Transition};

    struct Fixture {
        notary: InMemoryNotary,
        mint: LocalIdentity,
        a: LocalIdentity,
        b: LocalIdentity,
    }

    fn fixture() -> Fixture {
        Fixture {
            notary: InMemoryNotary::new(LocalIdentity::generate("Notary").unwrap()),
            mint: LocalIdentity::generate("Mint").unwrap(),
            a: LocalIdentity::generate("A").unwrap(),
            b: LocalIdentity::generate("B").unwrap(),
        }
    }

    fn sign(transition: Transition, by: &LocalIdentity) -> SignedTransition {
        let mut signed = SignedTransition::new(transition.clone()).unwrap();
        signed.add_signature(by.sign_transition(&transition).unwrap());
        signed
    }

    async fn finalize_issue(f: &Fixture) -> NotarisedTransition {
        let t = propose_issue(f.mint.party(), "Gold", 10, f.a.party()).unwrap();
        match f.notary.submit(sign(t, &f.mint)).await {
            OrderingOutcome::Finalized(n) => n,
            OrderingOutcome::Rejected(r) => panic!("issue rejected: {}", r),
        }
    }

    fn transfer_of(issued: &NotarisedTransition, f: &Fixture, to: &Party) -> Transition {
        let input = issued.produced_states().remove(0);
        let output = input.record.with_owner(to.clone());
        Transition::new(
            vec![input],
            vec![output],
            Command::new(Intent::Transfer, [f.a.party().owning_key.clone()]),
        )
    }

    #[tokio::test]
    async fn test_issue_finalized_with_valid_certificate() {
        let f = fixture();
        let notarised = finalize_issue(&f).await;
        assert_eq!(notarised.order_position, 0);
        assert!(notarised.verify_notary(f.notary.identity()).is_ok());
        assert!(notarised.verify_notary(f.mint.party()).is_err());
        assert_eq!(f.notary.finalized_count().await, 1);
    }

    #[tokio::test]
    async fn test_first_writer_wins() {
        let f = fixture();
        let issued = finalize_issue(&f).await;

        let to_b = sign(transfer_of(&issued, &f, f.b.party()), &f.a);
        let to_mint = sign(transfer_of(&issued, &f, f.mint.party()), &f.a);

        let first = f.notary.submit(to_b.clone()).await;
        assert!(matches!(first, OrderingOutcome::Finalized(ref n) if n.order_position == 1));

        match f.notary.submit(to_mint).await {
            OrderingOutcome::Rejected(reason) => {
                assert!(reason.contains("Double spend"));
                assert!(reason.contains(&to_b.id));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
        let input_ref = issued.produced_states()[0].reference.clone();
        assert_eq!(f.notary.consumed_by(&input_ref).await, Some(to_b.id));
        assert_eq!(f.notary.finalized_count().await, 2);
    }

    #[tokio::test]
    async fn test_resubmission_rejected() {
        let f = fixture();
        let issued = finalize_issue(&f).await;
        let transfer = sign(transfer_of(&issued, &f, f.b.party()), &f.a);
        assert!(matches!(f.notary.submit(transfer.clone()).await, OrderingOutcome::Finalized(_)));
        assert!(matches!(f.notary.submit(transfer).await, OrderingOutcome::Rejected(_)));
    }

    #[tokio::test]
    async fn test_rejects_invalid_transition() {
        let f = fixture();
        let issued = finalize_issue(&f).await;
        // Mint signs a transfer of A's record; the validator names the owner as required signer
        let input = issued.produced_states().remove(0);
        let output = input.record.with_owner(f.b.party().clone());
        let t = Transition::new(
            vec![input],
            vec![output],
            Command::new(Intent::Transfer, [f.mint.party().owning_key.clone()]),
        );
        match f.notary.submit(sign(t, &f.mint)).await {
            OrderingOutcome::Rejected(reason) => assert!(reason.contains("Signer error")),
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rejects_missing_signature() {
        let f = fixture();
        let t = propose_issue(f.mint.party(), "Gold", 10, f.a.party()).unwrap();
        let unsigned = SignedTransition::new(t).unwrap();
        assert!(matches!(f.notary.submit(unsigned).await, OrderingOutcome::Rejected(_)));
        assert_eq!(f.notary.finalized_count().await, 0);
    }

    #[tokio::test]
    async fn test_rejects_unknown_or_forged_input() {
        let f = fixture();
        let issued = finalize_issue(&f).await;

        let mut forged = transfer_of(&issued, &f, f.b.party());
        forged.inputs[0].record.quantity = 1_000;
        assert!(matches!(
            f.notary.submit(sign(forged, &f.a)).await,
            OrderingOutcome::Rejected(ref r) if r.contains("does not match")
        ));

        let mut unknown = transfer_of(&issued, &f, f.b.party());
        unknown.inputs[0].reference = RecordRef::new("nowhere", 0);
        assert!(matches!(
            f.notary.submit(sign(unknown, &f.a)).await,
            OrderingOutcome::Rejected(ref r) if r.contains("Unknown input")
        ));
    }
}
