//! Builds candidate transitions for the local party and validates them before anything is signed or sent.

use tracing::debug;

use crate::core::record::OwnershipRecord;
use crate::core::selector::select_input;
use crate::core::transition::{Command, Intent, Transition};
use crate::core::validator::verify_transition;
use crate::core::vault::RecordStore;
use crate::error::Result;
use crate::identity::Party;

/// New record attested by `issuer` and held by `owner`; the issuer is the required signer.
pub fn propose_issue(issuer: &Party, asset_kind: &str, quantity: i64, owner: &Party) -> Result<Transition> {
    let transition = Transition::new(
        vec![],
        vec![OwnershipRecord::new(asset_kind, quantity, issuer.clone(), owner.clone())],
        Command::new(Intent::Issue, [issuer.owning_key.clone()]),
    );
    verify_transition(&transition)?;
    debug!("Proposed issue of {} x{} to {}", asset_kind, quantity, owner.name);
    Ok(transition)
}

/// Consumes the first matching unspent record in `store` and hands it to `new_owner`.
///
/// The produced record's issuer is read from the consumed record, never supplied by the caller.
/// `proposer` is the required signer; the validator rejects the proposal unless it owns the input.
pub fn propose_transfer(
    store: &dyn RecordStore,
    proposer: &Party,
    asset_kind: &str,
    quantity: i64,
    new_owner: &Party,
) -> Result<Transition> {
    let input = select_input(store, asset_kind, quantity)?;
    let output = OwnershipRecord {
        asset_kind: asset_kind.to_string(),
        quantity,
        issuer: input.record.issuer.clone(),
        owner: new_owner.clone(),
    };
    debug!("Selected {} as input for transfer to {}", input.reference, new_owner.name);
    let transition = Transition::new(
        vec![input],
        vec![output],
        Command::new(Intent::Transfer, [proposer.owning_key.clone()]),
    );
    verify_transition(&transition)?;
    Ok(transition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::{RecordRef, StateAndRef};
    use crate::core::validator::ValidationError;
    use crate::core::vault::Vault;
    use crate::error::LedgerError;

    fn mint() -> Party {
        Party::new("Mint", "k-mint")
    }
    fn trader_a() -> Party {
        Party::new("A", "k-a")
    }
    fn trader_b() -> Party {
        Party::new("B", "k-b")
    }

    fn vault_with_gold_for_a() -> Vault {
        let vault = Vault::new();
        vault
            .persist(
                &[StateAndRef {
                    record: OwnershipRecord::new("Gold", 10, mint(), trader_a()),
                    reference: RecordRef::new("t-issue", 0),
                }],
                &[],
            )
            .unwrap();
        vault
    }

    #[test]
    fn test_propose_issue() {
        let t = propose_issue(&mint(), "Gold", 10, &trader_a()).unwrap();
        assert!(t.inputs.is_empty());
        assert_eq!(t.outputs, vec![OwnershipRecord::new("Gold", 10, mint(), trader_a())]);
        assert_eq!(t.commands.len(), 1);
        assert_eq!(t.commands[0].intent, Intent::Issue);
        assert!(t.commands[0].signers.contains(&mint().owning_key));
        assert_eq!(t.commands[0].signers.len(), 1);
    }

    #[test]
    fn test_propose_issue_unsupported_kind_fails_fast() {
        let result = propose_issue(&mint(), "Platinum", 10, &trader_a());
        assert!(matches!(
            result,
            Err(LedgerError::Validation(ValidationError::Content(_)))
        ));
    }

    #[test]
    fn test_propose_transfer_carries_issuer() {
        let vault = vault_with_gold_for_a();
        let t = propose_transfer(&vault, &trader_a(), "Gold", 10, &trader_b()).unwrap();
        assert_eq!(t.inputs.len(), 1);
        assert_eq!(t.inputs[0].reference, RecordRef::new("t-issue", 0));
        assert_eq!(t.outputs, vec![OwnershipRecord::new("Gold", 10, mint(), trader_b())]);
        assert_eq!(t.commands[0].intent, Intent::Transfer);
        assert!(t.commands[0].signers.contains(&trader_a().owning_key));
    }

    #[test]
    fn test_propose_transfer_by_non_owner_rejected() {
        let vault = vault_with_gold_for_a();
        let result = propose_transfer(&vault, &mint(), "Gold", 10, &trader_b());
        assert!(matches!(
            result,
            Err(LedgerError::Validation(ValidationError::Signer(_)))
        ));
    }

    #[test]
    fn test_propose_transfer_nothing_to_spend() {
        let vault = vault_with_gold_for_a();
        let result = propose_transfer(&vault, &trader_a(), "Silver", 10, &trader_b());
        assert!(matches!(result, Err(LedgerError::Selection(_))));
    }
}
