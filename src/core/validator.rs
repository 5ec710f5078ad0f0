//! Transition validity rules.
//!
//! `validate` is a pure function of its arguments: no I/O, no state, no time. The proposer,
//! every counterparty and the ordering service run it on the same decoded transition and
//! therefore reach the same verdict.
//!
//! Rules are keyed on the declared intent:
//! - **Issue**: no inputs, exactly one output, output kind supported, issuer signs.
//! - **Transfer**: exactly one input, exactly one output, *input* kind supported, input's owner signs.
//!
//! Transfer checks the asset kind of the consumed record, not the produced one, and does
//! not compare kind or quantity between input and output. Both are kept as-is for
//! compatibility with records already on the ledger.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::core::asset::AssetKind;
use crate::core::record::OwnershipRecord;
use crate::core::transition::{Intent, Transition};
use crate::error::LedgerError;
use crate::identity::OwningKey;

/// Errors produced by transition validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Shape error: {0}")]
    Shape(String),

    #[error("Content error: {0}")]
    Content(String),

    #[error("Signer error: {0}")]
    Signer(String),

    #[error("Unrecognized intent: {0}")]
    UnrecognizedIntent(String),
}

/// Result type for transition validation.
pub type ValidationResult = std::result::Result<(), ValidationError>;

impl From<ValidationError> for LedgerError {
    fn from(err: ValidationError) -> Self {
        LedgerError::Validation(err)
    }
}

fn shape(msg: &str) -> ValidationError {
    ValidationError::Shape(msg.to_string())
}

fn require_supported_kind(record: &OwnershipRecord) -> ValidationResult {
    if !AssetKind::is_supported(&record.asset_kind) {
        return Err(ValidationError::Content("unsupported asset kind".to_string()));
    }
    Ok(())
}

/// Applies the rule set selected by `intent`.
pub fn validate(
    consumed: &[OwnershipRecord],
    produced: &[OwnershipRecord],
    intent: Intent,
    signers: &BTreeSet<OwningKey>,
) -> ValidationResult {
    match intent {
        Intent::Issue => {
            if !consumed.is_empty() {
                return Err(shape("Issue cannot have inputs"));
            }
            if produced.len() != 1 {
                return Err(shape("Issue can only have one output"));
            }
            let output = &produced[0];
            require_supported_kind(output)?;
            if !signers.contains(&output.issuer.owning_key) {
                return Err(ValidationError::Signer("issuer must sign".to_string()));
            }
        }
        Intent::Transfer => {
            if consumed.len() != 1 {
                return Err(shape("Transfer must have exactly one input"));
            }
            if produced.len() != 1 {
                return Err(shape("Transfer can only have one output"));
            }
            let input = &consumed[0];
            require_supported_kind(input)?;
            if !signers.contains(&input.owner.owning_key) {
                return Err(ValidationError::Signer("owner must sign".to_string()));
            }
        }
    }
    Ok(())
}

/// Validates a whole transition: exactly one command, then the rules for its intent.
pub fn verify_transition(transition: &Transition) -> ValidationResult {
    let command = match transition.commands.as_slice() {
        [command] => command,
        _ => return Err(shape("exactly one intent required")),
    };
    validate(
        &transition.consumed_records(),
        &transition.outputs,
        command.intent,
        &command.signers,
    )
}
