//! Error taxonomy shared by the ledger, the ballot state machine and the
//! reconciliation engine.
//!
//! Every variant except [`BallotError::UnresolvableReference`] is fatal to the
//! operation that raised it.  Proof failures carry the leaf index and both
//! roots so an off-chain actor can regenerate a fresh proof and retry.

use crate::address::Address;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BallotError>;

/// Errors raised while verifying proofs, settling ballots or reconciling logs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BallotError {
    #[error("proof mismatch at leaf {index}: committed root {expected}, proof yields {observed}")]
    /// The claimed leaf value and proof do not reconstruct the committed root.
    ProofMismatch {
        /// Leaf index the proof was supplied for.
        index: u64,
        /// Root currently committed by the card (hex).
        expected: String,
        /// Root recomputed from the claimed value and proof (hex).
        observed: String,
    },
    #[error("leaf index {index} out of range for depth {depth}")]
    /// Leaf index does not fit in a tree of the configured depth.
    IndexOutOfRange {
        /// Offending index.
        index: u64,
        /// Configured tree depth.
        depth: u8,
    },
    #[error("proof carries {actual} siblings, depth {expected} requires exactly that many")]
    /// Proof length differs from the tree depth.
    ProofLength {
        /// Required sibling count.
        expected: usize,
        /// Supplied sibling count.
        actual: usize,
    },
    #[error("invalid transition: {0}")]
    /// Cast with decreasing cost, over-withdrawal, or a position on a side the booth does not serve.
    InvalidTransition(String),
    #[error("unauthorised: {0}")]
    /// Consolidation signature failed to verify, or a caller lacks rights on a card.
    Unauthorized(String),
    #[error("unresolvable reference: {0}")]
    /// A transaction could not be mapped onto a known motion or side.
    UnresolvableReference(String),
    #[error("arithmetic overflow: {0}")]
    /// Fixed-point arithmetic left its representable range.
    ArithmeticOverflow(String),
    #[error("insufficient balance of {token} at {owner}: need {needed}, have {available}")]
    /// A transfer would overdraw an account.
    InsufficientBalance {
        /// Token being moved.
        token: Address,
        /// Account being debited.
        owner: Address,
        /// Amount requested.
        needed: u128,
        /// Amount held.
        available: u128,
    },
    #[error("insufficient allowance of {token} from {owner} to {spender}: need {needed}, have {available}")]
    /// A delegated transfer exceeds the approved allowance.
    InsufficientAllowance {
        /// Token being moved.
        token: Address,
        /// Account that granted the allowance.
        owner: Address,
        /// Account spending the allowance.
        spender: Address,
        /// Amount requested.
        needed: u128,
        /// Amount approved.
        available: u128,
    },
    #[error("unknown card {0}")]
    /// Card id has never been minted.
    UnknownCard(u64),
    #[error("card {id} already minted")]
    /// Card id is already in use.
    DuplicateCard {
        /// Card id.
        id: u64,
    },
    #[error("template error: {0}")]
    /// Template substitution failed.
    Template(String),
    #[error("decode error: {0}")]
    /// Hex, base64, JSON or key decoding failure.
    Decode(String),
    #[error("io error: {0}")]
    /// Underlying filesystem failure.
    Io(String),
}

impl From<std::io::Error> for BallotError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for BallotError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
