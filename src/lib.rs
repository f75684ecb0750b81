#![deny(missing_docs)]

//! # quadratic_ballot
//!
//! **quadratic_ballot** is a settlement layer for quadratic voting.  Each voter
//! holds one card whose 32-byte payload is the root of a sparse Merkle ledger;
//! leaf `i` of that ledger is the voter's signed position on motion `i`.
//! Booths read and rewrite those leaves under a quadratic credit cost, and a
//! reconciler recovers the same positions from the vote movements alone.
//!
//! ## Features
//!
//! * **Sparse ledger**: the [`smt`](smt/index.html) module verifies and
//!   rewrites a fixed-depth sparse Merkle root from a leaf value and its
//!   sibling path, with per-level default hashes computed once per depth.
//!   [`SparseTree`](tree/struct.SparseTree.html) keeps the leaves off-ledger
//!   and produces the proofs.
//! * **Fixed-point cost**: [`cost`](fixed/fn.cost.html) prices a position at
//!   `v^2 / 10^18` with checked 256-bit arithmetic.
//! * **Booths**: the [`booth`](booth/index.html) module implements `cast`,
//!   `withdraw` and `consolidate` against any host implementing
//!   [`TokenLedger`](token/trait.TokenLedger.html) and
//!   [`CardStore`](token/trait.CardStore.html).  Every operation is planned
//!   and checked in full before the host is touched.
//! * **Content-derived addresses**: [`Template`](template/struct.Template.html)
//!   binds named placeholders in several passes; the address is the
//!   RIPEMD-160 of the bound code.
//! * **Reconciliation**: [`reconcile`](reconcile/fn.reconcile.html) folds a
//!   transaction log against a [`MotionRegistry`](registry/struct.MotionRegistry.html)
//!   and [`export`](export/index.html) writes the tallies as CSV and JSON.
//!
//! ## Usage
//!
//! ```rust
//! use quadratic_ballot::{
//!     booth_template, load_or_derive_key, Address, Booth, BoothConfig, BoothParams,
//!     CardStore, Ed25519KeySource, MemoryHost, Side, SparseTree, TokenLedger, SCALE,
//! };
//!
//! let operator = load_or_derive_key(&Ed25519KeySource::Seed("doc".into())).unwrap();
//! let (credits, votes, voter) = (Address([1; 20]), Address([2; 20]), Address([3; 20]));
//! let params = BoothParams {
//!     credits,
//!     votes,
//!     operator_key: operator.verifying_key(),
//!     collection: Address([4; 20]),
//!     motion: 318,
//!     side: Side::Support,
//!     support: Address([5; 20]),
//!     oppose: Address([6; 20]),
//! };
//! let booth = Booth::instantiate(&booth_template().unwrap(), BoothConfig::default(), params).unwrap();
//!
//! let mut host = MemoryHost::new();
//! host.mint(&credits, &voter, 100 * SCALE as u128).unwrap();
//! host.mint(&votes, &booth.address(), 100 * SCALE as u128).unwrap();
//! host.approve(&credits, &voter, &booth.address(), 100 * SCALE as u128);
//! booth.issue_card(&mut host, &voter, 1).unwrap();
//! host.approve_card(&voter, &booth.address(), 1).unwrap();
//!
//! let tree = SparseTree::new(booth.defaults().clone());
//! let receipt = booth
//!     .cast(&mut host, &voter, 1, &tree.proof(318).unwrap(), 0, 5 * SCALE)
//!     .unwrap();
//! assert_eq!(receipt.credits_debited, 25 * SCALE as u128);
//! ```

pub mod address;
pub mod booth;
pub mod config;
pub mod error;
pub mod export;
pub mod fixed;
pub mod reconcile;
pub mod registry;
pub mod sign;
pub mod smt;
pub mod stream;
pub mod template;
pub mod token;
pub mod tree;

pub use address::Address;
pub use booth::{booth_template, Booth, BoothParams, MotionId, Receipt, Side};
pub use config::{BoothConfig, DEFAULT_DEPTH};
pub use error::{BallotError, Result};
pub use export::write_reconciliation;
pub use fixed::{cost, format_votes, parse_votes, SCALE};
pub use reconcile::{reconcile, Reconciliation};
pub use registry::{derive_proposals, MotionRegistry, Proposal, RegistryEntry};
pub use sign::{
    consolidation_message, load_or_derive_key, operator_address, sign_consolidation,
    Ed25519KeySource,
};
pub use smt::{DefaultHashes, Digest, MerkleProof, SparseLedger};
pub use stream::{load_stream, parse_stream, TxKind, TxRecord};
pub use template::{derive_identifier, Params, Template};
pub use token::{CardStore, MemoryHost, TokenLedger};
pub use tree::SparseTree;
