//! Shared simulation world for integration tests.
//!
//! Every motion gets a two-sided booth plus the yes and no boxes it routes
//! into, all derived from the standard template.  Voters hold one card each
//! and have approved every booth and box to write it.

#![allow(dead_code)]

use proptest::prelude::*;
use quadratic_ballot::{
    booth_template, derive_proposals, load_or_derive_key, Address, BallotError, Booth,
    BoothConfig, BoothParams, CardStore, DefaultHashes, MotionRegistry, Receipt, Side,
    SparseTree, TokenLedger, TxRecord, MemoryHost, SCALE,
};
use std::sync::Arc;

pub const DEPTH: u8 = 9;
pub const CREDITS: Address = Address([0xc0; 20]);
pub const VOTES: Address = Address([0xd0; 20]);
pub const COLLECTION: Address = Address([0xee; 20]);
pub const VOTER_BUDGET: u128 = 100_000 * SCALE as u128;
pub const RESERVE: u128 = 100_000 * SCALE as u128;

pub struct Voter {
    pub address: Address,
    pub card: u64,
    pub tree: SparseTree,
    pub debited: u128,
    pub refunded: u128,
}

pub struct World {
    pub host: MemoryHost,
    /// Per motion: booth, yes box, no box.
    pub booths: Vec<Booth>,
    pub voters: Vec<Voter>,
    pub registry: MotionRegistry,
    pub records: Vec<TxRecord>,
}

impl World {
    pub fn new(motions: u64, voters: usize) -> Self {
        let template = booth_template().unwrap();
        let operator = load_or_derive_key(&quadratic_ballot::Ed25519KeySource::Seed(
            "simulation".into(),
        ))
        .unwrap();
        let base = BoothParams {
            credits: CREDITS,
            votes: VOTES,
            operator_key: operator.verifying_key(),
            collection: COLLECTION,
            motion: 0,
            side: Side::Support,
            support: Address::ZERO,
            oppose: Address::ZERO,
        };
        let proposals = derive_proposals(&template, &base, DEPTH, motions).unwrap();
        let registry = MotionRegistry::from_proposals(&proposals).unwrap();
        let defaults = Arc::new(DefaultHashes::new(DEPTH).unwrap());

        let mut booths = Vec::new();
        for proposal in &proposals {
            let motion = proposal.proposal_id;
            let booth = Booth::instantiate_with(
                &template,
                BoothConfig::voting_booth(DEPTH),
                base.for_motion(motion, Side::Support)
                    .with_accumulators(proposal.yes_box_address, proposal.no_box_address),
                defaults.clone(),
            )
            .unwrap();
            assert_eq!(Some(booth.address()), proposal.booth_address);
            booths.push(booth);
            for side in [Side::Support, Side::Oppose] {
                let ballot_box = Booth::instantiate_with(
                    &template,
                    BoothConfig::ballot_box(DEPTH),
                    base.for_motion(motion, side),
                    defaults.clone(),
                )
                .unwrap();
                booths.push(ballot_box);
            }
        }

        let mut host = MemoryHost::new();
        for booth in &booths {
            host.mint(&CREDITS, &booth.address(), RESERVE).unwrap();
            host.mint(&VOTES, &booth.address(), RESERVE).unwrap();
        }
        let voters = (0..voters)
            .map(|i| {
                let address = Address([i as u8 + 1; 20]);
                let card = 100 + i as u64;
                host.mint(&CREDITS, &address, VOTER_BUDGET).unwrap();
                booths[0].issue_card(&mut host, &address, card).unwrap();
                for booth in &booths {
                    host.approve(&CREDITS, &address, &booth.address(), u128::MAX);
                    host.approve_card(&address, &booth.address(), card).unwrap();
                }
                Voter {
                    address,
                    card,
                    tree: SparseTree::new(defaults.clone()),
                    debited: 0,
                    refunded: 0,
                }
            })
            .collect();

        Self {
            host,
            booths,
            voters,
            registry,
            records: Vec::new(),
        }
    }

    pub fn position(&self, voter: usize, motion: u64) -> i128 {
        self.voters[voter].tree.get(motion)
    }

    pub fn cast(&mut self, voter: usize, booth: usize, after: i128) -> Result<Receipt, BallotError> {
        let booth = &self.booths[booth];
        let v = &self.voters[voter];
        let index = booth.motion_index();
        let proof = v.tree.proof(index)?;
        let receipt = booth.cast(&mut self.host, &v.address, v.card, &proof, v.tree.get(index), after)?;
        self.settle(voter, &receipt)?;
        Ok(receipt)
    }

    pub fn withdraw(&mut self, voter: usize, booth: usize, amount: u128) -> Result<Receipt, BallotError> {
        let booth = &self.booths[booth];
        let v = &self.voters[voter];
        let index = booth.motion_index();
        let proof = v.tree.proof(index)?;
        let receipt =
            booth.withdraw(&mut self.host, &v.address, v.card, &proof, v.tree.get(index), amount)?;
        self.settle(voter, &receipt)?;
        Ok(receipt)
    }

    fn settle(&mut self, voter: usize, receipt: &Receipt) -> Result<(), BallotError> {
        let v = &mut self.voters[voter];
        v.tree.set(receipt.motion, receipt.after)?;
        v.debited += receipt.credits_debited;
        v.refunded += receipt.credits_refunded;
        assert_eq!(self.host.read_data(v.card)?, v.tree.root());
        self.records.extend(receipt.records.iter().cloned());
        Ok(())
    }

    pub fn credit_supply(&self) -> u128 {
        self.host.total_supply(&CREDITS)
    }

    pub fn vote_supply(&self) -> u128 {
        self.host.total_supply(&VOTES)
    }

    pub fn credits_of(&self, voter: usize) -> u128 {
        self.host.balance_of(&CREDITS, &self.voters[voter].address)
    }
}

/// One step of a random session.
#[derive(Debug, Clone)]
pub enum Op {
    /// Move to `quarters / 4` votes.
    Cast { voter: usize, booth: usize, quarters: i64 },
    /// Withdraw `eighths / 8` of the current position.
    Withdraw { voter: usize, booth: usize, eighths: u8 },
}

pub fn arb_ops(booths: usize, voters: usize, len: usize) -> impl Strategy<Value = Vec<Op>> {
    let op = prop_oneof![
        3 => (0..voters, 0..booths, -40i64..=40)
            .prop_map(|(voter, booth, quarters)| Op::Cast { voter, booth, quarters }),
        2 => (0..voters, 0..booths, 0u8..=9)
            .prop_map(|(voter, booth, eighths)| Op::Withdraw { voter, booth, eighths }),
    ];
    prop::collection::vec(op, 1..len)
}

impl World {
    /// Applies `op`; rejected operations are returned, not panicked on.
    pub fn apply(&mut self, op: &Op) -> Result<Receipt, BallotError> {
        match *op {
            Op::Cast { voter, booth, quarters } => {
                self.cast(voter, booth, quarters as i128 * SCALE / 4)
            }
            Op::Withdraw { voter, booth, eighths } => {
                let motion = self.booths[booth].motion_index();
                let held = self.position(voter, motion).unsigned_abs();
                self.withdraw(voter, booth, held * eighths as u128 / 8)
            }
        }
    }
}
