//! Booth behaviour over random sessions.
//!
//! - credits are conserved and each voter has paid exactly the cost of
//!   their final positions
//! - a withdrawal never crosses zero, and one that would is rejected whole
//! - cost is even and monotone in the position's magnitude

mod common;

use common::{arb_ops, Op, World, COLLECTION, CREDITS, VOTER_BUDGET, VOTES};
use proptest::prelude::*;
use quadratic_ballot::{cost, BallotError, TokenLedger, SCALE};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn credits_are_conserved(ops in arb_ops(6, 3, 40)) {
        let mut world = World::new(2, 3);
        let supply = world.credit_supply();
        let votes = world.vote_supply();
        for op in &ops {
            let _ = world.apply(op);
            prop_assert_eq!(world.credit_supply(), supply);
            prop_assert_eq!(world.vote_supply(), votes);
        }
        for voter in 0..world.voters.len() {
            let owed: u128 = (0..2)
                .map(|motion| cost(world.position(voter, motion)).unwrap())
                .sum();
            let v = &world.voters[voter];
            prop_assert_eq!(v.debited - v.refunded, owed);
            prop_assert_eq!(VOTER_BUDGET - world.credits_of(voter), owed);
        }
    }

    #[test]
    fn withdrawals_never_overshoot(ops in arb_ops(6, 2, 30), extra in 1u128..SCALE as u128) {
        let mut world = World::new(2, 2);
        for op in &ops {
            if let (Op::Withdraw { .. }, Ok(receipt)) = (op, world.apply(op)) {
                prop_assert!(receipt.after.signum() == receipt.before.signum() || receipt.after == 0);
                prop_assert!(receipt.after.unsigned_abs() <= receipt.before.unsigned_abs());
            }
        }
        for voter in 0..world.voters.len() {
            let held = world.position(voter, 0).unsigned_abs();
            let credits = world.credits_of(voter);
            let root = world.voters[voter].tree.root();
            let err = world.withdraw(voter, 0, held + extra).unwrap_err();
            prop_assert!(matches!(err, BallotError::InvalidTransition(_)), "{err}");
            prop_assert_eq!(world.credits_of(voter), credits);
            prop_assert_eq!(world.voters[voter].tree.root(), root);
        }
    }

    #[test]
    fn cost_is_even_and_monotone(a in any::<i64>(), b in any::<i64>()) {
        let (a, b) = (a as i128 * 1_000, b as i128 * 1_000);
        prop_assert_eq!(cost(a).unwrap(), cost(-a).unwrap());
        if a.unsigned_abs() <= b.unsigned_abs() {
            prop_assert!(cost(a).unwrap() <= cost(b).unwrap());
        }
    }

    #[test]
    fn whole_votes_cost_strictly_more(a in 0i128..1_000_000, step in 1i128..1_000) {
        prop_assert!(cost(a * SCALE).unwrap() < cost((a + step) * SCALE).unwrap());
        prop_assert_eq!(cost(a * SCALE).unwrap(), (a * a * SCALE) as u128);
    }
}

#[test]
fn withdraw_refunds_cost_difference() {
    let mut world = World::new(1, 1);
    // booth 0 is the two-sided booth for motion 0
    world.cast(0, 0, 5 * SCALE).unwrap();
    let receipt = world.withdraw(0, 0, 5 * SCALE as u128 / 2).unwrap();
    assert_eq!(receipt.after, 5 * SCALE / 2);
    assert_eq!(receipt.credits_refunded, 18_750_000_000_000_000_000);
    assert_eq!(
        world.host.balance_of(&CREDITS, &world.voters[0].address),
        VOTER_BUDGET - 6_250_000_000_000_000_000
    );
}

#[test]
fn oppose_box_withdraw_moves_votes_to_collection() {
    let mut world = World::new(6, 1);
    // motion 5: booth 15, yes box 16, no box 17
    world.cast(0, 17, -5 * SCALE).unwrap();
    let receipt = world.withdraw(0, 17, 3 * SCALE as u128).unwrap();
    assert_eq!(receipt.after, -2 * SCALE);
    assert_eq!(receipt.credits_refunded, 21 * SCALE as u128);
    assert_eq!(
        world.host.balance_of(&VOTES, &COLLECTION),
        3 * SCALE as u128
    );
}

#[test]
fn card_follows_positions_across_booths() {
    let mut world = World::new(2, 1);
    world.cast(0, 0, 3 * SCALE).unwrap();
    // the yes box shares the booth's leaf
    world.withdraw(0, 1, SCALE as u128).unwrap();
    assert_eq!(world.position(0, 0), 2 * SCALE);
    // the no box cannot take a support position
    assert!(world.withdraw(0, 2, SCALE as u128).is_err());
    world.cast(0, 3, -SCALE).unwrap();
    assert_eq!(world.position(0, 1), -SCALE);
}
