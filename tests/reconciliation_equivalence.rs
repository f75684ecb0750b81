//! Reconciliation equivalence.
//!
//! Runs random sessions against booths and boxes, then replays only the
//! emitted vote movements through the reconciler.  The recovered net for
//! every (motion, voter) pair must equal the value on the voter's card.

mod common;

use common::{arb_ops, World};
use proptest::prelude::*;
use quadratic_ballot::{parse_stream, reconcile, TxRecord};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(96))]

    #[test]
    fn replayed_nets_match_cards(ops in arb_ops(9, 4, 60)) {
        let mut world = World::new(3, 4);
        for op in &ops {
            let _ = world.apply(op);
        }
        let out = reconcile(&world.records, &world.registry).unwrap();
        prop_assert!(out.warnings.is_empty(), "{:?}", out.warnings);
        for voter in 0..world.voters.len() {
            for motion in 0..3 {
                let address = world.voters[voter].address;
                let expected = world.position(voter, motion);
                let recovered = out.net(motion, &address).unwrap_or(0);
                prop_assert_eq!(recovered, expected, "motion {} voter {}", motion, address);
            }
        }
    }

    #[test]
    fn replay_survives_serialization(ops in arb_ops(6, 2, 30)) {
        let mut world = World::new(2, 2);
        for op in &ops {
            let _ = world.apply(op);
        }
        let lines: Vec<String> = world
            .records
            .iter()
            .map(|r| serde_json::to_string(r).unwrap())
            .collect();
        let parsed: Vec<TxRecord> = parse_stream(&lines.join("\n")).unwrap();
        prop_assert_eq!(&parsed, &world.records);
        prop_assert_eq!(
            reconcile(&parsed, &world.registry).unwrap(),
            reconcile(&world.records, &world.registry).unwrap()
        );
    }
}

#[test]
fn flip_through_booth_reconciles_to_new_side() {
    let mut world = World::new(1, 1);
    let scale = quadratic_ballot::SCALE;
    world.cast(0, 0, -3 * scale).unwrap();
    world.cast(0, 0, 4 * scale).unwrap();
    world.withdraw(0, 1, scale as u128).unwrap();
    let out = reconcile(&world.records, &world.registry).unwrap();
    assert_eq!(out.net(0, &world.voters[0].address), Some(3 * scale));
    assert_eq!(out.summary.applied, 4);
}
