//! Replays a finalized transaction log into per-voter net positions.
//!
//! The reconciler never reads a card.  It recovers each voter's position on
//! each motion purely from the vote movements booths emitted, using the same
//! rules the booth enforces: casts add in the direction of the accumulator's
//! side, withdrawals drive the running total toward zero.  Records that cannot
//! be attributed, or that would push a total past zero, are reported as
//! warnings and left out of the tally.

use crate::address::Address;
use crate::booth::{MotionId, Side};
use crate::error::{BallotError, Result};
use crate::registry::MotionRegistry;
use crate::stream::{TxKind, TxRecord};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

/// One line of the raw-votes table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawRow {
    /// Motion the movement was attributed to.
    pub motion: MotionId,
    /// Voter who moved.
    pub voter: Address,
    /// Cast or withdraw.
    pub kind: TxKind,
    /// Signed change applied to the voter's net.
    pub delta: i128,
}

/// A record left out of the tally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    /// Position of the record in the input log.
    pub position: usize,
    /// Always [`BallotError::UnresolvableReference`].
    pub error: BallotError,
}

/// Counters over one reconciliation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    /// Records read.
    pub records: usize,
    /// Records folded into a net.
    pub applied: usize,
    /// Records reported as warnings.
    pub skipped: usize,
    /// Distinct voters seen, attributed or not.
    pub voters: usize,
    /// Motions with at least one attributed record.
    pub motions: usize,
}

/// Result of [`reconcile`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Zero seed rows for every registered motion and every voter, then one
    /// row per applied record in log order.
    pub rows: Vec<RawRow>,
    /// `motion -> voter -> net`.
    pub nets: BTreeMap<MotionId, BTreeMap<Address, i128>>,
    /// Skipped records.
    pub warnings: Vec<Warning>,
    /// Counters.
    pub summary: Summary,
}

impl Reconciliation {
    /// Net position of `voter` on `motion`, if the pair was ever attributed.
    pub fn net(&self, motion: MotionId, voter: &Address) -> Option<i128> {
        self.nets.get(&motion).and_then(|votes| votes.get(voter)).copied()
    }

    /// `motion -> net -> number of voters holding that net`.
    pub fn histogram(&self) -> BTreeMap<MotionId, BTreeMap<i128, usize>> {
        self.nets
            .iter()
            .map(|(motion, votes)| {
                let mut counts = BTreeMap::new();
                for net in votes.values() {
                    *counts.entry(*net).or_insert(0) += 1;
                }
                (*motion, counts)
            })
            .collect()
    }

    /// `(motion, voter, net)` triples ordered by motion then voter.
    pub fn flattened(&self) -> Vec<(MotionId, Address, i128)> {
        self.nets
            .iter()
            .flat_map(|(motion, votes)| votes.iter().map(move |(voter, net)| (*motion, *voter, *net)))
            .collect()
    }
}

/// Folds `records` against `registry`.
///
/// Only arithmetic overflow aborts the run; everything else unattributable
/// becomes a [`Warning`].
pub fn reconcile(records: &[TxRecord], registry: &MotionRegistry) -> Result<Reconciliation> {
    let mut out = Reconciliation::default();
    let mut voters = BTreeSet::new();

    for record in records {
        voters.insert(record.voter);
        if let Some(entry) = registry.resolve(&record.accumulator) {
            out.nets
                .entry(entry.motion)
                .or_default()
                .entry(record.voter)
                .or_insert(0);
        }
    }

    for motion in registry.motions() {
        for voter in &voters {
            out.rows.push(RawRow {
                motion,
                voter: *voter,
                kind: TxKind::Cast,
                delta: 0,
            });
        }
    }

    for (position, record) in records.iter().enumerate() {
        match apply(&mut out.nets, registry, record)? {
            Ok(row) => {
                out.rows.push(row);
                out.summary.applied += 1;
            }
            Err(reason) => {
                warn!(
                    component = "RECONCILE",
                    evt = "SKIP",
                    position,
                    accumulator = %record.accumulator,
                    voter = %record.voter,
                    reason = %reason
                );
                out.warnings.push(Warning {
                    position,
                    error: BallotError::UnresolvableReference(reason),
                });
            }
        }
    }

    out.summary.records = records.len();
    out.summary.skipped = out.warnings.len();
    out.summary.voters = voters.len();
    out.summary.motions = out.nets.len();
    info!(
        component = "RECONCILE",
        evt = "DONE",
        records = out.summary.records,
        applied = out.summary.applied,
        skipped = out.summary.skipped,
        voters = out.summary.voters,
        motions = out.summary.motions
    );
    Ok(out)
}

// Outer error aborts the run; inner error is a skip reason.
fn apply(
    nets: &mut BTreeMap<MotionId, BTreeMap<Address, i128>>,
    registry: &MotionRegistry,
    record: &TxRecord,
) -> Result<std::result::Result<RawRow, String>> {
    let Some(entry) = registry.resolve(&record.accumulator) else {
        return Ok(Err(format!("unknown accumulator {}", record.accumulator)));
    };
    let magnitude = i128::try_from(record.magnitude).map_err(|_| {
        BallotError::ArithmeticOverflow(format!("magnitude {} exceeds i128", record.magnitude))
    })?;
    let total = nets
        .get_mut(&entry.motion)
        .and_then(|votes| votes.get_mut(&record.voter))
        .ok_or_else(|| BallotError::UnresolvableReference(format!("unseeded pair {}", entry.motion)))?;
    let t = *total;

    let delta = match (record.kind, entry.side) {
        (TxKind::Cast, Side::Support) => magnitude,
        (TxKind::Cast, Side::Oppose) => -magnitude,
        (TxKind::Withdraw, Side::Support) if t > 0 => {
            if magnitude > t {
                return Ok(Err(format!("withdraw of {magnitude} overshoots support total {t}")));
            }
            -magnitude
        }
        (TxKind::Withdraw, Side::Oppose) if t < 0 => {
            if magnitude > -t {
                return Ok(Err(format!("withdraw of {magnitude} overshoots oppose total {t}")));
            }
            magnitude
        }
        (TxKind::Withdraw, side) => {
            return Ok(Err(format!(
                "withdraw from {side:?} accumulator while motion {} total is {t}",
                entry.motion
            )));
        }
    };
    *total = t.checked_add(delta).ok_or_else(|| {
        BallotError::ArithmeticOverflow(format!("net of {} on motion {}", record.voter, entry.motion))
    })?;
    Ok(Ok(RawRow {
        motion: entry.motion,
        voter: record.voter,
        kind: record.kind,
        delta,
    }))
}
