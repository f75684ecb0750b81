//! Accumulator-to-motion registry used by reconciliation.

use crate::address::Address;
use crate::booth::{Booth, BoothParams, MotionId, Side};
use crate::config::BoothConfig;
use crate::error::{BallotError, Result};
use crate::smt::DefaultHashes;
use crate::template::Template;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::info;

/// One published motion and the accumulators that hold its votes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    /// Motion id; also the leaf index on every card.
    pub proposal_id: MotionId,
    /// Human-readable title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Two-sided booth routing into the boxes below.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booth_address: Option<Address>,
    /// Support accumulator.
    pub yes_box_address: Address,
    /// Oppose accumulator.
    pub no_box_address: Address,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ProposalsDocument {
    List(Vec<Proposal>),
    Wrapped { proposals: Vec<Proposal> },
}

/// Motion and side an accumulator resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Motion the accumulator belongs to.
    pub motion: MotionId,
    /// Side it accumulates.
    pub side: Side,
}

/// Lookup from accumulator address to [`RegistryEntry`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MotionRegistry {
    entries: BTreeMap<Address, RegistryEntry>,
    motions: BTreeSet<MotionId>,
}

impl MotionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `accumulator` to `motion`/`side`.
    ///
    /// Re-inserting the same mapping is harmless; mapping one accumulator to
    /// two different motions or sides is an error.
    pub fn insert(&mut self, accumulator: Address, motion: MotionId, side: Side) -> Result<()> {
        let entry = RegistryEntry { motion, side };
        if let Some(existing) = self.entries.get(&accumulator) {
            if *existing != entry {
                return Err(BallotError::Decode(format!(
                    "accumulator {accumulator} registered for motion {} ({:?}) and motion {motion} ({side:?})",
                    existing.motion, existing.side
                )));
            }
        }
        self.entries.insert(accumulator, entry);
        self.motions.insert(motion);
        Ok(())
    }

    /// Motion and side for `accumulator`, if registered.
    pub fn resolve(&self, accumulator: &Address) -> Option<RegistryEntry> {
        self.entries.get(accumulator).copied()
    }

    /// Registered motions in ascending order.
    pub fn motions(&self) -> impl Iterator<Item = MotionId> + '_ {
        self.motions.iter().copied()
    }

    /// Number of registered accumulators.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registers both boxes of every proposal.
    pub fn from_proposals(proposals: &[Proposal]) -> Result<Self> {
        let mut registry = Self::new();
        for proposal in proposals {
            registry.insert(proposal.yes_box_address, proposal.proposal_id, Side::Support)?;
            registry.insert(proposal.no_box_address, proposal.proposal_id, Side::Oppose)?;
        }
        Ok(registry)
    }

    /// Loads a proposals document: either a bare array or `{"proposals": [...]}`.
    pub fn load(path: &Path) -> Result<Self> {
        let proposals = load_proposals(path)?;
        let registry = Self::from_proposals(&proposals)?;
        info!(
            component = "REGISTRY",
            evt = "LOAD",
            path = %path.display(),
            proposals = proposals.len(),
            accumulators = registry.len()
        );
        Ok(registry)
    }

    /// Registry for motions `0..count` derived from `template`.
    pub fn derive(template: &Template, base: &BoothParams, depth: u8, count: u64) -> Result<Self> {
        Self::from_proposals(&derive_proposals(template, base, depth, count)?)
    }
}

/// Parses a proposals document from a file.
pub fn load_proposals(path: &Path) -> Result<Vec<Proposal>> {
    let bytes = std::fs::read(path)
        .map_err(|err| BallotError::Io(format!("failed to read {}: {err}", path.display())))?;
    let document: ProposalsDocument = serde_json::from_slice(&bytes)
        .map_err(|err| BallotError::Decode(format!("invalid proposals {}: {err}", path.display())))?;
    Ok(match document {
        ProposalsDocument::List(proposals) => proposals,
        ProposalsDocument::Wrapped { proposals } => proposals,
    })
}

/// Derives a yes box, a no box and a booth routing into them for each motion
/// in `0..count`.
///
/// Every motion id must be a leaf of a depth-`depth` card, so `count` may not
/// exceed `2^depth`.
pub fn derive_proposals(
    template: &Template,
    base: &BoothParams,
    depth: u8,
    count: u64,
) -> Result<Vec<Proposal>> {
    let box_config = BoothConfig::ballot_box(depth);
    let booth_config = BoothConfig::voting_booth(depth);
    let defaults = DefaultHashes::new(depth)?;
    if let Some(last) = count.checked_sub(1) {
        defaults.check_index(last)?;
    }
    (0..count)
        .map(|motion| -> Result<Proposal> {
            let yes = Booth::derive_address(template, &box_config, &base.for_motion(motion, Side::Support))?;
            let no = Booth::derive_address(template, &box_config, &base.for_motion(motion, Side::Oppose))?;
            let booth_params = base.for_motion(motion, Side::Support).with_accumulators(yes, no);
            let booth = Booth::derive_address(template, &booth_config, &booth_params)?;
            Ok(Proposal {
                proposal_id: motion,
                title: None,
                booth_address: Some(booth),
                yes_box_address: yes,
                no_box_address: no,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booth::booth_template;
    use crate::sign::{load_or_derive_key, Ed25519KeySource};

    fn base() -> BoothParams {
        let key = load_or_derive_key(&Ed25519KeySource::Seed("registry".into())).unwrap();
        BoothParams {
            credits: Address([1; 20]),
            votes: Address([2; 20]),
            operator_key: key.verifying_key(),
            collection: Address([3; 20]),
            motion: 0,
            side: Side::Support,
            support: Address::ZERO,
            oppose: Address::ZERO,
        }
    }

    #[test]
    fn parses_both_document_shapes() {
        let list = r#"[{"proposalId": 4, "title": "Budget",
            "yesBoxAddress": "0x1111111111111111111111111111111111111111",
            "noBoxAddress": "0x2222222222222222222222222222222222222222"}]"#;
        let wrapped = format!(r#"{{"proposals": {list}, "voteEndTime": ""}}"#);
        for text in [list.to_string(), wrapped] {
            let document: ProposalsDocument = serde_json::from_str(&text).unwrap();
            let proposals = match document {
                ProposalsDocument::List(p) | ProposalsDocument::Wrapped { proposals: p } => p,
            };
            let registry = MotionRegistry::from_proposals(&proposals).unwrap();
            let entry = registry.resolve(&Address([0x22; 20])).unwrap();
            assert_eq!(entry, RegistryEntry { motion: 4, side: Side::Oppose });
            assert_eq!(registry.motions().collect::<Vec<_>>(), vec![4]);
        }
    }

    #[test]
    fn conflicting_mapping_is_rejected() {
        let mut registry = MotionRegistry::new();
        registry.insert(Address([9; 20]), 1, Side::Support).unwrap();
        registry.insert(Address([9; 20]), 1, Side::Support).unwrap();
        assert!(registry.insert(Address([9; 20]), 2, Side::Support).is_err());
        assert!(registry.insert(Address([9; 20]), 1, Side::Oppose).is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn derived_proposals_are_distinct_and_stable() {
        let template = booth_template().unwrap();
        let proposals = derive_proposals(&template, &base(), 9, 4).unwrap();
        assert_eq!(proposals, derive_proposals(&template, &base(), 9, 4).unwrap());
        let registry = MotionRegistry::derive(&template, &base(), 9, 4).unwrap();
        assert_eq!(registry.len(), 8);
        for proposal in &proposals {
            assert_ne!(proposal.yes_box_address, proposal.no_box_address);
            assert_eq!(
                registry.resolve(&proposal.yes_box_address).unwrap().motion,
                proposal.proposal_id
            );
        }
    }

    #[test]
    fn motion_ids_must_fit_the_card() {
        let template = booth_template().unwrap();
        let full = derive_proposals(&template, &base(), 9, 512).unwrap();
        assert_eq!(full.last().map(|p| p.proposal_id), Some(511));

        let err = derive_proposals(&template, &base(), 9, 513).unwrap_err();
        assert_eq!(err, BallotError::IndexOutOfRange { index: 512, depth: 9 });
        assert!(MotionRegistry::derive(&template, &base(), 9, 600).is_err());
        assert!(derive_proposals(&template, &base(), 0, 1).is_err());
        assert!(derive_proposals(&template, &base(), 9, 0).unwrap().is_empty());
    }
}
