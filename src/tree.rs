//! Off-chain companion to [`SparseLedger`](crate::smt::SparseLedger).
//!
//! A [`SparseTree`] keeps every non-default leaf of one card and produces the
//! proofs the root-only ledger demands.  Proofs name explicit siblings only
//! where the sibling subtree holds a written leaf.

use crate::error::Result;
use crate::fixed::DEFAULT_VALUE;
use crate::smt::{hash_leaf, hash_pair, DefaultHashes, Digest, MerkleProof};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Full leaf set of one sparse ledger.
#[derive(Debug, Clone)]
pub struct SparseTree {
    defaults: Arc<DefaultHashes>,
    leaves: BTreeMap<u64, i128>,
}

impl SparseTree {
    /// Empty tree.
    pub fn new(defaults: Arc<DefaultHashes>) -> Self {
        Self {
            defaults,
            leaves: BTreeMap::new(),
        }
    }

    /// Tree pre-populated with `leaves`.
    pub fn with_leaves<I>(defaults: Arc<DefaultHashes>, leaves: I) -> Result<Self>
    where
        I: IntoIterator<Item = (u64, i128)>,
    {
        let mut tree = Self::new(defaults);
        for (index, value) in leaves {
            tree.set(index, value)?;
        }
        Ok(tree)
    }

    /// Default hashes the tree is built over.
    pub fn defaults(&self) -> &Arc<DefaultHashes> {
        &self.defaults
    }

    /// Value stored at `index` (DEFAULT when never written).
    pub fn get(&self, index: u64) -> i128 {
        self.leaves.get(&index).copied().unwrap_or(DEFAULT_VALUE)
    }

    /// Stores `value` at `index`; writing DEFAULT removes the leaf.
    pub fn set(&mut self, index: u64, value: i128) -> Result<()> {
        self.defaults.check_index(index)?;
        if value == DEFAULT_VALUE {
            self.leaves.remove(&index);
        } else {
            self.leaves.insert(index, value);
        }
        Ok(())
    }

    /// Non-default leaves in index order.
    pub fn leaves(&self) -> impl Iterator<Item = (u64, i128)> + '_ {
        self.leaves.iter().map(|(index, value)| (*index, *value))
    }

    /// Root committing to the current leaf set.
    pub fn root(&self) -> Digest {
        let layers = self.layers();
        layers
            .last()
            .and_then(|top| top.get(&0).copied())
            .unwrap_or_else(|| self.defaults.empty_root())
    }

    /// Proof for `index` against [`SparseTree::root`].
    pub fn proof(&self, index: u64) -> Result<MerkleProof> {
        self.defaults.check_index(index)?;
        let layers = self.layers();
        let depth = self.defaults.depth() as usize;
        let siblings = (0..depth)
            .map(|level| {
                let position = index >> level;
                layers[level].get(&(position ^ 1)).copied()
            })
            .collect();
        Ok(MerkleProof::new(siblings))
    }

    // layer 0 holds leaf hashes, layer `depth` holds the root; only
    // non-default nodes are stored.
    fn layers(&self) -> Vec<BTreeMap<u64, Digest>> {
        let depth = self.defaults.depth() as usize;
        let mut layers = Vec::with_capacity(depth + 1);
        let mut current: BTreeMap<u64, Digest> = self
            .leaves
            .iter()
            .map(|(index, value)| (*index, hash_leaf(*value)))
            .collect();
        for level in 0..depth {
            let default = *self.defaults.level(level);
            let mut parents = BTreeMap::new();
            for position in current.keys() {
                let parent = position >> 1;
                if parents.contains_key(&parent) {
                    continue;
                }
                let left = current.get(&(parent << 1)).unwrap_or(&default);
                let right = current.get(&((parent << 1) | 1)).unwrap_or(&default);
                parents.insert(parent, hash_pair(left, right));
            }
            layers.push(current);
            current = parents;
        }
        layers.push(current);
        layers
    }
}
