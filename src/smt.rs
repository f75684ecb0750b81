//! Fixed-depth sparse Merkle ledger over signed fixed-point leaves.
//!
//! The tree has `2^depth` leaves addressed by `u64` index.  Leaves that were
//! never written hold [`DEFAULT_VALUE`] and whole unwritten subtrees collapse
//! to per-level default hashes, so a proof is always exactly `depth` sibling
//! entries no matter how sparse the tree is.  A proof entry of `None` stands
//! for the default subtree hash at that level.
//!
//! Hashing is domain-separated BLAKE2b-256.  The path is walked leaf level
//! first; at level `l` bit `l` of the index selects whether the running hash
//! is the right (`1`) or left (`0`) child.
//!
//! [`SparseLedger`] holds only the committed root.  It never sees the tree;
//! callers prove the pre-image of every leaf they touch.

use crate::error::{BallotError, Result};
use crate::fixed::{encode_value, DEFAULT_VALUE};
use blake2::digest::{consts::U32, Digest as _};
use blake2::Blake2b;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::sync::Arc;

/// 32-byte node hash.
pub type Digest = [u8; 32];

/// Deepest supported tree; indices are `u64`.
pub const MAX_DEPTH: u8 = 64;

const SMT_DOMAIN: &[u8] = b"QVOTE_SMT";

type Blake2b256 = Blake2b<U32>;

/// Hashes an encoded leaf value.
pub fn hash_leaf(value: i128) -> Digest {
    let mut hasher = Blake2b256::new();
    hasher.update(SMT_DOMAIN);
    hasher.update([0u8]); // leaf marker
    hasher.update(encode_value(value));
    hasher.finalize().into()
}

/// Hashes an interior node from its two children.
pub fn hash_pair(left: &Digest, right: &Digest) -> Digest {
    let mut hasher = Blake2b256::new();
    hasher.update(SMT_DOMAIN);
    hasher.update([1u8]); // node marker
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Lowercase hex of a digest.
pub fn digest_to_hex(digest: &Digest) -> String {
    hex::encode(digest)
}

/// Parses a digest from hex, with or without `0x`.
pub fn digest_from_hex(input: &str) -> Result<Digest> {
    let body = input.trim().trim_start_matches("0x");
    let bytes =
        hex::decode(body).map_err(|err| BallotError::Decode(format!("invalid digest: {err}")))?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| BallotError::Decode(format!("digest must be 32 bytes, got {}", bytes.len())))
}

/// Default subtree hashes for one depth.
///
/// `level(0)` is the hash of the DEFAULT leaf and `level(i + 1)` combines two
/// copies of `level(i)`; `level(depth)` is the root of an unwritten tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultHashes {
    levels: Vec<Digest>,
}

impl DefaultHashes {
    /// Precomputes the `depth + 1` default hashes.
    pub fn new(depth: u8) -> Result<Self> {
        check_depth(depth)?;
        let mut levels = Vec::with_capacity(depth as usize + 1);
        levels.push(hash_leaf(DEFAULT_VALUE));
        for level in 0..depth as usize {
            let below = levels[level];
            levels.push(hash_pair(&below, &below));
        }
        Ok(Self { levels })
    }

    /// Tree depth these hashes were built for.
    pub fn depth(&self) -> u8 {
        (self.levels.len() - 1) as u8
    }

    /// Default hash of a subtree whose leaves sit `level` levels below it.
    pub fn level(&self, level: usize) -> &Digest {
        &self.levels[level]
    }

    /// Root of a tree in which no leaf was ever written.
    pub fn empty_root(&self) -> Digest {
        self.levels[self.levels.len() - 1]
    }

    /// Rejects indices that do not fit in the tree.
    pub fn check_index(&self, index: u64) -> Result<()> {
        let depth = self.depth();
        if depth < 64 && index >> depth != 0 {
            return Err(BallotError::IndexOutOfRange { index, depth });
        }
        Ok(())
    }
}

/// Rejects tree depths outside `1..=MAX_DEPTH`.
pub fn check_depth(depth: u8) -> Result<()> {
    if depth == 0 || depth > MAX_DEPTH {
        return Err(BallotError::Decode(format!(
            "tree depth must be within 1..={MAX_DEPTH}, got {depth}"
        )));
    }
    Ok(())
}

/// Sibling path for one leaf, leaf level first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MerkleProof {
    /// One entry per level; `None` means the default subtree hash for that level.
    pub siblings: Vec<Option<Digest>>,
}

impl MerkleProof {
    /// Wraps an explicit sibling list.
    pub fn new(siblings: Vec<Option<Digest>>) -> Self {
        Self { siblings }
    }

    /// Proof for any leaf of a tree that is entirely default.
    pub fn all_default(depth: u8) -> Self {
        Self {
            siblings: vec![None; depth as usize],
        }
    }

    /// Number of levels covered.
    pub fn len(&self) -> usize {
        self.siblings.len()
    }

    /// `true` for a zero-level proof.
    pub fn is_empty(&self) -> bool {
        self.siblings.is_empty()
    }

    /// Encodes the proof as `depth || bitmap || explicit siblings`.
    ///
    /// Bit `l` of the bitmap (little-endian within each byte) is set when the
    /// level-`l` sibling is explicit.  Proofs longer than [`MAX_DEPTH`] do not
    /// fit the depth byte and are rejected.
    pub fn to_compact_bytes(&self) -> Result<Vec<u8>> {
        let depth = self.siblings.len();
        if depth > MAX_DEPTH as usize {
            return Err(BallotError::Decode(format!(
                "proof of {depth} levels exceeds the maximum depth {MAX_DEPTH}"
            )));
        }
        let bitmap_len = (depth + 7) / 8;
        let explicit = self.siblings.iter().flatten().count();
        let mut out = Vec::with_capacity(1 + bitmap_len + explicit * 32);
        out.push(depth as u8);
        let mut bitmap = vec![0u8; bitmap_len];
        for (level, sibling) in self.siblings.iter().enumerate() {
            if sibling.is_some() {
                bitmap[level / 8] |= 1 << (level % 8);
            }
        }
        out.extend_from_slice(&bitmap);
        for sibling in self.siblings.iter().flatten() {
            out.extend_from_slice(sibling);
        }
        Ok(out)
    }

    /// Decodes bytes produced by [`MerkleProof::to_compact_bytes`].
    pub fn from_compact_bytes(bytes: &[u8]) -> Result<Self> {
        let (&depth, rest) = bytes
            .split_first()
            .ok_or_else(|| BallotError::Decode("empty compact proof".into()))?;
        if depth > MAX_DEPTH {
            return Err(BallotError::Decode(format!(
                "compact proof claims depth {depth}, maximum is {MAX_DEPTH}"
            )));
        }
        let depth = depth as usize;
        let bitmap_len = (depth + 7) / 8;
        if rest.len() < bitmap_len {
            return Err(BallotError::Decode("compact proof bitmap truncated".into()));
        }
        let (bitmap, mut body) = rest.split_at(bitmap_len);
        let mut siblings = Vec::with_capacity(depth);
        for level in 0..depth {
            if bitmap[level / 8] & (1 << (level % 8)) == 0 {
                siblings.push(None);
                continue;
            }
            if body.len() < 32 {
                return Err(BallotError::Decode(format!(
                    "compact proof missing sibling for level {level}"
                )));
            }
            let (head, tail) = body.split_at(32);
            let mut sibling = [0u8; 32];
            sibling.copy_from_slice(head);
            siblings.push(Some(sibling));
            body = tail;
        }
        if !body.is_empty() {
            return Err(BallotError::Decode(format!(
                "compact proof has {} trailing bytes",
                body.len()
            )));
        }
        Ok(Self { siblings })
    }
}

impl Serialize for MerkleProof {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let encoded: Vec<Option<String>> = self
            .siblings
            .iter()
            .map(|sibling| sibling.as_ref().map(digest_to_hex))
            .collect();
        encoded.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for MerkleProof {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let encoded: Vec<Option<String>> = Vec::deserialize(deserializer)?;
        let siblings = encoded
            .iter()
            .map(|entry| entry.as_deref().map(digest_from_hex).transpose())
            .collect::<Result<Vec<_>>>()
            .map_err(serde::de::Error::custom)?;
        Ok(Self { siblings })
    }
}

/// Recomputes the root of a tree holding `value` at `index`, filling the
/// complementary path from `proof`.
pub fn get_root(
    defaults: &DefaultHashes,
    value: i128,
    index: u64,
    proof: &MerkleProof,
) -> Result<Digest> {
    defaults.check_index(index)?;
    let depth = defaults.depth() as usize;
    if proof.len() != depth {
        return Err(BallotError::ProofLength {
            expected: depth,
            actual: proof.len(),
        });
    }
    let mut hash = hash_leaf(value);
    for (level, sibling) in proof.siblings.iter().enumerate() {
        let sibling = sibling.as_ref().unwrap_or_else(|| defaults.level(level));
        hash = if (index >> level) & 1 == 1 {
            hash_pair(sibling, &hash)
        } else {
            hash_pair(&hash, sibling)
        };
    }
    Ok(hash)
}

/// Root-only view of one card's ledger.
#[derive(Debug, Clone)]
pub struct SparseLedger {
    defaults: Arc<DefaultHashes>,
    root: Digest,
}

impl SparseLedger {
    /// Ledger with nothing written.
    pub fn new(defaults: Arc<DefaultHashes>) -> Self {
        let root = defaults.empty_root();
        Self { defaults, root }
    }

    /// Ledger resuming from a previously committed root.
    pub fn with_root(defaults: Arc<DefaultHashes>, root: Digest) -> Self {
        Self { defaults, root }
    }

    /// Currently committed root.
    pub fn root(&self) -> Digest {
        self.root
    }

    /// Tree depth.
    pub fn depth(&self) -> u8 {
        self.defaults.depth()
    }

    /// See [`get_root`].
    pub fn get_root(&self, value: i128, index: u64, proof: &MerkleProof) -> Result<Digest> {
        get_root(&self.defaults, value, index, proof)
    }

    /// `true` iff `value` at `index` is consistent with the committed root.
    pub fn read(&self, index: u64, value: i128, proof: &MerkleProof) -> bool {
        self.verify(index, value, proof).is_ok()
    }

    /// Like [`SparseLedger::read`] but reports why verification failed.
    pub fn verify(&self, index: u64, value: i128, proof: &MerkleProof) -> Result<()> {
        let observed = self.get_root(value, index, proof)?;
        if observed != self.root {
            return Err(BallotError::ProofMismatch {
                index,
                expected: digest_to_hex(&self.root),
                observed: digest_to_hex(&observed),
            });
        }
        Ok(())
    }

    /// Replaces `old_value` at `index` with `new_value` and returns the new root.
    ///
    /// The proof of `old_value` is the only gate; a stale proof fails and
    /// leaves the root untouched.
    pub fn write(
        &mut self,
        index: u64,
        old_value: i128,
        proof: &MerkleProof,
        new_value: i128,
    ) -> Result<Digest> {
        self.verify(index, old_value, proof)?;
        self.root = self.get_root(new_value, index, proof)?;
        Ok(self.root)
    }

    /// Resets `index` to the DEFAULT value.
    pub fn del(&mut self, index: u64, value: i128, proof: &MerkleProof) -> Result<Digest> {
        self.write(index, value, proof, DEFAULT_VALUE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::SCALE;

    fn ledger(depth: u8) -> SparseLedger {
        SparseLedger::new(Arc::new(DefaultHashes::new(depth).unwrap()))
    }

    #[test]
    fn empty_tree_reads_default_everywhere() {
        let ledger = ledger(9);
        let proof = MerkleProof::all_default(9);
        assert!(ledger.read(0, 0, &proof));
        assert!(ledger.read(511, 0, &proof));
        assert!(!ledger.read(511, 1, &proof));
    }

    #[test]
    fn write_then_read_single_leaf() {
        let mut ledger = ledger(9);
        let proof = MerkleProof::all_default(9);
        ledger.write(318, 0, &proof, 5 * SCALE).unwrap();
        assert!(ledger.read(318, 5 * SCALE, &proof));
        assert!(!ledger.read(318, 0, &proof));
        // leaf 319 now has a non-default sibling at level 0
        assert!(!ledger.read(319, 0, &proof));
    }

    #[test]
    fn stale_write_leaves_root_untouched() {
        let mut ledger = ledger(4);
        let proof = MerkleProof::all_default(4);
        ledger.write(3, 0, &proof, 7).unwrap();
        let root = ledger.root();
        let err = ledger.write(3, 0, &proof, 9).unwrap_err();
        assert!(matches!(err, BallotError::ProofMismatch { index: 3, .. }));
        assert_eq!(ledger.root(), root);
    }

    #[test]
    fn rejects_bad_index_and_length() {
        let ledger = ledger(9);
        let proof = MerkleProof::all_default(9);
        assert!(matches!(
            ledger.get_root(0, 512, &proof),
            Err(BallotError::IndexOutOfRange { index: 512, depth: 9 })
        ));
        assert!(matches!(
            ledger.get_root(0, 1, &MerkleProof::all_default(8)),
            Err(BallotError::ProofLength {
                expected: 9,
                actual: 8
            })
        ));
        assert!(!ledger.read(512, 0, &proof));
    }

    #[test]
    fn full_width_depth_accepts_every_index() {
        let defaults = DefaultHashes::new(64).unwrap();
        assert!(defaults.check_index(u64::MAX).is_ok());
        assert!(matches!(DefaultHashes::new(65), Err(BallotError::Decode(_))));
        assert!(matches!(DefaultHashes::new(0), Err(BallotError::Decode(_))));
    }

    #[test]
    fn compact_bytes_roundtrip() {
        let mut siblings = vec![None; 11];
        siblings[0] = Some([1u8; 32]);
        siblings[9] = Some([2u8; 32]);
        let proof = MerkleProof::new(siblings);
        let bytes = proof.to_compact_bytes().unwrap();
        assert_eq!(bytes.len(), 1 + 2 + 64);
        assert_eq!(bytes[1], 0b0000_0001);
        assert_eq!(bytes[2], 0b0000_0010);
        assert_eq!(MerkleProof::from_compact_bytes(&bytes).unwrap(), proof);
        assert!(MerkleProof::from_compact_bytes(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn compact_bytes_reject_oversized_proofs() {
        let deepest = MerkleProof::all_default(MAX_DEPTH);
        let bytes = deepest.to_compact_bytes().unwrap();
        assert_eq!(bytes[0], MAX_DEPTH);
        assert_eq!(MerkleProof::from_compact_bytes(&bytes).unwrap(), deepest);

        for levels in [MAX_DEPTH as usize + 1, 256] {
            let err = MerkleProof::new(vec![None; levels]).to_compact_bytes().unwrap_err();
            assert!(matches!(err, BallotError::Decode(_)), "{err}");
        }
        let mut forged = vec![MAX_DEPTH + 1];
        forged.extend_from_slice(&[0u8; 9]);
        assert!(MerkleProof::from_compact_bytes(&forged).is_err());
    }

    #[test]
    fn proof_json_uses_null_for_defaults() {
        let proof = MerkleProof::new(vec![None, Some([0xab; 32])]);
        let json = serde_json::to_string(&proof).unwrap();
        assert_eq!(json, format!("[null,\"{}\"]", "ab".repeat(32)));
        let parsed: MerkleProof = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, proof);
    }
}
