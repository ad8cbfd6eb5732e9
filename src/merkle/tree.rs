//! Fixed-depth Merkle tree over a group's ordered commitments.
//!
//! Leaves are left-aligned in insertion order; every unoccupied subtree is
//! replaced by a precomputed zero hash, so building costs one Poseidon call per
//! occupied node instead of one per node of the full tree.

use ark_bn254::Fr;
use ark_std::vec::Vec;
use std::collections::HashMap;

use super::hash::{field_to_bytes, PoseidonHasher, FIELD_BYTES};

/// Maximum tree depth (2^32 leaves).
pub const MAX_DEPTH: usize = 32;

/// A Merkle path (proof) for membership verification.
#[derive(Clone, Debug)]
pub struct MerklePath {
    /// Sibling hashes along the path from leaf to root.
    pub siblings: Vec<Fr>,
    /// Path indices: false = left child, true = right child.
    pub indices: Vec<bool>,
    /// The leaf value being proven.
    pub leaf: Fr,
}

impl MerklePath {
    /// Verify this path against a given root.
    pub fn verify(&self, root: &Fr, hasher: &PoseidonHasher) -> bool {
        &self.compute_root(hasher) == root
    }

    /// Compute the root from this path.
    pub fn compute_root(&self, hasher: &PoseidonHasher) -> Fr {
        let mut current = self.leaf;

        for (sibling, is_right) in self.siblings.iter().zip(self.indices.iter()) {
            current = if *is_right {
                hasher.hash_two(sibling, &current)
            } else {
                hasher.hash_two(&current, sibling)
            };
        }

        current
    }

    /// Get the depth of this path.
    pub fn depth(&self) -> usize {
        self.siblings.len()
    }
}

/// Binary Poseidon Merkle tree with a fixed depth.
#[derive(Clone)]
pub struct GroupTree {
    /// Occupied nodes per level. Level 0 = leaves, level `depth` = root.
    levels: Vec<Vec<Fr>>,
    /// Root of an empty subtree at each level.
    zeros: Vec<Fr>,
    depth: usize,
    hasher: PoseidonHasher,
    /// Map from leaf value to its first index.
    leaf_index: HashMap<[u8; FIELD_BYTES], usize>,
}

impl GroupTree {
    /// Build a tree of the given depth from an ordered list of leaves.
    pub fn new(depth: usize, leaves: Vec<Fr>) -> Result<Self, TreeError> {
        if depth == 0 || depth > MAX_DEPTH {
            return Err(TreeError::InvalidDepth(depth));
        }
        let capacity = 1u64 << depth;
        if leaves.len() as u64 > capacity {
            return Err(TreeError::CapacityExceeded {
                leaves: leaves.len(),
                depth,
            });
        }

        let hasher = PoseidonHasher::new();
        let zeros = zero_hashes(&hasher, depth);

        let mut leaf_index = HashMap::with_capacity(leaves.len());
        for (i, leaf) in leaves.iter().enumerate() {
            leaf_index.entry(field_to_bytes(leaf)).or_insert(i);
        }

        let mut levels = Vec::with_capacity(depth + 1);
        levels.push(leaves);

        for level in 0..depth {
            let below = &levels[level];
            let mut above = Vec::with_capacity(below.len().div_ceil(2));
            for pair in below.chunks(2) {
                let right = pair.get(1).unwrap_or(&zeros[level]);
                above.push(hasher.hash_two(&pair[0], right));
            }
            levels.push(above);
        }

        Ok(Self {
            levels,
            zeros,
            depth,
            hasher,
            leaf_index,
        })
    }

    /// Get the Merkle root. An empty tree has the all-zero subtree root.
    pub fn root(&self) -> Fr {
        self.levels[self.depth]
            .first()
            .copied()
            .unwrap_or(self.zeros[self.depth])
    }

    /// Get tree depth.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Get number of occupied leaves.
    pub fn num_leaves(&self) -> usize {
        self.levels[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels[0].is_empty()
    }

    /// Get a reference to the hasher.
    pub fn hasher(&self) -> &PoseidonHasher {
        &self.hasher
    }

    /// Check if a leaf exists in the tree and return its index.
    pub fn find_leaf(&self, leaf: &Fr) -> Option<usize> {
        self.leaf_index.get(&field_to_bytes(leaf)).copied()
    }

    /// Generate a Merkle path for the leaf at the given index.
    pub fn get_path(&self, leaf_index: usize) -> Option<MerklePath> {
        let leaf = *self.levels[0].get(leaf_index)?;

        let mut siblings = Vec::with_capacity(self.depth);
        let mut indices = Vec::with_capacity(self.depth);
        let mut index = leaf_index;

        for level in 0..self.depth {
            let is_right = index % 2 == 1;
            let sibling = self.levels[level]
                .get(index ^ 1)
                .copied()
                .unwrap_or(self.zeros[level]);

            siblings.push(sibling);
            indices.push(is_right);
            index /= 2;
        }

        Some(MerklePath {
            siblings,
            indices,
            leaf,
        })
    }

    /// Generate a Merkle path for a specific leaf value.
    pub fn get_path_for_leaf(&self, leaf: &Fr) -> Option<MerklePath> {
        let index = self.find_leaf(leaf)?;
        self.get_path(index)
    }
}

/// Compute the accumulator root of an ordered commitment list.
pub fn build(depth: usize, leaves: &[Fr]) -> Result<Fr, TreeError> {
    Ok(GroupTree::new(depth, leaves.to_vec())?.root())
}

/// Root of an empty tree of the given depth.
pub fn empty_root(depth: usize) -> Fr {
    let hasher = PoseidonHasher::new();
    zero_hashes(&hasher, depth)[depth]
}

fn zero_hashes(hasher: &PoseidonHasher, depth: usize) -> Vec<Fr> {
    let mut zeros = Vec::with_capacity(depth + 1);
    let mut current = Fr::from(0u64);
    zeros.push(current);
    for _ in 0..depth {
        current = hasher.hash_two(&current, &current);
        zeros.push(current);
    }
    zeros
}

/// Errors that can occur with Merkle tree operations.
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    #[error("tree depth {0} is outside 1..={MAX_DEPTH}")]
    InvalidDepth(usize),

    #[error("{leaves} leaves do not fit in a tree of depth {depth}")]
    CapacityExceeded { leaves: usize, depth: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn leaves(n: u64) -> Vec<Fr> {
        (1..=n).map(Fr::from).collect()
    }

    #[test]
    fn test_empty_tree() {
        let tree = GroupTree::new(4, vec![]).unwrap();
        assert_eq!(tree.num_leaves(), 0);
        assert!(tree.is_empty());
        assert_eq!(tree.root(), empty_root(4));
        assert!(tree.get_path(0).is_none());
    }

    #[test]
    fn test_empty_root_differs_from_single_leaf() {
        let empty = build(4, &[]).unwrap();
        let single = build(4, &[Fr::from(7u64)]).unwrap();
        assert_ne!(empty, single);
    }

    #[test]
    fn test_single_leaf() {
        let leaf = Fr::from(42u64);
        let tree = GroupTree::new(3, vec![leaf]).unwrap();

        assert_eq!(tree.num_leaves(), 1);
        assert_eq!(tree.find_leaf(&leaf), Some(0));

        let path = tree.get_path(0).unwrap();
        assert_eq!(path.depth(), 3);
        assert!(path.verify(&tree.root(), tree.hasher()));
    }

    #[test]
    fn test_every_leaf_has_valid_path() {
        let leaves = leaves(5);
        let tree = GroupTree::new(3, leaves.clone()).unwrap();

        for (i, leaf) in leaves.iter().enumerate() {
            assert_eq!(tree.find_leaf(leaf), Some(i));
            let path = tree.get_path(i).unwrap();
            assert!(path.verify(&tree.root(), tree.hasher()));
        }
    }

    #[test]
    fn test_full_tree() {
        let tree = GroupTree::new(2, leaves(4)).unwrap();
        for i in 0..4 {
            assert!(tree.get_path(i).unwrap().verify(&tree.root(), tree.hasher()));
        }
    }

    #[test]
    fn test_capacity_exceeded() {
        let result = GroupTree::new(2, leaves(5));
        assert!(matches!(
            result,
            Err(TreeError::CapacityExceeded { leaves: 5, depth: 2 })
        ));
    }

    #[test]
    fn test_invalid_depth() {
        assert!(matches!(GroupTree::new(0, vec![]), Err(TreeError::InvalidDepth(0))));
        assert!(matches!(
            GroupTree::new(MAX_DEPTH + 1, vec![]),
            Err(TreeError::InvalidDepth(_))
        ));
    }

    #[test]
    fn test_invalid_path_fails() {
        let tree = GroupTree::new(3, leaves(4)).unwrap();

        let mut path = tree.get_path(0).unwrap();
        path.siblings[0] = Fr::from(999u64);

        assert!(!path.verify(&tree.root(), tree.hasher()));
    }

    #[test]
    fn test_order_matters() {
        let a = build(3, &[Fr::from(1u64), Fr::from(2u64), Fr::from(3u64)]).unwrap();
        let b = build(3, &[Fr::from(2u64), Fr::from(1u64), Fr::from(3u64)]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_depth_is_part_of_root() {
        assert_ne!(build(3, &leaves(2)).unwrap(), build(4, &leaves(2)).unwrap());
    }

    proptest! {
        #[test]
        fn prop_build_is_deterministic(values in prop::collection::vec(1u64..u64::MAX, 0..16)) {
            let leaves: Vec<Fr> = values.iter().copied().map(Fr::from).collect();
            prop_assert_eq!(build(4, &leaves).unwrap(), build(4, &leaves).unwrap());
        }

        #[test]
        fn prop_appending_changes_root(
            values in prop::collection::vec(1u64..u64::MAX, 0..15),
            extra in 1u64..u64::MAX,
        ) {
            let leaves: Vec<Fr> = values.iter().copied().map(Fr::from).collect();
            let mut longer = leaves.clone();
            longer.push(Fr::from(extra));
            prop_assert_ne!(build(4, &leaves).unwrap(), build(4, &longer).unwrap());
        }

        #[test]
        fn prop_changing_any_leaf_changes_root(
            values in prop::collection::vec(1u64..1_000_000, 1..16),
            position in any::<prop::sample::Index>(),
        ) {
            let leaves: Vec<Fr> = values.iter().copied().map(Fr::from).collect();
            let mut altered = leaves.clone();
            let i = position.index(altered.len());
            altered[i] += Fr::from(1u64);
            prop_assert_ne!(build(4, &leaves).unwrap(), build(4, &altered).unwrap());
        }
    }
}
