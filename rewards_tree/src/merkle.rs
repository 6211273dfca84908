//! Merkle tree over node reward leaves.
//!
//! Leaves are `keccak256(address ‖ network ‖ rpl ‖ eth)` with every integer
//! left-padded to 32 bytes. Leaves are sorted before the tree is built and
//! each parent hashes its two children in ascending order, so a proof is just
//! the list of siblings and needs no direction bits. A node without a sibling
//! is promoted to the next level unchanged.

use alloy::primitives::{keccak256, Address, B256, U256};

use crate::file::NodeRewardsInfo;

/// Computes the leaf committed to by a node's rewards entry.
pub fn node_leaf(address: Address, info: &NodeRewardsInfo) -> B256 {
    let mut buf = Vec::with_capacity(20 + 32 * 3);
    buf.extend_from_slice(address.as_slice());
    buf.extend_from_slice(&U256::from(info.reward_network).to_be_bytes::<32>());
    buf.extend_from_slice(&info.total_rpl().to_be_bytes::<32>());
    buf.extend_from_slice(&info.smoothing_pool_eth.to_be_bytes::<32>());
    keccak256(buf)
}

fn hash_pair(a: B256, b: B256) -> B256 {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(lo.as_slice());
    buf[32..].copy_from_slice(hi.as_slice());
    keccak256(buf)
}

/// A fully materialized Merkle tree. `levels[0]` holds the sorted leaves and
/// the last level holds the root.
#[derive(Clone, Debug)]
pub struct RewardsMerkleTree {
    levels: Vec<Vec<B256>>,
}

impl RewardsMerkleTree {
    /// Builds the tree from an unordered set of leaves.
    pub fn from_leaves(leaves: impl IntoIterator<Item = B256>) -> Self {
        let mut leaves: Vec<B256> = leaves.into_iter().collect();
        leaves.sort_unstable();

        let mut levels = vec![leaves];
        while levels.last().map_or(false, |level| level.len() > 1) {
            let next = levels[levels.len() - 1]
                .chunks(2)
                .map(|pair| match pair {
                    [a, b] => hash_pair(*a, *b),
                    [single] => *single,
                    _ => unreachable!("chunks(2) yields one or two elements"),
                })
                .collect();
            levels.push(next);
        }

        Self { levels }
    }

    /// Root of the tree, or the zero hash for an empty tree.
    pub fn root(&self) -> B256 {
        self.levels
            .last()
            .and_then(|level| level.first().copied())
            .unwrap_or(B256::ZERO)
    }

    /// Number of leaves.
    pub fn len(&self) -> usize {
        self.levels.first().map_or(0, Vec::len)
    }

    /// Whether the tree has no leaves.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the sibling path for `leaf`, or `None` if the leaf is not part
    /// of the tree.
    pub fn proof(&self, leaf: B256) -> Option<Vec<B256>> {
        let mut index = self.levels.first()?.binary_search(&leaf).ok()?;
        let mut proof = Vec::new();
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = index ^ 1;
            if let Some(hash) = level.get(sibling) {
                proof.push(*hash);
            }
            index /= 2;
        }
        Some(proof)
    }
}

/// Folds `proof` over `leaf` and compares the result with `root`.
pub fn verify_proof(leaf: B256, proof: &[B256], root: B256) -> bool {
    proof.iter().fold(leaf, |acc, sibling| hash_pair(acc, *sibling)) == root
}

#[cfg(test)]
mod tests {
    use alloy::primitives::address;

    use super::*;

    fn info(rpl: u64) -> NodeRewardsInfo {
        NodeRewardsInfo {
            collateral_rpl: U256::from(rpl),
            ..Default::default()
        }
    }

    #[test]
    fn empty_tree_has_zero_root() {
        let tree = RewardsMerkleTree::from_leaves(std::iter::empty());
        assert!(tree.is_empty());
        assert_eq!(tree.root(), B256::ZERO);
    }

    #[test]
    fn single_leaf_is_its_own_root() {
        let leaf = node_leaf(Address::ZERO, &info(1));
        let tree = RewardsMerkleTree::from_leaves([leaf]);
        assert_eq!(tree.root(), leaf);
        assert_eq!(tree.proof(leaf), Some(vec![]));
    }

    #[test]
    fn every_leaf_proves_against_root_for_odd_sizes() {
        for n in 1..=9u64 {
            let leaves: Vec<_> = (0..n)
                .map(|i| node_leaf(Address::with_last_byte(i as u8), &info(i * 7)))
                .collect();
            let tree = RewardsMerkleTree::from_leaves(leaves.clone());
            for leaf in leaves {
                let proof = tree.proof(leaf).expect("leaf is in the tree");
                assert!(verify_proof(leaf, &proof, tree.root()), "n = {n}");
            }
        }
    }

    #[test]
    fn leaf_order_does_not_change_root() {
        let a = node_leaf(address!("00000000000000000000000000000000000000aa"), &info(10));
        let b = node_leaf(address!("00000000000000000000000000000000000000bb"), &info(20));
        let c = node_leaf(address!("00000000000000000000000000000000000000cc"), &info(30));
        assert_eq!(
            RewardsMerkleTree::from_leaves([a, b, c]).root(),
            RewardsMerkleTree::from_leaves([c, a, b]).root()
        );
    }

    #[test]
    fn unknown_leaf_has_no_proof() {
        let tree = RewardsMerkleTree::from_leaves([node_leaf(Address::ZERO, &info(1))]);
        assert!(tree.proof(B256::repeat_byte(1)).is_none());
    }
}
