//! Merkle root and coinbase branch construction.
//!
//! The coinbase is always the first leaf. Its branch is the list of sibling
//! hashes needed to climb from the coinbase txid to the root, so a root can
//! be recomputed for any coinbase without the rest of the tree.

use bitcoin::Txid;
use bitcoin::hash_types::TxMerkleNode;
use bitcoin::hashes::{Hash, HashEngine, sha256d};
use bitcoin::merkle_tree;

fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut engine = sha256d::Hash::engine();
    engine.input(left);
    engine.input(right);
    sha256d::Hash::from_engine(engine).to_byte_array()
}

/// Siblings of the coinbase leaf, bottom up, given the non-coinbase txids in
/// block order.
pub fn coinbase_branch(txids: &[Txid]) -> Vec<TxMerkleNode> {
    let mut level: Vec<[u8; 32]> = txids.iter().map(|t| t.to_byte_array()).collect();
    let mut branch = Vec::new();

    while !level.is_empty() {
        branch.push(TxMerkleNode::from_byte_array(level[0]));

        // With the coinbase-side node in front, an even count here is an odd
        // level, whose last node pairs with itself.
        if level.len() % 2 == 0 {
            let last = level[level.len() - 1];
            level.push(last);
        }

        level = level[1..]
            .chunks_exact(2)
            .map(|pair| hash_pair(&pair[0], &pair[1]))
            .collect();
    }

    branch
}

/// Merkle root of a block whose coinbase has `coinbase_txid`, computed from
/// the branch.
pub fn root_from_branch(coinbase_txid: Txid, branch: &[TxMerkleNode]) -> TxMerkleNode {
    let root = branch
        .iter()
        .fold(coinbase_txid.to_byte_array(), |acc, sibling| {
            hash_pair(&acc, sibling.as_byte_array())
        });
    TxMerkleNode::from_byte_array(root)
}

/// Merkle root over the coinbase followed by `txids`.
pub fn merkle_root(coinbase_txid: Txid, txids: &[Txid]) -> TxMerkleNode {
    let leaves = std::iter::once(coinbase_txid).chain(txids.iter().copied());
    match merkle_tree::calculate_root(leaves) {
        Some(root) => TxMerkleNode::from_raw_hash(root.to_raw_hash()),
        // The iterator always yields the coinbase
        None => TxMerkleNode::from_raw_hash(coinbase_txid.to_raw_hash()),
    }
}
