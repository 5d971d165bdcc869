//! Binary Merkle tree over an ordered list of transactions.
//!
//! Leaves are transaction hashes. Each level pairs adjacent nodes and hashes
//! `left || right`; an odd level pairs its last node with itself. The tree owns
//! its nodes outright, so there is no sharing between branches.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use super::hash::{hash_pair, Hash};
use super::transaction::Transaction;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MerkleError {
    #[error("Cannot build a Merkle tree without transactions")]
    EmptyInput,
}

/// A node in the tree
///
/// Leaves have no children. Internal nodes always have a left child; `right` is `None`
/// when the left child was paired with itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleNode {
    pub hash: Hash,
    pub left: Option<Box<MerkleNode>>,
    pub right: Option<Box<MerkleNode>>,
}

impl MerkleNode {
    fn leaf(hash: Hash) -> Self {
        MerkleNode {
            hash,
            left: None,
            right: None,
        }
    }

    fn branch(left: MerkleNode, right: MerkleNode) -> Self {
        MerkleNode {
            hash: hash_pair(&left.hash, &right.hash),
            left: Some(Box::new(left)),
            right: Some(Box::new(right)),
        }
    }

    fn self_paired(left: MerkleNode) -> Self {
        MerkleNode {
            hash: hash_pair(&left.hash, &left.hash),
            left: Some(Box::new(left)),
            right: None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }
}

/// Which side of the running hash a proof sibling sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ProofStep {
    #[schema(value_type = String)]
    pub sibling: Hash,
    pub side: Side,
}

/// Inclusion proof for one leaf, ordered from the leaf up to the root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MerkleProof {
    pub leaf_index: usize,
    pub steps: Vec<ProofStep>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    root: MerkleNode,
    leaf_count: usize,
    depth: usize,
}

impl MerkleTree {
    /// Builds the tree over `transactions` in order
    pub fn build(transactions: &[Transaction]) -> Result<Self, MerkleError> {
        Self::from_leaves(transactions.iter().map(Transaction::hash).collect())
    }

    /// Builds the tree over precomputed leaf hashes
    pub fn from_leaves(leaves: Vec<Hash>) -> Result<Self, MerkleError> {
        if leaves.is_empty() {
            return Err(MerkleError::EmptyInput);
        }

        let leaf_count = leaves.len();
        let mut level: Vec<MerkleNode> = leaves.into_iter().map(MerkleNode::leaf).collect();
        let mut depth = 0;

        while level.len() > 1 {
            let mut next = Vec::with_capacity((level.len() + 1) / 2);
            let mut nodes = level.into_iter();

            while let Some(left) = nodes.next() {
                let parent = match nodes.next() {
                    Some(right) => MerkleNode::branch(left, right),
                    None => MerkleNode::self_paired(left),
                };
                next.push(parent);
            }

            level = next;
            depth += 1;
        }

        let root = level.pop().ok_or(MerkleError::EmptyInput)?;

        Ok(MerkleTree {
            root,
            leaf_count,
            depth,
        })
    }

    /// The committed root hash
    pub fn root(&self) -> Hash {
        self.root.hash
    }

    pub fn root_node(&self) -> &MerkleNode {
        &self.root
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    /// Number of hashing levels above the leaves
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Builds the inclusion proof for the leaf at `index`
    pub fn proof(&self, index: usize) -> Option<MerkleProof> {
        if index >= self.leaf_count {
            return None;
        }

        let mut steps = Vec::with_capacity(self.depth);
        let mut node = &self.root;

        for level in (0..self.depth).rev() {
            let left = node.left.as_deref()?;

            if (index >> level) & 1 == 0 {
                let sibling = node.right.as_deref().unwrap_or(left);
                steps.push(ProofStep {
                    sibling: sibling.hash,
                    side: Side::Right,
                });
                node = left;
            } else {
                steps.push(ProofStep {
                    sibling: left.hash,
                    side: Side::Left,
                });
                node = node.right.as_deref()?;
            }
        }

        steps.reverse();

        Some(MerkleProof {
            leaf_index: index,
            steps,
        })
    }
}

/// Recomputes the path from `leaf` and compares the result to `root`
pub fn verify_proof(leaf: &Hash, proof: &MerkleProof, root: &Hash) -> bool {
    let computed = proof.steps.iter().fold(*leaf, |current, step| match step.side {
        Side::Left => hash_pair(&step.sibling, &current),
        Side::Right => hash_pair(&current, &step.sibling),
    });

    computed == *root
}

/// Root hash over `transactions`
pub fn merkle_root(transactions: &[Transaction]) -> Result<Hash, MerkleError> {
    MerkleTree::build(transactions).map(|tree| tree.root())
}
