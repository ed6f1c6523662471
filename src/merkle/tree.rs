//! Merkle Tree for Evidence Batches
//!
//! Commits a batch of evidence items to a single root hash and produces
//! logarithmic inclusion proofs for individual items.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::EvidenceError;
use crate::hashing::{is_valid_hash, HashManager};

/// Which side of the running hash a proof sibling sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiblingPosition {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub sibling_hash: String,
    pub position: SiblingPosition,
}

/// Path from a leaf to the root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionProof {
    pub leaf_index: usize,
    pub leaf_count: usize,
    pub steps: Vec<ProofStep>,
}

impl InclusionProof {
    /// Fold the proof steps over `leaf_hash`
    pub fn compute_root(&self, leaf_hash: &str) -> String {
        self.steps
            .iter()
            .fold(leaf_hash.to_ascii_lowercase(), |current, step| match step.position {
                SiblingPosition::Left => combine(&step.sibling_hash, &current),
                SiblingPosition::Right => combine(&current, &step.sibling_hash),
            })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeInfo {
    pub root_hash: String,
    pub leaf_count: usize,
    /// Number of levels, leaves included
    pub height: usize,
    /// Distinct nodes across all levels; padding duplicates are not counted
    pub node_count: usize,
}

/// Merkle tree stored level by level, leaves first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    levels: Vec<Vec<String>>,
}

impl MerkleTree {
    /// Build a tree whose leaves are the content hashes of `items`
    pub fn build<T: Serialize>(items: &[T]) -> Result<Self, EvidenceError> {
        let hasher = HashManager::new();
        let leaves = items
            .iter()
            .map(|item| hasher.hash(item))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_leaf_hashes(leaves)
    }

    /// Build a tree over already-computed leaf hashes
    pub fn from_leaf_hashes(leaves: Vec<String>) -> Result<Self, EvidenceError> {
        if leaves.is_empty() {
            return Err(EvidenceError::EmptyBatch);
        }
        if let Some(bad) = leaves.iter().find(|hash| !is_valid_hash(hash)) {
            return Err(EvidenceError::Crypto(format!("Invalid leaf hash: {}", bad)));
        }

        info!("Building Merkle tree from {} leaves", leaves.len());

        let mut levels = vec![leaves
            .into_iter()
            .map(|hash| hash.to_ascii_lowercase())
            .collect::<Vec<_>>()];

        while let Some(level) = levels.last().filter(|level| level.len() > 1) {
            let next_level = level
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => combine(left, right),
                    // odd level: the last node is paired with itself
                    [last] => combine(last, last),
                    _ => unreachable!("chunks(2) yields one or two nodes"),
                })
                .collect();
            levels.push(next_level);
        }

        let tree = Self { levels };
        debug!("Merkle tree root: {}", tree.root());
        Ok(tree)
    }

    pub fn root(&self) -> &str {
        // levels always holds at least the leaf level and ends with the single root
        &self.levels[self.levels.len() - 1][0]
    }

    pub fn leaves(&self) -> &[String] {
        &self.levels[0]
    }

    pub fn leaf_count(&self) -> usize {
        self.levels[0].len()
    }

    pub fn height(&self) -> usize {
        self.levels.len()
    }

    /// Inclusion proof for the leaf at `index`
    pub fn get_proof(&self, index: usize) -> Result<InclusionProof, EvidenceError> {
        let leaf_count = self.leaf_count();
        if index >= leaf_count {
            return Err(EvidenceError::ProofIndexOutOfRange { index, leaf_count });
        }

        let mut steps = Vec::with_capacity(self.height() - 1);
        let mut position = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let step = if position % 2 == 0 {
                ProofStep {
                    // a trailing odd node is its own sibling
                    sibling_hash: level.get(position + 1).unwrap_or(&level[position]).clone(),
                    position: SiblingPosition::Right,
                }
            } else {
                ProofStep {
                    sibling_hash: level[position - 1].clone(),
                    position: SiblingPosition::Left,
                }
            };
            steps.push(step);
            position /= 2;
        }

        Ok(InclusionProof {
            leaf_index: index,
            leaf_count,
            steps,
        })
    }

    /// Check that `item` is committed under `root` by `proof`
    pub fn verify_proof<T: Serialize + ?Sized>(item: &T, proof: &InclusionProof, root: &str) -> bool {
        match HashManager::new().hash(item) {
            Ok(leaf_hash) => Self::verify_leaf(&leaf_hash, proof, root),
            Err(e) => {
                debug!("Cannot hash item for proof verification: {}", e);
                false
            }
        }
    }

    /// Check a pre-hashed leaf against `root`
    pub fn verify_leaf(leaf_hash: &str, proof: &InclusionProof, root: &str) -> bool {
        if proof.leaf_index >= proof.leaf_count {
            return false;
        }
        proof.compute_root(leaf_hash).eq_ignore_ascii_case(root)
    }

    pub fn tree_info(&self) -> TreeInfo {
        TreeInfo {
            root_hash: self.root().to_string(),
            leaf_count: self.leaf_count(),
            height: self.height(),
            node_count: self.levels.iter().map(Vec::len).sum(),
        }
    }
}

/// Parent hash: SHA-256 over the concatenated lowercase hex of both children
fn combine(left: &str, right: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(left.to_ascii_lowercase().as_bytes());
    hasher.update(right.to_ascii_lowercase().as_bytes());
    hex::encode(hasher.finalize())
}
