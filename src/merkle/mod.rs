//! Merkle Batch Commitments
//!
//! Merkle trees over evidence items and the on-disk batch manager built on them.

pub mod batch;
pub mod tree;

pub use batch::{BatchInfo, BatchProofStatus, BatchVerification, EvidenceBatchManager, StoredProof};
pub use tree::{InclusionProof, MerkleTree, ProofStep, SiblingPosition, TreeInfo};
