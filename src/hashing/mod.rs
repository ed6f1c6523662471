//! Content Hashing
//!
//! Deterministic SHA-256 fingerprints of evidence and hash chains over
//! ordered evidence lists.

pub mod canonical;
pub mod manager;

pub use canonical::{to_canonical_bytes, to_canonical_string};
pub use manager::{is_valid_hash, ChainLink, HashChain, HashManager, GENESIS_HASH};
