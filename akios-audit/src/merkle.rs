//! Hex-SHA256 Merkle tree with level storage for O(log n) proof generation.
//!
//! Ported from the level-indexed build/proof algorithm in the original
//! ledger's Merkle implementation: rebuild all levels on every append,
//! duplicate the trailing node at odd-length levels, walk `levels[..-1]`
//! to produce a proof.

use sha2::{Digest, Sha256};

fn hash_leaf(data: &str) -> String {
    hex::encode(Sha256::digest(data.as_bytes()))
}

fn hash_pair(left: &str, right: &str) -> String {
    let mut combined = String::with_capacity(left.len() + right.len());
    combined.push_str(left);
    combined.push_str(right);
    hex::encode(Sha256::digest(combined.as_bytes()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Left,
    Right,
}

#[derive(Debug, Clone)]
pub struct ProofStep {
    pub position: Position,
    pub hash: String,
}

#[derive(Debug, Clone)]
pub struct MerkleProof {
    pub leaf_index: usize,
    pub leaf_hash: String,
    pub steps: Vec<ProofStep>,
}

#[derive(Debug, Default, Clone)]
pub struct MerkleTree {
    leaves: Vec<String>,
    levels: Vec<Vec<String>>,
}

impl MerkleTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the tree from a sequence of pre-hashed leaf values.
    pub fn from_leaf_hashes(hashes: Vec<String>) -> Self {
        let mut tree = Self { leaves: hashes, levels: Vec::new() };
        tree.rebuild();
        tree
    }

    pub fn append(&mut self, data: &str) {
        self.leaves.push(hash_leaf(data));
        self.rebuild();
    }

    fn rebuild(&mut self) {
        if self.leaves.is_empty() {
            self.levels = Vec::new();
            return;
        }
        let mut current = self.leaves.clone();
        let mut levels = vec![current.clone()];
        while current.len() > 1 {
            let mut next = Vec::with_capacity(current.len().div_ceil(2));
            for pair in current.chunks(2) {
                let left = &pair[0];
                let right = pair.get(1).unwrap_or(left);
                next.push(hash_pair(left, right));
            }
            levels.push(next.clone());
            current = next;
        }
        self.levels = levels;
    }

    pub fn root(&self) -> Option<String> {
        self.levels.last().and_then(|level| level.first()).cloned()
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    pub fn proof(&self, index: usize) -> Option<MerkleProof> {
        if index >= self.leaves.len() || self.levels.is_empty() {
            return None;
        }
        let mut steps = Vec::new();
        let mut idx = index;
        for level in &self.levels[..self.levels.len() - 1] {
            if idx % 2 == 0 {
                let sibling_idx = idx + 1;
                let sibling = level.get(sibling_idx).unwrap_or(&level[idx]);
                steps.push(ProofStep { position: Position::Right, hash: sibling.clone() });
            } else {
                let sibling = &level[idx - 1];
                steps.push(ProofStep { position: Position::Left, hash: sibling.clone() });
            }
            idx /= 2;
        }
        Some(MerkleProof { leaf_index: index, leaf_hash: self.leaves[index].clone(), steps })
    }

    pub fn verify(&self, proof: &MerkleProof) -> bool {
        let Some(root) = self.root() else { return false };
        if proof.steps.is_empty() {
            return self.leaves.len() == 1 && proof.leaf_hash == root;
        }
        let mut current = proof.leaf_hash.clone();
        for step in &proof.steps {
            current = match step.position {
                Position::Left => hash_pair(&step.hash, &current),
                Position::Right => hash_pair(&current, &step.hash),
            };
        }
        current == root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_leaf_is_its_own_root() {
        let mut tree = MerkleTree::new();
        tree.append("a");
        assert_eq!(tree.root(), Some(hash_leaf("a")));
    }

    #[test]
    fn proof_round_trips_for_odd_leaf_count() {
        let mut tree = MerkleTree::new();
        for d in ["a", "b", "c", "d", "e"] {
            tree.append(d);
        }
        for i in 0..tree.len() {
            let proof = tree.proof(i).unwrap();
            assert!(tree.verify(&proof), "proof for leaf {i} failed to verify");
        }
    }

    #[test]
    fn tampered_proof_fails_verification() {
        let mut tree = MerkleTree::new();
        for d in ["a", "b", "c"] {
            tree.append(d);
        }
        let mut proof = tree.proof(0).unwrap();
        proof.leaf_hash = hash_leaf("tampered");
        assert!(!tree.verify(&proof));
    }
}
