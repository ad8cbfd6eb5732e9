//! Groth16 verification of group membership proofs.

use ark_bn254::{Bn254, Fr};
use ark_groth16::{Groth16, PreparedVerifyingKey, VerifyingKey};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_snark::SNARK;
use std::path::Path;

use crate::merkle::hash::{message_digest, scope_digest};
use crate::merkle::tree::{self, TreeError, MAX_DEPTH};
use crate::prover::{split_depth_prefix, MembershipProof};

/// Result type for verifier operations.
pub type VerifierResult<T> = Result<T, VerifierError>;

/// Errors that can occur during verification.
#[derive(Debug, thiserror::Error)]
pub enum VerifierError {
    /// The proof was built against a different commitment list. The client
    /// should refetch the group and prove again.
    #[error("Root mismatch: proof was generated for a different group state")]
    StaleGroupState,

    #[error("Invalid proof")]
    InvalidProof,

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// Verifier for group membership proofs.
pub struct Verifier {
    /// Prepared verifying key for fast verification.
    prepared_vk: PreparedVerifyingKey<Bn254>,
    /// Original verifying key (for serialization).
    verifying_key: VerifyingKey<Bn254>,
    /// Tree depth the key was set up for.
    depth: usize,
}

impl Verifier {
    /// Create a new verifier from a verifying key.
    pub fn new(vk: VerifyingKey<Bn254>, depth: usize) -> VerifierResult<Self> {
        if depth == 0 || depth > MAX_DEPTH {
            return Err(TreeError::InvalidDepth(depth).into());
        }
        let prepared_vk = Groth16::<Bn254>::process_vk(&vk)
            .map_err(|e| VerifierError::SerializationError(e.to_string()))?;
        Ok(Self {
            prepared_vk,
            verifying_key: vk,
            depth,
        })
    }

    /// Verify a proof against a group's authoritative commitment list.
    ///
    /// Checks, in order: root equality, binding to `message` and `scope`,
    /// and the Groth16 proof itself. Returns the proof's nullifier.
    pub fn verify(
        &self,
        commitments: &[Fr],
        proof: &MembershipProof,
        message: &str,
        scope: &str,
    ) -> VerifierResult<Fr> {
        let root = tree::build(self.depth, commitments)?;
        self.verify_with_root(&root, proof, message, scope)
    }

    /// Verify a proof against a known root.
    pub fn verify_with_root(
        &self,
        expected_root: &Fr,
        proof: &MembershipProof,
        message: &str,
        scope: &str,
    ) -> VerifierResult<Fr> {
        if &proof.root != expected_root {
            return Err(VerifierError::StaleGroupState);
        }

        if proof.message != message_digest(message) || proof.scope != scope_digest(scope) {
            return Err(VerifierError::InvalidProof);
        }

        if !self.verify_proof(proof) {
            return Err(VerifierError::InvalidProof);
        }

        Ok(proof.nullifier)
    }

    /// Check the Groth16 proof over its own public inputs.
    pub fn verify_proof(&self, proof: &MembershipProof) -> bool {
        Groth16::<Bn254>::verify_with_processed_vk(
            &self.prepared_vk,
            &proof.public_inputs(),
            &proof.proof,
        )
        .unwrap_or(false)
    }

    /// Get a reference to the verifying key.
    pub fn verifying_key(&self) -> &VerifyingKey<Bn254> {
        &self.verifying_key
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Serialize the verifying key with a 4-byte little-endian depth prefix.
    pub fn to_bytes(&self) -> VerifierResult<Vec<u8>> {
        let mut bytes = (self.depth as u32).to_le_bytes().to_vec();
        self.verifying_key
            .serialize_compressed(&mut bytes)
            .map_err(|e| VerifierError::SerializationError(e.to_string()))?;
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> VerifierResult<Self> {
        let (depth, body) = split_depth_prefix(bytes).map_err(VerifierError::SerializationError)?;
        let vk = VerifyingKey::deserialize_compressed(body)
            .map_err(|e| VerifierError::SerializationError(e.to_string()))?;
        Self::new(vk, depth)
    }

    /// Save verifying key to file.
    pub fn save(&self, path: &Path) -> VerifierResult<()> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    /// Load verifier from file.
    pub fn load(path: &Path) -> VerifierResult<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }
}
