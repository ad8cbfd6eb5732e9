//! Groth16 proof generation for group membership proofs.

use ark_bn254::{Bn254, Fr};
use ark_groth16::{Groth16, PreparedVerifyingKey, ProvingKey, VerifyingKey};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_snark::SNARK;
use ark_std::rand::{rngs::StdRng, CryptoRng, RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::circuit::MembershipCircuit;
use crate::identity::Identity;
use crate::merkle::hash::{decimal_to_field, field_to_decimal};
use crate::merkle::tree::{GroupTree, MerklePath, TreeError, MAX_DEPTH};

/// Result type for prover operations.
pub type ProverResult<T> = Result<T, ProverError>;

/// Length of the depth prefix on serialized keys.
pub const DEPTH_PREFIX_BYTES: usize = 4;

/// Errors that can occur during proving.
#[derive(Debug, thiserror::Error)]
pub enum ProverError {
    #[error("Trusted setup failed: {0}")]
    SetupFailed(String),

    #[error("Proof generation failed: {0}")]
    ProofGenerationFailed(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Group has no members")]
    EmptyGroup,

    #[error("Identity is not a member of the group")]
    NotAMember,

    #[error("Generated proof failed local verification")]
    SelfCheckFailed,

    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// Groth16 proof of group membership, with its public inputs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ProofPayload", into = "ProofPayload")]
pub struct MembershipProof {
    /// Accumulator root the proof was generated against.
    pub root: Fr,
    /// `Poseidon(scope, secret)`.
    pub nullifier: Fr,
    /// Digest of the message the proof is bound to.
    pub message: Fr,
    /// Digest of the scope (target) the proof is bound to.
    pub scope: Fr,
    /// The Groth16 proof.
    pub proof: ark_groth16::Proof<Bn254>,
}

impl MembershipProof {
    /// Public inputs in circuit allocation order.
    pub fn public_inputs(&self) -> [Fr; 4] {
        [self.root, self.nullifier, self.message, self.scope]
    }
}

/// JSON wire form of a [`MembershipProof`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProofPayload {
    pub root: String,
    pub nullifier: String,
    pub message: String,
    pub scope: String,
    /// Hex of the compressed Groth16 proof.
    pub proof: String,
}

impl TryFrom<ProofPayload> for MembershipProof {
    type Error = ProverError;

    fn try_from(payload: ProofPayload) -> Result<Self, Self::Error> {
        let field = |name: &str, value: &str| {
            decimal_to_field(value)
                .ok_or_else(|| ProverError::SerializationError(format!("invalid {}", name)))
        };
        let proof_bytes = hex::decode(&payload.proof)
            .map_err(|e| ProverError::SerializationError(e.to_string()))?;
        let proof = ark_groth16::Proof::<Bn254>::deserialize_compressed(&proof_bytes[..])
            .map_err(|e| ProverError::SerializationError(e.to_string()))?;

        Ok(Self {
            root: field("root", &payload.root)?,
            nullifier: field("nullifier", &payload.nullifier)?,
            message: field("message", &payload.message)?,
            scope: field("scope", &payload.scope)?,
            proof,
        })
    }
}

impl From<MembershipProof> for ProofPayload {
    fn from(proof: MembershipProof) -> Self {
        let mut bytes = Vec::new();
        // Writing a valid proof into a Vec cannot fail.
        let _ = proof.proof.serialize_compressed(&mut bytes);
        Self {
            root: field_to_decimal(&proof.root),
            nullifier: field_to_decimal(&proof.nullifier),
            message: field_to_decimal(&proof.message),
            scope: field_to_decimal(&proof.scope),
            proof: hex::encode(bytes),
        }
    }
}

/// Prover for generating group membership proofs.
pub struct Prover {
    /// Groth16 proving key.
    proving_key: ProvingKey<Bn254>,
    /// Prepared verifying key for the self-check.
    prepared_vk: PreparedVerifyingKey<Bn254>,
    /// Tree depth this prover was set up for.
    depth: usize,
}

impl Prover {
    /// Perform circuit-specific setup for a given tree depth.
    ///
    /// Uses a fixed seed so repeated setups yield identical keys. Deployments
    /// should run setup once and distribute the saved keys.
    pub fn setup(depth: usize) -> ProverResult<(Self, VerifyingKey<Bn254>)> {
        let mut rng = StdRng::seed_from_u64(0xDEADBEEF);
        Self::setup_with_rng(depth, &mut rng)
    }

    /// Perform setup with caller-supplied randomness.
    pub fn setup_with_rng<R: RngCore + CryptoRng>(
        depth: usize,
        rng: &mut R,
    ) -> ProverResult<(Self, VerifyingKey<Bn254>)> {
        if depth == 0 || depth > MAX_DEPTH {
            return Err(TreeError::InvalidDepth(depth).into());
        }
        let circuit = MembershipCircuit::new_empty(depth);

        let (pk, vk) = Groth16::<Bn254>::circuit_specific_setup(circuit, rng)
            .map_err(|e| ProverError::SetupFailed(e.to_string()))?;

        Ok((Self::from_proving_key(pk, depth)?, vk))
    }

    fn from_proving_key(proving_key: ProvingKey<Bn254>, depth: usize) -> ProverResult<Self> {
        let prepared_vk = Groth16::<Bn254>::process_vk(&proving_key.vk)
            .map_err(|e| ProverError::SetupFailed(e.to_string()))?;
        Ok(Self {
            proving_key,
            prepared_vk,
            depth,
        })
    }

    /// Prove that `identity` is a member of the group with these ordered
    /// commitments, bound to `message` and `scope` digests.
    pub fn prove(
        &self,
        identity: &Identity,
        commitments: &[Fr],
        message: Fr,
        scope: Fr,
    ) -> ProverResult<MembershipProof> {
        if commitments.is_empty() {
            return Err(ProverError::EmptyGroup);
        }

        let tree = GroupTree::new(self.depth, commitments.to_vec())?;
        let path = tree
            .get_path_for_leaf(&identity.commitment())
            .ok_or(ProverError::NotAMember)?;

        self.prove_with_path(identity, &path, tree.root(), message, scope)
    }

    /// Generate a proof given a pre-computed Merkle path.
    pub fn prove_with_path(
        &self,
        identity: &Identity,
        path: &MerklePath,
        root: Fr,
        message: Fr,
        scope: Fr,
    ) -> ProverResult<MembershipProof> {
        let nullifier = identity.nullifier(&scope);
        let circuit =
            MembershipCircuit::new_with_witness(identity.secret(), path, root, nullifier, message, scope);

        // Ensure path depth matches prover setup
        if circuit.depth() != self.depth {
            return Err(ProverError::ProofGenerationFailed(format!(
                "Path depth {} doesn't match prover setup depth {}",
                circuit.depth(),
                self.depth
            )));
        }

        let mut rng = StdRng::from_entropy();
        let proof = Groth16::<Bn254>::prove(&self.proving_key, circuit, &mut rng)
            .map_err(|e| ProverError::ProofGenerationFailed(e.to_string()))?;

        let proof = MembershipProof {
            root,
            nullifier,
            message,
            scope,
            proof,
        };

        let valid = Groth16::<Bn254>::verify_with_processed_vk(
            &self.prepared_vk,
            &proof.public_inputs(),
            &proof.proof,
        )
        .map_err(|_| ProverError::SelfCheckFailed)?;
        if !valid {
            return Err(ProverError::SelfCheckFailed);
        }

        Ok(proof)
    }

    /// Get the tree depth this prover was set up for.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// The verifying key matching this prover.
    pub fn verifying_key(&self) -> &VerifyingKey<Bn254> {
        &self.proving_key.vk
    }

    /// Serialize the proving key with a 4-byte little-endian depth prefix.
    pub fn proving_key_bytes(&self) -> ProverResult<Vec<u8>> {
        let mut bytes = (self.depth as u32).to_le_bytes().to_vec();
        self.proving_key
            .serialize_compressed(&mut bytes)
            .map_err(|e| ProverError::SerializationError(e.to_string()))?;
        Ok(bytes)
    }

    /// Load a prover from [`Prover::proving_key_bytes`] output.
    pub fn from_bytes(bytes: &[u8]) -> ProverResult<Self> {
        let (depth, body) = split_depth_prefix(bytes)
            .map_err(ProverError::SerializationError)?;
        let pk = ProvingKey::deserialize_compressed(body)
            .map_err(|e| ProverError::SerializationError(e.to_string()))?;
        Self::from_proving_key(pk, depth)
    }

    /// Save proving key to file.
    pub fn save_proving_key(&self, path: &Path) -> ProverResult<()> {
        std::fs::write(path, self.proving_key_bytes()?)?;
        Ok(())
    }

    /// Load proving key from file.
    pub fn load_proving_key(path: &Path) -> ProverResult<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }
}

/// Split a depth-prefixed key file into its depth and key bytes.
pub fn split_depth_prefix(bytes: &[u8]) -> Result<(usize, &[u8]), String> {
    if bytes.len() < DEPTH_PREFIX_BYTES {
        return Err("key file too short".into());
    }
    let (prefix, body) = bytes.split_at(DEPTH_PREFIX_BYTES);
    let depth = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
    if depth == 0 || depth > MAX_DEPTH {
        return Err(format!("key file declares invalid depth {}", depth));
    }
    Ok((depth, body))
}
