//! Group membership circuit with a scoped nullifier.
//!
//! Proves knowledge of a `secret` such that:
//! - `Poseidon(secret)` is a leaf of the Merkle tree with root `root`
//! - `nullifier == Poseidon(scope, secret)`
//!
//! and binds `message` and `scope` as public inputs so a proof cannot be
//! replayed for other content or another target.

use ark_bn254::Fr;
use ark_crypto_primitives::sponge::{
    constraints::CryptographicSpongeVar,
    poseidon::{constraints::PoseidonSpongeVar, PoseidonConfig},
};
use ark_r1cs_std::{
    alloc::AllocVar, boolean::Boolean, eq::EqGadget, fields::fp::FpVar, fields::FieldVar,
    select::CondSelectGadget,
};
use ark_relations::r1cs::{ConstraintSynthesizer, ConstraintSystemRef, SynthesisError};
use ark_std::vec::Vec;

use crate::merkle::hash::{Domain, PoseidonHasher};
use crate::merkle::tree::MerklePath;

/// Number of public inputs, in allocation order: root, nullifier, message, scope.
pub const NUM_PUBLIC_INPUTS: usize = 4;

/// Circuit for proving group membership.
///
/// Public inputs (in order):
/// - `root`: accumulator root of the group
/// - `nullifier`: `Poseidon(scope, secret)`
/// - `message`: digest of the submitted content
/// - `scope`: digest of the target identifier
///
/// Private witnesses:
/// - `secret`: the identity secret
/// - `path`: sibling hashes from the commitment leaf to the root
/// - `path_indices`: direction indicators (false=left, true=right)
#[derive(Clone)]
pub struct MembershipCircuit {
    pub poseidon_config: PoseidonConfig<Fr>,

    /// Private: identity secret.
    pub secret: Option<Fr>,
    /// Private: sibling hashes along the Merkle path.
    pub path: Vec<Option<Fr>>,
    /// Private: path direction indicators.
    pub path_indices: Vec<Option<bool>>,

    pub root: Option<Fr>,
    pub nullifier: Option<Fr>,
    pub message: Option<Fr>,
    pub scope: Option<Fr>,
}

impl MembershipCircuit {
    /// Create a circuit of the given depth for the setup phase.
    ///
    /// The witness is dummy but consistent, so the constraint system is
    /// satisfiable while only its shape matters.
    pub fn new_empty(depth: usize) -> Self {
        let hasher = PoseidonHasher::new();

        let secret = Fr::from(1u64);
        let scope = Fr::from(0u64);
        let path = vec![Fr::from(0u64); depth];
        let indices = vec![false; depth];

        let mut current = hasher.commitment(&secret);
        for sibling in &path {
            current = hasher.hash_two(&current, sibling);
        }

        Self {
            poseidon_config: hasher.config().clone(),
            secret: Some(secret),
            path: path.into_iter().map(Some).collect(),
            path_indices: indices.into_iter().map(Some).collect(),
            root: Some(current),
            nullifier: Some(hasher.nullifier(&scope, &secret)),
            message: Some(Fr::from(0u64)),
            scope: Some(scope),
        }
    }

    /// Create a circuit with actual witness values for proving.
    pub fn new_with_witness(
        secret: Fr,
        merkle_path: &MerklePath,
        root: Fr,
        nullifier: Fr,
        message: Fr,
        scope: Fr,
    ) -> Self {
        let hasher = PoseidonHasher::new();
        Self {
            poseidon_config: hasher.config().clone(),
            secret: Some(secret),
            path: merkle_path.siblings.iter().map(|s| Some(*s)).collect(),
            path_indices: merkle_path.indices.iter().map(|i| Some(*i)).collect(),
            root: Some(root),
            nullifier: Some(nullifier),
            message: Some(message),
            scope: Some(scope),
        }
    }

    /// Get the depth of this circuit.
    pub fn depth(&self) -> usize {
        self.path.len()
    }
}

impl ConstraintSynthesizer<Fr> for MembershipCircuit {
    fn generate_constraints(self, cs: ConstraintSystemRef<Fr>) -> Result<(), SynthesisError> {
        // Public inputs; allocation order fixes the verifier's input order.
        let root_var = FpVar::new_input(cs.clone(), || {
            self.root.ok_or(SynthesisError::AssignmentMissing)
        })?;
        let nullifier_var = FpVar::new_input(cs.clone(), || {
            self.nullifier.ok_or(SynthesisError::AssignmentMissing)
        })?;
        let message_var = FpVar::new_input(cs.clone(), || {
            self.message.ok_or(SynthesisError::AssignmentMissing)
        })?;
        let scope_var = FpVar::new_input(cs.clone(), || {
            self.scope.ok_or(SynthesisError::AssignmentMissing)
        })?;

        let secret_var = FpVar::new_witness(cs.clone(), || {
            self.secret.ok_or(SynthesisError::AssignmentMissing)
        })?;

        let path_vars: Vec<FpVar<Fr>> = self
            .path
            .iter()
            .map(|sibling| {
                FpVar::new_witness(cs.clone(), || {
                    sibling.ok_or(SynthesisError::AssignmentMissing)
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let index_vars: Vec<Boolean<Fr>> = self
            .path_indices
            .iter()
            .map(|idx| {
                Boolean::new_witness(cs.clone(), || {
                    idx.ok_or(SynthesisError::AssignmentMissing)
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        // commitment = Poseidon(secret)
        let mut current = poseidon_hash(
            cs.clone(),
            &self.poseidon_config,
            Domain::Commitment,
            &[&secret_var],
        )?;

        for (sibling, is_right) in path_vars.iter().zip(index_vars.iter()) {
            let left = FpVar::conditionally_select(is_right, sibling, &current)?;
            let right = FpVar::conditionally_select(is_right, &current, sibling)?;
            current = poseidon_hash(cs.clone(), &self.poseidon_config, Domain::Node, &[&left, &right])?;
        }
        current.enforce_equal(&root_var)?;

        let computed_nullifier = poseidon_hash(
            cs.clone(),
            &self.poseidon_config,
            Domain::Nullifier,
            &[&scope_var, &secret_var],
        )?;
        computed_nullifier.enforce_equal(&nullifier_var)?;

        // Tie message and scope into the constraint system so they cannot be
        // swapped without invalidating the proof.
        let _message_sq = message_var.square()?;
        let _scope_sq = scope_var.square()?;

        Ok(())
    }
}

/// In-circuit counterpart of [`PoseidonHasher::hash`].
fn poseidon_hash(
    cs: ConstraintSystemRef<Fr>,
    config: &PoseidonConfig<Fr>,
    domain: Domain,
    inputs: &[&FpVar<Fr>],
) -> Result<FpVar<Fr>, SynthesisError> {
    let mut sponge = PoseidonSpongeVar::new(cs, config);
    sponge.state[0] = FpVar::constant(domain.tag());
    for input in inputs {
        sponge.absorb(*input)?;
    }
    let output = sponge.squeeze_field_elements(1)?;
    Ok(output[0].clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merkle::hash::{message_digest, scope_digest};
    use crate::merkle::tree::GroupTree;
    use ark_relations::r1cs::ConstraintSystem;

    struct Fixture {
        secret: Fr,
        path: MerklePath,
        root: Fr,
        nullifier: Fr,
        message: Fr,
        scope: Fr,
    }

    fn fixture() -> Fixture {
        let hasher = PoseidonHasher::new();
        let secret = Fr::from(7777u64);
        let commitment = hasher.commitment(&secret);

        let mut leaves: Vec<Fr> = (1..=5u64).map(Fr::from).collect();
        leaves.insert(2, commitment);
        let tree = GroupTree::new(3, leaves).unwrap();

        let scope = scope_digest("target-1");
        Fixture {
            secret,
            path: tree.get_path(2).unwrap(),
            root: tree.root(),
            nullifier: hasher.nullifier(&scope, &secret),
            message: message_digest("a perfectly fine review"),
            scope,
        }
    }

    fn is_satisfied(circuit: MembershipCircuit) -> bool {
        let cs = ConstraintSystem::<Fr>::new_ref();
        circuit.generate_constraints(cs.clone()).unwrap();
        cs.is_satisfied().unwrap()
    }

    #[test]
    fn test_circuit_satisfiability() {
        let f = fixture();
        let circuit =
            MembershipCircuit::new_with_witness(f.secret, &f.path, f.root, f.nullifier, f.message, f.scope);
        assert_eq!(circuit.depth(), 3);
        assert!(is_satisfied(circuit));
    }

    #[test]
    fn test_empty_circuit_is_satisfiable() {
        let circuit = MembershipCircuit::new_empty(4);

        let cs = ConstraintSystem::<Fr>::new_ref();
        circuit.generate_constraints(cs.clone()).unwrap();

        assert!(cs.is_satisfied().unwrap());
        // Constant one plus four public inputs.
        assert_eq!(cs.num_instance_variables(), NUM_PUBLIC_INPUTS + 1);
    }

    #[test]
    fn test_circuit_with_wrong_root_fails() {
        let f = fixture();
        let circuit = MembershipCircuit::new_with_witness(
            f.secret,
            &f.path,
            Fr::from(999u64),
            f.nullifier,
            f.message,
            f.scope,
        );
        assert!(!is_satisfied(circuit));
    }

    #[test]
    fn test_circuit_with_wrong_nullifier_fails() {
        let f = fixture();
        let circuit = MembershipCircuit::new_with_witness(
            f.secret,
            &f.path,
            f.root,
            f.nullifier + Fr::from(1u64),
            f.message,
            f.scope,
        );
        assert!(!is_satisfied(circuit));
    }

    #[test]
    fn test_circuit_with_foreign_secret_fails() {
        let f = fixture();
        let other = Fr::from(8888u64);
        let nullifier = PoseidonHasher::new().nullifier(&f.scope, &other);
        let circuit =
            MembershipCircuit::new_with_witness(other, &f.path, f.root, nullifier, f.message, f.scope);
        assert!(!is_satisfied(circuit));
    }

    #[test]
    fn test_nullifier_bound_to_scope() {
        let f = fixture();
        let other_scope = scope_digest("target-2");
        let circuit = MembershipCircuit::new_with_witness(
            f.secret,
            &f.path,
            f.root,
            f.nullifier,
            f.message,
            other_scope,
        );
        assert!(!is_satisfied(circuit));
    }

    #[test]
    fn test_nullifier_from_another_domain_fails() {
        let f = fixture();
        let node_style = PoseidonHasher::new().hash_two(&f.scope, &f.secret);
        let circuit =
            MembershipCircuit::new_with_witness(f.secret, &f.path, f.root, node_style, f.message, f.scope);
        assert!(!is_satisfied(circuit));
    }
}
