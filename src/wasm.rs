//! WASM bindings for the client side of zk-review
//!
//! Identity handling, root computation and Groth16 proof generation, exposed
//! to JavaScript via wasm-bindgen. Verification stays on the server.

use std::sync::Mutex;

use wasm_bindgen::prelude::*;

use crate::identity::Identity;
use crate::merkle::hash::{decimal_to_field, field_to_decimal, message_digest, scope_digest};
use crate::merkle::tree;
use crate::prover::{ProofPayload, Prover};

// Initialize panic hook for better error messages in browser console
#[wasm_bindgen(start)]
pub fn init() {
    console_error_panic_hook::set_once();
}

// ============== PROVER STATE ==============

/// Proving key fetched from `/params/proving-key`.
static PROVER: Mutex<Option<Prover>> = Mutex::new(None);

// ============== RESULT TYPES ==============

/// Membership proof result for JavaScript
#[wasm_bindgen]
pub struct MembershipProofResult {
    success: bool,
    proof_json: String,
    nullifier: String,
    error: Option<String>,
}

impl MembershipProofResult {
    fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            proof_json: String::new(),
            nullifier: String::new(),
            error: Some(error.into()),
        }
    }
}

#[wasm_bindgen]
impl MembershipProofResult {
    #[wasm_bindgen(getter)]
    pub fn success(&self) -> bool {
        self.success
    }

    /// The `proof` object of a `POST /submissions` body.
    #[wasm_bindgen(getter)]
    pub fn proof_json(&self) -> String {
        self.proof_json.clone()
    }

    #[wasm_bindgen(getter)]
    pub fn nullifier(&self) -> String {
        self.nullifier.clone()
    }

    #[wasm_bindgen(getter)]
    pub fn error(&self) -> Option<String> {
        self.error.clone()
    }
}

// ============== IDENTITY ==============

/// Generate a fresh identity. Returns the exported secret; store it locally.
#[wasm_bindgen]
pub fn generate_identity() -> String {
    Identity::create().export()
}

/// Commitment of an exported identity, as a decimal string.
#[wasm_bindgen]
pub fn identity_commitment(exported: &str) -> Result<String, JsValue> {
    let identity = Identity::import(exported).map_err(|e| JsValue::from_str(&e.to_string()))?;
    Ok(identity.commitment_string())
}

// ============== TREE ==============

fn parse_commitments(commitments_json: &str) -> Result<Vec<ark_bn254::Fr>, String> {
    let decimals: Vec<String> =
        serde_json::from_str(commitments_json).map_err(|e| format!("Invalid commitments: {}", e))?;
    decimals
        .iter()
        .map(|d| decimal_to_field(d).ok_or_else(|| format!("Invalid commitment: {}", d)))
        .collect()
}

/// Root over a JSON array of decimal commitments, in the order the server
/// returned them.
#[wasm_bindgen]
pub fn compute_root(commitments_json: &str, depth: usize) -> Result<String, JsValue> {
    let leaves = parse_commitments(commitments_json).map_err(|e| JsValue::from_str(&e))?;
    let root = tree::build(depth, &leaves).map_err(|e| JsValue::from_str(&e.to_string()))?;
    Ok(field_to_decimal(&root))
}

// ============== PROVING ==============

/// Load the depth-prefixed proving key. Returns the tree depth it was made for.
#[wasm_bindgen]
pub fn load_proving_key(bytes: &[u8]) -> Result<usize, JsValue> {
    let prover = Prover::from_bytes(bytes).map_err(|e| JsValue::from_str(&e.to_string()))?;
    let depth = prover.depth();
    let mut state = PROVER
        .lock()
        .map_err(|_| JsValue::from_str("Prover state poisoned"))?;
    *state = Some(prover);
    Ok(depth)
}

#[wasm_bindgen]
pub fn is_prover_ready() -> bool {
    PROVER.lock().map(|state| state.is_some()).unwrap_or(false)
}

/// Prove membership for a review of `target_id` with exactly `content`.
#[wasm_bindgen]
pub fn prove_membership(
    exported_identity: &str,
    commitments_json: &str,
    content: &str,
    target_id: &str,
) -> MembershipProofResult {
    let identity = match Identity::import(exported_identity) {
        Ok(identity) => identity,
        Err(e) => return MembershipProofResult::failure(e.to_string()),
    };
    let commitments = match parse_commitments(commitments_json) {
        Ok(commitments) => commitments,
        Err(e) => return MembershipProofResult::failure(e),
    };

    let state = match PROVER.lock() {
        Ok(state) => state,
        Err(_) => return MembershipProofResult::failure("Prover state poisoned"),
    };
    let prover = match state.as_ref() {
        Some(p) => p,
        None => {
            return MembershipProofResult::failure(
                "Prover not initialized. Call load_proving_key() first.",
            )
        }
    };

    let proof = match prover.prove(
        &identity,
        &commitments,
        message_digest(content),
        scope_digest(target_id),
    ) {
        Ok(proof) => proof,
        Err(e) => return MembershipProofResult::failure(format!("Proof generation failed: {}", e)),
    };

    let nullifier = field_to_decimal(&proof.nullifier);
    match serde_json::to_string(&ProofPayload::from(proof)) {
        Ok(proof_json) => MembershipProofResult {
            success: true,
            proof_json,
            nullifier,
            error: None,
        },
        Err(e) => MembershipProofResult::failure(e.to_string()),
    }
}

// ============== UTILITIES ==============

/// Get version info
#[wasm_bindgen]
pub fn get_version() -> String {
    format!("zk-review WASM v{} (Groth16/BN254)", env!("CARGO_PKG_VERSION"))
}

/// SHA-256 of `input` reduced into the scalar field, as a decimal string.
#[wasm_bindgen]
pub fn hash_to_field(input: &str) -> String {
    field_to_decimal(&message_digest(input))
}
