//! Poseidon hash and field-element codecs shared by client and server.
//!
//! Every root, commitment and nullifier in the system is a BN254 scalar
//! produced by the sponge configured here, so both sides must agree on these
//! parameters bit-for-bit.

use std::str::FromStr;
use std::sync::OnceLock;

use ark_bn254::Fr;
use ark_crypto_primitives::sponge::{
    poseidon::{find_poseidon_ark_and_mds, PoseidonConfig, PoseidonSponge},
    CryptographicSponge,
};
use ark_ff::{BigInteger, PrimeField};
use ark_serialize::CanonicalDeserialize;
use ark_std::vec::Vec;
use sha2::{Digest, Sha256};

/// Size of a compressed field element.
pub const FIELD_BYTES: usize = 32;

/// Longest decimal rendering of a BN254 scalar.
const MAX_DECIMAL_DIGITS: usize = 78;

static POSEIDON_CONFIG: OnceLock<PoseidonConfig<Fr>> = OnceLock::new();

/// Poseidon parameters for the BN254 scalar field.
///
/// Width 3 (rate 2, capacity 1), 8 full rounds, 57 partial rounds, x^5 S-box,
/// round constants and MDS matrix from the Grain LFSR.
pub fn poseidon_config() -> &'static PoseidonConfig<Fr> {
    POSEIDON_CONFIG.get_or_init(|| {
        let full_rounds = 8;
        let partial_rounds = 57;
        let alpha = 5;
        let rate = 2;

        let (ark, mds) = find_poseidon_ark_and_mds::<Fr>(
            u64::from(Fr::MODULUS_BIT_SIZE),
            rate,
            full_rounds,
            partial_rounds,
            0,
        );

        PoseidonConfig {
            full_rounds: full_rounds as usize,
            partial_rounds: partial_rounds as usize,
            alpha,
            ark,
            mds,
            rate,
            capacity: 1,
        }
    })
}

/// Hash domains. The tag seeds the sponge's capacity element, so hashes from
/// different domains never coincide even for equal inputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Domain {
    /// Merkle tree nodes and zero hashes.
    Node = 1,
    /// `commitment = H(secret)`.
    Commitment = 2,
    /// `nullifier = H(scope, secret)`.
    Nullifier = 3,
}

impl Domain {
    pub fn tag(self) -> Fr {
        Fr::from(self as u64)
    }
}

/// Poseidon hasher configured for BN254 scalar field.
#[derive(Clone, Copy)]
pub struct PoseidonHasher {
    config: &'static PoseidonConfig<Fr>,
}

impl PoseidonHasher {
    pub fn new() -> Self {
        Self {
            config: poseidon_config(),
        }
    }

    /// Hash two child nodes into their parent.
    pub fn hash_two(&self, left: &Fr, right: &Fr) -> Fr {
        self.hash(Domain::Node, &[*left, *right])
    }

    /// Commitment to an identity secret.
    pub fn commitment(&self, secret: &Fr) -> Fr {
        self.hash(Domain::Commitment, &[*secret])
    }

    /// Nullifier of a secret within a scope.
    pub fn nullifier(&self, scope: &Fr, secret: &Fr) -> Fr {
        self.hash(Domain::Nullifier, &[*scope, *secret])
    }

    /// Hash field elements within a domain.
    pub fn hash(&self, domain: Domain, elements: &[Fr]) -> Fr {
        let mut sponge = PoseidonSponge::new(self.config);
        sponge.state[0] = domain.tag();
        for elem in elements {
            sponge.absorb(elem);
        }
        let output: Vec<Fr> = sponge.squeeze_field_elements(1);
        output[0]
    }

    /// Get the underlying Poseidon configuration.
    pub fn config(&self) -> &'static PoseidonConfig<Fr> {
        self.config
    }
}

impl Default for PoseidonHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Reduce big-endian bytes into a field element.
pub fn bytes_to_field(bytes: &[u8]) -> Fr {
    Fr::from_be_bytes_mod_order(bytes)
}

/// SHA-256 a string and reduce the digest into the field.
pub fn string_to_field(s: &str) -> Fr {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    bytes_to_field(&hasher.finalize())
}

/// Digest of a submission's content, bound into a proof as its message.
pub fn message_digest(content: &str) -> Fr {
    string_to_field(content)
}

/// Digest of a target identifier, used as the nullifier scope.
pub fn scope_digest(target_id: &str) -> Fr {
    string_to_field(target_id)
}

/// Canonical 32-byte encoding of a field element.
pub fn field_to_bytes(f: &Fr) -> [u8; FIELD_BYTES] {
    let mut bytes = [0u8; FIELD_BYTES];
    for (dst, src) in bytes.iter_mut().zip(f.into_bigint().to_bytes_le()) {
        *dst = src;
    }
    bytes
}

/// Decode a canonical 32-byte encoding. Non-canonical values are rejected.
pub fn field_from_bytes(bytes: &[u8]) -> Option<Fr> {
    if bytes.len() != FIELD_BYTES {
        return None;
    }
    Fr::deserialize_compressed(bytes).ok()
}

/// Render a field element as its canonical decimal string.
pub fn field_to_decimal(f: &Fr) -> String {
    f.into_bigint().to_string()
}

/// Parse a canonical decimal string (no sign, no leading zeros, below the
/// modulus) into a field element.
pub fn decimal_to_field(s: &str) -> Option<Fr> {
    if s.is_empty() || s.len() > MAX_DECIMAL_DIGITS || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if s.len() > 1 && s.starts_with('0') {
        return None;
    }
    let value = Fr::from_str(s).ok()?;
    // Values at or above the modulus reduce silently; the round-trip catches them.
    (field_to_decimal(&value) == s).then_some(value)
}
