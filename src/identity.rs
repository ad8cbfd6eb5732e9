//! Holder-side identity: a private secret and its public commitment.

use ark_bn254::Fr;
use ark_ff::UniformRand;
use ark_std::rand::{CryptoRng, RngCore};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::fmt;

use crate::merkle::hash::{field_from_bytes, field_to_bytes, field_to_decimal, PoseidonHasher};

/// Errors that can occur when importing an identity.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("identity export is not valid base64")]
    InvalidEncoding,

    #[error("identity secret is not a canonical field element")]
    InvalidSecret,

    #[error("identity secret must be non-zero")]
    ZeroSecret,
}

/// A group member's identity.
///
/// Only `commitment` is ever shared. Regenerating produces an unrelated
/// identity.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    secret: Fr,
    commitment: Fr,
}

impl Identity {
    /// Generate a fresh identity from the OS CSPRNG.
    pub fn create() -> Self {
        Self::create_with_rng(&mut rand::rngs::OsRng)
    }

    pub fn create_with_rng<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        loop {
            let secret = Fr::rand(rng);
            if let Ok(identity) = Self::from_secret(secret) {
                return identity;
            }
        }
    }

    /// Rebuild an identity from a known secret.
    pub fn from_secret(secret: Fr) -> Result<Self, IdentityError> {
        if secret == Fr::from(0u64) {
            return Err(IdentityError::ZeroSecret);
        }
        Ok(Self {
            secret,
            commitment: commitment_of(&secret),
        })
    }

    pub fn secret(&self) -> Fr {
        self.secret
    }

    pub fn commitment(&self) -> Fr {
        self.commitment
    }

    /// Commitment in its wire form (decimal string).
    pub fn commitment_string(&self) -> String {
        field_to_decimal(&self.commitment)
    }

    /// Nullifier for a scope: `Poseidon(scope, secret)`.
    pub fn nullifier(&self, scope: &Fr) -> Fr {
        PoseidonHasher::new().nullifier(scope, &self.secret)
    }

    /// Export the secret as base64 of its 32-byte encoding.
    pub fn export(&self) -> String {
        STANDARD.encode(field_to_bytes(&self.secret))
    }

    /// Import an identity previously produced by [`Identity::export`].
    pub fn import(encoded: &str) -> Result<Self, IdentityError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|_| IdentityError::InvalidEncoding)?;
        let secret = field_from_bytes(&bytes).ok_or(IdentityError::InvalidSecret)?;
        Self::from_secret(secret)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("secret", &"<redacted>")
            .field("commitment", &field_to_decimal(&self.commitment))
            .finish()
    }
}

/// Public commitment for a secret: `Poseidon(secret)`.
pub fn commitment_of(secret: &Fr) -> Fr {
    PoseidonHasher::new().commitment(secret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_std::rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_create_derives_commitment() {
        let identity = Identity::create();
        assert_eq!(identity.commitment(), commitment_of(&identity.secret()));
        assert_ne!(identity.commitment(), Fr::from(0u64));
    }

    #[test]
    fn test_identities_are_unrelated() {
        let mut rng = StdRng::seed_from_u64(1);
        let a = Identity::create_with_rng(&mut rng);
        let b = Identity::create_with_rng(&mut rng);
        assert_ne!(a.secret(), b.secret());
        assert_ne!(a.commitment(), b.commitment());
    }

    #[test]
    fn test_export_import() {
        let identity = Identity::create();
        let exported = identity.export();
        let restored = Identity::import(&exported).unwrap();
        assert_eq!(identity, restored);
    }

    #[test]
    fn test_import_rejects_garbage() {
        assert!(matches!(Identity::import("not base64!"), Err(IdentityError::InvalidEncoding)));
        assert!(matches!(
            Identity::import(&STANDARD.encode([1u8; 8])),
            Err(IdentityError::InvalidSecret)
        ));
        assert!(matches!(
            Identity::import(&STANDARD.encode([0u8; 32])),
            Err(IdentityError::ZeroSecret)
        ));
    }

    #[test]
    fn test_nullifier_per_scope() {
        let identity = Identity::from_secret(Fr::from(42u64)).unwrap();
        let s1 = Fr::from(1u64);
        let s2 = Fr::from(2u64);
        assert_eq!(identity.nullifier(&s1), identity.nullifier(&s1));
        assert_ne!(identity.nullifier(&s1), identity.nullifier(&s2));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let identity = Identity::from_secret(Fr::from(123456789u64)).unwrap();
        let rendered = format!("{:?}", identity);
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("123456789"));
    }
}
