//! zk-review - one anonymous review per group member
//!
//! Members of an email-domain group publish a Poseidon commitment to a secret.
//! To post a review about a target they prove, with Groth16 over BN254, that
//! their commitment is a leaf of the group's Merkle tree, without saying which
//! leaf. The proof also binds a per-target nullifier, so the server accepts at
//! most one review per member per target.
//!
//! # Flow
//!
//! 1. Email ownership is checked with a stateless HMAC challenge
//! 2. The client registers `commitment = H(secret)` in a group
//! 3. The client fetches the group's commitments and proves membership locally
//! 4. The server checks the root, verifies the proof and gates on
//!    `nullifier = H(scope, secret)`

pub mod challenge;
pub mod circuit;
pub mod group;
pub mod identity;
pub mod identity_store;
pub mod merkle;
pub mod prover;
pub mod verifier;

#[cfg(feature = "server")]
pub mod api;
#[cfg(feature = "server")]
pub mod config;
#[cfg(feature = "server")]
pub mod gate;
#[cfg(feature = "server")]
pub mod pool;
#[cfg(feature = "server")]
pub mod service;
#[cfg(feature = "server")]
pub mod storage;

// WASM bindings (only compiled when wasm feature is enabled)
#[cfg(feature = "wasm")]
pub mod wasm;

pub use challenge::{Challenge, ChallengeError, ChallengeIssuer};
pub use group::GroupInfo;
pub use identity::Identity;
pub use identity_store::IdentityStore;
pub use merkle::{GroupTree, MerklePath, PoseidonHasher};
pub use prover::{MembershipProof, Prover};
pub use verifier::Verifier;

#[cfg(feature = "server")]
pub use service::{ReviewService, ServiceError};
