//! Server-side flows: challenge issuance, registration, group snapshots and
//! gated submissions.

use std::sync::Arc;

use ark_bn254::Fr;
use axum::body::Bytes;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::challenge::{ChallengeError, ChallengeIssuer, CodeSender, LogSender};
use crate::gate::{validate_content, GateError, SubmissionGate};
use crate::group::{email_domain, normalize_email, parse_commitment, GroupInfo};
use crate::merkle::tree;
use crate::pool::{PoolError, VerificationPool};
use crate::prover::MembershipProof;
use crate::storage::{Storage, StorageError};
use crate::verifier::{Verifier, VerifierError};

/// Errors surfaced by the service, one variant per caller-visible outcome.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("email address is malformed")]
    InvalidEmail,

    #[error("no group accepts this email domain")]
    NoEligibleGroup,

    #[error(transparent)]
    Challenge(#[from] ChallengeError),

    #[error("unknown group: {0}")]
    UnknownGroup(String),

    #[error("unknown target: {0}")]
    UnknownTarget(String),

    #[error("email domain does not match the group")]
    DomainMismatch,

    #[error("commitment must be a canonical non-zero decimal field element")]
    InvalidCommitment,

    #[error("group is full")]
    GroupFull,

    #[error("group state changed; refetch commitments and prove again")]
    StaleGroupState,

    #[error("invalid proof")]
    InvalidProof,

    #[error("a submission for this target has already been made")]
    DuplicateSubmission,

    #[error("{0}")]
    Validation(String),

    #[error("verification unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StorageError> for ServiceError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Duplicate => ServiceError::DuplicateSubmission,
            StorageError::UnknownGroup(id) => ServiceError::UnknownGroup(id),
            StorageError::GroupFull { .. } => ServiceError::GroupFull,
            StorageError::InvalidCommitment => ServiceError::InvalidCommitment,
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

impl From<GateError> for ServiceError {
    fn from(e: GateError) -> Self {
        match e {
            GateError::Validation(msg) => ServiceError::Validation(msg),
            GateError::DuplicateSubmission => ServiceError::DuplicateSubmission,
            GateError::Storage(e) => e.into(),
        }
    }
}

impl From<PoolError> for ServiceError {
    fn from(e: PoolError) -> Self {
        ServiceError::Unavailable(e.to_string())
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// A challenge as returned to the caller. The code is only sent out of band.
#[derive(Debug, Clone)]
pub struct IssuedChallenge {
    pub token: String,
    pub expires_at: u64,
    pub eligible_groups: Vec<GroupInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub verified_email: String,
    pub group_id: String,
    pub index: u64,
    pub already_registered: bool,
}

/// A group's commitments in canonical order with the matching root.
#[derive(Debug, Clone)]
pub struct GroupSnapshot {
    pub group_id: String,
    pub root: Fr,
    pub commitments: Vec<Fr>,
}

pub struct ReviewService {
    storage: Arc<Storage>,
    issuer: ChallengeIssuer,
    sender: Arc<dyn CodeSender>,
    verifier: Arc<Verifier>,
    pool: VerificationPool,
    gate: SubmissionGate,
    proving_key: Option<Bytes>,
}

impl ReviewService {
    pub fn new(
        storage: Arc<Storage>,
        issuer: ChallengeIssuer,
        verifier: Verifier,
        pool: VerificationPool,
    ) -> Self {
        Self {
            gate: SubmissionGate::new(storage.clone()),
            storage,
            issuer,
            sender: Arc::new(LogSender::default()),
            verifier: Arc::new(verifier),
            pool,
            proving_key: None,
        }
    }

    pub fn with_sender(mut self, sender: Arc<dyn CodeSender>) -> Self {
        self.sender = sender;
        self
    }

    /// Serve these proving-key bytes to clients.
    pub fn with_proving_key(mut self, bytes: Vec<u8>) -> Self {
        self.proving_key = Some(Bytes::from(bytes));
        self
    }

    pub fn tree_depth(&self) -> usize {
        self.verifier.depth()
    }

    fn capacity(&self) -> u64 {
        1u64 << self.tree_depth()
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Issue a challenge for an email whose domain has at least one group.
    pub fn request_challenge(&self, email: &str) -> ServiceResult<IssuedChallenge> {
        let email = normalize_email(email).map_err(|_| ServiceError::InvalidEmail)?;
        let domain = email_domain(&email).ok_or(ServiceError::InvalidEmail)?;

        let eligible_groups = self.storage.groups_for_domain(domain)?;
        if eligible_groups.is_empty() {
            debug!(domain, "No group for email domain");
            return Err(ServiceError::NoEligibleGroup);
        }

        let challenge = self.issuer.issue(&email);
        self.sender.send(&email, &challenge);

        Ok(IssuedChallenge {
            token: challenge.token,
            expires_at: challenge.expires_at,
            eligible_groups,
        })
    }

    /// Check code possession. Returns the verified (lowercased) email.
    pub fn confirm(&self, token: &str, email: &str, code: &str) -> ServiceResult<String> {
        self.issuer.verify(token, email.trim(), code.trim()).map_err(|e| {
            warn!(error = %e, "Challenge rejected");
            ServiceError::from(e)
        })
    }

    /// Confirm a challenge and register a commitment in one of the email's groups.
    pub fn register(
        &self,
        token: &str,
        email: &str,
        code: &str,
        group_id: &str,
        commitment: &str,
    ) -> ServiceResult<Registration> {
        let verified_email = self.confirm(token, email, code)?;

        let group = self
            .storage
            .group(group_id)?
            .ok_or_else(|| ServiceError::UnknownGroup(group_id.to_string()))?;
        if !group.admits(&verified_email) {
            warn!(group_id, "Registration rejected: email domain does not match group");
            return Err(ServiceError::DomainMismatch);
        }

        let commitment = parse_commitment(commitment).map_err(|_| ServiceError::InvalidCommitment)?;
        let outcome = self
            .storage
            .append_commitment(group_id, &commitment, self.capacity())?;

        info!(
            group_id,
            index = outcome.index(),
            already_registered = outcome.already_registered(),
            "Registered commitment"
        );

        Ok(Registration {
            verified_email,
            group_id: group_id.to_string(),
            index: outcome.index(),
            already_registered: outcome.already_registered(),
        })
    }

    pub fn group_snapshot(&self, group_id: &str) -> ServiceResult<GroupSnapshot> {
        if self.storage.group(group_id)?.is_none() {
            return Err(ServiceError::UnknownGroup(group_id.to_string()));
        }
        let commitments = self.storage.commitments(group_id)?;
        let root = tree::build(self.tree_depth(), &commitments)
            .map_err(|e| ServiceError::Internal(e.to_string()))?;
        Ok(GroupSnapshot {
            group_id: group_id.to_string(),
            root,
            commitments,
        })
    }

    /// Verify a membership proof and accept the submission.
    ///
    /// `content` is the exact string the proof's message digest was computed
    /// over; it is stored trimmed.
    pub async fn submit(
        &self,
        target_id: &str,
        group_id: &str,
        proof: MembershipProof,
        content: &str,
    ) -> ServiceResult<Uuid> {
        if self.storage.target(target_id)?.is_none() {
            return Err(ServiceError::UnknownTarget(target_id.to_string()));
        }
        if self.storage.group(group_id)?.is_none() {
            return Err(ServiceError::UnknownGroup(group_id.to_string()));
        }
        validate_content(content)?;

        let commitments = self.storage.commitments(group_id)?;
        let verifier = self.verifier.clone();
        let message = content.to_string();
        let scope = target_id.to_string();

        let verified = self
            .pool
            .run(move || verifier.verify(&commitments, &proof, &message, &scope))
            .await?;

        let nullifier = match verified {
            Ok(nullifier) => nullifier,
            Err(VerifierError::StaleGroupState) => {
                warn!(target_id, group_id, "Proof rejected: stale group state");
                return Err(ServiceError::StaleGroupState);
            }
            Err(VerifierError::InvalidProof) => {
                warn!(target_id, group_id, "Proof rejected: invalid proof");
                return Err(ServiceError::InvalidProof);
            }
            Err(e) => {
                warn!(target_id, group_id, error = %e, "Proof rejected");
                return Err(ServiceError::InvalidProof);
            }
        };

        Ok(self.gate.accept(target_id, group_id, &nullifier, content)?)
    }

    /// Depth-prefixed proving key, if configured.
    pub fn proving_key_bytes(&self) -> Option<Bytes> {
        self.proving_key.clone()
    }

    /// Depth-prefixed verifying key.
    pub fn verifying_key_bytes(&self) -> ServiceResult<Vec<u8>> {
        self.verifier
            .to_bytes()
            .map_err(|e| ServiceError::Internal(e.to_string()))
    }

    pub fn group_count(&self) -> ServiceResult<usize> {
        Ok(self.storage.groups()?.len())
    }

    /// Stop accepting verification work and flush storage.
    pub fn shutdown(&self) -> ServiceResult<()> {
        self.pool.shutdown();
        self.storage.flush()?;
        info!("Service shut down");
        Ok(())
    }
}
