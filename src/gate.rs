//! Submission gate: content bounds plus one accepted submission per
//! `(target, nullifier)`.

use std::sync::Arc;

use ark_bn254::Fr;
use tracing::{info, warn};
use uuid::Uuid;

use crate::challenge::now_millis;
use crate::merkle::hash::field_to_bytes;
use crate::storage::{Storage, StorageError, SubmissionRecord};

pub const MIN_CONTENT_CHARS: usize = 10;
pub const MAX_CONTENT_CHARS: usize = 5000;

/// Errors that can occur when accepting a submission.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("{0}")]
    Validation(String),

    #[error("a submission for this target has already been made")]
    DuplicateSubmission,

    #[error(transparent)]
    Storage(StorageError),
}

impl From<StorageError> for GateError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Duplicate => GateError::DuplicateSubmission,
            other => GateError::Storage(other),
        }
    }
}

/// Check content bounds. Returns the trimmed content.
pub fn validate_content(content: &str) -> Result<&str, GateError> {
    let trimmed = content.trim();
    let chars = trimmed.chars().count();

    if chars < MIN_CONTENT_CHARS {
        return Err(GateError::Validation(format!(
            "content must be at least {} characters",
            MIN_CONTENT_CHARS
        )));
    }
    if chars > MAX_CONTENT_CHARS {
        return Err(GateError::Validation(format!(
            "content must be at most {} characters",
            MAX_CONTENT_CHARS
        )));
    }
    if trimmed
        .chars()
        .any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t'))
    {
        return Err(GateError::Validation(
            "content contains control characters".into(),
        ));
    }
    Ok(trimmed)
}

#[derive(Clone)]
pub struct SubmissionGate {
    storage: Arc<Storage>,
}

impl SubmissionGate {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Validate and persist a submission.
    ///
    /// The uniqueness check and the insert are one atomic operation.
    pub fn accept(
        &self,
        target_id: &str,
        group_id: &str,
        nullifier: &Fr,
        content: &str,
    ) -> Result<Uuid, GateError> {
        let content = validate_content(content)?;

        let record = SubmissionRecord {
            id: Uuid::new_v4(),
            target_id: target_id.to_string(),
            group_id: group_id.to_string(),
            nullifier: field_to_bytes(nullifier),
            content: content.to_string(),
            created_at: now_millis(),
        };

        match self.storage.insert_submission(&record) {
            Ok(()) => {
                info!(target_id, group_id, submission_id = %record.id, "Accepted submission");
                Ok(record.id)
            }
            Err(e) => {
                let e = GateError::from(e);
                if matches!(e, GateError::DuplicateSubmission) {
                    warn!(target_id, group_id, "Rejected duplicate submission");
                }
                Err(e)
            }
        }
    }
}
