//! Group metadata, email domain eligibility and commitment validation.
//!
//! The ordered member lists live in [`crate::storage::Storage`].

use ark_bn254::Fr;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::merkle::hash::decimal_to_field;

/// Errors that can occur with group membership.
#[derive(Debug, thiserror::Error)]
pub enum GroupError {
    #[error("commitment must be a canonical non-zero field element")]
    InvalidCommitment,

    #[error("email address is malformed")]
    InvalidEmail,
}

/// Result of appending a commitment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Newly appended at this index.
    Appended(u64),
    /// Already a member at this index; list and root are unchanged.
    AlreadyPresent(u64),
}

impl AppendOutcome {
    pub fn index(&self) -> u64 {
        match self {
            AppendOutcome::Appended(i) | AppendOutcome::AlreadyPresent(i) => *i,
        }
    }

    pub fn already_registered(&self) -> bool {
        matches!(self, AppendOutcome::AlreadyPresent(_))
    }
}

/// Group metadata as configured by the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub id: String,
    pub name: String,
    /// Email domain whose owners may join, lowercase without `@`.
    pub domain: String,
}

impl GroupInfo {
    /// Whether an already-lowercased email address may join this group.
    pub fn admits(&self, email: &str) -> bool {
        email_domain(email).is_some_and(|domain| domain == self.domain)
    }
}

/// Reject the zero element, which is reserved for empty leaves.
pub fn validate_commitment(commitment: &Fr) -> Result<(), GroupError> {
    if *commitment == Fr::from(0u64) {
        return Err(GroupError::InvalidCommitment);
    }
    Ok(())
}

/// Parse a commitment from its decimal wire form.
pub fn parse_commitment(s: &str) -> Result<Fr, GroupError> {
    let commitment = decimal_to_field(s).ok_or(GroupError::InvalidCommitment)?;
    validate_commitment(&commitment)?;
    Ok(commitment)
}

const EMAIL_PATTERN: &str = r"^[a-z0-9._%+\-]+@([a-z0-9\-]+(\.[a-z0-9\-]+)+)$";

/// Compiled email pattern; `None` only if the pattern fails to compile,
/// in which case every address is treated as malformed.
fn email_regex() -> Option<&'static Regex> {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(EMAIL_PATTERN).ok()).as_ref()
}

/// Trim and lowercase an email address, rejecting malformed ones.
pub fn normalize_email(email: &str) -> Result<String, GroupError> {
    let email = email.trim().to_lowercase();
    let regex = email_regex().ok_or(GroupError::InvalidEmail)?;
    if email.len() > 254 || !regex.is_match(&email) {
        return Err(GroupError::InvalidEmail);
    }
    Ok(email)
}

/// Domain part of a normalized email address.
pub fn email_domain(email: &str) -> Option<&str> {
    let captures = email_regex()?.captures(email)?;
    captures.get(1).map(|m| m.as_str())
}
