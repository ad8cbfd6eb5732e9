//! Stateless email-ownership challenges.
//!
//! A challenge is a 6-digit code delivered out of band plus a token
//! `"<expiresAt>.<hex tag>"` returned to the caller, where the tag is
//! HMAC-SHA256 over `"{email}|{code}|{expiresAt}"`. Verification recomputes the
//! tag, so the server keeps no per-challenge state.

use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use subtle::ConstantTimeEq;
use tracing::{info, warn};

type HmacSha256 = Hmac<Sha256>;

/// Minimum accepted signing key length.
pub const MIN_KEY_BYTES: usize = 32;

/// Hex length of an HMAC-SHA256 tag.
const TAG_HEX_LEN: usize = 64;

pub const CODE_MIN: u32 = 100_000;
pub const CODE_MAX: u32 = 999_999;

/// Errors that can occur when verifying a challenge.
///
/// Deliberately coarse: a wrong email and a wrong code are indistinguishable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChallengeError {
    #[error("invalid verification token")]
    InvalidToken,

    #[error("verification code expired")]
    Expired,

    #[error("invalid verification code")]
    InvalidCode,
}

/// Errors that can occur when constructing an issuer.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("challenge key is not valid hex")]
    NotHex,

    #[error("challenge key must be at least {MIN_KEY_BYTES} bytes, got {0}")]
    TooShort(usize),
}

/// A freshly issued challenge. `code` goes to the mailbox, the rest to the caller.
#[derive(Debug, Clone)]
pub struct Challenge {
    pub token: String,
    pub code: String,
    /// Unix milliseconds.
    pub expires_at: u64,
}

/// Issues and verifies challenges with a process-wide signing key.
pub struct ChallengeIssuer {
    /// HMAC state keyed once at construction; cloned per tag.
    mac: HmacSha256,
    ttl: Duration,
}

impl ChallengeIssuer {
    pub fn new(key: Vec<u8>, ttl: Duration) -> Result<Self, KeyError> {
        if key.len() < MIN_KEY_BYTES {
            return Err(KeyError::TooShort(key.len()));
        }
        let mac = HmacSha256::new_from_slice(&key).map_err(|_| KeyError::TooShort(key.len()))?;
        Ok(Self { mac, ttl })
    }

    /// Build from a hex-encoded key.
    pub fn from_hex(key: &str, ttl: Duration) -> Result<Self, KeyError> {
        let key = hex::decode(key.trim()).map_err(|_| KeyError::NotHex)?;
        Self::new(key, ttl)
    }

    /// Build with a random key. Challenges do not survive a restart.
    pub fn ephemeral(ttl: Duration) -> Result<Self, KeyError> {
        let key: [u8; MIN_KEY_BYTES] = rand::rngs::OsRng.gen();
        warn!("No challenge key configured; generated an ephemeral one");
        Self::new(key.to_vec(), ttl)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a challenge for an already-normalized email.
    pub fn issue(&self, email: &str) -> Challenge {
        self.issue_at(email, now_millis())
    }

    pub fn issue_at(&self, email: &str, now_ms: u64) -> Challenge {
        let code = rand::rngs::OsRng.gen_range(CODE_MIN..=CODE_MAX).to_string();
        let expires_at = now_ms.saturating_add(self.ttl.as_millis() as u64);
        let tag = self.tag(email, &code, expires_at);

        Challenge {
            token: format!("{}.{}", expires_at, hex::encode(tag)),
            code,
            expires_at,
        }
    }

    /// Verify a token, email and code. Returns the lowercased email.
    pub fn verify(&self, token: &str, email: &str, code: &str) -> Result<String, ChallengeError> {
        self.verify_at(token, email, code, now_millis())
    }

    pub fn verify_at(
        &self,
        token: &str,
        email: &str,
        code: &str,
        now_ms: u64,
    ) -> Result<String, ChallengeError> {
        let (expires_at, provided) = parse_token(token)?;

        if now_ms > expires_at {
            return Err(ChallengeError::Expired);
        }

        let expected = self.tag(email, code, expires_at);
        if !bool::from(expected.as_slice().ct_eq(provided.as_slice())) {
            return Err(ChallengeError::InvalidCode);
        }

        Ok(email.to_lowercase())
    }

    fn tag(&self, email: &str, code: &str, expires_at: u64) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(format!("{}|{}|{}", email.to_lowercase(), code, expires_at).as_bytes());
        mac.finalize().into_bytes().to_vec()
    }
}

fn parse_token(token: &str) -> Result<(u64, Vec<u8>), ChallengeError> {
    let mut parts = token.split('.');
    let (Some(expiry), Some(tag), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(ChallengeError::InvalidToken);
    };

    if expiry.is_empty() || !expiry.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ChallengeError::InvalidToken);
    }
    let expires_at: u64 = expiry.parse().map_err(|_| ChallengeError::InvalidToken)?;

    if tag.len() != TAG_HEX_LEN {
        return Err(ChallengeError::InvalidToken);
    }
    let tag = hex::decode(tag).map_err(|_| ChallengeError::InvalidToken)?;

    Ok((expires_at, tag))
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Out-of-band delivery of challenge codes.
pub trait CodeSender: Send + Sync {
    fn send(&self, email: &str, challenge: &Challenge);
}

/// Sender that only logs. Codes are logged when `reveal_codes` is set.
#[derive(Debug, Clone, Default)]
pub struct LogSender {
    pub reveal_codes: bool,
}

impl CodeSender for LogSender {
    fn send(&self, email: &str, challenge: &Challenge) {
        if self.reveal_codes {
            info!(email, code = %challenge.code, expires_at = challenge.expires_at, "Issued challenge");
        } else {
            info!(expires_at = challenge.expires_at, "Issued challenge");
        }
    }
}
