//! Durable state on sled: groups, targets, member commitments, submissions.
//!
//! Member lists use three kinds of keys per group:
//! - `e:{group}:{index}` -> commitment bytes
//! - `i:{group}:` + commitment bytes -> index
//! - `l:{group}` -> number of members
//!
//! An append writes all three keys in one sled batch under the group's lock.
//! Readers load the length first and then exactly that many entries. An index
//! key at or past the length is a leftover and is overwritten on the next
//! append of that commitment.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use ark_bn254::Fr;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::group::{validate_commitment, AppendOutcome, GroupInfo};
use crate::merkle::hash::{field_from_bytes, field_to_bytes, FIELD_BYTES};

/// Errors that can occur with durable storage.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sled::Error),

    #[error("record encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("unknown group: {0}")]
    UnknownGroup(String),

    #[error("group {group_id} is full ({capacity} members)")]
    GroupFull { group_id: String, capacity: u64 },

    #[error("commitment must be a non-zero field element")]
    InvalidCommitment,

    #[error("a submission with this nullifier already exists for the target")]
    Duplicate,
}

pub type StorageResult<T> = Result<T, StorageError>;

/// A review target. The directory itself lives elsewhere; only existence is checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    pub name: String,
}

/// An accepted submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub id: Uuid,
    pub target_id: String,
    pub group_id: String,
    pub nullifier: [u8; FIELD_BYTES],
    pub content: String,
    /// Unix milliseconds.
    pub created_at: u64,
}

pub struct Storage {
    db: Db,
    groups: Tree,
    targets: Tree,
    members: Tree,
    submissions: Tree,
    append_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Storage {
    pub fn open(path: &Path) -> StorageResult<Self> {
        info!("Opening storage at {:?}", path);
        let db = sled::Config::new().path(path).open()?;
        Self::from_db(db)
    }

    /// Storage that is deleted on drop.
    pub fn temporary() -> StorageResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> StorageResult<Self> {
        Ok(Self {
            groups: db.open_tree("groups")?,
            targets: db.open_tree("targets")?,
            members: db.open_tree("members")?,
            submissions: db.open_tree("submissions")?,
            db,
            append_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Insert or update configured groups and targets.
    pub fn seed(&self, groups: &[GroupInfo], targets: &[Target]) -> StorageResult<()> {
        for group in groups {
            self.put_group(group)?;
        }
        for target in targets {
            self.put_target(target)?;
        }
        debug!(groups = groups.len(), targets = targets.len(), "Seeded storage");
        Ok(())
    }

    pub fn put_group(&self, group: &GroupInfo) -> StorageResult<()> {
        self.groups.insert(group.id.as_bytes(), bincode::serialize(group)?)?;
        Ok(())
    }

    pub fn group(&self, group_id: &str) -> StorageResult<Option<GroupInfo>> {
        match self.groups.get(group_id.as_bytes())? {
            Some(raw) => Ok(Some(bincode::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    /// All groups, ordered by id.
    pub fn groups(&self) -> StorageResult<Vec<GroupInfo>> {
        self.groups
            .iter()
            .values()
            .map(|raw| -> StorageResult<GroupInfo> { Ok(bincode::deserialize(&raw?)?) })
            .collect()
    }

    /// Groups whose domain matches exactly.
    pub fn groups_for_domain(&self, domain: &str) -> StorageResult<Vec<GroupInfo>> {
        Ok(self
            .groups()?
            .into_iter()
            .filter(|g| g.domain == domain)
            .collect())
    }

    pub fn put_target(&self, target: &Target) -> StorageResult<()> {
        self.targets.insert(target.id.as_bytes(), bincode::serialize(target)?)?;
        Ok(())
    }

    pub fn target(&self, target_id: &str) -> StorageResult<Option<Target>> {
        match self.targets.get(target_id.as_bytes())? {
            Some(raw) => Ok(Some(bincode::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    fn append_lock(&self, group_id: &str) -> Arc<Mutex<()>> {
        self.append_locks
            .lock()
            .entry(group_id.to_string())
            .or_default()
            .clone()
    }

    /// Append a commitment to a group, idempotently.
    pub fn append_commitment(
        &self,
        group_id: &str,
        commitment: &Fr,
        capacity: u64,
    ) -> StorageResult<AppendOutcome> {
        validate_commitment(commitment).map_err(|_| StorageError::InvalidCommitment)?;
        if self.group(group_id)?.is_none() {
            return Err(StorageError::UnknownGroup(group_id.to_string()));
        }

        let lock = self.append_lock(group_id);
        let _guard = lock.lock();

        let bytes = field_to_bytes(commitment);
        let index = self.member_count(group_id)?;
        if let Some(raw) = self.members.get(index_key(group_id, &bytes))? {
            let existing = decode_u64(&raw)?;
            if existing < index {
                return Ok(AppendOutcome::AlreadyPresent(existing));
            }
            warn!(group_id, existing, len = index, "Ignoring member index past the list length");
        }

        if index >= capacity {
            return Err(StorageError::GroupFull {
                group_id: group_id.to_string(),
                capacity,
            });
        }

        let mut batch = sled::Batch::default();
        batch.insert(entry_key(group_id, index), &bytes[..]);
        batch.insert(index_key(group_id, &bytes), &index.to_be_bytes()[..]);
        batch.insert(len_key(group_id), &(index + 1).to_be_bytes()[..]);
        self.members.apply_batch(batch)?;

        debug!(group_id, index, "Appended commitment");
        Ok(AppendOutcome::Appended(index))
    }

    pub fn member_count(&self, group_id: &str) -> StorageResult<u64> {
        match self.members.get(len_key(group_id))? {
            Some(raw) => decode_u64(&raw),
            None => Ok(0),
        }
    }

    /// Consistent snapshot of a group's commitments in append order.
    pub fn commitments(&self, group_id: &str) -> StorageResult<Vec<Fr>> {
        let len = self.member_count(group_id)?;
        let mut commitments = Vec::with_capacity(len as usize);
        for index in 0..len {
            let raw = self
                .members
                .get(entry_key(group_id, index))?
                .ok_or_else(|| StorageError::Corrupt(format!("missing member {} of {}", index, group_id)))?;
            let commitment = field_from_bytes(&raw)
                .ok_or_else(|| StorageError::Corrupt(format!("bad commitment {} of {}", index, group_id)))?;
            commitments.push(commitment);
        }
        Ok(commitments)
    }

    /// Insert a submission unless one exists for `(target_id, nullifier)`.
    ///
    /// A single compare-and-swap from absent, so concurrent duplicates
    /// produce exactly one winner.
    pub fn insert_submission(&self, record: &SubmissionRecord) -> StorageResult<()> {
        let key = submission_key(&record.target_id, &record.nullifier);
        let value = bincode::serialize(record)?;
        match self
            .submissions
            .compare_and_swap(key, None as Option<&[u8]>, Some(value))?
        {
            Ok(()) => Ok(()),
            Err(_) => Err(StorageError::Duplicate),
        }
    }

    pub fn submission(
        &self,
        target_id: &str,
        nullifier: &[u8; FIELD_BYTES],
    ) -> StorageResult<Option<SubmissionRecord>> {
        match self.submissions.get(submission_key(target_id, nullifier))? {
            Some(raw) => Ok(Some(bincode::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.len()
    }

    pub fn flush(&self) -> StorageResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

fn entry_key(group_id: &str, index: u64) -> Vec<u8> {
    let mut key = format!("e:{}:", group_id).into_bytes();
    key.extend_from_slice(&index.to_be_bytes());
    key
}

fn index_key(group_id: &str, commitment: &[u8; FIELD_BYTES]) -> Vec<u8> {
    let mut key = format!("i:{}:", group_id).into_bytes();
    key.extend_from_slice(commitment);
    key
}

fn len_key(group_id: &str) -> Vec<u8> {
    format!("l:{}", group_id).into_bytes()
}

fn submission_key(target_id: &str, nullifier: &[u8; FIELD_BYTES]) -> Vec<u8> {
    format!("{}:{}", target_id, hex::encode(nullifier)).into_bytes()
}

fn decode_u64(raw: &[u8]) -> StorageResult<u64> {
    let bytes: [u8; 8] = raw
        .try_into()
        .map_err(|_| StorageError::Corrupt("expected 8-byte counter".into()))?;
    Ok(u64::from_be_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> Storage {
        let storage = Storage::temporary().unwrap();
        storage
            .seed(
                &[
                    GroupInfo {
                        id: "acme".into(),
                        name: "Acme".into(),
                        domain: "acme.com".into(),
                    },
                    GroupInfo {
                        id: "globex".into(),
                        name: "Globex".into(),
                        domain: "globex.com".into(),
                    },
                ],
                &[Target {
                    id: "fund-1".into(),
                    name: "Fund One".into(),
                }],
            )
            .unwrap();
        storage
    }

    fn record(target_id: &str, nullifier: u8) -> SubmissionRecord {
        SubmissionRecord {
            id: Uuid::new_v4(),
            target_id: target_id.into(),
            group_id: "acme".into(),
            nullifier: [nullifier; FIELD_BYTES],
            content: "a review of reasonable length".into(),
            created_at: 1,
        }
    }

    #[test]
    fn test_seeded_lookups() {
        let storage = storage();
        assert_eq!(storage.group("acme").unwrap().unwrap().domain, "acme.com");
        assert!(storage.group("nope").unwrap().is_none());
        assert_eq!(storage.groups().unwrap().len(), 2);
        assert_eq!(storage.groups_for_domain("globex.com").unwrap()[0].id, "globex");
        assert!(storage.target("fund-1").unwrap().is_some());
        assert!(storage.target("fund-2").unwrap().is_none());
    }

    #[test]
    fn test_append_order_and_idempotence() {
        let storage = storage();
        let c: Vec<Fr> = (1..=3u64).map(Fr::from).collect();

        for (i, commitment) in c.iter().enumerate() {
            assert_eq!(
                storage.append_commitment("acme", commitment, 16).unwrap(),
                AppendOutcome::Appended(i as u64)
            );
        }
        assert_eq!(
            storage.append_commitment("acme", &c[1], 16).unwrap(),
            AppendOutcome::AlreadyPresent(1)
        );

        assert_eq!(storage.commitments("acme").unwrap(), c);
        assert!(storage.commitments("globex").unwrap().is_empty());
    }

    #[test]
    fn test_append_over_leftover_keys() {
        let storage = storage();
        let c = Fr::from(7u64);
        let bytes = field_to_bytes(&c);

        // Entry and index written without the length bump.
        storage.members.insert(entry_key("acme", 0), &bytes[..]).unwrap();
        storage
            .members
            .insert(index_key("acme", &bytes), &0u64.to_be_bytes()[..])
            .unwrap();
        assert!(storage.commitments("acme").unwrap().is_empty());

        assert_eq!(
            storage.append_commitment("acme", &c, 16).unwrap(),
            AppendOutcome::Appended(0)
        );
        assert_eq!(storage.commitments("acme").unwrap(), vec![c]);
        assert_eq!(
            storage.append_commitment("acme", &c, 16).unwrap(),
            AppendOutcome::AlreadyPresent(0)
        );
    }

    #[test]
    fn test_append_rejections() {
        let storage = storage();
        assert!(matches!(
            storage.append_commitment("acme", &Fr::from(0u64), 16),
            Err(StorageError::InvalidCommitment)
        ));
        assert!(matches!(
            storage.append_commitment("nope", &Fr::from(1u64), 16),
            Err(StorageError::UnknownGroup(_))
        ));

        storage.append_commitment("acme", &Fr::from(1u64), 2).unwrap();
        storage.append_commitment("acme", &Fr::from(2u64), 2).unwrap();
        assert!(matches!(
            storage.append_commitment("acme", &Fr::from(3u64), 2),
            Err(StorageError::GroupFull { capacity: 2, .. })
        ));
    }

    #[test]
    fn test_concurrent_appends_are_dense() {
        let storage = Arc::new(storage());
        let handles: Vec<_> = (1..=16u64)
            .map(|i| {
                let storage = storage.clone();
                std::thread::spawn(move || {
                    storage.append_commitment("acme", &Fr::from(i), 64).unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let commitments = storage.commitments("acme").unwrap();
        assert_eq!(commitments.len(), 16);
        for (i, c) in commitments.iter().enumerate() {
            assert_eq!(
                storage.append_commitment("acme", c, 64).unwrap(),
                AppendOutcome::AlreadyPresent(i as u64)
            );
        }
    }

    #[test]
    fn test_submission_uniqueness() {
        let storage = storage();
        storage.insert_submission(&record("fund-1", 1)).unwrap();

        assert!(matches!(
            storage.insert_submission(&record("fund-1", 1)),
            Err(StorageError::Duplicate)
        ));
        // Same nullifier, other target.
        storage.insert_submission(&record("fund-2", 1)).unwrap();
        assert_eq!(storage.submission_count(), 2);
        assert!(storage.submission("fund-1", &[1u8; FIELD_BYTES]).unwrap().is_some());
    }

    #[test]
    fn test_concurrent_duplicate_has_one_winner() {
        let storage = Arc::new(storage());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let storage = storage.clone();
                std::thread::spawn(move || storage.insert_submission(&record("fund-1", 7)).is_ok())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(storage.submission_count(), 1);
    }
}
