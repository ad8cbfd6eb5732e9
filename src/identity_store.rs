//! Owned `groupId -> Identity` store with change notifications.
//!
//! Observers register a callback and receive an [`IdentityEvent`] after every
//! change. When opened on a path, the store rewrites its JSON file on each
//! change, keyed by group id with base64-exported secrets as values.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::identity::{Identity, IdentityError};

/// Errors that can occur with the identity store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("identity file is malformed: {0}")]
    Format(#[from] serde_json::Error),

    #[error("identity for group {group_id} is invalid: {source}")]
    Identity {
        group_id: String,
        source: IdentityError,
    },
}

/// Change notification delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityEvent {
    Saved { group_id: String },
    Removed { group_id: String },
}

/// Handle returned by [`IdentityStore::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Box<dyn Fn(&IdentityEvent) + Send + Sync>;

#[derive(Default)]
pub struct IdentityStore {
    identities: BTreeMap<String, Identity>,
    observers: Vec<(SubscriptionId, Callback)>,
    next_subscription: u64,
    path: Option<PathBuf>,
}

impl IdentityStore {
    /// In-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a file-backed store, loading existing identities if the file exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let mut identities = BTreeMap::new();

        if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let exported: BTreeMap<String, String> = serde_json::from_str(&raw)?;
            for (group_id, secret) in exported {
                let identity = Identity::import(&secret).map_err(|source| StoreError::Identity {
                    group_id: group_id.clone(),
                    source,
                })?;
                identities.insert(group_id, identity);
            }
            debug!(path = %path.display(), count = identities.len(), "Loaded identities");
        }

        Ok(Self {
            identities,
            path: Some(path),
            ..Self::default()
        })
    }

    pub fn get(&self, group_id: &str) -> Option<&Identity> {
        self.identities.get(group_id)
    }

    /// Group ids with a stored identity, in sorted order.
    pub fn group_ids(&self) -> impl Iterator<Item = &str> {
        self.identities.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Store an identity for a group, replacing any previous one.
    pub fn save(&mut self, group_id: &str, identity: Identity) -> Result<(), StoreError> {
        self.identities.insert(group_id.to_string(), identity);
        self.persist()?;
        self.notify(&IdentityEvent::Saved {
            group_id: group_id.to_string(),
        });
        Ok(())
    }

    /// Remove a group's identity. Returns the removed identity, if any.
    pub fn remove(&mut self, group_id: &str) -> Result<Option<Identity>, StoreError> {
        let removed = self.identities.remove(group_id);
        if removed.is_some() {
            self.persist()?;
            self.notify(&IdentityEvent::Removed {
                group_id: group_id.to_string(),
            });
        }
        Ok(removed)
    }

    /// Register a callback invoked after every change.
    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: Fn(&IdentityEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.observers.push((id, Box::new(callback)));
        id
    }

    /// Drop a subscription. Returns false if it was not registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(sub, _)| *sub != id);
        self.observers.len() != before
    }

    fn notify(&self, event: &IdentityEvent) {
        for (_, callback) in &self.observers {
            callback(event);
        }
    }

    fn persist(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let exported: BTreeMap<&str, String> = self
            .identities
            .iter()
            .map(|(group_id, identity)| (group_id.as_str(), identity.export()))
            .collect();
        let json = serde_json::to_string_pretty(&exported)?;

        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}
