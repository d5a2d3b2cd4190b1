/*!
 * In-memory Key Store
 *
 * The authoritative set of keys: a map from identifier to sealed bytes behind
 * a single mutex. Each operation holds the lock only for the map access
 * itself; callers perform device work before or after, never inside.
 */

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::key_id::KeyId;
use super::material::SealedKey;
use super::rotation::RotationPolicy;
use crate::error::{KmsError, KmsResult};

/// Result of pruning the store by age
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PruneOutcome {
    /// Identifiers that were removed
    pub removed: Vec<KeyId>,
    /// Identifiers kept because they do not encode a creation time
    pub unparseable: Vec<KeyId>,
}

/// Concurrency-safe map of sealed keys
#[derive(Debug, Default)]
pub struct KeyStore {
    keys: Mutex<HashMap<KeyId, SealedKey>>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Every critical section leaves the map consistent, so a poisoned lock
    // is still safe to use.
    fn guard(&self) -> MutexGuard<'_, HashMap<KeyId, SealedKey>> {
        self.keys
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert or overwrite; returns the sealed bytes that were replaced
    pub fn insert(&self, key_id: KeyId, sealed: SealedKey) -> Option<SealedKey> {
        self.guard().insert(key_id, sealed)
    }

    pub fn lookup(&self, key_id: &KeyId) -> KmsResult<SealedKey> {
        self.guard()
            .get(key_id)
            .cloned()
            .ok_or_else(|| KmsError::key_not_found(key_id.as_str()))
    }

    pub fn delete(&self, key_id: &KeyId) -> KmsResult<()> {
        match self.guard().remove(key_id) {
            Some(_) => Ok(()),
            None => Err(KmsError::key_not_found(key_id.as_str())),
        }
    }

    /// Remove every record that `policy` considers expired at `now`.
    pub fn prune_older_than(&self, policy: &RotationPolicy, now: i64) -> PruneOutcome {
        let mut outcome = PruneOutcome::default();
        self.guard().retain(|key_id, _| match key_id.created_at() {
            Ok(created) if policy.is_expired(created, now) => {
                outcome.removed.push(key_id.clone());
                false
            }
            Ok(_) => true,
            Err(_) => {
                outcome.unparseable.push(key_id.clone());
                true
            }
        });
        outcome.removed.sort();
        outcome.unparseable.sort();
        outcome
    }

    pub fn contains(&self, key_id: &KeyId) -> bool {
        self.guard().contains_key(key_id)
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }

    /// Sorted snapshot of all identifiers
    pub fn key_ids(&self) -> Vec<KeyId> {
        let mut ids: Vec<KeyId> = self.guard().keys().cloned().collect();
        ids.sort();
        ids
    }
}
