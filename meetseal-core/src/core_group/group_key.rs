//! Group key material and the bounded epoch cache

use crate::core_crypto::SymmetricKey;
use hashlink::LruCache;

/// Shared symmetric group key for one epoch
#[derive(Debug, Clone)]
pub struct GroupKey {
    pub epoch: u64,
    pub key: SymmetricKey,
    /// Milliseconds since the Unix epoch
    pub created_at: u64,
}

/// The current group key plus a bounded LRU of superseded epochs
///
/// Superseded keys are retained so messages encrypted under the
/// outgoing epoch that arrive after a rotation still decrypt; eviction
/// beyond the bound keeps memory flat and limits how far back a
/// compromised process can read.
pub struct EpochKeyCache {
    current: Option<GroupKey>,
    superseded: LruCache<u64, SymmetricKey>,
}

impl EpochKeyCache {
    /// `capacity` bounds the number of superseded epochs retained
    pub fn new(capacity: usize) -> Self {
        Self { current: None, superseded: LruCache::new(capacity.max(1)) }
    }

    /// Install `key` as current, demoting the previous current epoch
    /// into the superseded cache
    pub fn install(&mut self, key: GroupKey) {
        if let Some(old) = self.current.take() {
            if old.epoch != key.epoch {
                self.superseded.insert(old.epoch, old.key);
            }
        }
        // Drop any stale superseded entry for the incoming epoch.
        self.superseded.remove(&key.epoch);
        self.current = Some(key);
    }

    /// Insert a key for an epoch older than current without demoting
    /// anything (late-arriving envelope)
    pub fn insert_superseded(&mut self, epoch: u64, key: SymmetricKey) {
        self.superseded.insert(epoch, key);
    }

    pub fn current(&self) -> Option<&GroupKey> {
        self.current.as_ref()
    }

    pub fn current_epoch(&self) -> Option<u64> {
        self.current.as_ref().map(|k| k.epoch)
    }

    /// Key for `epoch`, checking current first then the superseded set
    pub fn key_for_epoch(&self, epoch: u64) -> Option<&SymmetricKey> {
        match &self.current {
            Some(current) if current.epoch == epoch => Some(&current.key),
            _ => self.superseded.peek(&epoch),
        }
    }

    pub fn superseded_len(&self) -> usize {
        self.superseded.len()
    }

    /// Drop all key material (retry-from-scratch path)
    pub fn reset(&mut self) {
        self.current = None;
        self.superseded.clear();
    }
}
