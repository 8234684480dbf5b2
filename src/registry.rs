use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::error::Rejected;
use crate::model::{ConnectionId, Ms, ResourceId, SlotKey, SoftLock, TimeInterval};

/// Default soft-lock TTL: long enough for a human to decide, short
/// enough to recover from vanished clients.
pub const DEFAULT_LOCK_TTL_MS: Ms = 3 * 60_000;

/// Transient map of "currently being selected" slots.
///
/// Purely advisory: the commit path never consults it. Its only job is
/// reducing the odds that two users attempt the same slot, so it is
/// in-memory, instance-local, and lost on restart by design.
pub struct SoftLockRegistry {
    locks: DashMap<(ResourceId, SlotKey), SoftLock>,
    ttl_ms: Ms,
}

impl SoftLockRegistry {
    pub fn new(ttl_ms: Ms) -> Self {
        Self {
            locks: DashMap::new(),
            ttl_ms,
        }
    }

    fn expired(&self, lock: &SoftLock, now: Ms) -> bool {
        now - lock.acquired_at >= self.ttl_ms
    }

    /// Acquire the lock for `(resource, slot)`.
    ///
    /// The DashMap entry holds its shard lock across check-and-insert, so
    /// two concurrent acquires for the same key strictly serialize and
    /// exactly one wins. Re-acquiring by the current holder refreshes the
    /// TTL instead of failing.
    pub fn acquire(
        &self,
        resource_id: ResourceId,
        slot: SlotKey,
        holder: ConnectionId,
        now: Ms,
    ) -> Result<SoftLock, Rejected> {
        match self.locks.entry((resource_id, slot)) {
            Entry::Occupied(mut e) => {
                let current = e.get();
                if current.holder == holder || self.expired(current, now) {
                    let lock = SoftLock {
                        resource_id,
                        slot,
                        holder,
                        acquired_at: now,
                    };
                    e.insert(lock.clone());
                    Ok(lock)
                } else {
                    Err(Rejected::AlreadyLocked { resource_id, slot })
                }
            }
            Entry::Vacant(v) => {
                let lock = SoftLock {
                    resource_id,
                    slot,
                    holder,
                    acquired_at: now,
                };
                v.insert(lock.clone());
                Ok(lock)
            }
        }
    }

    /// Release a lock. Returns `Ok(true)` if a lock was actually removed,
    /// `Ok(false)` if the slot was already free (idempotent no-op for
    /// double-click and disconnect races). Releasing someone else's lock
    /// is refused — a slow client must not free another user's slot.
    pub fn release(
        &self,
        resource_id: ResourceId,
        slot: SlotKey,
        holder: ConnectionId,
    ) -> Result<bool, Rejected> {
        match self.locks.entry((resource_id, slot)) {
            Entry::Occupied(e) => {
                if e.get().holder != holder {
                    return Err(Rejected::NotHolder);
                }
                e.remove();
                Ok(true)
            }
            Entry::Vacant(_) => Ok(false),
        }
    }

    /// Drop every lock held by a connection. Called on disconnect.
    pub fn release_all(&self, holder: ConnectionId) -> Vec<(ResourceId, SlotKey)> {
        let mut released = Vec::new();
        self.locks.retain(|key, lock| {
            if lock.holder == holder {
                released.push(*key);
                false
            } else {
                true
            }
        });
        released
    }

    /// Remove every lock whose slot is covered by a committed interval.
    /// A booking supersedes the advisory layer for its whole range.
    /// Sweep cost scales with held locks, not interval length.
    pub fn release_covering(
        &self,
        resource_id: ResourceId,
        interval: &TimeInterval,
    ) -> Vec<SlotKey> {
        let mut released = Vec::new();
        self.locks.retain(|&(rid, slot), _| {
            if rid == resource_id && slot.overlaps(interval) {
                released.push(slot);
                false
            } else {
                true
            }
        });
        released.sort_by_key(|s| (s.day, s.slot));
        released
    }

    /// TTL sweep. Expiry is indistinguishable from an explicit release
    /// for observers: the caller emits the same unlock event per key.
    pub fn expire_stale(&self, now: Ms) -> Vec<(ResourceId, SlotKey)> {
        let mut expired = Vec::new();
        self.locks.retain(|key, lock| {
            if self.expired(lock, now) {
                expired.push(*key);
                false
            } else {
                true
            }
        });
        expired
    }

    pub fn active_count(&self) -> usize {
        self.locks.len()
    }

    pub fn get(&self, resource_id: ResourceId, slot: SlotKey) -> Option<SoftLock> {
        self.locks.get(&(resource_id, slot)).map(|e| e.clone())
    }
}
