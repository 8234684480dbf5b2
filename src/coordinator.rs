use std::sync::Arc;

use tracing::{debug, info};

use crate::broadcast::BroadcastChannel;
use crate::error::Rejected;
use crate::model::*;
use crate::observability;
use crate::registry::SoftLockRegistry;
use crate::store::BookingStore;
use crate::validate;

/// Ties the three layers together: the advisory soft-lock registry, the
/// authoritative booking store, and the broadcast bus. All client-facing
/// operations go through here so that every state change emits its
/// events exactly once, in order.
pub struct ReservationCoordinator {
    store: Arc<BookingStore>,
    registry: SoftLockRegistry,
    broadcast: Arc<BroadcastChannel>,
}

impl ReservationCoordinator {
    pub fn new(
        store: Arc<BookingStore>,
        registry: SoftLockRegistry,
        broadcast: Arc<BroadcastChannel>,
    ) -> Self {
        Self {
            store,
            registry,
            broadcast,
        }
    }

    pub fn subscribe(&self, conn: ConnectionId) -> tokio::sync::mpsc::UnboundedReceiver<ServerEvent> {
        self.broadcast.subscribe(conn)
    }

    fn update_lock_gauge(&self) {
        metrics::gauge!(observability::SOFT_LOCKS_ACTIVE)
            .set(self.registry.active_count() as f64);
    }

    /// One `BookingChanged` per UTC day whose calendar view the interval
    /// changes: the first day and, for intervals crossing midnight, the
    /// last.
    fn broadcast_booking_changed(&self, resource_id: ResourceId, interval: &TimeInterval) {
        let first = interval.start.div_euclid(DAY_MS);
        let last = (interval.end - 1).div_euclid(DAY_MS);
        self.broadcast
            .send_all(&ServerEvent::BookingChanged { resource_id, day: first });
        if last != first {
            self.broadcast
                .send_all(&ServerEvent::BookingChanged { resource_id, day: last });
        }
    }

    // ── Soft-lock protocol ───────────────────────────────────────

    /// Acquire the advisory lock on a slot. On success everyone except
    /// the acquirer hears `LockChanged { locked: true }`; the acquirer
    /// learns the outcome from the reply instead.
    pub fn request_lock(
        &self,
        resource_id: ResourceId,
        slot: SlotKey,
        conn: ConnectionId,
    ) -> Result<SoftLock, Rejected> {
        if !self.store.resource_exists(resource_id) {
            return Err(Rejected::not_found(resource_id));
        }
        let lock = self
            .registry
            .acquire(resource_id, slot, conn, validate::now_ms())?;
        debug!(%resource_id, %slot, %conn, "soft lock acquired");
        self.broadcast.send_to_others(
            conn,
            &ServerEvent::LockChanged {
                resource_id,
                slot,
                locked: true,
            },
        );
        self.update_lock_gauge();
        Ok(lock)
    }

    /// Release an advisory lock. Broadcasts only when something was
    /// actually freed; a no-op release stays silent.
    pub fn request_unlock(
        &self,
        resource_id: ResourceId,
        slot: SlotKey,
        conn: ConnectionId,
    ) -> Result<bool, Rejected> {
        let released = self.registry.release(resource_id, slot, conn)?;
        if released {
            debug!(%resource_id, %slot, %conn, "soft lock released");
            self.broadcast.send_to_others(
                conn,
                &ServerEvent::LockChanged {
                    resource_id,
                    slot,
                    locked: false,
                },
            );
            self.update_lock_gauge();
        }
        Ok(released)
    }

    // ── Commit / cancel ──────────────────────────────────────────

    /// Commit a booking. Soft-lock state is deliberately not consulted:
    /// the authoritative overlap check decides, and any advisory locks
    /// covering the committed range are superseded afterwards.
    pub async fn commit(
        &self,
        resource_id: ResourceId,
        owner: MemberId,
        interval: TimeInterval,
        conn: ConnectionId,
    ) -> Result<Booking, Rejected> {
        let now = validate::now_ms();
        validate::check_start_not_past(&interval, now)?;

        let booking = match self.store.insert(resource_id, owner, interval, now).await {
            Ok(b) => b,
            Err(e) => {
                if matches!(e, Rejected::Overlap { .. }) {
                    metrics::counter!(observability::COMMIT_CONFLICTS_TOTAL).increment(1);
                }
                // Failed commits leave locks and observers untouched.
                return Err(e);
            }
        };

        for slot in self.registry.release_covering(resource_id, &interval) {
            self.broadcast.send_all(&ServerEvent::LockChanged {
                resource_id,
                slot,
                locked: false,
            });
        }
        self.update_lock_gauge();
        // Everyone, committer included: the committer's view of those
        // days is stale the same way everyone else's is.
        self.broadcast_booking_changed(resource_id, &interval);
        info!(booking = %booking.id, %resource_id, %conn, "booking committed");
        Ok(booking)
    }

    /// Cancel a booking (owner or admin). Observers hear the same
    /// `BookingChanged` as for a commit and re-fetch.
    pub async fn cancel(&self, booking_id: BookingId, actor: &Actor) -> Result<Booking, Rejected> {
        let booking = self.store.delete(booking_id, actor).await?;
        self.broadcast_booking_changed(booking.resource_id, &booking.interval);
        info!(booking = %booking.id, member = %actor.member, "booking cancelled");
        Ok(booking)
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Drop everything a vanished connection held and tell the others.
    pub fn disconnect(&self, conn: ConnectionId) {
        let released = self.registry.release_all(conn);
        if !released.is_empty() {
            debug!(%conn, count = released.len(), "releasing locks on disconnect");
        }
        for (resource_id, slot) in released {
            self.broadcast.send_to_others(
                conn,
                &ServerEvent::LockChanged {
                    resource_id,
                    slot,
                    locked: false,
                },
            );
        }
        self.broadcast.unsubscribe(conn);
        self.update_lock_gauge();
    }

    /// TTL sweep. Each reclaimed lock is announced exactly like an
    /// explicit release.
    pub fn expire_stale_locks(&self, now: Ms) -> usize {
        let expired = self.registry.expire_stale(now);
        let count = expired.len();
        for (resource_id, slot) in expired {
            self.broadcast.send_all(&ServerEvent::LockChanged {
                resource_id,
                slot,
                locked: false,
            });
        }
        if count > 0 {
            metrics::counter!(observability::LOCKS_EXPIRED_TOTAL).increment(count as u64);
            self.update_lock_gauge();
        }
        count
    }

    // ── Queries ──────────────────────────────────────────────────

    /// Advisory pre-check against a snapshot. A pass here is not a
    /// promise; the commit re-validates under the write lock.
    pub async fn check_availability(
        &self,
        resource_id: ResourceId,
        interval: TimeInterval,
    ) -> Result<(), Rejected> {
        validate::check_start_not_past(&interval, validate::now_ms())?;
        let cal = self
            .store
            .calendar(resource_id)
            .ok_or_else(|| Rejected::not_found(resource_id))?;
        let guard = cal.read().await;
        validate::check_overlap(&guard, &interval, None)
    }

    pub async fn bookings(&self, resource_id: ResourceId) -> Result<Vec<Booking>, Rejected> {
        self.store.list_active(resource_id).await
    }

    pub async fn member_bookings(&self, member: &MemberId) -> Vec<Booking> {
        self.store.bookings_for_member(member).await
    }

    pub async fn resources(&self) -> Vec<ResourceInfo> {
        self.store.list_resources().await
    }

    pub async fn register_resource(
        &self,
        id: ResourceId,
        name: String,
        kind: ResourceKind,
    ) -> Result<ResourceInfo, Rejected> {
        self.store.register_resource(id, name, kind).await
    }

    pub async fn remove_resource(&self, id: ResourceId) -> Result<(), Rejected> {
        self.store.remove_resource(id).await
    }
}
