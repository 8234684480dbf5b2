use std::io;
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};

use crate::error::Rejected;
use crate::model::*;
use crate::validate;
use crate::wal::Wal;

pub type SharedCalendar = Arc<RwLock<Calendar>>;

// ── Group-commit WAL channel ─────────────────────────────────────

struct WalAppend {
    event: Event,
    response: oneshot::Sender<io::Result<()>>,
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalAppend>) {
    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        while let Ok(next) = rx.try_recv() {
            batch.push(next);
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
            .record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());

        for entry in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = entry.response.send(r);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[WalAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for entry in batch {
        if let Err(e) = wal.append_buffered(&entry.event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

// ── Booking store ────────────────────────────────────────────────

/// Durable, authoritative record of committed reservations.
///
/// Single writer path: the coordinator's commit/cancel operations. Each
/// resource's calendar sits behind its own RwLock; `insert` holds the
/// write lock across validate + WAL append + apply, so two overlapping
/// commits for one resource can never both succeed. Unrelated resources
/// never contend.
pub struct BookingStore {
    calendars: DashMap<ResourceId, SharedCalendar>,
    /// Reverse lookup: booking id → resource id, for O(1) cancel.
    booking_to_resource: DashMap<BookingId, ResourceId>,
    wal_tx: mpsc::Sender<WalAppend>,
}

impl BookingStore {
    /// Replay the WAL at `wal_path` and start the group-commit writer.
    pub fn open(wal_path: &Path) -> io::Result<Self> {
        let events = Wal::replay(wal_path)?;
        let wal = Wal::open(wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Self {
            calendars: DashMap::new(),
            booking_to_resource: DashMap::new(),
            wal_tx,
        };

        // Replay — sole owner of the Arcs here, try_write always succeeds.
        for event in events {
            match event {
                Event::ResourceRegistered { id, name, kind } => {
                    store
                        .calendars
                        .insert(id, Arc::new(RwLock::new(Calendar::new(id, name, kind))));
                }
                Event::ResourceRemoved { id } => {
                    if let Some((_, cal)) = store.calendars.remove(&id) {
                        let guard = cal.try_read().expect("replay: uncontended read");
                        for b in &guard.bookings {
                            store.booking_to_resource.remove(&b.id);
                        }
                    }
                }
                Event::BookingCommitted { booking } => {
                    if let Some(cal) = store.calendars.get(&booking.resource_id) {
                        let mut guard = cal.try_write().expect("replay: uncontended write");
                        store.booking_to_resource.insert(booking.id, booking.resource_id);
                        guard.insert_booking(booking);
                    }
                }
                Event::BookingCancelled { id, resource_id } => {
                    if let Some(cal) = store.calendars.get(&resource_id) {
                        let mut guard = cal.try_write().expect("replay: uncontended write");
                        guard.remove_booking(id);
                    }
                    store.booking_to_resource.remove(&id);
                }
            }
        }

        Ok(store)
    }

    /// Write an event via the background group-commit writer.
    async fn wal_append(&self, event: Event) -> Result<(), Rejected> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalAppend { event, response: tx })
            .await
            .map_err(|_| Rejected::Unavailable {
                reason: "WAL writer shut down".into(),
            })?;
        rx.await
            .map_err(|_| Rejected::Unavailable {
                reason: "WAL writer dropped response".into(),
            })?
            .map_err(|e| Rejected::Unavailable {
                reason: e.to_string(),
            })
    }

    // ── Resource registry ────────────────────────────────────────

    pub fn resource_exists(&self, id: ResourceId) -> bool {
        self.calendars.contains_key(&id)
    }

    pub fn calendar(&self, id: ResourceId) -> Option<SharedCalendar> {
        self.calendars.get(&id).map(|e| e.value().clone())
    }

    pub async fn register_resource(
        &self,
        id: ResourceId,
        name: String,
        kind: ResourceKind,
    ) -> Result<ResourceInfo, Rejected> {
        if self.calendars.contains_key(&id) {
            return Err(Rejected::AlreadyExists { resource_id: id });
        }
        self.wal_append(Event::ResourceRegistered {
            id,
            name: name.clone(),
            kind,
        })
        .await?;
        let cal = Calendar::new(id, name, kind);
        let info = cal.info();
        self.calendars.insert(id, Arc::new(RwLock::new(cal)));
        Ok(info)
    }

    /// Remove a resource and all its bookings. The write lock is held
    /// across the tombstone + index sweep so a racing insert either
    /// lands before the sweep or sees `removed` and fails.
    pub async fn remove_resource(&self, id: ResourceId) -> Result<(), Rejected> {
        let cal = self.calendar(id).ok_or_else(|| Rejected::not_found(id))?;
        let mut guard = cal.write().await;
        if guard.removed {
            return Err(Rejected::not_found(id));
        }
        self.wal_append(Event::ResourceRemoved { id }).await?;
        guard.removed = true;
        for b in &guard.bookings {
            self.booking_to_resource.remove(&b.id);
        }
        drop(guard);
        self.calendars.remove(&id);
        Ok(())
    }

    pub async fn list_resources(&self) -> Vec<ResourceInfo> {
        let calendars: Vec<SharedCalendar> =
            self.calendars.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(calendars.len());
        for cal in calendars {
            out.push(cal.read().await.info());
        }
        out
    }

    // ── Bookings ─────────────────────────────────────────────────

    /// All active bookings for a resource, start-ascending — a stable
    /// snapshot under the read lock.
    pub async fn list_active(&self, resource_id: ResourceId) -> Result<Vec<Booking>, Rejected> {
        let cal = self
            .calendar(resource_id)
            .ok_or_else(|| Rejected::not_found(resource_id))?;
        let guard = cal.read().await;
        Ok(guard.bookings.clone())
    }

    pub async fn bookings_for_member(&self, member: &MemberId) -> Vec<Booking> {
        let calendars: Vec<SharedCalendar> =
            self.calendars.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for cal in calendars {
            let guard = cal.read().await;
            out.extend(guard.bookings.iter().filter(|b| &b.owner == member).cloned());
        }
        out.sort_by_key(|b| b.interval.start);
        out
    }

    /// Commit a booking. The write lock is held across the overlap
    /// re-check, the WAL append, and the in-memory apply — this is the
    /// one correctness-critical section in the system. WAL failure
    /// leaves no state change.
    pub async fn insert(
        &self,
        resource_id: ResourceId,
        owner: MemberId,
        interval: TimeInterval,
        now: Ms,
    ) -> Result<Booking, Rejected> {
        let cal = self
            .calendar(resource_id)
            .ok_or_else(|| Rejected::not_found(resource_id))?;
        let mut guard = cal.write().await;
        if guard.removed {
            return Err(Rejected::not_found(resource_id));
        }

        validate::check_overlap(&guard, &interval, None)?;

        let booking = Booking {
            id: BookingId::new(),
            resource_id,
            owner,
            interval,
            created_at: now,
        };
        self.wal_append(Event::BookingCommitted {
            booking: booking.clone(),
        })
        .await?;
        guard.insert_booking(booking.clone());
        self.booking_to_resource.insert(booking.id, resource_id);
        Ok(booking)
    }

    /// Delete a booking. Owner or admin only.
    pub async fn delete(&self, booking_id: BookingId, actor: &Actor) -> Result<Booking, Rejected> {
        let resource_id = self
            .booking_to_resource
            .get(&booking_id)
            .map(|e| *e.value())
            .ok_or_else(|| Rejected::not_found(booking_id))?;
        let cal = self
            .calendar(resource_id)
            .ok_or_else(|| Rejected::not_found(resource_id))?;
        let mut guard = cal.write().await;
        if guard.removed {
            return Err(Rejected::not_found(resource_id));
        }

        let booking = guard
            .get_booking(booking_id)
            .ok_or_else(|| Rejected::not_found(booking_id))?
            .clone();
        if !actor.admin && booking.owner != actor.member {
            return Err(Rejected::NotOwner);
        }

        self.wal_append(Event::BookingCancelled {
            id: booking_id,
            resource_id,
        })
        .await?;
        guard.remove_booking(booking_id);
        self.booking_to_resource.remove(&booking_id);
        Ok(booking)
    }

    #[cfg(test)]
    fn booking_index_len(&self) -> usize {
        self.booking_to_resource.len()
    }
}
