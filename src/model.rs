use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds UTC — the only time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 3_600_000;
pub const DAY_MS: Ms = 24 * HOUR_MS;

/// Soft-lock granularity: one lockable slot is a 30-minute bucket.
pub const SLOT_MS: Ms = 30 * MINUTE_MS;
pub const SLOTS_PER_DAY: u16 = (DAY_MS / SLOT_MS) as u16;

// ── Identifiers ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub Ulid);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookingId(pub Ulid);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub Ulid);

/// Externally assigned member identifier (the identity service owns these).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(pub String);

impl ResourceId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl BookingId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl ConnectionId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ResourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for BookingId {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Display for BookingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Display for MemberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Requester identity for authorization on cancel/admin operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub member: MemberId,
    pub admin: bool,
}

impl Actor {
    pub fn member(member: impl Into<String>) -> Self {
        Self {
            member: MemberId(member.into()),
            admin: false,
        }
    }

    pub fn admin(member: impl Into<String>) -> Self {
        Self {
            member: MemberId(member.into()),
            admin: true,
        }
    }
}

// ── Time intervals ───────────────────────────────────────────────

/// Half-open interval `[start, end)` in UTC milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInterval {
    pub start: Ms,
    pub end: Ms,
}

impl TimeInterval {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "interval start must be before end");
        Self { start, end }
    }

    /// Fallible constructor for untrusted input.
    pub fn checked(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Half-open overlap: an interval ending exactly where another
    /// starts does not conflict.
    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// Coarse, discrete lock bucket: a 30-minute slot on a UTC calendar day.
/// Slot granularity is independent of booking interval granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotKey {
    /// Days since the Unix epoch, UTC.
    pub day: i64,
    /// Bucket index within the day, 0..SLOTS_PER_DAY.
    pub slot: u16,
}

impl SlotKey {
    /// The slot containing instant `t`.
    pub fn containing(t: Ms) -> Self {
        Self::from_abs(t.div_euclid(SLOT_MS))
    }

    fn from_abs(abs: i64) -> Self {
        Self {
            day: abs.div_euclid(SLOTS_PER_DAY as i64),
            slot: abs.rem_euclid(SLOTS_PER_DAY as i64) as u16,
        }
    }

    fn to_abs(self) -> i64 {
        self.day * SLOTS_PER_DAY as i64 + self.slot as i64
    }

    /// First instant of the slot.
    pub fn start_ms(&self) -> Ms {
        self.to_abs() * SLOT_MS
    }

    /// Does this slot's 30-minute range overlap a half-open interval?
    pub fn overlaps(&self, interval: &TimeInterval) -> bool {
        let start = self.start_ms();
        start < interval.end && interval.start < start + SLOT_MS
    }
}

impl std::fmt::Display for SlotKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "d{}#{}", self.day, self.slot)
    }
}

// ── Resources and bookings ───────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceKind {
    Desk,
    MeetingRoom,
    VrHeadset,
    AiServer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInfo {
    pub id: ResourceId,
    pub name: String,
    pub kind: ResourceKind,
}

/// A committed reservation. Immutable once created; deleted whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub resource_id: ResourceId,
    pub owner: MemberId,
    pub interval: TimeInterval,
    pub created_at: Ms,
}

/// Advisory reservation-in-progress marker. Never persisted; lost on
/// restart or holder disconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftLock {
    pub resource_id: ResourceId,
    pub slot: SlotKey,
    pub holder: ConnectionId,
    pub acquired_at: Ms,
}

/// One resource's committed bookings, sorted by `interval.start`.
#[derive(Debug, Clone)]
pub struct Calendar {
    pub id: ResourceId,
    pub name: String,
    pub kind: ResourceKind,
    pub bookings: Vec<Booking>,
    /// Set under the write lock when the resource is removed; a writer
    /// that already holds the Arc must fail instead of mutating an
    /// orphan calendar.
    pub removed: bool,
}

impl Calendar {
    pub fn new(id: ResourceId, name: String, kind: ResourceKind) -> Self {
        Self {
            id,
            name,
            kind,
            bookings: Vec::new(),
            removed: false,
        }
    }

    /// Insert maintaining sort order by interval.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.interval.start, |b| b.interval.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: BookingId) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn get_booking(&self, id: BookingId) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    /// Only bookings whose interval overlaps the query window.
    /// Binary search skips bookings starting at or after `query.end`.
    pub fn overlapping(&self, query: &TimeInterval) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.interval.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.interval.end > query.start)
    }

    pub fn info(&self) -> ResourceInfo {
        ResourceInfo {
            id: self.id,
            name: self.name.clone(),
            kind: self.kind,
        }
    }
}

// ── Events ───────────────────────────────────────────────────────

/// Durable events — the WAL record format. Soft locks never appear here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ResourceRegistered {
        id: ResourceId,
        name: String,
        kind: ResourceKind,
    },
    ResourceRemoved {
        id: ResourceId,
    },
    BookingCommitted {
        booking: Booking,
    },
    BookingCancelled {
        id: BookingId,
        resource_id: ResourceId,
    },
}

/// Ephemeral broadcast messages pushed to connected clients.
/// At-most-once per subscriber, no replay; a late subscriber re-fetches
/// current state instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ServerEvent {
    LockChanged {
        resource_id: ResourceId,
        slot: SlotKey,
        locked: bool,
    },
    BookingChanged {
        resource_id: ResourceId,
        /// A UTC day the booking touches; intervals crossing midnight
        /// emit one event per boundary day. Clients re-fetch that date's
        /// calendar and clear any lock rendering for the range.
        day: i64,
    },
}
