//! slotd — timeslot reservation coordinator.
//!
//! Members book shared resources (desks, meeting rooms, equipment) for
//! half-open time windows. Committed bookings live in a WAL-backed
//! in-memory store with an authoritative overlap check at commit time;
//! an advisory soft-lock layer broadcasts "someone is choosing this
//! slot" hints to connected clients over a line-delimited JSON protocol.

pub mod broadcast;
pub mod coordinator;
pub mod error;
pub mod intent;
pub mod model;
pub mod observability;
pub mod reaper;
pub mod registry;
pub mod store;
pub mod validate;
pub mod wal;
pub mod wire;
