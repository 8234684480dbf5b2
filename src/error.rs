use serde::Serialize;

use crate::model::{BookingId, ResourceId, SlotKey};

/// Why an operation was refused. Every variant is terminal and reported
/// to the caller verbatim; only `Unavailable` is worth a client retry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind")]
pub enum Rejected {
    /// Proposed interval conflicts with an existing booking.
    Overlap { conflicting: BookingId },
    /// Start earlier than now minus the grace margin.
    PastStart,
    /// Soft lock held by another connection.
    AlreadyLocked {
        resource_id: ResourceId,
        slot: SlotKey,
    },
    /// Release attempted by a connection that does not hold the lock.
    NotHolder,
    /// Cancel attempted by neither owner nor admin.
    NotOwner,
    /// Unknown resource or booking.
    NotFound { what: String },
    /// Resource id already registered.
    AlreadyExists { resource_id: ResourceId },
    /// Malformed interval (start >= end) or otherwise unusable input.
    InvalidInterval,
    /// Request could not be parsed. Terminal; resending the same bytes
    /// cannot succeed.
    Malformed { reason: String },
    /// Persistence failure — transient, never conflated with Overlap.
    Unavailable { reason: String },
}

impl Rejected {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Rejected::NotFound {
            what: what.to_string(),
        }
    }

    /// Short stable label for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Rejected::Overlap { .. } => "overlap",
            Rejected::PastStart => "past_start",
            Rejected::AlreadyLocked { .. } => "already_locked",
            Rejected::NotHolder => "not_holder",
            Rejected::NotOwner => "not_owner",
            Rejected::NotFound { .. } => "not_found",
            Rejected::AlreadyExists { .. } => "already_exists",
            Rejected::InvalidInterval => "invalid_interval",
            Rejected::Malformed { .. } => "malformed",
            Rejected::Unavailable { .. } => "unavailable",
        }
    }
}

impl std::fmt::Display for Rejected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejected::Overlap { conflicting } => {
                write!(f, "interval overlaps existing booking {conflicting}")
            }
            Rejected::PastStart => write!(f, "start time is in the past"),
            Rejected::AlreadyLocked { resource_id, slot } => {
                write!(f, "slot {slot} on resource {resource_id} is locked by another client")
            }
            Rejected::NotHolder => write!(f, "lock is held by a different connection"),
            Rejected::NotOwner => write!(f, "booking belongs to a different member"),
            Rejected::NotFound { what } => write!(f, "not found: {what}"),
            Rejected::AlreadyExists { resource_id } => {
                write!(f, "resource already registered: {resource_id}")
            }
            Rejected::InvalidInterval => write!(f, "interval start must be before end"),
            Rejected::Malformed { reason } => write!(f, "malformed request: {reason}"),
            Rejected::Unavailable { reason } => write!(f, "store unavailable: {reason}"),
        }
    }
}

impl std::error::Error for Rejected {}
