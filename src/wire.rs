use std::io;
use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, warn};

use crate::coordinator::ReservationCoordinator;
use crate::error::Rejected;
use crate::intent;
use crate::model::*;
use crate::observability;

/// One JSON object per line in each direction. Replies carry the
/// request's `id`; server-pushed events carry none.
const MAX_LINE_BYTES: usize = 64 * 1024;

// ── Frames ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    AcquireLock {
        resource_id: ResourceId,
        slot: SlotKey,
    },
    ReleaseLock {
        resource_id: ResourceId,
        slot: SlotKey,
    },
    Commit {
        resource_id: ResourceId,
        owner: MemberId,
        start: Ms,
        end: Ms,
    },
    Cancel {
        booking_id: BookingId,
        member: MemberId,
        #[serde(default)]
        admin: bool,
    },
    Availability {
        resource_id: ResourceId,
        start: Ms,
        end: Ms,
    },
    Bookings {
        resource_id: ResourceId,
    },
    MemberBookings {
        member: MemberId,
    },
    Resources,
    RegisterResource {
        resource_id: ResourceId,
        name: String,
        kind: ResourceKind,
    },
    RemoveResource {
        resource_id: ResourceId,
    },
    Interpret {
        reply: String,
    },
}

#[derive(Debug, Deserialize)]
pub struct Frame {
    pub id: u64,
    #[serde(flatten)]
    pub req: Request,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum Reply {
    Ok { id: u64, data: serde_json::Value },
    Err { id: u64, error: Rejected },
    Event { event: ServerEvent },
}

pub fn request_label(req: &Request) -> &'static str {
    match req {
        Request::AcquireLock { .. } => "acquire_lock",
        Request::ReleaseLock { .. } => "release_lock",
        Request::Commit { .. } => "commit",
        Request::Cancel { .. } => "cancel",
        Request::Availability { .. } => "availability",
        Request::Bookings { .. } => "bookings",
        Request::MemberBookings { .. } => "member_bookings",
        Request::Resources => "resources",
        Request::RegisterResource { .. } => "register_resource",
        Request::RemoveResource { .. } => "remove_resource",
        Request::Interpret { .. } => "interpret",
    }
}

// ── Connection loop ──────────────────────────────────────────────

/// Serve one client until it hangs up. On any exit path the connection's
/// soft locks are released and its subscription dropped.
pub async fn process_connection(
    socket: TcpStream,
    coordinator: Arc<ReservationCoordinator>,
) -> io::Result<()> {
    let conn = ConnectionId::new();
    let peer = socket.peer_addr()?;
    debug!(%conn, %peer, "connection open");

    let mut events = coordinator.subscribe(conn);
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_BYTES));

    let result = async {
        loop {
            tokio::select! {
                line = framed.next() => {
                    let line = match line {
                        Some(Ok(line)) => line,
                        Some(Err(e)) => {
                            warn!(%conn, error = %e, "dropping connection on framing error");
                            break;
                        }
                        None => break,
                    };
                    let reply = match serde_json::from_str::<Frame>(&line) {
                        Ok(frame) => handle_frame(&coordinator, conn, frame).await,
                        Err(e) => {
                            debug!(%conn, error = %e, "unparseable request");
                            Reply::Err {
                                id: 0,
                                error: Rejected::Malformed {
                                    reason: e.to_string(),
                                },
                            }
                        }
                    };
                    send_reply(&mut framed, &reply).await?;
                }
                event = events.recv() => {
                    match event {
                        Some(event) => send_reply(&mut framed, &Reply::Event { event }).await?,
                        // Subscription replaced; nothing more to push.
                        None => break,
                    }
                }
            }
        }
        Ok(())
    }
    .await;

    coordinator.disconnect(conn);
    debug!(%conn, %peer, "connection closed");
    result
}

async fn send_reply(
    framed: &mut Framed<TcpStream, LinesCodec>,
    reply: &Reply,
) -> io::Result<()> {
    let line = serde_json::to_string(reply).map_err(io::Error::other)?;
    framed.send(line).await.map_err(io::Error::other)
}

async fn handle_frame(
    coordinator: &ReservationCoordinator,
    conn: ConnectionId,
    frame: Frame,
) -> Reply {
    let op = request_label(&frame.req);
    let started = Instant::now();
    let outcome = dispatch(coordinator, conn, frame.req).await;

    metrics::counter!(observability::REQUESTS_TOTAL, "op" => op).increment(1);
    metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "op" => op)
        .record(started.elapsed().as_secs_f64());

    match outcome {
        Ok(data) => Reply::Ok { id: frame.id, data },
        Err(error) => {
            metrics::counter!(observability::REQUESTS_REJECTED_TOTAL, "reason" => error.label())
                .increment(1);
            Reply::Err {
                id: frame.id,
                error,
            }
        }
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<serde_json::Value, Rejected> {
    serde_json::to_value(value).map_err(|e| Rejected::Unavailable {
        reason: e.to_string(),
    })
}

async fn dispatch(
    coordinator: &ReservationCoordinator,
    conn: ConnectionId,
    req: Request,
) -> Result<serde_json::Value, Rejected> {
    match req {
        Request::AcquireLock { resource_id, slot } => {
            let lock = coordinator.request_lock(resource_id, slot, conn)?;
            Ok(json!({ "locked": true, "acquired_at": lock.acquired_at }))
        }
        Request::ReleaseLock { resource_id, slot } => {
            let released = coordinator.request_unlock(resource_id, slot, conn)?;
            Ok(json!({ "released": released }))
        }
        Request::Commit {
            resource_id,
            owner,
            start,
            end,
        } => {
            let interval = TimeInterval::checked(start, end).ok_or(Rejected::InvalidInterval)?;
            let booking = coordinator.commit(resource_id, owner, interval, conn).await?;
            to_value(&booking)
        }
        Request::Cancel {
            booking_id,
            member,
            admin,
        } => {
            let actor = Actor { member, admin };
            let booking = coordinator.cancel(booking_id, &actor).await?;
            to_value(&booking)
        }
        Request::Availability {
            resource_id,
            start,
            end,
        } => {
            let interval = TimeInterval::checked(start, end).ok_or(Rejected::InvalidInterval)?;
            match coordinator.check_availability(resource_id, interval).await {
                Ok(()) => Ok(json!({ "available": true })),
                Err(e @ (Rejected::Overlap { .. } | Rejected::PastStart)) => {
                    Ok(json!({ "available": false, "reason": e.label() }))
                }
                Err(e) => Err(e),
            }
        }
        Request::Bookings { resource_id } => to_value(&coordinator.bookings(resource_id).await?),
        Request::MemberBookings { member } => {
            to_value(&coordinator.member_bookings(&member).await)
        }
        Request::Resources => to_value(&coordinator.resources().await),
        Request::RegisterResource {
            resource_id,
            name,
            kind,
        } => {
            let info = coordinator.register_resource(resource_id, name, kind).await?;
            to_value(&info)
        }
        Request::RemoveResource { resource_id } => {
            coordinator.remove_resource(resource_id).await?;
            Ok(json!({ "removed": true }))
        }
        Request::Interpret { reply } => to_value(&intent::interpret(&reply)),
    }
}
