//! Tracking of ride-room membership.
//!
//! The tracker is a pure state machine owned by the connection task: it does
//! no I/O and holds no locks. Callers tell it what happened (join requested,
//! confirmation arrived, transport dropped) and it tells them what to do
//! (send a frame, resolve waiters) by returning directives and draining
//! waiter channels.
//!
//! Membership is connection-scoped. A transport drop invalidates every
//! joined room and fails every pending join; nothing is replayed
//! automatically, the reconciler decides what to rejoin.

use crate::error::{BodaLinkError, Result};
use crate::models::{DriverLocation, RideStatus};
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::oneshot;

/// Confirmation payload of a successful ride join.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinGrant {
    pub ride_id: String,
    /// Server-reported status at join time, for immediate state sync.
    pub ride_status: Option<RideStatus>,
    /// Last driver position known to the room, for immediate map display.
    pub last_driver_location: Option<DriverLocation>,
}

impl JoinGrant {
    pub(crate) fn bare(ride_id: impl Into<String>) -> Self {
        Self {
            ride_id: ride_id.into(),
            ride_status: None,
            last_driver_location: None,
        }
    }
}

type Waiter = oneshot::Sender<Result<JoinGrant>>;

/// What the caller must do after registering a join request.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum JoinDirective {
    /// Already a member; the waiter was resolved immediately.
    Resolved,
    /// A join for this ride is already in flight; the waiter was attached
    /// to it. No new frame goes out.
    Attached,
    /// First request for this ride; the caller must send the join frame.
    SendRequest,
}

struct PendingJoin {
    waiters: Vec<Waiter>,
    deadline: Instant,
}

#[derive(Default)]
pub(crate) struct SubscriptionTracker {
    joined: Vec<String>,
    pending: HashMap<String, PendingJoin>,
}

impl SubscriptionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_joined(&self, ride_id: &str) -> bool {
        self.joined.iter().any(|id| id == ride_id)
    }

    pub fn joined_ids(&self) -> Vec<String> {
        self.joined.clone()
    }

    pub fn pending_ids(&self) -> Vec<String> {
        self.pending.keys().cloned().collect()
    }

    /// Register intent to join. Joins are idempotent: a ride that is already
    /// joined resolves immediately, and concurrent requests for the same
    /// ride coalesce onto one in-flight wire request.
    pub fn begin_join(
        &mut self,
        ride_id: &str,
        waiter: Waiter,
        deadline: Instant,
    ) -> JoinDirective {
        if self.is_joined(ride_id) {
            let _ = waiter.send(Ok(JoinGrant::bare(ride_id)));
            return JoinDirective::Resolved;
        }
        if let Some(pending) = self.pending.get_mut(ride_id) {
            pending.waiters.push(waiter);
            return JoinDirective::Attached;
        }
        self.pending.insert(
            ride_id.to_string(),
            PendingJoin {
                waiters: vec![waiter],
                deadline,
            },
        );
        JoinDirective::SendRequest
    }

    /// Server confirmed the join. Resolves every attached waiter. An ack
    /// with no pending entry is unsolicited (typically a confirmation
    /// arriving after the caller already left) and must not create a
    /// membership nobody owns.
    pub fn complete(&mut self, grant: JoinGrant) {
        let Some(pending) = self.pending.remove(&grant.ride_id) else {
            log::debug!("Dropping unsolicited join ack for {}", grant.ride_id);
            return;
        };
        for waiter in pending.waiters {
            let _ = waiter.send(Ok(grant.clone()));
        }
        if !self.is_joined(&grant.ride_id) {
            self.joined.push(grant.ride_id);
        }
    }

    /// Server rejected the join. Fails every attached waiter.
    pub fn reject(&mut self, ride_id: &str, error: BodaLinkError) {
        if let Some(pending) = self.pending.remove(ride_id) {
            for waiter in pending.waiters {
                let _ = waiter.send(Err(error.clone()));
            }
        }
    }

    /// Local record that we left a room (after sending `leave_ride` or on a
    /// terminal event). No waiters are involved.
    pub fn mark_left(&mut self, ride_id: &str) {
        self.joined.retain(|id| id != ride_id);
        // A leave racing an in-flight join fails the join.
        self.reject(
            ride_id,
            BodaLinkError::ConnectionLost("ride left before join confirmed".to_string()),
        );
    }

    /// Earliest pending-join deadline, for the owner's timer.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|pending| pending.deadline).min()
    }

    /// The pending join requested first (earliest deadline). Server error
    /// replies carry no ride id, so rejections are attributed to it.
    pub fn oldest_pending_id(&self) -> Option<String> {
        self.pending
            .iter()
            .min_by_key(|(_, pending)| pending.deadline)
            .map(|(ride_id, _)| ride_id.clone())
    }

    /// Fail every pending join whose deadline has passed. Returns the ride
    /// ids that expired.
    pub fn expire_due(&mut self, now: Instant) -> Vec<String> {
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.deadline <= now)
            .map(|(ride_id, _)| ride_id.clone())
            .collect();
        for ride_id in &expired {
            self.reject(
                ride_id,
                BodaLinkError::TimeoutError("join confirmation timed out".to_string()),
            );
        }
        expired
    }

    /// The transport dropped: every membership is void and every in-flight
    /// join fails. Returns the rooms that were joined, for logging.
    pub fn invalidate_all(&mut self) -> Vec<String> {
        let was_joined = std::mem::take(&mut self.joined);
        let pending = std::mem::take(&mut self.pending);
        for (_, entry) in pending {
            for waiter in entry.waiters {
                let _ = waiter.send(Err(BodaLinkError::ConnectionLost(
                    "connection dropped".to_string(),
                )));
            }
        }
        was_joined
    }

    /// Fail pending joins without touching confirmed memberships. Used when
    /// the app backgrounds: the transport may still be up, but nobody is
    /// around to consume the confirmation.
    pub fn reject_all_pending(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        for (_, entry) in pending {
            for waiter in entry.waiters {
                let _ = waiter.send(Err(BodaLinkError::ConnectionLost(
                    "app moved to background".to_string(),
                )));
            }
        }
    }
}
