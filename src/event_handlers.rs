//! Callback registration for session-level notifications.
//!
//! All handlers are optional. They are invoked from the client's internal
//! tasks, so they must be cheap and non-blocking; spawn work elsewhere if a
//! notification needs real processing.

use crate::models::{HealthStatus, ServerEvent, TerminalNotice};
use std::sync::Arc;

/// Why the session re-established its live channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectReason {
    /// The transport dropped and automatic reconnection succeeded.
    Reconnected,
    /// The app returned to the foreground and the channel was refreshed.
    ForegroundResume,
}

type HealthHandler = Arc<dyn Fn(HealthStatus) + Send + Sync>;
type ReconnectHandler = Arc<dyn Fn(ReconnectReason) + Send + Sync>;
type TerminalHandler = Arc<dyn Fn(TerminalNotice) + Send + Sync>;
type RideEventHandler = Arc<dyn Fn(ServerEvent) + Send + Sync>;
type FrameHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Set of user callbacks, built once and shared with the session tasks.
#[derive(Default, Clone)]
pub struct EventHandlers {
    on_health_change: Option<HealthHandler>,
    on_reconnect: Option<ReconnectHandler>,
    on_terminal_ride: Option<TerminalHandler>,
    on_ride_event: Option<RideEventHandler>,
    on_receive: Option<FrameHandler>,
    on_send: Option<FrameHandler>,
}

impl EventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called whenever the connection's health verdict changes.
    pub fn on_health_change<F>(mut self, handler: F) -> Self
    where
        F: Fn(HealthStatus) + Send + Sync + 'static,
    {
        self.on_health_change = Some(Arc::new(handler));
        self
    }

    /// Called after the live channel is re-established.
    pub fn on_reconnect<F>(mut self, handler: F) -> Self
    where
        F: Fn(ReconnectReason) + Send + Sync + 'static,
    {
        self.on_reconnect = Some(Arc::new(handler));
        self
    }

    /// Called once when the active ride reaches a terminal outcome, after
    /// local state for it has been torn down.
    pub fn on_terminal_ride<F>(mut self, handler: F) -> Self
    where
        F: Fn(TerminalNotice) + Send + Sync + 'static,
    {
        self.on_terminal_ride = Some(Arc::new(handler));
        self
    }

    /// Called for every domain event on a joined ride, after it has been
    /// merged into the tracked state.
    pub fn on_ride_event<F>(mut self, handler: F) -> Self
    where
        F: Fn(ServerEvent) + Send + Sync + 'static,
    {
        self.on_ride_event = Some(Arc::new(handler));
        self
    }

    /// Debug hook: raw text of every inbound frame.
    pub fn on_receive<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_receive = Some(Arc::new(handler));
        self
    }

    /// Debug hook: raw text of every outbound frame.
    pub fn on_send<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_send = Some(Arc::new(handler));
        self
    }

    pub(crate) fn emit_health_change(&self, status: HealthStatus) {
        if let Some(handler) = &self.on_health_change {
            handler(status);
        }
    }

    pub(crate) fn emit_reconnect(&self, reason: ReconnectReason) {
        if let Some(handler) = &self.on_reconnect {
            handler(reason);
        }
    }

    pub(crate) fn emit_terminal_ride(&self, notice: TerminalNotice) {
        if let Some(handler) = &self.on_terminal_ride {
            handler(notice);
        }
    }

    pub(crate) fn emit_ride_event(&self, event: ServerEvent) {
        if let Some(handler) = &self.on_ride_event {
            handler(event);
        }
    }

    pub(crate) fn emit_receive(&self, raw: &str) {
        if let Some(handler) = &self.on_receive {
            handler(raw);
        }
    }

    pub(crate) fn emit_send(&self, raw: &str) {
        if let Some(handler) = &self.on_send {
            handler(raw);
        }
    }
}

impl std::fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandlers")
            .field("on_health_change", &self.on_health_change.is_some())
            .field("on_reconnect", &self.on_reconnect.is_some())
            .field("on_terminal_ride", &self.on_terminal_ride.is_some())
            .field("on_ride_event", &self.on_ride_event.is_some())
            .field("on_receive", &self.on_receive.is_some())
            .field("on_send", &self.on_send.is_some())
            .finish()
    }
}
