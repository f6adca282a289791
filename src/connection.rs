//! Managed WebSocket connection to the ride service.
//!
//! A single connection carries everything: ride-room membership, live ride
//! events, and the application-level heartbeat.  Handles:
//!
//! - One background task exclusively owning the socket
//! - Automatic reconnection with exponential backoff (never gives up;
//!   attempts past the cap retry at the capped delay)
//! - Heartbeat pings with a pong deadline that degrades health without
//!   tearing the transport down
//! - Connection-scoped ride memberships that die with the transport
//!
//! The public handle sends commands to the task; ride-level events flow back
//! to the session driver over the engine channel.

use crate::{
    backoff::reconnect_delay,
    error::{BodaLinkError, Result},
    event_handlers::EventHandlers,
    models::{
        utils::now_timestamp, ActiveRideRef, ClientEvent, ConnectionOptions, HealthStatus,
        RideStatus, ServerEvent,
    },
    subscription::{JoinDirective, JoinGrant, SubscriptionTracker},
    timeouts::BodaLinkTimeouts,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant as TokioInstant;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::MaybeTlsStream;

pub(crate) type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Capacity for the engine event channel to the session driver.
const ENGINE_EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Maximum text message size (1 MiB). Ride events are tiny; anything bigger
/// is a protocol violation.
const MAX_WS_TEXT_MESSAGE_BYTES: usize = 1 << 20;

/// Maximum sleep duration that won't overflow `Instant + Duration`.
/// ~100 years is far enough into the future to be effectively "never".
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

// ── Commands ────────────────────────────────────────────────────────────────

/// Commands sent from the public API to the background connection task.
pub(crate) enum ConnCmd {
    /// Join a ride room. The waiter resolves when the server confirms,
    /// rejects, or the join times out.
    Join {
        ride_id: String,
        waiter: oneshot::Sender<Result<JoinGrant>>,
    },
    /// Leave a ride room. Fire-and-forget.
    Leave { ride_id: String },
    /// Send an arbitrary client event. A logged no-op while disconnected.
    Send { event: ClientEvent },
    /// Report the current health verdict.
    CheckHealth {
        result_tx: oneshot::Sender<HealthStatus>,
    },
    /// Whether a ride room is currently joined.
    IsJoined {
        ride_id: String,
        result_tx: oneshot::Sender<bool>,
    },
    /// Stop reconnecting while the app is backgrounded. An open transport
    /// stays open until the OS kills it.
    PauseReconnect,
    /// Resume reconnection attempts with a fresh backoff schedule.
    ResumeReconnect,
    /// Drop the current transport (if any) and reconnect immediately.
    ForceReconnect,
    /// Void all ride memberships without touching the transport.
    ResetSubscriptions,
    /// Gracefully shut down the connection.
    Shutdown,
}

/// Ride-level events flowing from the connection task to the session driver.
#[derive(Debug)]
pub(crate) enum EngineEvent {
    /// Transport established and the server handshake completed.
    Connected {
        /// Server-side hint about an in-flight ride for this user.
        active_ride: Option<ActiveRideRef>,
        /// False for the initial connection, true for every reconnect.
        reconnect: bool,
    },
    /// Transport lost. All ride memberships are already void.
    Disconnected { reason: String },
    /// A domain event for some ride. The session decides whether it
    /// concerns the tracked ride.
    Domain(ServerEvent),
    /// The server refused a join because the ride is already over.
    JoinRejected {
        ride_id: String,
        status: RideStatus,
        message: String,
    },
}

// ── ConnectionManager (public handle) ───────────────────────────────────────

/// Handle to the managed ride-service connection.
///
/// Created via [`ConnectionManager::connect`]. All operations send commands
/// to a background task that owns the WebSocket stream.
pub(crate) struct ConnectionManager {
    cmd_tx: mpsc::Sender<ConnCmd>,
    /// Whether the WebSocket is currently open and handshaken.
    connected: Arc<AtomicBool>,
    /// Reconnection attempt counter (resets on success).
    reconnect_attempts: Arc<AtomicU32>,
    _task: JoinHandle<()>,
}

impl ConnectionManager {
    /// Establish the managed connection.
    ///
    /// Spawns a background task that connects, completes the `connected`
    /// handshake, reads ride events, processes commands, and reconnects
    /// with exponential backoff. Waits for the initial connection attempt
    /// to finish before returning; an initial failure is not fatal, the
    /// task keeps reconnecting in the background.
    ///
    /// Returns the handle plus the engine event receiver for the session
    /// driver.
    pub async fn connect(
        base_url: String,
        jwt_token: String,
        timeouts: BodaLinkTimeouts,
        connection_options: ConnectionOptions,
        event_handlers: EventHandlers,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>)> {
        // Fail fast on an unusable URL before spawning anything.
        resolve_ws_url(&base_url, &jwt_token)?;

        let (cmd_tx, cmd_rx) = mpsc::channel::<ConnCmd>(256);
        let (engine_tx, engine_rx) = mpsc::channel::<EngineEvent>(ENGINE_EVENT_CHANNEL_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));
        let reconnect_attempts = Arc::new(AtomicU32::new(0));

        let connected_clone = connected.clone();
        let reconnect_clone = reconnect_attempts.clone();

        // The background task signals this once the initial connection
        // attempt has completed (Ok) or failed (Err).
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();

        let task = tokio::spawn(async move {
            connection_task(
                cmd_rx,
                engine_tx,
                base_url,
                jwt_token,
                timeouts,
                connection_options,
                event_handlers,
                connected_clone,
                reconnect_clone,
                Some(ready_tx),
            )
            .await;
        });

        match ready_rx.await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => {
                // Initial connection failed; the task is still running and
                // will keep trying, so the handle stays usable.
                log::warn!("Initial ride-service connection failed: {}", e);
            },
            Err(_) => {
                log::warn!("Connection task exited before signalling readiness");
            },
        }

        Ok((
            Self {
                cmd_tx,
                connected,
                reconnect_attempts,
                _task: task,
            },
            engine_rx,
        ))
    }

    /// Join a ride room and wait for the server's confirmation.
    ///
    /// Idempotent: joining an already-joined ride resolves immediately, and
    /// concurrent joins for the same ride share one wire request. Fails
    /// fast with [`BodaLinkError::ConnectionLost`] while disconnected.
    pub async fn join_ride(&self, ride_id: &str) -> Result<JoinGrant> {
        let (waiter, waiter_rx) = oneshot::channel();
        self.cmd_tx
            .send(ConnCmd::Join {
                ride_id: ride_id.to_string(),
                waiter,
            })
            .await
            .map_err(|_| {
                BodaLinkError::WebSocketError("Connection task is not running".to_string())
            })?;
        waiter_rx.await.map_err(|_| {
            BodaLinkError::WebSocketError("Connection task died before confirming join".to_string())
        })?
    }

    /// Leave a ride room. Best-effort; membership is dropped locally even
    /// if the frame cannot be sent.
    pub async fn leave_ride(&self, ride_id: &str) {
        let _ = self
            .cmd_tx
            .send(ConnCmd::Leave {
                ride_id: ride_id.to_string(),
            })
            .await;
    }

    /// Send a client event over the live channel. While disconnected this
    /// is a logged no-op; transient ride telemetry is not worth queueing.
    pub async fn send_event(&self, event: ClientEvent) {
        let _ = self.cmd_tx.send(ConnCmd::Send { event }).await;
    }

    /// Current health verdict of the connection.
    pub async fn check_health(&self) -> HealthStatus {
        let (result_tx, result_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(ConnCmd::CheckHealth { result_tx })
            .await
            .is_err()
        {
            return HealthStatus::unhealthy("connection task is not running");
        }
        result_rx
            .await
            .unwrap_or_else(|_| HealthStatus::unhealthy("connection task is not running"))
    }

    /// Whether a ride room is currently joined.
    pub async fn is_joined(&self, ride_id: &str) -> bool {
        let (result_tx, result_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(ConnCmd::IsJoined {
                ride_id: ride_id.to_string(),
                result_tx,
            })
            .await
            .is_err()
        {
            return false;
        }
        result_rx.await.unwrap_or(false)
    }

    pub async fn pause_reconnect(&self) {
        let _ = self.cmd_tx.send(ConnCmd::PauseReconnect).await;
    }

    pub async fn resume_reconnect(&self) {
        let _ = self.cmd_tx.send(ConnCmd::ResumeReconnect).await;
    }

    pub async fn force_reconnect(&self) {
        let _ = self.cmd_tx.send(ConnCmd::ForceReconnect).await;
    }

    pub async fn reset_subscriptions(&self) {
        let _ = self.cmd_tx.send(ConnCmd::ResetSubscriptions).await;
    }

    /// Gracefully disconnect and shut down the background task.
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(ConnCmd::Shutdown).await;
    }

    /// Whether the WebSocket is currently open and handshaken.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub fn reconnect_attempt_count(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        // Best-effort shutdown signal.
        let _ = self.cmd_tx.try_send(ConnCmd::Shutdown);
    }
}

// ── URL and frame helpers ───────────────────────────────────────────────────

/// Derive the ride-channel WebSocket URL from the service base URL.
/// Authentication rides along as a query parameter.
fn resolve_ws_url(base_url: &str, jwt_token: &str) -> Result<String> {
    let trimmed = base_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else if trimmed.starts_with("ws://") || trimmed.starts_with("wss://") {
        trimmed.to_string()
    } else {
        return Err(BodaLinkError::ConfigurationError(format!(
            "Unsupported base URL scheme: {}",
            base_url
        )));
    };
    Ok(format!("{}/ws/rides?token={}", ws_base, jwt_token))
}

/// Serialize and send a client event over the WebSocket.
async fn send_client_event(
    ws: &mut WsStream,
    event: &ClientEvent,
    event_handlers: &EventHandlers,
) -> Result<()> {
    let payload = serde_json::to_string(event).map_err(|e| {
        BodaLinkError::SerializationError(format!(
            "Failed to serialize {}: {}",
            event.event_name(),
            e
        ))
    })?;
    event_handlers.emit_send(&payload);
    ws.send(Message::Text(payload.into())).await.map_err(|e| {
        BodaLinkError::WebSocketError(format!("Failed to send {}: {}", event.event_name(), e))
    })
}

/// Establish the WebSocket transport and complete the server handshake.
///
/// The server greets every accepted connection with a `connected` event
/// that may carry an active-ride hint; the handshake is not complete until
/// it arrives.
async fn establish_ws(
    base_url: &str,
    jwt_token: &str,
    timeouts: &BodaLinkTimeouts,
    event_handlers: &EventHandlers,
) -> Result<(WsStream, Option<ActiveRideRef>)> {
    let url = resolve_ws_url(base_url, jwt_token)?;
    log::debug!("[boda-link] Establishing WebSocket connection to ride service");

    let connect_fut = tokio_tungstenite::connect_async(&url);
    let connect_result = if !BodaLinkTimeouts::is_no_timeout(timeouts.connection_timeout) {
        tokio::time::timeout(timeouts.connection_timeout, connect_fut).await
    } else {
        Ok(connect_fut.await)
    };

    let mut ws_stream = match connect_result {
        Ok(Ok((stream, _))) => stream,
        Ok(Err(tokio_tungstenite::tungstenite::error::Error::Http(response))) => {
            let status = response.status();
            let message = match status.as_u16() {
                401 => "Unauthorized: ride channel requires a valid token".to_string(),
                403 => "Forbidden: access to ride channel denied".to_string(),
                code => format!("Ride channel HTTP error: {}", code),
            };
            return Err(BodaLinkError::WebSocketError(message));
        },
        Ok(Err(e)) => {
            return Err(BodaLinkError::WebSocketError(format!(
                "Connection failed: {}",
                e
            )));
        },
        Err(_) => {
            return Err(BodaLinkError::TimeoutError(format!(
                "Connection timeout ({:?})",
                timeouts.connection_timeout
            )));
        },
    };

    // Wait for the server's `connected` greeting.
    let handshake = wait_for_connected(&mut ws_stream, event_handlers);
    let active_ride = if !BodaLinkTimeouts::is_no_timeout(timeouts.connection_timeout) {
        match tokio::time::timeout(timeouts.connection_timeout, handshake).await {
            Ok(result) => result?,
            Err(_) => {
                let _ = ws_stream.close(None).await;
                return Err(BodaLinkError::TimeoutError(
                    "Timed out waiting for server handshake".to_string(),
                ));
            },
        }
    } else {
        handshake.await?
    };

    log::info!(
        "[boda-link] Ride channel connected (active ride hint: {:?})",
        active_ride.as_ref().map(|r| r.ride_id.as_str())
    );
    Ok((ws_stream, active_ride))
}

async fn wait_for_connected(
    ws: &mut WsStream,
    event_handlers: &EventHandlers,
) -> Result<Option<ActiveRideRef>> {
    while let Some(frame) = ws.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                event_handlers.emit_receive(&text);
                match serde_json::from_str::<ServerEvent>(&text) {
                    Ok(ServerEvent::Connected { active_ride, .. }) => return Ok(active_ride),
                    Ok(ServerEvent::Error { message }) => {
                        return Err(BodaLinkError::ProtocolError(message));
                    },
                    Ok(other) => {
                        log::debug!(
                            "[boda-link] Ignoring {} before handshake",
                            other.event_name()
                        );
                    },
                    Err(e) => {
                        log::warn!("Unparseable frame during handshake: {}", e);
                    },
                }
            },
            Ok(Message::Ping(payload)) => {
                let _ = ws.send(Message::Pong(payload)).await;
            },
            Ok(Message::Close(_)) => {
                return Err(BodaLinkError::ConnectionLost(
                    "Server closed connection during handshake".to_string(),
                ));
            },
            Ok(_) => {},
            Err(e) => {
                return Err(BodaLinkError::WebSocketError(format!(
                    "Handshake failed: {}",
                    e
                )));
            },
        }
    }
    Err(BodaLinkError::ConnectionLost(
        "Connection closed during handshake".to_string(),
    ))
}

// ── Offline command handling ────────────────────────────────────────────────

/// What the reconnection loop should do after an offline command.
enum OfflineFlow {
    Continue,
    Reconnect,
    Shutdown,
}

/// Handle a command while no transport exists. Joins fail fast instead of
/// queueing: membership is connection-scoped and callers must re-request it
/// once reconciliation runs on the fresh connection.
async fn handle_offline_cmd(
    cmd: Option<ConnCmd>,
    tracker: &mut SubscriptionTracker,
    paused: &mut bool,
    reconnect_attempts: &AtomicU32,
    skip_backoff_once: &mut bool,
) -> OfflineFlow {
    match cmd {
        Some(ConnCmd::Join { ride_id, waiter }) => {
            log::debug!("Rejecting join for {} while disconnected", ride_id);
            let _ = waiter.send(Err(BodaLinkError::ConnectionLost(
                "Not connected to ride service".to_string(),
            )));
            OfflineFlow::Continue
        },
        Some(ConnCmd::Leave { ride_id }) => {
            tracker.mark_left(&ride_id);
            OfflineFlow::Continue
        },
        Some(ConnCmd::Send { event }) => {
            log::debug!("Dropping {} while disconnected", event.event_name());
            OfflineFlow::Continue
        },
        Some(ConnCmd::CheckHealth { result_tx }) => {
            let _ = result_tx.send(HealthStatus::unhealthy("not connected"));
            OfflineFlow::Continue
        },
        Some(ConnCmd::IsJoined { result_tx, .. }) => {
            // No transport means no membership, whatever the tracker says.
            let _ = result_tx.send(false);
            OfflineFlow::Continue
        },
        Some(ConnCmd::PauseReconnect) => {
            *paused = true;
            OfflineFlow::Continue
        },
        Some(ConnCmd::ResumeReconnect) => {
            *paused = false;
            reconnect_attempts.store(0, Ordering::SeqCst);
            *skip_backoff_once = true;
            OfflineFlow::Reconnect
        },
        Some(ConnCmd::ForceReconnect) => {
            reconnect_attempts.store(0, Ordering::SeqCst);
            *skip_backoff_once = true;
            OfflineFlow::Reconnect
        },
        Some(ConnCmd::ResetSubscriptions) => {
            tracker.invalidate_all();
            OfflineFlow::Continue
        },
        Some(ConnCmd::Shutdown) | None => OfflineFlow::Shutdown,
    }
}

// ── Background connection task ──────────────────────────────────────────────

/// Void every ride membership and report the transport loss.
async fn handle_transport_drop(
    tracker: &mut SubscriptionTracker,
    engine_tx: &mpsc::Sender<EngineEvent>,
    connected: &AtomicBool,
    event_handlers: &EventHandlers,
    healthy: &mut bool,
    reason: String,
) {
    let was_joined = tracker.invalidate_all();
    if !was_joined.is_empty() {
        log::debug!(
            "Invalidated {} ride membership(s) on disconnect",
            was_joined.len()
        );
    }
    connected.store(false, Ordering::SeqCst);
    if *healthy {
        *healthy = false;
        event_handlers.emit_health_change(HealthStatus::unhealthy(reason.clone()));
    }
    let _ = engine_tx
        .send(EngineEvent::Disconnected { reason })
        .await;
}

/// The main background task managing the ride-service connection.
///
/// Lifecycle:
/// 1. Establish the transport and complete the `connected` handshake
/// 2. Enter event loop: read ride events + process commands + heartbeat
/// 3. On transport loss: void memberships, reconnect with backoff
/// 4. A missed heartbeat reply only degrades health; the transport is torn
///    down by the server, the OS, or an explicit force-reconnect
#[allow(clippy::too_many_arguments)]
async fn connection_task(
    mut cmd_rx: mpsc::Receiver<ConnCmd>,
    engine_tx: mpsc::Sender<EngineEvent>,
    base_url: String,
    jwt_token: String,
    timeouts: BodaLinkTimeouts,
    connection_options: ConnectionOptions,
    event_handlers: EventHandlers,
    connected: Arc<AtomicBool>,
    reconnect_attempts: Arc<AtomicU32>,
    ready_tx: Option<oneshot::Sender<Result<()>>>,
) {
    let mut tracker = SubscriptionTracker::new();
    let mut ws_stream: Option<WsStream> = None;
    let mut shutdown_requested = false;
    let mut paused = false;
    let mut skip_backoff_once = false;
    let mut healthy = true;

    // Heartbeat configuration. The heartbeat is application-level JSON
    // ping/pong; protocol frames are answered but not relied upon.
    let heartbeat_dur = if timeouts.heartbeat_interval.is_zero() {
        FAR_FUTURE
    } else {
        timeouts.heartbeat_interval
    };
    let has_heartbeat = !timeouts.heartbeat_interval.is_zero();
    let mut idle_deadline = TokioInstant::now() + heartbeat_dur;

    let pong_timeout_dur = timeouts.pong_timeout;
    let has_pong_timeout = has_heartbeat && !pong_timeout_dur.is_zero();
    let mut awaiting_pong = false;
    let mut pong_deadline = TokioInstant::now() + FAR_FUTURE; // inactive until first ping

    // Initial connection attempt (non-fatal on failure; the loop reconnects).
    match establish_ws(&base_url, &jwt_token, &timeouts, &event_handlers).await {
        Ok((stream, active_ride)) => {
            ws_stream = Some(stream);
            connected.store(true, Ordering::SeqCst);
            idle_deadline = TokioInstant::now() + heartbeat_dur;
            let _ = engine_tx
                .send(EngineEvent::Connected {
                    active_ride,
                    reconnect: false,
                })
                .await;
            if let Some(tx) = ready_tx {
                let _ = tx.send(Ok(()));
            }
        },
        Err(e) => {
            log::warn!("Initial connection failed (will keep retrying): {}", e);
            if let Some(tx) = ready_tx {
                let _ = tx.send(Err(e));
            }
        },
    }

    loop {
        if shutdown_requested {
            if let Some(ref mut ws) = ws_stream {
                for ride_id in tracker.joined_ids() {
                    let _ = send_client_event(
                        ws,
                        &ClientEvent::LeaveRide { ride_id },
                        &event_handlers,
                    )
                    .await;
                }
                let _ = ws.close(None).await;
            }
            tracker.invalidate_all();
            connected.store(false, Ordering::SeqCst);
            return;
        }

        if let Some(ref mut ws) = ws_stream {
            // Connected: multiplex reads, commands, heartbeat, and the
            // pending-join expiry timer.
            let idle_sleep = tokio::time::sleep_until(idle_deadline);
            tokio::pin!(idle_sleep);

            let pong_sleep = tokio::time::sleep_until(pong_deadline);
            tokio::pin!(pong_sleep);

            let join_deadline = tracker
                .next_deadline()
                .map(TokioInstant::from_std)
                .unwrap_or_else(|| TokioInstant::now() + FAR_FUTURE);
            let has_join_deadline = tracker.next_deadline().is_some();
            let join_sleep = tokio::time::sleep_until(join_deadline);
            tokio::pin!(join_sleep);

            tokio::select! {
                biased;

                // Pong timeout: nothing arrived since our heartbeat ping.
                // The connection is suspect but not provably dead; degrade
                // health and leave the transport alone.
                _ = &mut pong_sleep, if has_pong_timeout && awaiting_pong => {
                    log::warn!(
                        "[boda-link] No heartbeat reply within {:?}; marking connection unhealthy",
                        pong_timeout_dur,
                    );
                    awaiting_pong = false;
                    pong_deadline = TokioInstant::now() + FAR_FUTURE;
                    if healthy {
                        healthy = false;
                        event_handlers.emit_health_change(HealthStatus::unhealthy(format!(
                            "no heartbeat reply within {:?}",
                            pong_timeout_dur,
                        )));
                    }
                    // Keep pinging; a late reply restores health.
                    idle_deadline = TokioInstant::now() + heartbeat_dur;
                }

                // Pending joins whose confirmation never came.
                _ = &mut join_sleep, if has_join_deadline => {
                    let expired = tracker.expire_due(std::time::Instant::now());
                    for ride_id in expired {
                        log::warn!("Join confirmation for {} timed out", ride_id);
                    }
                }

                // Commands from the public API
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(ConnCmd::Join { ride_id, waiter }) => {
                            let deadline = std::time::Instant::now() + timeouts.join_timeout;
                            match tracker.begin_join(&ride_id, waiter, deadline) {
                                JoinDirective::SendRequest => {
                                    let event = ClientEvent::JoinRide { ride_id: ride_id.clone() };
                                    if let Err(e) = send_client_event(ws, &event, &event_handlers).await {
                                        log::warn!("Failed to send join for {}: {}", ride_id, e);
                                        ws_stream = None;
                                        handle_transport_drop(
                                            &mut tracker,
                                            &engine_tx,
                                            &connected,
                                            &event_handlers,
                                            &mut healthy,
                                            format!("Send failed: {}", e),
                                        ).await;
                                        continue;
                                    }
                                },
                                JoinDirective::Attached | JoinDirective::Resolved => {},
                            }
                        },
                        Some(ConnCmd::Leave { ride_id }) => {
                            if tracker.is_joined(&ride_id) {
                                let event = ClientEvent::LeaveRide { ride_id: ride_id.clone() };
                                if let Err(e) = send_client_event(ws, &event, &event_handlers).await {
                                    log::warn!("Failed to send leave for {}: {}", ride_id, e);
                                }
                            }
                            tracker.mark_left(&ride_id);
                        },
                        Some(ConnCmd::Send { event }) => {
                            if let Err(e) = send_client_event(ws, &event, &event_handlers).await {
                                log::warn!("Failed to send {}: {}", event.event_name(), e);
                                ws_stream = None;
                                handle_transport_drop(
                                    &mut tracker,
                                    &engine_tx,
                                    &connected,
                                    &event_handlers,
                                    &mut healthy,
                                    format!("Send failed: {}", e),
                                ).await;
                                continue;
                            }
                        },
                        Some(ConnCmd::CheckHealth { result_tx }) => {
                            let status = if healthy {
                                HealthStatus::healthy()
                            } else {
                                HealthStatus::unhealthy("no heartbeat reply")
                            };
                            let _ = result_tx.send(status);
                        },
                        Some(ConnCmd::IsJoined { ride_id, result_tx }) => {
                            let _ = result_tx.send(tracker.is_joined(&ride_id));
                        },
                        Some(ConnCmd::PauseReconnect) => {
                            paused = true;
                            tracker.reject_all_pending();
                        },
                        Some(ConnCmd::ResumeReconnect) => {
                            paused = false;
                            reconnect_attempts.store(0, Ordering::SeqCst);
                        },
                        Some(ConnCmd::ForceReconnect) => {
                            log::info!("[boda-link] Forcing reconnect");
                            let _ = ws.close(None).await;
                            ws_stream = None;
                            reconnect_attempts.store(0, Ordering::SeqCst);
                            skip_backoff_once = true;
                            handle_transport_drop(
                                &mut tracker,
                                &engine_tx,
                                &connected,
                                &event_handlers,
                                &mut healthy,
                                "Forced reconnect".to_string(),
                            ).await;
                            continue;
                        },
                        Some(ConnCmd::ResetSubscriptions) => {
                            tracker.invalidate_all();
                        },
                        Some(ConnCmd::Shutdown) | None => {
                            shutdown_requested = true;
                            continue;
                        },
                    }
                }

                // Heartbeat ping
                _ = &mut idle_sleep, if has_heartbeat && !awaiting_pong => {
                    let ping = ClientEvent::Ping { timestamp: now_timestamp() };
                    if let Err(e) = send_client_event(ws, &ping, &event_handlers).await {
                        log::warn!("Failed to send heartbeat ping: {}", e);
                        ws_stream = None;
                        handle_transport_drop(
                            &mut tracker,
                            &engine_tx,
                            &connected,
                            &event_handlers,
                            &mut healthy,
                            format!("Heartbeat send failed: {}", e),
                        ).await;
                        continue;
                    }
                    if has_pong_timeout {
                        awaiting_pong = true;
                        pong_deadline = TokioInstant::now() + pong_timeout_dur;
                    }
                    idle_deadline = TokioInstant::now() + heartbeat_dur;
                }

                // WebSocket frames
                frame = ws.next() => {
                    // Any frame proves the connection is alive.
                    idle_deadline = TokioInstant::now() + heartbeat_dur;
                    if awaiting_pong {
                        awaiting_pong = false;
                        pong_deadline = TokioInstant::now() + FAR_FUTURE;
                    }
                    if !healthy {
                        healthy = true;
                        event_handlers.emit_health_change(HealthStatus::healthy());
                    }

                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            if text.len() > MAX_WS_TEXT_MESSAGE_BYTES {
                                log::warn!("Text message too large ({} bytes)", text.len());
                                continue;
                            }
                            event_handlers.emit_receive(&text);
                            match serde_json::from_str::<ServerEvent>(&text) {
                                Ok(event) => {
                                    handle_server_event(
                                        event,
                                        ws,
                                        &mut tracker,
                                        &engine_tx,
                                        &event_handlers,
                                    ).await;
                                },
                                Err(e) => {
                                    log::warn!("Failed to parse ride event: {}", e);
                                },
                            }
                        },
                        Some(Ok(Message::Binary(_))) => {
                            log::debug!("[boda-link] Ignoring unexpected binary frame");
                        },
                        Some(Ok(Message::Close(frame))) => {
                            let reason = frame
                                .map(|f| format!("Server closed connection: {}", f.reason))
                                .unwrap_or_else(|| "Server closed connection".to_string());
                            ws_stream = None;
                            handle_transport_drop(
                                &mut tracker,
                                &engine_tx,
                                &connected,
                                &event_handlers,
                                &mut healthy,
                                reason,
                            ).await;
                            continue;
                        },
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = ws.send(Message::Pong(payload)).await;
                        },
                        Some(Ok(Message::Pong(_))) => {},
                        Some(Ok(Message::Frame(_))) => {},
                        Some(Err(e)) => {
                            ws_stream = None;
                            handle_transport_drop(
                                &mut tracker,
                                &engine_tx,
                                &connected,
                                &event_handlers,
                                &mut healthy,
                                format!("WebSocket error: {}", e),
                            ).await;
                            continue;
                        },
                        None => {
                            ws_stream = None;
                            handle_transport_drop(
                                &mut tracker,
                                &engine_tx,
                                &connected,
                                &event_handlers,
                                &mut healthy,
                                "WebSocket stream ended".to_string(),
                            ).await;
                            continue;
                        },
                    }
                }
            }
        } else {
            // ── Not connected: reconnect with backoff or idle on commands ──

            if shutdown_requested {
                continue;
            }

            if paused || !connection_options.auto_reconnect {
                let flow = handle_offline_cmd(
                    cmd_rx.recv().await,
                    &mut tracker,
                    &mut paused,
                    &reconnect_attempts,
                    &mut skip_backoff_once,
                )
                .await;
                match flow {
                    OfflineFlow::Continue => continue,
                    // An explicit resume or force-reconnect always gets an
                    // immediate attempt, even with auto-reconnect disabled.
                    OfflineFlow::Reconnect => {},
                    OfflineFlow::Shutdown => {
                        shutdown_requested = true;
                        continue;
                    },
                }
                if paused {
                    continue;
                }
            }

            let attempt = reconnect_attempts.fetch_add(1, Ordering::SeqCst);
            if skip_backoff_once {
                skip_backoff_once = false;
            } else {
                let delay = reconnect_delay(&connection_options, attempt);
                log::info!(
                    "Attempting reconnection in {}ms (attempt {})",
                    delay.as_millis(),
                    attempt + 1
                );

                // Wait out the backoff, but stay responsive to commands.
                let sleep_fut = tokio::time::sleep(delay);
                tokio::pin!(sleep_fut);

                let mut aborted = false;
                loop {
                    tokio::select! {
                        biased;
                        cmd = cmd_rx.recv() => {
                            match handle_offline_cmd(
                                cmd,
                                &mut tracker,
                                &mut paused,
                                &reconnect_attempts,
                                &mut skip_backoff_once,
                            ).await {
                                OfflineFlow::Continue => {
                                    if paused {
                                        aborted = true;
                                        break;
                                    }
                                },
                                OfflineFlow::Reconnect => break,
                                OfflineFlow::Shutdown => {
                                    shutdown_requested = true;
                                    aborted = true;
                                    break;
                                },
                            }
                        }
                        _ = &mut sleep_fut => {
                            break;
                        }
                    }
                }
                if aborted {
                    continue;
                }
                skip_backoff_once = false;
            }

            match establish_ws(&base_url, &jwt_token, &timeouts, &event_handlers).await {
                Ok((stream, active_ride)) => {
                    log::info!("Reconnection successful");
                    reconnect_attempts.store(0, Ordering::SeqCst);
                    connected.store(true, Ordering::SeqCst);
                    healthy = true;
                    ws_stream = Some(stream);
                    idle_deadline = TokioInstant::now() + heartbeat_dur;
                    awaiting_pong = false;
                    pong_deadline = TokioInstant::now() + FAR_FUTURE;
                    let _ = engine_tx
                        .send(EngineEvent::Connected {
                            active_ride,
                            reconnect: true,
                        })
                        .await;
                },
                Err(e) => {
                    log::warn!("Reconnection attempt {} failed: {}", attempt + 1, e);
                    // Loop back; attempts past the cap keep retrying at the
                    // capped delay.
                },
            }
        }
    }
}

/// React to a parsed server event: resolve joins, answer keepalives, and
/// forward domain events to the session driver.
async fn handle_server_event(
    event: ServerEvent,
    ws: &mut WsStream,
    tracker: &mut SubscriptionTracker,
    engine_tx: &mpsc::Sender<EngineEvent>,
    event_handlers: &EventHandlers,
) {
    match event {
        ServerEvent::Ping { timestamp } => {
            let pong = ClientEvent::Pong {
                timestamp: timestamp.unwrap_or_else(now_timestamp),
            };
            if let Err(e) = send_client_event(ws, &pong, event_handlers).await {
                log::warn!("Failed to answer server ping: {}", e);
            }
        },
        ServerEvent::Pong { .. } => {
            log::trace!("[boda-link] Heartbeat reply received");
        },
        ServerEvent::Connected { .. } => {
            // Handshake already completed; a repeat greeting is harmless.
            log::debug!("[boda-link] Ignoring repeated connected event");
        },
        ServerEvent::JoinedRide {
            ride_id,
            ride_status,
            last_driver_location,
            ..
        } => {
            log::info!("[boda-link] Joined ride {}", ride_id);
            tracker.complete(JoinGrant {
                ride_id,
                ride_status,
                last_driver_location,
            });
        },
        ServerEvent::LeftRide { ride_id, .. } => {
            tracker.mark_left(&ride_id);
        },
        ServerEvent::Error { message } => {
            if let Some(status) = ServerEvent::terminal_join_rejection(&message) {
                // The ride is already over. The reply carries no ride id, so
                // it is attributed to the oldest pending join only; other
                // in-flight joins keep waiting for their own replies.
                if let Some(ride_id) = tracker.oldest_pending_id() {
                    tracker.reject(
                        &ride_id,
                        BodaLinkError::RideClosed {
                            status: status.as_str().to_string(),
                        },
                    );
                    let _ = engine_tx
                        .send(EngineEvent::JoinRejected {
                            ride_id,
                            status,
                            message: message.clone(),
                        })
                        .await;
                }
            } else {
                log::warn!("Ride service error: {}", message);
                for ride_id in tracker.pending_ids() {
                    tracker.reject(&ride_id, BodaLinkError::ProtocolError(message.clone()));
                }
            }
        },
        other if other.is_domain_event() => {
            let _ = engine_tx.send(EngineEvent::Domain(other)).await;
        },
        other => {
            log::debug!("[boda-link] Ignoring {} event", other.event_name());
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_ws_url_schemes() {
        assert_eq!(
            resolve_ws_url("https://rides.example.com", "tok").unwrap(),
            "wss://rides.example.com/ws/rides?token=tok"
        );
        assert_eq!(
            resolve_ws_url("http://localhost:8000/", "tok").unwrap(),
            "ws://localhost:8000/ws/rides?token=tok"
        );
        assert_eq!(
            resolve_ws_url("ws://localhost:8000", "tok").unwrap(),
            "ws://localhost:8000/ws/rides?token=tok"
        );
    }

    #[test]
    fn test_resolve_ws_url_rejects_unknown_scheme() {
        assert!(matches!(
            resolve_ws_url("ftp://rides.example.com", "tok"),
            Err(BodaLinkError::ConfigurationError(_))
        ));
    }
}
