#![allow(dead_code)]
//! In-process fake ride server for integration tests.
//!
//! Speaks just enough of the ride-channel protocol for the client to run
//! end to end: the `connected` greeting, join/leave, ping/pong, and a
//! control handle to drop every connection (simulating a network cut).

use async_trait::async_trait;
use boda_link::{RideDetails, RideStatus, RideValidator, ValidationOutcome};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;

#[derive(Default)]
struct ServerState {
    /// ride id -> status string, shared with the fake validator.
    rides: Mutex<HashMap<String, String>>,
    /// Active-ride hint included in the `connected` greeting.
    active_ride: Mutex<Option<String>>,
    /// Every `join_ride` received, in order.
    joins: Mutex<Vec<String>>,
    /// Every `pong` received.
    pongs: Mutex<Vec<String>>,
    /// Connections accepted so far.
    connections: Mutex<u32>,
    /// When set, client heartbeat pings are swallowed instead of answered.
    suppress_pongs: Mutex<bool>,
}

pub struct FakeRideServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    close_tx: broadcast::Sender<()>,
    ping_tx: broadcast::Sender<()>,
    _task: JoinHandle<()>,
}

impl FakeRideServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(ServerState::default());
        let (close_tx, _) = broadcast::channel(8);
        let (ping_tx, _) = broadcast::channel(8);

        let accept_state = state.clone();
        let accept_close = close_tx.clone();
        let accept_ping = ping_tx.clone();
        let task = tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(_) => return,
                };
                *accept_state.connections.lock().unwrap() += 1;
                tokio::spawn(handle_connection(
                    stream,
                    accept_state.clone(),
                    accept_close.subscribe(),
                    accept_ping.subscribe(),
                ));
            }
        });

        Self {
            addr,
            state,
            close_tx,
            ping_tx,
            _task: task,
        }
    }

    /// Base URL in the form the client builder expects.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn set_ride(&self, ride_id: &str, status: &str) {
        self.state
            .rides
            .lock()
            .unwrap()
            .insert(ride_id.to_string(), status.to_string());
    }

    pub fn remove_ride(&self, ride_id: &str) {
        self.state.rides.lock().unwrap().remove(ride_id);
    }

    pub fn set_active_ride(&self, ride_id: Option<&str>) {
        *self.state.active_ride.lock().unwrap() = ride_id.map(str::to_string);
    }

    pub fn join_count(&self, ride_id: &str) -> usize {
        self.state
            .joins
            .lock()
            .unwrap()
            .iter()
            .filter(|id| id.as_str() == ride_id)
            .count()
    }

    pub fn pong_count(&self) -> usize {
        self.state.pongs.lock().unwrap().len()
    }

    pub fn connection_count(&self) -> u32 {
        *self.state.connections.lock().unwrap()
    }

    /// Drop every open connection, as a network cut would.
    pub fn disconnect_all(&self) {
        let _ = self.close_tx.send(());
    }

    /// Stop (or resume) answering client heartbeat pings.
    pub fn set_suppress_pongs(&self, suppress: bool) {
        *self.state.suppress_pongs.lock().unwrap() = suppress;
    }

    /// Send a server-initiated heartbeat ping to every open connection.
    pub fn send_ping_all(&self) {
        let _ = self.ping_tx.send(());
    }

    /// Validator backed by the same ride table the WebSocket side serves.
    pub fn validator(&self) -> Arc<TableValidator> {
        Arc::new(TableValidator {
            state: self.state.clone(),
        })
    }
}

async fn handle_connection(
    stream: TcpStream,
    state: Arc<ServerState>,
    mut close_rx: broadcast::Receiver<()>,
    mut ping_rx: broadcast::Receiver<()>,
) {
    let mut ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(_) => return,
    };

    let greeting = {
        let active = state.active_ride.lock().unwrap().clone();
        let active_json = active.and_then(|ride_id| {
            state
                .rides
                .lock()
                .unwrap()
                .get(&ride_id)
                .map(|status| json!({ "ride_id": ride_id, "status": status }))
        });
        json!({
            "event_type": "connected",
            "user_id": "u-test",
            "role": "passenger",
            "active_ride": active_json,
        })
    };
    if ws
        .send(Message::Text(greeting.to_string().into()))
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            _ = close_rx.recv() => {
                let _ = ws.close(None).await;
                return;
            }
            _ = ping_rx.recv() => {
                let ping = json!({
                    "event_type": "ping",
                    "timestamp": "2026-08-29T12:00:00Z",
                });
                if ws.send(Message::Text(ping.to_string().into())).await.is_err() {
                    return;
                }
            }
            frame = ws.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = ws.send(Message::Pong(payload)).await;
                        continue;
                    }
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Ok(_)) => continue,
                    Some(Err(_)) => return,
                };
                let event: Value = match serde_json::from_str(&text) {
                    Ok(event) => event,
                    Err(_) => continue,
                };
                let reply = match event["event_type"].as_str() {
                    Some("join_ride") => {
                        let ride_id = event["ride_id"].as_str().unwrap_or_default().to_string();
                        let status = state.rides.lock().unwrap().get(&ride_id).cloned();
                        match status {
                            Some(status) if is_terminal(&status) => json!({
                                "event_type": "error",
                                "message": format!("Cannot join ride with status: {}", status),
                            }),
                            Some(status) => {
                                state.joins.lock().unwrap().push(ride_id.clone());
                                json!({
                                    "event_type": "joined_ride",
                                    "ride_id": ride_id,
                                    "ride_status": status,
                                })
                            }
                            None => json!({
                                "event_type": "error",
                                "message": "Ride not found",
                            }),
                        }
                    }
                    Some("leave_ride") => json!({
                        "event_type": "left_ride",
                        "ride_id": event["ride_id"].as_str().unwrap_or_default(),
                    }),
                    Some("ping") => {
                        if *state.suppress_pongs.lock().unwrap() {
                            continue;
                        }
                        json!({
                            "event_type": "pong",
                            "timestamp": event["timestamp"].as_str().unwrap_or_default(),
                        })
                    }
                    Some("pong") => {
                        state
                            .pongs
                            .lock()
                            .unwrap()
                            .push(event["timestamp"].as_str().unwrap_or_default().to_string());
                        continue;
                    }
                    _ => continue,
                };
                if ws.send(Message::Text(reply.to_string().into())).await.is_err() {
                    return;
                }
            }
        }
    }
}

fn is_terminal(status: &str) -> bool {
    matches!(status, "completed" | "cancelled" | "no_driver_found")
}

/// Validator over the fake server's ride table, standing in for the REST
/// API in tests.
pub struct TableValidator {
    state: Arc<ServerState>,
}

#[async_trait]
impl RideValidator for TableValidator {
    async fn fetch_ride(&self, ride_id: &str) -> boda_link::Result<ValidationOutcome> {
        let status = self.state.rides.lock().unwrap().get(ride_id).cloned();
        match status {
            Some(status) => {
                let details: RideDetails = serde_json::from_value(json!({
                    "id": ride_id,
                    "status": status,
                }))?;
                Ok(ValidationOutcome::Found(details))
            }
            None => Ok(ValidationOutcome::NotFound),
        }
    }
}

/// Poll until `check` passes or the timeout elapses.
pub async fn wait_for<F>(what: &str, timeout: std::time::Duration, mut check: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while !check() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
    }
}
