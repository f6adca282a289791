use std::time::{SystemTime, UNIX_EPOCH};

/// Current time in millis since Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Wire timestamp for outbound ping/pong payloads. The server treats it as
/// opaque, so epoch millis are sufficient.
pub fn now_timestamp() -> String {
    now_ms().to_string()
}
