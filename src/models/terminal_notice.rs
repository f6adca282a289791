use crate::models::RideStatus;
use serde::{Deserialize, Serialize};

/// Why a ride stopped being the active ride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalKind {
    Completed,
    Cancelled,
    NoDriverFound,
    /// The server no longer knows the ride at all.
    NotFound,
}

impl TerminalKind {
    /// Map a terminal ride status to its notice kind, if any.
    pub fn from_status(status: RideStatus) -> Option<Self> {
        match status {
            RideStatus::Completed => Some(Self::Completed),
            RideStatus::Cancelled => Some(Self::Cancelled),
            RideStatus::NoDriverFound => Some(Self::NoDriverFound),
            _ => None,
        }
    }
}

impl std::fmt::Display for TerminalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::NoDriverFound => "no_driver_found",
            Self::NotFound => "not_found",
        };
        write!(f, "{}", s)
    }
}

/// Notification that the active ride reached a terminal outcome and local
/// state for it has been torn down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalNotice {
    pub ride_id: String,
    pub kind: TerminalKind,
    /// Server-provided message, when one accompanied the terminal event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TerminalNotice {
    pub fn new(ride_id: impl Into<String>, kind: TerminalKind) -> Self {
        Self {
            ride_id: ride_id.into(),
            kind,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}
