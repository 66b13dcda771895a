//! perimesh wire format: the datagram that carries a [`Message`] over the link.
//!
//! The link is a shared broadcast medium. Every datagram is seen by every
//! node; `target` says who it is for. A datagram without a target is a
//! broadcast. Receivers drop datagrams addressed to someone else and their
//! own echoes.
//!
//! Datagrams are JSON. Nothing on the link is trusted until it has been
//! decoded and validated here.

use serde::{Deserialize, Serialize};

use crate::message::{Message, NodeId, ProtocolError};

// ── Datagram ──────────────────────────────────────────────────────────────────

/// One datagram on the link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datagram {
    /// Wire format version. A receiver seeing an unknown version drops the datagram.
    pub version: u8,
    /// Node that put this datagram on the link.
    pub sender: NodeId,
    /// Addressee. `None` = everyone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<NodeId>,
    pub message: Message,
}

impl Datagram {
    pub fn broadcast(sender: NodeId, message: Message) -> Self {
        Self {
            version: WIRE_VERSION,
            sender,
            target: None,
            message,
        }
    }

    pub fn addressed(sender: NodeId, target: NodeId, message: Message) -> Self {
        Self {
            version: WIRE_VERSION,
            sender,
            target: Some(target),
            message,
        }
    }

    /// Should `local` process this datagram?
    pub fn is_for(&self, local: NodeId) -> bool {
        self.sender != local && self.target.map_or(true, |t| t == local)
    }

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let bytes = serde_json::to_vec(self).map_err(|e| WireError::Encode(e.to_string()))?;
        if bytes.len() > MAX_DATAGRAM {
            return Err(WireError::TooLarge(bytes.len()));
        }
        Ok(bytes)
    }

    /// Decode and validate. The embedded message gets `sender` stamped from
    /// the datagram, never from what the payload claims.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() > MAX_DATAGRAM {
            return Err(WireError::TooLarge(bytes.len()));
        }
        let raw: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|e| WireError::Decode(e.to_string()))?;

        let version = raw
            .get("version")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| WireError::Decode("missing version".to_string()))?;
        if version != u64::from(WIRE_VERSION) {
            return Err(WireError::UnknownVersion(version));
        }

        let sender: NodeId = raw
            .get("sender")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .ok_or_else(|| WireError::Decode("missing sender".to_string()))?;
        let target: Option<NodeId> = match raw.get("target") {
            None | Some(serde_json::Value::Null) => None,
            Some(v) => Some(
                serde_json::from_value(v.clone())
                    .map_err(|e| WireError::Decode(format!("bad target: {e}")))?,
            ),
        };
        let message = raw
            .get("message")
            .cloned()
            .ok_or_else(|| WireError::Decode("missing message".to_string()))?;
        let message = Message::from_value(message)?.with_sender(sender);
        message.validate()?;

        Ok(Self {
            version: WIRE_VERSION,
            sender,
            target,
            message,
        })
    }
}

// ── Constants ─────────────────────────────────────────────────────────────────

/// Current wire format version.
pub const WIRE_VERSION: u8 = 0x01;

/// Largest datagram accepted or produced, in bytes.
pub const MAX_DATAGRAM: usize = 60 * 1024;

/// IPv6 link-local multicast group the link rides on.
pub const MULTICAST_ADDR: &str = "ff02::1";

/// UDP port every node binds for link traffic.
pub const LINK_PORT: u16 = 9100;

/// Default control API port (loopback only).
pub const API_PORT: u16 = 9101;

/// Default unsolicited re-announce interval in seconds.
pub const ANNOUNCE_INTERVAL_SECS: u64 = 30;

/// Default time a caller waits for a RESULT/ERROR, in milliseconds.
pub const CALL_TIMEOUT_MS: u64 = 2_000;

/// Default time a discovery round waits for the first LIST, in milliseconds.
pub const DISCOVER_WAIT_MS: u64 = 2_000;

/// Consecutive failed calls after which a proxy is marked disconnected.
pub const DISCONNECT_THRESHOLD: u32 = 3;

/// Minimum wait after a disconnect before a proxy tries to rediscover.
pub const RECONNECT_COOLDOWN_SECS: u64 = 10;

/// Default interval of the pending-request sweep, in milliseconds.
pub const SWEEP_INTERVAL_MS: u64 = 1_000;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting link data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("datagram of {0} bytes exceeds maximum {}", MAX_DATAGRAM)]
    TooLarge(usize),

    #[error("unknown wire version: {0}")]
    UnknownVersion(u64),

    #[error("failed to encode datagram: {0}")]
    Encode(String),

    #[error("failed to decode datagram: {0}")]
    Decode(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
