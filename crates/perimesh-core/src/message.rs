//! Peripheral RPC message protocol.
//!
//! Every exchange between a Host and a Client is a single [`Message`]
//! envelope. Requests (DISCOVER, CALL) carry a fresh correlation id; the
//! matching reply (LIST, RESULT, ERROR) echoes it unchanged. ANNOUNCE is
//! fire-and-forget.
//!
//! This module is pure construction and validation. Nothing here touches
//! the network.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Identity ──────────────────────────────────────────────────────────────────

/// Stable numeric identity of a node on the link.
///
/// Ordering is numeric. Bare-name lookups resolve to the smallest owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u32>()
            .map(NodeId)
            .map_err(|_| ProtocolError::InvalidNodeId(s.to_string()))
    }
}

/// A node's identity plus the human-readable label shown on first contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub id: NodeId,
    pub label: String,
}

impl NodeIdentity {
    pub fn new(id: NodeId, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
        }
    }
}

// ── Remote keys ───────────────────────────────────────────────────────────────

/// Address of a remote peripheral as typed by application code.
///
/// `"10::left"` is owner-qualified and names exactly one entry.
/// `"left"` is a bare name and resolves through the alias index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RemoteKey {
    Qualified { owner: NodeId, name: String },
    Bare(String),
}

impl RemoteKey {
    pub fn qualified(owner: NodeId, name: impl Into<String>) -> Self {
        RemoteKey::Qualified {
            owner,
            name: name.into(),
        }
    }

    /// Parse a key. Anything that is not `<number>::<name>` is a bare name.
    pub fn parse(key: &str) -> Self {
        if let Some((owner, name)) = key.split_once("::") {
            if let (Ok(owner), false) = (owner.parse::<NodeId>(), name.is_empty()) {
                return RemoteKey::qualified(owner, name);
            }
        }
        RemoteKey::Bare(key.to_string())
    }

    pub fn name(&self) -> &str {
        match self {
            RemoteKey::Qualified { name, .. } => name,
            RemoteKey::Bare(name) => name,
        }
    }
}

impl fmt::Display for RemoteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteKey::Qualified { owner, name } => write!(f, "{owner}::{name}"),
            RemoteKey::Bare(name) => f.write_str(name),
        }
    }
}

// ── Kinds ─────────────────────────────────────────────────────────────────────

/// The closed set of message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    /// Client → Host: "what do you expose?"
    Discover,
    /// Host → Client: reply to DISCOVER.
    List,
    /// Host → all: unsolicited capability-set publication.
    Announce,
    /// Client → Host: invoke a method.
    Call,
    /// Host → Client: successful invocation.
    Result,
    /// Host → Client: failed invocation or lookup.
    Error,
}

impl MessageKind {
    pub const ALL: [MessageKind; 6] = [
        MessageKind::Discover,
        MessageKind::List,
        MessageKind::Announce,
        MessageKind::Call,
        MessageKind::Result,
        MessageKind::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Discover => "DISCOVER",
            MessageKind::List => "LIST",
            MessageKind::Announce => "ANNOUNCE",
            MessageKind::Call => "CALL",
            MessageKind::Result => "RESULT",
            MessageKind::Error => "ERROR",
        }
    }

    /// Kinds that expect a correlated reply.
    pub fn is_request(self) -> bool {
        matches!(self, MessageKind::Discover | MessageKind::Call)
    }

    /// Kinds whose correlation id is meaningful (requests and their replies).
    pub fn is_correlated(self) -> bool {
        !matches!(self, MessageKind::Announce)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownKind(s.to_string()))
    }
}

// ── Payloads ──────────────────────────────────────────────────────────────────

/// What a Host advertises about one local peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// The closed set of invocable methods.
    pub methods: Vec<String>,
}

/// Payload of LIST and ANNOUNCE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListPayload {
    pub node: NodeId,
    #[serde(default)]
    pub label: String,
    pub capabilities: Vec<CapabilityDescriptor>,
}

/// Payload of CALL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallPayload {
    pub capability: String,
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// Payload of RESULT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultPayload {
    #[serde(default)]
    pub results: Vec<Value>,
}

/// Payload of ERROR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: String,
}

// ── Envelope ──────────────────────────────────────────────────────────────────

/// The message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub kind: MessageKind,
    /// Correlation id. Generated once per request, echoed by the reply.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub payload: Value,
    /// Filled in by the transport on receipt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<NodeId>,
}

impl Message {
    /// Build a message with a fresh correlation id.
    pub fn new(kind: MessageKind, payload: Value) -> Self {
        Self {
            kind,
            id: uuid::Uuid::new_v4().to_string(),
            payload,
            sender: None,
        }
    }

    /// Build a reply that carries this message's correlation id.
    pub fn reply(&self, kind: MessageKind, payload: Value) -> Self {
        Self {
            kind,
            id: self.id.clone(),
            payload,
            sender: None,
        }
    }

    pub fn discover() -> Self {
        Self::new(MessageKind::Discover, Value::Object(Default::default()))
    }

    pub fn announce(list: &ListPayload) -> Self {
        Self::new(MessageKind::Announce, to_value(list))
    }

    pub fn call(capability: &str, method: &str, args: Vec<Value>) -> Self {
        let payload = CallPayload {
            capability: capability.to_string(),
            method: method.to_string(),
            args,
        };
        Self::new(MessageKind::Call, to_value(&payload))
    }

    pub fn list_reply(&self, list: &ListPayload) -> Self {
        self.reply(MessageKind::List, to_value(list))
    }

    pub fn result_reply(&self, results: Vec<Value>) -> Self {
        self.reply(MessageKind::Result, to_value(&ResultPayload { results }))
    }

    pub fn error_reply(&self, error: impl Into<String>) -> Self {
        let payload = ErrorPayload {
            error: error.into(),
        };
        self.reply(MessageKind::Error, to_value(&payload))
    }

    pub fn with_sender(mut self, sender: NodeId) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn is_request(&self) -> bool {
        self.kind.is_request()
    }

    /// Deserialize the payload as the given type.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| ProtocolError::InvalidPayload {
            kind: self.kind,
            reason: e.to_string(),
        })
    }

    /// Check the envelope shape for its kind.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.kind.is_correlated() && self.id.trim().is_empty() {
            return Err(ProtocolError::MissingCorrelationId(self.kind));
        }
        match self.kind {
            MessageKind::Discover => match self.payload {
                Value::Null | Value::Object(_) => Ok(()),
                _ => Err(ProtocolError::InvalidPayload {
                    kind: self.kind,
                    reason: "expected an object".to_string(),
                }),
            },
            MessageKind::List | MessageKind::Announce => {
                self.payload_as::<ListPayload>().map(|_| ())
            }
            MessageKind::Call => {
                let call = self.payload_as::<CallPayload>()?;
                if call.capability.is_empty() || call.method.is_empty() {
                    return Err(ProtocolError::InvalidPayload {
                        kind: self.kind,
                        reason: "capability and method must be non-empty".to_string(),
                    });
                }
                Ok(())
            }
            MessageKind::Result => self.payload_as::<ResultPayload>().map(|_| ()),
            MessageKind::Error => self.payload_as::<ErrorPayload>().map(|_| ()),
        }
    }

    /// Parse and validate a message from its JSON form.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let raw: Value =
            serde_json::from_slice(bytes).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        let message = Self::from_value(raw)?;
        message.validate()?;
        Ok(message)
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Convert an untyped JSON value into an envelope, rejecting unknown kinds.
    pub fn from_value(raw: Value) -> Result<Self, ProtocolError> {
        let kind = match raw.get("kind") {
            Some(Value::String(k)) => k.parse::<MessageKind>()?,
            Some(_) => return Err(ProtocolError::Malformed("kind must be a string".into())),
            None => return Err(ProtocolError::MissingKind),
        };
        let mut message: Message =
            serde_json::from_value(raw).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        message.kind = kind;
        Ok(message)
    }
}

fn to_value<T: Serialize>(payload: &T) -> Value {
    // Payload types are plain structs of strings, numbers and JSON values.
    serde_json::to_value(payload).unwrap_or(Value::Null)
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("message has no kind")]
    MissingKind,

    #[error("unknown message kind: {0}")]
    UnknownKind(String),

    #[error("{0} message is missing its correlation id")]
    MissingCorrelationId(MessageKind),

    #[error("invalid {kind} payload: {reason}")]
    InvalidPayload { kind: MessageKind, reason: String },

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("invalid node id: {0:?}")]
    InvalidNodeId(String),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
