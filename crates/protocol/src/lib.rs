//! Spoke wire protocol definitions.
//!
//! All spoke traffic uses JSON text frames over WebSocket.
//!
//! Frame types:
//! - `SpokeEnvelope`: spoke → hub message to be routed
//! - `RoutedFrame`: hub → spoke acknowledgement of a successful route
//! - `ErrorFrame`: hub → spoke routing failure
//! - `DeliverFrame`: hub → spoke message addressed to that spoke

pub mod address;
pub mod event;
pub mod ids;
pub mod message;
pub mod record;

use serde::{Deserialize, Serialize};

pub use {
    address::Destination,
    event::CloudEvent,
    ids::{HubId, SpokeId, VirtualAddress},
    message::Message,
    record::SpokeRecord,
};

// ── Constants ────────────────────────────────────────────────────────────────

pub const MAX_FRAME_BYTES: usize = 524_288; // 512 KiB
pub const PING_INTERVAL_MS: u64 = 30_000; // 30s
pub const READ_TIMEOUT_MS: u64 = 60_000; // 60s
pub const WRITE_TIMEOUT_MS: u64 = 10_000; // 10s
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;
pub const OUTBOUND_BATCH_MAX: usize = 32;
/// Hop budget assigned to every message entering the fabric from a spoke.
pub const INITIAL_TTL: i32 = 5;
pub const DEFAULT_TENANT: &str = "default";
pub const DEFAULT_TRUST_SCORE: f64 = 0.5;
pub const DEFAULT_CAPABILITY: &str = "data";
/// Path spokes connect to after registering over HTTP.
pub const SPOKE_URL: &str = "/ws";

// ── Admission headers ────────────────────────────────────────────────────────

pub mod headers {
    pub const TENANT_ID: &str = "x-tenant-id";
    pub const AGENT_ID: &str = "x-agent-id";
    pub const CAPABILITIES: &str = "x-capabilities";
    pub const TRUST_SCORE: &str = "x-trust-score";
}

// ── Frames ───────────────────────────────────────────────────────────────────

/// Spoke → hub message. `payload` is opaque to the fabric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpokeEnvelope {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    pub destination: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

/// Hub → spoke acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutedFrame {
    pub id: String,
    pub status: String, // always "routed"
    pub destinations: Vec<VirtualAddress>,
    pub hops: u32,
}

impl RoutedFrame {
    pub fn new(id: impl Into<String>, destinations: Vec<VirtualAddress>, hops: u32) -> Self {
        Self {
            id: id.into(),
            status: "routed".into(),
            destinations,
            hops,
        }
    }
}

/// Hub → spoke routing failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub id: String,
    pub error: String,
}

impl ErrorFrame {
    pub fn new(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            error: error.into(),
        }
    }
}

/// Hub → spoke delivery of a routed message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverFrame {
    pub r#type: String, // always "deliver"
    pub id: String,
    pub message_type: String,
    pub source: VirtualAddress,
    pub tenant_id: String,
    /// Base64 of the message payload: the raw inbound frame for messages
    /// sent over a spoke socket, the JSON `payload` value for messages
    /// submitted through `POST /api/route`.
    pub payload: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl DeliverFrame {
    pub fn from_message(msg: &Message) -> Self {
        use base64::Engine;
        Self {
            r#type: "deliver".into(),
            id: msg.id.clone(),
            message_type: msg.kind.clone(),
            source: msg.source.clone(),
            tenant_id: msg.tenant_id.clone(),
            payload: base64::engine::general_purpose::STANDARD.encode(&msg.payload),
            timestamp: msg.timestamp,
        }
    }
}

// ── Registration API ─────────────────────────────────────────────────────────

/// Body of `POST /api/spokes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterSpokeRequest {
    pub agent_id: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub trust_score: f64,
    #[serde(default)]
    pub entitlements: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterSpokeResponse {
    pub agent_id: String,
    pub hub_id: HubId,
    pub spoke_id: SpokeId,
    pub status: String,
    pub region: String,
    pub spoke_url: String,
    /// Set when the spoke is registered locally but the fleet directory
    /// could not be updated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}
