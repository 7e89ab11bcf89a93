//! Config schema. Every section defaults, so an empty file is valid.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpokehubConfig {
    pub server: ServerConfig,
    pub hub: HubSection,
    pub transport: TransportConfig,
    pub admission: AdmissionConfig,
    pub store: StoreConfig,
    pub events: EventsConfig,
    pub federation: FederationConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

/// Identity of this hub within the fleet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubSection {
    pub id: String,
    pub region: String,
    pub namespace: String,
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            id: "spokehub-primary".into(),
            region: "default".into(),
            namespace: "default".into(),
        }
    }
}

/// Per-connection transport limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub ping_interval_secs: u64,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub max_frame_bytes: usize,
    pub outbound_queue: usize,
    /// Deadline for routing one inbound frame.
    pub route_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: 30,
            read_timeout_secs: 60,
            write_timeout_secs: 10,
            max_frame_bytes: 512 * 1024,
            outbound_queue: 256,
            route_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdmissionMode {
    /// Only listed origins may open spoke connections.
    Strict,
    /// Any origin is accepted and logged.
    #[default]
    Permissive,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    pub mode: AdmissionMode,
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Memory,
    Sqlite,
}

/// Fleet-wide spoke directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub enabled: bool,
    pub backend: BackendKind,
    /// Database file for the sqlite backend.
    pub path: Option<PathBuf>,
    pub key_prefix: String,
    pub spoke_ttl_secs: u64,
    pub op_timeout_ms: u64,
    pub heartbeat_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            backend: BackendKind::Memory,
            path: None,
            key_prefix: "spokehub:hub:".into(),
            spoke_ttl_secs: 600,
            op_timeout_ms: 3_000,
            heartbeat_interval_secs: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub enabled: bool,
    pub backend: BackendKind,
    pub path: Option<PathBuf>,
    pub channel_prefix: String,
    pub publish_timeout_ms: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: BackendKind::Memory,
            path: None,
            channel_prefix: "spokehub:events:".into(),
            publish_timeout_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FederationConfig {
    pub forward_timeout_ms: u64,
    /// Peers known at startup; more can be added over the API.
    pub peers: Vec<PeerEntry>,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            forward_timeout_ms: 5_000,
            peers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerEntry {
    pub id: String,
    pub endpoint: String,
    #[serde(default)]
    pub region: String,
    #[serde(default = "default_peer_trust")]
    pub trust_level: f64,
}

fn default_peer_trust() -> f64 {
    0.5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}
