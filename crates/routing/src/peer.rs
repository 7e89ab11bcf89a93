use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

use spokehub_protocol::HubId;

/// Minimum trust level a peer needs before messages are forwarded to it.
pub const MIN_PEER_TRUST: f64 = 0.5;

/// Another hub this hub may forward to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerHub {
    pub id: HubId,
    /// Base URL of the peer's HTTP surface.
    pub endpoint: String,
    #[serde(default)]
    pub region: String,
    pub trust_level: f64,
    #[serde(default = "default_connected")]
    pub connected: bool,
    #[serde(default = "Utc::now")]
    pub last_heartbeat: DateTime<Utc>,
}

fn default_connected() -> bool {
    true
}

impl PeerHub {
    pub fn new(id: impl Into<HubId>, endpoint: impl Into<String>, trust_level: f64) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
            region: String::new(),
            trust_level,
            connected: true,
            last_heartbeat: Utc::now(),
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn eligible(&self) -> bool {
        self.connected && self.trust_level >= MIN_PEER_TRUST
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn eligibility_needs_connection_and_trust() {
        assert!(PeerHub::new("b", "http://b", 0.5).eligible());
        assert!(!PeerHub::new("b", "http://b", 0.49).eligible());
        let mut down = PeerHub::new("b", "http://b", 0.9);
        down.connected = false;
        assert!(!down.eligible());
    }

    #[test]
    fn defaults_apply_when_deserializing() {
        let peer: PeerHub =
            serde_json::from_str(r#"{"id":"hub-b","endpoint":"http://b:8080","trust_level":0.8}"#)
                .unwrap();
        assert!(peer.connected);
        assert!(peer.region.is_empty());
    }
}
