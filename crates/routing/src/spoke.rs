use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use {
    chrono::{DateTime, Utc},
    serde::Serialize,
    sha2::{Digest, Sha256},
    tokio::sync::mpsc,
};

use spokehub_protocol::{
    DEFAULT_TRUST_SCORE, HubId, SpokeId, SpokeRecord, VirtualAddress, address,
};

/// A point in time that can be read and replaced from any thread.
///
/// Stored as microseconds since the Unix epoch.
#[derive(Debug)]
pub struct AtomicTimestamp(AtomicI64);

impl AtomicTimestamp {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self(AtomicI64::new(at.timestamp_micros()))
    }

    pub fn now() -> Self {
        Self::new(Utc::now())
    }

    pub fn load(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_micros(self.0.load(Ordering::Acquire)).unwrap_or_default()
    }

    pub fn store(&self, at: DateTime<Utc>) {
        self.0.store(at.timestamp_micros(), Ordering::Release);
    }

    pub fn touch(&self) {
        self.store(Utc::now());
    }
}

/// Registration parameters for a new spoke.
#[derive(Debug, Clone)]
pub struct NewSpoke {
    pub tenant_id: String,
    pub agent_id: String,
    pub capabilities: Vec<String>,
    pub trust_score: f64,
    pub entitlements: Vec<String>,
    /// Outbound queue of the spoke's live connection, attached in the same
    /// critical section that makes the spoke routable.
    pub outbound: Option<mpsc::Sender<String>>,
}

impl NewSpoke {
    pub fn new(tenant_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            agent_id: agent_id.into(),
            capabilities: Vec::new(),
            trust_score: DEFAULT_TRUST_SCORE,
            entitlements: Vec::new(),
            outbound: None,
        }
    }

    pub fn with_outbound(mut self, tx: mpsc::Sender<String>) -> Self {
        self.outbound = Some(tx);
        self
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_trust(mut self, trust_score: f64) -> Self {
        self.trust_score = trust_score;
        self
    }

    pub fn with_entitlements<I, S>(mut self, entitlements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entitlements = entitlements.into_iter().map(Into::into).collect();
        self
    }
}

/// A spoke registered on this hub.
///
/// Identity fields never change after registration. The counters are touched
/// concurrently by the routing path (deliveries) and by the spoke's reader
/// task (inbound frames).
#[derive(Debug)]
pub struct SpokeInfo {
    pub id: SpokeId,
    pub tenant_id: String,
    pub agent_id: String,
    pub virtual_addr: VirtualAddress,
    pub capabilities: Vec<String>,
    pub trust_score: f64,
    pub entitlements: Vec<String>,
    pub connected_at: DateTime<Utc>,
    last_seen: AtomicTimestamp,
    message_count: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_recv: AtomicU64,
}

impl SpokeInfo {
    pub(crate) fn new(id: SpokeId, hub: &HubId, params: NewSpoke, now: DateTime<Utc>) -> Self {
        let virtual_addr = address::direct(hub, &params.tenant_id, &params.agent_id);
        Self {
            id,
            tenant_id: params.tenant_id,
            agent_id: params.agent_id,
            virtual_addr,
            capabilities: params.capabilities,
            trust_score: params.trust_score,
            entitlements: params.entitlements,
            connected_at: now,
            last_seen: AtomicTimestamp::new(now),
            message_count: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_recv: AtomicU64::new(0),
        }
    }

    /// Account for a frame received from the spoke.
    pub fn touch(&self, len: usize) {
        self.message_count.fetch_add(1, Ordering::Relaxed);
        self.bytes_recv.fetch_add(len as u64, Ordering::Relaxed);
        self.last_seen.touch();
    }

    /// Account for a message delivered to the spoke.
    pub fn record_delivery(&self, len: usize) {
        self.message_count.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(len as u64, Ordering::Relaxed);
        self.last_seen.touch();
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    pub fn last_seen(&self) -> DateTime<Utc> {
        self.last_seen.load()
    }

    pub fn message_count(&self) -> u64 {
        self.message_count.load(Ordering::Relaxed)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_recv(&self) -> u64 {
        self.bytes_recv.load(Ordering::Relaxed)
    }

    /// Projection stored in the fleet-wide directory.
    pub fn record(&self, hub_id: &HubId) -> SpokeRecord {
        SpokeRecord {
            id: self.id.clone(),
            hub_id: hub_id.clone(),
            tenant_id: self.tenant_id.clone(),
            agent_id: self.agent_id.clone(),
            virtual_addr: self.virtual_addr.clone(),
            capabilities: self.capabilities.clone(),
            trust_score: self.trust_score,
            entitlements: self.entitlements.clone(),
            connected_at: self.connected_at,
        }
    }

    pub fn snapshot(&self) -> SpokeSnapshot {
        SpokeSnapshot {
            id: self.id.clone(),
            tenant_id: self.tenant_id.clone(),
            agent_id: self.agent_id.clone(),
            virtual_addr: self.virtual_addr.clone(),
            capabilities: self.capabilities.clone(),
            trust_score: self.trust_score,
            connected_at: self.connected_at,
            last_seen: self.last_seen(),
            message_count: self.message_count(),
            bytes_sent: self.bytes_sent(),
            bytes_recv: self.bytes_recv(),
        }
    }
}

/// Point-in-time view of a spoke for the HTTP API.
#[derive(Debug, Clone, Serialize)]
pub struct SpokeSnapshot {
    pub id: SpokeId,
    pub tenant_id: String,
    pub agent_id: String,
    pub virtual_addr: VirtualAddress,
    pub capabilities: Vec<String>,
    pub trust_score: f64,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub message_count: u64,
    pub bytes_sent: u64,
    pub bytes_recv: u64,
}

/// Hex of the first 8 bytes of SHA-256(`tenant:agent:nanos`).
pub(crate) fn spoke_id(tenant_id: &str, agent_id: &str, nanos: i64) -> SpokeId {
    let digest = Sha256::digest(format!("{tenant_id}:{agent_id}:{nanos}").as_bytes());
    let hex: String = digest[..8].iter().map(|b| format!("{b:02x}")).collect();
    SpokeId::new(hex)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, std::sync::Arc};

    fn spoke() -> SpokeInfo {
        SpokeInfo::new(
            SpokeId::from("s1"),
            &HubId::from("hub-a"),
            NewSpoke::new("t1", "a1").with_capabilities(["data"]),
            Utc::now(),
        )
    }

    #[test]
    fn spoke_id_is_sixteen_hex_chars() {
        let id = spoke_id("t1", "a1", 42);
        assert_eq!(id.as_str().len(), 16);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, spoke_id("t1", "a1", 42));
        assert_ne!(id, spoke_id("t1", "a1", 43));
    }

    #[test]
    fn virtual_address_uses_hub_tenant_agent() {
        assert_eq!(spoke().virtual_addr.as_str(), "ocx://hub-a/t1/a1");
    }

    #[test]
    fn atomic_timestamp_round_trips_micros() {
        let at = DateTime::from_timestamp_micros(1_700_000_000_123_456).unwrap();
        let cell = AtomicTimestamp::new(at);
        assert_eq!(cell.load(), at);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_touches_are_not_lost() {
        let spoke = Arc::new(spoke());
        let before = spoke.last_seen();
        let tasks: Vec<_> = (0..1000)
            .map(|_| {
                let spoke = Arc::clone(&spoke);
                tokio::spawn(async move { spoke.touch(10) })
            })
            .collect();
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(spoke.message_count(), 1000);
        assert_eq!(spoke.bytes_recv(), 10_000);
        assert_eq!(spoke.bytes_sent(), 0);
        assert!(spoke.last_seen() >= before);
    }

    #[test]
    fn delivery_counts_bytes_sent() {
        let spoke = spoke();
        spoke.record_delivery(7);
        assert_eq!(spoke.message_count(), 1);
        assert_eq!(spoke.bytes_sent(), 7);
        assert_eq!(spoke.bytes_recv(), 0);
    }
}
