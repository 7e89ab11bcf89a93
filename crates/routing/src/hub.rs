use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use {
    chrono::Utc,
    dashmap::DashMap,
    serde::Serialize,
    tokio::sync::{RwLock, mpsc},
    tracing::{debug, info, warn},
};

use {
    spokehub_protocol::{
        DeliverFrame, Destination, HubId, Message, SpokeId, SpokeRecord, VirtualAddress,
        event::{CloudEvent, types},
    },
    spokehub_service_traits::{
        EventPublisher, NoopEventPublisher, NoopPeerForwarder, NoopSpokeDirectory, PeerForwarder,
        SpokeDirectory,
    },
};

use crate::{
    error::{Error, Result},
    peer::PeerHub,
    spoke::{NewSpoke, SpokeInfo, spoke_id},
    table::RoutingTable,
};

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(3);

// ── Config ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub id: HubId,
    pub region: String,
    pub namespace: String,
    /// Bound on each directory call made during (de)registration.
    pub store_timeout: Duration,
}

impl HubConfig {
    pub fn new(id: impl Into<HubId>) -> Self {
        Self {
            id: id.into(),
            region: String::new(),
            namespace: String::new(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }
}

// ── Results ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteDecision {
    Local,
    Forward,
    Broadcast,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteResult {
    pub decision: RouteDecision,
    pub destinations: Vec<VirtualAddress>,
    #[serde(rename = "routing_time_us", serialize_with = "as_micros")]
    pub routing_time: Duration,
    pub hops_used: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub federated_hubs: Vec<HubId>,
}

fn as_micros<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u128(d.as_micros())
}

/// Outcome of [`Hub::register`].
///
/// The spoke is live locally even when `warning` is set; the warning only
/// reports that the fleet-wide directory could not be updated.
#[derive(Debug)]
pub struct Registration {
    pub spoke: Arc<SpokeInfo>,
    pub warning: Option<Error>,
}

#[derive(Debug)]
pub struct Deregistration {
    pub spoke: Arc<SpokeInfo>,
    pub warning: Option<Error>,
}

/// Point-in-time copy of the hub counters.
#[derive(Debug, Clone, Serialize)]
pub struct HubMetrics {
    pub hub_id: HubId,
    pub region: String,
    pub messages_routed: u64,
    pub messages_failed: u64,
    pub spokes_connected: u64,
    pub peers_connected: u64,
    pub avg_latency_us: f64,
}

#[derive(Default)]
struct Counters {
    routed: AtomicU64,
    failed: AtomicU64,
    latency_nanos: AtomicU64,
    spokes_connected: AtomicU64,
    peers_connected: AtomicU64,
}

// ── Hub ─────────────────────────────────────────────────────────────────────

struct HubState {
    table: RoutingTable,
    peers: HashMap<HubId, PeerHub>,
}

/// What a route call will do, resolved under the read lock.
enum Plan {
    Local(Arc<SpokeInfo>),
    Broadcast(Vec<Arc<SpokeInfo>>),
    Federate(Vec<PeerHub>),
}

/// The routing hub. One per process, shared as `Arc<Hub>`.
pub struct Hub {
    config: HubConfig,
    state: RwLock<HubState>,
    /// spoke id → outbound frame queue of its connection
    outbound: DashMap<SpokeId, mpsc::Sender<String>>,
    counters: Counters,
    directory: Arc<dyn SpokeDirectory>,
    events: Arc<dyn EventPublisher>,
    forwarder: Arc<dyn PeerForwarder>,
}

impl Hub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            state: RwLock::new(HubState {
                table: RoutingTable::new(),
                peers: HashMap::new(),
            }),
            outbound: DashMap::new(),
            counters: Counters::default(),
            directory: Arc::new(NoopSpokeDirectory),
            events: Arc::new(NoopEventPublisher),
            forwarder: Arc::new(NoopPeerForwarder),
        }
    }

    pub fn with_directory(mut self, directory: Arc<dyn SpokeDirectory>) -> Self {
        self.directory = directory;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = events;
        self
    }

    pub fn with_forwarder(mut self, forwarder: Arc<dyn PeerForwarder>) -> Self {
        self.forwarder = forwarder;
        self
    }

    pub fn id(&self) -> &HubId {
        &self.config.id
    }

    pub fn region(&self) -> &str {
        &self.config.region
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    // ── Registration ────────────────────────────────────────────────────────

    /// Register a spoke. Registering the same tenant and agent twice yields
    /// two independent spokes.
    pub async fn register(&self, mut params: NewSpoke) -> Registration {
        let now = Utc::now();
        let outbound = params.outbound.take();
        let spoke = {
            let mut state = self.state.write().await;
            let mut nanos = now.timestamp_nanos_opt().unwrap_or_default();
            let mut id = spoke_id(&params.tenant_id, &params.agent_id, nanos);
            while state.table.contains(&id) {
                nanos += 1;
                id = spoke_id(&params.tenant_id, &params.agent_id, nanos);
            }
            let spoke = Arc::new(SpokeInfo::new(id, &self.config.id, params, now));
            if let Some(tx) = outbound {
                self.outbound.insert(spoke.id.clone(), tx);
            }
            state.table.insert(Arc::clone(&spoke));
            self.counters
                .spokes_connected
                .store(state.table.len() as u64, Ordering::Relaxed);
            spoke
        };

        #[cfg(feature = "metrics")]
        spokehub_metrics::gauge!(spokehub_metrics::hub::SPOKES_CONNECTED)
            .set(self.counters.spokes_connected.load(Ordering::Relaxed) as f64);

        info!(
            spoke_id = %spoke.id,
            tenant_id = %spoke.tenant_id,
            agent_id = %spoke.agent_id,
            virtual_addr = %spoke.virtual_addr,
            "hub: spoke registered"
        );

        let record = spoke.record(&self.config.id);
        let warning = match tokio::time::timeout(
            self.config.store_timeout,
            self.directory.save_spoke(&record),
        )
        .await
        {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(Error::StoreUnavailable(e.to_string())),
            Err(_) => Some(Error::StoreUnavailable("save timed out".into())),
        };
        if let Some(w) = &warning {
            warn!(spoke_id = %spoke.id, error = %w, "hub: registration not mirrored to directory");
            #[cfg(feature = "metrics")]
            spokehub_metrics::counter!(spokehub_metrics::hub::REGISTRATION_WARNINGS_TOTAL)
                .increment(1);
        }

        self.emit(
            CloudEvent::new(
                types::SPOKE_CONNECTED,
                self.config.id.as_str(),
                serde_json::to_value(&record).unwrap_or_default(),
            )
            .with_subject(spoke.id.as_str())
            .with_tenant(&spoke.tenant_id),
        )
        .await;

        Registration { spoke, warning }
    }

    pub async fn deregister(&self, id: &SpokeId) -> Result<Deregistration> {
        let spoke = {
            let mut state = self.state.write().await;
            let spoke = state
                .table
                .remove(id)
                .ok_or_else(|| Error::SpokeNotFound(id.clone()))?;
            self.counters
                .spokes_connected
                .store(state.table.len() as u64, Ordering::Relaxed);
            spoke
        };
        self.outbound.remove(id);

        #[cfg(feature = "metrics")]
        spokehub_metrics::gauge!(spokehub_metrics::hub::SPOKES_CONNECTED)
            .set(self.counters.spokes_connected.load(Ordering::Relaxed) as f64);

        info!(spoke_id = %spoke.id, virtual_addr = %spoke.virtual_addr, "hub: spoke deregistered");

        let record = spoke.record(&self.config.id);
        let warning = match tokio::time::timeout(
            self.config.store_timeout,
            self.directory.delete_spoke(&record),
        )
        .await
        {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(Error::StoreUnavailable(e.to_string())),
            Err(_) => Some(Error::StoreUnavailable("delete timed out".into())),
        };
        if let Some(w) = &warning {
            warn!(spoke_id = %spoke.id, error = %w, "hub: directory record not removed");
        }

        self.emit(
            CloudEvent::new(
                types::SPOKE_DISCONNECTED,
                self.config.id.as_str(),
                serde_json::json!({
                    "spoke_id": spoke.id,
                    "virtual_addr": spoke.virtual_addr,
                    "message_count": spoke.message_count(),
                }),
            )
            .with_subject(spoke.id.as_str())
            .with_tenant(&spoke.tenant_id),
        )
        .await;

        Ok(Deregistration { spoke, warning })
    }

    /// Attach the outbound queue of a spoke's live connection.
    pub fn attach_outbound(&self, id: &SpokeId, tx: mpsc::Sender<String>) {
        self.outbound.insert(id.clone(), tx);
    }

    pub fn detach_outbound(&self, id: &SpokeId) {
        self.outbound.remove(id);
    }

    /// Re-announce every local spoke to the directory so records outlive
    /// the store expiry. Returns the number refreshed.
    pub async fn refresh_directory(&self) -> usize {
        let records: Vec<SpokeRecord> = {
            let state = self.state.read().await;
            state
                .table
                .spokes()
                .map(|s| s.record(&self.config.id))
                .collect()
        };
        let mut refreshed = 0;
        for record in &records {
            match tokio::time::timeout(
                self.config.store_timeout,
                self.directory.refresh_spoke(record),
            )
            .await
            {
                Ok(Ok(())) => refreshed += 1,
                Ok(Err(e)) => warn!(spoke_id = %record.id, error = %e, "hub: refresh failed"),
                Err(_) => warn!(spoke_id = %record.id, "hub: refresh timed out"),
            }
        }
        refreshed
    }

    // ── Queries ─────────────────────────────────────────────────────────────

    pub async fn spoke(&self, id: &SpokeId) -> Option<Arc<SpokeInfo>> {
        self.state.read().await.table.get(id).cloned()
    }

    pub async fn spokes(&self) -> Vec<Arc<SpokeInfo>> {
        self.state.read().await.table.spokes().cloned().collect()
    }

    pub async fn spokes_by_capability(&self, capability: &str) -> Vec<Arc<SpokeInfo>> {
        self.state
            .read()
            .await
            .table
            .by_capability(capability)
            .cloned()
            .collect()
    }

    pub async fn spokes_by_tenant(&self, tenant_id: &str) -> Vec<Arc<SpokeInfo>> {
        self.state
            .read()
            .await
            .table
            .by_tenant(tenant_id)
            .cloned()
            .collect()
    }

    /// Look a spoke up locally, then in the fleet-wide directory.
    pub async fn resolve_spoke(&self, id: &SpokeId) -> Result<Option<SpokeRecord>> {
        if let Some(spoke) = self.spoke(id).await {
            return Ok(Some(spoke.record(&self.config.id)));
        }
        match tokio::time::timeout(self.config.store_timeout, self.directory.load_spoke(id)).await
        {
            Ok(Ok(record)) => Ok(record),
            Ok(Err(e)) => Err(Error::StoreUnavailable(e.to_string())),
            Err(_) => Err(Error::StoreUnavailable("load timed out".into())),
        }
    }

    pub async fn set_route_health(
        &self,
        addr: &VirtualAddress,
        id: &SpokeId,
        healthy: bool,
    ) -> Result<()> {
        if self.state.write().await.table.set_health(addr, id, healthy) {
            debug!(virtual_addr = %addr, spoke_id = %id, healthy, "hub: route health changed");
            Ok(())
        } else {
            Err(Error::SpokeNotFound(id.clone()))
        }
    }

    // ── Peers ───────────────────────────────────────────────────────────────

    pub async fn add_peer(&self, peer: PeerHub) {
        let mut state = self.state.write().await;
        info!(peer = %peer.id, endpoint = %peer.endpoint, trust = peer.trust_level, "hub: peer added");
        state.peers.insert(peer.id.clone(), peer);
        self.update_peer_count(&state.peers);
    }

    pub async fn remove_peer(&self, id: &HubId) -> Option<PeerHub> {
        let mut state = self.state.write().await;
        let removed = state.peers.remove(id);
        if removed.is_some() {
            info!(peer = %id, "hub: peer removed");
        }
        self.update_peer_count(&state.peers);
        removed
    }

    pub async fn peers(&self) -> Vec<PeerHub> {
        let mut peers: Vec<_> = self.state.read().await.peers.values().cloned().collect();
        peers.sort_by(|a, b| a.id.cmp(&b.id));
        peers
    }

    fn update_peer_count(&self, peers: &HashMap<HubId, PeerHub>) {
        let connected = peers.values().filter(|p| p.connected).count() as u64;
        self.counters
            .peers_connected
            .store(connected, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        spokehub_metrics::gauge!(spokehub_metrics::hub::PEERS_CONNECTED).set(connected as f64);
    }

    // ── Routing ─────────────────────────────────────────────────────────────

    /// Route a message, decrementing its TTL.
    pub async fn route(&self, msg: &mut Message) -> Result<RouteResult> {
        let start = Instant::now();
        let result = self.route_inner(msg, start).await;
        match &result {
            Ok(res) => {
                let elapsed = start.elapsed();
                self.counters.routed.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .latency_nanos
                    .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
                debug!(
                    message_id = %msg.id,
                    decision = ?res.decision,
                    destinations = res.destinations.len(),
                    "hub: routed"
                );
                #[cfg(feature = "metrics")]
                {
                    let strategy = match res.decision {
                        RouteDecision::Local => "local",
                        RouteDecision::Forward => "forward",
                        RouteDecision::Broadcast => "broadcast",
                    };
                    spokehub_metrics::counter!(
                        spokehub_metrics::hub::ROUTED_TOTAL,
                        spokehub_metrics::labels::STRATEGY => strategy
                    )
                    .increment(1);
                    spokehub_metrics::histogram!(spokehub_metrics::hub::ROUTE_DURATION_SECONDS)
                        .record(elapsed.as_secs_f64());
                }
            },
            Err(e) => {
                self.record_failure(e);
                debug!(message_id = %msg.id, destination = %msg.destination, error = %e, "hub: route failed");
            },
        }
        result
    }

    /// [`Hub::route`] bounded by a caller deadline.
    pub async fn route_within(&self, msg: &mut Message, deadline: Duration) -> Result<RouteResult> {
        match tokio::time::timeout(deadline, self.route(msg)).await {
            Ok(result) => result,
            Err(_) => {
                let err = Error::DeadlineExceeded;
                self.record_failure(&err);
                Err(err)
            },
        }
    }

    fn record_failure(&self, err: &Error) {
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        spokehub_metrics::counter!(
            spokehub_metrics::hub::FAILED_TOTAL,
            spokehub_metrics::labels::ERROR_TYPE => err.kind()
        )
        .increment(1);
        #[cfg(not(feature = "metrics"))]
        let _ = err;
    }

    async fn route_inner(&self, msg: &mut Message, start: Instant) -> Result<RouteResult> {
        if msg.ttl <= 0 {
            return Err(Error::TtlExpired {
                message_id: msg.id.clone(),
            });
        }
        msg.ttl -= 1;

        let plan = self.resolve(msg).await?;

        match plan {
            Plan::Local(spoke) => {
                self.deliver(&spoke, msg)?;
                Ok(RouteResult {
                    decision: RouteDecision::Local,
                    destinations: vec![spoke.virtual_addr.clone()],
                    routing_time: start.elapsed(),
                    hops_used: 1,
                    federated_hubs: Vec::new(),
                })
            },
            Plan::Broadcast(spokes) => {
                let mut destinations = Vec::with_capacity(spokes.len());
                for spoke in &spokes {
                    match self.deliver(spoke, msg) {
                        Ok(()) => destinations.push(spoke.virtual_addr.clone()),
                        Err(e) => {
                            warn!(spoke_id = %spoke.id, message_id = %msg.id, error = %e, "hub: broadcast delivery failed");
                        },
                    }
                }
                self.emit(
                    CloudEvent::new(
                        types::MESSAGE_BROADCAST,
                        self.config.id.as_str(),
                        serde_json::json!({
                            "message_id": msg.id,
                            "destination": msg.destination,
                            "delivered": destinations.len(),
                        }),
                    )
                    .with_subject(msg.id.as_str())
                    .with_tenant(&msg.tenant_id),
                )
                .await;
                Ok(RouteResult {
                    decision: RouteDecision::Broadcast,
                    destinations,
                    routing_time: start.elapsed(),
                    hops_used: 1,
                    federated_hubs: Vec::new(),
                })
            },
            Plan::Federate(peers) => {
                for peer in peers {
                    match self.forwarder.forward(&peer.id, &peer.endpoint, msg).await {
                        Ok(()) => {
                            info!(message_id = %msg.id, peer = %peer.id, "hub: forwarded to peer");
                            #[cfg(feature = "metrics")]
                            spokehub_metrics::counter!(
                                spokehub_metrics::federation::FORWARDS_TOTAL,
                                spokehub_metrics::labels::PEER => peer.id.to_string()
                            )
                            .increment(1);
                            self.emit(
                                CloudEvent::new(
                                    types::MESSAGE_FORWARDED,
                                    self.config.id.as_str(),
                                    serde_json::json!({
                                        "message_id": msg.id,
                                        "destination": msg.destination,
                                        "peer": peer.id,
                                    }),
                                )
                                .with_subject(msg.id.as_str())
                                .with_tenant(&msg.tenant_id),
                            )
                            .await;
                            return Ok(RouteResult {
                                decision: RouteDecision::Forward,
                                destinations: vec![msg.destination.clone()],
                                routing_time: start.elapsed(),
                                hops_used: 2,
                                federated_hubs: vec![peer.id],
                            });
                        },
                        Err(e) => {
                            warn!(message_id = %msg.id, peer = %peer.id, error = %e, "hub: forward failed");
                            #[cfg(feature = "metrics")]
                            spokehub_metrics::counter!(
                                spokehub_metrics::federation::FORWARD_ERRORS_TOTAL,
                                spokehub_metrics::labels::PEER => peer.id.to_string()
                            )
                            .increment(1);
                        },
                    }
                }
                Err(Error::NoRoute(msg.destination.clone()))
            },
        }
    }

    /// Pick the strategy and its targets. Runs entirely under the read lock
    /// and performs no I/O.
    async fn resolve(&self, msg: &Message) -> Result<Plan> {
        let state = self.state.read().await;

        let entries = state.table.routes(&msg.destination);
        if !entries.is_empty() {
            let mut best = None;
            for entry in entries.iter().filter(|e| e.healthy) {
                match best {
                    Some((priority, _)) if entry.priority >= priority => {},
                    _ => best = Some((entry.priority, &entry.spoke)),
                }
            }
            return best
                .map(|(_, spoke)| Plan::Local(Arc::clone(spoke)))
                .ok_or_else(|| Error::NoHealthyRoute(msg.destination.clone()));
        }

        let destination = Destination::parse(msg.destination.as_str());
        match destination {
            Destination::Capability(capability) => {
                let mut best: Option<&Arc<SpokeInfo>> = None;
                for spoke in state.table.by_capability(capability).filter(|s| {
                    msg.tenant_id.is_empty() || s.tenant_id == msg.tenant_id
                }) {
                    if best.is_none_or(|b| spoke.trust_score > b.trust_score) {
                        best = Some(spoke);
                    }
                }
                best.map(|s| Plan::Local(Arc::clone(s)))
                    .ok_or_else(|| Error::CapabilityNotFound {
                        capability: capability.to_string(),
                        tenant: msg.tenant_id.clone(),
                    })
            },
            Destination::Broadcast(tenant) => {
                let spokes: Vec<_> = state.table.by_tenant(tenant).cloned().collect();
                if spokes.is_empty() {
                    return Err(Error::TenantEmpty(tenant.to_string()));
                }
                Ok(Plan::Broadcast(spokes))
            },
            Destination::Direct { hub, .. } if hub == self.config.id.as_str() => {
                Err(Error::NoHealthyRoute(msg.destination.clone()))
            },
            Destination::Direct { .. } | Destination::Unknown => {
                let preferred = destination.hub();
                let mut peers: Vec<PeerHub> = state
                    .peers
                    .values()
                    .filter(|p| p.eligible())
                    .cloned()
                    .collect();
                peers.sort_by(|a, b| {
                    let a_pref = Some(a.id.as_str()) == preferred;
                    let b_pref = Some(b.id.as_str()) == preferred;
                    b_pref.cmp(&a_pref).then_with(|| a.id.cmp(&b.id))
                });
                if peers.is_empty() {
                    return Err(Error::NoRoute(msg.destination.clone()));
                }
                Ok(Plan::Federate(peers))
            },
        }
    }

    /// Hand a message to a local spoke.
    fn deliver(&self, spoke: &SpokeInfo, msg: &Message) -> Result<()> {
        spoke.record_delivery(msg.payload.len());

        let Some(tx) = self.outbound.get(&spoke.id).map(|tx| tx.clone()) else {
            debug!(spoke_id = %spoke.id, message_id = %msg.id, "hub: delivered (no live connection)");
            return Ok(());
        };
        let frame = serde_json::to_string(&DeliverFrame::from_message(msg))?;
        tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Error::OutboundFull(spoke.id.clone()),
            mpsc::error::TrySendError::Closed(_) => Error::ConnectionClosed(spoke.id.clone()),
        })?;
        debug!(spoke_id = %spoke.id, message_id = %msg.id, "hub: delivered");
        Ok(())
    }

    async fn emit(&self, event: CloudEvent) {
        let event_type = event.event_type.clone();
        if let Err(e) = self.events.publish(event).await {
            warn!(event_type = %event_type, error = %e, "hub: event publish failed");
        }
    }

    // ── Metrics ─────────────────────────────────────────────────────────────

    pub fn metrics(&self) -> HubMetrics {
        let routed = self.counters.routed.load(Ordering::Relaxed);
        let latency = self.counters.latency_nanos.load(Ordering::Relaxed);
        HubMetrics {
            hub_id: self.config.id.clone(),
            region: self.config.region.clone(),
            messages_routed: routed,
            messages_failed: self.counters.failed.load(Ordering::Relaxed),
            spokes_connected: self.counters.spokes_connected.load(Ordering::Relaxed),
            peers_connected: self.counters.peers_connected.load(Ordering::Relaxed),
            avg_latency_us: if routed == 0 {
                0.0
            } else {
                latency as f64 / routed as f64 / 1_000.0
            },
        }
    }
}
