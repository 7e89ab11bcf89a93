use std::{net::SocketAddr, path::Path, sync::Arc, time::Duration};

use {
    axum::{
        Router,
        extract::{ConnectInfo, State, WebSocketUpgrade},
        http::{HeaderMap, StatusCode},
        response::{IntoResponse, Json, Response},
        routing::{get, post},
    },
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{debug, info, warn},
};

use {
    spokehub_config::{BackendKind, SpokehubConfig},
    spokehub_events::{
        EventFabric, FabricConfig, MemoryPubSub, PubSubBackend, SqlitePubSub, Subscription,
    },
    spokehub_protocol::{CloudEvent, event::types},
    spokehub_routing::{Hub, HubConfig, PeerHub},
    spokehub_store::{DistributedStore, KvBackend, MemoryBackend, SqliteBackend, StoreConfig},
};

use crate::{
    admission::{self, OriginPolicy},
    api,
    connection::serve_spoke,
    forwarder::HttpPeerForwarder,
    heartbeat::spawn_directory_heartbeat,
    state::{GatewayState, TransportLimits},
};

// ── Shared app state ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<GatewayState>,
}

// ── Router ───────────────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_upgrade_handler))
        .route("/api/spokes", get(api::list_spokes).post(api::register_spoke))
        .route(
            "/api/spokes/{id}",
            get(api::get_spoke).delete(api::deregister_spoke),
        )
        .route("/api/hub/metrics", get(api::hub_metrics))
        .route("/api/peers", get(api::list_peers).post(api::add_peer))
        .route("/api/peers/{id}", axum::routing::delete(api::remove_peer))
        .route("/api/fabric/forward", post(api::forward_inbound))
        .route("/api/route", post(api::route_message));

    #[cfg(feature = "prometheus")]
    let router = router.route("/metrics", get(prometheus_metrics_handler));

    router
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { gateway: state })
}

// ── Wiring ───────────────────────────────────────────────────────────────────

/// A hub with the collaborators its config asks for.
pub struct HubRuntime {
    pub hub: Arc<Hub>,
    pub events: Option<EventFabric>,
    /// Keeps the fleet-event log handlers alive.
    pub subscriptions: Vec<Subscription>,
}

fn sqlite_url(path: &Path) -> String {
    format!("sqlite://{}?mode=rwc", path.display())
}

/// Construct the hub and attach the directory, event fabric, forwarder and
/// configured peers.
pub async fn build_hub(config: &SpokehubConfig) -> anyhow::Result<HubRuntime> {
    let mut hub_config = HubConfig::new(config.hub.id.as_str())
        .with_region(&config.hub.region)
        .with_namespace(&config.hub.namespace);
    hub_config.store_timeout = Duration::from_millis(config.store.op_timeout_ms);
    let forwarder =
        HttpPeerForwarder::new(Duration::from_millis(config.federation.forward_timeout_ms));
    let mut hub = Hub::new(hub_config).with_forwarder(Arc::new(forwarder));

    if config.store.enabled {
        let backend: Arc<dyn KvBackend> = match (config.store.backend, &config.store.path) {
            (BackendKind::Sqlite, Some(path)) => {
                Arc::new(SqliteBackend::connect(&sqlite_url(path)).await?)
            },
            (BackendKind::Sqlite, None) => {
                anyhow::bail!("store.backend = \"sqlite\" requires store.path")
            },
            (BackendKind::Memory, _) => Arc::new(MemoryBackend::new()),
        };
        let store = DistributedStore::new(backend, StoreConfig {
            key_prefix: config.store.key_prefix.clone(),
            spoke_ttl: Duration::from_secs(config.store.spoke_ttl_secs),
            op_timeout: Duration::from_millis(config.store.op_timeout_ms),
        });
        info!(backend = ?config.store.backend, "spoke directory enabled");
        hub = hub.with_directory(Arc::new(store));
    }

    let events = if config.events.enabled {
        let backend: Arc<dyn PubSubBackend> = match (config.events.backend, &config.events.path)
        {
            (BackendKind::Sqlite, Some(path)) => {
                Arc::new(SqlitePubSub::connect(&sqlite_url(path)).await?)
            },
            (BackendKind::Sqlite, None) => {
                anyhow::bail!("events.backend = \"sqlite\" requires events.path")
            },
            (BackendKind::Memory, _) => Arc::new(MemoryPubSub::new()),
        };
        let fabric = EventFabric::new(backend, FabricConfig {
            channel_prefix: config.events.channel_prefix.clone(),
            publish_timeout: Duration::from_millis(config.events.publish_timeout_ms),
        });
        info!(backend = ?config.events.backend, "event fabric enabled");
        hub = hub.with_events(Arc::new(fabric.clone()));
        Some(fabric)
    } else {
        None
    };

    let hub = Arc::new(hub);
    for peer in &config.federation.peers {
        hub.add_peer(
            PeerHub::new(peer.id.as_str(), peer.endpoint.as_str(), peer.trust_level)
                .with_region(&peer.region),
        )
        .await;
    }

    let mut subscriptions = Vec::new();
    if let Some(fabric) = &events {
        for event_type in [types::SPOKE_CONNECTED, types::SPOKE_DISCONNECTED] {
            let own = hub.id().to_string();
            let handler = Arc::new(move |event: &CloudEvent| {
                if event.source != own {
                    debug!(
                        event_type = %event.event_type,
                        source = %event.source,
                        subject = %event.subject,
                        "fleet: remote spoke event"
                    );
                }
            });
            match fabric.subscribe(event_type, handler).await {
                Ok(sub) => subscriptions.push(sub),
                Err(e) => warn!(event_type, error = %e, "fleet: subscribe failed"),
            }
        }
    }

    Ok(HubRuntime {
        hub,
        events,
        subscriptions,
    })
}

// ── Server startup ───────────────────────────────────────────────────────────

/// Start the gateway HTTP + WebSocket server and run until ctrl-c.
pub async fn start_gateway(config: SpokehubConfig) -> anyhow::Result<()> {
    let runtime = build_hub(&config).await?;
    let hub = Arc::clone(&runtime.hub);

    let state = GatewayState::new(Arc::clone(&hub))
        .with_limits(TransportLimits::from(&config.transport))
        .with_origins(OriginPolicy::from_config(&config.admission));

    #[cfg(feature = "metrics")]
    let state = {
        let handle = spokehub_metrics::init_metrics(spokehub_metrics::MetricsRecorderConfig {
            enabled: config.metrics.enabled,
            global_labels: vec![
                ("hub_id".into(), config.hub.id.clone()),
                ("region".into(), config.hub.region.clone()),
            ],
        })?;
        state.with_metrics_handle(handle)
    };

    let state = state.into_shared();

    if config.store.enabled {
        spawn_directory_heartbeat(
            Arc::clone(&hub),
            Duration::from_secs(config.store.heartbeat_interval_secs.max(1)),
            state.shutdown.clone(),
        );
    }

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let app = build_gateway_app(Arc::clone(&state));

    info!(
        hub_id = %hub.id(),
        region = %hub.region(),
        namespace = %hub.namespace(),
        %addr,
        strict_origins = state.origins.is_strict(),
        peers = config.federation.peers.len(),
        "spokehub gateway listening"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let shutdown = state.shutdown.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            warn!("failed to listen for ctrl-c");
        }
        info!("shutdown requested");
        shutdown.cancel();
    })
    .await?;

    if let Some(fabric) = &runtime.events {
        fabric.close();
    }
    Ok(())
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let gw = &state.gateway;
    Json(serde_json::json!({
        "status": "ok",
        "version": gw.version,
        "hub_id": gw.hub.id(),
        "region": gw.hub.region(),
        "spokes": gw.hub.metrics().spokes_connected,
        "connections": gw.active_connections(),
        "uptime_secs": gw.started_at.elapsed().as_secs(),
    }))
}

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let gateway = state.gateway;
    let origin = admission::request_origin(&headers);
    if !gateway.origins.admits(origin) {
        warn!(origin = origin.unwrap_or(""), remote_ip = %addr.ip(), "ws: origin rejected");
        #[cfg(feature = "metrics")]
        spokehub_metrics::counter!(
            spokehub_metrics::websocket::CONNECTIONS_REJECTED_TOTAL,
            spokehub_metrics::labels::REASON => "origin"
        )
        .increment(1);
        return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }
    if !gateway.origins.is_strict() && origin.is_some() {
        debug!(origin = origin.unwrap_or(""), "ws: origin accepted in permissive mode");
    }

    let params = admission::spoke_from_headers(&headers);
    let max = gateway.limits.max_frame_bytes;
    ws.max_message_size(max)
        .max_frame_size(max)
        .on_upgrade(move |socket| serve_spoke(socket, gateway, params, addr))
        .into_response()
}

/// Prometheus text exposition for scrapers.
#[cfg(feature = "prometheus")]
async fn prometheus_metrics_handler(State(state): State<AppState>) -> Response {
    use axum::http::header;

    match state.gateway.metrics_handle.as_ref() {
        Some(handle) => (
            [(
                header::CONTENT_TYPE,
                "text/plain; version=0.0.4; charset=utf-8",
            )],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics not enabled").into_response(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, spokehub_config::PeerEntry};

    #[tokio::test]
    async fn build_hub_applies_config() {
        let mut config = SpokehubConfig::default();
        config.hub.id = "hub-a".into();
        config.hub.region = "eu".into();
        config.store.enabled = true;
        config.federation.peers.push(PeerEntry {
            id: "hub-b".into(),
            endpoint: "http://hub-b:8080".into(),
            region: "us".into(),
            trust_level: 0.8,
        });

        let runtime = build_hub(&config).await.unwrap();
        assert_eq!(runtime.hub.id().as_str(), "hub-a");
        assert_eq!(runtime.hub.region(), "eu");
        assert_eq!(runtime.hub.peers().await[0].region, "us");
        assert!(runtime.events.is_some());
        assert_eq!(runtime.subscriptions.len(), 2);
    }

    #[tokio::test]
    async fn sqlite_without_path_is_rejected() {
        let mut config = SpokehubConfig::default();
        config.store.enabled = true;
        config.store.backend = BackendKind::Sqlite;
        assert!(build_hub(&config).await.is_err());
    }

    #[tokio::test]
    async fn sqlite_backends_open_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SpokehubConfig::default();
        config.store.enabled = true;
        config.store.backend = BackendKind::Sqlite;
        config.store.path = Some(dir.path().join("store.db"));
        config.events.backend = BackendKind::Sqlite;
        config.events.path = Some(dir.path().join("events.db"));

        let runtime = build_hub(&config).await.unwrap();
        let reg = runtime
            .hub
            .register(spokehub_routing::NewSpoke::new("t", "a"))
            .await;
        assert!(reg.warning.is_none());
        assert!(
            runtime
                .hub
                .resolve_spoke(&reg.spoke.id)
                .await
                .unwrap()
                .is_some()
        );
    }
}
