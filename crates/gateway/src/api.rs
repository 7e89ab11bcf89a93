//! REST surface: spoke registration, peer administration and routing on
//! behalf of HTTP callers and peer hubs.

use {
    axum::{
        Json,
        extract::{Path, State},
        http::StatusCode,
        response::{IntoResponse, Response},
    },
    bytes::Bytes,
    serde::Deserialize,
    spokehub_protocol::{
        HubId, INITIAL_TTL, Message, RegisterSpokeRequest, RegisterSpokeResponse, RoutedFrame,
        SPOKE_URL, SpokeId, VirtualAddress, address,
    },
    spokehub_routing::{Error as RouteError, NewSpoke, PeerHub, SpokeSnapshot},
    tracing::{info, warn},
};

use crate::server::AppState;

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Route(#[from] RouteError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Route(e) => match e {
                RouteError::TtlExpired { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                RouteError::TenantEmpty(_) => StatusCode::BAD_REQUEST,
                RouteError::SpokeNotFound(_)
                | RouteError::NoRoute(_)
                | RouteError::NoHealthyRoute(_)
                | RouteError::CapabilityNotFound { .. } => StatusCode::NOT_FOUND,
                RouteError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
                RouteError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ── Spokes ───────────────────────────────────────────────────────────────────

pub async fn register_spoke(
    State(state): State<AppState>,
    Json(req): Json<RegisterSpokeRequest>,
) -> ApiResult<(StatusCode, Json<RegisterSpokeResponse>)> {
    if req.agent_id.trim().is_empty() {
        return Err(ApiError::BadRequest("agent_id is required".into()));
    }
    if !(0.0..=1.0).contains(&req.trust_score) {
        return Err(ApiError::BadRequest(
            "trust_score must be within 0.0..=1.0".into(),
        ));
    }
    let hub = &state.gateway.hub;
    let tenant = req
        .tenant_id
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| spokehub_protocol::DEFAULT_TENANT.to_string());
    let params = NewSpoke::new(tenant, req.agent_id.clone())
        .with_capabilities(req.capabilities)
        .with_trust(req.trust_score)
        .with_entitlements(req.entitlements);

    let registration = hub.register(params).await;
    let spoke = registration.spoke;
    let warning = registration.warning.map(|w| w.to_string());
    if let Some(w) = &warning {
        warn!(spoke_id = %spoke.id, warning = %w, "api: registered with warning");
    }
    info!(spoke_id = %spoke.id, agent_id = %spoke.agent_id, "api: spoke registered");

    Ok((
        StatusCode::CREATED,
        Json(RegisterSpokeResponse {
            agent_id: req.agent_id,
            hub_id: hub.id().clone(),
            spoke_id: spoke.id.clone(),
            status: "connected".into(),
            region: hub.region().to_string(),
            spoke_url: SPOKE_URL.into(),
            warning,
        }),
    ))
}

pub async fn list_spokes(State(state): State<AppState>) -> Json<Vec<SpokeSnapshot>> {
    let mut spokes: Vec<SpokeSnapshot> = state
        .gateway
        .hub
        .spokes()
        .await
        .iter()
        .map(|s| s.snapshot())
        .collect();
    spokes.sort_by(|a, b| a.connected_at.cmp(&b.connected_at));
    Json(spokes)
}

pub async fn get_spoke(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SpokeSnapshot>> {
    state
        .gateway
        .hub
        .spoke(&SpokeId::from(id.as_str()))
        .await
        .map(|s| Json(s.snapshot()))
        .ok_or_else(|| ApiError::NotFound(format!("spoke not found: {id}")))
}

pub async fn deregister_spoke(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let dereg = state.gateway.hub.deregister(&SpokeId::from(id)).await?;
    if let Some(w) = dereg.warning {
        warn!(spoke_id = %dereg.spoke.id, warning = %w, "api: deregistered with warning");
    }
    Ok(StatusCode::NO_CONTENT)
}

// ── Hub ──────────────────────────────────────────────────────────────────────

pub async fn hub_metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.gateway.hub.metrics())
}

// ── Peers ────────────────────────────────────────────────────────────────────

pub async fn list_peers(State(state): State<AppState>) -> Json<Vec<PeerHub>> {
    Json(state.gateway.hub.peers().await)
}

pub async fn add_peer(
    State(state): State<AppState>,
    Json(peer): Json<PeerHub>,
) -> ApiResult<(StatusCode, Json<PeerHub>)> {
    let hub = &state.gateway.hub;
    if &peer.id == hub.id() {
        return Err(ApiError::BadRequest("a hub cannot peer with itself".into()));
    }
    if !(peer.endpoint.starts_with("http://") || peer.endpoint.starts_with("https://")) {
        return Err(ApiError::BadRequest(
            "peer endpoint must be an http(s) URL".into(),
        ));
    }
    if !(0.0..=1.0).contains(&peer.trust_level) {
        return Err(ApiError::BadRequest(
            "trust_level must be within 0.0..=1.0".into(),
        ));
    }
    info!(peer = %peer.id, endpoint = %peer.endpoint, "api: peer added");
    hub.add_peer(peer.clone()).await;
    Ok((StatusCode::CREATED, Json(peer)))
}

pub async fn remove_peer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    match state.gateway.hub.remove_peer(&HubId::from(id.as_str())).await {
        Some(_) => Ok(StatusCode::NO_CONTENT),
        None => Err(ApiError::NotFound(format!("peer not found: {id}"))),
    }
}

// ── Routing ──────────────────────────────────────────────────────────────────

/// A message handed over by a peer hub. Its TTL was already decremented by
/// the sender, so forwarding loops run out of hops.
pub async fn forward_inbound(
    State(state): State<AppState>,
    Json(mut msg): Json<Message>,
) -> ApiResult<Json<RoutedFrame>> {
    let result = state
        .gateway
        .hub
        .route_within(&mut msg, state.gateway.limits.route_timeout)
        .await?;
    Ok(Json(RoutedFrame::new(
        msg.id,
        result.destinations,
        result.hops_used,
    )))
}

/// Envelope for `POST /api/route`.
#[derive(Debug, Deserialize)]
pub struct RouteRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: String,
    pub destination: String,
    pub tenant_id: String,
    /// Defaults to `ocx://<this hub>/<tenant>/api`.
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

pub async fn route_message(
    State(state): State<AppState>,
    Json(req): Json<RouteRequest>,
) -> ApiResult<Json<RoutedFrame>> {
    let hub = &state.gateway.hub;
    let source = req
        .source
        .map(VirtualAddress::from)
        .unwrap_or_else(|| address::direct(hub.id(), &req.tenant_id, "api"));
    let payload = match &req.payload {
        Some(value) => Bytes::from(
            serde_json::to_vec(value).map_err(|e| ApiError::BadRequest(e.to_string()))?,
        ),
        None => Bytes::new(),
    };

    let mut msg = Message::new(source, req.destination, req.tenant_id)
        .with_payload(payload)
        .with_ttl(INITIAL_TTL);
    msg.kind = req.kind;
    if let Some(id) = req.id.filter(|id| !id.is_empty()) {
        msg.id = id;
    }

    let result = hub
        .route_within(&mut msg, state.gateway.limits.route_timeout)
        .await?;
    Ok(Json(RoutedFrame::new(
        msg.id,
        result.destinations,
        result.hops_used,
    )))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        crate::state::GatewayState,
        async_trait::async_trait,
        spokehub_protocol::SpokeRecord,
        spokehub_routing::{Hub, HubConfig},
        spokehub_service_traits::{ServiceResult, SpokeDirectory},
        std::sync::Arc,
        tokio::sync::mpsc,
    };

    struct DownDirectory;

    #[async_trait]
    impl SpokeDirectory for DownDirectory {
        async fn save_spoke(&self, _record: &SpokeRecord) -> ServiceResult {
            Err("connection refused".into())
        }

        async fn refresh_spoke(&self, _record: &SpokeRecord) -> ServiceResult {
            Err("connection refused".into())
        }

        async fn load_spoke(&self, _id: &SpokeId) -> ServiceResult<Option<SpokeRecord>> {
            Err("connection refused".into())
        }

        async fn delete_spoke(&self, _record: &SpokeRecord) -> ServiceResult {
            Err("connection refused".into())
        }

        async fn spokes_by_capability(&self, _capability: &str) -> ServiceResult<Vec<SpokeId>> {
            Ok(Vec::new())
        }

        async fn spokes_by_tenant(&self, _tenant_id: &str) -> ServiceResult<Vec<SpokeId>> {
            Ok(Vec::new())
        }
    }

    fn app_state(hub: Hub) -> AppState {
        AppState {
            gateway: GatewayState::new(Arc::new(hub)).into_shared(),
        }
    }

    fn request(agent_id: &str) -> RegisterSpokeRequest {
        RegisterSpokeRequest {
            agent_id: agent_id.into(),
            capabilities: vec!["data".into()],
            trust_score: 0.6,
            entitlements: Vec::new(),
            tenant_id: Some("acme".into()),
        }
    }

    #[tokio::test]
    async fn directory_failure_is_reported_to_registrant() {
        let state = app_state(Hub::new(HubConfig::new("h")).with_directory(Arc::new(DownDirectory)));
        let (status, Json(resp)) = register_spoke(State(state.clone()), Json(request("a1")))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert!(resp.warning.unwrap().contains("connection refused"));
        // Still registered locally.
        assert_eq!(state.gateway.hub.spokes().await.len(), 1);
    }

    #[tokio::test]
    async fn clean_registration_has_no_warning() {
        let state = app_state(Hub::new(HubConfig::new("h")));
        let (_, Json(resp)) = register_spoke(State(state), Json(request("a1")))
            .await
            .unwrap();
        assert!(resp.warning.is_none());
        let body = serde_json::to_value(&resp).unwrap();
        assert!(body.get("warning").is_none());
    }

    #[tokio::test]
    async fn api_route_delivers_json_payload() {
        let state = app_state(Hub::new(HubConfig::new("h")));
        let (tx, mut rx) = mpsc::channel(4);
        state
            .gateway
            .hub
            .register(NewSpoke::new("acme", "worker").with_outbound(tx))
            .await;

        let req: RouteRequest = serde_json::from_value(serde_json::json!({
            "id": "r1",
            "type": "job",
            "destination": "ocx://h/acme/worker",
            "tenant_id": "acme",
            "payload": {"n": 1},
        }))
        .unwrap();
        let Json(routed) = route_message(State(state), Json(req)).await.unwrap();
        assert_eq!(routed.hops, 1);

        let frame: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["source"], "ocx://h/acme/api");
        // base64 of `{"n":1}`
        assert_eq!(frame["payload"], "eyJuIjoxfQ==");
    }

    #[test]
    fn route_errors_map_to_statuses() {
        let cases = [
            (
                RouteError::TtlExpired {
                    message_id: "m".into(),
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                RouteError::NoRoute(VirtualAddress::from("ocx://x/t/a")),
                StatusCode::NOT_FOUND,
            ),
            (RouteError::DeadlineExceeded, StatusCode::GATEWAY_TIMEOUT),
            (
                RouteError::TenantEmpty("t9".into()),
                StatusCode::BAD_REQUEST,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
        assert_eq!(
            ApiError::BadRequest("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn route_request_accepts_minimal_body() {
        let req: RouteRequest =
            serde_json::from_str(r#"{"destination":"cap://data","tenant_id":"acme"}"#).unwrap();
        assert!(req.id.is_none());
        assert!(req.payload.is_none());
        assert!(req.kind.is_empty());
    }
}
