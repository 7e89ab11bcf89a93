#![allow(clippy::unwrap_used, clippy::expect_used)]
//! REST surface of the gateway, including federation between two hubs.

use std::{net::SocketAddr, sync::Arc};

use {
    reqwest::StatusCode,
    serde_json::{Value, json},
    spokehub_gateway::{GatewayState, build_gateway_app, forwarder::HttpPeerForwarder},
    spokehub_routing::{Hub, HubConfig},
    tokio::net::TcpListener,
};

async fn start_server(hub_id: &str) -> SocketAddr {
    let hub = Arc::new(
        Hub::new(HubConfig::new(hub_id).with_region("test"))
            .with_forwarder(Arc::new(HttpPeerForwarder::default())),
    );
    let app = build_gateway_app(GatewayState::new(hub).into_shared());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

async fn register(client: &reqwest::Client, addr: SocketAddr, body: Value) -> Value {
    let resp = client
        .post(format!("http://{addr}/api/spokes"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    resp.json().await.unwrap()
}

#[tokio::test]
async fn health_reports_hub_identity() {
    let addr = start_server("hub-h").await;
    let body: Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["hub_id"], "hub-h");
    assert_eq!(body["region"], "test");
    assert_eq!(body["spokes"], 0);
}

#[tokio::test]
async fn spoke_registration_lifecycle() {
    let addr = start_server("hub-s").await;
    let client = reqwest::Client::new();

    let reg = register(
        &client,
        addr,
        json!({"agent_id": "planner", "tenant_id": "acme", "capabilities": ["plan"], "trust_score": 0.7}),
    )
    .await;
    assert_eq!(reg["hub_id"], "hub-s");
    assert_eq!(reg["status"], "connected");
    assert_eq!(reg["spoke_url"], "/ws");
    let spoke_id = reg["spoke_id"].as_str().unwrap().to_string();
    assert_eq!(spoke_id.len(), 16);

    let spokes: Vec<Value> = client
        .get(format!("http://{addr}/api/spokes"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(spokes.len(), 1);
    assert_eq!(spokes[0]["virtual_addr"], "ocx://hub-s/acme/planner");

    let one: Value = client
        .get(format!("http://{addr}/api/spokes/{spoke_id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(one["agent_id"], "planner");

    let url = format!("http://{addr}/api/spokes/{spoke_id}");
    assert_eq!(
        client.delete(&url).send().await.unwrap().status(),
        StatusCode::NO_CONTENT
    );
    assert_eq!(
        client.delete(&url).send().await.unwrap().status(),
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        client.get(&url).send().await.unwrap().status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn registration_requires_agent_id() {
    let addr = start_server("hub-v").await;
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/api/spokes"))
        .json(&json!({"agent_id": "  "}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("agent_id"));
}

#[tokio::test]
async fn peer_management() {
    let addr = start_server("hub-p").await;
    let client = reqwest::Client::new();
    let peers_url = format!("http://{addr}/api/peers");

    let resp = client
        .post(&peers_url)
        .json(&json!({"id": "hub-q", "endpoint": "http://hub-q:8080", "trust_level": 0.9}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = client
        .post(&peers_url)
        .json(&json!({"id": "hub-p", "endpoint": "http://self:8080", "trust_level": 0.9}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let peers: Vec<Value> = client
        .get(&peers_url)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0]["id"], "hub-q");

    let one = format!("{peers_url}/hub-q");
    assert_eq!(
        client.delete(&one).send().await.unwrap().status(),
        StatusCode::NO_CONTENT
    );
    assert_eq!(
        client.delete(&one).send().await.unwrap().status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn route_by_capability() {
    let addr = start_server("hub-r").await;
    let client = reqwest::Client::new();
    register(
        &client,
        addr,
        json!({"agent_id": "indexer", "tenant_id": "acme", "capabilities": ["search"], "trust_score": 0.8}),
    )
    .await;

    let resp = client
        .post(format!("http://{addr}/api/route"))
        .json(&json!({"id": "r1", "type": "query", "destination": "cap://search", "tenant_id": "acme"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let routed: Value = resp.json().await.unwrap();
    assert_eq!(routed["id"], "r1");
    assert_eq!(routed["destinations"][0], "ocx://hub-r/acme/indexer");
    assert_eq!(routed["hops"], 1);

    // Another tenant cannot see acme's indexer.
    let resp = client
        .post(format!("http://{addr}/api/route"))
        .json(&json!({"destination": "cap://search", "tenant_id": "globex"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let metrics: Value = client
        .get(format!("http://{addr}/api/hub/metrics"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(metrics["spokes_connected"], 1);
}

#[tokio::test]
async fn direct_address_on_peer_hub_is_forwarded() {
    let a = start_server("hub-a").await;
    let b = start_server("hub-b").await;
    let client = reqwest::Client::new();

    let reg = register(
        &client,
        b,
        json!({"agent_id": "worker", "tenant_id": "acme", "capabilities": ["compute"], "trust_score": 0.9}),
    )
    .await;
    let worker_id = reg["spoke_id"].as_str().unwrap().to_string();

    let resp = client
        .post(format!("http://{a}/api/peers"))
        .json(&json!({"id": "hub-b", "endpoint": format!("http://{b}"), "trust_level": 0.9}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = client
        .post(format!("http://{a}/api/route"))
        .json(&json!({"id": "f1", "type": "job", "destination": "ocx://hub-b/acme/worker", "tenant_id": "acme", "payload": {"n": 42}}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let routed: Value = resp.json().await.unwrap();
    assert_eq!(routed["hops"], 2);
    assert_eq!(routed["destinations"][0], "ocx://hub-b/acme/worker");

    // Hub b delivered it to the registered spoke.
    let worker: Value = client
        .get(format!("http://{b}/api/spokes/{worker_id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(worker["message_count"], 1);
}

#[tokio::test]
async fn direct_address_on_unknown_hub_without_peers_is_not_found() {
    let addr = start_server("hub-lonely").await;
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/api/route"))
        .json(&json!({"destination": "ocx://hub-far/acme/x", "tenant_id": "acme"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
