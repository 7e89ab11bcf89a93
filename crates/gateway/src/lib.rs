//! Gateway: HTTP and WebSocket front end of one hub.
//!
//! Lifecycle:
//! 1. Build the hub from config and attach the spoke directory, event fabric,
//!    peer forwarder and configured peers
//! 2. Start the directory heartbeat
//! 3. Serve `/ws` for spokes (origin gate first) and the REST API
//!
//! Routing itself lives in `spokehub-routing`; this crate only moves frames
//! between sockets and the hub.

pub mod admission;
pub mod api;
pub mod connection;
pub mod forwarder;
pub mod heartbeat;
pub mod server;
pub mod state;

pub use {
    server::{AppState, HubRuntime, build_gateway_app, build_hub, start_gateway},
    state::{GatewayState, TransportLimits},
};
