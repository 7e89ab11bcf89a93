//! Metric name and label definitions.
//!
//! All metric names used by the hub live here so the exported set is easy to
//! audit.

/// Routing engine metrics
pub mod hub {
    /// Messages routed successfully
    pub const ROUTED_TOTAL: &str = "spokehub_messages_routed_total";
    /// Messages that failed to route
    pub const FAILED_TOTAL: &str = "spokehub_messages_failed_total";
    /// Time spent inside a successful route call, in seconds
    pub const ROUTE_DURATION_SECONDS: &str = "spokehub_route_duration_seconds";
    /// Number of spokes currently registered on this hub
    pub const SPOKES_CONNECTED: &str = "spokehub_spokes_connected";
    /// Number of known peer hubs
    pub const PEERS_CONNECTED: &str = "spokehub_peers_connected";
    /// Registrations whose store write failed
    pub const REGISTRATION_WARNINGS_TOTAL: &str = "spokehub_registration_warnings_total";
}

/// Spoke connection metrics
pub mod websocket {
    /// Total number of spoke connections admitted
    pub const CONNECTIONS_TOTAL: &str = "spokehub_websocket_connections_total";
    /// Connections refused at admission
    pub const CONNECTIONS_REJECTED_TOTAL: &str = "spokehub_websocket_connections_rejected_total";
    /// Number of currently open spoke connections
    pub const CONNECTIONS_ACTIVE: &str = "spokehub_websocket_connections_active";
    /// Frames received from spokes
    pub const MESSAGES_RECEIVED_TOTAL: &str = "spokehub_websocket_messages_received_total";
    /// Frames written to spokes
    pub const MESSAGES_SENT_TOTAL: &str = "spokehub_websocket_messages_sent_total";
    /// Outbound frames dropped because the queue was full
    pub const OUTBOUND_DROPPED_TOTAL: &str = "spokehub_websocket_outbound_dropped_total";
}

/// Distributed store metrics
pub mod store {
    pub const OPERATIONS_TOTAL: &str = "spokehub_store_operations_total";
    pub const ERRORS_TOTAL: &str = "spokehub_store_errors_total";
}

/// Event fabric metrics
pub mod events {
    /// Events handed to the shared backend
    pub const PUBLISHED_TOTAL: &str = "spokehub_events_published_total";
    /// Events delivered only to local subscribers because the backend failed
    pub const DEGRADED_TOTAL: &str = "spokehub_events_degraded_total";
    /// Events handed to local handlers
    pub const DELIVERED_TOTAL: &str = "spokehub_events_delivered_total";
}

/// Federation metrics
pub mod federation {
    pub const FORWARDS_TOTAL: &str = "spokehub_federation_forwards_total";
    pub const FORWARD_ERRORS_TOTAL: &str = "spokehub_federation_forward_errors_total";
}

/// Common label keys used across metrics
pub mod labels {
    pub const STRATEGY: &str = "strategy";
    pub const ERROR_TYPE: &str = "error_type";
    pub const OPERATION: &str = "operation";
    pub const EVENT_TYPE: &str = "event_type";
    pub const PEER: &str = "peer";
    pub const REASON: &str = "reason";
}

/// Standard histogram buckets
pub mod buckets {
    use once_cell::sync::Lazy;

    /// Route duration buckets (in seconds)
    /// Covers 10µs to 5s; federation forwards sit in the upper half
    pub static ROUTE_DURATION: Lazy<Vec<f64>> = Lazy::new(|| {
        vec![
            0.000_01, 0.000_05, 0.000_1, 0.000_5, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0,
        ]
    });
}
