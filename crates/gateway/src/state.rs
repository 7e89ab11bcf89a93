use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

#[cfg(feature = "metrics")]
use spokehub_metrics::MetricsHandle;

use {
    spokehub_config::TransportConfig,
    spokehub_protocol::{
        MAX_FRAME_BYTES, OUTBOUND_QUEUE_CAPACITY, PING_INTERVAL_MS, READ_TIMEOUT_MS,
        WRITE_TIMEOUT_MS,
    },
    spokehub_routing::Hub,
    tokio_util::sync::CancellationToken,
};

use crate::admission::OriginPolicy;

// ── Transport limits ─────────────────────────────────────────────────────────

/// Per-connection limits applied to every spoke socket.
#[derive(Debug, Clone)]
pub struct TransportLimits {
    pub ping_interval: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub max_frame_bytes: usize,
    pub outbound_queue: usize,
    pub route_timeout: Duration,
}

impl Default for TransportLimits {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_millis(PING_INTERVAL_MS),
            read_timeout: Duration::from_millis(READ_TIMEOUT_MS),
            write_timeout: Duration::from_millis(WRITE_TIMEOUT_MS),
            max_frame_bytes: MAX_FRAME_BYTES,
            outbound_queue: OUTBOUND_QUEUE_CAPACITY,
            route_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&TransportConfig> for TransportLimits {
    fn from(cfg: &TransportConfig) -> Self {
        Self {
            ping_interval: Duration::from_secs(cfg.ping_interval_secs),
            read_timeout: Duration::from_secs(cfg.read_timeout_secs),
            write_timeout: Duration::from_secs(cfg.write_timeout_secs),
            max_frame_bytes: cfg.max_frame_bytes,
            // A zero-capacity mpsc channel panics.
            outbound_queue: cfg.outbound_queue.max(1),
            route_timeout: Duration::from_millis(cfg.route_timeout_ms),
        }
    }
}

// ── Gateway state ────────────────────────────────────────────────────────────

/// Shared state behind every HTTP handler and spoke connection.
pub struct GatewayState {
    pub hub: Arc<Hub>,
    pub limits: TransportLimits,
    pub origins: OriginPolicy,
    pub version: String,
    pub started_at: Instant,
    /// Cancelled on shutdown; background loops watch it.
    pub shutdown: CancellationToken,
    #[cfg(feature = "metrics")]
    pub metrics_handle: Option<MetricsHandle>,
    active_connections: AtomicUsize,
}

impl GatewayState {
    pub fn new(hub: Arc<Hub>) -> Self {
        Self {
            hub,
            limits: TransportLimits::default(),
            origins: OriginPolicy::permissive(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: Instant::now(),
            shutdown: CancellationToken::new(),
            #[cfg(feature = "metrics")]
            metrics_handle: None,
            active_connections: AtomicUsize::new(0),
        }
    }

    pub fn with_limits(mut self, limits: TransportLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_origins(mut self, origins: OriginPolicy) -> Self {
        self.origins = origins;
        self
    }

    #[cfg(feature = "metrics")]
    pub fn with_metrics_handle(mut self, handle: Option<MetricsHandle>) -> Self {
        self.metrics_handle = handle;
        self
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub(crate) fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        {
            spokehub_metrics::counter!(spokehub_metrics::websocket::CONNECTIONS_TOTAL).increment(1);
            spokehub_metrics::gauge!(spokehub_metrics::websocket::CONNECTIONS_ACTIVE)
                .increment(1.0);
        }
    }

    pub(crate) fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        spokehub_metrics::gauge!(spokehub_metrics::websocket::CONNECTIONS_ACTIVE).decrement(1.0);
    }
}
