//! Capability interfaces the hub depends on.
//!
//! The hub never talks to a concrete store, message bus or HTTP client. It
//! holds these traits instead, and each has a `Noop` implementation so a hub
//! can run standalone before the fleet collaborators are wired in.

use {
    async_trait::async_trait,
    spokehub_protocol::{CloudEvent, HubId, Message, SpokeId, SpokeRecord},
    tracing::debug,
};

/// Error type returned by service methods.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{message}")]
    Message { message: String },
    #[error("{0}")]
    Serde(#[from] serde_json::Error),
    #[error("{operation} timed out")]
    Timeout { operation: &'static str },
}

impl ServiceError {
    #[must_use]
    pub fn message(message: impl std::fmt::Display) -> Self {
        Self::Message {
            message: message.to_string(),
        }
    }
}

impl From<String> for ServiceError {
    fn from(value: String) -> Self {
        Self::message(value)
    }
}

impl From<&str> for ServiceError {
    fn from(value: &str) -> Self {
        Self::message(value)
    }
}

pub type ServiceResult<T = ()> = Result<T, ServiceError>;

// ── Spoke directory ─────────────────────────────────────────────────────────

/// Fleet-wide mirror of spoke registrations.
#[async_trait]
pub trait SpokeDirectory: Send + Sync {
    async fn save_spoke(&self, record: &SpokeRecord) -> ServiceResult;
    /// Re-announce a spoke so its record outlives the store expiry.
    async fn refresh_spoke(&self, record: &SpokeRecord) -> ServiceResult;
    async fn load_spoke(&self, id: &SpokeId) -> ServiceResult<Option<SpokeRecord>>;
    async fn delete_spoke(&self, record: &SpokeRecord) -> ServiceResult;
    async fn spokes_by_capability(&self, capability: &str) -> ServiceResult<Vec<SpokeId>>;
    async fn spokes_by_tenant(&self, tenant_id: &str) -> ServiceResult<Vec<SpokeId>>;
}

pub struct NoopSpokeDirectory;

#[async_trait]
impl SpokeDirectory for NoopSpokeDirectory {
    async fn save_spoke(&self, _record: &SpokeRecord) -> ServiceResult {
        Ok(())
    }

    async fn refresh_spoke(&self, _record: &SpokeRecord) -> ServiceResult {
        Ok(())
    }

    async fn load_spoke(&self, _id: &SpokeId) -> ServiceResult<Option<SpokeRecord>> {
        Ok(None)
    }

    async fn delete_spoke(&self, _record: &SpokeRecord) -> ServiceResult {
        Ok(())
    }

    async fn spokes_by_capability(&self, _capability: &str) -> ServiceResult<Vec<SpokeId>> {
        Ok(Vec::new())
    }

    async fn spokes_by_tenant(&self, _tenant_id: &str) -> ServiceResult<Vec<SpokeId>> {
        Ok(Vec::new())
    }
}

// ── Events ──────────────────────────────────────────────────────────────────

/// Fire-and-forget publication of hub events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: CloudEvent) -> ServiceResult;
}

pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(&self, event: CloudEvent) -> ServiceResult {
        debug!(event_type = %event.event_type, "event dropped, no publisher configured");
        Ok(())
    }
}

// ── Federation ──────────────────────────────────────────────────────────────

/// Hands a message to a peer hub.
#[async_trait]
pub trait PeerForwarder: Send + Sync {
    async fn forward(&self, peer: &HubId, endpoint: &str, message: &Message) -> ServiceResult;
}

pub struct NoopPeerForwarder;

#[async_trait]
impl PeerForwarder for NoopPeerForwarder {
    async fn forward(&self, peer: &HubId, _endpoint: &str, _message: &Message) -> ServiceResult {
        Err(format!("no peer forwarder configured for hub {peer}").into())
    }
}
