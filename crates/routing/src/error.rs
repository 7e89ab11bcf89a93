use spokehub_protocol::{SpokeId, VirtualAddress};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("message {message_id} expired: ttl exhausted")]
    TtlExpired { message_id: String },
    #[error("no healthy routes to {0}")]
    NoHealthyRoute(VirtualAddress),
    #[error("no spokes with capability {capability}{}", tenant_suffix(.tenant))]
    CapabilityNotFound { capability: String, tenant: String },
    #[error("no spokes in tenant {0}")]
    TenantEmpty(String),
    #[error("no route to {0}")]
    NoRoute(VirtualAddress),
    #[error("spoke {0} not found")]
    SpokeNotFound(SpokeId),
    #[error("connection for spoke {0} is closed")]
    ConnectionClosed(SpokeId),
    #[error("outbound queue for spoke {0} is full")]
    OutboundFull(SpokeId),
    #[error("routing deadline exceeded")]
    DeadlineExceeded,
    #[error("spoke directory unavailable: {0}")]
    StoreUnavailable(String),
    #[error(transparent)]
    Serialize(#[from] serde_json::Error),
}

fn tenant_suffix(tenant: &str) -> String {
    if tenant.is_empty() {
        String::new()
    } else {
        format!(" in tenant {tenant}")
    }
}

impl Error {
    /// Short stable name, used as a metrics label and in logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TtlExpired { .. } => "ttl_expired",
            Self::NoHealthyRoute(_) => "no_healthy_route",
            Self::CapabilityNotFound { .. } => "capability_not_found",
            Self::TenantEmpty(_) => "tenant_empty",
            Self::NoRoute(_) => "no_route",
            Self::SpokeNotFound(_) => "spoke_not_found",
            Self::ConnectionClosed(_) => "connection_closed",
            Self::OutboundFull(_) => "outbound_full",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::Serialize(_) => "serialize",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
