//! Spoke registry and routing engine.
//!
//! A [`Hub`] owns the [`RoutingTable`] of locally connected spokes plus the
//! table of federated peers, and routes each [`Message`](spokehub_protocol::Message)
//! with one of four strategies: direct address, capability match, tenant
//! broadcast, or forwarding to a peer hub.

pub mod error;
pub mod hub;
pub mod peer;
pub mod spoke;
pub mod table;

pub use {
    error::{Error, Result},
    hub::{Deregistration, Hub, HubConfig, HubMetrics, Registration, RouteDecision, RouteResult},
    peer::PeerHub,
    spoke::{AtomicTimestamp, NewSpoke, SpokeInfo, SpokeSnapshot},
    table::{RoutingEntry, RoutingTable},
};
