//! Virtual address grammar.
//!
//! This is the only place addresses are parsed or built:
//!
//! - `ocx://<hub-id>/<tenant>/<agent>`: direct address of one spoke
//! - `cap://<capability>`: any spoke declaring the capability
//! - `broadcast://<tenant>`: every spoke of a tenant
//!
//! Recognition is by prefix only. There is no escaping, so an agent id
//! containing `/` simply extends the last segment.

use crate::ids::{HubId, VirtualAddress};

pub const DIRECT_SCHEME: &str = "ocx://";
pub const CAPABILITY_SCHEME: &str = "cap://";
pub const BROADCAST_SCHEME: &str = "broadcast://";

/// A parsed destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination<'a> {
    Direct {
        hub: &'a str,
        tenant: &'a str,
        agent: &'a str,
    },
    Capability(&'a str),
    Broadcast(&'a str),
    /// Not a recognised form; only federation can still resolve it.
    Unknown,
}

impl<'a> Destination<'a> {
    pub fn parse(addr: &'a str) -> Self {
        if let Some(rest) = addr.strip_prefix(CAPABILITY_SCHEME) {
            return if rest.is_empty() {
                Self::Unknown
            } else {
                Self::Capability(rest)
            };
        }
        if let Some(rest) = addr.strip_prefix(BROADCAST_SCHEME) {
            return if rest.is_empty() {
                Self::Unknown
            } else {
                Self::Broadcast(rest)
            };
        }
        if let Some(rest) = addr.strip_prefix(DIRECT_SCHEME) {
            let mut parts = rest.splitn(3, '/');
            if let (Some(hub), Some(tenant), Some(agent)) = (parts.next(), parts.next(), parts.next())
                && !hub.is_empty()
            {
                return Self::Direct { hub, tenant, agent };
            }
        }
        Self::Unknown
    }

    /// Hub named by a direct address.
    pub fn hub(&self) -> Option<&'a str> {
        match self {
            Self::Direct { hub, .. } => Some(*hub),
            _ => None,
        }
    }
}

pub fn direct(hub: &HubId, tenant: &str, agent: &str) -> VirtualAddress {
    VirtualAddress::new(format!("{DIRECT_SCHEME}{hub}/{tenant}/{agent}"))
}

pub fn capability(name: &str) -> VirtualAddress {
    VirtualAddress::new(format!("{CAPABILITY_SCHEME}{name}"))
}

pub fn broadcast(tenant: &str) -> VirtualAddress {
    VirtualAddress::new(format!("{BROADCAST_SCHEME}{tenant}"))
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case("cap://data", Destination::Capability("data"))]
    #[case("cap://", Destination::Unknown)]
    #[case("broadcast://t1", Destination::Broadcast("t1"))]
    #[case("broadcast://", Destination::Unknown)]
    #[case("ocx://hub-a/t1/agent-7", Destination::Direct { hub: "hub-a", tenant: "t1", agent: "agent-7" })]
    #[case("ocx://hub-a/t1/team/agent", Destination::Direct { hub: "hub-a", tenant: "t1", agent: "team/agent" })]
    #[case("ocx://hub-a/t1", Destination::Unknown)]
    #[case("http://example.com", Destination::Unknown)]
    #[case("", Destination::Unknown)]
    fn parses_by_prefix(#[case] input: &str, #[case] expected: Destination<'_>) {
        assert_eq!(Destination::parse(input), expected);
    }

    #[test]
    fn builders_round_trip_through_parse() {
        let hub = HubId::from("hub-a");
        let addr = direct(&hub, "t1", "a1");
        assert_eq!(addr.as_str(), "ocx://hub-a/t1/a1");
        assert_eq!(Destination::parse(addr.as_str()).hub(), Some("hub-a"));
        assert_eq!(
            Destination::parse(capability("finance").as_str()),
            Destination::Capability("finance")
        );
        assert_eq!(
            Destination::parse(broadcast("t9").as_str()),
            Destination::Broadcast("t9")
        );
    }
}
