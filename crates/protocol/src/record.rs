use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

use crate::ids::{HubId, SpokeId, VirtualAddress};

/// Serialisable view of a registered spoke, shared with other hubs through
/// the distributed store. Counters are process-local and not included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpokeRecord {
    pub id: SpokeId,
    /// Hub holding the spoke's connection.
    pub hub_id: HubId,
    pub tenant_id: String,
    pub agent_id: String,
    pub virtual_addr: VirtualAddress,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub trust_score: f64,
    #[serde(default)]
    pub entitlements: Vec<String>,
    pub connected_at: DateTime<Utc>,
}
