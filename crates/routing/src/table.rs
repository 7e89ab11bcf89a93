use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};

use spokehub_protocol::{SpokeId, VirtualAddress};

use crate::spoke::SpokeInfo;

pub const DEFAULT_PRIORITY: u32 = 1;
pub const DEFAULT_WEIGHT: u32 = 100;

/// One way of reaching a virtual address.
#[derive(Debug, Clone)]
pub struct RoutingEntry {
    pub spoke: Arc<SpokeInfo>,
    /// Lower wins.
    pub priority: u32,
    pub weight: u32,
    pub healthy: bool,
    pub last_health_check: DateTime<Utc>,
}

impl RoutingEntry {
    fn new(spoke: Arc<SpokeInfo>) -> Self {
        Self {
            spoke,
            priority: DEFAULT_PRIORITY,
            weight: DEFAULT_WEIGHT,
            healthy: true,
            last_health_check: Utc::now(),
        }
    }
}

/// The registry and its three indexes.
///
/// Index vectors keep registration order, which is the tie-break order for
/// route selection. Callers guard the whole table with one lock so the
/// structures always agree.
#[derive(Debug, Default)]
pub struct RoutingTable {
    /// spoke id → spoke
    spokes: HashMap<SpokeId, Arc<SpokeInfo>>,
    /// virtual address → entries
    routes: HashMap<VirtualAddress, Vec<RoutingEntry>>,
    /// capability → spoke ids
    capabilities: HashMap<String, Vec<SpokeId>>,
    /// tenant → spoke ids
    tenants: HashMap<String, Vec<SpokeId>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &SpokeId) -> bool {
        self.spokes.contains_key(id)
    }

    pub fn insert(&mut self, spoke: Arc<SpokeInfo>) {
        self.routes
            .entry(spoke.virtual_addr.clone())
            .or_default()
            .push(RoutingEntry::new(Arc::clone(&spoke)));
        for cap in &spoke.capabilities {
            self.capabilities
                .entry(cap.clone())
                .or_default()
                .push(spoke.id.clone());
        }
        self.tenants
            .entry(spoke.tenant_id.clone())
            .or_default()
            .push(spoke.id.clone());
        self.spokes.insert(spoke.id.clone(), spoke);
    }

    /// Remove a spoke and only its own routing entry.
    pub fn remove(&mut self, id: &SpokeId) -> Option<Arc<SpokeInfo>> {
        let spoke = self.spokes.remove(id)?;

        if let Some(entries) = self.routes.get_mut(&spoke.virtual_addr) {
            entries.retain(|e| e.spoke.id != *id);
            if entries.is_empty() {
                self.routes.remove(&spoke.virtual_addr);
            }
        }
        for cap in &spoke.capabilities {
            remove_from_index(&mut self.capabilities, cap, id);
        }
        remove_from_index(&mut self.tenants, &spoke.tenant_id, id);

        Some(spoke)
    }

    pub fn get(&self, id: &SpokeId) -> Option<&Arc<SpokeInfo>> {
        self.spokes.get(id)
    }

    pub fn len(&self) -> usize {
        self.spokes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spokes.is_empty()
    }

    pub fn spokes(&self) -> impl Iterator<Item = &Arc<SpokeInfo>> {
        self.spokes.values()
    }

    pub fn routes(&self, addr: &VirtualAddress) -> &[RoutingEntry] {
        self.routes.get(addr).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn by_capability(&self, capability: &str) -> impl Iterator<Item = &Arc<SpokeInfo>> {
        self.lookup(&self.capabilities, capability)
    }

    pub fn by_tenant(&self, tenant_id: &str) -> impl Iterator<Item = &Arc<SpokeInfo>> {
        self.lookup(&self.tenants, tenant_id)
    }

    /// Mark one spoke's entry under `addr` healthy or not.
    ///
    /// Returns `false` when no such entry exists.
    pub fn set_health(&mut self, addr: &VirtualAddress, id: &SpokeId, healthy: bool) -> bool {
        let Some(entry) = self
            .routes
            .get_mut(addr)
            .and_then(|entries| entries.iter_mut().find(|e| e.spoke.id == *id))
        else {
            return false;
        };
        entry.healthy = healthy;
        entry.last_health_check = Utc::now();
        true
    }

    fn lookup<'a>(
        &'a self,
        index: &'a HashMap<String, Vec<SpokeId>>,
        key: &str,
    ) -> impl Iterator<Item = &'a Arc<SpokeInfo>> {
        index
            .get(key)
            .into_iter()
            .flatten()
            .filter_map(|id| self.spokes.get(id))
    }
}

fn remove_from_index(index: &mut HashMap<String, Vec<SpokeId>>, key: &str, id: &SpokeId) {
    if let Some(ids) = index.get_mut(key) {
        ids.retain(|existing| existing != id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, crate::spoke::NewSpoke, spokehub_protocol::HubId};

    fn spoke(id: &str, tenant: &str, agent: &str, caps: &[&str]) -> Arc<SpokeInfo> {
        Arc::new(SpokeInfo::new(
            SpokeId::from(id),
            &HubId::from("hub"),
            NewSpoke::new(tenant, agent).with_capabilities(caps.iter().copied()),
            Utc::now(),
        ))
    }

    #[test]
    fn insert_populates_every_index() {
        let mut table = RoutingTable::new();
        let s = spoke("s1", "t1", "a1", &["data", "ml"]);
        table.insert(Arc::clone(&s));

        assert!(table.contains(&s.id));
        assert_eq!(table.routes(&s.virtual_addr).len(), 1);
        assert_eq!(table.by_capability("data").count(), 1);
        assert_eq!(table.by_capability("ml").count(), 1);
        assert_eq!(table.by_tenant("t1").count(), 1);
        assert_eq!(table.by_tenant("t2").count(), 0);
    }

    #[test]
    fn remove_keeps_sibling_entries_for_same_address() {
        let mut table = RoutingTable::new();
        let first = spoke("s1", "t1", "a1", &["data"]);
        let second = spoke("s2", "t1", "a1", &["data"]);
        table.insert(Arc::clone(&first));
        table.insert(Arc::clone(&second));
        assert_eq!(table.routes(&first.virtual_addr).len(), 2);

        table.remove(&first.id).unwrap();
        let left = table.routes(&first.virtual_addr);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].spoke.id, second.id);
        assert_eq!(table.by_capability("data").count(), 1);

        table.remove(&second.id).unwrap();
        assert!(table.routes(&first.virtual_addr).is_empty());
        assert!(table.is_empty());
        assert!(table.remove(&second.id).is_none());
    }

    #[test]
    fn set_health_targets_one_entry() {
        let mut table = RoutingTable::new();
        let s = spoke("s1", "t1", "a1", &[]);
        table.insert(Arc::clone(&s));

        assert!(table.set_health(&s.virtual_addr, &s.id, false));
        assert!(!table.routes(&s.virtual_addr)[0].healthy);
        assert!(!table.set_health(&s.virtual_addr, &SpokeId::from("other"), false));
    }
}
