use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    tracing::{debug, warn},
};

use {
    spokehub_protocol::{SpokeId, SpokeRecord, VirtualAddress},
    spokehub_service_traits::{ServiceError, ServiceResult, SpokeDirectory},
};

use crate::{
    backend::KvBackend,
    error::{Error, Result},
};

pub const DEFAULT_KEY_PREFIX: &str = "spokehub:hub:";
pub const DEFAULT_SPOKE_TTL: Duration = Duration::from_secs(600);
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub key_prefix: String,
    /// Expiry of each spoke record; heartbeats re-write records before it.
    pub spoke_ttl: Duration,
    /// Bound on every composite store operation.
    pub op_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.into(),
            spoke_ttl: DEFAULT_SPOKE_TTL,
            op_timeout: DEFAULT_OP_TIMEOUT,
        }
    }
}

/// Spoke registrations mirrored into a shared key/value backend.
///
/// Layout under the key prefix:
/// - `spoke:<id>` JSON record with expiry
/// - `route:<addr>` set of spoke ids
/// - `cap:<capability>` set of spoke ids
/// - `tenant:<tenant>` set of spoke ids
pub struct DistributedStore {
    backend: Arc<dyn KvBackend>,
    config: StoreConfig,
}

impl DistributedStore {
    pub fn new(backend: Arc<dyn KvBackend>, config: StoreConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn spoke_key(&self, id: &SpokeId) -> String {
        format!("{}spoke:{id}", self.config.key_prefix)
    }

    fn route_key(&self, addr: &VirtualAddress) -> String {
        format!("{}route:{addr}", self.config.key_prefix)
    }

    fn cap_key(&self, capability: &str) -> String {
        format!("{}cap:{capability}", self.config.key_prefix)
    }

    fn tenant_key(&self, tenant_id: &str) -> String {
        format!("{}tenant:{tenant_id}", self.config.key_prefix)
    }

    async fn timed<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let result = match tokio::time::timeout(self.config.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout { operation }),
        };
        #[cfg(feature = "metrics")]
        {
            use spokehub_metrics::{counter, labels, store};
            counter!(store::OPERATIONS_TOTAL, labels::OPERATION => operation).increment(1);
            if result.is_err() {
                counter!(store::ERRORS_TOTAL, labels::OPERATION => operation).increment(1);
            }
        }
        result
    }

    /// Write the record and its index memberships.
    ///
    /// Record and route index failures abort; capability and tenant index
    /// failures are logged and skipped.
    pub async fn save_spoke(&self, record: &SpokeRecord) -> Result<()> {
        self.timed("save_spoke", async {
            self.write_record(record).await?;
            self.backend
                .sadd(&self.route_key(&record.virtual_addr), record.id.as_str())
                .await?;
            for cap in &record.capabilities {
                if let Err(e) = self.backend.sadd(&self.cap_key(cap), record.id.as_str()).await {
                    warn!(spoke_id = %record.id, capability = %cap, error = %e, "store: capability index update failed");
                }
            }
            if let Err(e) = self
                .backend
                .sadd(&self.tenant_key(&record.tenant_id), record.id.as_str())
                .await
            {
                warn!(spoke_id = %record.id, tenant_id = %record.tenant_id, error = %e, "store: tenant index update failed");
            }
            debug!(spoke_id = %record.id, "store: spoke saved");
            Ok(())
        })
        .await
    }

    /// Re-write the record so it outlives the expiry.
    pub async fn refresh_spoke(&self, record: &SpokeRecord) -> Result<()> {
        self.timed("refresh_spoke", self.write_record(record)).await
    }

    async fn write_record(&self, record: &SpokeRecord) -> Result<()> {
        let key = self.spoke_key(&record.id);
        let json = serde_json::to_string(record).map_err(|source| Error::Corrupt {
            key: key.clone(),
            source,
        })?;
        self.backend
            .set(&key, &json, Some(self.config.spoke_ttl))
            .await
    }

    pub async fn load_spoke(&self, id: &SpokeId) -> Result<SpokeRecord> {
        self.timed("load_spoke", async {
            let key = self.spoke_key(id);
            let raw = self
                .backend
                .get(&key)
                .await?
                .ok_or_else(|| Error::NotFound(format!("spoke {id}")))?;
            serde_json::from_str(&raw).map_err(|source| Error::Corrupt { key, source })
        })
        .await
    }

    /// Remove index memberships, then the record. Index failures are logged.
    pub async fn delete_spoke(&self, record: &SpokeRecord) -> Result<()> {
        self.timed("delete_spoke", async {
            let id = record.id.as_str();
            let mut index_keys = vec![
                self.route_key(&record.virtual_addr),
                self.tenant_key(&record.tenant_id),
            ];
            index_keys.extend(record.capabilities.iter().map(|c| self.cap_key(c)));
            for key in &index_keys {
                if let Err(e) = self.backend.srem(key, id).await {
                    warn!(spoke_id = %id, key = %key, error = %e, "store: index removal failed");
                }
            }
            self.backend.del(&self.spoke_key(&record.id)).await?;
            debug!(spoke_id = %id, "store: spoke deleted");
            Ok(())
        })
        .await
    }

    pub async fn spokes_by_capability(&self, capability: &str) -> Result<Vec<SpokeId>> {
        self.members("spokes_by_capability", self.cap_key(capability))
            .await
    }

    pub async fn spokes_by_tenant(&self, tenant_id: &str) -> Result<Vec<SpokeId>> {
        self.members("spokes_by_tenant", self.tenant_key(tenant_id))
            .await
    }

    pub async fn spokes_by_address(&self, addr: &VirtualAddress) -> Result<Vec<SpokeId>> {
        self.members("spokes_by_address", self.route_key(addr))
            .await
    }

    async fn members(&self, operation: &'static str, key: String) -> Result<Vec<SpokeId>> {
        self.timed(operation, async {
            Ok(self
                .backend
                .smembers(&key)
                .await?
                .into_iter()
                .map(SpokeId::from)
                .collect())
        })
        .await
    }
}

fn service_error(err: Error) -> ServiceError {
    match err {
        Error::Timeout { operation } => ServiceError::Timeout { operation },
        other => ServiceError::message(other),
    }
}

#[async_trait]
impl SpokeDirectory for DistributedStore {
    async fn save_spoke(&self, record: &SpokeRecord) -> ServiceResult {
        DistributedStore::save_spoke(self, record)
            .await
            .map_err(service_error)
    }

    async fn refresh_spoke(&self, record: &SpokeRecord) -> ServiceResult {
        DistributedStore::refresh_spoke(self, record)
            .await
            .map_err(service_error)
    }

    async fn load_spoke(&self, id: &SpokeId) -> ServiceResult<Option<SpokeRecord>> {
        match DistributedStore::load_spoke(self, id).await {
            Ok(record) => Ok(Some(record)),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(service_error(e)),
        }
    }

    async fn delete_spoke(&self, record: &SpokeRecord) -> ServiceResult {
        DistributedStore::delete_spoke(self, record)
            .await
            .map_err(service_error)
    }

    async fn spokes_by_capability(&self, capability: &str) -> ServiceResult<Vec<SpokeId>> {
        DistributedStore::spokes_by_capability(self, capability)
            .await
            .map_err(service_error)
    }

    async fn spokes_by_tenant(&self, tenant_id: &str) -> ServiceResult<Vec<SpokeId>> {
        DistributedStore::spokes_by_tenant(self, tenant_id)
            .await
            .map_err(service_error)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        crate::backend::MemoryBackend,
        chrono::Utc,
        spokehub_protocol::{HubId, address},
    };

    fn record(id: &str, tenant: &str, agent: &str, caps: &[&str]) -> SpokeRecord {
        let hub = HubId::from("hub-a");
        SpokeRecord {
            id: SpokeId::from(id),
            virtual_addr: address::direct(&hub, tenant, agent),
            hub_id: hub,
            tenant_id: tenant.into(),
            agent_id: agent.into(),
            capabilities: caps.iter().map(|c| c.to_string()).collect(),
            trust_score: 0.8,
            entitlements: vec![],
            connected_at: Utc::now(),
        }
    }

    fn store(backend: Arc<dyn KvBackend>) -> DistributedStore {
        DistributedStore::new(backend, StoreConfig::default())
    }

    #[tokio::test]
    async fn save_load_delete_keeps_indexes_in_step() {
        let kv = Arc::new(MemoryBackend::new());
        let store = store(Arc::clone(&kv) as Arc<dyn KvBackend>);
        let rec = record("s1", "t1", "a1", &["data", "ml"]);

        store.save_spoke(&rec).await.unwrap();
        assert_eq!(store.load_spoke(&rec.id).await.unwrap(), rec);
        assert_eq!(store.spokes_by_capability("ml").await.unwrap(), vec![rec.id.clone()]);
        assert_eq!(store.spokes_by_tenant("t1").await.unwrap(), vec![rec.id.clone()]);
        assert_eq!(
            store.spokes_by_address(&rec.virtual_addr).await.unwrap(),
            vec![rec.id.clone()]
        );
        assert!(
            kv.get("spokehub:hub:spoke:s1").await.unwrap().is_some(),
            "record lives under the documented key"
        );

        store.delete_spoke(&rec).await.unwrap();
        assert!(matches!(
            store.load_spoke(&rec.id).await.unwrap_err(),
            Error::NotFound(_)
        ));
        assert!(store.spokes_by_capability("data").await.unwrap().is_empty());
        assert!(store.spokes_by_tenant("t1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_record_is_reported() {
        let kv = Arc::new(MemoryBackend::new());
        kv.set("spokehub:hub:spoke:bad", "{not json", None)
            .await
            .unwrap();
        let store = store(kv);
        assert!(matches!(
            store.load_spoke(&SpokeId::from("bad")).await.unwrap_err(),
            Error::Corrupt { .. }
        ));
    }

    #[tokio::test]
    async fn records_expire_but_refresh_extends() {
        let store = DistributedStore::new(Arc::new(MemoryBackend::new()), StoreConfig {
            spoke_ttl: Duration::from_millis(30),
            ..Default::default()
        });
        let rec = record("s1", "t1", "a1", &[]);
        store.save_spoke(&rec).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        store.refresh_spoke(&rec).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(store.load_spoke(&rec.id).await.is_ok());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(matches!(
            store.load_spoke(&rec.id).await.unwrap_err(),
            Error::NotFound(_)
        ));
    }

    /// Fails set-index writes whose key contains `fail_on`.
    struct FlakyBackend {
        inner: MemoryBackend,
        fail_on: &'static str,
    }

    #[async_trait]
    impl KvBackend for FlakyBackend {
        async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
            self.inner.set(key, value, ttl).await
        }

        async fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key).await
        }

        async fn del(&self, key: &str) -> Result<()> {
            self.inner.del(key).await
        }

        async fn sadd(&self, key: &str, member: &str) -> Result<()> {
            if key.contains(self.fail_on) {
                return Err(Error::backend(
                    "sadd",
                    std::io::Error::other("connection reset"),
                ));
            }
            self.inner.sadd(key, member).await
        }

        async fn srem(&self, key: &str, member: &str) -> Result<()> {
            if key.contains(self.fail_on) {
                return Err(Error::backend(
                    "srem",
                    std::io::Error::other("connection reset"),
                ));
            }
            self.inner.srem(key, member).await
        }

        async fn smembers(&self, key: &str) -> Result<Vec<String>> {
            self.inner.smembers(key).await
        }
    }

    #[tokio::test]
    async fn capability_index_failure_is_not_fatal() {
        let store = store(Arc::new(FlakyBackend {
            inner: MemoryBackend::new(),
            fail_on: ":cap:",
        }));
        let rec = record("s1", "t1", "a1", &["data"]);
        store.save_spoke(&rec).await.unwrap();
        assert!(store.spokes_by_capability("data").await.unwrap().is_empty());
        assert_eq!(store.spokes_by_tenant("t1").await.unwrap().len(), 1);

        store.delete_spoke(&rec).await.unwrap();
        assert!(store.load_spoke(&rec.id).await.is_err());
    }

    #[tokio::test]
    async fn route_index_failure_aborts_save() {
        let store = store(Arc::new(FlakyBackend {
            inner: MemoryBackend::new(),
            fail_on: ":route:",
        }));
        let rec = record("s1", "t1", "a1", &["data"]);
        assert!(matches!(
            store.save_spoke(&rec).await.unwrap_err(),
            Error::Backend { .. }
        ));
    }

    #[tokio::test]
    async fn directory_trait_maps_missing_to_none() {
        let store = store(Arc::new(MemoryBackend::new()));
        let dir: &dyn SpokeDirectory = &store;
        assert!(dir.load_spoke(&SpokeId::from("x")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sqlite_backend_serves_two_stores() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("fleet.db").display());
        let a = store(Arc::new(crate::SqliteBackend::connect(&url).await.unwrap()));
        let b = store(Arc::new(crate::SqliteBackend::connect(&url).await.unwrap()));
        let rec = record("s1", "t1", "a1", &["data"]);
        a.save_spoke(&rec).await.unwrap();
        assert_eq!(b.load_spoke(&rec.id).await.unwrap().agent_id, "a1");
        assert_eq!(b.spokes_by_capability("data").await.unwrap(), vec![rec.id]);
    }
}
