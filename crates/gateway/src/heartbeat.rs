use std::{sync::Arc, time::Duration};

use {
    spokehub_routing::Hub,
    tokio::{task::JoinHandle, time::MissedTickBehavior},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info},
};

/// Periodically re-announce local spokes to the directory so their records
/// outlive the store expiry. Stops when `shutdown` is cancelled.
pub fn spawn_directory_heartbeat(
    hub: Arc<Hub>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; registrations were just written.
        ticker.tick().await;
        info!(interval_secs = interval.as_secs(), "heartbeat: directory refresh started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let refreshed = hub.refresh_directory().await;
                    debug!(refreshed, "heartbeat: spokes re-announced");
                },
            }
        }
        debug!("heartbeat: stopped");
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        async_trait::async_trait,
        spokehub_protocol::{SpokeId, SpokeRecord},
        spokehub_routing::{HubConfig, NewSpoke},
        spokehub_service_traits::{ServiceResult, SpokeDirectory},
        std::sync::atomic::{AtomicUsize, Ordering},
    };

    #[derive(Default)]
    struct CountingDirectory {
        refreshes: AtomicUsize,
    }

    #[async_trait]
    impl SpokeDirectory for CountingDirectory {
        async fn save_spoke(&self, _record: &SpokeRecord) -> ServiceResult {
            Ok(())
        }

        async fn refresh_spoke(&self, _record: &SpokeRecord) -> ServiceResult {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
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

    #[tokio::test]
    async fn refreshes_until_cancelled() {
        let directory = Arc::new(CountingDirectory::default());
        let hub = Arc::new(
            Hub::new(HubConfig::new("h")).with_directory(Arc::clone(&directory) as _),
        );
        hub.register(NewSpoke::new("t", "a")).await;
        hub.register(NewSpoke::new("t", "b")).await;

        let shutdown = CancellationToken::new();
        let handle =
            spawn_directory_heartbeat(Arc::clone(&hub), Duration::from_millis(20), shutdown.clone());
        tokio::time::sleep(Duration::from_millis(110)).await;
        shutdown.cancel();
        handle.await.unwrap();

        let refreshes = directory.refreshes.load(Ordering::SeqCst);
        assert!(refreshes >= 2, "expected refreshes, got {refreshes}");
        assert_eq!(refreshes % 2, 0);
    }
}
