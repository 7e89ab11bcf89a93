use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex, OnceLock, RwLock, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    futures::StreamExt,
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

use {
    spokehub_protocol::CloudEvent,
    spokehub_service_traits::{EventPublisher, ServiceError, ServiceResult},
};

use crate::{
    backend::PubSubBackend,
    error::{Error, Result},
};

pub const DEFAULT_CHANNEL_PREFIX: &str = "spokehub:events:";
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(3);

/// Callback invoked for each event of a subscribed type.
pub type EventHandler = Arc<dyn Fn(&CloudEvent) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct FabricConfig {
    pub channel_prefix: String,
    pub publish_timeout: Duration,
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            channel_prefix: DEFAULT_CHANNEL_PREFIX.into(),
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
        }
    }
}

/// An event waiting for the publisher task.
struct Outgoing {
    channel: String,
    payload: Vec<u8>,
    event: CloudEvent,
}

struct Inner {
    backend: Arc<dyn PubSubBackend>,
    config: FabricConfig,
    /// event type → (subscription id, handler)
    handlers: RwLock<HashMap<String, Vec<(u64, EventHandler)>>>,
    /// Event types with a running channel pump.
    pumped: Mutex<HashSet<String>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    cancel: CancellationToken,
    /// Feeds the single publisher task, started on first publish.
    outbox: OnceLock<mpsc::UnboundedSender<Outgoing>>,
}

impl Inner {
    fn channel(&self, event_type: &str) -> String {
        format!("{}{event_type}", self.config.channel_prefix)
    }

    fn deliver_local(&self, event: &CloudEvent) {
        let handlers: Vec<EventHandler> = {
            let map = self.handlers.read().unwrap_or_else(|e| e.into_inner());
            map.get(&event.event_type)
                .map(|hs| hs.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default()
        };
        for handler in &handlers {
            handler(event);
        }
        #[cfg(feature = "metrics")]
        spokehub_metrics::counter!(
            spokehub_metrics::events::DELIVERED_TOTAL,
            spokehub_metrics::labels::EVENT_TYPE => event.event_type.clone()
        )
        .increment(handlers.len() as u64);
    }

    fn remove_handler(&self, event_type: &str, id: u64) {
        let mut map = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        if let Some(hs) = map.get_mut(event_type) {
            hs.retain(|(hid, _)| *hid != id);
            if hs.is_empty() {
                map.remove(event_type);
            }
        }
    }
}

/// Publish/subscribe for hub events.
///
/// Cheap to clone; clones share subscriptions and the background pumps.
#[derive(Clone)]
pub struct EventFabric {
    inner: Arc<Inner>,
}

impl EventFabric {
    pub fn new(backend: Arc<dyn PubSubBackend>, config: FabricConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                config,
                handlers: RwLock::new(HashMap::new()),
                pumped: Mutex::new(HashSet::new()),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                outbox: OnceLock::new(),
            }),
        }
    }

    /// Publish an event without waiting for the backend.
    ///
    /// Missing `id` and `time` are filled in. Events are queued for one
    /// background publisher, so they reach the backend in submission order.
    /// Each backend publish is bounded by the publish timeout; if it fails the
    /// event is handed to local subscribers instead.
    pub fn publish(&self, mut event: CloudEvent) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        event.stamp();
        let payload = serde_json::to_vec(&event)?;
        let outgoing = Outgoing {
            channel: self.inner.channel(&event.event_type),
            payload,
            event,
        };
        self.outbox().send(outgoing).map_err(|_| Error::Closed)
    }

    fn outbox(&self) -> &mpsc::UnboundedSender<Outgoing> {
        self.inner.outbox.get_or_init(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(run_publisher(
                Arc::downgrade(&self.inner),
                rx,
                self.inner.cancel.clone(),
            ));
            tx
        })
    }

    /// Register a local handler for `event_type`.
    ///
    /// The first subscription to a type also subscribes to its shared
    /// channel. If that fails the handler still receives locally published
    /// events that fell back.
    pub async fn subscribe(
        &self,
        event_type: impl Into<String>,
        handler: EventHandler,
    ) -> Result<Subscription> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        let event_type = event_type.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(event_type.clone())
            .or_default()
            .push((id, handler));

        let start_pump = self
            .inner
            .pumped
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(event_type.clone());
        if start_pump {
            self.start_pump(&event_type).await;
        }

        Ok(Subscription {
            id,
            event_type,
            inner: Arc::downgrade(&self.inner),
        })
    }

    async fn start_pump(&self, event_type: &str) {
        let channel = self.inner.channel(event_type);
        let mut stream = match self.inner.backend.subscribe(&channel).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(channel = %channel, error = %e, "events: channel subscribe failed, local delivery only");
                self.inner
                    .pumped
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(event_type);
                return;
            },
        };

        let inner = Arc::downgrade(&self.inner);
        let cancel = self.inner.cancel.clone();
        tokio::spawn(async move {
            loop {
                let payload = tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = stream.next() => match next {
                        Some(payload) => payload,
                        None => break,
                    },
                };
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                match serde_json::from_slice::<CloudEvent>(&payload) {
                    Ok(event) => inner.deliver_local(&event),
                    Err(e) => warn!(channel = %channel, error = %e, "events: undecodable event dropped"),
                }
            }
            debug!(channel = %channel, "events: pump stopped");
        });
    }

    /// Stop all pumps, drop every handler and refuse further publishes.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.cancel.cancel();
        self.inner
            .handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        debug!("events: fabric closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

async fn run_publisher(
    inner: Weak<Inner>,
    mut rx: mpsc::UnboundedReceiver<Outgoing>,
    cancel: CancellationToken,
) {
    loop {
        let outgoing = tokio::select! {
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(outgoing) => outgoing,
                None => break,
            },
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };
        publish_one(&inner, outgoing).await;
    }
    debug!("events: publisher stopped");
}

async fn publish_one(inner: &Inner, outgoing: Outgoing) {
    let Outgoing {
        channel,
        payload,
        event,
    } = outgoing;
    let result = match tokio::time::timeout(
        inner.config.publish_timeout,
        inner.backend.publish(&channel, &event.tenantid, payload),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(Error::backend(
            "publish",
            std::io::Error::new(std::io::ErrorKind::TimedOut, "publish timed out"),
        )),
    };
    match result {
        Ok(()) => {
            debug!(event_type = %event.event_type, event_id = %event.id, "events: published");
            #[cfg(feature = "metrics")]
            spokehub_metrics::counter!(
                spokehub_metrics::events::PUBLISHED_TOTAL,
                spokehub_metrics::labels::EVENT_TYPE => event.event_type.clone()
            )
            .increment(1);
        },
        Err(e) => {
            let degraded = Error::PublishDegraded {
                event_type: event.event_type.clone(),
                reason: e.to_string(),
            };
            warn!(event_id = %event.id, error = %degraded, "events: backend publish failed");
            #[cfg(feature = "metrics")]
            spokehub_metrics::counter!(
                spokehub_metrics::events::DEGRADED_TOTAL,
                spokehub_metrics::labels::EVENT_TYPE => event.event_type.clone()
            )
            .increment(1);
            inner.deliver_local(&event);
        },
    }
}

/// Handle to a local handler. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    event_type: String,
    inner: Weak<Inner>,
}

impl Subscription {
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.remove_handler(&self.event_type, self.id);
        }
    }
}

#[async_trait]
impl EventPublisher for EventFabric {
    async fn publish(&self, event: CloudEvent) -> ServiceResult {
        EventFabric::publish(self, event).map_err(ServiceError::message)
    }
}
