use {
    async_trait::async_trait,
    dashmap::DashMap,
    futures::{StreamExt, stream::BoxStream},
    tokio::sync::broadcast,
    tokio_stream::wrappers::BroadcastStream,
    tracing::warn,
};

use crate::Result;

/// Raw event payloads received on one channel.
pub type EventStream = BoxStream<'static, Vec<u8>>;

/// Channel-based publish/subscribe shared between hub processes.
#[async_trait]
pub trait PubSubBackend: Send + Sync {
    /// Publish `payload` on `channel`. `key` groups related events for
    /// backends that order per key.
    async fn publish(&self, channel: &str, key: &str, payload: Vec<u8>) -> Result<()>;
    async fn subscribe(&self, channel: &str) -> Result<EventStream>;
}

const CHANNEL_CAPACITY: usize = 1024;

/// In-process backend over tokio broadcast channels.
#[derive(Default)]
pub struct MemoryPubSub {
    channels: DashMap<String, broadcast::Sender<Vec<u8>>>,
}

impl MemoryPubSub {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<Vec<u8>> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl PubSubBackend for MemoryPubSub {
    async fn publish(&self, channel: &str, _key: &str, payload: Vec<u8>) -> Result<()> {
        // No receivers is not an error; nobody is listening yet.
        let _ = self.sender(channel).send(payload);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<EventStream> {
        let channel_name = channel.to_string();
        let stream = BroadcastStream::new(self.sender(channel).subscribe()).filter_map(move |item| {
            let channel_name = channel_name.clone();
            async move {
                match item {
                    Ok(payload) => Some(payload),
                    Err(e) => {
                        warn!(channel = %channel_name, error = %e, "events: subscriber lagged");
                        None
                    },
                }
            }
        });
        Ok(stream.boxed())
    }
}
