//! HTTP federation: hands messages to peer hubs over their gateway API.

use std::time::Duration;

use {
    async_trait::async_trait,
    spokehub_protocol::{HubId, Message},
    spokehub_service_traits::{PeerForwarder, ServiceError, ServiceResult},
    tracing::debug,
};

/// Path on a peer gateway that accepts forwarded messages.
pub const FORWARD_PATH: &str = "/api/fabric/forward";
pub const DEFAULT_FORWARD_TIMEOUT: Duration = Duration::from_secs(5);

/// POSTs the message JSON to `<endpoint>/api/fabric/forward`.
pub struct HttpPeerForwarder {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpPeerForwarder {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

impl Default for HttpPeerForwarder {
    fn default() -> Self {
        Self::new(DEFAULT_FORWARD_TIMEOUT)
    }
}

fn forward_url(endpoint: &str) -> String {
    format!("{}{FORWARD_PATH}", endpoint.trim_end_matches('/'))
}

#[async_trait]
impl PeerForwarder for HttpPeerForwarder {
    async fn forward(&self, peer: &HubId, endpoint: &str, message: &Message) -> ServiceResult {
        let url = forward_url(endpoint);
        let outcome = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(message)
            .send()
            .await;

        let result = match outcome {
            Ok(resp) if resp.status().is_success() => Ok(()),
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                Err(ServiceError::message(format!(
                    "peer {peer} answered {status}: {body}"
                )))
            },
            Err(e) if e.is_timeout() => Err(ServiceError::Timeout {
                operation: "peer forward",
            }),
            Err(e) => Err(ServiceError::message(format!("peer {peer} unreachable: {e}"))),
        };

        debug!(peer = %peer, url = %url, ok = result.is_ok(), message_id = %message.id, "federation: forward");
        result
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_without_double_slash() {
        assert_eq!(
            forward_url("http://hub-b:8080/"),
            "http://hub-b:8080/api/fabric/forward"
        );
        assert_eq!(forward_url("http://hub-b"), "http://hub-b/api/fabric/forward");
    }

    #[tokio::test]
    async fn unreachable_peer_is_an_error() {
        let forwarder = HttpPeerForwarder::new(Duration::from_millis(500));
        let msg = Message::new("ocx://a/t/x", "ocx://b/t/y", "t");
        // Port 9 (discard) is closed on test hosts.
        let err = forwarder
            .forward(&HubId::from("b"), "http://127.0.0.1:9", &msg)
            .await
            .unwrap_err();
        assert!(!err.to_string().is_empty());
    }
}
