//! Lifecycle of one spoke WebSocket.
//!
//! The socket is split between a writer task, which alone owns the sink, and
//! the reader loop, which alone owns the stream. Either side may end the
//! connection; [`Connection::teardown`] runs once no matter who gets there
//! first.

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use {
    axum::extract::ws::{Message as WsMessage, WebSocket},
    bytes::Bytes,
    futures::{
        Sink, SinkExt,
        stream::{SplitStream, StreamExt},
    },
    spokehub_protocol::{ErrorFrame, Message, OUTBOUND_BATCH_MAX, RoutedFrame, SpokeEnvelope},
    spokehub_routing::{Hub, NewSpoke, SpokeInfo},
    tokio::{
        sync::mpsc::{self, error::TrySendError},
        time::{Instant, MissedTickBehavior, timeout},
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::state::{GatewayState, TransportLimits};

/// Shared between the reader and writer of one spoke socket.
struct Connection {
    spoke: Arc<SpokeInfo>,
    hub: Arc<Hub>,
    closed: AtomicBool,
    cancel: CancellationToken,
}

impl Connection {
    /// Close the outbound queue, deregister the spoke, and stop the reader.
    /// Only the first call does anything.
    async fn teardown(&self, reason: &str) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(spoke_id = %self.spoke.id, reason, "ws: tearing down");
        self.cancel.cancel();
        self.hub.detach_outbound(&self.spoke.id);
        if let Err(e) = self.hub.deregister(&self.spoke.id).await {
            warn!(spoke_id = %self.spoke.id, error = %e, "ws: deregister on teardown failed");
        }
    }
}

/// Register a spoke for an upgraded socket and run it until disconnect.
pub async fn serve_spoke(
    socket: WebSocket,
    state: Arc<GatewayState>,
    params: NewSpoke,
    remote_addr: SocketAddr,
) {
    let limits = state.limits.clone();
    let (out_tx, out_rx) = mpsc::channel::<String>(limits.outbound_queue);
    let registration = state
        .hub
        .register(params.with_outbound(out_tx.clone()))
        .await;
    let spoke = registration.spoke;
    if let Some(w) = registration.warning {
        warn!(spoke_id = %spoke.id, warning = %w, "ws: registered with warning");
    }
    info!(
        spoke_id = %spoke.id,
        tenant_id = %spoke.tenant_id,
        remote_ip = %remote_addr.ip(),
        "ws: spoke connected"
    );
    state.connection_opened();

    let conn = Arc::new(Connection {
        spoke: Arc::clone(&spoke),
        hub: Arc::clone(&state.hub),
        closed: AtomicBool::new(false),
        cancel: state.shutdown.child_token(),
    });

    let (sink, stream) = socket.split();
    let mut writer = tokio::spawn(write_loop(sink, out_rx, Arc::clone(&conn), limits.clone()));

    let reason = read_loop(stream, out_tx, &conn, &limits).await;
    conn.teardown(reason).await;

    // The writer drains what is queued, sends a close frame and exits.
    if timeout(limits.write_timeout, &mut writer).await.is_err() {
        writer.abort();
    }
    state.connection_closed();

    info!(
        spoke_id = %spoke.id,
        reason,
        messages = spoke.message_count(),
        duration_secs = (chrono::Utc::now() - spoke.connected_at).num_seconds(),
        "ws: spoke disconnected"
    );
}

// ── Writer ───────────────────────────────────────────────────────────────────

/// Pings run on a fixed period regardless of outbound traffic, so a spoke
/// that only receives still answers with pongs.
async fn write_loop<S>(
    mut sink: S,
    mut rx: mpsc::Receiver<String>,
    conn: Arc<Connection>,
    limits: TransportLimits,
) where
    S: Sink<WsMessage> + Unpin + Send,
    S::Error: Send,
{
    let mut ping = tokio::time::interval_at(
        Instant::now() + limits.ping_interval,
        limits.ping_interval,
    );
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut batch = Vec::with_capacity(OUTBOUND_BATCH_MAX);

    loop {
        tokio::select! {
            received = rx.recv_many(&mut batch, OUTBOUND_BATCH_MAX) => {
                if received == 0 {
                    // Queue closed: say goodbye and stop.
                    let _ = timeout(limits.write_timeout, sink.send(WsMessage::Close(None))).await;
                    break;
                }
                if let Err(reason) = write_batch(&mut sink, &mut batch, &limits).await {
                    conn.teardown(reason).await;
                    break;
                }
            },
            _ = ping.tick() => {
                match timeout(limits.write_timeout, sink.send(WsMessage::Ping(Bytes::new()))).await {
                    Ok(Ok(())) => {},
                    Ok(Err(_)) => {
                        conn.teardown("ping failed").await;
                        break;
                    },
                    Err(_) => {
                        conn.teardown("ping timed out").await;
                        break;
                    },
                }
            },
        }
    }
}

/// Feed every queued frame, then flush once.
async fn write_batch<S>(
    sink: &mut S,
    batch: &mut Vec<String>,
    limits: &TransportLimits,
) -> Result<(), &'static str>
where
    S: Sink<WsMessage> + Unpin,
{
    let count = batch.len();
    let write = async {
        for frame in batch.drain(..) {
            sink.feed(WsMessage::Text(frame.into())).await?;
        }
        sink.flush().await
    };
    match timeout(limits.write_timeout, write).await {
        Ok(Ok(())) => {
            #[cfg(feature = "metrics")]
            spokehub_metrics::counter!(spokehub_metrics::websocket::MESSAGES_SENT_TOTAL)
                .increment(count as u64);
            #[cfg(not(feature = "metrics"))]
            let _ = count;
            Ok(())
        },
        Ok(Err(_)) => Err("write failed"),
        Err(_) => Err("write timed out"),
    }
}

// ── Reader ───────────────────────────────────────────────────────────────────

/// Read and route frames until the socket fails or the connection is torn
/// down. Returns the reason the loop ended.
async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    out_tx: mpsc::Sender<String>,
    conn: &Connection,
    limits: &TransportLimits,
) -> &'static str {
    let spoke = &conn.spoke;
    loop {
        let next = tokio::select! {
            _ = conn.cancel.cancelled() => return "closed",
            next = timeout(limits.read_timeout, stream.next()) => next,
        };
        let frame = match next {
            Err(_) => return "read timed out",
            Ok(None) => return "stream ended",
            Ok(Some(Err(e))) => {
                debug!(spoke_id = %spoke.id, error = %e, "ws: read error");
                return "read error";
            },
            Ok(Some(Ok(frame))) => frame,
        };

        let raw = match frame {
            WsMessage::Text(text) => Bytes::copy_from_slice(text.as_str().as_bytes()),
            WsMessage::Binary(bytes) => bytes,
            WsMessage::Close(_) => return "closed by spoke",
            // Control frames only extend the read deadline.
            WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
        };

        spoke.touch(raw.len());
        #[cfg(feature = "metrics")]
        spokehub_metrics::counter!(spokehub_metrics::websocket::MESSAGES_RECEIVED_TOTAL)
            .increment(1);

        let envelope: SpokeEnvelope = match serde_json::from_slice(&raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(spoke_id = %spoke.id, error = %e, "ws: invalid frame");
                continue;
            },
        };
        let id = envelope.id.clone();
        let mut msg = Message::from_envelope(
            envelope,
            spoke.virtual_addr.clone(),
            spoke.tenant_id.clone(),
            raw,
        );

        let reply = match conn.hub.route_within(&mut msg, limits.route_timeout).await {
            Ok(result) => serde_json::to_string(&RoutedFrame::new(
                id,
                result.destinations,
                result.hops_used,
            )),
            Err(e) => serde_json::to_string(&ErrorFrame::new(id, e.to_string())),
        };
        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                warn!(spoke_id = %spoke.id, error = %e, "ws: failed to encode reply");
                continue;
            },
        };

        if let Err(reason) = queue_reply(&out_tx, reply, spoke) {
            return reason;
        }
    }
}

/// Enqueue a reply without waiting. A full queue drops the reply; only a
/// closed queue ends the reader.
fn queue_reply(
    out_tx: &mpsc::Sender<String>,
    reply: String,
    spoke: &SpokeInfo,
) -> Result<(), &'static str> {
    match out_tx.try_send(reply) {
        Ok(()) => Ok(()),
        Err(TrySendError::Full(_)) => {
            warn!(spoke_id = %spoke.id, "ws: outbound queue full, reply dropped");
            #[cfg(feature = "metrics")]
            spokehub_metrics::counter!(
                spokehub_metrics::websocket::OUTBOUND_DROPPED_TOTAL,
                spokehub_metrics::labels::REASON => "reply"
            )
            .increment(1);
            Ok(())
        },
        Err(TrySendError::Closed(_)) => Err("outbound closed"),
    }
}
