//! WebSocket client transport for a remote inspector endpoint

use async_trait::async_trait;
use cdp_types::{CdpError, CdpMessage, CdpRequest};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::error::{ProtocolError, Result};
use crate::event_bus::{EventBus, EventStream};
use crate::transport::{parse_cdp_message, serialize_cdp_message, Transport};

type PendingReplies = Arc<DashMap<u64, oneshot::Sender<std::result::Result<Value, CdpError>>>>;

/// Forgets a pending request when its caller stops waiting, e.g. on timeout
struct PendingGuard<'a> {
    pending: &'a PendingReplies,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

/// Transport speaking CDP over a WebSocket, e.g. to a runtime started with `--inspect`
///
/// Replies are matched to commands by request id. Events are published to the
/// bus in the order they were read off the socket, so all chunk events a
/// command produced are queued before its reply is handed back.
pub struct WebSocketTransport {
    /// Outgoing frames, drained by the writer task
    outgoing: mpsc::UnboundedSender<Message>,
    /// Commands awaiting their reply
    pending: PendingReplies,
    /// Next request id
    next_id: AtomicU64,
    /// Incoming events
    events: EventBus,
    /// Whether the socket has gone away
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl WebSocketTransport {
    /// Connect to `url` (e.g. `ws://127.0.0.1:9229/<target-id>`)
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws_stream, _response) = connect_async(url).await.map_err(Box::new)?;
        info!("Connected to inspector at {}", url);

        let (mut sink, mut stream) = ws_stream.split();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let pending: PendingReplies = Arc::new(DashMap::new());
        let events = EventBus::new();
        let closed = Arc::new(AtomicBool::new(false));

        let writer = tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    error!("Failed to send frame to inspector: {}", e);
                    break;
                }
            }
        });

        let reader = {
            let pending = Arc::clone(&pending);
            let events = events.clone();
            let closed = Arc::clone(&closed);
            let outgoing = outgoing.clone();
            tokio::spawn(async move {
                while let Some(frame) = stream.next().await {
                    match frame {
                        Ok(Message::Text(text)) => Self::dispatch(&text, &pending, &events),
                        Ok(Message::Ping(data)) => {
                            let _ = outgoing.send(Message::Pong(data));
                        }
                        Ok(Message::Close(_)) => {
                            debug!("Inspector closed connection");
                            break;
                        }
                        Ok(Message::Binary(_)) => {
                            warn!("Binary messages not supported");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!("WebSocket error: {}", e);
                            break;
                        }
                    }
                }

                closed.store(true, Ordering::SeqCst);
                // Dropping the senders wakes every waiter with a closed error
                pending.clear();
            })
        };

        Ok(Self {
            outgoing,
            pending,
            next_id: AtomicU64::new(1),
            events,
            closed,
            reader,
            writer,
        })
    }

    /// Whether the connection is gone
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Commands still waiting for their reply
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn dispatch(text: &str, pending: &PendingReplies, events: &EventBus) {
        match parse_cdp_message(text) {
            Ok(CdpMessage::Response(response)) => match pending.remove(&response.id) {
                Some((_, reply)) => {
                    let _ = reply.send(response.into_result());
                }
                None => warn!("Reply for unknown request id {}", response.id),
            },
            Ok(CdpMessage::Event(event)) => {
                events.publish(event);
            }
            Ok(CdpMessage::Request(request)) => {
                warn!("Ignoring request {} sent by inspector", request.method);
            }
            Err(e) => error!("{}", e),
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&self, method: &str, params: Option<Value>) -> Result<Value> {
        if self.is_closed() {
            return Err(ProtocolError::Closed(method.to_string()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = CdpRequest::new(id, method, params);
        let frame = serialize_cdp_message(&CdpMessage::Request(request))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.insert(id, reply_tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        debug!("Sending request {} {}", id, method);
        if self.outgoing.send(Message::Text(frame)).is_err() {
            return Err(ProtocolError::Closed(method.to_string()));
        }

        reply_rx
            .await
            .map_err(|_| ProtocolError::Closed(method.to_string()))?
            .map_err(|e| ProtocolError::command(method, e))
    }

    fn subscribe(&self, event: &str) -> EventStream {
        self.events.subscribe(event)
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_dispatch_routes_reply_by_id() {
        let pending: PendingReplies = Arc::new(DashMap::new());
        let events = EventBus::new();
        let (tx, rx) = oneshot::channel();
        pending.insert(5, tx);

        WebSocketTransport::dispatch(r#"{"id":5,"result":{"ok":true}}"#, &pending, &events);

        assert_eq!(rx.await.unwrap().unwrap(), json!({"ok": true}));
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_publishes_events() {
        let pending: PendingReplies = Arc::new(DashMap::new());
        let events = EventBus::new();
        let mut chunks = events.subscribe("HeapProfiler.addHeapSnapshotChunk");

        WebSocketTransport::dispatch(
            r#"{"method":"HeapProfiler.addHeapSnapshotChunk","params":{"chunk":"abc"}}"#,
            &pending,
            &events,
        );

        assert_eq!(chunks.recv().await.unwrap().params["chunk"], "abc");
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Port 9 (discard) is not expected to host a WebSocket endpoint
        let result = WebSocketTransport::connect("ws://127.0.0.1:9/devtools").await;
        assert!(matches!(result, Err(ProtocolError::WebSocket(_))));
    }
}
