//! Signaling channel over a relay WebSocket.
//!
//! One channel carries the control messages for exactly one call. Inbound
//! messages are parsed off the socket by a reader task and handed to a single
//! mpsc receiver in arrival order; the consumer must not block the channel,
//! it schedules async work instead. Outbound sends are fire-and-forget,
//! matching the transport's reliable ordered delivery.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::error::CallError;
use crate::signaling::SignalingMessage;

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

/// What the channel delivers to its single consumer.
#[derive(Debug)]
pub enum ChannelEvent {
    /// One inbound signaling message, in arrival order.
    Message(SignalingMessage),
    /// The transport closed. `expected` is true only after a local `close()`;
    /// an unexpected closure means the relay dropped us and the call must be
    /// terminated rather than left with a half-open peer session.
    Closed { expected: bool },
}

/// Outbound half of a signaling channel.
///
/// `send` after `close` (or after the transport dropped) logs and returns
/// instead of erroring, so teardown paths cannot crash.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    async fn send(&self, message: SignalingMessage);
    /// Idempotent; releases the transport.
    async fn close(&self);
}

/// [`SignalingChannel`] over a relay WebSocket.
pub struct WebSocketChannel {
    sink: Mutex<Option<WsSink>>,
    closing: Arc<AtomicBool>,
}

impl WebSocketChannel {
    /// Relay endpoint for one call, parameterized by room and credential.
    pub fn endpoint_url(base: &str, chat_id: &str, token: &str) -> String {
        format!(
            "{}/{}/?token={}",
            base.trim_end_matches('/'),
            urlencoding::encode(chat_id),
            urlencoding::encode(token)
        )
    }

    /// Establish the channel. Sends are valid once this returns.
    ///
    /// Fails with [`CallError::Connection`] when the relay is unreachable or
    /// rejects the credential.
    pub async fn connect(url: &str) -> Result<(Arc<Self>, mpsc::Receiver<ChannelEvent>), CallError> {
        debug!("Dialing signaling relay at {url}");
        let (ws, _response) = connect_async(url)
            .await
            .map_err(|e| CallError::Connection(e.to_string()))?;
        let (sink, stream) = ws.split();

        let (events_tx, events_rx) = mpsc::channel(64);
        let channel = Arc::new(Self {
            sink: Mutex::new(Some(sink)),
            closing: Arc::new(AtomicBool::new(false)),
        });

        tokio::spawn(read_loop(stream, events_tx, channel.closing.clone()));

        Ok((channel, events_rx))
    }

    #[cfg(test)]
    pub(crate) fn disconnected() -> Self {
        Self {
            sink: Mutex::new(None),
            closing: Arc::new(AtomicBool::new(true)),
        }
    }
}

#[async_trait]
impl SignalingChannel for WebSocketChannel {
    async fn send(&self, message: SignalingMessage) {
        let mut guard = self.sink.lock().await;
        let Some(sink) = guard.as_mut() else {
            debug!("Dropping {} message: channel is closed", message.kind());
            return;
        };
        let json = match message.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to encode {} message: {e}", message.kind());
                return;
            }
        };
        if let Err(e) = sink.send(Message::Text(json.into())).await {
            warn!("Failed to send {} message: {e}", message.kind());
        }
    }

    async fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
            debug!("Signaling channel closed");
        }
    }
}

/// Pump inbound frames into the event queue until the transport goes away,
/// then report the closure exactly once.
async fn read_loop(
    mut stream: WsStream,
    events: mpsc::Sender<ChannelEvent>,
    closing: Arc<AtomicBool>,
) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match SignalingMessage::from_json(text.as_str()) {
                Ok(message) => {
                    debug!("Received {} message", message.kind());
                    if events.send(ChannelEvent::Message(message)).await.is_err() {
                        // Consumer is gone; nothing left to deliver to.
                        return;
                    }
                }
                Err(e) => warn!("Dropping malformed signaling payload: {e}"),
            },
            Ok(Message::Close(_)) => break,
            Ok(Message::Binary(_)) => warn!("Dropping unexpected binary frame"),
            Ok(_) => {} // ping/pong handled by the transport
            Err(e) => {
                warn!("Signaling transport error: {e}");
                break;
            }
        }
    }

    let expected = closing.load(Ordering::SeqCst);
    let _ = events.send(ChannelEvent::Closed { expected }).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url_encodes_parameters() {
        let url = WebSocketChannel::endpoint_url(
            "wss://relay.example/ws/call/",
            "room 42",
            "t0k/en+x",
        );
        assert_eq!(url, "wss://relay.example/ws/call/room%2042/?token=t0k%2Fen%2Bx");
    }

    #[tokio::test]
    async fn test_send_after_close_is_silent() {
        let channel = WebSocketChannel::disconnected();
        // Must not panic or error.
        channel.send(SignalingMessage::CallEnd).await;
        channel.close().await;
        channel.close().await;
    }
}
