//! Framed WebSocket transport.
//!
//! One persistent ordered bidirectional channel to the server. Text frames
//! carry JSON control messages; binary frames carry media. The transport
//! splits the socket into a writer task (fed by an outbound queue) and a
//! reader task that routes frames into per-kind channels. Both frame
//! streams terminate together when the socket closes or errors.
//!
//! The connection is a plain TCP WebSocket: there is no multiplexed
//! HTTP/3 path and no proxy resolution on this carrier. Reconnection is a
//! session decision, not a transport one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::protocol_constants::{CONNECT_TIMEOUT_SECS, FRAME_CHANNEL_CAPACITY};

/// A connected WebSocket transport.
pub struct WsTransport {
    outbound_tx: mpsc::Sender<WsMessage>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
    text_rx: parking_lot::Mutex<Option<mpsc::Receiver<String>>>,
    binary_rx: parking_lot::Mutex<Option<mpsc::Receiver<Bytes>>>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl WsTransport {
    /// Establishes the connection with a 5-second timeout, failing fast on
    /// unreachable or unresponsive servers.
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let connect = tokio_tungstenite::connect_async(url);
        let (socket, _response) =
            tokio::time::timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS), connect)
                .await
                .map_err(|_| TransportError::ConnectionTimeout)?
                .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        log::info!("websocket connected: {url}");

        let (mut sink, mut stream) = socket.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<WsMessage>(FRAME_CHANNEL_CAPACITY);
        let (text_tx, text_rx) = mpsc::channel::<String>(FRAME_CHANNEL_CAPACITY);
        let (binary_tx, binary_rx) = mpsc::channel::<Bytes>(FRAME_CHANNEL_CAPACITY);
        let connected = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();

        // Writer: drains the outbound queue into the socket. On cancel it
        // sends a close frame and stops.
        let writer_connected = Arc::clone(&connected);
        let writer_cancel = cancel.clone();
        let writer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_cancel.cancelled() => {
                        let _ = sink.send(WsMessage::Close(None)).await;
                        break;
                    }
                    msg = outbound_rx.recv() => {
                        let Some(msg) = msg else { break };
                        if let Err(e) = sink.send(msg).await {
                            log::warn!("websocket send failed: {e}");
                            writer_connected.store(false, Ordering::Relaxed);
                            break;
                        }
                    }
                }
            }
        });

        // Reader: routes incoming frames. Dropping both frame senders on
        // exit terminates the text and binary streams together.
        let reader_connected = Arc::clone(&connected);
        let reader_cancel = cancel.clone();
        let pong_tx = outbound_tx.clone();
        let reader = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = reader_cancel.cancelled() => break,
                    msg = stream.next() => {
                        match msg {
                            Some(Ok(WsMessage::Text(text))) => {
                                if text_tx.send(text.to_string()).await.is_err() {
                                    break;
                                }
                            }
                            Some(Ok(WsMessage::Binary(data))) => {
                                if binary_tx.send(data).await.is_err() {
                                    break;
                                }
                            }
                            Some(Ok(WsMessage::Ping(payload))) => {
                                let _ = pong_tx.try_send(WsMessage::Pong(payload));
                            }
                            Some(Ok(WsMessage::Pong(_))) => {}
                            Some(Ok(WsMessage::Close(_))) => {
                                log::info!("server closed the websocket");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                log::warn!("websocket read failed: {e}");
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }
            reader_connected.store(false, Ordering::Relaxed);
        });

        Ok(Self {
            outbound_tx,
            connected,
            cancel,
            text_rx: parking_lot::Mutex::new(Some(text_rx)),
            binary_rx: parking_lot::Mutex::new(Some(binary_rx)),
            tasks: parking_lot::Mutex::new(vec![writer, reader]),
        })
    }

    /// Enqueues a text frame.
    pub async fn send_text(&self, text: String) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.outbound_tx
            .send(WsMessage::Text(text.into()))
            .await
            .map_err(|_| TransportError::NotConnected)
    }

    /// Enqueues a binary frame.
    pub async fn send_binary(&self, data: Bytes) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.outbound_tx
            .send(WsMessage::Binary(data))
            .await
            .map_err(|_| TransportError::NotConnected)
    }

    /// Takes the incoming text-frame stream. Frames arrive in socket order;
    /// the stream ends when the connection does.
    pub fn take_text_frames(&self) -> Option<mpsc::Receiver<String>> {
        self.text_rx.lock().take()
    }

    /// Takes the incoming binary-frame stream.
    pub fn take_binary_frames(&self) -> Option<mpsc::Receiver<Bytes>> {
        self.binary_rx.lock().take()
    }

    /// Whether the socket is still open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Initiates a normal close. Subsequent sends fail with `NotConnected`.
    pub async fn disconnect(&self) {
        self.connected.store(false, Ordering::Relaxed);
        self.cancel.cancel();
        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}
