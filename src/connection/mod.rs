// src/connection/mod.rs

//! The transport core of a FOSP connection: framed read and write loops
//! over a WebSocket, a sequence-numbered pending-request table, and
//! request/response multiplexing.

pub mod bootstrap;
mod handler;
mod server;

pub use server::{ConnState, ServerConnection};

use crate::core::FospError;
use crate::core::protocol::{Message, Request, Response, parse_message, serialize_message};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{Message as WsMessage, Utf8Bytes};
use tracing::{debug, warn};

/// How many outgoing messages may queue before senders block. A full outbox
/// back-pressures the handler and, through it, the reader.
const OUTBOX_CAPACITY: usize = 32;

/// Receives the requests and notifications arriving on a connection.
/// Responses are consumed by the pending-request table and never reach the
/// handler.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle_message(&self, message: Message);

    /// Called exactly once when the connection is torn down.
    async fn handle_close(&self) {}
}

/// The registered handler together with the messages that arrived before
/// registration. The reader starts with the connection, so a fast peer can
/// get a frame in before `set_message_handler` runs; those are parked here
/// and replayed on registration.
#[derive(Default)]
struct HandlerSlot {
    handler: Option<Arc<dyn MessageHandler>>,
    early: Vec<Message>,
}

/// A generic FOSP connection. It is the base for [`ServerConnection`] and
/// for the client library.
pub struct Connection {
    outbox: mpsc::Sender<Message>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Response>>>,
    next_seq: AtomicU64,
    request_timeout: Duration,
    handler: Mutex<HandlerSlot>,
    shutdown_tx: broadcast::Sender<()>,
    closed: AtomicBool,
}

impl Connection {
    /// Wraps an established WebSocket and spawns the reader and writer
    /// tasks. A message handler should be registered right afterwards,
    /// before the peer can say anything meaningful.
    pub fn spawn<S>(ws: WebSocketStream<S>, request_timeout: Duration) -> Arc<Connection>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (outbox_tx, outbox_rx) = mpsc::channel(OUTBOX_CAPACITY);
        let (shutdown_tx, _) = broadcast::channel(1);
        let connection = Arc::new(Connection {
            outbox: outbox_tx,
            pending: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(1),
            request_timeout,
            handler: Mutex::new(HandlerSlot::default()),
            shutdown_tx: shutdown_tx.clone(),
            closed: AtomicBool::new(false),
        });

        let (sink, stream) = ws.split();
        tokio::spawn(Connection::write_loop(
            connection.clone(),
            sink,
            outbox_rx,
            shutdown_tx.subscribe(),
        ));
        tokio::spawn(Connection::read_loop(
            connection.clone(),
            stream,
            shutdown_tx.subscribe(),
        ));
        connection
    }

    /// Registers the object that processes inbound requests and
    /// notifications, and replays anything the peer managed to send
    /// before registration.
    pub fn set_message_handler(&self, handler: Arc<dyn MessageHandler>) {
        let early: Vec<Message> = {
            let mut slot = self.handler.lock();
            slot.handler = Some(handler.clone());
            slot.early.drain(..).collect()
        };
        for message in early {
            let handler = handler.clone();
            tokio::spawn(async move { handler.handle_message(message).await });
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Queues a message for sending without waiting for anything beyond a
    /// free outbox slot.
    pub async fn enqueue(&self, message: Message) -> Result<(), FospError> {
        self.outbox
            .send(message)
            .await
            .map_err(|_| FospError::TransportClosed)
    }

    /// Sends a request and waits for the matching response.
    ///
    /// The sequence number is allocated here; a fresh one-shot channel is
    /// parked in the pending table until the reader completes it, the
    /// timeout fires, or the transport closes. Safe to call concurrently.
    pub async fn send_request(&self, mut request: Request) -> Result<Response, FospError> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        request.seq = seq;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(seq, tx);

        if self.outbox.send(Message::Request(request)).await.is_err() {
            self.pending.lock().remove(&seq);
            return Err(FospError::TransportClosed);
        }

        let result = tokio::time::timeout(self.request_timeout, rx).await;
        self.pending.lock().remove(&seq);

        match result {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(FospError::TransportClosed),
            Err(_) => Err(FospError::RequestTimedOut),
        }
    }

    /// Tears the connection down: stops both loops, fails every pending
    /// request and notifies the handler once.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(());

        // Dropping the one-shot senders makes every waiting caller observe
        // a TransportClosed error.
        let pending: Vec<_> = {
            let mut table = self.pending.lock();
            table.drain().collect()
        };
        drop(pending);

        // Dropping the handler breaks the reference cycle between the
        // connection and its handler.
        let handler = self.handler.lock().handler.take();
        if let Some(handler) = handler {
            handler.handle_close().await;
        }
    }

    async fn read_loop<S>(
        connection: Arc<Connection>,
        mut stream: SplitStream<WebSocketStream<S>>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                frame = stream.next() => {
                    let data: Bytes = match frame {
                        Some(Ok(WsMessage::Text(text))) => text.into(),
                        Some(Ok(WsMessage::Binary(data))) => data,
                        Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_))) => continue,
                        Some(Ok(WsMessage::Close(_))) | None => break,
                        Some(Err(e)) => {
                            debug!("Error while receiving WebSocket message: {e}");
                            break;
                        }
                    };
                    match parse_message(data) {
                        Ok(message) => connection.dispatch(message),
                        Err(e) => {
                            // Parse errors terminate the connection; no
                            // resynchronisation is attempted.
                            warn!("Error while parsing message, closing connection: {e}");
                            break;
                        }
                    }
                }
            }
        }
        connection.close().await;
    }

    async fn write_loop<S>(
        connection: Arc<Connection>,
        mut sink: SplitSink<WebSocketStream<S>, WsMessage>,
        mut outbox_rx: mpsc::Receiver<Message>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                maybe = outbox_rx.recv() => {
                    let Some(message) = maybe else { break };
                    let binary = message.is_binary();
                    let data = serialize_message(&message);
                    let frame = if binary {
                        WsMessage::Binary(data)
                    } else {
                        match Utf8Bytes::try_from(data) {
                            Ok(text) => WsMessage::Text(text),
                            Err(e) => {
                                warn!("Dropping non UTF-8 text message: {e}");
                                continue;
                            }
                        }
                    };
                    if let Err(e) = sink.send(frame).await {
                        debug!("Error while writing WebSocket message: {e}");
                        break;
                    }
                }
            }
        }
        let _ = sink.close().await;
        connection.close().await;
    }

    /// Routes one decoded message: responses complete their pending entry,
    /// everything else goes to the handler on its own task so a slow
    /// handler cannot stall the reader.
    fn dispatch(self: &Arc<Self>, message: Message) {
        let message = match message {
            Message::Response(response) => {
                let sender = self.pending.lock().remove(&response.seq);
                match sender {
                    Some(sender) => {
                        let _ = sender.send(response);
                    }
                    // Late responses for timed-out requests end up here.
                    None => debug!("Discarding response with unknown seq {}", response.seq),
                }
                return;
            }
            other => other,
        };
        let handler = {
            let mut slot = self.handler.lock();
            match &slot.handler {
                Some(handler) => handler.clone(),
                None => {
                    slot.early.push(message);
                    return;
                }
            }
        };
        tokio::spawn(async move { handler.handle_message(message).await });
    }
}
