// src/client/mod.rs

//! The client side of the protocol: a thin, typed wrapper around a
//! [`Connection`] that performs the version handshake and exposes one
//! method per request type.

use crate::config::DEFAULT_REQUEST_TIMEOUT_SECS;
use crate::connection::bootstrap::{AuthenticationPayload, NegotiationPayload, RegistrationPayload};
use crate::connection::{Connection, MessageHandler};
use crate::core::FospError;
use crate::core::protocol::{Message, Method, Notification, Request, Response, Status};
use crate::core::url::Url;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Receives server-pushed messages and feeds notifications into the
/// channel handed out by [`Client::take_notifications`].
struct ClientHandler {
    notifications: mpsc::UnboundedSender<Notification>,
}

#[async_trait]
impl MessageHandler for ClientHandler {
    async fn handle_message(&self, message: Message) {
        match message {
            Message::Notification(notification) => {
                let _ = self.notifications.send(notification);
            }
            other => debug!("Ignoring unexpected {other} from the server"),
        }
    }
}

/// A negotiated connection to a FOSP server.
pub struct Client {
    connection: Arc<Connection>,
    notifications: Mutex<Option<mpsc::UnboundedReceiver<Notification>>>,
}

impl Client {
    /// Connects to `host`, which may be a bare host name, `host:port`, or a
    /// full `ws://` URL, and negotiates the protocol version.
    pub async fn open(host: &str) -> Result<Client, FospError> {
        let url = if host.contains("://") {
            host.to_string()
        } else if host.contains(':') {
            format!("ws://{host}")
        } else {
            format!("ws://{host}:1337")
        };
        let (ws, _) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| FospError::Gateway(format!("failed to connect to {url}: {e}")))?;
        let connection =
            Connection::spawn(ws, Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS));

        let (tx, rx) = mpsc::unbounded_channel();
        connection.set_message_handler(Arc::new(ClientHandler { notifications: tx }));

        let client = Client {
            connection,
            notifications: Mutex::new(Some(rx)),
        };
        let response = client
            .send(
                Method::Connect,
                None,
                serde_json::to_vec(&NegotiationPayload::current())?,
            )
            .await?;
        if response.status != Status::Succeeded {
            client.close().await;
            return Err(FospError::UnsupportedVersion);
        }
        Ok(client)
    }

    /// The stream of notifications pushed by the server. Each notification
    /// is delivered once; the receiver can only be taken once.
    pub fn take_notifications(&self) -> Option<mpsc::UnboundedReceiver<Notification>> {
        self.notifications.lock().take()
    }

    /// Registers a new user on the connected server.
    pub async fn register(&self, name: &str, password: &str) -> Result<Response, FospError> {
        let payload = RegistrationPayload {
            name: name.to_string(),
            password: password.to_string(),
        };
        self.send(Method::Register, None, serde_json::to_vec(&payload)?)
            .await
    }

    /// Authenticates as a local user with SASL PLAIN.
    pub async fn authenticate(&self, name: &str, password: &str) -> Result<Response, FospError> {
        let payload = AuthenticationPayload::user(name, password);
        self.send(Method::Auth, None, serde_json::to_vec(&payload)?)
            .await
    }

    pub async fn get(&self, url: &Url) -> Result<Response, FospError> {
        self.send(Method::Get, Some(url.clone()), Vec::new()).await
    }

    pub async fn list(&self, url: &Url) -> Result<Response, FospError> {
        self.send(Method::List, Some(url.clone()), Vec::new()).await
    }

    /// Creates an object; `body` is its JSON representation and may be
    /// empty.
    pub async fn create(&self, url: &Url, body: impl Into<Bytes>) -> Result<Response, FospError> {
        self.send(Method::Create, Some(url.clone()), body).await
    }

    /// Patches an object; `body` is the JSON patch.
    pub async fn patch(&self, url: &Url, body: impl Into<Bytes>) -> Result<Response, FospError> {
        self.send(Method::Patch, Some(url.clone()), body).await
    }

    pub async fn delete(&self, url: &Url) -> Result<Response, FospError> {
        self.send(Method::Delete, Some(url.clone()), Vec::new())
            .await
    }

    /// Reads the attachment of an object; the response body carries the
    /// raw bytes.
    pub async fn read(&self, url: &Url) -> Result<Response, FospError> {
        self.send(Method::Read, Some(url.clone()), Vec::new()).await
    }

    /// Writes the attachment of an object.
    pub async fn write(&self, url: &Url, data: impl Into<Bytes>) -> Result<Response, FospError> {
        self.send(Method::Write, Some(url.clone()), data).await
    }

    pub async fn close(&self) {
        self.connection.close().await;
    }

    async fn send(
        &self,
        method: Method,
        url: Option<Url>,
        body: impl Into<Bytes>,
    ) -> Result<Response, FospError> {
        let request = Request::new(method, url).with_body(body);
        self.connection.send_request(request).await
    }
}
