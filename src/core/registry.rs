// src/core/registry.rs

//! The connection registry: the mapping from local users and remote
//! domains to their active connections, notification routing, and the
//! on-demand opening of peer server connections.

use crate::core::FospError;
use crate::core::protocol::{Message, Notification, Request, Response, header};
use crate::core::state::ServerState;
use crate::connection::ServerConnection;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Routing keys are `"<user>@"` for connections of a logged-in local user
/// and `"@<domain>"` (lower-cased) for connections to or from a peer
/// server.
pub struct Registry {
    connections: RwLock<HashMap<String, Vec<Arc<ServerConnection>>>>,
    /// One guard per remote domain so concurrent callers never dial the
    /// same peer twice; the second caller awaits the first and reuses its
    /// connection.
    dial_guards: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}

impl Registry {
    pub fn new() -> Registry {
        Registry {
            connections: RwLock::new(HashMap::new()),
            dial_guards: Mutex::new(HashMap::new()),
        }
    }

    /// Associates a connection with a routing key.
    pub async fn register(&self, key: &str, connection: Arc<ServerConnection>) {
        debug!("Registering connection under key {key}");
        self.connections
            .write()
            .await
            .entry(key.to_string())
            .or_default()
            .push(connection);
    }

    /// Removes a connection from a routing key by pointer identity. A nop
    /// when the connection was never registered.
    pub async fn deregister(&self, key: &str, connection: &ServerConnection) {
        let mut connections = self.connections.write().await;
        if let Some(list) = connections.get_mut(key) {
            list.retain(|candidate| !std::ptr::eq(Arc::as_ptr(candidate), connection));
            if list.is_empty() {
                connections.remove(key);
            }
        }
    }

    /// The number of connections currently registered under `key`.
    pub async fn connection_count(&self, key: &str) -> usize {
        self.connections
            .read()
            .await
            .get(key)
            .map_or(0, Vec::len)
    }

    /// Routes a notification to its addressee: local users get it on every
    /// registered connection, remote subscribers of local events get it via
    /// the peer server with a To header. Anything else is not our concern.
    pub async fn route_notification(
        &self,
        state: &Arc<ServerState>,
        addressee: &str,
        mut notification: Notification,
    ) {
        let Some((user_name, domain)) = addressee.split_once('@') else {
            warn!("\"{addressee}\" is not a valid user identifier");
            return;
        };
        debug!("Routing {} notification for {addressee}", notification.event);
        if domain.eq_ignore_ascii_case(&state.config.localdomain) {
            let connections = {
                let map = self.connections.read().await;
                map.get(&format!("{user_name}@")).cloned().unwrap_or_default()
            };
            for connection in connections {
                if let Err(e) = connection
                    .connection()
                    .enqueue(Message::Notification(notification.clone()))
                    .await
                {
                    debug!("Dropping notification for {addressee}: {e}");
                }
            }
        } else if notification.url.same_domain(&state.config.localdomain) {
            match self.get_or_open_remote_connection(state, domain).await {
                Ok(remote) => {
                    notification.headers.set(header::TO, addressee);
                    if let Err(e) = remote
                        .connection()
                        .enqueue(Message::Notification(notification))
                        .await
                    {
                        warn!("Dropping notification for {addressee}: {e}");
                    }
                }
                Err(e) => warn!("Dropping notification for {addressee}: {e}"),
            }
        } else {
            debug!("Dropping notification for {addressee}: not our concern");
        }
    }

    /// Sends a request of a local user to the server responsible for the
    /// request URL and returns the reply, stripped of the federation
    /// header.
    pub async fn forward_request(
        &self,
        state: &Arc<ServerState>,
        user: &str,
        mut request: Request,
    ) -> Result<Response, FospError> {
        let Some(url) = request.url.clone() else {
            return Err(FospError::BadRequest(
                "cannot forward a request without a URL".to_string(),
            ));
        };
        request.headers.set(header::FROM, user);
        let remote = self
            .get_or_open_remote_connection(state, url.domain())
            .await?;
        let mut response = remote
            .connection()
            .send_request(request)
            .await
            .map_err(|e| match e {
                FospError::RequestTimedOut => FospError::RequestTimedOut,
                other => FospError::Gateway(format!("forwarding failed: {other}")),
            })?;
        response.headers.remove(header::FROM);
        Ok(response)
    }

    /// Returns an existing peer connection for `domain` or opens,
    /// authenticates and registers a new one. Opening is serialised per
    /// domain.
    pub async fn get_or_open_remote_connection(
        &self,
        state: &Arc<ServerState>,
        domain: &str,
    ) -> Result<Arc<ServerConnection>, FospError> {
        let key = format!("@{}", domain.to_ascii_lowercase());
        if let Some(connection) = self.first_alive(&key).await {
            return Ok(connection);
        }

        let guard = {
            let mut guards = self.dial_guards.lock().await;
            guards
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _held = guard.lock().await;

        // Someone else may have finished dialling while we waited.
        if let Some(connection) = self.first_alive(&key).await {
            return Ok(connection);
        }
        let connection = ServerConnection::open(state, domain).await?;
        self.register(&key, connection.clone()).await;
        Ok(connection)
    }

    async fn first_alive(&self, key: &str) -> Option<Arc<ServerConnection>> {
        let connections = self.connections.read().await;
        connections
            .get(key)?
            .iter()
            .find(|connection| !connection.connection().is_closed())
            .cloned()
    }
}
