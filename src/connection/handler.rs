// src/connection/handler.rs

//! Request dispatch on authenticated connections: local requests go through
//! the database facade, off-domain requests of local users are forwarded to
//! the responsible peer server.

use super::server::ServerConnection;
use crate::core::FospError;
use crate::core::object::{Object, parse_patch};
use crate::core::protocol::{Message, Method, Request, Response, header, status};
use crate::core::url::Url;
use tracing::{debug, warn};

impl ServerConnection {
    pub(super) async fn handle_authenticated(&self, message: Message) {
        match message {
            Message::Request(request) => {
                let response = match self.handle_request(&request).await {
                    Ok(response) => response,
                    Err(e) => {
                        debug!("{} request {} failed: {e}", request.method, request.seq);
                        request.failed(e.status_code(), &e.to_string())
                    }
                };
                if self
                    .connection()
                    .enqueue(Message::Response(response))
                    .await
                    .is_err()
                {
                    warn!("Connection closed before the response was sent");
                }
            }
            Message::Notification(notification) => {
                self.handle_notification(notification).await;
            }
            // Responses are matched against the pending table in the
            // connection core and never get here.
            Message::Response(_) => {}
        }
    }

    /// An inbound notification from a peer server, addressed via the To
    /// header. The header is stripped before local delivery.
    async fn handle_notification(&self, mut notification: crate::core::protocol::Notification) {
        if self.remote_domain().is_none() {
            warn!("Discarding notification from a non-server connection");
            return;
        }
        let Some(addressee) = notification.headers.remove(header::TO) else {
            warn!("Discarding notification without a To header");
            return;
        };
        let state = self.state().clone();
        state
            .registry
            .route_notification(&state, &addressee, notification)
            .await;
    }

    async fn handle_request(&self, request: &Request) -> Result<Response, FospError> {
        match request.method {
            // Bootstrap methods have no business on an authenticated
            // connection.
            Method::Connect | Method::Register | Method::Auth => {
                return Err(FospError::InvalidState);
            }
            Method::Options => return self.options(request),
            _ => {}
        }

        let Some(url) = &request.url else {
            return Err(FospError::BadRequest(
                "request without a resource URL".to_string(),
            ));
        };
        let caller = self.caller_identity(request)?;

        if !url.same_domain(&self.state().config.localdomain) {
            return self.forward(&caller, request, url).await;
        }

        let database = &self.state().database;
        match request.method {
            Method::Get => {
                let view = database.get(&caller, url).await?;
                let body = serde_json::to_vec(&view)
                    .map_err(|e| FospError::Internal(format!("serializing object: {e}")))?;
                Ok(request.succeeded_with_body(status::OK, body))
            }
            Method::List => {
                let children = database.list(&caller, url).await?;
                let body = serde_json::to_vec(&children)
                    .map_err(|e| FospError::Internal(format!("serializing listing: {e}")))?;
                Ok(request.succeeded_with_body(status::OK, body))
            }
            Method::Create => {
                let object: Object = if request.body.is_empty() {
                    Object::default()
                } else {
                    serde_json::from_slice(&request.body)?
                };
                database.create(&caller, url, object).await?;
                Ok(request.succeeded(status::CREATED))
            }
            Method::Patch => {
                let patch = parse_patch(&request.body)?;
                database.patch(&caller, url, &patch).await?;
                Ok(request.succeeded(status::NO_CONTENT))
            }
            Method::Delete => {
                database.delete(&caller, url).await?;
                Ok(request.succeeded(status::NO_CONTENT))
            }
            Method::Read => {
                let data = database.read_attachment(&caller, url).await?;
                let mut response = request.succeeded_with_body(status::OK, data);
                response.binary = true;
                Ok(response)
            }
            Method::Write => {
                database
                    .write_attachment(&caller, url, request.body.clone())
                    .await?;
                Ok(request.succeeded(status::NO_CONTENT))
            }
            Method::Options | Method::Connect | Method::Register | Method::Auth => {
                Err(FospError::InvalidState)
            }
        }
    }

    /// The full identity the request acts as: the authenticated local user,
    /// or the From header supplied by an authenticated peer server.
    fn caller_identity(&self, request: &Request) -> Result<String, FospError> {
        if let Some(user) = self.local_user() {
            return Ok(format!("{user}@{}", self.state().config.localdomain));
        }
        if self.remote_domain().is_some() {
            return request
                .headers
                .get(header::FROM)
                .map(str::to_string)
                .ok_or_else(|| {
                    FospError::BadRequest("forwarded request without a From header".to_string())
                });
        }
        Err(FospError::InvalidState)
    }

    /// Forwards a request of a local user to the server of the target
    /// domain. Peer servers must not relay through us.
    async fn forward(
        &self,
        caller: &str,
        request: &Request,
        url: &Url,
    ) -> Result<Response, FospError> {
        if self.local_user().is_none() {
            return Err(FospError::BadRequest(format!(
                "not responsible for domain \"{}\"",
                url.domain()
            )));
        }
        debug!("Forwarding {} request for {caller} to {}", request.method, url.domain());
        let state = self.state().clone();
        let mut response = state
            .registry
            .forward_request(&state, caller, request.clone())
            .await?;
        // The reply is relayed verbatim, under the sequence number of the
        // original request and without the federation header.
        response.seq = request.seq;
        response.headers.remove(header::FROM);
        Ok(response)
    }
}
