// src/connection/bootstrap.rs

//! The connection bootstrap: version negotiation, user registration and
//! peer authentication, driven by the Opened → Negotiated → Authenticated
//! state machine.

use super::server::{ConnState, ServerConnection};
use crate::core::FospError;
use crate::core::protocol::{Message, Method, PROTOCOL_VERSION, Request, Response, status};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use tracing::{debug, info, warn};

/// The body of a CONNECT request.
#[derive(Debug, Serialize, Deserialize)]
pub struct NegotiationPayload {
    pub version: String,
}

impl NegotiationPayload {
    pub fn current() -> NegotiationPayload {
        NegotiationPayload {
            version: PROTOCOL_VERSION.to_string(),
        }
    }
}

/// The body of a REGISTER request.
#[derive(Debug, Serialize, Deserialize)]
pub struct RegistrationPayload {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub password: String,
}

/// The body of an AUTH request, for both user and server authentication.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthenticationPayload {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sasl: Option<SaslPayload>,
}

/// The SASL sub-object of a user AUTH request. Only the PLAIN mechanism
/// with an initial response is supported.
#[derive(Debug, Serialize, Deserialize)]
pub struct SaslPayload {
    #[serde(default)]
    pub mechanism: String,
    #[serde(default, rename = "initial-response", skip_serializing_if = "Option::is_none")]
    pub initial_response: Option<String>,
}

impl AuthenticationPayload {
    pub fn server(domain: &str) -> AuthenticationPayload {
        AuthenticationPayload {
            kind: "server".to_string(),
            domain: Some(domain.to_string()),
            sasl: None,
        }
    }

    /// A user authentication payload carrying a SASL PLAIN initial
    /// response with an empty authorization identity.
    pub fn user(name: &str, password: &str) -> AuthenticationPayload {
        AuthenticationPayload {
            kind: "user".to_string(),
            domain: None,
            sasl: Some(SaslPayload {
                mechanism: "PLAIN".to_string(),
                initial_response: Some(format!("\0{name}\0{password}")),
            }),
        }
    }
}

impl ServerConnection {
    /// Handles a request on a connection that has not finished
    /// bootstrapping. Failures are answered with FAILED responses; the
    /// connection stays open.
    pub(super) async fn bootstrap(&self, request: Request) {
        debug!("Bootstrapping connection: {} request", request.method);
        let result = match self.conn_state() {
            ConnState::Opened => self.negotiate(&request).await,
            ConnState::Negotiated => match request.method {
                Method::Register => self.register(&request).await,
                Method::Auth => self.authenticate(&request).await,
                Method::Options => self.options(&request),
                _ => Err(FospError::InvalidState),
            },
            _ => Err(FospError::InvalidState),
        };
        let response =
            result.unwrap_or_else(|e| request.failed(e.status_code(), &e.to_string()));
        if self
            .connection()
            .enqueue(Message::Response(response))
            .await
            .is_err()
        {
            warn!("Connection closed before the bootstrap response was sent");
        }
    }

    /// Answers an OPTIONS request with the protocol versions we speak.
    pub(super) fn options(&self, request: &Request) -> Result<Response, FospError> {
        let body = serde_json::to_vec(&NegotiationPayload::current())?;
        Ok(request.succeeded_with_body(status::OK, body))
    }

    async fn negotiate(&self, request: &Request) -> Result<Response, FospError> {
        match request.method {
            Method::Connect => {}
            Method::Options => return self.options(request),
            _ => return Err(FospError::InvalidState),
        }
        let payload: NegotiationPayload = serde_json::from_slice(&request.body)?;
        if payload.version != PROTOCOL_VERSION {
            return Err(FospError::UnsupportedVersion);
        }
        self.set_conn_state(ConnState::Negotiated);
        Ok(request.succeeded(status::OK))
    }

    /// Creates a new user and its root object. Registration does not log
    /// the connection in; the client authenticates afterwards.
    async fn register(&self, request: &Request) -> Result<Response, FospError> {
        let payload: RegistrationPayload = serde_json::from_slice(&request.body)?;
        if payload.name.is_empty() || payload.password.is_empty() {
            return Err(FospError::CredentialsMissing);
        }
        if payload.name.contains('@') || payload.name.contains('/') {
            return Err(FospError::BadRequest(format!(
                "invalid user name \"{}\"",
                payload.name
            )));
        }
        self.state()
            .database
            .register(&payload.name, &payload.password)
            .await?;
        info!("Registered new user {}", payload.name);
        Ok(request.succeeded(status::CREATED))
    }

    async fn authenticate(&self, request: &Request) -> Result<Response, FospError> {
        let payload: AuthenticationPayload = serde_json::from_slice(&request.body)?;
        match payload.kind.as_str() {
            "user" => self.authenticate_user(request, payload).await,
            "server" => self.authenticate_server(request, payload).await,
            other => Err(FospError::BadRequest(format!(
                "unknown authentication type \"{other}\""
            ))),
        }
    }

    /// SASL PLAIN user authentication. The authorization identity must be
    /// empty or equal to the authentication identity.
    async fn authenticate_user(
        &self,
        request: &Request,
        payload: AuthenticationPayload,
    ) -> Result<Response, FospError> {
        let sasl = payload.sasl.ok_or(FospError::CredentialsMissing)?;
        if !sasl.mechanism.eq_ignore_ascii_case("PLAIN") {
            return Err(FospError::BadRequest(format!(
                "unsupported SASL mechanism \"{}\"",
                sasl.mechanism
            )));
        }
        let initial_response = sasl.initial_response.ok_or(FospError::CredentialsMissing)?;
        let parts: Vec<&str> = initial_response.split('\0').collect();
        let &[authzid, authcid, password] = parts.as_slice() else {
            return Err(FospError::BadRequest(
                "SASL PLAIN response must have three parts".to_string(),
            ));
        };
        if !authzid.is_empty() && authzid != authcid {
            return Err(FospError::AuthenticationFailed);
        }
        if authcid.is_empty() || password.is_empty() {
            return Err(FospError::CredentialsMissing);
        }
        debug!("Authenticating user {authcid}");
        if !self.state().database.authenticate(authcid, password).await {
            return Err(FospError::AuthenticationFailed);
        }
        self.promote_to_user(authcid).await;
        info!("Connection authenticated for user {authcid}");
        Ok(request.succeeded(status::OK))
    }

    /// Peer server authentication: the claimed domain must appear among the
    /// names the peer address reverse-resolves to.
    async fn authenticate_server(
        &self,
        request: &Request,
        payload: AuthenticationPayload,
    ) -> Result<Response, FospError> {
        let Some(domain) = payload.domain else {
            return Err(FospError::BadRequest(
                "server authentication without a domain".to_string(),
            ));
        };
        let Some(peer_addr) = self.peer_addr() else {
            return Err(FospError::NotAuthorized);
        };
        if !self.reverse_lookup_matches(peer_addr.ip(), &domain).await {
            warn!(
                "Reverse lookup of {} did not match claimed domain {domain}",
                peer_addr.ip()
            );
            return Err(FospError::NotAuthorized);
        }
        self.promote_to_server(&domain).await;
        info!("Connection authenticated for peer server {domain}");
        Ok(request.succeeded(status::OK))
    }

    async fn reverse_lookup_matches(&self, ip: IpAddr, domain: &str) -> bool {
        let Some(resolver) = self.state().resolver.as_ref() else {
            warn!("No DNS resolver available, rejecting server authentication");
            return false;
        };
        let names = match resolver.reverse_lookup(ip).await {
            Ok(names) => names,
            Err(e) => {
                warn!("Reverse lookup of {ip} failed: {e}");
                return false;
            }
        };
        let dotted = format!("{domain}.");
        names.iter().any(|ptr| {
            let name = ptr.0.to_utf8();
            name.eq_ignore_ascii_case(domain) || name.eq_ignore_ascii_case(&dotted)
        })
    }
}
