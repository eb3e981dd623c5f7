//! HTTP adapters for the auth and remote ports.
//!
//! The actual HTTP client is abstracted via [`HttpClient`] so the engine does
//! not pick an HTTP library. Bodies are JSON in both directions.

use crate::error::{SyncError, SyncResult};
use crate::ports::{AuthPort, IssuedToken, RemotePort};
use odontosync_protocol::{ControlType, Credentials, EntityKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// TTL assumed when a token response omits `expires_in`.
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;

/// Default header carrying the secondary token.
pub const DEFAULT_SECONDARY_HEADER: &str = "X-Domain-Token";

/// Longest response excerpt copied into an error message.
const ERROR_BODY_EXCERPT: usize = 512;

/// HTTP methods used by the adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
}

impl HttpMethod {
    /// Returns the method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// An outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Method.
    pub method: HttpMethod,
    /// Absolute URL.
    pub url: String,
    /// Header name/value pairs.
    pub headers: Vec<(String, String)>,
    /// JSON body.
    pub body: String,
}

impl HttpRequest {
    /// Creates a JSON request.
    pub fn json(method: HttpMethod, url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: body.into(),
        }
    }

    /// Adds a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Returns the first header with the given name.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A received response, whatever its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Body as text.
    pub body: String,
}

impl HttpResponse {
    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client abstraction.
///
/// Implementations return `Ok` for every response that arrived, including
/// 4xx/5xx, and `Err` only when no response was received.
pub trait HttpClient: Send + Sync {
    /// Sends a request and waits for the response.
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, String>;
}

impl<C: HttpClient + ?Sized> HttpClient for Arc<C> {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, String> {
        (**self).send(request)
    }
}

fn excerpt(body: &str) -> &str {
    match body.char_indices().nth(ERROR_BODY_EXCERPT) {
        Some((at, _)) => &body[..at],
        None => body,
    }
}

/// Where and how to obtain the two tokens.
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthEndpoints {
    /// URL issuing primary tokens (client credentials grant).
    pub token_url: String,
    /// URL exchanging a primary token for a secondary one.
    pub exchange_url: String,
    /// OAuth client id.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
    /// Domain login presented to the exchange.
    pub login: String,
    /// Domain password presented to the exchange.
    pub password: String,
}

impl fmt::Debug for AuthEndpoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthEndpoints")
            .field("token_url", &self.token_url)
            .field("exchange_url", &self.exchange_url)
            .field("client_id", &self.client_id)
            .field("login", &self.login)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct ClientCredentialsGrant<'a> {
    grant_type: &'static str,
    client_id: &'a str,
    client_secret: &'a str,
}

#[derive(Serialize)]
struct ExchangeRequest<'a> {
    login: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(alias = "token")]
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    DEFAULT_TOKEN_TTL_SECS
}

/// [`AuthPort`] over HTTP.
pub struct HttpAuthPort<C: HttpClient> {
    endpoints: AuthEndpoints,
    client: C,
}

impl<C: HttpClient> HttpAuthPort<C> {
    /// Creates an auth port.
    pub fn new(endpoints: AuthEndpoints, client: C) -> Self {
        Self { endpoints, client }
    }

    /// Returns the configured endpoints.
    pub fn endpoints(&self) -> &AuthEndpoints {
        &self.endpoints
    }

    fn request_token(&self, request: &HttpRequest, what: &str) -> SyncResult<IssuedToken> {
        let response = self
            .client
            .send(request)
            .map_err(|e| SyncError::authentication(format!("{what} request failed: {e}")))?;
        if !response.is_success() {
            return Err(SyncError::authentication(format!(
                "{what} rejected with HTTP {}: {}",
                response.status,
                excerpt(&response.body)
            ))
            .with_context(crate::error::CONTEXT_HTTP_STATUS, response.status.to_string()));
        }

        let token: TokenResponse = serde_json::from_str(&response.body).map_err(|e| {
            SyncError::authentication(format!("{what} response is not a token: {e}"))
        })?;
        Ok(IssuedToken::new(
            token.access_token,
            Duration::from_secs(token.expires_in),
        ))
    }
}

impl<C: HttpClient> AuthPort for HttpAuthPort<C> {
    fn fetch_primary_token(&self) -> SyncResult<IssuedToken> {
        let body = serde_json::to_string(&ClientCredentialsGrant {
            grant_type: "client_credentials",
            client_id: &self.endpoints.client_id,
            client_secret: &self.endpoints.client_secret,
        })?;
        let request = HttpRequest::json(HttpMethod::Post, &self.endpoints.token_url, body);
        self.request_token(&request, "primary token")
    }

    fn exchange_secondary_token(&self, primary: &str) -> SyncResult<IssuedToken> {
        let body = serde_json::to_string(&ExchangeRequest {
            login: &self.endpoints.login,
            password: &self.endpoints.password,
        })?;
        let request = HttpRequest::json(HttpMethod::Post, &self.endpoints.exchange_url, body)
            .header("Authorization", format!("Bearer {primary}"));
        self.request_token(&request, "token exchange")
    }
}

/// Method and path of one remote operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRoute {
    /// Method.
    pub method: HttpMethod,
    /// Path appended to the base URL.
    pub path: String,
}

impl RemoteRoute {
    /// Creates a route.
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
        }
    }
}

/// The insurer's write endpoints for one entity kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpEndpoints {
    /// Base URL, without trailing slash.
    pub base_url: String,
    /// Header that carries the secondary token.
    #[serde(default = "default_secondary_header")]
    pub secondary_header: String,
    /// Route per control type.
    pub routes: BTreeMap<ControlType, RemoteRoute>,
}

fn default_secondary_header() -> String {
    DEFAULT_SECONDARY_HEADER.to_string()
}

impl HttpEndpoints {
    /// Creates endpoints with the conventional routes of an entity kind.
    pub fn for_entity(entity: EntityKind, base_url: impl Into<String>) -> Self {
        let resource = match entity {
            EntityKind::Company => "/companies",
            EntityKind::Beneficiary => "/beneficiaries",
        };
        let routes = [
            (ControlType::Addition, RemoteRoute::new(HttpMethod::Post, resource)),
            (ControlType::Alteration, RemoteRoute::new(HttpMethod::Put, resource)),
            (
                ControlType::Exclusion,
                RemoteRoute::new(HttpMethod::Post, format!("{resource}/inactivate")),
            ),
        ]
        .into_iter()
        .collect();
        Self {
            base_url: base_url.into(),
            secondary_header: default_secondary_header(),
            routes,
        }
    }

    /// Overrides one route.
    pub fn with_route(mut self, kind: ControlType, route: RemoteRoute) -> Self {
        self.routes.insert(kind, route);
        self
    }

    /// Resolves the method and URL of a control type.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no route is configured.
    pub fn resolve(&self, kind: ControlType) -> SyncResult<(HttpMethod, String)> {
        let route = self
            .routes
            .get(&kind)
            .ok_or_else(|| SyncError::config(format!("no remote route for {kind}")))?;
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), route.path);
        Ok((route.method, url))
    }
}

/// [`RemotePort`] over HTTP.
pub struct HttpRemotePort<C: HttpClient> {
    endpoints: HttpEndpoints,
    client: C,
}

impl<C: HttpClient> HttpRemotePort<C> {
    /// Creates a remote port.
    pub fn new(endpoints: HttpEndpoints, client: C) -> Self {
        Self { endpoints, client }
    }

    /// Returns the configured endpoints.
    pub fn endpoints(&self) -> &HttpEndpoints {
        &self.endpoints
    }
}

impl<C: HttpClient> RemotePort for HttpRemotePort<C> {
    fn submit(
        &self,
        kind: ControlType,
        payload: &str,
        credentials: &Credentials,
    ) -> SyncResult<String> {
        let (method, url) = self.endpoints.resolve(kind)?;
        let request = HttpRequest::json(method, url, payload)
            .header("Authorization", format!("Bearer {}", credentials.primary))
            .header(&self.endpoints.secondary_header, &credentials.secondary);

        let response = self
            .client
            .send(&request)
            .map_err(|e| SyncError::remote(format!("{kind} request failed: {e}")))?;
        if response.is_success() {
            Ok(response.body)
        } else {
            Err(SyncError::remote_status(
                response.status,
                format!(
                    "{kind} rejected with HTTP {}: {}",
                    response.status,
                    excerpt(&response.body)
                ),
            ))
        }
    }
}
