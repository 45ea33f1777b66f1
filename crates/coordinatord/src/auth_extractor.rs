//! Axum extractors that run the request authenticator against the raw
//! request before a handler ever sees it.
//!
//! Three headers are looked up together, the identity resolved, then
//! `authenticate()` checked against the already-consumed body. Because
//! HMAC verification needs the exact bytes on the wire, the extractor
//! must consume the body itself — so any handler that also needs a typed
//! JSON payload takes `AuthedJson<T>` rather than composing `Authed` with
//! axum's own `Json` extractor.

use std::net::SocketAddr;

use axum::async_trait;
use axum::extract::{ConnectInfo, FromRef, FromRequest, Request};
use axum::http::HeaderMap;
use serde::de::DeserializeOwned;

use coordinator_security::{authenticate, AuthError, RawAuthHeaders};

use crate::error::ApiError;
use crate::identity::resolve_identity;
use crate::state::AppState;

const HEADER_CLIENT_ID: &str = "x-dffmpeg-client-id";
const HEADER_TIMESTAMP: &str = "x-dffmpeg-timestamp";
const HEADER_SIGNATURE: &str = "x-dffmpeg-signature";
const HEADER_FORWARDED_FOR: &str = "x-forwarded-for";

/// An authenticated caller, with no opinion on the request body's shape.
/// Used by handlers that take no JSON payload (GET routes, bare `POST`s
/// like `/jobs/{id}/accept`).
#[derive(Debug, Clone)]
pub struct Authed(pub coordinator_security::AuthenticatedIdentity);

/// An authenticated caller plus its deserialized JSON body. The body must
/// be read once to compute the signature, so this extractor deserializes
/// it directly rather than delegating to `axum::Json`.
#[derive(Debug, Clone)]
pub struct AuthedJson<T>(pub coordinator_security::AuthenticatedIdentity, pub T);

async fn authenticate_request(
    state: &AppState,
    headers: &HeaderMap,
    connect_info: Option<&SocketAddr>,
    method: &str,
    path: &str,
    body: &[u8],
) -> Result<coordinator_security::AuthenticatedIdentity, ApiError> {
    let header_str = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let raw = RawAuthHeaders {
        client_id: header_str(HEADER_CLIENT_ID),
        timestamp: header_str(HEADER_TIMESTAMP),
        signature: header_str(HEADER_SIGNATURE),
    };
    let forwarded_for = header_str(HEADER_FORWARDED_FOR);
    let socket_peer = connect_info
        .map(|addr| addr.ip())
        .unwrap_or_else(|| std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED));

    let identity = match raw.client_id {
        Some(client_id) => resolve_identity(state, client_id).await?,
        None => None,
    };

    let trusted_proxies = state.trusted_proxies.as_slice();
    authenticate(
        raw,
        identity.as_ref(),
        socket_peer,
        forwarded_for,
        trusted_proxies,
        state.config.signature_drift_secs,
        method,
        path,
        body,
    )
    .map_err(ApiError::from)
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        ApiError::Auth(e)
    }
}

#[async_trait]
impl<S> FromRequest<S> for Authed
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let method = req.method().as_str().to_string();
        let path = req.uri().path().to_string();
        let headers = req.headers().clone();
        let connect_info = req.extensions().get::<ConnectInfo<SocketAddr>>().map(|c| c.0);
        let body = axum::body::to_bytes(req.into_body(), usize::MAX)
            .await
            .map_err(|e| ApiError::Validation(format!("failed to read request body: {e}")))?;

        let identity =
            authenticate_request(&app_state, &headers, connect_info.as_ref(), &method, &path, &body).await?;
        Ok(Authed(identity))
    }
}

#[async_trait]
impl<T, S> FromRequest<S> for AuthedJson<T>
where
    T: DeserializeOwned,
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let method = req.method().as_str().to_string();
        let path = req.uri().path().to_string();
        let headers = req.headers().clone();
        let connect_info = req.extensions().get::<ConnectInfo<SocketAddr>>().map(|c| c.0);
        let body = axum::body::to_bytes(req.into_body(), usize::MAX)
            .await
            .map_err(|e| ApiError::Validation(format!("failed to read request body: {e}")))?;

        let identity =
            authenticate_request(&app_state, &headers, connect_info.as_ref(), &method, &path, &body).await?;
        let parsed = serde_json::from_slice(&body)
            .map_err(|e| ApiError::Validation(format!("invalid request body: {e}")))?;
        Ok(AuthedJson(identity, parsed))
    }
}
