//! The wire transport contract and its reqwest-backed default
//!
//! The engine treats the transport as an opaque collaborator: it can be
//! started and stopped, and it turns a built request into a wire response.
//! Connection establishment, TLS and socket I/O all live behind this
//! boundary.

use async_trait::async_trait;
use futures::StreamExt;
use http::header::HeaderMap;
use http::StatusCode;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use crate::constants::MAX_REDIRECT_HOPS;
use crate::entity::{ByteStream, WireEntity};
use crate::request::LogicalRequest;

/// What went wrong at the transport boundary. The executor maps these
/// onto the caller-facing error taxonomy with request context attached.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The response wait exceeded the configured bound
    Timeout,
    /// The connection could not be established
    Connect,
    /// Anything else: protocol violations, mid-stream failures
    Other,
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Other, message)
    }
}

/// Credentials in the only shape the transport understands
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedAuth {
    pub username: String,
    pub password: Option<String>,
}

impl fmt::Debug for ResolvedAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never leak the password into logs
        f.debug_struct("ResolvedAuth")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Per-send options forwarded to the transport.
///
/// `follow_redirects` is an override of the transport's own default; a
/// delegate that only supports the base option form cannot honor it.
#[derive(Clone, Debug)]
pub struct SendOptions {
    pub timeout: Duration,
    pub follow_redirects: Option<bool>,
    pub authentication: Option<ResolvedAuth>,
}

impl SendOptions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            follow_redirects: None,
            authentication: None,
        }
    }
}

/// How much of [`SendOptions`] a delegate can honor, feature-detected once
/// when the delegate is wrapped in a shared client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptionsSupport {
    /// All of `SendOptions`, including per-request redirect overrides
    Extended,
    /// The base form only: timeout and authentication
    Base,
}

/// A received wire response, body unconsumed
pub struct WireResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ByteStream,
    pub length: Option<u64>,
}

impl fmt::Debug for WireResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WireResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

/// The opaque transport client contract
#[async_trait]
pub trait Transport: Send + Sync {
    /// Physically start the client (allocate the connection pool)
    async fn start(&self) -> Result<(), TransportError>;

    /// Physically stop the client and release its resources
    async fn stop(&self) -> Result<(), TransportError>;

    /// Which option form this delegate honors
    fn options_support(&self) -> OptionsSupport {
        OptionsSupport::Extended
    }

    async fn send(
        &self,
        request: LogicalRequest,
        options: &SendOptions,
    ) -> Result<WireResponse, TransportError>;
}

/// Production transport backed by a reqwest client with connection
/// pooling.
///
/// The redirect policy is fixed at client construction, so per-request
/// redirect overrides cannot be honored: this delegate reports
/// [`OptionsSupport::Base`].
pub struct ReqwestTransport {
    timeout: Duration,
    pool_max_idle_per_host: usize,
    follow_redirects: bool,
    client: RwLock<Option<reqwest::Client>>,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration, pool_max_idle_per_host: usize, follow_redirects: bool) -> Self {
        Self {
            timeout,
            pool_max_idle_per_host,
            follow_redirects,
            client: RwLock::new(None),
        }
    }

    fn build_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        let redirect_policy = if self.follow_redirects {
            reqwest::redirect::Policy::limited(MAX_REDIRECT_HOPS)
        } else {
            reqwest::redirect::Policy::none()
        };
        reqwest::Client::builder()
            .timeout(self.timeout)
            .pool_max_idle_per_host(self.pool_max_idle_per_host)
            .redirect(redirect_policy)
            .build()
    }
}

fn classify_reqwest_error(error: reqwest::Error) -> TransportError {
    let kind = if error.is_timeout() {
        TransportErrorKind::Timeout
    } else if error.is_connect() {
        TransportErrorKind::Connect
    } else {
        TransportErrorKind::Other
    };
    TransportError::new(kind, error.to_string())
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn start(&self) -> Result<(), TransportError> {
        let mut guard = self.client.write().await;
        if guard.is_none() {
            debug!("building reqwest client pool");
            *guard = Some(self.build_client().map_err(|e| {
                TransportError::new(TransportErrorKind::Connect, e.to_string())
            })?);
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        debug!("releasing reqwest client pool");
        *self.client.write().await = None;
        Ok(())
    }

    fn options_support(&self) -> OptionsSupport {
        OptionsSupport::Base
    }

    async fn send(
        &self,
        request: LogicalRequest,
        options: &SendOptions,
    ) -> Result<WireResponse, TransportError> {
        let client = self
            .client
            .read()
            .await
            .clone()
            .ok_or_else(|| TransportError::other("transport has not been started"))?;

        let mut builder = client
            .request(request.method, request.url)
            .headers(request.headers)
            .timeout(options.timeout);

        if let Some(auth) = &options.authentication {
            builder = builder.basic_auth(&auth.username, auth.password.as_deref());
        }

        builder = match request.entity {
            WireEntity::Empty => builder,
            WireEntity::Buffered(data) => builder.body(data),
            WireEntity::Streamed { stream, .. } => builder.body(reqwest::Body::wrap_stream(stream)),
        };

        let response = builder.send().await.map_err(classify_reqwest_error)?;

        let status = response.status();
        let headers = response.headers().clone();
        let length = response.content_length();
        let body: ByteStream = Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(std::io::Error::other)),
        );

        Ok(WireResponse {
            status,
            headers,
            body,
            length,
        })
    }
}

/// A started wire response with a fixed in-memory body, for tests
#[cfg(test)]
pub(crate) fn canned_response(status: u16, body: &'static [u8]) -> WireResponse {
    let data = bytes::Bytes::from_static(body);
    WireResponse {
        status: StatusCode::from_u16(status).expect("valid status"),
        headers: HeaderMap::new(),
        length: Some(data.len() as u64),
        body: Box::pin(futures::stream::once(async move { Ok(data) })),
    }
}
