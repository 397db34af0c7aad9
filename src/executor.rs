//! Request execution: send, classify, retry once on an authentication
//! challenge, validate
//!
//! The retry is a bounded loop, not recursion: the `allow_retry` latch
//! makes the at-most-two-sends invariant structural. The second send never
//! begins until the first response body has been fully drained, so a
//! half-read body is never returned to the connection pool. Dropping the
//! returned future abandons the pending send; the retry continuation can
//! never fire after the caller has given up.

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use url::Url;

use crate::auth::AuthPolicy;
use crate::config::Settings;
use crate::cookies::CookieStore;
use crate::error::CourierError;
use crate::pool::SharedClient;
use crate::request::{self, RequestTemplate};
use crate::response::{ExchangeResult, materialize};
use crate::transport::{SendOptions, TransportError, TransportErrorKind};
use crate::validation::{ResponseValidator, StatusRangeValidator};

/// Executes logical calls over a shared client.
///
/// Each attempt builds a fresh wire request from the template, so stream
/// bodies are re-read from their origin rather than resumed mid-stream.
pub struct RequestExecutor {
    client: Arc<SharedClient>,
    settings: Settings,
    validator: Arc<dyn ResponseValidator>,
    cookies: Option<Arc<dyn CookieStore>>,
    auth: Option<Arc<dyn AuthPolicy>>,
}

impl RequestExecutor {
    pub fn new(client: Arc<SharedClient>, settings: Settings) -> Result<Self, CourierError> {
        let validator = StatusRangeValidator::parse(&settings.response_status_ranges)?;
        Ok(Self {
            client,
            settings,
            validator: Arc::new(validator),
            cookies: None,
            auth: None,
        })
    }

    pub fn with_validator(mut self, validator: Arc<dyn ResponseValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_cookie_store(mut self, cookies: Arc<dyn CookieStore>) -> Self {
        self.cookies = Some(cookies);
        self
    }

    pub fn with_auth(mut self, auth: Arc<dyn AuthPolicy>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Executes a logical call: at most two physical sends, strictly
    /// ordered.
    ///
    /// # Errors
    /// Transport failures are classified as timeout or connectivity
    /// errors; a response rejected by the validator becomes a validation
    /// error that still carries the materialized result.
    #[instrument(skip(self, template), fields(method = %template.method()))]
    pub async fn execute(&self, template: &RequestTemplate) -> Result<ExchangeResult, CourierError> {
        let mut allow_retry = true;
        loop {
            let mut request =
                request::build(template, &self.settings, self.cookies.as_deref()).await?;

            if let Some(auth) = &self.auth {
                auth.prepare(&mut request.headers)
                    .await
                    .map_err(|e| match e {
                        already @ CourierError::Security(_) => already,
                        other => CourierError::security(other.to_string()),
                    })?;
            }

            let options = SendOptions {
                timeout: Duration::from_secs(self.settings.http_timeout_seconds),
                follow_redirects: self.settings.follow_redirects,
                authentication: self
                    .auth
                    .as_ref()
                    .and_then(|auth| auth.credentials().resolve()),
            };

            let url = request.url.clone();
            let response = match self.client.send(request, options).await {
                Ok(response) => response,
                Err(e) => return Err(self.classify_transport_failure(&url, e)),
            };

            let mut result = materialize(
                response,
                &url,
                self.cookies.as_deref(),
                self.settings.media_type_mode,
            )
            .await?;

            if allow_retry
                && let Some(auth) = &self.auth
                && auth.should_retry(&result)
            {
                info!(
                    "authentication challenge ({}) from {url}; draining and retrying once",
                    result.status()
                );
                // Free the pooled connection before the second send
                result.drain().await;
                allow_retry = false;
                continue;
            }

            if !self.validator.is_acceptable(result.status()) {
                let status = result.status().as_u16();
                warn!(
                    "response status {status} from {url} rejected by validator ({})",
                    self.validator.expectation()
                );
                return Err(CourierError::validation(
                    status,
                    self.validator.expectation(),
                    result,
                ));
            }

            return Ok(result);
        }
    }

    /// Maps a transport failure onto the error taxonomy. An HTTPS peer
    /// closing the connection abruptly usually means a TLS version or
    /// cipher suite mismatch; surface that hint.
    fn classify_transport_failure(&self, url: &Url, e: TransportError) -> CourierError {
        match e.kind {
            TransportErrorKind::Timeout => {
                error!("request to {url} timed out: {e}");
                CourierError::timeout(url.as_str(), self.settings.http_timeout_seconds * 1000)
            }
            TransportErrorKind::Connect | TransportErrorKind::Other => {
                if url.scheme() == "https" && looks_like_peer_closed(&e.message) {
                    warn!(
                        "remote peer closed the https connection; verify that the server \
                         supports the negotiated TLS version and cipher suites"
                    );
                }
                error!("request to {url} failed: {e}");
                CourierError::connectivity(url.as_str(), e.message)
            }
        }
    }
}

fn looks_like_peer_closed(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    ["connection closed", "connection reset", "broken pipe", "closed by peer"]
        .iter()
        .any(|needle| message.contains(needle))
}
