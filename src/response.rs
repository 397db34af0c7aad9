//! Response materialization: wire response to structured result
//!
//! Resolves the media type, captures cookies into the store and exposes
//! the body as a lazy, single-pass stream whose consumption is decoupled
//! from validation.

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use http::StatusCode;
use http::header::{CONTENT_TYPE, HeaderMap, HeaderName, SET_COOKIE};
use mime::Mime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};
use url::Url;

use crate::cookies::CookieStore;
use crate::entity::ByteStream;
use crate::error::CourierError;
use crate::transport::WireResponse;

/// How to treat a malformed `Content-Type` header
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaTypeMode {
    /// A malformed media type fails the exchange
    Strict,
    /// A malformed media type falls back to the default with a logged
    /// warning
    #[default]
    Lenient,
}

/// Response metadata: status line and headers
#[derive(Clone, Debug)]
pub struct ResponseAttributes {
    pub status: StatusCode,
    pub reason: String,
    pub headers: HeaderMap,
}

/// The structured result of an exchange.
///
/// The body is a lazy, single-pass, non-restartable stream; consuming it
/// is the caller's responsibility.
pub struct ExchangeResult {
    pub media_type: Mime,
    pub attributes: ResponseAttributes,
    pub length: Option<u64>,
    body: Option<ByteStream>,
}

impl ExchangeResult {
    pub fn status(&self) -> StatusCode {
        self.attributes.status
    }

    /// The charset of the resolved media type
    pub fn charset(&self) -> String {
        self.media_type
            .get_param(mime::CHARSET)
            .map(|c| c.as_str().to_string())
            .unwrap_or_else(|| "utf-8".to_string())
    }

    /// Takes ownership of the body stream. Subsequent calls return `None`.
    pub fn take_body(&mut self) -> Option<ByteStream> {
        self.body.take()
    }

    /// Consumes the body into memory. The stream is single-pass: a second
    /// call is an error.
    pub async fn bytes(&mut self) -> Result<Bytes, CourierError> {
        let Some(mut stream) = self.body.take() else {
            return Err(CourierError::configuration(
                "response body has already been consumed",
            ));
        };
        let mut buf = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    /// Consumes the body and decodes it as text
    pub async fn text(&mut self) -> Result<String, CourierError> {
        let data = self.bytes().await?;
        Ok(String::from_utf8_lossy(&data).into_owned())
    }

    /// Discards the body so the underlying connection can be reused.
    /// Read failures while draining are irrelevant and ignored.
    pub(crate) async fn drain(&mut self) {
        if let Some(mut stream) = self.body.take() {
            while let Some(chunk) = stream.next().await {
                if chunk.is_err() {
                    break;
                }
            }
        }
    }

    /// A bodyless result for unit tests
    #[cfg(test)]
    pub(crate) fn empty_for_tests(status: u16) -> Self {
        let status = StatusCode::from_u16(status).expect("valid status");
        Self {
            media_type: mime::APPLICATION_OCTET_STREAM,
            attributes: ResponseAttributes {
                status,
                reason: status
                    .canonical_reason()
                    .unwrap_or("Unknown")
                    .to_string(),
                headers: HeaderMap::new(),
            },
            length: Some(0),
            body: Some(Box::pin(futures::stream::empty())),
        }
    }
}

impl fmt::Debug for ExchangeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeResult")
            .field("media_type", &self.media_type.as_ref())
            .field("status", &self.attributes.status)
            .field("length", &self.length)
            .field("body_consumed", &self.body.is_none())
            .finish_non_exhaustive()
    }
}

/// Converts a wire response into a structured result.
///
/// Cookie capture is best-effort: store failures are logged and never
/// fail the exchange.
pub async fn materialize(
    response: WireResponse,
    request_url: &Url,
    cookies: Option<&dyn CookieStore>,
    mode: MediaTypeMode,
) -> Result<ExchangeResult, CourierError> {
    let WireResponse {
        status,
        headers,
        body,
        length,
    } = response;

    let media_type = resolve_media_type(&headers, length, mode)?;

    if let Some(store) = cookies {
        capture_cookies(store, request_url, &headers).await;
    }

    let reason = status.canonical_reason().unwrap_or("Unknown").to_string();
    debug!("materialized response: {status} ({reason}), media type {media_type}");

    Ok(ExchangeResult {
        media_type,
        attributes: ResponseAttributes {
            status,
            reason,
            headers,
        },
        length,
        body: Some(body),
    })
}

/// Resolves the response media type from `Content-Type`, defaulting to
/// `application/octet-stream` when absent, and applying the platform
/// default charset when none is declared.
fn resolve_media_type(
    headers: &HeaderMap,
    length: Option<u64>,
    mode: MediaTypeMode,
) -> Result<Mime, CourierError> {
    let raw = headers.get(CONTENT_TYPE).map(|v| v.to_str());
    let parsed = match raw {
        None => {
            if length != Some(0) {
                debug!("no Content-Type on a non-empty entity; defaulting to application/octet-stream");
            }
            mime::APPLICATION_OCTET_STREAM
        }
        Some(value) => {
            let text = value.map_err(|e| CourierError::media_type(e.to_string()));
            match text.and_then(|t| {
                t.parse::<Mime>()
                    .map_err(|e| CourierError::media_type(format!("'{t}': {e}")))
            }) {
                Ok(mime) => mime,
                Err(e) => match mode {
                    MediaTypeMode::Strict => return Err(e),
                    MediaTypeMode::Lenient => {
                        warn!("{e}; falling back to application/octet-stream with default charset");
                        mime::APPLICATION_OCTET_STREAM
                    }
                },
            }
        }
    };
    Ok(with_default_charset(&parsed))
}

fn with_default_charset(media_type: &Mime) -> Mime {
    if media_type.get_param(mime::CHARSET).is_some() {
        return media_type.clone();
    }
    format!("{media_type}; charset=utf-8")
        .parse()
        .unwrap_or_else(|_| media_type.clone())
}

/// Persists `Set-Cookie`/`Set-Cookie2` values keyed by the request URL
async fn capture_cookies(store: &dyn CookieStore, request_url: &Url, headers: &HeaderMap) {
    let set_cookie2 = HeaderName::from_static("set-cookie2");
    let mut captured: HashMap<String, Vec<String>> = HashMap::new();
    for (header, values) in [
        ("Set-Cookie", headers.get_all(SET_COOKIE)),
        ("Set-Cookie2", headers.get_all(&set_cookie2)),
    ] {
        let collected: Vec<String> = values
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(String::from)
            .collect();
        if !collected.is_empty() {
            captured.insert(header.to_string(), collected);
        }
    }
    if captured.is_empty() {
        return;
    }
    if let Err(e) = store.put(request_url, captured).await {
        warn!("Failed to persist cookies for {request_url}: {e}");
    }
}
