//! Entity encoding: how a logical request body becomes a wire entity
//!
//! Reconciles the declared streaming mode, the send-body mode, the payload
//! kind and any explicitly set `Content-Length`/`Transfer-Encoding` headers
//! into a single consistent wire representation.

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use futures_core::Stream;
use http::Method;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, HeaderValue, TRANSFER_ENCODING};
use mime::Mime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;
use tracing::{debug, warn};

use crate::error::CourierError;

/// A lazily-produced sequence of body chunks
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Policy controlling whether a request body is sent incrementally
/// (chunked) or fully buffered before transmission
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamingMode {
    Always,
    Never,
    #[default]
    Auto,
}

/// Policy controlling whether a request body is sent at all.
///
/// `Auto` suppresses the body for methods that are conventionally bodyless
/// (GET, HEAD, OPTIONS); `Always` forces the body out even for those;
/// `Never` suppresses it even for POST.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendBodyMode {
    Always,
    Never,
    #[default]
    Auto,
}

/// A replayable source of body chunks.
///
/// The factory is invoked once per attempt, so an authentication retry
/// re-reads the body from its origin instead of resuming a half-consumed
/// stream.
pub struct StreamSource {
    factory: Box<dyn Fn() -> ByteStream + Send + Sync>,
    length: Option<u64>,
}

impl StreamSource {
    pub fn new<F>(factory: F, length: Option<u64>) -> Self
    where
        F: Fn() -> ByteStream + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            length,
        }
    }

    /// A source that replays a fixed chunk of bytes; length is known.
    pub fn from_bytes(data: Bytes) -> Self {
        let length = data.len() as u64;
        Self::new(
            move || {
                let data = data.clone();
                Box::pin(futures::stream::once(async move { Ok(data) }))
            },
            Some(length),
        )
    }

    /// Open a fresh stream reading from the origin
    pub fn open(&self) -> ByteStream {
        (self.factory)()
    }

    pub fn known_length(&self) -> Option<u64> {
        self.length
    }
}

impl fmt::Debug for StreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSource")
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

/// The logical request body, before entity encoding
#[derive(Debug, Default)]
pub enum Payload {
    #[default]
    None,
    Bytes {
        data: Bytes,
        media_type: Option<Mime>,
    },
    Text {
        data: String,
        media_type: Option<Mime>,
    },
    Json(serde_json::Value),
    Stream {
        source: StreamSource,
        media_type: Option<Mime>,
    },
}

impl Payload {
    pub fn text(data: impl Into<String>) -> Self {
        Payload::Text {
            data: data.into(),
            media_type: None,
        }
    }

    pub fn bytes(data: impl Into<Bytes>) -> Self {
        Payload::Bytes {
            data: data.into(),
            media_type: None,
        }
    }

    pub fn json(value: serde_json::Value) -> Self {
        Payload::Json(value)
    }

    pub fn stream(source: StreamSource) -> Self {
        Payload::Stream {
            source,
            media_type: None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Payload::None)
    }

    /// The payload's media type: the declared one if set, otherwise a
    /// per-kind default. Bytes and streams default to the wildcard type,
    /// which is never written to the wire.
    pub fn media_type(&self) -> Option<Mime> {
        match self {
            Payload::None => None,
            Payload::Bytes { media_type, .. } | Payload::Stream { media_type, .. } => {
                Some(media_type.clone().unwrap_or(mime::STAR_STAR))
            }
            Payload::Text { media_type, .. } => {
                Some(media_type.clone().unwrap_or(mime::TEXT_PLAIN_UTF_8))
            }
            Payload::Json(_) => Some(mime::APPLICATION_JSON),
        }
    }

    /// Eagerly convert an in-memory payload to bytes. Streams are buffered
    /// elsewhere; calling this on a stream is a programming error kept out
    /// of the public surface.
    fn transform_to_bytes(&self) -> Result<Bytes, CourierError> {
        match self {
            Payload::None => Ok(Bytes::new()),
            Payload::Bytes { data, .. } => Ok(data.clone()),
            Payload::Text { data, .. } => Ok(Bytes::from(data.clone().into_bytes())),
            Payload::Json(value) => serde_json::to_vec(value)
                .map(Bytes::from)
                .map_err(|e| CourierError::transformation(e.to_string())),
            Payload::Stream { .. } => Err(CourierError::transformation(
                "stream payloads are encoded, not eagerly transformed",
            )),
        }
    }
}

/// The concrete encoded representation of a request body as transmitted
pub enum WireEntity {
    Empty,
    Buffered(Bytes),
    Streamed {
        stream: ByteStream,
        length: Option<u64>,
    },
}

impl WireEntity {
    /// Known byte length of the entity. `None` means the entity goes out
    /// chunked.
    pub fn len(&self) -> Option<u64> {
        match self {
            WireEntity::Empty => Some(0),
            WireEntity::Buffered(data) => Some(data.len() as u64),
            WireEntity::Streamed { length, .. } => *length,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, WireEntity::Empty)
    }
}

impl fmt::Debug for WireEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireEntity::Empty => write!(f, "Empty"),
            WireEntity::Buffered(data) => write!(f, "Buffered({} bytes)", data.len()),
            WireEntity::Streamed { length, .. } => write!(f, "Streamed(length: {length:?})"),
        }
    }
}

/// Encodes a logical body into a wire entity, sanitizing the request
/// headers so that `Content-Length` and `Transfer-Encoding: chunked` are
/// never both present.
///
/// Decision order:
/// 1. Emptiness: no payload, `SendBodyMode::Never`, or `Auto` with a
///    conventionally bodyless method yields an `Empty` entity.
/// 2. Stream payloads branch on the streaming mode.
/// 3. In-memory payloads are eagerly converted to bytes first.
pub async fn encode(
    payload: &Payload,
    method: &Method,
    streaming_mode: StreamingMode,
    send_body_mode: SendBodyMode,
    headers: &mut HeaderMap,
) -> Result<WireEntity, CourierError> {
    if body_is_empty(payload, method, send_body_mode) {
        headers.remove(CONTENT_LENGTH);
        headers.remove(TRANSFER_ENCODING);
        return Ok(WireEntity::Empty);
    }

    apply_content_type(payload, headers)?;

    match payload {
        Payload::Stream { source, .. } => encode_stream(source, streaming_mode, headers).await,
        _ => {
            let data = payload.transform_to_bytes()?;
            encode_buffered(data, streaming_mode, headers)
        }
    }
}

/// Whether the logical body resolves to an empty wire entity.
///
/// A non-`Auto` send-body mode overrides the method-based default
/// entirely: `Always` forces a body even for GET, `Never` suppresses it
/// even for POST.
fn body_is_empty(payload: &Payload, method: &Method, send_body_mode: SendBodyMode) -> bool {
    if payload.is_absent() {
        return true;
    }
    match send_body_mode {
        SendBodyMode::Never => true,
        SendBodyMode::Always => false,
        SendBodyMode::Auto => {
            *method == Method::GET || *method == Method::HEAD || *method == Method::OPTIONS
        }
    }
}

/// Adds Content-Type only when absent and the payload's media type is not
/// the wildcard.
fn apply_content_type(payload: &Payload, headers: &mut HeaderMap) -> Result<(), CourierError> {
    if headers.contains_key(CONTENT_TYPE) {
        return Ok(());
    }
    if let Some(media_type) = payload.media_type()
        && media_type != mime::STAR_STAR
    {
        let value = HeaderValue::from_str(media_type.as_ref()).map_err(http::Error::from)?;
        headers.insert(CONTENT_TYPE, value);
    }
    Ok(())
}

/// Single decision point for Content-Length vs Transfer-Encoding
/// conflicts: Content-Length wins, Transfer-Encoding is dropped.
fn resolve_length_conflict(headers: &mut HeaderMap) -> bool {
    if headers.contains_key(CONTENT_LENGTH) && headers.contains_key(TRANSFER_ENCODING) {
        warn!(
            "Both Content-Length and Transfer-Encoding are set; they cannot be sent together. \
             Keeping Content-Length and dropping Transfer-Encoding"
        );
        headers.remove(TRANSFER_ENCODING);
        true
    } else {
        false
    }
}

fn is_chunked(headers: &HeaderMap) -> bool {
    headers
        .get(TRANSFER_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"))
}

fn force_chunked(headers: &mut HeaderMap) {
    headers.remove(CONTENT_LENGTH);
    headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
}

async fn encode_stream(
    source: &StreamSource,
    streaming_mode: StreamingMode,
    headers: &mut HeaderMap,
) -> Result<WireEntity, CourierError> {
    match streaming_mode {
        StreamingMode::Always => {
            force_chunked(headers);
            Ok(WireEntity::Streamed {
                stream: source.open(),
                length: None,
            })
        }
        StreamingMode::Auto => {
            if headers.contains_key(CONTENT_LENGTH) {
                // An explicit Content-Length wins over both an explicit
                // Transfer-Encoding and the stream's own nature.
                resolve_length_conflict(headers);
                debug!("explicit Content-Length on a stream payload; buffering the body");
                let data = buffer_stream(source.open()).await?;
                return Ok(WireEntity::Buffered(data));
            }
            if is_chunked(headers) || source.known_length().is_none() {
                return Ok(WireEntity::Streamed {
                    stream: source.open(),
                    length: None,
                });
            }
            let length = source.known_length();
            if let Some(len) = length {
                headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
            }
            Ok(WireEntity::Streamed {
                stream: source.open(),
                length,
            })
        }
        StreamingMode::Never => {
            headers.remove(TRANSFER_ENCODING);
            match source.known_length() {
                Some(len) => {
                    headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
                    Ok(WireEntity::Streamed {
                        stream: source.open(),
                        length: Some(len),
                    })
                }
                None => {
                    let data = buffer_stream(source.open()).await?;
                    headers.insert(CONTENT_LENGTH, HeaderValue::from(data.len() as u64));
                    Ok(WireEntity::Buffered(data))
                }
            }
        }
    }
}

fn encode_buffered(
    data: Bytes,
    streaming_mode: StreamingMode,
    headers: &mut HeaderMap,
) -> Result<WireEntity, CourierError> {
    match streaming_mode {
        StreamingMode::Always => {
            force_chunked(headers);
            Ok(WireEntity::Streamed {
                stream: StreamSource::from_bytes(data).open(),
                length: None,
            })
        }
        StreamingMode::Never => {
            headers.remove(TRANSFER_ENCODING);
            headers.insert(CONTENT_LENGTH, HeaderValue::from(data.len() as u64));
            Ok(WireEntity::Buffered(data))
        }
        StreamingMode::Auto => {
            resolve_length_conflict(headers);
            if is_chunked(headers) {
                return Ok(WireEntity::Streamed {
                    stream: StreamSource::from_bytes(data).open(),
                    length: None,
                });
            }
            // Defer to an explicitly set Content-Length; declare our own
            // otherwise.
            if !headers.contains_key(CONTENT_LENGTH) {
                headers.insert(CONTENT_LENGTH, HeaderValue::from(data.len() as u64));
            }
            Ok(WireEntity::Buffered(data))
        }
    }
}

/// Reads a stream to completion into memory
async fn buffer_stream(mut stream: ByteStream) -> Result<Bytes, CourierError> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| CourierError::transformation(e.to_string()))?;
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunked_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers
    }

    fn stream_source(chunks: Vec<Bytes>, length: Option<u64>) -> StreamSource {
        StreamSource::new(
            move || {
                let chunks: Vec<Result<Bytes, std::io::Error>> =
                    chunks.iter().cloned().map(Ok).collect();
                Box::pin(futures::stream::iter(chunks))
            },
            length,
        )
    }

    async fn collect(entity: WireEntity) -> Bytes {
        match entity {
            WireEntity::Empty => Bytes::new(),
            WireEntity::Buffered(data) => data,
            WireEntity::Streamed { stream, .. } => buffer_stream(stream).await.unwrap(),
        }
    }

    #[tokio::test]
    async fn test_streaming_always_forces_chunked_and_strips_length() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from(11u64));

        let payload = Payload::text("hello world");
        let entity = encode(
            &payload,
            &Method::POST,
            StreamingMode::Always,
            SendBodyMode::Auto,
            &mut headers,
        )
        .await
        .unwrap();

        assert!(!headers.contains_key(CONTENT_LENGTH));
        assert_eq!(
            headers.get(TRANSFER_ENCODING).unwrap().to_str().unwrap(),
            "chunked"
        );
        assert_eq!(entity.len(), None);
        assert_eq!(collect(entity).await, Bytes::from_static(b"hello world"));
    }

    #[tokio::test]
    async fn test_streaming_always_replaces_non_chunked_transfer_encoding() {
        let mut headers = HeaderMap::new();
        headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("gzip"));

        let payload = Payload::stream(stream_source(vec![Bytes::from_static(b"abc")], Some(3)));
        encode(
            &payload,
            &Method::POST,
            StreamingMode::Always,
            SendBodyMode::Auto,
            &mut headers,
        )
        .await
        .unwrap();

        assert_eq!(
            headers.get(TRANSFER_ENCODING).unwrap().to_str().unwrap(),
            "chunked"
        );
    }

    #[tokio::test]
    async fn test_streaming_never_strips_transfer_encoding() {
        let mut headers = chunked_headers();

        let payload = Payload::text("data");
        let entity = encode(
            &payload,
            &Method::POST,
            StreamingMode::Never,
            SendBodyMode::Auto,
            &mut headers,
        )
        .await
        .unwrap();

        assert!(!headers.contains_key(TRANSFER_ENCODING));
        assert_eq!(
            headers.get(CONTENT_LENGTH).unwrap().to_str().unwrap(),
            "4"
        );
        assert!(matches!(entity, WireEntity::Buffered(_)));
    }

    #[tokio::test]
    async fn test_streaming_never_with_known_length_streams_with_content_length() {
        let mut headers = HeaderMap::new();

        let payload = Payload::stream(stream_source(vec![Bytes::from_static(b"abc"), Bytes::from_static(b"def")], Some(6)));
        let entity = encode(
            &payload,
            &Method::POST,
            StreamingMode::Never,
            SendBodyMode::Auto,
            &mut headers,
        )
        .await
        .unwrap();

        assert_eq!(headers.get(CONTENT_LENGTH).unwrap().to_str().unwrap(), "6");
        assert!(!headers.contains_key(TRANSFER_ENCODING));
        assert_eq!(entity.len(), Some(6));
        assert!(matches!(entity, WireEntity::Streamed { .. }));
    }

    #[tokio::test]
    async fn test_streaming_never_unknown_length_buffers() {
        let mut headers = HeaderMap::new();

        let payload = Payload::stream(stream_source(vec![Bytes::from_static(b"abc"), Bytes::from_static(b"def")], None));
        let entity = encode(
            &payload,
            &Method::POST,
            StreamingMode::Never,
            SendBodyMode::Auto,
            &mut headers,
        )
        .await
        .unwrap();

        assert_eq!(headers.get(CONTENT_LENGTH).unwrap().to_str().unwrap(), "6");
        assert!(matches!(entity, WireEntity::Buffered(_)));
        assert_eq!(collect(entity).await, Bytes::from_static(b"abcdef"));
    }

    #[tokio::test]
    async fn test_auto_explicit_content_length_wins_over_chunked() {
        // Content-Length "10" and Transfer-Encoding "chunked" on the same
        // request: Transfer-Encoding is stripped, Content-Length stays, the
        // body is buffered.
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("10"));
        headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));

        let payload = Payload::stream(stream_source(vec![Bytes::from_static(b"0123456789")], Some(10)));
        let entity = encode(
            &payload,
            &Method::POST,
            StreamingMode::Auto,
            SendBodyMode::Auto,
            &mut headers,
        )
        .await
        .unwrap();

        assert!(!headers.contains_key(TRANSFER_ENCODING));
        assert_eq!(
            headers.get(CONTENT_LENGTH).unwrap().to_str().unwrap(),
            "10"
        );
        assert!(matches!(entity, WireEntity::Buffered(_)));
    }

    #[tokio::test]
    async fn test_auto_explicit_chunked_streams_without_length() {
        let mut headers = chunked_headers();

        let payload = Payload::stream(stream_source(vec![Bytes::from_static(b"abc")], Some(3)));
        let entity = encode(
            &payload,
            &Method::POST,
            StreamingMode::Auto,
            SendBodyMode::Auto,
            &mut headers,
        )
        .await
        .unwrap();

        assert!(!headers.contains_key(CONTENT_LENGTH));
        assert_eq!(entity.len(), None);
    }

    #[tokio::test]
    async fn test_auto_known_length_declares_content_length() {
        let mut headers = HeaderMap::new();

        let payload = Payload::stream(stream_source(vec![Bytes::from_static(b"abcdef")], Some(6)));
        let entity = encode(
            &payload,
            &Method::POST,
            StreamingMode::Auto,
            SendBodyMode::Auto,
            &mut headers,
        )
        .await
        .unwrap();

        assert_eq!(headers.get(CONTENT_LENGTH).unwrap().to_str().unwrap(), "6");
        assert_eq!(entity.len(), Some(6));
    }

    #[tokio::test]
    async fn test_auto_unknown_length_streams_chunked() {
        let mut headers = HeaderMap::new();

        let payload = Payload::stream(stream_source(vec![Bytes::from_static(b"abc")], None));
        let entity = encode(
            &payload,
            &Method::POST,
            StreamingMode::Auto,
            SendBodyMode::Auto,
            &mut headers,
        )
        .await
        .unwrap();

        assert!(!headers.contains_key(CONTENT_LENGTH));
        assert_eq!(entity.len(), None);
    }

    #[tokio::test]
    async fn test_send_body_auto_suppresses_body_for_get() {
        let mut headers = HeaderMap::new();

        let payload = Payload::text("should not be sent");
        let entity = encode(
            &payload,
            &Method::GET,
            StreamingMode::Auto,
            SendBodyMode::Auto,
            &mut headers,
        )
        .await
        .unwrap();

        assert!(entity.is_empty());
        assert!(!headers.contains_key(CONTENT_LENGTH));
        assert!(!headers.contains_key(TRANSFER_ENCODING));
    }

    #[tokio::test]
    async fn test_send_body_always_forces_body_for_get() {
        let mut headers = HeaderMap::new();

        let payload = Payload::text("forced");
        let entity = encode(
            &payload,
            &Method::GET,
            StreamingMode::Auto,
            SendBodyMode::Always,
            &mut headers,
        )
        .await
        .unwrap();

        assert!(!entity.is_empty());
        assert_eq!(collect(entity).await, Bytes::from_static(b"forced"));
    }

    #[tokio::test]
    async fn test_send_body_never_suppresses_post_body() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from(4u64));

        let payload = Payload::text("data");
        let entity = encode(
            &payload,
            &Method::POST,
            StreamingMode::Auto,
            SendBodyMode::Never,
            &mut headers,
        )
        .await
        .unwrap();

        assert!(entity.is_empty());
        assert!(!headers.contains_key(CONTENT_LENGTH));
    }

    #[tokio::test]
    async fn test_absent_payload_yields_empty_entity() {
        let mut headers = HeaderMap::new();

        let entity = encode(
            &Payload::None,
            &Method::POST,
            StreamingMode::Auto,
            SendBodyMode::Always,
            &mut headers,
        )
        .await
        .unwrap();

        assert!(entity.is_empty());
        assert_eq!(entity.len(), Some(0));
    }

    #[tokio::test]
    async fn test_content_type_added_for_json() {
        let mut headers = HeaderMap::new();

        let payload = Payload::json(serde_json::json!({"name": "value"}));
        encode(
            &payload,
            &Method::POST,
            StreamingMode::Auto,
            SendBodyMode::Auto,
            &mut headers,
        )
        .await
        .unwrap();

        assert_eq!(
            headers.get(CONTENT_TYPE).unwrap().to_str().unwrap(),
            "application/json"
        );
    }

    #[tokio::test]
    async fn test_content_type_not_added_for_wildcard_media() {
        let mut headers = HeaderMap::new();

        let payload = Payload::bytes(&b"raw"[..]);
        encode(
            &payload,
            &Method::POST,
            StreamingMode::Auto,
            SendBodyMode::Auto,
            &mut headers,
        )
        .await
        .unwrap();

        assert!(!headers.contains_key(CONTENT_TYPE));
    }

    #[tokio::test]
    async fn test_content_type_not_overwritten() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/csv"));

        let payload = Payload::json(serde_json::json!([1, 2, 3]));
        encode(
            &payload,
            &Method::POST,
            StreamingMode::Auto,
            SendBodyMode::Auto,
            &mut headers,
        )
        .await
        .unwrap();

        assert_eq!(
            headers.get(CONTENT_TYPE).unwrap().to_str().unwrap(),
            "text/csv"
        );
    }

    #[tokio::test]
    async fn test_json_payload_serializes() {
        let mut headers = HeaderMap::new();

        let payload = Payload::json(serde_json::json!({"a": 1}));
        let entity = encode(
            &payload,
            &Method::POST,
            StreamingMode::Never,
            SendBodyMode::Auto,
            &mut headers,
        )
        .await
        .unwrap();

        assert_eq!(collect(entity).await, Bytes::from_static(b"{\"a\":1}"));
    }

    #[tokio::test]
    async fn test_stream_source_replays_from_origin() {
        let source = stream_source(vec![Bytes::from_static(b"replay")], Some(6));

        let first = buffer_stream(source.open()).await.unwrap();
        let second = buffer_stream(source.open()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first, Bytes::from_static(b"replay"));
    }

    #[test]
    fn test_streaming_mode_deserializes_lowercase() {
        let mode: StreamingMode = serde_json::from_str("\"always\"").unwrap();
        assert_eq!(mode, StreamingMode::Always);
        assert_eq!(StreamingMode::default(), StreamingMode::Auto);
        assert_eq!(SendBodyMode::default(), SendBodyMode::Auto);
    }
}
