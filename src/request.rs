//! Logical request descriptions and their assembly into wire requests
//!
//! A [`RequestTemplate`] is the reusable description of a call; [`build`]
//! produces a fresh [`LogicalRequest`] per attempt, merging configuration
//! defaults, resolving the URI, attaching correlation and cookie headers
//! and encoding the entity.

use http::Method;
use http::header::{COOKIE, HeaderMap, HeaderName, HeaderValue};
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use crate::constants::{CORRELATION_ID_HEADER, CORRELATION_ID_HEX_DIGITS};
use crate::cookies::{CookieStore, cookie_request_header};
use crate::entity::{self, Payload, SendBodyMode, StreamingMode, WireEntity};
use crate::error::CourierError;
use crate::config::Settings;

/// Outbound correlation strategy.
///
/// `Auto` sends the header only when an explicit id was supplied;
/// `Always` sends one unconditionally, deriving an id from the current
/// invocation when none was set; `Never` suppresses the header even when
/// an id exists upstream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationMode {
    Always,
    Never,
    #[default]
    Auto,
}

/// The reusable logical description of an outbound call.
///
/// Immutable once handed to the executor; building it twice (with no
/// stream body) yields byte-identical wire entities.
#[derive(Debug, Default)]
pub struct RequestTemplate {
    method: Method,
    path: String,
    absolute_url: Option<String>,
    uri_params: Vec<(String, String)>,
    encode_uri_params: bool,
    headers: Vec<(String, String)>,
    query: Vec<(String, String)>,
    payload: Payload,
    streaming_mode: Option<StreamingMode>,
    send_body_mode: Option<SendBodyMode>,
    correlation: CorrelationMode,
    correlation_id: Option<String>,
}

impl RequestTemplate {
    /// A template for `method` on a path relative to the configured base
    /// URL
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            ..Self::default()
        }
    }

    /// Use an absolute URL as-is, bypassing the configured base URL.
    /// URI-parameter substitution still applies.
    pub fn absolute(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            absolute_url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Supplies a value for a `{name}` URI parameter
    pub fn uri_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.uri_params.push((name.into(), value.into()));
        self
    }

    /// Percent-encode reserved characters in substituted URI parameter
    /// values. Spaces are encoded regardless of this flag.
    pub fn encode_uri_params(mut self, encode: bool) -> Self {
        self.encode_uri_params = encode;
        self
    }

    pub fn payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Per-call override of the configured streaming mode
    pub fn streaming_mode(mut self, mode: StreamingMode) -> Self {
        self.streaming_mode = Some(mode);
        self
    }

    /// Per-call override of the configured send-body mode
    pub fn send_body_mode(mut self, mode: SendBodyMode) -> Self {
        self.send_body_mode = Some(mode);
        self
    }

    pub fn correlation(mut self, mode: CorrelationMode) -> Self {
        self.correlation = mode;
        self
    }

    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }
}

/// A per-attempt wire request: absolute URL, method, sanitized headers
/// and the encoded entity
#[derive(Debug)]
pub struct LogicalRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub entity: WireEntity,
}

/// Builds a fresh wire request from a template.
///
/// Configuration defaults come first, per-call values after them;
/// duplicate names are preserved as multiple values, not overwritten.
/// Cookie reads are best-effort: IO failures are logged and treated as
/// "no cookies".
pub async fn build(
    template: &RequestTemplate,
    settings: &Settings,
    cookies: Option<&dyn CookieStore>,
) -> Result<LogicalRequest, CourierError> {
    let raw_url = match &template.absolute_url {
        Some(absolute) => {
            substitute_uri_params(absolute, &template.uri_params, template.encode_uri_params)?
        }
        None => {
            let joined = join_paths(&settings.base_url, &template.path);
            substitute_uri_params(&joined, &template.uri_params, template.encode_uri_params)?
        }
    };
    let mut url = Url::parse(&raw_url)?;

    if !settings.default_query_params.is_empty() || !template.query.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (name, value) in settings
            .default_query_params
            .iter()
            .chain(template.query.iter())
        {
            pairs.append_pair(name, value);
        }
    }

    let mut headers = HeaderMap::new();
    for (name, value) in settings.default_headers.iter().chain(template.headers.iter()) {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(http::Error::from)?;
        let value = HeaderValue::from_str(value).map_err(http::Error::from)?;
        headers.append(name, value);
    }

    apply_correlation(template, &mut headers)?;

    if settings.enable_cookies
        && let Some(store) = cookies
    {
        match store.get(&url).await {
            Ok(stored) => {
                if let Some(cookie) = cookie_request_header(&stored) {
                    let value = HeaderValue::from_str(&cookie).map_err(http::Error::from)?;
                    headers.append(COOKIE, value);
                }
            }
            Err(e) => warn!("Failed to read cookies for {url}: {e}"),
        }
    }

    let entity = entity::encode(
        &template.payload,
        &template.method,
        template.streaming_mode.unwrap_or(settings.streaming_mode),
        template.send_body_mode.unwrap_or(settings.send_body_mode),
        &mut headers,
    )
    .await?;

    Ok(LogicalRequest {
        method: template.method.clone(),
        url,
        headers,
        entity,
    })
}

fn apply_correlation(
    template: &RequestTemplate,
    headers: &mut HeaderMap,
) -> Result<(), CourierError> {
    let id = match template.correlation {
        CorrelationMode::Never => return Ok(()),
        CorrelationMode::Auto => match &template.correlation_id {
            Some(id) => id.clone(),
            None => return Ok(()),
        },
        CorrelationMode::Always => template
            .correlation_id
            .clone()
            .unwrap_or_else(derive_correlation_id),
    };
    let name =
        HeaderName::from_bytes(CORRELATION_ID_HEADER.as_bytes()).map_err(http::Error::from)?;
    let value = HeaderValue::from_str(&id).map_err(http::Error::from)?;
    headers.insert(name, value);
    Ok(())
}

/// Derives a correlation identity for the current invocation
fn derive_correlation_id() -> String {
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    let mut rng = SmallRng::from_os_rng();
    (0..CORRELATION_ID_HEX_DIGITS)
        .map(|_| char::from_digit(rng.random_range(0..16u32), 16).unwrap_or('0'))
        .collect()
}

/// Joins a base path and a relative path with exactly one separating
/// slash, never zero or two.
fn join_paths(base: &str, path: &str) -> String {
    if path.is_empty() {
        return base.to_string();
    }
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{base}/{path}"),
        _ => format!("{base}{path}"),
    }
}

/// RFC 3986 reserved characters, plus space and quote. A bare `%` is
/// encoded too; well-formed `%xx` escapes are preserved by the caller.
const RESERVED: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'!')
    .add(b'"')
    .add(b'#')
    .add(b'$')
    .add(b'%')
    .add(b'&')
    .add(b'\'')
    .add(b'(')
    .add(b')')
    .add(b'*')
    .add(b'+')
    .add(b',')
    .add(b'/')
    .add(b':')
    .add(b';')
    .add(b'=')
    .add(b'?')
    .add(b'@')
    .add(b'[')
    .add(b']');

/// Spaces are percent-encoded even when reserved-character encoding is
/// disabled
const SPACE_ONLY: &AsciiSet = &CONTROLS.add(b' ');

/// Substitutes `{name}` tokens in a URI template. A parameter without a
/// supplied value is a fatal construction error, never a partial
/// substitution.
fn substitute_uri_params(
    template: &str,
    params: &[(String, String)],
    encode_reserved: bool,
) -> Result<String, CourierError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            return Err(CourierError::configuration(format!(
                "Unterminated URI parameter in '{template}'"
            )));
        };
        let name = &after[..close];
        let value = params
            .iter()
            .find(|(param, _)| param == name)
            .map(|(_, value)| value)
            .ok_or_else(|| {
                CourierError::configuration(format!(
                    "No value supplied for URI parameter '{{{name}}}'"
                ))
            })?;
        let set = if encode_reserved { RESERVED } else { SPACE_ONLY };
        out.push_str(&encode_preserving_escapes(value, set));
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Percent-encodes `value` while leaving existing `%xx` escapes intact
fn encode_preserving_escapes(value: &str, set: &'static AsciiSet) -> String {
    let bytes = value.as_bytes();
    let mut out = String::new();
    let mut segment_start = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && bytes[i + 1].is_ascii_hexdigit()
            && bytes[i + 2].is_ascii_hexdigit()
        {
            out.extend(utf8_percent_encode(&value[segment_start..i], set));
            out.push_str(&value[i..i + 3]);
            i += 3;
            segment_start = i;
        } else {
            i += 1;
        }
    }
    out.extend(utf8_percent_encode(&value[segment_start..], set));
    out
}
