//! Cookie persistence contract and the in-memory default store
//!
//! Cookies are a best-effort feature: store IO failures are logged by the
//! callers and never fail a request.

use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use tokio::sync::RwLock;
use url::Url;

/// Minimal cookie persistence contract: header values keyed by request URI.
///
/// `get` returns previously stored header values for the URI's origin;
/// `put` records the `Set-Cookie`/`Set-Cookie2` values a response carried.
#[async_trait]
pub trait CookieStore: Send + Sync {
    async fn get(&self, url: &Url) -> io::Result<HashMap<String, Vec<String>>>;

    async fn put(&self, url: &Url, headers: HashMap<String, Vec<String>>) -> io::Result<()>;
}

/// In-memory cookie store keyed by URL origin
#[derive(Debug, Default)]
pub struct MemoryCookieStore {
    entries: RwLock<HashMap<String, HashMap<String, Vec<String>>>>,
}

impl MemoryCookieStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn origin_key(url: &Url) -> String {
    url.origin().ascii_serialization()
}

/// The name part of a `name=value[; attributes]` cookie string
fn cookie_name(value: &str) -> &str {
    let pair = value.split(';').next().unwrap_or(value);
    pair.split('=').next().unwrap_or(pair).trim()
}

#[async_trait]
impl CookieStore for MemoryCookieStore {
    async fn get(&self, url: &Url) -> io::Result<HashMap<String, Vec<String>>> {
        let entries = self.entries.read().await;
        Ok(entries.get(&origin_key(url)).cloned().unwrap_or_default())
    }

    async fn put(&self, url: &Url, headers: HashMap<String, Vec<String>>) -> io::Result<()> {
        let mut entries = self.entries.write().await;
        let origin = entries.entry(origin_key(url)).or_default();
        for (name, values) in headers {
            let stored = origin.entry(name).or_default();
            for value in values {
                // A later cookie with the same name replaces the earlier one
                let incoming = cookie_name(&value).to_string();
                stored.retain(|existing| cookie_name(existing) != incoming);
                stored.push(value);
            }
        }
        Ok(())
    }
}

/// Assembles the `Cookie` request header value from stored
/// `Set-Cookie`/`Set-Cookie2` values. Returns `None` when nothing is
/// stored for the URI.
pub fn cookie_request_header(stored: &HashMap<String, Vec<String>>) -> Option<String> {
    let mut pairs: Vec<String> = Vec::new();
    for (name, values) in stored {
        if !name.eq_ignore_ascii_case("set-cookie") && !name.eq_ignore_ascii_case("set-cookie2") {
            continue;
        }
        for value in values {
            let pair = value.split(';').next().unwrap_or(value).trim();
            if !pair.is_empty() {
                pairs.push(pair.to_string());
            }
        }
    }
    if pairs.is_empty() {
        None
    } else {
        pairs.sort();
        Some(pairs.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_cookie_map(values: Vec<&str>) -> HashMap<String, Vec<String>> {
        HashMap::from([(
            "Set-Cookie".to_string(),
            values.into_iter().map(String::from).collect(),
        )])
    }

    #[tokio::test]
    async fn test_put_then_get_round_trip() {
        let store = MemoryCookieStore::new();
        let url = Url::parse("https://api.example.com/clients").unwrap();

        store
            .put(&url, set_cookie_map(vec!["session=abc123; Path=/"]))
            .await
            .unwrap();

        let stored = store.get(&url).await.unwrap();
        assert_eq!(
            stored.get("Set-Cookie").unwrap(),
            &vec!["session=abc123; Path=/".to_string()]
        );
    }

    #[tokio::test]
    async fn test_cookies_are_keyed_by_origin() {
        let store = MemoryCookieStore::new();
        let url_a = Url::parse("https://a.example.com/x").unwrap();
        let url_b = Url::parse("https://b.example.com/x").unwrap();

        store
            .put(&url_a, set_cookie_map(vec!["session=abc"]))
            .await
            .unwrap();

        assert!(store.get(&url_b).await.unwrap().is_empty());
        // Same origin, different path: cookies still visible
        let url_a2 = Url::parse("https://a.example.com/y").unwrap();
        assert!(!store.get(&url_a2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_same_name_cookie_is_replaced() {
        let store = MemoryCookieStore::new();
        let url = Url::parse("https://api.example.com/").unwrap();

        store
            .put(&url, set_cookie_map(vec!["session=old"]))
            .await
            .unwrap();
        store
            .put(&url, set_cookie_map(vec!["session=new"]))
            .await
            .unwrap();

        let stored = store.get(&url).await.unwrap();
        assert_eq!(
            stored.get("Set-Cookie").unwrap(),
            &vec!["session=new".to_string()]
        );
    }

    #[test]
    fn test_cookie_request_header_strips_attributes() {
        let stored = set_cookie_map(vec!["session=abc123; Path=/; HttpOnly"]);
        assert_eq!(
            cookie_request_header(&stored),
            Some("session=abc123".to_string())
        );
    }

    #[test]
    fn test_cookie_request_header_joins_multiple() {
        let stored = set_cookie_map(vec!["a=1; Path=/", "b=2"]);
        assert_eq!(cookie_request_header(&stored), Some("a=1; b=2".to_string()));
    }

    #[test]
    fn test_cookie_request_header_includes_set_cookie2() {
        let stored = HashMap::from([
            ("Set-Cookie".to_string(), vec!["a=1".to_string()]),
            ("Set-Cookie2".to_string(), vec!["b=2".to_string()]),
        ]);
        assert_eq!(cookie_request_header(&stored), Some("a=1; b=2".to_string()));
    }

    #[test]
    fn test_cookie_request_header_ignores_unrelated_headers() {
        let stored = HashMap::from([("X-Other".to_string(), vec!["a=1".to_string()])]);
        assert_eq!(cookie_request_header(&stored), None);
    }

    #[test]
    fn test_cookie_request_header_empty_store() {
        assert_eq!(cookie_request_header(&HashMap::new()), None);
    }
}
