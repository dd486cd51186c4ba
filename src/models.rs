//! Core data models for the offline cache engine

use crate::error::{EngineError, Result};
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use http::{HeaderMap, Method};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// The three kinds of content kept in separate generations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenerationKind {
    /// Shell assets: root document, manifest, icons, scripts, styles
    Static,
    /// API and HTML responses
    Dynamic,
    /// Same-origin image payloads
    Image,
}

impl GenerationKind {
    /// Lookup order used when searching every current generation
    pub const ALL: [GenerationKind; 3] = [
        GenerationKind::Static,
        GenerationKind::Dynamic,
        GenerationKind::Image,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationKind::Static => "static",
            GenerationKind::Dynamic => "dynamic",
            GenerationKind::Image => "image",
        }
    }
}

/// Normalized request identity used as the cache key
///
/// Only GET requests are ever keyed, so the key is `GET ` followed by the
/// absolute URL with its fragment removed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestKey(String);

impl RequestKey {
    pub fn for_url(url: &Url) -> Self {
        let mut normalized = url.clone();
        normalized.set_fragment(None);
        RequestKey(format!("GET {}", normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An outgoing request seen by the engine
#[derive(Debug, Clone)]
pub struct CacheRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    /// Only forwarded for passthrough requests; never cached
    pub body: Bytes,
}

impl CacheRequest {
    pub fn new(method: Method, url: Url) -> Self {
        CacheRequest {
            method,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Build a GET request from an absolute URL string
    pub fn get(url: &str) -> Result<Self> {
        Ok(Self::new(Method::GET, Url::parse(url)?))
    }

    /// Build a GET navigation request (`Accept: text/html`)
    pub fn navigation(url: &str) -> Result<Self> {
        Ok(Self::get(url)?.with_header(ACCEPT, HeaderValue::from_static("text/html")))
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    pub fn key(&self) -> RequestKey {
        RequestKey::for_url(&self.url)
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    pub fn host(&self) -> Option<&str> {
        self.url.host_str()
    }

    /// Whether the `Accept` header asks for an HTML document
    pub fn accepts_html(&self) -> bool {
        self.headers
            .get_all(ACCEPT)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.to_ascii_lowercase().contains("text/html"))
    }
}

/// A fully captured response: status, headers and body
///
/// Entries are immutable once written; a later write for the same key
/// replaces the whole value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl CachedResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        CachedResponse {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Capture headers from an `http::HeaderMap`, skipping non-UTF-8 values
    pub fn from_parts(status: u16, headers: &HeaderMap, body: Bytes) -> Self {
        let headers = headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        CachedResponse {
            status,
            headers,
            body,
        }
    }

    /// First header value with the given name (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(CONTENT_TYPE.as_str())
    }

    /// 2xx status
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Whether the content type declares an image payload
    pub fn is_image(&self) -> bool {
        self.content_type()
            .map(|ct| ct.trim().to_ascii_lowercase().starts_with("image/"))
            .unwrap_or(false)
    }

    /// Rebuild an `http::HeaderMap`, dropping entries that are not valid HTTP
    pub fn header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                map.append(name, value);
            }
        }
        map
    }
}

/// Resolve a precache entry or shell path against the origin
pub fn resolve_against(origin: &Url, path: &str) -> Result<Url> {
    origin
        .join(path)
        .map_err(|e| EngineError::Parse(format!("cannot resolve '{}' against {}: {}", path, origin, e)))
}
