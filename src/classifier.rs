//! Request classification
//!
//! Every request is sorted into exactly one [`RouteClass`] by walking a
//! single ordered table of `(predicate, class)` rules; the first matching
//! rule wins. Requests that match no rule are [`RouteClass::Other`].
//!
//! | # | Rule | Class |
//! |---|------|-------|
//! | 1 | method is not GET | `Bypass(NonGet)` |
//! | 2 | scheme is not http/https | `Bypass(NonHttp)` |
//! | 3 | host or path contains a bypass fragment | `Bypass(BypassList)` |
//! | 4 | image extension, external image host, or image query keys | `Image` |
//! | 5 | path starts with the API prefix | `Api` |
//! | 6 | static extension, manifest path or icon path | `StaticAsset` |
//! | 7 | `Accept` includes `text/html` | `Navigation` |

use crate::config::EngineConfig;
use crate::error::Result;
use crate::models::CacheRequest;
use http::Method;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use url::{Origin, Url};

/// Why a request is left to the default network handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BypassReason {
    NonGet,
    NonHttp,
    BypassList,
}

/// Per-request category; recomputed for every request, never stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    Bypass(BypassReason),
    Image,
    Api,
    StaticAsset,
    Navigation,
    Other,
}

impl RouteClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteClass::Bypass(BypassReason::NonGet) => "bypass-non-get",
            RouteClass::Bypass(BypassReason::NonHttp) => "bypass-non-http",
            RouteClass::Bypass(BypassReason::BypassList) => "bypass-list",
            RouteClass::Image => "image",
            RouteClass::Api => "api",
            RouteClass::StaticAsset => "static-asset",
            RouteClass::Navigation => "navigation",
            RouteClass::Other => "other",
        }
    }

    pub fn is_bypass(&self) -> bool {
        matches!(self, RouteClass::Bypass(_))
    }
}

impl fmt::Display for RouteClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type Predicate = fn(&RequestClassifier, &CacheRequest) -> bool;

struct Rule {
    matches: Predicate,
    class: RouteClass,
}

/// Precedence is the order of this table
const RULES: &[Rule] = &[
    Rule {
        matches: RequestClassifier::is_non_get,
        class: RouteClass::Bypass(BypassReason::NonGet),
    },
    Rule {
        matches: RequestClassifier::is_non_http,
        class: RouteClass::Bypass(BypassReason::NonHttp),
    },
    Rule {
        matches: RequestClassifier::in_bypass_set,
        class: RouteClass::Bypass(BypassReason::BypassList),
    },
    Rule {
        matches: RequestClassifier::is_image,
        class: RouteClass::Image,
    },
    Rule {
        matches: RequestClassifier::is_api,
        class: RouteClass::Api,
    },
    Rule {
        matches: RequestClassifier::is_static_asset,
        class: RouteClass::StaticAsset,
    },
    Rule {
        matches: RequestClassifier::is_navigation,
        class: RouteClass::Navigation,
    },
];

/// Classifies requests by method, scheme, host, path, query and headers
pub struct RequestClassifier {
    config: Arc<EngineConfig>,
    origin: Origin,
}

impl RequestClassifier {
    pub fn new(config: Arc<EngineConfig>) -> Result<Self> {
        let origin = config.origin_url()?.origin();
        Ok(RequestClassifier { config, origin })
    }

    /// Classify a request; first matching rule wins
    pub fn classify(&self, request: &CacheRequest) -> RouteClass {
        let class = RULES
            .iter()
            .find(|rule| (rule.matches)(self, request))
            .map(|rule| rule.class)
            .unwrap_or(RouteClass::Other);

        debug!(
            "Classified request: method={}, url={}, class={}",
            request.method, request.url, class
        );
        class
    }

    /// Whether an image request targets a host other than the origin
    ///
    /// External images are never intercepted; only same-origin images are
    /// cache-managed.
    pub fn is_external(&self, request: &CacheRequest) -> bool {
        request.url.origin() != self.origin || self.is_external_image_host(&request.url)
    }

    fn is_non_get(&self, request: &CacheRequest) -> bool {
        request.method != Method::GET
    }

    fn is_non_http(&self, request: &CacheRequest) -> bool {
        !matches!(request.url.scheme(), "http" | "https")
    }

    fn in_bypass_set(&self, request: &CacheRequest) -> bool {
        let host = request.host().unwrap_or_default().to_ascii_lowercase();
        let path = request.path().to_ascii_lowercase();

        self.config.bypass.iter().any(|fragment| {
            let fragment = fragment.to_ascii_lowercase();
            host.contains(&fragment) || path.contains(&fragment)
        })
    }

    fn is_image(&self, request: &CacheRequest) -> bool {
        has_extension(request.path(), &self.config.image_extensions)
            || self.is_external_image_host(&request.url)
            || self.has_image_query(&request.url)
    }

    fn is_api(&self, request: &CacheRequest) -> bool {
        request.path().starts_with(&self.config.api_prefix)
    }

    fn is_static_asset(&self, request: &CacheRequest) -> bool {
        let path = request.path();
        has_extension(path, &self.config.static_extensions)
            || self.config.manifest_paths.iter().any(|p| p == path)
            || self.config.icon_prefixes.iter().any(|p| path.starts_with(p.as_str()))
    }

    fn is_navigation(&self, request: &CacheRequest) -> bool {
        request.accepts_html()
    }

    fn is_external_image_host(&self, url: &Url) -> bool {
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        !host.is_empty()
            && self
                .config
                .external_image_domains
                .iter()
                .any(|domain| host.contains(&domain.to_ascii_lowercase()))
    }

    fn has_image_query(&self, url: &Url) -> bool {
        url.query_pairs().any(|(key, _)| {
            self.config
                .image_query_params
                .iter()
                .any(|param| param.eq_ignore_ascii_case(&key))
        })
    }
}

/// Extension of the last path segment, compared case-insensitively
fn has_extension(path: &str, extensions: &[String]) -> bool {
    let segment = path.rsplit('/').next().unwrap_or_default();
    match segment.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            extensions.iter().any(|candidate| candidate.eq_ignore_ascii_case(ext))
        }
        _ => false,
    }
}
