//! Origin allow-list built from the configured pattern string.
//!
//! Patterns are comma separated. `*` alone allows every origin; otherwise each entry is
//! `[scheme://]host[:port]` where the host may start with `*.` (any subdomain) and the
//! port may be `*` (any port).

use axum::http::{HeaderValue, Method, header, request::Parts};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use url::Url;

use super::middleware::REQUEST_ID_HEADER;
use crate::infra::error::InfraError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum HostPattern {
    Exact(String),
    /// Stored with its leading dot, e.g. `.example.com`.
    Subdomain(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PortPattern {
    Default,
    Any,
    Exact(u16),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginPattern {
    scheme: Option<String>,
    host: HostPattern,
    port: PortPattern,
}

impl OriginPattern {
    pub fn parse(raw: &str) -> Result<Self, InfraError> {
        let raw = raw.trim();
        let invalid = |reason: &str| {
            InfraError::configuration(format!("invalid CORS origin pattern `{raw}`: {reason}"))
        };

        let (scheme, rest) = match raw.split_once("://") {
            Some((scheme, rest)) if !scheme.is_empty() => {
                (Some(scheme.to_ascii_lowercase()), rest)
            }
            Some(_) => return Err(invalid("empty scheme")),
            None => (None, raw),
        };
        let rest = rest.trim_end_matches('/');

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, "*")) => (host, PortPattern::Any),
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| invalid("bad port"))?;
                (host, PortPattern::Exact(port))
            }
            None => (rest, PortPattern::Default),
        };

        let host = host.to_ascii_lowercase();
        let host = match host.strip_prefix("*.") {
            Some(suffix) if !suffix.is_empty() && !suffix.contains('*') => {
                HostPattern::Subdomain(format!(".{suffix}"))
            }
            Some(_) => return Err(invalid("wildcard needs a domain after `*.`")),
            None if host.is_empty() => return Err(invalid("empty host")),
            None if host.contains('*') => {
                return Err(invalid("`*` is only allowed as a leading `*.` label"));
            }
            None => HostPattern::Exact(host),
        };

        Ok(Self { scheme, host, port })
    }

    pub fn matches(&self, origin: &Url) -> bool {
        if self
            .scheme
            .as_deref()
            .is_some_and(|scheme| scheme != origin.scheme())
        {
            return false;
        }

        let Some(host) = origin.host_str() else {
            return false;
        };
        let host_ok = match &self.host {
            HostPattern::Exact(expected) => host == expected.as_str(),
            HostPattern::Subdomain(suffix) => host.len() > suffix.len() && host.ends_with(suffix),
        };
        if !host_ok {
            return false;
        }

        match self.port {
            PortPattern::Any => true,
            PortPattern::Default => origin.port().is_none(),
            PortPattern::Exact(port) => origin.port_or_known_default() == Some(port),
        }
    }
}

/// Parsed allow-list; `None` means every origin is allowed.
#[derive(Debug, Clone)]
pub struct OriginPolicy {
    patterns: Option<Vec<OriginPattern>>,
}

impl OriginPolicy {
    pub fn parse(raw: &str) -> Result<Self, InfraError> {
        let entries: Vec<&str> = raw
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .collect();
        if entries.is_empty() {
            return Err(InfraError::configuration("CORS origin pattern is empty"));
        }
        if entries.contains(&"*") {
            return Ok(Self { patterns: None });
        }
        let patterns = entries
            .into_iter()
            .map(OriginPattern::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            patterns: Some(patterns),
        })
    }

    pub fn allows(&self, origin: &str) -> bool {
        let Some(patterns) = self.patterns.as_ref() else {
            return true;
        };
        let Ok(url) = Url::parse(origin) else {
            return false;
        };
        patterns.iter().any(|pattern| pattern.matches(&url))
    }

    pub fn layer(self) -> CorsLayer {
        let allow_origin = if self.patterns.is_none() {
            AllowOrigin::any()
        } else {
            AllowOrigin::predicate(move |origin: &HeaderValue, _parts: &Parts| {
                origin
                    .to_str()
                    .map(|origin| self.allows(origin))
                    .unwrap_or(false)
            })
        };

        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any)
            .expose_headers([
                header::CONTENT_DISPOSITION,
                header::CONTENT_LENGTH,
                REQUEST_ID_HEADER,
            ])
    }
}
