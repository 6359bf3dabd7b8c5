//! Client key derivation for inbound requests.

use std::borrow::Cow;

use axum::http::{HeaderMap, HeaderName};

use crate::config::RateLimitingConfig;
use crate::error::{GatekeeperError, Result};

/// Header consulted for the originating client address by default.
pub const DEFAULT_FORWARDED_HEADER: &str = "x-forwarded-for";

/// Derives the rate limit key that identifies the client behind a request.
///
/// The key is the first address in the forwarded-for header when that header
/// is trusted and non-empty, otherwise the peer address without its port.
/// Derivation never fails: an unparseable peer address is used verbatim and a
/// missing one yields the empty key.
#[derive(Debug, Clone)]
pub struct ClientKeyExtractor {
    /// Forwarded-for style header to trust, if any
    forwarded_header: Option<HeaderName>,
}

impl ClientKeyExtractor {
    /// Create an extractor that trusts the given forwarded-for header.
    pub fn trusting(header: HeaderName) -> Self {
        Self {
            forwarded_header: Some(header),
        }
    }

    /// Create an extractor that only looks at the transport peer address.
    pub fn peer_only() -> Self {
        Self {
            forwarded_header: None,
        }
    }

    /// Build the extractor described by the rate limiting configuration.
    pub fn from_config(config: &RateLimitingConfig) -> Result<Self> {
        if !config.trust_forwarded_for {
            return Ok(Self::peer_only());
        }

        let header = HeaderName::try_from(config.forwarded_header.as_str()).map_err(|e| {
            GatekeeperError::Config(format!(
                "invalid forwarded header name '{}': {}",
                config.forwarded_header, e
            ))
        })?;

        Ok(Self::trusting(header))
    }

    /// The header this extractor trusts, if any.
    pub fn forwarded_header(&self) -> Option<&HeaderName> {
        self.forwarded_header.as_ref()
    }

    /// Derive the client key from request headers and the peer address.
    pub fn extract(&self, headers: &HeaderMap, remote_addr: Option<&str>) -> String {
        if let Some(forwarded) = self.forwarded_for(headers) {
            let first = forwarded.split(',').next().unwrap_or_default();
            return first.trim().to_string();
        }

        let remote_addr = remote_addr.unwrap_or_default();
        split_host(remote_addr).unwrap_or(remote_addr).to_string()
    }

    /// Invalid UTF-8 in the header value is replaced, not treated as absent.
    fn forwarded_for<'a>(&self, headers: &'a HeaderMap) -> Option<Cow<'a, str>> {
        let name = self.forwarded_header.as_ref()?;
        headers
            .get(name)
            .map(|value| value.as_bytes())
            .filter(|bytes| !bytes.is_empty())
            .map(String::from_utf8_lossy)
    }
}

impl Default for ClientKeyExtractor {
    fn default() -> Self {
        Self::trusting(HeaderName::from_static(DEFAULT_FORWARDED_HEADER))
    }
}

/// Split a `host:port` address and return the host.
///
/// Bracketed IPv6 hosts are unwrapped. Returns `None` when there is no port
/// or the address is ambiguous, e.g. an unbracketed IPv6 address.
fn split_host(addr: &str) -> Option<&str> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, after) = rest.split_once(']')?;
        let port = after.strip_prefix(':')?;
        if port.contains(':') {
            return None;
        }
        return Some(host);
    }

    let (host, _port) = addr.rsplit_once(':')?;
    if host.contains(':') || host.contains('[') || host.contains(']') {
        return None;
    }
    Some(host)
}
