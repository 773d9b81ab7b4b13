//! Client identity derivation.

use axum::http::HeaderMap;

/// Identity used when no address header is present.
pub const LOOPBACK_IDENTITY: &str = "127.0.0.1";

/// Address headers consulted, in order of preference.
const ADDRESS_HEADERS: [&str; 3] = ["x-real-ip", "x-forwarded-for", "cf-connecting-ip"];

/// The key rate-limit counters are bucketed by.
///
/// Derived from client-supplied address headers and therefore spoofable by
/// any client that can set them. Deployments must strip or overwrite these
/// headers at the edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    /// Derive the identity from request headers.
    ///
    /// Takes the first non-empty value among `x-real-ip`, the first hop of
    /// `x-forwarded-for` and `cf-connecting-ip`, falling back to
    /// [`LOOPBACK_IDENTITY`].
    pub fn from_headers(headers: &HeaderMap) -> Self {
        ADDRESS_HEADERS
            .iter()
            .filter_map(|name| headers.get(*name))
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| value.split(',').next())
            .map(str::trim)
            .find(|value| !value.is_empty())
            .map(Self::new)
            .unwrap_or_else(|| Self::new(LOOPBACK_IDENTITY))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Counter store key for this identity: `{prefix}:{identity}`.
    pub fn counter_key(&self, prefix: &str) -> String {
        format!("{}:{}", prefix, self.0)
    }
}

impl std::fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(*value));
        }
        map
    }

    #[test]
    fn test_forwarded_for_first_hop() {
        let identity = ClientIdentity::from_headers(&headers(&[(
            "x-forwarded-for",
            "1.2.3.4, 5.6.7.8",
        )]));
        assert_eq!(identity.as_str(), "1.2.3.4");
    }

    #[test]
    fn test_no_headers_falls_back_to_loopback() {
        let identity = ClientIdentity::from_headers(&HeaderMap::new());
        assert_eq!(identity.as_str(), "127.0.0.1");
    }

    #[test]
    fn test_real_ip_takes_precedence() {
        let identity = ClientIdentity::from_headers(&headers(&[
            ("x-forwarded-for", "1.2.3.4"),
            ("x-real-ip", "10.0.0.1"),
            ("cf-connecting-ip", "8.8.8.8"),
        ]));
        assert_eq!(identity.as_str(), "10.0.0.1");
    }

    #[test]
    fn test_cdn_header_used_last() {
        let identity = ClientIdentity::from_headers(&headers(&[("cf-connecting-ip", "8.8.8.8")]));
        assert_eq!(identity.as_str(), "8.8.8.8");
    }

    #[test]
    fn test_empty_values_are_skipped() {
        let identity = ClientIdentity::from_headers(&headers(&[
            ("x-real-ip", "  "),
            ("x-forwarded-for", " , 5.6.7.8"),
            ("cf-connecting-ip", "8.8.8.8"),
        ]));
        assert_eq!(identity.as_str(), "8.8.8.8");
    }

    #[test]
    fn test_counter_key() {
        let identity = ClientIdentity::new("9.9.9.9");
        assert_eq!(identity.counter_key("ratelimit"), "ratelimit:9.9.9.9");
        assert_eq!(identity.to_string(), "9.9.9.9");
    }
}
