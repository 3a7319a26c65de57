//! Destination resolution
//!
//! A configured URL such as `rtmp://host/app/streamkey` is split into the
//! endpoint the client connects to (`rtmp://host/app`) and the stream key it
//! publishes (`streamkey`). Anything with fewer than two named path segments
//! is used verbatim as the endpoint and published as `live`.

use std::fmt;

use url::Url;

use crate::error::{ProtocolError, Result};
use crate::protocol::constants::DEFAULT_PORT;

/// Stream key used when the URL does not carry one
pub const DEFAULT_STREAM_KEY: &str = "live";

/// Resolved publish target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// URL exactly as configured
    pub raw_url: String,
    pub connect_endpoint: String,
    pub stream_key: String,
}

impl Destination {
    /// Resolve a configured URL. Never fails; see the module docs.
    pub fn resolve(raw: &str) -> Self {
        match split_stream_key(raw) {
            Some((connect_endpoint, stream_key)) => Self {
                raw_url: raw.to_string(),
                connect_endpoint,
                stream_key,
            },
            None => Self {
                raw_url: raw.to_string(),
                connect_endpoint: raw.to_string(),
                stream_key: DEFAULT_STREAM_KEY.to_string(),
            },
        }
    }

    /// False when there is nothing a transport could connect to
    pub fn is_connectable(&self) -> bool {
        !self.connect_endpoint.trim().is_empty()
            && Url::parse(&self.connect_endpoint)
                .map(|url| url.has_host())
                .unwrap_or(false)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (key {})", self.connect_endpoint, self.stream_key)
    }
}

/// Shorthand for [`Destination::resolve`]
pub fn resolve(raw: &str) -> Destination {
    Destination::resolve(raw)
}

fn split_stream_key(raw: &str) -> Option<(String, String)> {
    let url = Url::parse(raw).ok()?;
    if url.cannot_be_a_base() {
        return None;
    }

    // Root plus at least app and key; empty segments do not count
    let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
    if segments.len() < 2 {
        return None;
    }

    let (key, parent) = segments.split_last()?;
    let stream_key = match url.query() {
        Some(query) => format!("{}?{}", key, query),
        None => key.to_string(),
    };

    let mut endpoint = url.clone();
    endpoint.set_query(None);
    endpoint.set_fragment(None);
    endpoint.set_path(&parent.join("/"));

    Some((endpoint.as_str().trim_end_matches('/').to_string(), stream_key))
}

/// Connection parameters derived from a connect endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtmpEndpoint {
    pub host: String,
    pub port: u16,
    /// Application name, everything after the host
    pub app: String,
    /// `tcUrl` sent in `connect`
    pub tc_url: String,
}

impl RtmpEndpoint {
    /// Parse `rtmp://host[:port]/app[/instance]`
    pub fn parse(endpoint: &str) -> Result<Self> {
        let url = Url::parse(endpoint)
            .map_err(|_| ProtocolError::InvalidUrl(endpoint.to_string()))?;

        match url.scheme() {
            "rtmp" => {}
            other => return Err(ProtocolError::UnsupportedScheme(other.to_string()).into()),
        }

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ProtocolError::InvalidUrl(endpoint.to_string()))?
            .to_string();
        let app = url.path().trim_matches('/').to_string();
        if app.is_empty() {
            return Err(ProtocolError::InvalidUrl(endpoint.to_string()).into());
        }

        Ok(Self {
            host,
            port: url.port().unwrap_or(DEFAULT_PORT),
            app,
            tc_url: endpoint.trim_end_matches('/').to_string(),
        })
    }

    /// `host:port` for the TCP connect
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_splits_key() {
        let dest = resolve("rtmp://a.rtmp.youtube.com/live2/abcd-1234");
        assert_eq!(dest.connect_endpoint, "rtmp://a.rtmp.youtube.com/live2");
        assert_eq!(dest.stream_key, "abcd-1234");
        assert_eq!(dest.raw_url, "rtmp://a.rtmp.youtube.com/live2/abcd-1234");
        assert!(dest.is_connectable());
    }

    #[test]
    fn test_keeps_port_and_nested_app() {
        let dest = resolve("rtmp://10.0.0.5:1936/app/inst/key");
        assert_eq!(dest.connect_endpoint, "rtmp://10.0.0.5:1936/app/inst");
        assert_eq!(dest.stream_key, "key");
    }

    #[test]
    fn test_query_stays_with_key() {
        let dest = resolve("rtmp://host/app/key?token=abc");
        assert_eq!(dest.connect_endpoint, "rtmp://host/app");
        assert_eq!(dest.stream_key, "key?token=abc");
    }

    #[test]
    fn test_app_only_uses_default_key() {
        let dest = resolve("rtmp://host/app");
        assert_eq!(dest.connect_endpoint, "rtmp://host/app");
        assert_eq!(dest.stream_key, DEFAULT_STREAM_KEY);
        assert!(dest.is_connectable());

        // Trailing slash does not make a key
        let dest = resolve("rtmp://host/app/");
        assert_eq!(dest.connect_endpoint, "rtmp://host/app/");
        assert_eq!(dest.stream_key, "live");
    }

    #[test]
    fn test_empty_is_not_connectable() {
        let dest = resolve("");
        assert_eq!(dest.connect_endpoint, "");
        assert_eq!(dest.stream_key, "live");
        assert!(!dest.is_connectable());
    }

    #[test]
    fn test_garbage_is_verbatim() {
        let dest = resolve("not a url");
        assert_eq!(dest.connect_endpoint, "not a url");
        assert_eq!(dest.stream_key, "live");
        assert!(!dest.is_connectable());
    }

    #[test]
    fn test_endpoint_parse() {
        let ep = RtmpEndpoint::parse("rtmp://localhost/live").unwrap();
        assert_eq!(ep.host, "localhost");
        assert_eq!(ep.port, 1935);
        assert_eq!(ep.app, "live");
        assert_eq!(ep.tc_url, "rtmp://localhost/live");
        assert_eq!(ep.socket_addr(), "localhost:1935");

        let ep = RtmpEndpoint::parse("rtmp://127.0.0.1:1940/app/inst").unwrap();
        assert_eq!(ep.port, 1940);
        assert_eq!(ep.app, "app/inst");
    }

    #[test]
    fn test_endpoint_rejects() {
        assert!(matches!(
            RtmpEndpoint::parse("rtmps://host/app"),
            Err(crate::error::Error::Protocol(ProtocolError::UnsupportedScheme(_)))
        ));
        assert!(RtmpEndpoint::parse("http://host/app").is_err());
        assert!(RtmpEndpoint::parse("rtmp://host").is_err());
        assert!(RtmpEndpoint::parse("").is_err());
    }

    proptest! {
        #[test]
        fn prop_two_segments_split(
            host in "[a-z]{1,12}(\\.[a-z]{2,5})?",
            app in "[A-Za-z0-9_]{1,10}",
            key in "[A-Za-z0-9_-]{1,24}",
        ) {
            let dest = resolve(&format!("rtmp://{}/{}/{}", host, app, key));
            prop_assert_eq!(dest.connect_endpoint, format!("rtmp://{}/{}", host, app));
            prop_assert_eq!(dest.stream_key, key);
        }

        #[test]
        fn prop_short_paths_use_live(
            host in "[a-z]{1,12}",
            app in proptest::option::of("[A-Za-z0-9_]{1,10}"),
        ) {
            let raw = match app {
                Some(app) => format!("rtmp://{}/{}", host, app),
                None => format!("rtmp://{}", host),
            };
            let dest = resolve(&raw);
            prop_assert_eq!(dest.connect_endpoint, raw);
            prop_assert_eq!(dest.stream_key, "live");
        }

        #[test]
        fn prop_resolve_never_panics(raw in ".{0,64}") {
            let dest = resolve(&raw);
            prop_assert!(!dest.stream_key.is_empty());
        }
    }
}
