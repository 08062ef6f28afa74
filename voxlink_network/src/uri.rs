//! `ws://` URI parsing.

use core::{fmt, str::FromStr};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UriError {
    #[error("unsupported scheme {0:?}, expected \"ws\"")]
    UnsupportedScheme(String),
    #[error("missing scheme in {0:?}")]
    MissingScheme(String),
    #[error("missing host")]
    MissingHost,
    #[error("invalid port {0:?}")]
    InvalidPort(String),
}

/// The parts of a `ws://host[:port][/path]` URI needed to open a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WsUri {
    host: String,
    port: u16,
    path: String,
}

impl WsUri {
    pub const SCHEME: &'static str = "ws";
    pub const DEFAULT_PORT: u16 = 80;

    pub fn parse(uri: &str) -> Result<Self, UriError> {
        let uri = uri.trim();

        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| UriError::MissingScheme(uri.to_owned()))?;

        if !scheme.eq_ignore_ascii_case(Self::SCHEME) {
            return Err(UriError::UnsupportedScheme(scheme.to_owned()));
        }

        let (authority, path) = match rest.find('/') {
            Some(i) => rest.split_at(i),
            None => (rest, "/"),
        };

        let (host, port) = Self::split_authority(authority)?;

        if host.is_empty() {
            return Err(UriError::MissingHost);
        }

        let port = match port {
            Some(port) => port
                .parse()
                .map_err(|_| UriError::InvalidPort(port.to_owned()))?,
            None => Self::DEFAULT_PORT,
        };

        Ok(Self {
            host: host.to_owned(),
            port,
            path: path.to_owned(),
        })
    }

    // bracketed IPv6 literals contain colons
    fn split_authority(authority: &str) -> Result<(&str, Option<&str>), UriError> {
        if let Some(rest) = authority.strip_prefix('[') {
            let (host, rest) = rest.split_once(']').ok_or(UriError::MissingHost)?;

            return match rest.strip_prefix(':') {
                Some(port) => Ok((host, Some(port))),
                None if rest.is_empty() => Ok((host, None)),
                None => Err(UriError::InvalidPort(rest.to_owned())),
            };
        }

        Ok(match authority.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (authority, None),
        })
    }

    #[inline(always)]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[inline(always)]
    pub const fn port(&self) -> u16 {
        self.port
    }

    #[inline(always)]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// `host:port`, as sent in the `Host` header.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for WsUri {
    type Err = UriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for WsUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", Self::SCHEME, self.authority(), self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_uri() {
        let uri = WsUri::parse("ws://192.168.0.63:8080/websocket/1").unwrap();

        assert_eq!(uri.host(), "192.168.0.63");
        assert_eq!(uri.port(), 8080);
        assert_eq!(uri.path(), "/websocket/1");
        assert_eq!(uri.authority(), "192.168.0.63:8080");
    }

    #[test]
    fn defaults() {
        let uri: WsUri = "ws://audio.example.com".parse().unwrap();

        assert_eq!(uri.host(), "audio.example.com");
        assert_eq!(uri.port(), 80);
        assert_eq!(uri.path(), "/");
        assert_eq!(uri.to_string(), "ws://audio.example.com:80/");

        let uri = WsUri::parse("WS://host/").unwrap();
        assert_eq!(uri.path(), "/");
    }

    #[test]
    fn ipv6_literal() {
        let uri = WsUri::parse("ws://[::1]:9000/a?b=c").unwrap();

        assert_eq!(uri.host(), "::1");
        assert_eq!(uri.port(), 9000);
        assert_eq!(uri.path(), "/a?b=c");
        assert_eq!(uri.authority(), "[::1]:9000");

        assert_eq!(WsUri::parse("ws://[::1]/").unwrap().port(), 80);
    }

    #[test]
    fn rejected() {
        assert_eq!(
            WsUri::parse("wss://host/"),
            Err(UriError::UnsupportedScheme("wss".into()))
        );
        assert_eq!(
            WsUri::parse("http://host/"),
            Err(UriError::UnsupportedScheme("http".into()))
        );
        assert_eq!(
            WsUri::parse("host:80/"),
            Err(UriError::MissingScheme("host:80/".into()))
        );
        assert_eq!(WsUri::parse("ws:///path"), Err(UriError::MissingHost));
        assert_eq!(WsUri::parse("ws://:80/"), Err(UriError::MissingHost));
        assert_eq!(
            WsUri::parse("ws://host:99999/"),
            Err(UriError::InvalidPort("99999".into()))
        );
        assert_eq!(
            WsUri::parse("ws://host:/"),
            Err(UriError::InvalidPort("".into()))
        );
    }
}
