//! Backend endpoint addressing.
//!
//! A [`BackendEndpoint`] is the scheme, host and port of one backend
//! worker. It is enough to build both the HTTP base URL (`http://host:port`)
//! and the WebSocket base URL (`ws://host:port`) for that worker.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::error::CoreError;

/// Transport security of a backend endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    fn default_port(self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }

    fn http(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    fn ws(self) -> &'static str {
        match self {
            Scheme::Http => "ws",
            Scheme::Https => "wss",
        }
    }
}

/// Network address of a single backend worker.
///
/// Immutable once configured. Two endpoints are equal when scheme, host
/// and port all match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendEndpoint {
    scheme: Scheme,
    host: String,
    port: u16,
}

impl BackendEndpoint {
    pub fn new(scheme: Scheme, host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme,
            host: host.into(),
            port,
        }
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Same host and scheme, different port.
    pub fn with_port(&self, port: u16) -> Self {
        Self {
            port,
            ..self.clone()
        }
    }

    /// HTTP base URL without a trailing slash, e.g. `http://127.0.0.1:2000`.
    pub fn http_url(&self) -> String {
        format!("{}://{}:{}", self.scheme.http(), self.host, self.port)
    }

    /// WebSocket base URL without a trailing slash, e.g. `ws://127.0.0.1:2000`.
    pub fn ws_url(&self) -> String {
        format!("{}://{}:{}", self.scheme.ws(), self.host, self.port)
    }
}

impl fmt::Display for BackendEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.http_url())
    }
}

impl Serialize for BackendEndpoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.http_url())
    }
}

impl FromStr for BackendEndpoint {
    type Err = CoreError;

    /// Parse `http[s]://host[:port]` (a trailing `/` is tolerated).
    ///
    /// Bracketed IPv6 hosts (`http://[::1]:2000`) are accepted. Paths,
    /// queries and other schemes are rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |why: &str| CoreError::Validation(format!("Invalid backend URL '{s}': {why}"));

        let trimmed = s.trim().trim_end_matches('/');
        let (scheme, rest) = if let Some(rest) = trimmed.strip_prefix("http://") {
            (Scheme::Http, rest)
        } else if let Some(rest) = trimmed.strip_prefix("https://") {
            (Scheme::Https, rest)
        } else {
            return Err(invalid("expected http:// or https://"));
        };

        if rest.contains(['/', '?', '#']) {
            return Err(invalid("paths and queries are not allowed"));
        }

        let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
            let (host, after) = bracketed
                .split_once(']')
                .ok_or_else(|| invalid("unterminated IPv6 host"))?;
            let port = match after.strip_prefix(':') {
                Some(p) => Some(p),
                None if after.is_empty() => None,
                None => return Err(invalid("unexpected characters after host")),
            };
            (format!("[{host}]"), port)
        } else {
            match rest.rsplit_once(':') {
                Some((host, port)) => (host.to_string(), Some(port)),
                None => (rest.to_string(), None),
            }
        };

        if host.is_empty() || host == "[]" {
            return Err(invalid("missing host"));
        }

        let port = match port {
            Some(p) => p.parse::<u16>().map_err(|_| invalid("port must be a valid u16"))?,
            None => scheme.default_port(),
        };

        Ok(Self { scheme, host, port })
    }
}
