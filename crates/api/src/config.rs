use std::str::FromStr;
use std::time::Duration;

use relay_backend::retry::RetryPolicy;
use relay_core::endpoint::BackendEndpoint;
use relay_core::error::CoreError;

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for a single host running ten
/// backends on ports 2000-2009. In production, override via environment
/// variables (or a `.env` file).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `6006`).
    pub port: u16,
    /// Allowed CORS origins; `*` allows any origin.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `60`).
    pub request_timeout_secs: u64,
    /// Grace period for background tasks and sessions at shutdown (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// Backend pool members, in configuration order.
    pub backends: Vec<BackendEndpoint>,
    /// Timeout for submit, history and upload calls (default: `30`).
    pub backend_timeout_secs: u64,
    /// Skip TLS certificate verification for `https` backends (default: `false`).
    pub backend_insecure_tls: bool,
    /// Affinity entry lifetime in seconds (default: `1800`).
    pub affinity_ttl_secs: u64,
    /// Affinity sweep period in seconds (default: `600`).
    pub affinity_sweep_interval_secs: u64,
    /// Polling budget for `/view` while an artifact's affinity is unknown.
    pub artifact_fetch: RetryPolicy,
    /// Per-backend connect budget for WebSocket sessions.
    pub ws_connect: RetryPolicy,
    /// Bound on a single backend WebSocket handshake in seconds (default: `5`).
    pub ws_connect_timeout_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                        | Default              |
    /// |--------------------------------|----------------------|
    /// | `HOST`                         | `0.0.0.0`            |
    /// | `PORT`                         | `6006`               |
    /// | `CORS_ORIGINS`                 | `*`                  |
    /// | `REQUEST_TIMEOUT_SECS`         | `60`                 |
    /// | `SHUTDOWN_TIMEOUT_SECS`        | `30`                 |
    /// | `BACKEND_URLS`                 | (unset)              |
    /// | `BACKEND_BASE_URLS`            | `http://127.0.0.1`   |
    /// | `BACKEND_PORTS`                | `2000-2009`          |
    /// | `BACKEND_TIMEOUT_SECS`         | `30`                 |
    /// | `BACKEND_INSECURE_TLS`         | `false`              |
    /// | `AFFINITY_TTL_SECS`            | `1800`               |
    /// | `AFFINITY_SWEEP_INTERVAL_SECS` | `600`                |
    /// | `ARTIFACT_FETCH_ATTEMPTS`      | `15`                 |
    /// | `ARTIFACT_FETCH_DELAY_MS`      | `1000`               |
    /// | `WS_CONNECT_ATTEMPTS`          | `30`                 |
    /// | `WS_CONNECT_DELAY_MS`          | `2000`               |
    /// | `WS_CONNECT_TIMEOUT_SECS`      | `5`                  |
    ///
    /// `BACKEND_URLS` is a comma-separated list of full base URLs and wins
    /// when set. Otherwise every `BACKEND_BASE_URLS` host is combined with
    /// every port in `BACKEND_PORTS` (`a-b` range or comma list).
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CoreError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let host = var("HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = parse_or(&var, "PORT", 6006u16)?;

        let cors_origins = split_list(&var("CORS_ORIGINS").unwrap_or_else(|| "*".into()));

        let request_timeout_secs = parse_or(&var, "REQUEST_TIMEOUT_SECS", 60u64)?;
        let shutdown_timeout_secs = parse_or(&var, "SHUTDOWN_TIMEOUT_SECS", 30u64)?;

        let backends = match var("BACKEND_URLS") {
            Some(urls) => split_list(&urls)
                .iter()
                .map(|u| u.parse())
                .collect::<Result<Vec<BackendEndpoint>, _>>()?,
            None => {
                let bases =
                    split_list(&var("BACKEND_BASE_URLS").unwrap_or_else(|| "http://127.0.0.1".into()));
                let ports = parse_ports(&var("BACKEND_PORTS").unwrap_or_else(|| "2000-2009".into()))?;
                let mut backends = Vec::with_capacity(bases.len() * ports.len());
                for base in &bases {
                    let base: BackendEndpoint = base.parse()?;
                    backends.extend(ports.iter().map(|p| base.with_port(*p)));
                }
                backends
            }
        };

        let backend_timeout_secs = parse_or(&var, "BACKEND_TIMEOUT_SECS", 30u64)?;
        let backend_insecure_tls = parse_or(&var, "BACKEND_INSECURE_TLS", false)?;

        let affinity_ttl_secs = parse_or(&var, "AFFINITY_TTL_SECS", 1800u64)?;
        let affinity_sweep_interval_secs = parse_or(&var, "AFFINITY_SWEEP_INTERVAL_SECS", 600u64)?;
        if affinity_sweep_interval_secs == 0 {
            return Err(CoreError::Validation(
                "AFFINITY_SWEEP_INTERVAL_SECS must be greater than zero".into(),
            ));
        }

        let artifact_fetch = RetryPolicy::new(
            parse_or(&var, "ARTIFACT_FETCH_ATTEMPTS", 15u32)?,
            Duration::from_millis(parse_or(&var, "ARTIFACT_FETCH_DELAY_MS", 1000u64)?),
        );
        let ws_connect = RetryPolicy::new(
            parse_or(&var, "WS_CONNECT_ATTEMPTS", 30u32)?,
            Duration::from_millis(parse_or(&var, "WS_CONNECT_DELAY_MS", 2000u64)?),
        );
        let ws_connect_timeout_secs = parse_or(&var, "WS_CONNECT_TIMEOUT_SECS", 5u64)?;

        Ok(Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            backends,
            backend_timeout_secs,
            backend_insecure_tls,
            affinity_ttl_secs,
            affinity_sweep_interval_secs,
            artifact_fetch,
            ws_connect,
            ws_connect_timeout_secs,
        })
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }

    pub fn affinity_ttl(&self) -> Duration {
        Duration::from_secs(self.affinity_ttl_secs)
    }

    pub fn affinity_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.affinity_sweep_interval_secs)
    }

    pub fn ws_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.ws_connect_timeout_secs)
    }
}

fn parse_or<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, CoreError> {
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| CoreError::Validation(format!("{name} has an invalid value: '{raw}'"))),
        None => Ok(default),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse a port spec: an inclusive range `2000-2009`, a comma list
/// `2000,2002`, or a mix of both.
pub fn parse_ports(spec: &str) -> Result<Vec<u16>, CoreError> {
    let invalid = || CoreError::Validation(format!("Invalid port spec '{spec}'"));
    let mut ports = Vec::new();

    for item in split_list(spec) {
        match item.split_once('-') {
            Some((start, end)) => {
                let start: u16 = start.trim().parse().map_err(|_| invalid())?;
                let end: u16 = end.trim().parse().map_err(|_| invalid())?;
                if start > end {
                    return Err(invalid());
                }
                ports.extend(start..=end);
            }
            None => ports.push(item.parse().map_err(|_| invalid())?),
        }
    }

    if ports.is_empty() {
        return Err(invalid());
    }
    Ok(ports)
}
