//! Configuration structures.
//!
//! Configuration comes from `Config::default()`, a JSON file, or the binary's
//! command line / environment.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::types::{Error, Result};

/// Global bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Native gRPC listener bind address. Port 0 picks an ephemeral port.
    pub native_addr: String,

    /// gRPC-Web listener bind address. Port 0 picks an ephemeral port.
    pub web_addr: String,

    /// Settings shared by both listeners.
    #[serde(default)]
    pub listener: ListenerConfig,

    /// gRPC-Web specific settings.
    #[serde(default)]
    pub web: WebConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            native_addr: "127.0.0.1:50051".to_string(),
            web_addr: "127.0.0.1:8080".to_string(),
            listener: ListenerConfig::default(),
            web: WebConfig::default(),
        }
    }
}

impl Config {
    /// Config binding both listeners to ephemeral loopback ports.
    pub fn ephemeral() -> Self {
        Self {
            native_addr: "127.0.0.1:0".to_string(),
            web_addr: "127.0.0.1:0".to_string(),
            ..Self::default()
        }
    }

    /// Load a JSON config file. Missing sections fall back to their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))
    }

    /// Check that both bind addresses are present and parse.
    pub fn validate(&self) -> Result<(SocketAddr, SocketAddr)> {
        let native = parse_bind_addr("native", &self.native_addr)?;
        let web = parse_bind_addr("web", &self.web_addr)?;
        if self.listener.max_connections == 0 {
            return Err(Error::config("listener.max_connections must be at least 1"));
        }
        Ok((native, web))
    }
}

fn parse_bind_addr(listener: &str, raw: &str) -> Result<SocketAddr> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Error::config(format!("{} bind address is not set", listener)));
    }
    raw.parse()
        .map_err(|e| Error::config(format!("{} bind address {:?}: {}", listener, raw, e)))
}

/// Settings shared by the native and web listeners.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Maximum concurrent TCP connections per listener. Connections beyond
    /// this limit are dropped at accept.
    pub max_connections: usize,

    /// Maximum request body size in bytes. Also caps a single frame.
    pub max_message_bytes: u32,

    /// How long `close` waits for open connections before aborting them.
    #[serde(with = "humantime_serde")]
    pub drain_timeout: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            max_connections: 1000,
            max_message_bytes: 4 * 1024 * 1024,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// gRPC-Web listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    /// Origins allowed by CORS. `"*"` allows any origin.
    pub allowed_origins: Vec<String>,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
        }
    }
}

impl WebConfig {
    /// The `Access-Control-Allow-Origin` value for a request origin, if allowed.
    pub fn allow_origin<'a>(&'a self, origin: Option<&'a str>) -> Option<&'a str> {
        if self.allowed_origins.iter().any(|o| o == "*") {
            return Some(origin.unwrap_or("*"));
        }
        let origin = origin?;
        self.allowed_origins
            .iter()
            .find(|allowed| allowed.as_str() == origin)
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_validates() {
        let (native, web) = Config::default().validate().unwrap();
        assert_eq!(native.port(), 50051);
        assert_eq!(web.port(), 8080);
    }

    #[test]
    fn ephemeral_ports_are_accepted() {
        let (native, web) = Config::ephemeral().validate().unwrap();
        assert_eq!(native.port(), 0);
        assert_eq!(web.port(), 0);
    }

    #[test]
    fn missing_address_is_rejected() {
        let config = Config {
            web_addr: "  ".to_string(),
            ..Config::ephemeral()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::Config(ref m) if m.contains("web")));
    }

    #[test]
    fn unparsable_address_is_rejected() {
        let config = Config {
            native_addr: "localhost".to_string(),
            ..Config::ephemeral()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn json_file_fills_missing_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"native_addr": "0.0.0.0:9000", "web_addr": "0.0.0.0:9001",
                "listener": {{"max_connections": 8, "max_message_bytes": 1024, "drain_timeout": "250ms"}}}}"#
        )
        .unwrap();

        let config = Config::from_json_file(file.path()).unwrap();
        assert_eq!(config.listener.max_connections, 8);
        assert_eq!(config.listener.drain_timeout, Duration::from_millis(250));
        assert_eq!(config.web.allowed_origins, vec!["*".to_string()]);
    }

    #[test]
    fn cors_origin_matching() {
        let open = WebConfig::default();
        assert_eq!(open.allow_origin(Some("https://app.example")), Some("https://app.example"));
        assert_eq!(open.allow_origin(None), Some("*"));

        let strict = WebConfig {
            allowed_origins: vec!["https://app.example".to_string()],
        };
        assert_eq!(strict.allow_origin(Some("https://app.example")), Some("https://app.example"));
        assert_eq!(strict.allow_origin(Some("https://evil.example")), None);
        assert_eq!(strict.allow_origin(None), None);
    }
}
