//! Server configuration.

use std::path::Path;
use std::time::Duration;

use greeter_core::ServerError;
use serde::{Deserialize, Serialize};

/// Configuration for the greeting server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the transport listens on (default `"127.0.0.1:50051"`).
    pub listen_addr: String,
    /// Milliseconds between broadcast sweeps.
    pub broadcast_interval_ms: u64,
    /// Text each pushed greeting starts with.
    pub greeting: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:50051".into(),
            broadcast_interval_ms: 100,
            greeting: "hello".into(),
        }
    }
}

impl ServerConfig {
    /// Read a JSON config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ServerError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| ServerError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        if self.listen_addr.trim().is_empty() {
            return Err(ServerError::Config("listen_addr must not be empty".into()));
        }
        if self.broadcast_interval_ms == 0 {
            return Err(ServerError::Config(
                "broadcast_interval_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.listen_addr, "127.0.0.1:50051");
        assert_eq!(cfg.broadcast_interval(), Duration::from_millis(100));
        assert_eq!(cfg.greeting, "hello");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: ServerConfig = serde_json::from_str(r#"{"greeting":"hey"}"#).unwrap();
        assert_eq!(cfg.greeting, "hey");
        assert_eq!(cfg.broadcast_interval_ms, 100);
    }

    #[test]
    fn zero_interval_rejected() {
        let cfg = ServerConfig {
            broadcast_interval_ms: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ServerError::Config(_))));
    }

    #[test]
    fn empty_address_rejected() {
        let cfg = ServerConfig {
            listen_addr: "  ".into(),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_from_file() {
        let path = std::env::temp_dir().join(format!("greeter-config-{}.json", std::process::id()));
        let raw = r#"{"listen_addr":"0.0.0.0:7000","broadcast_interval_ms":250}"#;
        std::fs::write(&path, raw).unwrap();
        let cfg = ServerConfig::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(cfg.listen_addr, "0.0.0.0:7000");
        assert_eq!(cfg.broadcast_interval_ms, 250);
        assert_eq!(cfg.greeting, "hello");
    }

    #[test]
    fn load_rejects_bad_json() {
        let path = std::env::temp_dir().join(format!("greeter-bad-{}.json", std::process::id()));
        std::fs::write(&path, "{not json").unwrap();
        let err = ServerConfig::load(&path).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert_eq!(err.error_kind(), "config");
    }

    #[test]
    fn load_missing_file_is_io() {
        let err = ServerConfig::load(Path::new("/nonexistent/greeter.json")).unwrap_err();
        assert_eq!(err.error_kind(), "io");
    }
}
