//! Agent and server configuration.
//!
//! Each binary gathers a *settings* layer from the command line (clap also
//! reads environment variables) and another from an optional TOML file,
//! then resolves them into a concrete config object with defaults filled
//! in. The resolved config is passed to each component explicitly.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;

/// Load a TOML settings file.
pub fn load_file<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

fn non_empty(key: Option<String>) -> Option<String> {
    key.filter(|k| !k.is_empty())
}

// ── Agent ──────────────────────────────────────────────────────────

/// Resolved agent configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    /// Server `host:port`.
    pub address: String,
    /// Collector sampling interval.
    pub poll_interval: Duration,
    /// Synchronizer push interval.
    pub report_interval: Duration,
    /// Shared signing key; `None` disables signing.
    pub key: Option<String>,
    /// Upper bound on a single push request.
    pub request_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            address: "localhost:8080".to_string(),
            poll_interval: Duration::from_secs(2),
            report_interval: Duration::from_secs(10),
            key: None,
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// One layer of agent settings. Unset fields fall through to the next layer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentSettings {
    pub address: Option<String>,
    #[serde(default, with = "humantime_serde")]
    pub poll_interval: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub report_interval: Option<Duration>,
    pub key: Option<String>,
    #[serde(default, with = "humantime_serde")]
    pub request_timeout: Option<Duration>,
}

impl AgentSettings {
    /// Fill unset fields from `lower`.
    pub fn or(self, lower: AgentSettings) -> AgentSettings {
        AgentSettings {
            address: self.address.or(lower.address),
            poll_interval: self.poll_interval.or(lower.poll_interval),
            report_interval: self.report_interval.or(lower.report_interval),
            key: self.key.or(lower.key),
            request_timeout: self.request_timeout.or(lower.request_timeout),
        }
    }

    pub fn resolve(self) -> AgentConfig {
        let d = AgentConfig::default();
        AgentConfig {
            address: self.address.unwrap_or(d.address),
            poll_interval: self.poll_interval.unwrap_or(d.poll_interval),
            report_interval: self.report_interval.unwrap_or(d.report_interval),
            key: non_empty(self.key),
            request_timeout: self.request_timeout.unwrap_or(d.request_timeout),
        }
    }
}

// ── Server ─────────────────────────────────────────────────────────

/// Resolved server configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Listen address, `host:port`.
    pub address: String,
    /// Snapshot flush interval; zero flushes after every applied batch.
    pub store_interval: Duration,
    /// Snapshot file path.
    pub store_file: PathBuf,
    /// Restore the snapshot file at startup.
    pub restore: bool,
    /// Shared signing key; `None` disables verification.
    pub key: Option<String>,
    /// PostgreSQL connection string; `None` selects the in-memory store.
    pub database_dsn: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "localhost:8080".to_string(),
            store_interval: Duration::from_secs(300),
            store_file: PathBuf::from("/tmp/metrics-db.json"),
            restore: true,
            key: None,
            database_dsn: None,
        }
    }
}

/// One layer of server settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerSettings {
    pub address: Option<String>,
    #[serde(default, with = "humantime_serde")]
    pub store_interval: Option<Duration>,
    pub store_file: Option<PathBuf>,
    pub restore: Option<bool>,
    pub key: Option<String>,
    pub database_dsn: Option<String>,
}

impl ServerSettings {
    /// Fill unset fields from `lower`.
    pub fn or(self, lower: ServerSettings) -> ServerSettings {
        ServerSettings {
            address: self.address.or(lower.address),
            store_interval: self.store_interval.or(lower.store_interval),
            store_file: self.store_file.or(lower.store_file),
            restore: self.restore.or(lower.restore),
            key: self.key.or(lower.key),
            database_dsn: self.database_dsn.or(lower.database_dsn),
        }
    }

    pub fn resolve(self) -> ServerConfig {
        let d = ServerConfig::default();
        ServerConfig {
            address: self.address.unwrap_or(d.address),
            store_interval: self.store_interval.unwrap_or(d.store_interval),
            store_file: self.store_file.unwrap_or(d.store_file),
            restore: self.restore.unwrap_or(d.restore),
            key: non_empty(self.key),
            database_dsn: non_empty(self.database_dsn),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_defaults() {
        let cfg = AgentSettings::default().resolve();
        assert_eq!(cfg, AgentConfig::default());
        assert_eq!(cfg.poll_interval, Duration::from_secs(2));
        assert_eq!(cfg.report_interval, Duration::from_secs(10));
    }

    #[test]
    fn agent_cli_layer_wins_over_file() {
        let cli = AgentSettings {
            report_interval: Some(Duration::from_secs(3)),
            ..Default::default()
        };
        let file: AgentSettings = toml::from_str(
            r#"
address = "metrics.internal:9000"
report_interval = "20s"
poll_interval = "500ms"
"#,
        )
        .unwrap();

        let cfg = cli.or(file).resolve();
        assert_eq!(cfg.address, "metrics.internal:9000");
        assert_eq!(cfg.report_interval, Duration::from_secs(3));
        assert_eq!(cfg.poll_interval, Duration::from_millis(500));
    }

    #[test]
    fn empty_key_resolves_to_none() {
        let cfg = AgentSettings {
            key: Some(String::new()),
            ..Default::default()
        }
        .resolve();
        assert!(cfg.key.is_none());
    }

    #[test]
    fn server_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        std::fs::write(
            &path,
            r#"
address = "0.0.0.0:8082"
restore = false
store_interval = "1s"
store_file = "test/file/path"
database_dsn = "postgres://metrics@localhost/metrics"
key = "test key"
"#,
        )
        .unwrap();

        let file: ServerSettings = load_file(&path).unwrap();
        let cfg = ServerSettings::default().or(file).resolve();
        assert_eq!(cfg.address, "0.0.0.0:8082");
        assert!(!cfg.restore);
        assert_eq!(cfg.store_interval, Duration::from_secs(1));
        assert_eq!(cfg.store_file, PathBuf::from("test/file/path"));
        assert_eq!(cfg.database_dsn.as_deref(), Some("postgres://metrics@localhost/metrics"));
        assert_eq!(cfg.key.as_deref(), Some("test key"));
    }

    #[test]
    fn server_zero_interval_is_kept() {
        let cfg = ServerSettings {
            store_interval: Some(Duration::ZERO),
            ..Default::default()
        }
        .resolve();
        assert!(cfg.store_interval.is_zero());
        assert!(cfg.restore);
    }

    #[test]
    fn missing_file_is_an_error() {
        let res: anyhow::Result<ServerSettings> = load_file(Path::new("/nonexistent/tally.toml"));
        assert!(res.is_err());
    }
}
