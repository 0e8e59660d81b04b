//! TOML configuration for batchlink.
//!
//! Every section falls back to compiled-in defaults, so an empty file (or no
//! file at all) yields a working local setup: both channels on `127.0.0.1`,
//! tasks on port 5000 and results on port 5001.

use std::net::SocketAddr;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Environment variable naming a config file to load.
pub const CONFIG_ENV: &str = "BATCHLINK_CONFIG";

/// Config file picked up from the working directory when nothing else is set.
pub const LOCAL_CONFIG_FILE: &str = "batchlink.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for both the coordinator and the peer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchlinkConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub accel: AccelConfig,
    #[serde(default)]
    pub peer: PeerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl BatchlinkConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded batchlink configuration");
        Ok(config)
    }

    /// Resolve configuration in order:
    /// 1. An explicit path (from `--config`); failing to load it is an error.
    /// 2. The path in `BATCHLINK_CONFIG`.
    /// 3. `./batchlink.toml`.
    /// 4. Compiled-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "BATCHLINK_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let local = Path::new(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load(local) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %local.display(),
                        error = %e,
                        "local config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }
}

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

/// Where the remote peer listens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Host of the remote peer (both channels).
    pub host: String,
    /// Port of the outbound tasks channel.
    pub tasks_port: u16,
    /// Port of the inbound results channel.
    pub results_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            tasks_port: 5000,
            results_port: 5001,
        }
    }
}

impl NetworkConfig {
    pub fn tasks_addr(&self) -> Result<SocketAddr> {
        socket_addr(&self.host, self.tasks_port)
    }

    pub fn results_addr(&self) -> Result<SocketAddr> {
        socket_addr(&self.host, self.results_port)
    }
}

fn socket_addr(host: &str, port: u16) -> Result<SocketAddr> {
    let ip: std::net::IpAddr = host
        .parse()
        .with_context(|| format!("invalid host address: {}", host))?;
    Ok(SocketAddr::new(ip, port))
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

/// Thresholds a record must meet to enter the batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Minimum `games * winning`.
    pub min_score: f64,
    /// Minimum winning rate.
    pub min_winning: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_score: 400.0,
            min_winning: 50.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Accelerator
// ---------------------------------------------------------------------------

/// Which accelerator backend the manager may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum BackendPreference {
    /// GPU only; no adapter means `DeviceUnavailable`.
    Gpu,
    /// Multi-threaded CPU implementation.
    Cpu,
    /// GPU when an adapter exists, CPU otherwise.
    Auto,
}

/// Accelerator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccelConfig {
    pub backend: BackendPreference,
    /// Mixing rounds per record.
    pub rounds: u32,
    /// Compute only the first `max_items` records (0 = all). The rest stay 0.
    pub max_items: usize,
}

impl Default for AccelConfig {
    fn default() -> Self {
        Self {
            backend: BackendPreference::Gpu,
            rounds: 600_000,
            max_items: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Peer
// ---------------------------------------------------------------------------

/// Settings for the `peer` subcommand.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Concurrent hashing workers (0 = one less than the CPU count, min 1).
    pub workers: usize,
    /// SHA-256 rounds per task.
    pub rounds: u32,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            rounds: 60_000,
        }
    }
}

impl PeerConfig {
    /// Worker count with the `0 = auto` rule applied.
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        cpus.saturating_sub(1).max(1)
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = BatchlinkConfig::default();

        assert_eq!(cfg.network.host, "127.0.0.1");
        assert_eq!(cfg.network.tasks_port, 5000);
        assert_eq!(cfg.network.results_port, 5001);

        assert_eq!(cfg.filter.min_score, 400.0);
        assert_eq!(cfg.filter.min_winning, 50.0);

        assert_eq!(cfg.accel.backend, BackendPreference::Gpu);
        assert_eq!(cfg.accel.rounds, 600_000);
        assert_eq!(cfg.accel.max_items, 0);

        assert_eq!(cfg.peer.workers, 0);
        assert_eq!(cfg.peer.rounds, 60_000);
        assert!(cfg.peer.effective_workers() >= 1);

        assert_eq!(cfg.logging.level, "info");
        assert!(!cfg.logging.json);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[network]
host = "10.0.0.7"
tasks_port = 6000
results_port = 6001

[filter]
min_score = 100.0
min_winning = 10.5

[accel]
backend = "auto"
rounds = 1000
max_items = 8

[peer]
workers = 3
rounds = 10

[logging]
level = "debug"
json = true
"#;

        let cfg: BatchlinkConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(cfg.network.tasks_addr().unwrap(), "10.0.0.7:6000".parse().unwrap());
        assert_eq!(cfg.network.results_addr().unwrap(), "10.0.0.7:6001".parse().unwrap());
        assert_eq!(cfg.filter.min_score, 100.0);
        assert_eq!(cfg.filter.min_winning, 10.5);
        assert_eq!(cfg.accel.backend, BackendPreference::Auto);
        assert_eq!(cfg.accel.rounds, 1000);
        assert_eq!(cfg.accel.max_items, 8);
        assert_eq!(cfg.peer.effective_workers(), 3);
        assert_eq!(cfg.peer.rounds, 10);
        assert_eq!(cfg.logging.level, "debug");
        assert!(cfg.logging.json);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let cfg: BatchlinkConfig = toml::from_str("[network]\ntasks_port = 7000\n").unwrap();

        assert_eq!(cfg.network.tasks_port, 7000);
        assert_eq!(cfg.network.results_port, 5001);
        assert_eq!(cfg.network.host, "127.0.0.1");
        assert_eq!(cfg.accel.rounds, 600_000);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn test_invalid_host_rejected() {
        let net = NetworkConfig {
            host: "not-an-ip".to_string(),
            ..NetworkConfig::default()
        };
        assert!(net.tasks_addr().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("batchlink.toml");
        std::fs::write(&path, "[accel]\nbackend = \"cpu\"\n").unwrap();

        let cfg = BatchlinkConfig::load(&path).unwrap();
        assert_eq!(cfg.accel.backend, BackendPreference::Cpu);

        let resolved = BatchlinkConfig::resolve(Some(&path)).unwrap();
        assert_eq!(resolved.accel.backend, BackendPreference::Cpu);
    }

    #[test]
    fn test_explicit_missing_file_errors() {
        let result = BatchlinkConfig::resolve(Some(Path::new("/nonexistent/batchlink.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let cfg = BatchlinkConfig::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let roundtripped: BatchlinkConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(cfg.network.results_port, roundtripped.network.results_port);
        assert_eq!(cfg.accel.backend, roundtripped.accel.backend);
        assert_eq!(cfg.peer.rounds, roundtripped.peer.rounds);
    }
}
