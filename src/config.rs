//! Configuration: defaults, optional `config.toml`, env var overrides.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Runtime settings for the daemon and CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Directory holding the database and any working files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Organization the CLI operates as. Every row is tenant-scoped.
    #[serde(default = "default_org_id")]
    pub org_id: String,

    /// Extraction worker base URL.
    #[serde(default = "default_worker_url")]
    pub worker_url: String,

    /// Bearer token for the extraction worker, if it wants one.
    #[serde(default)]
    pub worker_api_key: Option<String>,

    /// API server bind address.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Seconds between scheduler passes.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Seconds between delivery sweeps.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Concurrent watch runs per scheduler pass.
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,

    /// Concurrent delivery attempts per sweep.
    #[serde(default = "default_max_concurrent_deliveries")]
    pub max_concurrent_deliveries: usize,

    /// Seconds before an extraction call counts as a failed run.
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,

    /// Consecutive failures before a watch flips to error status.
    #[serde(default = "default_failure_ceiling")]
    pub failure_ceiling: u32,

    /// Base delay for the delivery retry backoff, in seconds.
    #[serde(default = "default_retry_base")]
    pub retry_base_secs: u64,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_org_id() -> String {
    "default".to_string()
}

fn default_worker_url() -> String {
    "http://localhost:8081".to_string()
}

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_poll_interval() -> u64 {
    30
}

fn default_sweep_interval() -> u64 {
    10
}

fn default_max_concurrent_runs() -> usize {
    4
}

fn default_max_concurrent_deliveries() -> usize {
    3
}

fn default_run_timeout() -> u64 {
    120
}

fn default_failure_ceiling() -> u32 {
    3
}

fn default_retry_base() -> u64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            org_id: default_org_id(),
            worker_url: default_worker_url(),
            worker_api_key: None,
            listen_addr: default_listen_addr(),
            poll_interval_secs: default_poll_interval(),
            sweep_interval_secs: default_sweep_interval(),
            max_concurrent_runs: default_max_concurrent_runs(),
            max_concurrent_deliveries: default_max_concurrent_deliveries(),
            run_timeout_secs: default_run_timeout(),
            failure_ceiling: default_failure_ceiling(),
            retry_base_secs: default_retry_base(),
        }
    }
}

impl Settings {
    /// Load settings: defaults, then `config.toml` if present, then env.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut settings = match config_path {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("parsing config file {}", path.display()))?
            }
            None => {
                let default_path = Path::new("config.toml");
                if default_path.exists() {
                    let raw = fs::read_to_string(default_path)
                        .context("reading config.toml")?;
                    toml::from_str(&raw).context("parsing config.toml")?
                } else {
                    Settings::default()
                }
            }
        };
        settings.apply_env();
        Ok(settings)
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("PAGEWATCH_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("PAGEWATCH_ORG_ID") {
            self.org_id = v;
        }
        if let Ok(v) = std::env::var("PAGEWATCH_WORKER_URL") {
            self.worker_url = v;
        }
        if let Ok(v) = std::env::var("PAGEWATCH_WORKER_API_KEY") {
            self.worker_api_key = Some(v);
        }
        if let Ok(v) = std::env::var("PAGEWATCH_LISTEN_ADDR") {
            self.listen_addr = v;
        }
        if let Ok(v) = std::env::var("PAGEWATCH_POLL_INTERVAL_SECS") {
            if let Ok(n) = v.parse() {
                self.poll_interval_secs = n;
            }
        }
        if let Ok(v) = std::env::var("PAGEWATCH_SWEEP_INTERVAL_SECS") {
            if let Ok(n) = v.parse() {
                self.sweep_interval_secs = n;
            }
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("pagewatch.db")
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    pub fn retry_base(&self) -> Duration {
        Duration::from_secs(self.retry_base_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.poll_interval_secs, 30);
        assert_eq!(settings.sweep_interval_secs, 10);
        assert_eq!(settings.max_concurrent_runs, 4);
        assert_eq!(settings.failure_ceiling, 3);
        assert_eq!(settings.database_path(), PathBuf::from("./data/pagewatch.db"));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let settings: Settings =
            toml::from_str("worker_url = \"http://worker:9000\"\npoll_interval_secs = 5\n")
                .unwrap();
        assert_eq!(settings.worker_url, "http://worker:9000");
        assert_eq!(settings.poll_interval_secs, 5);
        assert_eq!(settings.sweep_interval_secs, 10);
    }
}
