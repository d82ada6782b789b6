use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

/// Environment variable naming a YAML configuration file.
pub const CONFIG_ENV: &str = "RELAY_CONFIG";
/// Environment variable overriding the primary listen address.
pub const LISTEN_ENV: &str = "LISTEN";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_addr: String,
    /// Further listening sockets served by the same reactor.
    pub extra_listen_addrs: Vec<String>,
    /// Worker threads executing protocol work.
    pub workers: usize,
    /// Capacity of the ready-event buffer filled by one reactor wait.
    pub max_events: usize,
    pub static_root: PathBuf,
    pub index_file: String,
    pub dashboard_file: String,
    pub session_id: String,
    pub max_frame_len: usize,
    pub max_header_bytes: usize,
    /// Largest `Content-Length` accepted; bigger requests get 413.
    pub max_body_bytes: usize,
    /// Install the SIGINT handler when the server starts.
    pub handle_sigint: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            extra_listen_addrs: Vec::new(),
            workers: 4,
            max_events: 1024,
            static_root: PathBuf::from("."),
            index_file: "html/index.html".to_string(),
            dashboard_file: "html/dashboard.html".to_string(),
            session_id: "12345".to_string(),
            max_frame_len: 16 * 1024 * 1024,
            max_header_bytes: 64 * 1024,
            max_body_bytes: 1024 * 1024,
            handle_sigint: true,
        }
    }
}

impl Config {
    /// Builds the configuration from the environment.
    ///
    /// `RELAY_CONFIG` points at an optional YAML file; `LISTEN` overrides the
    /// listen address either way.
    pub fn load() -> anyhow::Result<Self> {
        let mut cfg = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };

        if let Ok(addr) = std::env::var(LISTEN_ENV) {
            cfg.listen_addr = addr;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml_str(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> anyhow::Result<Self> {
        let cfg: Config = serde_yaml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.workers == 0 {
            anyhow::bail!("workers must be at least 1");
        }
        if self.max_events == 0 {
            anyhow::bail!("max_events must be at least 1");
        }
        Ok(())
    }
}
