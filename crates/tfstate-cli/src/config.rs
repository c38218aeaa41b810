//! Configuration loading and types

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use eyre::WrapErr;
use serde::{Deserialize, Serialize};
use tfstate_core::{ReaderConfig, RetryPolicies, StateLayout, StateSync};
use tfstate_store::{KubeStore, MemoryStore, ObjectStore};

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "TFSTATE_CONFIG";

/// Top-level configuration for the tfstate tool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Object store connection
    #[serde(default)]
    pub store: StoreConfig,
    /// Namespaces records live in
    #[serde(default)]
    pub layout: StateLayout,
    /// Retry budgets
    #[serde(default)]
    pub retry: RetryPolicies,
    /// Fleet reader behaviour
    #[serde(default)]
    pub reader: ReaderConfig,
    /// Logging
    #[serde(default)]
    pub log: LogConfig,
}

/// Object store connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// API server URL
    #[serde(default = "default_server")]
    pub server: String,
    /// Bearer token
    #[serde(default)]
    pub token: Option<String>,
    /// File holding the bearer token, read when `token` is unset
    #[serde(default)]
    pub token_file: Option<PathBuf>,
    /// Per-request timeout
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Keep records in process memory instead of a remote API
    #[serde(default)]
    pub memory: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
            token: None,
            token_file: None,
            timeout: default_timeout(),
            memory: false,
        }
    }
}

fn default_server() -> String {
    "https://kubernetes.default.svc".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error), `RUST_LOG` wins
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of plain text
    #[serde(default)]
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("reading config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .wrap_err_with(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Load from an explicit path, the environment, default paths, or use
    /// defaults
    ///
    /// Returns the file the configuration came from, if any.
    ///
    /// # Errors
    /// Returns error if the chosen file cannot be read or parsed
    pub fn resolve(explicit: Option<&Path>) -> eyre::Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            return Ok((Self::load(path)?, Some(path.to_path_buf())));
        }

        if let Ok(path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(path);
            return Ok((Self::load(&path)?, Some(path)));
        }

        match default_paths().into_iter().find(|p| p.exists()) {
            Some(path) => Ok((Self::load(&path)?, Some(path))),
            None => Ok((Config::default(), None)),
        }
    }

    /// Bearer token from the config or the token file
    ///
    /// # Errors
    /// Returns error if the token file cannot be read
    pub fn token(&self) -> eyre::Result<Option<String>> {
        if let Some(token) = &self.store.token {
            return Ok(Some(token.clone()));
        }
        match &self.store.token_file {
            Some(path) => {
                let token = std::fs::read_to_string(path)
                    .wrap_err_with(|| format!("reading token file {}", path.display()))?;
                Ok(Some(token.trim().to_string()))
            }
            None => Ok(None),
        }
    }

    /// Build the configured store backend
    ///
    /// # Errors
    /// Returns error if the token cannot be read or the server URL is invalid
    pub fn build_store(&self) -> eyre::Result<Arc<dyn ObjectStore>> {
        if self.store.memory {
            return Ok(Arc::new(MemoryStore::new()));
        }
        let store = KubeStore::new(&self.store.server, self.token()?, self.store.timeout)?;
        Ok(Arc::new(store))
    }

    /// Build the engine over `store`
    #[must_use]
    pub fn engine(&self, store: Arc<dyn ObjectStore>) -> StateSync {
        StateSync::new(store)
            .with_layout(self.layout.clone())
            .with_retry(self.retry)
            .with_reader(self.reader)
    }
}

fn default_paths() -> Vec<PathBuf> {
    let mut paths = vec![
        PathBuf::from("tfstate.toml"),
        PathBuf::from("/etc/tfstate/tfstate.toml"),
    ];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("tfstate/tfstate.toml"));
    }
    paths
}
