//! Runtime configuration for lazy-asset-cache.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! Missing sections and fields fall back to their defaults.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "lazy-asset-cache", about = "Two-tier asset cache with coalesced fetching")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// HTTP listen address (overrides the config file).
    #[arg(long)]
    pub listen: Option<String>,

    /// Cache directory (overrides the config file).
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Directory non-HTTP locators are read from (overrides the config file).
    #[arg(long)]
    pub file_root: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Serve the cache over HTTP (default).
    Serve,

    /// Resolve locators into the cache and report what was found.
    Warm {
        /// Locators (paths, file:// or http(s):// URLs).
        #[arg(required = true)]
        locators: Vec<String>,

        /// Keep fetched bytes in memory only.
        #[arg(long)]
        no_persist: bool,
    },
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cache tiers.
    pub cache: CacheConfig,

    /// Bundled fetchers.
    pub fetch: FetchConfig,

    /// Row binding behaviour.
    pub rows: RowConfig,

    /// HTTP server.
    pub server: ServerConfig,
}

/// Tier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding one file per persisted locator.
    pub directory: PathBuf,

    /// Persist fetched bytes unless a request says otherwise.
    pub persist: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: std::env::temp_dir().join("lazy-asset-cache"),
            persist: true,
        }
    }
}

/// Settings for the bundled HTTP fetcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Whole-request timeout in seconds.
    pub timeout_secs: u64,

    /// User-Agent header.
    pub user_agent: String,

    /// Directory the server may read non-HTTP locators from. Unset means
    /// only `http(s)://` locators are served.
    pub file_root: Option<PathBuf>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: format!("lazy-asset-cache/{}", env!("CARGO_PKG_VERSION")),
            file_root: None,
        }
    }
}

/// What a reconciliation sweep does for visible rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcilePolicy {
    /// Scroll-phase hooks do nothing.
    Disabled,
    /// Start deferred rows and rebind rows whose locator changed.
    #[default]
    ReassertPending,
    /// Like `ReassertPending`, and also retry rows whose last load failed.
    RetryFailed,
}

/// Row binding settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RowConfig {
    /// Hold off network/disk loads while the list is being dragged or is
    /// decelerating; memory hits are still delivered.
    pub defer_while_scrolling: bool,

    /// Sweep behaviour on scroll end.
    pub reconcile: ReconcilePolicy,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. "127.0.0.1:8090").
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8090".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// Apply command-line overrides.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(listen) = &cli.listen {
            self.server.listen = listen.clone();
        }
        if let Some(dir) = &cli.cache_dir {
            self.cache.directory = dir.clone();
        }
        if let Some(root) = &cli.file_root {
            self.fetch.file_root = Some(root.clone());
        }
    }
}
