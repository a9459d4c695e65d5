//! Application configuration for the statute scraper.
//!
//! User config lives at `~/.sso-scrape/sso-scrape.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, SsoError};
use crate::site::DEFAULT_BASE_URL;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "sso-scrape.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".sso-scrape";

// ---------------------------------------------------------------------------
// Config structs (matching sso-scrape.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Remote site settings.
    #[serde(default)]
    pub site: SiteConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Default destination folder.
    #[serde(default = "default_save_to")]
    pub save_to: String,

    /// Documents assembled concurrently.
    #[serde(default = "default_concurrency")]
    pub document_concurrency: u32,

    /// Fragment fetches in flight per document.
    #[serde(default = "default_concurrency")]
    pub fragment_concurrency: u32,

    /// Per-request timeout.
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            save_to: default_save_to(),
            document_concurrency: default_concurrency(),
            fragment_concurrency: default_concurrency(),
            request_timeout_secs: default_timeout(),
        }
    }
}

fn default_save_to() -> String {
    "./data".into()
}
fn default_concurrency() -> u32 {
    4
}
fn default_timeout() -> u64 {
    30
}

/// `[site]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Origin of the legislation site.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Browser-identifying User-Agent; the lazy-load endpoint rejects default agents.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Accept header sent with every request.
    #[serde(default = "default_accept")]
    pub accept: String,

    /// Rows requested per listing page.
    #[serde(default = "default_page_size")]
    pub listing_page_size: u32,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            accept: default_accept(),
            listing_page_size: default_page_size(),
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.into()
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:62.0) Gecko/20100101 Firefox/62.0".into()
}
fn default_accept() -> String {
    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".into()
}
fn default_page_size() -> u32 {
    500
}

// ---------------------------------------------------------------------------
// Fetch config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime HTTP configuration shared by every fetch in a run.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub base_url: Url,
    pub user_agent: String,
    pub accept: String,
    pub timeout: Duration,
    pub listing_page_size: u32,
    /// Maximum documents assembled at once.
    pub document_concurrency: usize,
    /// Maximum fragment fetches in flight for one document.
    pub fragment_concurrency: usize,
}

impl FetchConfig {
    /// Same settings, pointed at another origin (mirrors, test servers).
    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = base_url;
        self
    }
}

impl TryFrom<&AppConfig> for FetchConfig {
    type Error = SsoError;

    fn try_from(config: &AppConfig) -> Result<Self> {
        let base_url = Url::parse(&config.site.base_url).map_err(|e| {
            SsoError::config(format!("invalid site.base_url {:?}: {e}", config.site.base_url))
        })?;

        Ok(Self {
            base_url,
            user_agent: config.site.user_agent.clone(),
            accept: config.site.accept.clone(),
            timeout: Duration::from_secs(config.defaults.request_timeout_secs),
            listing_page_size: config.site.listing_page_size,
            document_concurrency: config.defaults.document_concurrency.max(1) as usize,
            fragment_concurrency: config.defaults.fragment_concurrency.max(1) as usize,
        })
    }
}

// ---------------------------------------------------------------------------
// Run config
// ---------------------------------------------------------------------------

/// What a run retrieves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Retrieve {
    /// Every current Act listed in the table of contents.
    All,
    /// A single Act by shorthand.
    One(String),
}

impl std::str::FromStr for Retrieve {
    type Err = SsoError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(SsoError::config("retrieve target must not be empty"));
        }
        if s.eq_ignore_ascii_case("all") {
            Ok(Self::All)
        } else if s.contains('/') {
            Err(SsoError::config(format!(
                "invalid shorthand {s:?}: shorthands are single path segments"
            )))
        } else {
            Ok(Self::One(s.to_string()))
        }
    }
}

impl std::fmt::Display for Retrieve {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "ALL"),
            Self::One(shorthand) => write!(f, "{shorthand}"),
        }
    }
}

/// Options for a single run, as handed over by the CLI.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub retrieve: Retrieve,
    pub include_subsidiary: bool,
    /// Point-in-time date (`YYYYMMDD`). Reserved; retrieval always uses current versions.
    pub date: String,
    pub include_pdf: bool,
    pub save_to: PathBuf,
}

impl RunConfig {
    /// Defaults for `retrieve`, with destination from the config file and today's date.
    pub fn new(retrieve: Retrieve, config: &AppConfig) -> Self {
        Self {
            retrieve,
            include_subsidiary: false,
            date: chrono::Local::now().format("%Y%m%d").to_string(),
            include_pdf: false,
            save_to: PathBuf::from(&config.defaults.save_to),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.sso-scrape/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| SsoError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.sso-scrape/sso-scrape.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| SsoError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| SsoError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| SsoError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| SsoError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| SsoError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
