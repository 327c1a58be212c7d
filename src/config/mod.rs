//! Configuration management for siteseek
//!
//! Handles loading, saving, and validating configuration from TOML files.
//! The configuration supplies the seed list of sites to index together with
//! crawler, indexing, lemmatization and search tunables.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Seed sites to crawl and index
    #[serde(default)]
    pub sites: Vec<SiteConfig>,

    /// Web crawling configuration
    #[serde(default)]
    pub crawl: CrawlConfig,

    /// Indexing run configuration
    #[serde(default)]
    pub indexing: IndexingConfig,

    /// Lemmatization configuration
    #[serde(default)]
    pub lemma: LemmaConfig,

    /// Search configuration
    #[serde(default)]
    pub search: SearchConfig,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// One configured site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Root URL, e.g. `https://example.com`
    pub url: String,

    /// Display name
    pub name: String,
}

/// Web crawling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// User agent string
    #[serde(default = "default_crawl_user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "default_crawl_timeout")]
    pub timeout_secs: u64,

    /// Lower bound of the randomized delay between fetches of one site
    #[serde(default = "default_politeness_min_ms")]
    pub politeness_min_ms: u64,

    /// Upper bound of the randomized delay between fetches of one site
    #[serde(default = "default_politeness_max_ms")]
    pub politeness_max_ms: u64,

    /// Requests per second across every concurrently crawled site
    #[serde(default = "default_global_requests_per_second")]
    pub global_requests_per_second: u32,

    /// Maximum pages fetched per site run
    #[serde(default = "default_crawl_max_pages")]
    pub max_pages: u32,

    /// Whether to respect robots.txt
    #[serde(default = "default_respect_robots")]
    pub respect_robots_txt: bool,

    /// Maximum redirects followed per request
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
}

/// Indexing run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// Attempts for a unit of work failing with a transient error
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Pause between attempts (milliseconds)
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// How long a site claim stays valid without a heartbeat (seconds).
    /// A claim older than this is treated as left behind by a dead process.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
}

/// Lemmatization configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LemmaConfig {
    /// Tokens shorter than this (in characters) are discarded
    #[serde(default = "default_min_word_length")]
    pub min_word_length: usize,

    /// Optional tab-separated dictionary: `form<TAB>lemma[<TAB>info]`.
    /// Without a dictionary, the lowercase word is its own lemma.
    #[serde(default)]
    pub dictionary: Option<PathBuf>,

    /// Skip words the dictionary does not know instead of keeping them as-is
    #[serde(default)]
    pub strict: bool,
}

/// Search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Results per page when the caller gives no limit
    #[serde(default = "default_search_limit")]
    pub default_limit: usize,

    /// Hard cap on results per page
    #[serde(default = "default_search_max_limit")]
    pub max_limit: usize,

    /// Snippet length in characters
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for siteseek data
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,

    /// Path to SQLite database
    pub db_file: PathBuf,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            user_agent: default_crawl_user_agent(),
            timeout_secs: default_crawl_timeout(),
            politeness_min_ms: default_politeness_min_ms(),
            politeness_max_ms: default_politeness_max_ms(),
            global_requests_per_second: default_global_requests_per_second(),
            max_pages: default_crawl_max_pages(),
            respect_robots_txt: default_respect_robots(),
            max_redirects: default_max_redirects(),
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            lease_secs: default_lease_secs(),
        }
    }
}

impl IndexingConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }
}

impl Default for LemmaConfig {
    fn default() -> Self {
        Self {
            min_word_length: default_min_word_length(),
            dictionary: None,
            strict: false,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: default_search_limit(),
            max_limit: default_search_max_limit(),
            snippet_chars: default_snippet_chars(),
        }
    }
}

impl Config {
    /// Get the default base directory for siteseek (~/.siteseek)
    pub fn default_base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".siteseek")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    /// Initialize paths configuration
    pub fn init_paths(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        self.paths = PathsConfig {
            config_file: base.join("config.toml"),
            db_file: base.join("siteseek.db"),
            base_dir: base,
        };
    }

    /// Load configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {} (run 'siteseek init' first)",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        let base = config_path.parent().unwrap_or(Path::new(".")).to_path_buf();
        config.paths = PathsConfig {
            config_file: config_path.to_path_buf(),
            db_file: base.join("siteseek.db"),
            base_dir: base,
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default location
    pub fn load_default() -> Result<Self> {
        Self::load(&Self::default_config_path())
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Look up a configured site by URL (trailing slash insensitive)
    pub fn find_site(&self, url: &str) -> Option<&SiteConfig> {
        let wanted = url.trim_end_matches('/');
        self.sites
            .iter()
            .find(|s| s.url.trim_end_matches('/') == wanted)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for site in &self.sites {
            let parsed = Url::parse(&site.url).map_err(|e| {
                Error::Config(format!("sites: invalid url '{}': {}", site.url, e))
            })?;
            if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
                return Err(Error::Config(format!(
                    "sites: '{}' must be an http(s) URL with a host",
                    site.url
                )));
            }
            if site.name.trim().is_empty() {
                return Err(Error::Config(format!(
                    "sites: '{}' needs a non-empty name",
                    site.url
                )));
            }
            if !seen.insert(site.url.trim_end_matches('/').to_string()) {
                return Err(Error::Config(format!(
                    "sites: '{}' is configured twice",
                    site.url
                )));
            }
        }

        if self.crawl.politeness_min_ms > self.crawl.politeness_max_ms {
            return Err(Error::Config(
                "crawl.politeness_min_ms must be <= crawl.politeness_max_ms".to_string(),
            ));
        }

        if self.crawl.timeout_secs == 0 {
            return Err(Error::Config(
                "crawl.timeout_secs must be positive".to_string(),
            ));
        }

        if self.crawl.global_requests_per_second == 0 {
            return Err(Error::Config(
                "crawl.global_requests_per_second must be positive".to_string(),
            ));
        }

        if self.indexing.retry_attempts == 0 {
            return Err(Error::Config(
                "indexing.retry_attempts must be at least 1".to_string(),
            ));
        }

        if self.indexing.lease_secs == 0 {
            return Err(Error::Config(
                "indexing.lease_secs must be positive".to_string(),
            ));
        }

        if self.lemma.min_word_length == 0 {
            return Err(Error::Config(
                "lemma.min_word_length must be positive".to_string(),
            ));
        }

        if self.search.default_limit == 0 || self.search.max_limit == 0 {
            return Err(Error::Config(
                "search limits must be positive".to_string(),
            ));
        }

        if self.search.default_limit > self.search.max_limit {
            return Err(Error::Config(
                "search.default_limit must be <= search.max_limit".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn site(url: &str, name: &str) -> SiteConfig {
        SiteConfig {
            url: url.to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.crawl.timeout_secs, 30);
        assert_eq!(config.indexing.retry_attempts, 3);
        assert_eq!(config.indexing.retry_backoff(), Duration::from_secs(2));
        assert_eq!(config.indexing.lease(), Duration::from_secs(60));
        assert_eq!(config.lemma.min_word_length, 3);
        assert_eq!(config.search.snippet_chars, 200);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_save_load() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.init_paths(Some(tmp.path().to_path_buf()));
        config.sites.push(site("https://example.test", "Example"));

        config.save().unwrap();
        assert!(config.paths.config_file.exists());

        let loaded = Config::load(&config.paths.config_file).unwrap();
        assert_eq!(loaded.sites, config.sites);
        assert_eq!(loaded.paths.db_file, tmp.path().join("siteseek.db"));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml = r#"
            [[sites]]
            url = "https://example.test"
            name = "Example"

            [crawl]
            timeout_secs = 10
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.crawl.timeout_secs, 10);
        assert_eq!(config.crawl.politeness_max_ms, 1500);
        assert_eq!(config.search.max_limit, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.sites.push(site("ftp://example.test", "Bad"));
        assert!(config.validate().is_err());

        config.sites = vec![
            site("https://example.test", "A"),
            site("https://example.test/", "B"),
        ];
        assert!(config.validate().is_err());

        config.sites = vec![site("https://example.test", "A")];
        config.crawl.politeness_min_ms = 2000;
        config.crawl.politeness_max_ms = 1000;
        assert!(config.validate().is_err());

        config.crawl.politeness_max_ms = 3000;
        assert!(config.validate().is_ok());

        config.search.default_limit = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_find_site_ignores_trailing_slash() {
        let mut config = Config::default();
        config.sites.push(site("https://example.test/", "Example"));
        assert!(config.find_site("https://example.test").is_some());
        assert!(config.find_site("https://other.test").is_none());
    }
}
