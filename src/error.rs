//! Custom error types for siteseek

use thiserror::Error;

/// Main error type for siteseek operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Crawl error: {0}")]
    Crawl(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("HTTP {status}: {url}")]
    HttpStatus { status: u16, url: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("empty query")]
    EmptyQuery,

    #[error("site not indexed: {0}")]
    SiteNotIndexed(String),

    #[error("Site not found: {0}")]
    SiteNotFound(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("indexing already running: {0}")]
    AlreadyRunning(String),

    #[error("cancelled by user")]
    Cancelled,

    #[error("No pages could be indexed: {0}")]
    NoPagesIndexed(String),

    #[error("{0}")]
    Other(String),
}

/// How the retry policy treats an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Worth retrying after a short backoff (timeouts, lock contention)
    Transient,
    /// Retrying will not help
    Fatal,
    /// Bad caller input, reported synchronously with no state change
    Validation,
}

impl Error {
    /// Classify this error for the retry policy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Timeout(_) => ErrorKind::Transient,
            Error::HttpStatus { status, .. } => {
                if *status == 429 || (500..600).contains(status) {
                    ErrorKind::Transient
                } else {
                    ErrorKind::Fatal
                }
            }
            Error::Http(e) if e.is_timeout() || e.is_connect() => ErrorKind::Transient,
            Error::Database(e) if is_storage_contention(e) => ErrorKind::Transient,
            Error::EmptyQuery
            | Error::SiteNotIndexed(_)
            | Error::SiteNotFound(_)
            | Error::InvalidUrl(_)
            | Error::AlreadyRunning(_) => ErrorKind::Validation,
            _ => ErrorKind::Fatal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

/// SQLite BUSY/LOCKED (including extended codes), pool exhaustion and
/// unique-key races are all resolved by running the operation again.
fn is_storage_contention(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => {
            if db.is_unique_violation() {
                return true;
            }
            db.code()
                .and_then(|code| code.parse::<i32>().ok())
                .map(|code| matches!(code & 0xff, 5 | 6))
                .unwrap_or(false)
        }
        _ => false,
    }
}

/// Result type alias for siteseek
pub type Result<T> = std::result::Result<T, Error>;
