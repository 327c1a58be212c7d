//! Default values for configuration

/// Default user agent sent with every page request
pub fn default_crawl_user_agent() -> String {
    format!("siteseek/{} (+self-hosted site search)", env!("CARGO_PKG_VERSION"))
}

/// Default per-request timeout (seconds)
pub fn default_crawl_timeout() -> u64 {
    30
}

/// Default lower bound of the politeness delay (milliseconds)
pub fn default_politeness_min_ms() -> u64 {
    500
}

/// Default upper bound of the politeness delay (milliseconds)
pub fn default_politeness_max_ms() -> u64 {
    1500
}

/// Default cap on requests per second across all sites
pub fn default_global_requests_per_second() -> u32 {
    10
}

/// Default maximum pages per site run
pub fn default_crawl_max_pages() -> u32 {
    5000
}

/// Default: respect robots.txt
pub fn default_respect_robots() -> bool {
    true
}

/// Default redirect limit
pub fn default_max_redirects() -> usize {
    5
}

/// Default attempt budget for transient failures
pub fn default_retry_attempts() -> u32 {
    3
}

/// Default backoff between attempts (milliseconds)
pub fn default_retry_backoff_ms() -> u64 {
    2000
}

/// Default lifetime of a site indexing claim without a heartbeat (seconds)
pub fn default_lease_secs() -> u64 {
    60
}

/// Default minimum word length kept by the lemma extractor
pub fn default_min_word_length() -> usize {
    3
}

/// Default number of results per search page
pub fn default_search_limit() -> usize {
    10
}

/// Default hard cap on results per search page
pub fn default_search_max_limit() -> usize {
    50
}

/// Default snippet length (characters)
pub fn default_snippet_chars() -> usize {
    200
}
