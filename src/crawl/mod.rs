//! Site crawling with robots.txt support and rate limiting
//!
//! This module provides:
//! - URL fetching with timeouts, redirect limits and transient-error retries
//! - robots.txt parsing and respect
//! - A randomized per-site politeness delay plus a global request cap
//! - Breadth-first traversal of same-site links with URL normalization
//! - Cooperative cancellation between fetches

mod rate_limit;
mod robots;

pub use rate_limit::*;
pub use robots::*;

use crate::config::CrawlConfig;
use crate::error::{Error, Result};
use crate::indexer::RetryPolicy;
use crate::parse::{extract_page, is_skippable_resource, ContentType, ExtractedPage};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// A fetched and extracted page
#[derive(Debug, Clone)]
pub struct CrawledPage {
    /// URL as requested
    pub url: Url,
    /// Site-relative path, `/` for the root
    pub path: String,
    /// HTTP status code of the final response
    pub status: u16,
    pub content_type: ContentType,
    pub extracted: ExtractedPage,
}

/// Receives each page as soon as it is fetched. An error aborts the crawl.
#[async_trait]
pub trait PageSink: Send + Sync {
    async fn accept(&self, page: &CrawledPage) -> Result<()>;
}

/// A page that could not be fetched
#[derive(Debug, Clone)]
pub struct PageFailure {
    pub url: String,
    pub error: String,
}

/// Outcome of one crawl
#[derive(Debug, Clone, Default)]
pub struct CrawlReport {
    /// Paths handed to the sink, in breadth-first order
    pub paths: Vec<String>,
    pub failures: Vec<PageFailure>,
    /// URLs skipped because robots.txt disallows them
    pub disallowed: usize,
    /// The crawl stopped early on request
    pub cancelled: bool,
}

impl CrawlReport {
    pub fn pages_indexed(&self) -> usize {
        self.paths.len()
    }
}

/// Web crawler
pub struct Crawler {
    client: Client,
    config: CrawlConfig,
    retry: RetryPolicy,
    global_limiter: GlobalRateLimiter,
}

impl Crawler {
    /// Create a new crawler
    pub fn new(config: CrawlConfig, retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| Error::Crawl(format!("Failed to create HTTP client: {}", e)))?;

        let global_limiter = GlobalRateLimiter::new(config.global_requests_per_second);

        Ok(Self {
            client,
            config,
            retry,
            global_limiter,
        })
    }

    /// Fetch a single URL once
    pub async fn fetch(&self, url: &Url) -> Result<CrawledPage> {
        self.global_limiter.wait().await;
        debug!("Fetching: {}", url);

        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(url.to_string())
            } else {
                Error::Http(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let content_type_header = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let content_type = ContentType::detect(content_type_header.as_deref());
        if !content_type.is_indexable() {
            return Err(Error::UnsupportedContentType(format!(
                "{} ({})",
                content_type_header.unwrap_or_default(),
                url
            )));
        }

        // Links resolve against the post-redirect location
        let final_url = response.url().clone();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(url.to_string())
            } else {
                Error::Http(e)
            }
        })?;

        Ok(CrawledPage {
            url: url.clone(),
            path: page_path(url),
            status: status.as_u16(),
            content_type,
            extracted: extract_page(&body, content_type, &final_url),
        })
    }

    /// Fetch a single URL, retrying transient failures
    pub async fn fetch_page(&self, url: &Url) -> Result<CrawledPage> {
        self.retry
            .run(&format!("Fetch {}", url), || self.fetch(url))
            .await
    }

    /// Crawl a site breadth-first from its root, handing every page to
    /// `sink`. Failure to fetch the root and sink errors abort the crawl;
    /// any other page failure is recorded and skipped.
    pub async fn crawl(
        &self,
        root: &Url,
        cancel: &AtomicBool,
        sink: &dyn PageSink,
    ) -> Result<CrawlReport> {
        let site_key = site_host(root)
            .ok_or_else(|| Error::InvalidUrl(format!("{} has no host", root)))?;

        let politeness =
            PolitenessDelay::from_millis(self.config.politeness_min_ms, self.config.politeness_max_ms);

        let robots = if self.config.respect_robots_txt {
            let rules = RobotsRules::fetch(&self.client, root).await;
            if let Some(delay) = rules.crawl_delay(&self.config.user_agent) {
                debug!("robots.txt crawl delay {:?} for {}", delay, root);
                politeness.raise_floor(delay).await;
            }
            rules
        } else {
            RobotsRules::allow_all()
        };

        let mut report = CrawlReport::default();
        let mut queue: VecDeque<Url> = VecDeque::new();
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(normalize_url(root));
        queue.push_back(root.clone());

        let max_pages = self.config.max_pages as usize;
        let max_attempts = max_pages.saturating_mul(5).max(1);
        let mut attempts = 0usize;

        while let Some(url) = queue.pop_front() {
            if cancel.load(Ordering::SeqCst) {
                info!("Crawl of {} cancelled", root);
                report.cancelled = true;
                break;
            }
            if report.pages_indexed() >= max_pages {
                info!("Reached max pages limit ({})", max_pages);
                break;
            }
            if attempts >= max_attempts {
                warn!(
                    "Reached crawl attempt limit ({}); stopping to avoid stalling",
                    max_attempts
                );
                break;
            }

            if !robots.is_allowed(url.as_str(), &self.config.user_agent) {
                report.disallowed += 1;
                continue;
            }

            attempts += 1;
            politeness.wait().await;

            let page = match self.fetch_page(&url).await {
                Ok(page) => page,
                Err(e) if attempts == 1 => {
                    warn!("Site root {} unreachable: {}", url, e);
                    return Err(e);
                }
                Err(e) => {
                    warn!("Failed to fetch {}: {}", url, e);
                    report.failures.push(PageFailure {
                        url: url.to_string(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            for link in &page.extracted.links {
                if site_host(link).as_deref() != Some(site_key.as_str()) {
                    continue;
                }
                if !should_crawl_url(link) {
                    continue;
                }
                if visited.insert(normalize_url(link)) {
                    queue.push_back(link.clone());
                }
            }

            sink.accept(&page).await?;
            report.paths.push(page.path);
        }

        info!(
            "Crawled {} pages from {} ({} failed, {} disallowed)",
            report.pages_indexed(),
            root,
            report.failures.len(),
            report.disallowed
        );
        Ok(report)
    }
}

/// Host identity of a site: lowercase, without `www.`, with the port when
/// it is not the scheme default
pub fn site_host(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host,
    })
}

/// Site-relative path of a URL with any trailing slash removed
pub fn page_path(url: &Url) -> String {
    let path = url.path().trim_end_matches('/');
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

/// Deduplication key: scheme, query and fragment are ignored
pub fn normalize_url(url: &Url) -> String {
    format!(
        "{}{}",
        site_host(url).unwrap_or_default(),
        page_path(url)
    )
}

static DATE_PATH: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"/\d{4}/\d{2}/\d{2}/").ok());

/// Check if a URL is worth fetching at all
pub fn should_crawl_url(url: &Url) -> bool {
    if !matches!(url.scheme(), "http" | "https") {
        return false;
    }

    if is_skippable_resource(url.path()) {
        return false;
    }

    // Skip calendar-like URLs with dates
    if let Some(re) = DATE_PATH.as_ref() {
        if re.is_match(url.path()) {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct CollectingSink {
        pages: Mutex<Vec<CrawledPage>>,
    }

    #[async_trait]
    impl PageSink for CollectingSink {
        async fn accept(&self, page: &CrawledPage) -> Result<()> {
            self.pages.lock().push(page.clone());
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl PageSink for FailingSink {
        async fn accept(&self, _page: &CrawledPage) -> Result<()> {
            Err(Error::Other("disk full".to_string()))
        }
    }

    fn fast_config() -> CrawlConfig {
        CrawlConfig {
            timeout_secs: 1,
            politeness_min_ms: 0,
            politeness_max_ms: 0,
            global_requests_per_second: 1000,
            ..CrawlConfig::default()
        }
    }

    fn crawler(config: CrawlConfig) -> Crawler {
        Crawler::new(config, RetryPolicy::new(3, Duration::from_millis(10))).unwrap()
    }

    fn html(body: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_raw(
            format!("<html><body>{}</body></html>", body).into_bytes(),
            "text/html; charset=utf-8",
        )
    }

    async fn mount(server: &MockServer, at: &str, response: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path(at))
            .respond_with(response)
            .mount(server)
            .await;
    }

    #[test]
    fn test_normalize_url() {
        let a = Url::parse("https://www.Example.test/path/?q=1#frag").unwrap();
        let b = Url::parse("http://example.test/path").unwrap();
        assert_eq!(normalize_url(&a), "example.test/path");
        assert_eq!(normalize_url(&a), normalize_url(&b));

        let root = Url::parse("https://example.test").unwrap();
        assert_eq!(normalize_url(&root), "example.test/");

        let port = Url::parse("http://127.0.0.1:8080/a/").unwrap();
        assert_eq!(normalize_url(&port), "127.0.0.1:8080/a");
    }

    #[test]
    fn test_page_path() {
        assert_eq!(page_path(&Url::parse("https://example.test").unwrap()), "/");
        assert_eq!(page_path(&Url::parse("https://example.test/a/b/").unwrap()), "/a/b");
    }

    #[test]
    fn test_should_crawl_url() {
        let ok = |s: &str| should_crawl_url(&Url::parse(s).unwrap());
        assert!(ok("https://example.test/docs/intro"));
        assert!(!ok("https://example.test/logo.png"));
        assert!(!ok("https://example.test/feed.xml"));
        assert!(!ok("https://example.test/2024/01/02/post"));
        assert!(!ok("ftp://example.test/file"));
    }

    #[tokio::test]
    async fn test_crawl_breadth_first_same_site_only() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/",
            html(r#"<a href="/a">A</a><a href="/b">B</a><a href="https://elsewhere.test/x">X</a>"#),
        )
        .await;
        mount(&server, "/a", html(r#"кот сидит <a href="/c">C</a><a href="/">home</a><a href="/b/">B</a>"#)).await;
        mount(&server, "/b", html(r#"кот спит <a href="/a#top">A again</a>"#)).await;
        mount(&server, "/c", html("глубже")).await;

        let root = Url::parse(&server.uri()).unwrap();
        let sink = CollectingSink::default();
        let report = crawler(fast_config())
            .crawl(&root, &AtomicBool::new(false), &sink)
            .await
            .unwrap();

        assert_eq!(report.paths, vec!["/", "/a", "/b", "/c"]);
        assert!(report.failures.is_empty());
        assert!(!report.cancelled);

        let pages = sink.pages.lock();
        assert!(pages[1].extracted.text.contains("кот сидит"));
        assert_eq!(pages[1].status, 200);
    }

    #[tokio::test]
    async fn test_page_failures_do_not_stop_crawl() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/",
            html(r#"<a href="/missing">M</a><a href="/slow">S</a><a href="/ok">O</a>"#),
        )
        .await;
        mount(&server, "/missing", ResponseTemplate::new(404)).await;
        mount(
            &server,
            "/slow",
            html("never").set_delay(Duration::from_secs(3)),
        )
        .await;
        mount(&server, "/ok", html("fine")).await;

        let root = Url::parse(&server.uri()).unwrap();
        let sink = CollectingSink::default();
        let report = crawler(fast_config())
            .crawl(&root, &AtomicBool::new(false), &sink)
            .await
            .unwrap();

        assert_eq!(report.paths, vec!["/", "/ok"]);
        assert_eq!(report.failures.len(), 2);
        assert!(report.failures.iter().any(|f| f.url.ends_with("/slow")));

        // The timeout is transient and retried; the 404 is not
        let requests = server.received_requests().await.unwrap();
        let count = |p: &str| requests.iter().filter(|r| r.url.path() == p).count();
        assert_eq!(count("/slow"), 3);
        assert_eq!(count("/missing"), 1);
    }

    #[tokio::test]
    async fn test_unreachable_root_is_an_error() {
        let server = MockServer::start().await;
        mount(&server, "/", ResponseTemplate::new(500)).await;

        let root = Url::parse(&server.uri()).unwrap();
        let result = crawler(fast_config())
            .crawl(&root, &AtomicBool::new(false), &CollectingSink::default())
            .await;
        assert!(matches!(result, Err(Error::HttpStatus { status: 500, .. })));
    }

    #[tokio::test]
    async fn test_non_html_is_skipped() {
        let server = MockServer::start().await;
        mount(&server, "/", html(r#"<a href="/data">D</a>"#)).await;
        mount(
            &server,
            "/data",
            ResponseTemplate::new(200).set_body_raw(vec![0u8, 1, 2], "application/octet-stream"),
        )
        .await;

        let root = Url::parse(&server.uri()).unwrap();
        let report = crawler(fast_config())
            .crawl(&root, &AtomicBool::new(false), &CollectingSink::default())
            .await
            .unwrap();
        assert_eq!(report.paths, vec!["/"]);
        assert_eq!(report.failures.len(), 1);
    }

    #[tokio::test]
    async fn test_robots_disallowed_paths_are_skipped() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/robots.txt",
            ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private\n"),
        )
        .await;
        mount(&server, "/", html(r#"<a href="/private">P</a><a href="/public">Q</a>"#)).await;
        mount(&server, "/public", html("open")).await;

        let root = Url::parse(&server.uri()).unwrap();
        let report = crawler(fast_config())
            .crawl(&root, &AtomicBool::new(false), &CollectingSink::default())
            .await
            .unwrap();
        assert_eq!(report.paths, vec!["/", "/public"]);
        assert_eq!(report.disallowed, 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_fetches_nothing() {
        let server = MockServer::start().await;
        mount(&server, "/", html("root")).await;

        let root = Url::parse(&server.uri()).unwrap();
        let report = crawler(fast_config())
            .crawl(&root, &AtomicBool::new(true), &CollectingSink::default())
            .await
            .unwrap();
        assert!(report.cancelled);
        assert!(report.paths.is_empty());
    }

    #[tokio::test]
    async fn test_max_pages_limit() {
        let server = MockServer::start().await;
        mount(&server, "/", html(r#"<a href="/a">A</a><a href="/b">B</a>"#)).await;
        mount(&server, "/a", html("a")).await;
        mount(&server, "/b", html("b")).await;

        let root = Url::parse(&server.uri()).unwrap();
        let config = CrawlConfig {
            max_pages: 2,
            ..fast_config()
        };
        let report = crawler(config)
            .crawl(&root, &AtomicBool::new(false), &CollectingSink::default())
            .await
            .unwrap();
        assert_eq!(report.pages_indexed(), 2);
    }

    #[tokio::test]
    async fn test_sink_error_aborts_crawl() {
        let server = MockServer::start().await;
        mount(&server, "/", html("root")).await;

        let root = Url::parse(&server.uri()).unwrap();
        let result = crawler(fast_config())
            .crawl(&root, &AtomicBool::new(false), &FailingSink)
            .await;
        assert!(result.is_err());
    }
}
