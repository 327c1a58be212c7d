//! robots.txt parsing and handling

use reqwest::Client;
use robotstxt::DefaultMatcher;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Parsed robots.txt rules for one site
#[derive(Debug, Clone)]
pub struct RobotsRules {
    content: String,
}

impl RobotsRules {
    /// Parse robots.txt content
    pub fn parse(content: &str) -> Self {
        Self {
            content: content.to_string(),
        }
    }

    /// Create rules that allow everything
    pub fn allow_all() -> Self {
        Self {
            content: String::new(),
        }
    }

    /// Fetch `/robots.txt` for the site of `root`. Any failure (missing
    /// file, server error, timeout) means no restrictions.
    pub async fn fetch(client: &Client, root: &Url) -> Self {
        let mut robots_url = root.clone();
        robots_url.set_path("/robots.txt");
        robots_url.set_query(None);
        robots_url.set_fragment(None);
        debug!("Fetching robots.txt from {}", robots_url);

        match client.get(robots_url).send().await {
            Ok(response) if response.status().is_success() => match response.text().await {
                Ok(text) => Self::parse(&text),
                Err(_) => Self::allow_all(),
            },
            _ => Self::allow_all(),
        }
    }

    /// Check if a URL is allowed for a user agent
    pub fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        if self.content.is_empty() {
            return true;
        }

        let mut matcher = DefaultMatcher::default();
        let allowed = matcher.one_agent_allowed_by_robots(&self.content, user_agent, url);

        if !allowed {
            debug!("robots.txt disallows {} for {}", url, user_agent);
        }

        allowed
    }

    /// Crawl delay for a user agent, preferring a specific group over `*`
    pub fn crawl_delay(&self, user_agent: &str) -> Option<Duration> {
        let ua_lower = user_agent.to_lowercase();
        let mut current_agent: Option<String> = None;
        let mut default_delay: Option<f64> = None;
        let mut specific_delay: Option<f64> = None;

        for line in self.content.lines() {
            let line = line.trim();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();

            match key.trim().to_lowercase().as_str() {
                "user-agent" => current_agent = Some(value.to_lowercase()),
                "crawl-delay" => {
                    let (Some(agent), Ok(delay)) = (&current_agent, value.parse::<f64>()) else {
                        continue;
                    };
                    if agent == "*" {
                        default_delay = Some(delay);
                    } else if ua_lower.contains(agent.as_str()) {
                        specific_delay = Some(delay);
                    }
                }
                _ => {}
            }
        }

        specific_delay
            .or(default_delay)
            .filter(|d| d.is_finite() && *d > 0.0)
            .map(Duration::from_secs_f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_robots_allow_all() {
        let rules = RobotsRules::allow_all();
        assert!(rules.is_allowed("https://example.test/any/path", "MyBot"));
    }

    #[test]
    fn test_robots_basic() {
        let content = r#"
User-agent: *
Disallow: /admin/
Disallow: /private/

User-agent: BadBot
Disallow: /
"#;
        let rules = RobotsRules::parse(content);

        assert!(rules.is_allowed("https://example.test/public/page", "GoodBot"));
        assert!(!rules.is_allowed("https://example.test/admin/secret", "GoodBot"));
        assert!(!rules.is_allowed("https://example.test/anything", "BadBot"));
    }

    #[test]
    fn test_crawl_delay() {
        let content = r#"
User-agent: *
Crawl-delay: 2.5

User-agent: SpecialBot
Crawl-delay: 1.0
"#;
        let rules = RobotsRules::parse(content);

        assert_eq!(rules.crawl_delay("SpecialBot"), Some(Duration::from_secs(1)));
        assert_eq!(
            rules.crawl_delay("RandomBot"),
            Some(Duration::from_millis(2500))
        );
        assert_eq!(RobotsRules::allow_all().crawl_delay("RandomBot"), None);
    }

    #[tokio::test]
    async fn test_fetch_missing_robots_allows_all() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let root = Url::parse(&server.uri()).unwrap();
        let rules = RobotsRules::fetch(&Client::new(), &root).await;
        assert!(rules.is_allowed(&format!("{}/anything", server.uri()), "siteseek"));
    }
}
