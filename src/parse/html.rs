//! HTML parsing and text extraction

use super::{normalize_whitespace, ExtractedPage};
use html2text::render::TrivialDecorator;
use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Elements whose content is never page text
const SKIPPED_ELEMENTS: &[&str] = &[
    "script", "style", "noscript", "iframe", "template", "svg", "canvas", "object",
];

/// Line width handed to the renderer; lines are re-joined afterwards
const RENDER_WIDTH: usize = 1000;

/// Parse HTML content and extract text, title and outgoing links.
///
/// html5ever recovers from any malformed input, so this never fails.
pub fn parse_html(content: &str, base_url: &Url) -> ExtractedPage {
    let mut document = Html::parse_document(content);

    let title = select_text(&document, "title").or_else(|| select_text(&document, "h1"));

    // <base href> changes how relative links resolve
    let base = Selector::parse("base[href]")
        .ok()
        .and_then(|s| document.select(&s).next())
        .and_then(|e| e.value().attr("href"))
        .and_then(|href| base_url.join(href).ok())
        .unwrap_or_else(|| base_url.clone());
    let links = extract_links(&document, &base);

    strip_non_content(&mut document);
    let root = Selector::parse("body")
        .ok()
        .and_then(|s| document.select(&s).next())
        .unwrap_or_else(|| document.root_element());

    // Plain rendering: no link, emphasis or list markers in the text
    let markup = root.html();
    let text = html2text::from_read_with_decorator(
        markup.as_bytes(),
        RENDER_WIDTH,
        TrivialDecorator::new(),
    )
    .unwrap_or_else(|_| root.text().collect::<Vec<_>>().join(" "));

    ExtractedPage {
        title,
        text: normalize_whitespace(&text),
        links,
    }
}

fn strip_non_content(document: &mut Html) {
    let Ok(selector) = Selector::parse(&SKIPPED_ELEMENTS.join(", ")) else {
        return;
    };
    let ids: Vec<_> = document.select(&selector).map(|e| e.id()).collect();
    for id in ids {
        if let Some(mut node) = document.tree.get_mut(id) {
            node.detach();
        }
    }
}

fn select_text(document: &Html, css: &str) -> Option<String> {
    let selector = Selector::parse(css).ok()?;
    let elem = document.select(&selector).next()?;
    let text = normalize_whitespace(&elem.text().collect::<String>());
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn extract_links(document: &Html, base: &Url) -> Vec<Url> {
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for elem in document.select(&selector) {
        let Some(href) = elem.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        let lower = href.to_lowercase();
        if href.is_empty()
            || href.starts_with('#')
            || lower.starts_with("javascript:")
            || lower.starts_with("mailto:")
            || lower.starts_with("tel:")
            || lower.starts_with("data:")
        {
            continue;
        }

        // Resolve relative URLs
        let Ok(mut url) = base.join(href) else {
            continue;
        };
        if !matches!(url.scheme(), "http" | "https") {
            continue;
        }
        url.set_fragment(None);

        if seen.insert(url.as_str().to_string()) {
            links.push(url);
        }
    }

    links
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.test/docs/").unwrap()
    }

    #[test]
    fn test_parse_html_basic() {
        let html = r#"
        <!DOCTYPE html>
        <html>
        <head><title>Test Page</title><style>body { color: red; }</style></head>
        <body>
            <h1>Main Heading</h1>
            <p>Some paragraph text here.</p>
            <script>var hidden = "should not appear";</script>
            <noscript>Enable JavaScript</noscript>
            <p>More <b>bold</b>text.</p>
        </body>
        </html>
        "#;

        let page = parse_html(html, &base());

        assert_eq!(page.title.as_deref(), Some("Test Page"));
        assert!(page.text.contains("Main Heading"));
        assert!(page.text.contains("Some paragraph text here."));
        assert!(page.text.contains("More boldtext."));
        assert!(!page.text.contains("hidden"));
        assert!(!page.text.contains("color"));
        assert!(!page.text.contains("Enable JavaScript"));
    }

    #[test]
    fn test_block_elements_separate_words() {
        let html = "<ul><li>кот</li><li>спит</li></ul><p>один</p><p>два</p>";
        let page = parse_html(html, &base());
        assert_eq!(page.text, "кот спит один два");
    }

    #[test]
    fn test_plain_rendering_adds_no_markup() {
        let html = r#"<body><ol><li><a href="/x">кот</a></li></ol>
            <p><em>спит</em> <strong>дома</strong></p><hr><p>утром</p></body>"#;
        let page = parse_html(html, &base());
        let words: Vec<&str> = page
            .text
            .split_whitespace()
            .filter(|w| w.chars().any(char::is_alphabetic))
            .collect();
        assert_eq!(words, vec!["кот", "спит", "дома", "утром"]);
        assert!(!page.text.contains('['));
        assert!(!page.text.contains('*'));
    }

    #[test]
    fn test_title_falls_back_to_h1() {
        let html = "<html><body><h1>Heading Only</h1></body></html>";
        let page = parse_html(html, &base());
        assert_eq!(page.title.as_deref(), Some("Heading Only"));

        let page = parse_html("<p>no title</p>", &base());
        assert_eq!(page.title, None);
    }

    #[test]
    fn test_link_extraction() {
        let html = r##"
        <html>
        <body>
            <a href="/internal">Internal</a>
            <a href="https://external.test/page">External</a>
            <a href="relative/path#section">Relative</a>
            <a href="relative/path">Duplicate</a>
            <a href="#top">Anchor</a>
            <a href="mailto:someone@example.test">Mail</a>
            <a href="javascript:void(0)">JS</a>
            <a href="ftp://example.test/file">FTP</a>
        </body>
        </html>
        "##;

        let page = parse_html(html, &base());
        let links: Vec<&str> = page.links.iter().map(|u| u.as_str()).collect();

        assert_eq!(
            links,
            vec![
                "https://example.test/internal",
                "https://external.test/page",
                "https://example.test/docs/relative/path",
            ]
        );
    }

    #[test]
    fn test_base_href_is_honored() {
        let html = r#"<head><base href="/other/"></head><body><a href="page">x</a></body>"#;
        let page = parse_html(html, &base());
        assert_eq!(page.links[0].as_str(), "https://example.test/other/page");
    }

    #[test]
    fn test_malformed_markup_degrades() {
        let html = "<html><body><p>unclosed <div>nested <a href='/x'>link<p>tail";
        let page = parse_html(html, &base());
        assert!(page.text.contains("unclosed"));
        assert!(page.text.contains("tail"));
        assert_eq!(page.links.len(), 1);

        let page = parse_html("<<<>>>&&&", &base());
        assert!(page.links.is_empty());
    }
}
