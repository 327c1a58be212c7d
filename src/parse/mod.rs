//! Document parsing and text extraction
//!
//! This module handles:
//! - HTML parsing: markup stripping, title and outgoing links
//! - Plain text normalization
//! - Content type detection from response headers
//!
//! Extraction is best-effort: malformed markup yields degraded output,
//! never an error.

mod html;
mod text;

pub use html::*;
pub use text::*;

use std::path::Path;
use url::Url;

/// Content types we can index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Html,
    PlainText,
    Unknown,
}

impl ContentType {
    /// Detect content type from MIME type
    pub fn from_mime(mime: &str) -> Self {
        let mime_lower = mime.to_lowercase();
        if mime_lower.contains("text/html") || mime_lower.contains("application/xhtml") {
            ContentType::Html
        } else if mime_lower.contains("text/plain") {
            ContentType::PlainText
        } else {
            ContentType::Unknown
        }
    }

    /// Detect from an optional `Content-Type` header, assuming HTML when
    /// the server sends none (common for small static sites).
    pub fn detect(mime: Option<&str>) -> Self {
        match mime {
            Some(m) => Self::from_mime(m),
            None => ContentType::Html,
        }
    }

    pub fn is_indexable(&self) -> bool {
        !matches!(self, ContentType::Unknown)
    }
}

/// Text, title and links extracted from one fetched document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedPage {
    /// Document title (if found)
    pub title: Option<String>,

    /// Plain text with markup removed and whitespace collapsed
    pub text: String,

    /// Absolute outgoing hyperlinks, deduplicated, in document order
    pub links: Vec<Url>,
}

/// Extract text, title and links according to the content type
pub fn extract_page(content: &str, content_type: ContentType, base_url: &Url) -> ExtractedPage {
    match content_type {
        ContentType::Html => parse_html(content, base_url),
        ContentType::PlainText | ContentType::Unknown => parse_plain_text(content),
    }
}

/// Check if a URL path points at a resource that is never a text document
pub fn is_skippable_resource(path: &str) -> bool {
    let skip_extensions = [
        "png", "jpg", "jpeg", "gif", "bmp", "ico", "svg", "webp", "avif", "mp3", "mp4", "wav",
        "ogg", "webm", "avi", "mov", "zip", "tar", "gz", "bz2", "xz", "7z", "rar", "exe", "dmg",
        "iso", "woff", "woff2", "ttf", "otf", "eot", "css", "js", "json", "xml", "rss", "atom",
        "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx",
    ];

    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|ext| skip_extensions.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Collapse every whitespace run into a single space
pub fn normalize_whitespace(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut pending_space = false;

    for c in text.chars() {
        if c.is_whitespace() {
            pending_space = true;
        } else {
            if pending_space && !result.is_empty() {
                result.push(' ');
            }
            pending_space = false;
            result.push(c);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_detection() {
        assert_eq!(
            ContentType::from_mime("text/html; charset=utf-8"),
            ContentType::Html
        );
        assert_eq!(ContentType::from_mime("text/plain"), ContentType::PlainText);
        assert_eq!(ContentType::from_mime("image/png"), ContentType::Unknown);
        assert_eq!(ContentType::detect(None), ContentType::Html);
        assert!(!ContentType::detect(Some("application/pdf")).is_indexable());
    }

    #[test]
    fn test_normalize_whitespace() {
        let input = "  Hello   world\n\n\n\ttest  ";
        assert_eq!(normalize_whitespace(input), "Hello world test");
        assert_eq!(normalize_whitespace("   "), "");
    }

    #[test]
    fn test_is_skippable_resource() {
        assert!(is_skippable_resource("/images/logo.PNG"));
        assert!(is_skippable_resource("/files/report.pdf"));
        assert!(!is_skippable_resource("/docs/intro"));
        assert!(!is_skippable_resource("/index.html"));
    }

    #[test]
    fn test_extract_page_dispatch() {
        let base = Url::parse("https://example.test/").unwrap();
        let page = extract_page("Plain title\nbody text", ContentType::PlainText, &base);
        assert_eq!(page.title.as_deref(), Some("Plain title"));
        assert!(page.links.is_empty());
    }
}
