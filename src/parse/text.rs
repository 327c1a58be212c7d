//! Plain text parsing

use super::{normalize_whitespace, ExtractedPage};

/// Parse plain text content. A short first line doubles as the title.
pub fn parse_plain_text(content: &str) -> ExtractedPage {
    let title = content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .filter(|line| line.chars().count() < 100)
        .map(str::to_string);

    ExtractedPage {
        title,
        text: normalize_whitespace(content),
        links: Vec::new(),
    }
}
