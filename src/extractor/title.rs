//! Video title from the document title or visible headings

use super::page::PageSnapshot;
use super::video::ACTIVE_REEL;

const SITE_NAME: &str = "YouTube";
const TITLE_SUFFIX: &str = " - YouTube";
pub const UNTITLED: &str = "Untitled video";

/// Heading selectors, short-form active reel first
fn heading_selectors() -> [String; 4] {
    [
        format!("{ACTIVE_REEL} h2"),
        "h1.ytd-watch-metadata".to_string(),
        "h1.title".to_string(),
        "#title h1".to_string(),
    ]
}

/// Document title without the site suffix or the unread-count prefix.
fn from_document_title(title: &str) -> Option<&str> {
    let trimmed = title.trim_end();
    let trimmed = trimmed.strip_suffix(TITLE_SUFFIX).unwrap_or(trimmed).trim();
    // "(3) Some video" - notification count prefix
    let trimmed = match trimmed.strip_prefix('(') {
        Some(rest) => match rest.split_once(") ") {
            Some((count, title))
                if !count.is_empty() && count.chars().all(|c| c.is_ascii_digit()) =>
            {
                title
            }
            _ => trimmed,
        },
        None => trimmed,
    };
    let trimmed = trimmed.trim();
    (!trimmed.is_empty() && trimmed != SITE_NAME).then_some(trimmed)
}

pub fn resolve(page: &PageSnapshot) -> String {
    if let Some(title) = from_document_title(&page.document_title) {
        return title.to_string();
    }
    heading_selectors()
        .iter()
        .filter_map(|selector| page.headings.get(selector))
        .map(|text| text.trim())
        .find(|text| !text.is_empty())
        .unwrap_or(UNTITLED)
        .to_string()
}
