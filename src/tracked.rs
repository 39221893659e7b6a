//! Which addresses count as tracked video pages

use crate::VideoType;
use url::Url;

const TRACKED_HOSTS: &[&str] = &["youtube.com", "www.youtube.com", "m.youtube.com"];

/// Classify a page address, returning `None` for anything that is not a
/// long-form watch page or a short-form page.
pub fn classify(address: &str) -> Option<VideoType> {
    let url = Url::parse(address).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?;
    if !TRACKED_HOSTS.contains(&host) {
        return None;
    }

    let path = url.path();
    if path == "/watch" {
        return url
            .query_pairs()
            .any(|(k, v)| k == "v" && !v.is_empty())
            .then_some(VideoType::Video);
    }

    let mut segments = url.path_segments()?;
    match (segments.next(), segments.next()) {
        (Some("shorts"), Some(id)) if !id.is_empty() => Some(VideoType::Short),
        _ => None,
    }
}

/// True when the address is a tracked video page.
pub fn is_tracked(address: &str) -> bool {
    classify(address).is_some()
}
