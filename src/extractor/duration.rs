//! Duration sources, tried in order until one yields a positive value

use super::page::{PageSnapshot, VideoElement};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use tracing::trace;

/// A pure lookup of the video length from one page data source
pub type DurationStrategy = fn(&PageSnapshot) -> Option<f64>;

/// Structured sources first, the script scan last.
pub const STRATEGIES: &[(&str, DurationStrategy)] = &[
    ("component_data", from_component_data),
    ("initial_player_response", from_initial_player_response),
    ("inline_script", from_inline_scripts),
];

const DETAILS_POINTERS: &[&str] = &["/videoDetails", "/playerResponse/videoDetails"];

fn length_seconds_regex() -> &'static Regex {
    static LENGTH_SECONDS: OnceLock<Regex> = OnceLock::new();
    LENGTH_SECONDS
        .get_or_init(|| Regex::new(r#""lengthSeconds"\s*:\s*"?(\d+)"?"#).expect("valid regex"))
}

fn positive(value: f64) -> Option<f64> {
    (value.is_finite() && value > 0.0).then_some(value)
}

fn video_details(data: &Value) -> Option<&Value> {
    DETAILS_POINTERS.iter().find_map(|p| data.pointer(p))
}

/// `videoDetails.lengthSeconds`, which the site sends as a string.
fn length_seconds(data: &Value) -> Option<f64> {
    let length = video_details(data)?.get("lengthSeconds")?;
    let seconds = match length {
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        other => other.as_f64()?,
    };
    positive(seconds)
}

fn marked_live(data: &Value) -> bool {
    video_details(data)
        .and_then(|d| d.get("isLive"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Hydrated component data; present right after in-page navigation.
pub fn from_component_data(page: &PageSnapshot) -> Option<f64> {
    page.component_data.as_ref().and_then(length_seconds)
}

/// Page-global initial state; present on a fresh full load.
pub fn from_initial_player_response(page: &PageSnapshot) -> Option<f64> {
    page.initial_player_response.as_ref().and_then(length_seconds)
}

/// Last resort: scan inline script text for an embedded length field.
pub fn from_inline_scripts(page: &PageSnapshot) -> Option<f64> {
    let re = length_seconds_regex();
    page.scripts.iter().find_map(|script| {
        re.captures(script)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .and_then(positive)
    })
}

/// Page data strategies only, in order.
pub fn from_page_data(page: &PageSnapshot) -> Option<f64> {
    STRATEGIES.iter().find_map(|(name, strategy)| {
        let seconds = strategy(page)?;
        trace!(strategy = *name, seconds, "duration from page data");
        Some(seconds)
    })
}

/// The element's own duration when it has one, otherwise the page data.
pub fn resolve(page: &PageSnapshot, element: Option<&VideoElement>) -> Option<f64> {
    element
        .and_then(VideoElement::usable_duration)
        .or_else(|| from_page_data(page))
}

/// Live if either data source says so or the element runs forever.
pub fn is_live(page: &PageSnapshot, element: Option<&VideoElement>) -> bool {
    page.component_data.as_ref().is_some_and(marked_live)
        || page.initial_player_response.as_ref().is_some_and(marked_live)
        || element.is_some_and(VideoElement::reports_infinite)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn page() -> PageSnapshot {
        PageSnapshot::empty("https://www.youtube.com/watch?v=a")
    }

    fn element(duration: Option<f64>) -> VideoElement {
        VideoElement {
            containers: Vec::new(),
            paused: false,
            current_time: 0.0,
            duration,
            playback_rate: None,
        }
    }

    #[test]
    fn component_data_wins_over_later_sources() {
        let mut page = page();
        page.component_data = Some(json!({"videoDetails": {"lengthSeconds": "213"}}));
        page.initial_player_response = Some(json!({"videoDetails": {"lengthSeconds": "999"}}));
        assert_eq!(from_page_data(&page), Some(213.0));
    }

    #[test]
    fn nested_player_response_is_read() {
        let mut page = page();
        page.component_data =
            Some(json!({"playerResponse": {"videoDetails": {"lengthSeconds": 61}}}));
        assert_eq!(from_component_data(&page), Some(61.0));
    }

    #[test]
    fn falls_through_to_initial_state() {
        let mut page = page();
        page.component_data = Some(json!({"videoDetails": {"lengthSeconds": "0"}}));
        page.initial_player_response = Some(json!({"videoDetails": {"lengthSeconds": "480"}}));
        assert_eq!(from_page_data(&page), Some(480.0));
    }

    #[test]
    fn script_scan_is_last_resort() {
        let mut page = page();
        page.scripts = vec![
            "var a = 1;".into(),
            r#"window["ytInitialData"] = {"lengthSeconds":"1234","title":"x"};"#.into(),
        ];
        assert_eq!(from_inline_scripts(&page), Some(1234.0));
        assert_eq!(from_page_data(&page), Some(1234.0));
    }

    #[test]
    fn nothing_found_is_none() {
        let mut page = page();
        page.component_data = Some(json!({"videoDetails": {}}));
        page.scripts = vec![r#"{"lengthSeconds":"0"}"#.into()];
        assert_eq!(from_page_data(&page), None);
        assert_eq!(resolve(&page, None), None);
    }

    #[test]
    fn element_duration_overrides_page_data() {
        let mut page = page();
        page.initial_player_response = Some(json!({"videoDetails": {"lengthSeconds": "600"}}));
        assert_eq!(resolve(&page, Some(&element(Some(601.4)))), Some(601.4));
        assert_eq!(resolve(&page, Some(&element(None))), Some(600.0));
        assert_eq!(resolve(&page, Some(&element(Some(f64::INFINITY)))), Some(600.0));
    }

    #[test]
    fn live_detection() {
        let mut page = page();
        assert!(!is_live(&page, None));
        assert!(is_live(&page, Some(&element(Some(f64::INFINITY)))));

        page.initial_player_response = Some(json!({"videoDetails": {"isLive": true}}));
        assert!(is_live(&page, None));
    }
}
