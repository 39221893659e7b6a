//! Per-tab duration records and page responses

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, stable identifier of a browser tab
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub u64);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Layout of the video page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VideoType {
    /// Long-form `/watch` page
    #[default]
    Video,
    /// Short-form `/shorts/<id>` page
    Short,
}

/// What a page extractor answers to a pull, or pushes unsolicited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DurationResponse {
    pub duration_seconds: f64,
    pub current_time_seconds: f64,
    #[serde(default = "default_rate")]
    pub playback_rate: f64,
    pub is_loading: bool,
    #[serde(default)]
    pub is_live_stream: bool,
    #[serde(default)]
    pub video_type: VideoType,
    pub url: String,
    #[serde(default)]
    pub title: String,
}

fn default_rate() -> f64 {
    1.0
}

impl DurationResponse {
    /// A response for a page where no duration source resolved yet.
    pub fn loading(url: impl Into<String>, title: impl Into<String>, video_type: VideoType) -> Self {
        Self {
            duration_seconds: 0.0,
            current_time_seconds: 0.0,
            playback_rate: 1.0,
            is_loading: true,
            is_live_stream: false,
            video_type,
            url: url.into(),
            title: title.into(),
        }
    }
}

/// The coordinator's last-known snapshot of one tracked tab
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DurationRecord {
    pub tab_id: TabId,
    pub url: String,
    #[serde(default)]
    pub title: String,
    pub duration_seconds: f64,
    pub current_time_seconds: f64,
    #[serde(default = "default_rate")]
    pub playback_rate: f64,
    pub is_loading: bool,
    #[serde(default)]
    pub is_live_stream: bool,
    #[serde(default)]
    pub video_type: VideoType,
    /// Unix millis of the last applied push or pull
    #[serde(default)]
    pub updated_at_ms: u64,
}

impl DurationRecord {
    pub fn from_response(tab_id: TabId, response: DurationResponse, updated_at_ms: u64) -> Self {
        Self {
            tab_id,
            url: response.url,
            title: response.title,
            duration_seconds: response.duration_seconds,
            current_time_seconds: response.current_time_seconds,
            playback_rate: response.playback_rate,
            is_loading: response.is_loading,
            is_live_stream: response.is_live_stream,
            video_type: response.video_type,
            updated_at_ms,
        }
    }
}

/// Current unix time in milliseconds
pub(crate) fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_uses_camel_case_keys() {
        let response = DurationResponse {
            duration_seconds: 600.0,
            current_time_seconds: 12.5,
            playback_rate: 1.5,
            is_loading: false,
            is_live_stream: false,
            video_type: VideoType::Short,
            url: "https://www.youtube.com/shorts/abc".into(),
            title: "clip".into(),
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"durationSeconds\":600.0"));
        assert!(json.contains("\"isLiveStream\":false"));
        assert!(json.contains("\"videoType\":\"short\""));
    }

    #[test]
    fn response_missing_optional_fields_default() {
        let json = r#"{"durationSeconds":10,"currentTimeSeconds":2,"isLoading":false,"url":"u"}"#;
        let response: DurationResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.playback_rate, 1.0);
        assert_eq!(response.video_type, VideoType::Video);
        assert!(!response.is_live_stream);
        assert!(response.title.is_empty());
    }

    #[test]
    fn loading_response_is_zeroed() {
        let response = DurationResponse::loading("u", "t", VideoType::Video);
        assert!(response.is_loading);
        assert_eq!(response.duration_seconds, 0.0);
        assert_eq!(response.current_time_seconds, 0.0);
    }

    #[test]
    fn record_from_response_keeps_fields() {
        let mut response = DurationResponse::loading("u", "t", VideoType::Short);
        response.is_loading = false;
        response.duration_seconds = 42.0;
        let record = DurationRecord::from_response(TabId(7), response, 99);
        assert_eq!(record.tab_id, TabId(7));
        assert_eq!(record.duration_seconds, 42.0);
        assert_eq!(record.video_type, VideoType::Short);
        assert_eq!(record.updated_at_ms, 99);
    }

    #[test]
    fn tab_id_is_transparent() {
        assert_eq!(serde_json::to_string(&TabId(12)).unwrap(), "12");
        assert_eq!(TabId(12).to_string(), "12");
    }
}
