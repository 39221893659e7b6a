//! Structured view of a video page, as delivered by the browser shim

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::HashMap;

/// A `<video>` element and the containers it sits under
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoElement {
    /// Selectors of ancestor containers, e.g. `#movie_player`
    #[serde(default)]
    pub containers: Vec<String>,
    #[serde(default = "default_paused")]
    pub paused: bool,
    #[serde(default)]
    pub current_time: f64,
    /// Element duration; `None` before metadata loads, infinite for live
    #[serde(
        default,
        serialize_with = "serialize_media_duration",
        deserialize_with = "deserialize_media_duration"
    )]
    pub duration: Option<f64>,
    #[serde(default)]
    pub playback_rate: Option<f64>,
}

fn default_paused() -> bool {
    true
}

impl VideoElement {
    pub fn is_inside(&self, selector: &str) -> bool {
        self.containers.iter().any(|c| c == selector)
    }

    /// Finite, positive duration reported by the element itself
    pub fn usable_duration(&self) -> Option<f64> {
        self.duration.filter(|d| d.is_finite() && *d > 0.0)
    }

    pub fn reports_infinite(&self) -> bool {
        self.duration.is_some_and(|d| d.is_infinite() && d > 0.0)
    }
}

/// Everything the extractor reads from one page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub url: String,
    #[serde(default)]
    pub document_title: String,
    #[serde(default)]
    pub videos: Vec<VideoElement>,
    /// Data object hydrated into the page's player component
    #[serde(default)]
    pub component_data: Option<Value>,
    /// Page-global initial player state from a full load
    #[serde(default)]
    pub initial_player_response: Option<Value>,
    /// Inline `<script>` bodies
    #[serde(default)]
    pub scripts: Vec<String>,
    /// Heading text keyed by the selector that matched it
    #[serde(default)]
    pub headings: HashMap<String, String>,
}

impl PageSnapshot {
    pub fn empty(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

// JSON has no infinity, so live elements send the string "Infinity".
fn serialize_media_duration<S>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(d) if d.is_infinite() => serializer.serialize_str("Infinity"),
        Some(d) if d.is_nan() => serializer.serialize_none(),
        Some(d) => serializer.serialize_f64(*d),
        None => serializer.serialize_none(),
    }
}

fn deserialize_media_duration<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => match s.as_str() {
            "Infinity" | "inf" => Some(f64::INFINITY),
            other => other.parse::<f64>().ok().filter(|d| d.is_finite()),
        },
        _ => None,
    })
}
