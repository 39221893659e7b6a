//! Per-page extraction
//!
//! Everything here except [`agent`] is a pure function of a [`PageSnapshot`]:
//! element resolution, the ordered duration strategies, live detection and
//! title lookup. [`agent`] wraps them in the per-page state machine that
//! answers pulls and pushes periodic reports.

pub mod agent;
pub mod duration;
pub mod page;
pub mod title;
pub mod video;

pub use agent::{PageAgent, PageAgentHandle, PageSignal, PageSource, SharedPage};
pub use page::{PageSnapshot, VideoElement};

use crate::{DurationResponse, tracked};

/// One extraction pass over a page
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub response: DurationResponse,
    /// A `<video>` element was resolved, with or without a duration
    pub element_found: bool,
}

/// Build a response from the page as it is right now. Never fails: missing
/// data yields a loading response with zero duration and position.
pub fn extract(page: &PageSnapshot) -> Extraction {
    let video_type = tracked::classify(&page.url).unwrap_or_default();
    let element = video::resolve(page, video_type);
    let title = title::resolve(page);
    let is_live_stream = duration::is_live(page, element);

    let Some(duration_seconds) = duration::resolve(page, element) else {
        let mut response = DurationResponse::loading(page.url.clone(), title, video_type);
        response.is_live_stream = is_live_stream;
        return Extraction {
            response,
            element_found: element.is_some(),
        };
    };

    let current_time_seconds = element
        .map(|e| e.current_time)
        .filter(|t| t.is_finite() && *t > 0.0)
        .unwrap_or(0.0);
    let playback_rate = element
        .and_then(|e| e.playback_rate)
        .filter(|r| r.is_finite() && *r > 0.0)
        .unwrap_or(1.0);

    Extraction {
        response: DurationResponse {
            duration_seconds,
            current_time_seconds,
            playback_rate,
            is_loading: false,
            is_live_stream,
            video_type,
            url: page.url.clone(),
            title,
        },
        element_found: element.is_some(),
    }
}
