//! Picking the `<video>` element that is actually playing

use super::page::{PageSnapshot, VideoElement};
use crate::VideoType;

pub const PRIMARY_PLAYER: &str = "#movie_player";
pub const ACTIVE_REEL: &str = "ytd-reel-video-renderer[is-active]";

/// Long-form containers tried after the primary player
const PLAYER_FALLBACKS: &[&str] = &[".html5-video-player", "#player-container", "ytd-player"];

/// Resolve the element for the page layout.
pub fn resolve(page: &PageSnapshot, video_type: VideoType) -> Option<&VideoElement> {
    match video_type {
        VideoType::Short => resolve_short(&page.videos),
        VideoType::Video => resolve_long(&page.videos),
    }
}

fn resolve_short(videos: &[VideoElement]) -> Option<&VideoElement> {
    videos
        .iter()
        .find(|v| v.is_inside(ACTIVE_REEL))
        .or_else(|| videos.iter().find(|v| !v.paused && v.current_time > 0.0))
        .or_else(|| videos.first())
}

fn resolve_long(videos: &[VideoElement]) -> Option<&VideoElement> {
    std::iter::once(PRIMARY_PLAYER)
        .chain(PLAYER_FALLBACKS.iter().copied())
        .find_map(|selector| videos.iter().find(|v| v.is_inside(selector)))
        .or_else(|| videos.first())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(containers: &[&str], paused: bool, current_time: f64) -> VideoElement {
        VideoElement {
            containers: containers.iter().map(|c| c.to_string()).collect(),
            paused,
            current_time,
            duration: Some(60.0),
            playback_rate: None,
        }
    }

    fn page(videos: Vec<VideoElement>) -> PageSnapshot {
        PageSnapshot {
            videos,
            ..PageSnapshot::empty("https://www.youtube.com/watch?v=a")
        }
    }

    #[test]
    fn long_form_prefers_primary_player() {
        let page = page(vec![
            element(&["ytd-miniplayer"], false, 5.0),
            element(&["ytd-player", PRIMARY_PLAYER], true, 1.0),
        ]);
        let found = resolve(&page, VideoType::Video).unwrap();
        assert_eq!(found.current_time, 1.0);
    }

    #[test]
    fn long_form_walks_fallback_containers() {
        let page = page(vec![
            element(&["ytd-miniplayer"], false, 5.0),
            element(&["#player-container"], true, 2.0),
        ]);
        assert_eq!(resolve(&page, VideoType::Video).unwrap().current_time, 2.0);
    }

    #[test]
    fn long_form_falls_back_to_any_element() {
        let page = page(vec![element(&["div"], true, 7.0)]);
        assert_eq!(resolve(&page, VideoType::Video).unwrap().current_time, 7.0);
    }

    #[test]
    fn short_form_prefers_active_reel() {
        let page = page(vec![
            element(&["ytd-reel-video-renderer"], false, 9.0),
            element(&["ytd-reel-video-renderer", ACTIVE_REEL], true, 0.0),
        ]);
        let found = resolve(&page, VideoType::Short).unwrap();
        assert!(found.is_inside(ACTIVE_REEL));
    }

    #[test]
    fn short_form_falls_back_to_playing_then_first() {
        let playing = page(vec![
            element(&["ytd-reel-video-renderer"], true, 0.0),
            element(&["ytd-reel-video-renderer"], false, 3.0),
        ]);
        assert_eq!(resolve(&playing, VideoType::Short).unwrap().current_time, 3.0);

        let idle = page(vec![
            element(&["a"], true, 0.0),
            element(&["b"], false, 0.0),
        ]);
        assert!(resolve(&idle, VideoType::Short).unwrap().is_inside("a"));
    }

    #[test]
    fn no_elements_resolves_nothing() {
        assert!(resolve(&page(Vec::new()), VideoType::Video).is_none());
        assert!(resolve(&page(Vec::new()), VideoType::Short).is_none());
    }
}
