//! Durable mirror of the registry, with write throttling

use crate::config::{self, State};
use std::path::PathBuf;
use std::time::Duration;

/// Durable storage for coordinator state.
pub trait StateStore: Send + 'static {
    /// Read persisted state; missing or malformed data yields defaults.
    fn load(&self) -> State;
    fn save(&self, state: &State) -> Result<(), std::io::Error>;
}

/// `state.json` on disk
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Store at the platform data directory, if one exists.
    pub fn default_location() -> Option<Self> {
        config::state_path().map(Self::new)
    }
}

impl StateStore for FileStore {
    fn load(&self) -> State {
        config::load_state_from(&self.path)
    }

    fn save(&self, state: &State) -> Result<(), std::io::Error> {
        config::save_state_to(state, &self.path)
    }
}

/// Store that forgets everything; used when no data directory is available.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryStore;

impl StateStore for MemoryStore {
    fn load(&self) -> State {
        State::default()
    }

    fn save(&self, _state: &State) -> Result<(), std::io::Error> {
        Ok(())
    }
}

/// Coalesces mutations into at most one write per window.
///
/// The first mutation after a write schedules the next write one window out;
/// mutations arriving before it fires ride along with it.
#[derive(Debug)]
pub struct PersistThrottle {
    window: Duration,
    pending: bool,
}

impl PersistThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: false,
        }
    }

    /// Note a mutation. Returns the delay to schedule a write after, or
    /// `None` when a write is already scheduled.
    pub fn request(&mut self) -> Option<Duration> {
        if self.pending {
            return None;
        }
        self.pending = true;
        Some(self.window)
    }

    /// The scheduled write is due. Returns whether one was pending.
    pub fn fire(&mut self) -> bool {
        std::mem::take(&mut self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DurationRecord, TabId, VideoType};

    #[test]
    fn many_requests_schedule_one_write() {
        let mut throttle = PersistThrottle::new(Duration::from_secs(1));
        assert_eq!(throttle.request(), Some(Duration::from_secs(1)));
        for _ in 0..10 {
            assert_eq!(throttle.request(), None);
        }
        assert!(throttle.fire());
        assert!(!throttle.fire());
    }

    #[test]
    fn request_after_fire_schedules_again() {
        let mut throttle = PersistThrottle::new(Duration::from_millis(250));
        assert!(throttle.request().is_some());
        assert!(throttle.fire());
        assert!(!throttle.fire());
        assert!(throttle.request().is_some());
    }

    #[test]
    fn file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("state.json"));
        assert_eq!(store.load(), State::default());

        let state = State {
            records: vec![DurationRecord {
                tab_id: TabId(1),
                url: "https://www.youtube.com/shorts/x".into(),
                title: "x".into(),
                duration_seconds: 30.0,
                current_time_seconds: 3.0,
                playback_rate: 1.0,
                is_loading: false,
                is_live_stream: false,
                video_type: VideoType::Short,
                updated_at_ms: 0,
            }],
            display_enabled: false,
        };
        store.save(&state).unwrap();
        assert_eq!(store.load(), state);
    }
}
