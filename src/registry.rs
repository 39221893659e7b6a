//! Tab registry - the authoritative map of tracked tabs and their records

use crate::aggregate::{self, AggregateSnapshot};
use crate::config::State;
use crate::format::format_duration;
use crate::{DurationRecord, DurationResponse, TabId, tracked};
use std::collections::HashMap;
use tracing::{debug, info, trace};

/// Result of applying a page report to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    /// Record created or overwritten
    Upserted,
    /// The page left the tracked pattern and its record was dropped
    Removed,
    /// Untracked page with no record; nothing changed
    Ignored,
}

impl ReportOutcome {
    pub fn changed(self) -> bool {
        !matches!(self, Self::Ignored)
    }
}

/// Registry of tracked tabs
#[derive(Debug)]
pub struct TabRegistry {
    records: HashMap<TabId, DurationRecord>,
    display_enabled: bool,
}

impl Default for TabRegistry {
    fn default() -> Self {
        Self {
            records: HashMap::new(),
            display_enabled: true,
        }
    }
}

impl TabRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rehydrate from persisted state.
    pub fn from_state(state: State) -> Self {
        let records = state
            .records
            .into_iter()
            .map(|record| (record.tab_id, record))
            .collect();
        Self {
            records,
            display_enabled: state.display_enabled,
        }
    }

    pub fn to_state(&self) -> State {
        State {
            records: self.sorted_records().into_iter().cloned().collect(),
            display_enabled: self.display_enabled,
        }
    }

    /// Apply a push or pull response for a tab.
    ///
    /// A response whose URL is outside the tracked pattern removes the tab.
    pub fn apply_report(
        &mut self,
        tab_id: TabId,
        response: DurationResponse,
        now_ms: u64,
    ) -> ReportOutcome {
        if !tracked::is_tracked(&response.url) {
            return if self.remove(tab_id) {
                ReportOutcome::Removed
            } else {
                ReportOutcome::Ignored
            };
        }

        trace!(%tab_id, loading = response.is_loading, "record upserted");
        let record = DurationRecord::from_response(tab_id, response, now_ms);
        if self.records.insert(tab_id, record).is_none() {
            debug!(%tab_id, "{} tracked tab(s)", self.records.len());
        }
        ReportOutcome::Upserted
    }

    /// Drop a tab's record. Returns whether one existed.
    pub fn remove(&mut self, tab_id: TabId) -> bool {
        let removed = self.records.remove(&tab_id).is_some();
        if removed {
            info!(%tab_id, "record removed");
            debug!("{} tracked tab(s)", self.records.len());
        }
        removed
    }

    /// Flip the display preference, returning the new value.
    pub fn toggle_display(&mut self) -> bool {
        self.display_enabled = !self.display_enabled;
        info!(enabled = self.display_enabled, "display toggled");
        self.display_enabled
    }

    pub fn display_enabled(&self) -> bool {
        self.display_enabled
    }

    /// Records ordered by tab id
    pub fn sorted_records(&self) -> Vec<&DurationRecord> {
        let mut records: Vec<&DurationRecord> = self.records.values().collect();
        records.sort_by_key(|r| r.tab_id);
        records
    }

    pub fn total_remaining(&self) -> f64 {
        aggregate::total_remaining(self.records.values())
    }

    pub fn snapshot(&self) -> AggregateSnapshot {
        AggregateSnapshot::build(self.sorted_records(), self.display_enabled)
    }

    /// Text for the indicator: empty when disabled or nothing remains.
    pub fn badge_text(&self) -> String {
        if !self.display_enabled {
            return String::new();
        }
        let total = self.total_remaining();
        if total > 0.0 {
            format_duration(total)
        } else {
            String::new()
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
