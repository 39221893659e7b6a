//! Remaining-time arithmetic shared by the badge and the popup

use crate::DurationRecord;
use crate::format::{format_duration, format_duration_long};
use serde::{Deserialize, Serialize};

/// Wall-clock seconds left in one record, or `None` when the record must not
/// count toward the total (loading, live, or numerically unusable).
pub fn remaining_seconds(record: &DurationRecord) -> Option<f64> {
    if record.is_loading || record.is_live_stream {
        return None;
    }
    let rate = if record.playback_rate.is_finite() && record.playback_rate > 0.0 {
        record.playback_rate
    } else {
        1.0
    };
    let left = (record.duration_seconds - record.current_time_seconds).max(0.0) / rate;
    (left.is_finite() && left >= 0.0).then_some(left)
}

/// Sum of [`remaining_seconds`] over every record that counts.
pub fn total_remaining<'a>(records: impl IntoIterator<Item = &'a DurationRecord>) -> f64 {
    records.into_iter().filter_map(remaining_seconds).sum()
}

/// One row of the popup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEntry {
    #[serde(flatten)]
    pub record: DurationRecord,
    /// `None` when the record is excluded from the total
    pub remaining_seconds: Option<f64>,
}

/// Everything the detail view needs to render
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateSnapshot {
    pub records: Vec<SnapshotEntry>,
    pub total_seconds: f64,
    pub formatted: String,
    pub formatted_long: String,
    pub display_enabled: bool,
}

impl AggregateSnapshot {
    /// Build a snapshot from records already in display order.
    pub fn build<'a>(
        records: impl IntoIterator<Item = &'a DurationRecord>,
        display_enabled: bool,
    ) -> Self {
        let records: Vec<SnapshotEntry> = records
            .into_iter()
            .map(|record| SnapshotEntry {
                remaining_seconds: remaining_seconds(record),
                record: record.clone(),
            })
            .collect();
        let total_seconds = records.iter().filter_map(|e| e.remaining_seconds).sum();

        Self {
            records,
            total_seconds,
            formatted: format_duration(total_seconds),
            formatted_long: format_duration_long(total_seconds),
            display_enabled,
        }
    }
}
