//! Transport seams between the coordinator, page extractors, and the host
//!
//! Requests either complete or fail as a whole; there is no partial delivery.

use crate::{DurationResponse, TabId};
use serde::{Deserialize, Serialize};
use std::future::Future;
use thiserror::Error;

/// A request to a page or host that did not produce an answer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Nothing is attached on the other end (no extractor, no bridge)
    #[error("no receiver attached for tab {0}")]
    NotConnected(TabId),
    /// The receiver went away before answering
    #[error("receiver disconnected before replying")]
    Disconnected,
    #[error("no reply within {0:?}")]
    TimedOut(std::time::Duration),
    /// The host has not told us which tabs are open
    #[error("tab list unknown, no host bridge has reported it")]
    TabsUnknown,
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Outcome of a fire-and-forget send.
///
/// `Unreachable` is expected whenever the receiver is not attached yet and is
/// safe to discard; callers only match on it for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Unreachable,
}

/// Lifecycle phase reported with a tab update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TabStatus {
    Loading,
    #[default]
    Complete,
}

/// An open tab as the host currently sees it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabInfo {
    pub tab_id: TabId,
    pub url: String,
    /// Unloaded by the host; cannot answer pulls until revived
    #[serde(default)]
    pub discarded: bool,
}

/// Capabilities the coordinator needs from the browser.
pub trait Host: Send + Sync + 'static {
    /// Every open tab. Fails when the host cannot say, which is not the same
    /// as an empty list.
    fn query_tabs(&self) -> impl Future<Output = Result<Vec<TabInfo>, TransportError>> + Send;

    /// Ask a tab's extractor for a fresh report.
    fn pull(
        &self,
        tab_id: TabId,
    ) -> impl Future<Output = Result<DurationResponse, TransportError>> + Send;

    /// (Re-)attach the extractor to a tab.
    fn inject(&self, tab_id: TabId) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Paint the indicator text. An empty string clears it.
    fn set_badge(&self, text: &str) -> SendOutcome;
}

/// Where a page extractor sends its unsolicited reports.
pub trait Reporter: Send + Sync + 'static {
    fn report(&self, response: DurationResponse) -> SendOutcome;
}
