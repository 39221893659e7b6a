//! Wire protocol for the daemon socket
//!
//! Every peer (browser bridge, page extractor, CLI) speaks newline-delimited
//! JSON tagged by `type`. [`Inbound`] is what the daemon reads, [`Outbound`]
//! is what it writes back.

use crate::aggregate::AggregateSnapshot;
use crate::extractor::PageSnapshot;
use crate::transport::{TabInfo, TabStatus};
use crate::{DurationResponse, TabId};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Socket name for IPC communication
pub const SOCKET_NAME: &str = "watchleft.sock";

/// Get the socket path for IPC communication
///
/// Uses XDG_RUNTIME_DIR if available, falls back to the temp dir
pub fn socket_path() -> PathBuf {
    let runtime_dir = std::env::var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir());
    runtime_dir.join(SOCKET_NAME)
}

/// What a connection is, announced in its `hello`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The browser-side bridge: tab events in, badge and injection out
    Host,
    /// One page extractor, bound to a tab
    Page,
}

/// Message read by the daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    Hello {
        role: Role,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tab_id: Option<TabId>,
    },

    // Host bridge
    /// Full list of open tabs, replacing whatever the daemon knew
    Tabs { tabs: Vec<TabInfo> },
    TabUpdated {
        tab_id: TabId,
        url: String,
        #[serde(default)]
        status: TabStatus,
        #[serde(default)]
        discarded: bool,
    },
    TabRemoved { tab_id: TabId },
    HistoryStateUpdated { tab_id: TabId, url: String },
    Reconcile,

    // Page extractor
    /// Unsolicited push
    ReportDuration { response: DurationResponse },
    /// Answer to [`Outbound::GetDuration`]
    Duration { id: u64, response: DurationResponse },

    // Detail view
    GetPopupData,
    ToggleDisplay,
}

/// Message written by the daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    SetBadge { text: String },
    Inject { tab_id: TabId },
    GetDuration { id: u64 },
    PopupData { snapshot: AggregateSnapshot },
    DisplayToggled { enabled: bool },
}

/// Page events fed to `watchleft page` on stdin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PageEvent {
    /// Replace the page state; does not by itself trigger resolution
    Snapshot { page: PageSnapshot },
    DomMutated,
    MetadataReady,
    NavigateFinished { url: String },
    HistoryChanged { url: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VideoType;

    #[test]
    fn socket_path_ends_with_socket_name() {
        let path = socket_path();
        assert!(path.ends_with(SOCKET_NAME));
    }

    #[test]
    fn hello_variants() {
        let host: Inbound = serde_json::from_str(r#"{"type":"hello","role":"host"}"#).unwrap();
        assert_eq!(
            host,
            Inbound::Hello {
                role: Role::Host,
                tab_id: None
            }
        );

        let page: Inbound =
            serde_json::from_str(r#"{"type":"hello","role":"page","tab_id":7}"#).unwrap();
        assert_eq!(
            page,
            Inbound::Hello {
                role: Role::Page,
                tab_id: Some(TabId(7))
            }
        );
    }

    #[test]
    fn tab_updated_defaults() {
        let json = r#"{"type":"tab_updated","tab_id":1,"url":"https://www.youtube.com/watch?v=a"}"#;
        match serde_json::from_str::<Inbound>(json).unwrap() {
            Inbound::TabUpdated {
                status, discarded, ..
            } => {
                assert_eq!(status, TabStatus::Complete);
                assert!(!discarded);
            }
            other => panic!("expected tab_updated, got {other:?}"),
        }
    }

    #[test]
    fn report_duration_uses_camel_case_payload() {
        let response = DurationResponse::loading("https://www.youtube.com/shorts/s", "s", VideoType::Short);
        let json = serde_json::to_string(&Inbound::ReportDuration { response }).unwrap();
        assert!(json.contains(r#""type":"report_duration""#));
        assert!(json.contains(r#""isLoading":true"#));
        assert!(json.contains(r#""videoType":"short""#));
    }

    #[test]
    fn all_inbound_variants_parse() {
        let messages = [
            r#"{"type":"hello","role":"host"}"#,
            r#"{"type":"tabs","tabs":[{"tab_id":1,"url":"about:blank"}]}"#,
            r#"{"type":"tab_updated","tab_id":1,"url":"u","status":"loading","discarded":true}"#,
            r#"{"type":"tab_removed","tab_id":1}"#,
            r#"{"type":"history_state_updated","tab_id":1,"url":"u"}"#,
            r#"{"type":"reconcile"}"#,
            r#"{"type":"get_popup_data"}"#,
            r#"{"type":"toggle_display"}"#,
        ];
        for json in messages {
            let _message: Inbound = serde_json::from_str(json).unwrap();
        }
    }

    #[test]
    fn outbound_wire_shape() {
        let json = serde_json::to_string(&Outbound::SetBadge { text: "20m".into() }).unwrap();
        assert_eq!(json, r#"{"type":"set_badge","text":"20m"}"#);
        let json = serde_json::to_string(&Outbound::GetDuration { id: 3 }).unwrap();
        assert_eq!(json, r#"{"type":"get_duration","id":3}"#);
    }

    #[test]
    fn page_events_parse() {
        let event: PageEvent =
            serde_json::from_str(r#"{"type":"snapshot","page":{"url":"https://www.youtube.com/watch?v=a"}}"#)
                .unwrap();
        match event {
            PageEvent::Snapshot { page } => assert!(page.videos.is_empty()),
            other => panic!("expected snapshot, got {other:?}"),
        }
        let event: PageEvent = serde_json::from_str(r#"{"type":"dom_mutated"}"#).unwrap();
        assert_eq!(event, PageEvent::DomMutated);
    }
}
