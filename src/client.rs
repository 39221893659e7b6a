//! Socket clients: the page bridge and the detail-view requests

use crate::aggregate::AggregateSnapshot;
use crate::config::Config;
use crate::extractor::{PageAgent, PageAgentHandle, PageSignal, PageSnapshot, SharedPage};
use crate::format::{format_duration, format_timestamp};
use crate::protocol::{Inbound, Outbound, PageEvent, Role};
use crate::transport::{Reporter, SendOutcome, TransportError};
use crate::{DurationResponse, TabId, VideoType};
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

const TITLE_WIDTH: usize = 48;

async fn send_line(writer: &mut OwnedWriteHalf, message: &Inbound) -> Result<(), TransportError> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    Ok(())
}

/// Read daemon messages until `pick` accepts one.
async fn read_until<T>(
    lines: &mut Lines<BufReader<OwnedReadHalf>>,
    mut pick: impl FnMut(Outbound) -> Option<T>,
) -> Result<T, TransportError> {
    while let Some(line) = lines.next_line().await? {
        match serde_json::from_str::<Outbound>(&line) {
            Ok(message) => {
                if let Some(value) = pick(message) {
                    return Ok(value);
                }
            }
            Err(e) => trace!("Failed to parse daemon message: {} (line: {})", e, line),
        }
    }
    Err(TransportError::Disconnected)
}

async fn request<T>(
    path: &Path,
    message: Inbound,
    pick: impl FnMut(Outbound) -> Option<T>,
) -> Result<T, TransportError> {
    let (reader, mut writer) = UnixStream::connect(path).await?.into_split();
    send_line(&mut writer, &message).await?;
    let mut lines = BufReader::new(reader).lines();
    read_until(&mut lines, pick).await
}

/// Ask the daemon for the detail-view snapshot.
pub async fn request_popup(path: &Path) -> Result<AggregateSnapshot, TransportError> {
    request(path, Inbound::GetPopupData, |message| match message {
        Outbound::PopupData { snapshot } => Some(snapshot),
        _ => None,
    })
    .await
}

/// Flip the display preference; returns the new value.
pub async fn request_toggle(path: &Path) -> Result<bool, TransportError> {
    request(path, Inbound::ToggleDisplay, |message| match message {
        Outbound::DisplayToggled { enabled } => Some(enabled),
        _ => None,
    })
    .await
}

/// Ask the daemon for a bulk reconciliation sweep. Nothing is answered.
pub async fn request_reconcile(path: &Path) -> Result<(), TransportError> {
    let mut stream = UnixStream::connect(path).await?;
    let mut line = serde_json::to_string(&Inbound::Reconcile)?;
    line.push('\n');
    stream.write_all(line.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Truncate to `width` display columns, ending in an ellipsis when cut.
fn truncate(text: &str, width: usize) -> String {
    if text.width() <= width {
        return text.to_string();
    }
    let mut out = String::new();
    let mut used = 0;
    for c in text.chars() {
        let w = c.width().unwrap_or(0);
        if used + w + 1 > width {
            break;
        }
        used += w;
        out.push(c);
    }
    out.push('…');
    out
}

fn pad(text: &str, width: usize) -> String {
    let fill = width.saturating_sub(text.width());
    format!("{text}{}", " ".repeat(fill))
}

/// Plain-text rendering of the detail view.
pub fn render_popup(snapshot: &AggregateSnapshot) -> String {
    let mut out = String::new();
    if snapshot.records.is_empty() {
        out.push_str("No videos open\n");
    }
    for entry in &snapshot.records {
        let record = &entry.record;
        let remaining = match entry.remaining_seconds {
            Some(seconds) => format_duration(seconds),
            None if record.is_live_stream => "live".to_string(),
            None => "loading".to_string(),
        };
        let kind = match record.video_type {
            VideoType::Video => "",
            VideoType::Short => " [short]",
        };
        let position = if record.is_loading {
            "-".to_string()
        } else {
            format!(
                "{} / {}",
                format_timestamp(record.current_time_seconds),
                format_timestamp(record.duration_seconds)
            )
        };
        let title = truncate(&format!("{}{kind}", record.title), TITLE_WIDTH);
        out.push_str(&format!(
            "{:>6}  {}  {:>17}  {}\n",
            record.tab_id,
            pad(&title, TITLE_WIDTH),
            position,
            remaining
        ));
    }
    out.push_str(&format!("Total: {}", snapshot.formatted_long));
    if !snapshot.display_enabled {
        out.push_str(" (badge hidden)");
    }
    out.push('\n');
    out
}

/// Pushes reports onto the page's socket.
struct SocketReporter(mpsc::UnboundedSender<Inbound>);

impl Reporter for SocketReporter {
    fn report(&self, response: DurationResponse) -> SendOutcome {
        match self.0.send(Inbound::ReportDuration { response }) {
            Ok(()) => SendOutcome::Sent,
            Err(_) => SendOutcome::Unreachable,
        }
    }
}

fn apply_event(page: &SharedPage, agent: &PageAgentHandle, event: PageEvent) {
    let signal = match event {
        // A new snapshot is a DOM change as far as detection goes.
        PageEvent::Snapshot { page: snapshot } => {
            page.replace(snapshot);
            PageSignal::DomMutated
        }
        PageEvent::DomMutated => PageSignal::DomMutated,
        PageEvent::MetadataReady => PageSignal::MetadataReady,
        PageEvent::NavigateFinished { url } => PageSignal::NavigateFinished { url },
        PageEvent::HistoryChanged { url } => PageSignal::HistoryChanged { url },
    };
    agent.signal(signal);
}

/// Run one page extractor: page events from `input`, reports and pull
/// answers to the daemon. Returns when either side closes.
pub async fn run_page<I>(
    path: &Path,
    tab_id: TabId,
    config: &Config,
    input: I,
) -> Result<(), TransportError>
where
    I: AsyncBufRead + Unpin,
{
    let (reader, mut writer) = UnixStream::connect(path).await?.into_split();
    send_line(
        &mut writer,
        &Inbound::Hello {
            role: Role::Page,
            tab_id: Some(tab_id),
        },
    )
    .await?;
    info!(%tab_id, "page extractor connected");

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Inbound>();
    let writer_task = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if let Err(e) = send_line(&mut writer, &message).await {
                warn!("Failed to write to daemon: {}", e);
                break;
            }
        }
    });

    let page = SharedPage::new(PageSnapshot::default());
    let (agent, handle) = PageAgent::new(page.clone(), SocketReporter(out_tx.clone()), config);
    let agent_task = tokio::spawn(agent.run());

    let mut daemon = BufReader::new(reader).lines();
    let mut events = input.lines();
    let result = loop {
        tokio::select! {
            line = events.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match serde_json::from_str::<PageEvent>(&line) {
                    Ok(event) => apply_event(&page, &handle, event),
                    Err(e) => debug!("Failed to parse page event: {} (line: {})", e, line),
                },
                Ok(None) => break Ok(()),
                Err(e) => break Err(e.into()),
            },
            line = daemon.next_line() => match line {
                Ok(Some(line)) => match serde_json::from_str::<Outbound>(&line) {
                    Ok(Outbound::GetDuration { id }) => {
                        if let Some(response) = handle.pull().await {
                            let _ = out_tx.send(Inbound::Duration { id, response });
                        }
                    }
                    Ok(other) => trace!(?other, "ignored daemon message"),
                    Err(e) => trace!("Failed to parse daemon message: {} (line: {})", e, line),
                },
                Ok(None) => break Err(TransportError::Disconnected),
                Err(e) => break Err(e.into()),
            },
        }
    };

    drop(handle);
    drop(out_tx);
    let _ = agent_task.await;
    let _ = writer_task.await;
    result
}
