//! Unix socket daemon: the browser bridge, page extractors and the CLI
//!
//! Listens on a Unix socket ([`crate::protocol::socket_path`] by default)
//! for newline-delimited JSON. Each connection announces itself with
//! `hello` (host bridge or page) or just sends detail-view requests.
//! [`SocketHost`] is the coordinator's view of the browser, backed by
//! whichever connections are currently attached.

use crate::config::Config;
use crate::coordinator::{Coordinator, CoordinatorHandle};
use crate::persist::StateStore;
use crate::protocol::{Inbound, Outbound, Role};
use crate::transport::{Host, SendOutcome, TabInfo, TransportError};
use crate::{DurationResponse, TabId};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

type Peer = mpsc::UnboundedSender<Outbound>;

struct PageLink {
    conn: u64,
    tx: Peer,
    pending: HashMap<u64, oneshot::Sender<DurationResponse>>,
}

#[derive(Default)]
struct Links {
    tabs: BTreeMap<TabId, TabInfo>,
    bridge: Option<(u64, Peer)>,
    pages: HashMap<TabId, PageLink>,
    /// A bridge sent the full tab list and is still attached
    tabs_known: bool,
    badge: String,
    next_request: u64,
}

/// [`Host`] backed by socket connections.
pub struct SocketHost {
    links: Mutex<Links>,
    pull_timeout: Duration,
}

impl SocketHost {
    pub fn new(pull_timeout: Duration) -> Self {
        Self {
            links: Mutex::new(Links::default()),
            pull_timeout,
        }
    }

    fn attach_bridge(&self, conn: u64, tx: Peer) {
        if let Ok(mut links) = self.links.lock() {
            if !links.badge.is_empty() {
                let _ = tx.send(Outbound::SetBadge {
                    text: links.badge.clone(),
                });
            }
            links.bridge = Some((conn, tx));
            info!("host bridge attached");
        }
    }

    fn attach_page(&self, tab_id: TabId, conn: u64, tx: Peer) {
        if let Ok(mut links) = self.links.lock() {
            let link = PageLink {
                conn,
                tx,
                pending: HashMap::new(),
            };
            if links.pages.insert(tab_id, link).is_some() {
                debug!(%tab_id, "page extractor replaced");
            } else {
                debug!(%tab_id, "page extractor attached");
            }
        }
    }

    /// Drop whatever `conn` was attached as.
    fn detach(&self, conn: u64) {
        if let Ok(mut links) = self.links.lock() {
            if links.bridge.as_ref().is_some_and(|(c, _)| *c == conn) {
                links.bridge = None;
                links.tabs_known = false;
                info!("host bridge detached");
            }
            links.pages.retain(|tab_id, link| {
                let keep = link.conn != conn;
                if !keep {
                    debug!(%tab_id, "page extractor detached");
                }
                keep
            });
        }
    }

    fn replace_tabs(&self, tabs: Vec<TabInfo>) {
        if let Ok(mut links) = self.links.lock() {
            links.tabs = tabs.into_iter().map(|t| (t.tab_id, t)).collect();
            links.tabs_known = true;
        }
    }

    fn upsert_tab(&self, tab: TabInfo) {
        if let Ok(mut links) = self.links.lock() {
            links.tabs.insert(tab.tab_id, tab);
        }
    }

    fn set_tab_url(&self, tab_id: TabId, url: &str) {
        if let Ok(mut links) = self.links.lock() {
            let tab = links.tabs.entry(tab_id).or_insert_with(|| TabInfo {
                tab_id,
                url: String::new(),
                discarded: false,
            });
            tab.url = url.to_string();
        }
    }

    fn remove_tab(&self, tab_id: TabId) {
        if let Ok(mut links) = self.links.lock() {
            links.tabs.remove(&tab_id);
        }
    }

    /// Hand a page's answer to whoever is waiting on request `id`.
    fn resolve(&self, tab_id: TabId, id: u64, response: DurationResponse) {
        let waiter = self
            .links
            .lock()
            .ok()
            .and_then(|mut links| links.pages.get_mut(&tab_id)?.pending.remove(&id));
        match waiter {
            Some(waiter) => {
                let _ = waiter.send(response);
            }
            None => trace!(%tab_id, id, "unsolicited duration answer"),
        }
    }

    fn forget_request(&self, tab_id: TabId, id: u64) {
        if let Ok(mut links) = self.links.lock()
            && let Some(link) = links.pages.get_mut(&tab_id)
        {
            link.pending.remove(&id);
        }
    }
}

impl Host for SocketHost {
    async fn query_tabs(&self) -> Result<Vec<TabInfo>, TransportError> {
        let links = self.links.lock().map_err(|_| TransportError::Disconnected)?;
        if !links.tabs_known {
            return Err(TransportError::TabsUnknown);
        }
        Ok(links.tabs.values().cloned().collect())
    }

    async fn pull(&self, tab_id: TabId) -> Result<DurationResponse, TransportError> {
        let (reply, rx) = oneshot::channel();
        let id = {
            let mut links = self.links.lock().map_err(|_| TransportError::Disconnected)?;
            links.next_request += 1;
            let id = links.next_request;
            let link = links
                .pages
                .get_mut(&tab_id)
                .ok_or(TransportError::NotConnected(tab_id))?;
            link.tx
                .send(Outbound::GetDuration { id })
                .map_err(|_| TransportError::Disconnected)?;
            link.pending.insert(id, reply);
            id
        };

        match tokio::time::timeout(self.pull_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(TransportError::Disconnected),
            Err(_) => {
                self.forget_request(tab_id, id);
                Err(TransportError::TimedOut(self.pull_timeout))
            }
        }
    }

    async fn inject(&self, tab_id: TabId) -> Result<(), TransportError> {
        let links = self.links.lock().map_err(|_| TransportError::Disconnected)?;
        let (_, bridge) = links
            .bridge
            .as_ref()
            .ok_or(TransportError::NotConnected(tab_id))?;
        bridge
            .send(Outbound::Inject { tab_id })
            .map_err(|_| TransportError::Disconnected)
    }

    fn set_badge(&self, text: &str) -> SendOutcome {
        let Ok(mut links) = self.links.lock() else {
            return SendOutcome::Unreachable;
        };
        links.badge = text.to_string();
        match &links.bridge {
            Some((_, bridge)) if bridge.send(Outbound::SetBadge { text: text.into() }).is_ok() => {
                SendOutcome::Sent
            }
            _ => SendOutcome::Unreachable,
        }
    }
}

/// Bind the daemon socket, removing a stale one first.
pub fn bind(path: &Path) -> std::io::Result<UnixListener> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    UnixListener::bind(path)
}

/// Run the daemon on `path` until Ctrl-C.
pub async fn run<S: StateStore>(path: &Path, config: Config, store: S) -> std::io::Result<()> {
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    run_until(path, config, store, shutdown).await
}

/// Run the daemon on `path` until `shutdown` resolves, then flush state and
/// remove the socket.
pub async fn run_until<S: StateStore>(
    path: &Path,
    config: Config,
    store: S,
    shutdown: impl Future<Output = ()>,
) -> std::io::Result<()> {
    let listener = bind(path)?;
    info!("IPC server listening on {}", path.display());

    let host = Arc::new(SocketHost::new(config.pull_timeout()));
    let (coordinator, handle) = Coordinator::new(Arc::clone(&host), store, config);
    let coordinator = tokio::spawn(coordinator.run());

    tokio::select! {
        _ = accept_loop(listener, host, handle.clone()) => {}
        _ = shutdown => info!("shutting down"),
    }

    handle.shutdown();
    if let Err(e) = coordinator.await {
        warn!("coordinator task failed: {}", e);
    }
    if let Err(e) = std::fs::remove_file(path) {
        debug!("Failed to remove socket {}: {}", path.display(), e);
    }
    Ok(())
}

async fn accept_loop(listener: UnixListener, host: Arc<SocketHost>, handle: CoordinatorHandle) {
    let next_conn = AtomicU64::new(0);
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let conn = next_conn.fetch_add(1, Ordering::Relaxed);
                let host = Arc::clone(&host);
                let handle = handle.clone();
                tokio::spawn(async move {
                    serve_connection(conn, stream, &host, &handle).await;
                    host.detach(conn);
                });
            }
            Err(e) => {
                warn!("Failed to accept socket connection: {}", e);
            }
        }
    }
}

async fn serve_connection(
    conn: u64,
    stream: UnixStream,
    host: &SocketHost,
    handle: &CoordinatorHandle,
) {
    let (reader, writer) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(write_loop(writer, rx));

    let mut page: Option<TabId> = None;
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.is_empty() {
            continue;
        }
        let message = match serde_json::from_str::<Inbound>(&line) {
            Ok(message) => message,
            Err(e) => {
                trace!("Failed to parse IPC message: {} (line: {})", e, line);
                continue;
            }
        };
        trace!(?message, conn, "ipc message");

        match message {
            Inbound::Hello {
                role: Role::Host, ..
            } => host.attach_bridge(conn, tx.clone()),
            Inbound::Hello {
                role: Role::Page,
                tab_id: Some(tab_id),
            } => {
                host.attach_page(tab_id, conn, tx.clone());
                page = Some(tab_id);
            }
            Inbound::Hello {
                role: Role::Page,
                tab_id: None,
            } => warn!("page hello without tab id"),

            Inbound::Tabs { tabs } => {
                host.replace_tabs(tabs);
                handle.reconcile();
            }
            Inbound::TabUpdated {
                tab_id,
                url,
                status,
                discarded,
            } => {
                host.upsert_tab(TabInfo {
                    tab_id,
                    url: url.clone(),
                    discarded,
                });
                handle.tab_updated(tab_id, url, status);
            }
            Inbound::TabRemoved { tab_id } => {
                host.remove_tab(tab_id);
                handle.tab_removed(tab_id);
            }
            Inbound::HistoryStateUpdated { tab_id, url } => {
                host.set_tab_url(tab_id, &url);
                handle.history_state_updated(tab_id, url);
            }
            Inbound::Reconcile => {
                handle.reconcile();
            }

            Inbound::ReportDuration { response } => match page {
                Some(tab_id) => {
                    handle.report(tab_id, response);
                }
                None => debug!(conn, "report from a connection without page hello"),
            },
            Inbound::Duration { id, response } => match page {
                Some(tab_id) => host.resolve(tab_id, id, response),
                None => debug!(conn, "duration answer from a connection without page hello"),
            },

            Inbound::GetPopupData => {
                if let Some(snapshot) = handle.popup_data().await {
                    let _ = tx.send(Outbound::PopupData { snapshot });
                }
            }
            Inbound::ToggleDisplay => {
                if let Some(enabled) = handle.toggle_display().await {
                    let _ = tx.send(Outbound::DisplayToggled { enabled });
                }
            }
        }
    }
}

async fn write_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Outbound>) {
    while let Some(message) = rx.recv().await {
        let mut line = match serde_json::to_string(&message) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to encode IPC message: {}", e);
                continue;
            }
        };
        line.push('\n');
        if writer.write_all(line.as_bytes()).await.is_err() {
            break;
        }
    }
}
