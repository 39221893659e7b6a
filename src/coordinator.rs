//! Coordinator - the single task that owns the tab registry
//!
//! Every mutation happens inside [`Coordinator::run`] in response to one
//! [`Command`]. Pulls, retries and persistence timers run as spawned tasks
//! that post their results back onto the same channel, so the badge and the
//! popup are always derived from one consistent registry state.

use crate::aggregate::AggregateSnapshot;
use crate::config::Config;
use crate::persist::{PersistThrottle, StateStore};
use crate::record::unix_millis;
use crate::registry::TabRegistry;
use crate::transport::{Host, SendOutcome, TabInfo, TabStatus, TransportError};
use crate::{DurationResponse, TabId, tracked};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// One reconciliation probe result
#[derive(Debug)]
pub enum Probe {
    /// The extractor answered the probe pull
    Answered(TabId, DurationResponse),
    /// The probe failed and the extractor was re-injected (or the attempt failed)
    Reinjected(TabId),
}

/// Everything that can change coordinator state
#[derive(Debug)]
pub enum Command {
    /// Unsolicited report from a page
    Report {
        tab_id: TabId,
        response: DurationResponse,
    },
    TabRemoved {
        tab_id: TabId,
    },
    TabUpdated {
        tab_id: TabId,
        url: String,
        status: TabStatus,
    },
    HistoryStateUpdated {
        tab_id: TabId,
        url: String,
    },
    GetPopupData {
        reply: oneshot::Sender<AggregateSnapshot>,
    },
    ToggleDisplay {
        reply: oneshot::Sender<bool>,
    },
    /// Run a bulk reconciliation sweep
    Reconcile,
    Shutdown,

    // Internal: posted by tasks the coordinator spawned.
    PullDue {
        tab_id: TabId,
        epoch: u64,
        attempt: u32,
    },
    PullFinished {
        tab_id: TabId,
        epoch: u64,
        attempt: u32,
        result: Result<DurationResponse, TransportError>,
    },
    Reconciled {
        /// Tabs that had records when the sweep started
        candidates: Vec<TabId>,
        open: Vec<TabInfo>,
        probes: Vec<Probe>,
    },
    PersistDue,
}

/// Cloneable sender side of the coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl CoordinatorHandle {
    /// Post a command. Fails only when the coordinator has stopped.
    pub fn send(&self, command: Command) -> SendOutcome {
        match self.tx.send(command) {
            Ok(()) => SendOutcome::Sent,
            Err(_) => SendOutcome::Unreachable,
        }
    }

    pub fn report(&self, tab_id: TabId, response: DurationResponse) -> SendOutcome {
        self.send(Command::Report { tab_id, response })
    }

    pub fn tab_removed(&self, tab_id: TabId) -> SendOutcome {
        self.send(Command::TabRemoved { tab_id })
    }

    pub fn tab_updated(&self, tab_id: TabId, url: String, status: TabStatus) -> SendOutcome {
        self.send(Command::TabUpdated {
            tab_id,
            url,
            status,
        })
    }

    pub fn history_state_updated(&self, tab_id: TabId, url: String) -> SendOutcome {
        self.send(Command::HistoryStateUpdated { tab_id, url })
    }

    pub fn reconcile(&self) -> SendOutcome {
        self.send(Command::Reconcile)
    }

    pub fn shutdown(&self) -> SendOutcome {
        self.send(Command::Shutdown)
    }

    /// Snapshot for the detail view. `None` if the coordinator is gone.
    pub async fn popup_data(&self) -> Option<AggregateSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::GetPopupData { reply }).ok()?;
        rx.await.ok()
    }

    /// Flip the display preference, returning the new value.
    pub async fn toggle_display(&self) -> Option<bool> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::ToggleDisplay { reply }).ok()?;
        rx.await.ok()
    }
}

/// Owner of the registry and driver of pulls, repaints, and persistence.
pub struct Coordinator<H: Host, S: StateStore> {
    registry: TabRegistry,
    host: Arc<H>,
    store: S,
    config: Config,
    throttle: PersistThrottle,
    /// Current pull chain per tab; responses from older chains are dropped
    epochs: HashMap<TabId, u64>,
    next_epoch: u64,
    /// Tabs the host reported closed, with when; late responses for them are
    /// dropped until the entry outlives any pull that could still answer
    closed: HashMap<TabId, Instant>,
    last_badge: Option<String>,
    tx: mpsc::UnboundedSender<Command>,
    rx: mpsc::UnboundedReceiver<Command>,
}

impl<H: Host, S: StateStore> Coordinator<H, S> {
    /// Build a coordinator, rehydrating from `store`.
    pub fn new(host: Arc<H>, store: S, config: Config) -> (Self, CoordinatorHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = TabRegistry::from_state(store.load());
        info!(
            records = registry.len(),
            display_enabled = registry.display_enabled(),
            "state rehydrated"
        );
        let throttle = PersistThrottle::new(config.persist_window());
        let handle = CoordinatorHandle { tx: tx.clone() };
        let coordinator = Self {
            registry,
            host,
            store,
            config,
            throttle,
            epochs: HashMap::new(),
            next_epoch: 0,
            closed: HashMap::new(),
            last_badge: None,
            tx,
            rx,
        };
        (coordinator, handle)
    }

    /// Run until [`Command::Shutdown`]. Paints once, then starts a
    /// reconciliation sweep and the periodic sweep timer.
    pub async fn run(mut self) {
        self.repaint();
        self.start_reconcile();

        let sweep_tx = self.tx.clone();
        let sweep_every = self.config.sweep_interval();
        let sweep = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if sweep_tx.send(Command::Reconcile).is_err() {
                    return;
                }
            }
        });

        while let Some(command) = self.rx.recv().await {
            if matches!(command, Command::Shutdown) {
                break;
            }
            self.handle(command);
        }

        sweep.abort();
        if self.throttle.fire() {
            self.persist();
        }
        info!("coordinator stopped");
    }

    /// Apply one command. Everything a mutation implies (recompute, repaint,
    /// persistence scheduling) happens before this returns.
    pub fn handle(&mut self, command: Command) {
        match command {
            Command::Report { tab_id, response } => {
                trace!(%tab_id, "push");
                if self.closed.contains_key(&tab_id) {
                    return;
                }
                let outcome = self.registry.apply_report(tab_id, response, unix_millis());
                if outcome.changed() {
                    self.mutated();
                }
            }

            Command::TabRemoved { tab_id } => {
                debug!(%tab_id, "tab removed");
                self.expire_closed();
                self.closed.insert(tab_id, Instant::now());
                self.epochs.remove(&tab_id);
                if self.registry.remove(tab_id) {
                    self.mutated();
                }
            }

            Command::TabUpdated {
                tab_id,
                url,
                status,
            } => {
                if !tracked::is_tracked(&url) {
                    self.leave_tracked(tab_id);
                } else if status == TabStatus::Complete {
                    debug!(%tab_id, %url, "navigation completed");
                    self.closed.remove(&tab_id);
                    self.start_pull_chain(tab_id, self.config.pull_delay());
                }
            }

            Command::HistoryStateUpdated { tab_id, url } => {
                if tracked::is_tracked(&url) {
                    debug!(%tab_id, %url, "in-page navigation");
                    self.start_pull_chain(tab_id, self.config.pull_delay());
                } else {
                    self.leave_tracked(tab_id);
                }
            }

            Command::GetPopupData { reply } => {
                let _ = reply.send(self.registry.snapshot());
            }

            Command::ToggleDisplay { reply } => {
                let enabled = self.registry.toggle_display();
                self.persist();
                self.repaint();
                let _ = reply.send(enabled);
            }

            Command::Reconcile => self.start_reconcile(),

            Command::Shutdown => {}

            Command::PullDue {
                tab_id,
                epoch,
                attempt,
            } => {
                if self.is_current(tab_id, epoch) {
                    self.spawn_pull(tab_id, epoch, attempt);
                }
            }

            Command::PullFinished {
                tab_id,
                epoch,
                attempt,
                result,
            } => {
                if !self.is_current(tab_id, epoch) {
                    trace!(%tab_id, "dropping superseded pull response");
                    return;
                }
                match result {
                    Ok(response) => self.apply_pulled(tab_id, epoch, attempt, response),
                    Err(e) => debug!(%tab_id, attempt, "pull failed: {}", e),
                }
            }

            Command::Reconciled {
                candidates,
                open,
                probes,
            } => self.finish_reconcile(candidates, open, probes),

            Command::PersistDue => {
                if self.throttle.fire() {
                    self.persist();
                }
            }
        }
    }

    fn leave_tracked(&mut self, tab_id: TabId) {
        self.epochs.remove(&tab_id);
        if self.registry.remove(tab_id) {
            debug!(%tab_id, "tab left tracked pages");
            self.mutated();
        }
    }

    /// Longest a response can lag behind its tab's removal: the pull delay,
    /// every retry, and a timed-out pull for each attempt.
    fn closed_ttl(&self) -> Duration {
        let attempts = self.config.max_retries + 1;
        self.config.pull_delay()
            + self.config.retry_delay() * self.config.max_retries
            + self.config.pull_timeout() * attempts
    }

    fn expire_closed(&mut self) {
        let ttl = self.closed_ttl();
        self.closed.retain(|_, closed_at| closed_at.elapsed() < ttl);
    }

    fn is_current(&self, tab_id: TabId, epoch: u64) -> bool {
        !self.closed.contains_key(&tab_id) && self.epochs.get(&tab_id) == Some(&epoch)
    }

    /// Start a fresh pull chain for a tab, superseding any in flight.
    fn start_pull_chain(&mut self, tab_id: TabId, delay: Duration) -> u64 {
        self.next_epoch += 1;
        let epoch = self.next_epoch;
        self.epochs.insert(tab_id, epoch);
        self.schedule_pull(tab_id, epoch, 0, delay);
        epoch
    }

    fn schedule_pull(&self, tab_id: TabId, epoch: u64, attempt: u32, delay: Duration) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Command::PullDue {
                tab_id,
                epoch,
                attempt,
            });
        });
    }

    fn spawn_pull(&self, tab_id: TabId, epoch: u64, attempt: u32) {
        trace!(%tab_id, attempt, "pull");
        let host = Arc::clone(&self.host);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = host.pull(tab_id).await;
            let _ = tx.send(Command::PullFinished {
                tab_id,
                epoch,
                attempt,
                result,
            });
        });
    }

    /// Overwrite the record with a pulled response; retry while it is still
    /// loading and the retry budget lasts.
    fn apply_pulled(&mut self, tab_id: TabId, epoch: u64, attempt: u32, response: DurationResponse) {
        let still_loading = response.is_loading;
        let outcome = self.registry.apply_report(tab_id, response, unix_millis());
        if outcome.changed() {
            self.mutated();
        }
        if still_loading && attempt < self.config.max_retries {
            debug!(%tab_id, attempt, "still loading, retrying");
            self.schedule_pull(tab_id, epoch, attempt + 1, self.config.retry_delay());
        }
    }

    /// Spawn the probe phase of a bulk reconciliation.
    fn start_reconcile(&self) {
        let candidates: Vec<TabId> = self
            .registry
            .sorted_records()
            .iter()
            .map(|r| r.tab_id)
            .collect();
        let host = Arc::clone(&self.host);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let open = match host.query_tabs().await {
                Ok(open) => open,
                Err(e) => {
                    debug!("skipping reconciliation: {}", e);
                    return;
                }
            };
            let mut probes = JoinSet::new();
            for tab in open.iter().filter(|t| !t.discarded && tracked::is_tracked(&t.url)) {
                let host = Arc::clone(&host);
                let tab_id = tab.tab_id;
                probes.spawn(async move {
                    match host.pull(tab_id).await {
                        Ok(response) => Probe::Answered(tab_id, response),
                        Err(e) => {
                            debug!(%tab_id, "probe failed ({}), re-injecting", e);
                            if let Err(e) = host.inject(tab_id).await {
                                debug!(%tab_id, "re-injection failed: {}", e);
                            }
                            Probe::Reinjected(tab_id)
                        }
                    }
                });
            }

            let mut results = Vec::new();
            while let Some(joined) = probes.join_next().await {
                match joined {
                    Ok(probe) => results.push(probe),
                    Err(e) => warn!("reconciliation probe panicked: {}", e),
                }
            }
            let _ = tx.send(Command::Reconciled {
                candidates,
                open,
                probes: results,
            });
        });
    }

    /// Drop records of tabs that closed since the sweep started, then apply
    /// the probe results. Records created after the sweep started are left
    /// alone; the tab list predates them.
    fn finish_reconcile(
        &mut self,
        candidates: Vec<TabId>,
        open: Vec<TabInfo>,
        probes: Vec<Probe>,
    ) {
        let live: HashSet<TabId> = open
            .iter()
            .filter(|t| tracked::is_tracked(&t.url))
            .map(|t| t.tab_id)
            .filter(|tab_id| !self.closed.contains_key(tab_id))
            .collect();
        self.expire_closed();
        let mut changed = false;
        for tab_id in candidates.into_iter().filter(|t| !live.contains(t)) {
            changed |= self.registry.remove(tab_id);
        }
        info!(
            open = live.len(),
            probed = probes.len(),
            "reconciliation finished"
        );

        for probe in probes {
            match probe {
                Probe::Answered(tab_id, response) => {
                    if !live.contains(&tab_id) {
                        continue;
                    }
                    self.next_epoch += 1;
                    let epoch = self.next_epoch;
                    self.epochs.insert(tab_id, epoch);
                    let still_loading = response.is_loading;
                    changed |= self
                        .registry
                        .apply_report(tab_id, response, unix_millis())
                        .changed();
                    if still_loading && self.config.max_retries > 0 {
                        self.schedule_pull(tab_id, epoch, 1, self.config.retry_delay());
                    }
                }
                Probe::Reinjected(tab_id) => {
                    if live.contains(&tab_id) {
                        self.start_pull_chain(tab_id, self.config.pull_delay());
                    }
                }
            }
        }

        if changed {
            self.mutated();
        }
    }

    /// Registry changed: repaint now, persist on the throttle schedule.
    fn mutated(&mut self) {
        self.repaint();
        if let Some(delay) = self.throttle.request() {
            let tx = self.tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(Command::PersistDue);
            });
        }
    }

    fn repaint(&mut self) {
        let text = self.registry.badge_text();
        if self.last_badge.as_deref() == Some(text.as_str()) {
            return;
        }
        if self.host.set_badge(&text) == SendOutcome::Unreachable {
            trace!("badge paint dropped, host not attached");
        }
        self.last_badge = Some(text);
    }

    fn persist(&mut self) {
        match self.store.save(&self.registry.to_state()) {
            Ok(()) => trace!(records = self.registry.len(), "state saved"),
            Err(e) => warn!("Failed to save state: {}", e),
        }
    }
}
