//! Per-page agent: the detection state machine and periodic reporter

use super::{PageSnapshot, extract};
use crate::{DurationResponse, tracked};
use crate::config::Config;
use crate::transport::{Reporter, SendOutcome};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace};

/// Page events the agent reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageSignal {
    /// The DOM changed (mutation observer fired)
    DomMutated,
    /// A media element loaded metadata or changed its duration
    MetadataReady,
    /// The site's own navigation-finished event
    NavigateFinished { url: String },
    /// History state changed without a reload
    HistoryChanged { url: String },
}

/// Detection phase of one page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    NoData,
    /// Element present, waiting for its metadata
    WaitingOnElement,
    /// Neither element nor data yet, watching the DOM
    Observing,
    /// Duration resolved, reporting periodically
    Ready,
    /// Grace period after in-page navigation
    Settling,
}

/// Read access to the page the agent runs in.
pub trait PageSource: Send + Sync + 'static {
    fn snapshot(&self) -> PageSnapshot;
}

/// Page state shared with whatever feeds it (the stdin bridge, tests).
#[derive(Debug, Clone, Default)]
pub struct SharedPage(Arc<Mutex<PageSnapshot>>);

impl SharedPage {
    pub fn new(page: PageSnapshot) -> Self {
        Self(Arc::new(Mutex::new(page)))
    }

    pub fn replace(&self, page: PageSnapshot) {
        if let Ok(mut current) = self.0.lock() {
            *current = page;
        }
    }
}

impl PageSource for SharedPage {
    fn snapshot(&self) -> PageSnapshot {
        self.0.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

/// Sender side of a running [`PageAgent`].
#[derive(Debug, Clone)]
pub struct PageAgentHandle {
    signals: mpsc::UnboundedSender<PageSignal>,
    pulls: mpsc::UnboundedSender<oneshot::Sender<DurationResponse>>,
}

impl PageAgentHandle {
    pub fn signal(&self, signal: PageSignal) -> SendOutcome {
        match self.signals.send(signal) {
            Ok(()) => SendOutcome::Sent,
            Err(_) => SendOutcome::Unreachable,
        }
    }

    /// Fresh extraction, computed on demand. `None` if the agent stopped.
    pub async fn pull(&self) -> Option<DurationResponse> {
        let (reply, rx) = oneshot::channel();
        self.pulls.send(reply).ok()?;
        rx.await.ok()
    }
}

/// Drives detection for one page until its signal channel closes.
pub struct PageAgent<P: PageSource, R: Reporter> {
    source: P,
    reporter: R,
    report_every: Duration,
    grace: Duration,
    phase: Phase,
    last_url: String,
    /// Navigated away; page data for `last_url` has not arrived yet
    awaiting_page: bool,
    reporting: Option<Interval>,
    settle_until: Option<Instant>,
    signals: mpsc::UnboundedReceiver<PageSignal>,
    pulls: mpsc::UnboundedReceiver<oneshot::Sender<DurationResponse>>,
}

impl<P: PageSource, R: Reporter> PageAgent<P, R> {
    pub fn new(source: P, reporter: R, config: &Config) -> (Self, PageAgentHandle) {
        let (signals_tx, signals) = mpsc::unbounded_channel();
        let (pulls_tx, pulls) = mpsc::unbounded_channel();
        let last_url = source.snapshot().url;
        let agent = Self {
            source,
            reporter,
            report_every: config.report_interval(),
            grace: config.navigation_grace(),
            phase: Phase::NoData,
            last_url,
            awaiting_page: false,
            reporting: None,
            settle_until: None,
            signals,
            pulls,
        };
        let handle = PageAgentHandle {
            signals: signals_tx,
            pulls: pulls_tx,
        };
        (agent, handle)
    }

    pub async fn run(mut self) {
        self.resolve();
        loop {
            tokio::select! {
                signal = self.signals.recv() => match signal {
                    Some(signal) => self.on_signal(signal),
                    None => break,
                },
                Some(reply) = self.pulls.recv() => {
                    let _ = reply.send(self.current());
                }
                _ = next_tick(&mut self.reporting) => self.report_tick(),
                _ = wait_until(self.settle_until) => {
                    self.settle_until = None;
                    self.phase = Phase::NoData;
                    self.resolve();
                }
            }
        }
        debug!(url = %self.last_url, "page agent stopped");
    }

    fn on_signal(&mut self, signal: PageSignal) {
        trace!(?signal, phase = ?self.phase, "page signal");
        match signal {
            PageSignal::DomMutated if self.phase == Phase::Observing => self.resolve(),
            PageSignal::MetadataReady if self.phase == Phase::WaitingOnElement => self.resolve(),
            PageSignal::DomMutated | PageSignal::MetadataReady => {}
            PageSignal::NavigateFinished { url } | PageSignal::HistoryChanged { url } => {
                if url != self.last_url {
                    self.navigated(url);
                }
            }
        }
    }

    /// Drop everything tied to the old page and settle before re-resolving.
    fn navigated(&mut self, url: String) {
        info!(from = %self.last_url, to = %url, "in-page navigation");
        self.last_url = url;
        self.awaiting_page = true;
        self.reporting = None;
        self.phase = Phase::Settling;
        self.settle_until = Some(Instant::now() + self.grace);
    }

    /// Run the resolution path from `NoData`.
    fn resolve(&mut self) {
        let page = self.source.snapshot();
        if self.awaiting_page && page.url != self.last_url {
            debug!(expected = %self.last_url, found = %page.url, "page data not updated yet");
            self.phase = Phase::Observing;
            return;
        }
        self.awaiting_page = false;
        let extraction = extract(&page);
        self.last_url.clone_from(&page.url);

        self.phase = if !extraction.response.is_loading {
            Phase::Ready
        } else if extraction.element_found {
            Phase::WaitingOnElement
        } else {
            Phase::Observing
        };
        debug!(phase = ?self.phase, url = %page.url, "resolved");

        if self.phase == Phase::Ready {
            self.push(extraction.response);
            let mut interval =
                tokio::time::interval_at(Instant::now() + self.report_every, self.report_every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.reporting = Some(interval);
        }
    }

    /// Fresh extraction, or a loading placeholder while the page data still
    /// describes the address we navigated away from.
    fn current(&self) -> DurationResponse {
        let page = self.source.snapshot();
        if self.awaiting_page && page.url != self.last_url {
            let video_type = tracked::classify(&self.last_url).unwrap_or_default();
            return DurationResponse::loading(self.last_url.clone(), "", video_type);
        }
        extract(&page).response
    }

    fn report_tick(&mut self) {
        let response = extract(&self.source.snapshot()).response;
        if response.is_loading {
            trace!("still loading, skipping report");
            return;
        }
        self.push(response);
    }

    fn push(&self, response: DurationResponse) {
        if self.reporter.report(response) == SendOutcome::Unreachable {
            trace!("report dropped, coordinator unreachable");
        }
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::VideoElement;
    use crate::extractor::video::PRIMARY_PLAYER;
    use serde_json::json;

    const URL: &str = "https://www.youtube.com/watch?v=first";
    const NEXT_URL: &str = "https://www.youtube.com/watch?v=second";

    #[derive(Clone, Default)]
    struct CollectingReporter(Arc<Mutex<Vec<DurationResponse>>>);

    impl CollectingReporter {
        fn count(&self) -> usize {
            self.0.lock().unwrap().len()
        }

        fn last(&self) -> Option<DurationResponse> {
            self.0.lock().unwrap().last().cloned()
        }
    }

    impl Reporter for CollectingReporter {
        fn report(&self, response: DurationResponse) -> SendOutcome {
            self.0.lock().unwrap().push(response);
            SendOutcome::Sent
        }
    }

    fn player(duration: Option<f64>, current_time: f64) -> VideoElement {
        VideoElement {
            containers: vec![PRIMARY_PLAYER.into()],
            paused: false,
            current_time,
            duration,
            playback_rate: None,
        }
    }

    fn page_with(url: &str, videos: Vec<VideoElement>) -> PageSnapshot {
        PageSnapshot {
            videos,
            ..PageSnapshot::empty(url)
        }
    }

    fn spawn(page: &SharedPage, reporter: &CollectingReporter) -> PageAgentHandle {
        let (agent, handle) = PageAgent::new(page.clone(), reporter.clone(), &Config::default());
        tokio::spawn(agent.run());
        handle
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ready_page_pushes_immediately_and_on_interval() {
        let page = SharedPage::new(page_with(URL, vec![player(Some(600.0), 100.0)]));
        let reporter = CollectingReporter::default();
        let _handle = spawn(&page, &reporter);
        settle().await;
        assert_eq!(reporter.count(), 1);

        tokio::time::sleep(Duration::from_millis(10_100)).await;
        settle().await;
        assert_eq!(reporter.count(), 3);
        assert_eq!(reporter.last().unwrap().current_time_seconds, 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_on_element_metadata() {
        let page = SharedPage::new(page_with(URL, vec![player(None, 0.0)]));
        let reporter = CollectingReporter::default();
        let handle = spawn(&page, &reporter);
        settle().await;
        assert_eq!(reporter.count(), 0);

        // DOM churn does not matter while waiting on the element.
        page.replace(page_with(URL, vec![player(Some(300.0), 0.0)]));
        handle.signal(PageSignal::DomMutated);
        settle().await;
        assert_eq!(reporter.count(), 0);

        handle.signal(PageSignal::MetadataReady);
        settle().await;
        assert_eq!(reporter.count(), 1);
        assert_eq!(reporter.last().unwrap().duration_seconds, 300.0);
    }

    #[tokio::test(start_paused = true)]
    async fn observes_dom_until_data_appears() {
        let page = SharedPage::new(PageSnapshot::empty(URL));
        let reporter = CollectingReporter::default();
        let handle = spawn(&page, &reporter);
        settle().await;

        handle.signal(PageSignal::DomMutated);
        settle().await;
        assert_eq!(reporter.count(), 0);

        page.replace(PageSnapshot {
            initial_player_response: Some(json!({"videoDetails": {"lengthSeconds": "420"}})),
            ..PageSnapshot::empty(URL)
        });
        handle.signal(PageSignal::DomMutated);
        settle().await;
        assert_eq!(reporter.count(), 1);
        assert_eq!(reporter.last().unwrap().duration_seconds, 420.0);
    }

    #[tokio::test(start_paused = true)]
    async fn loading_ticks_are_skipped() {
        let page = SharedPage::new(page_with(URL, vec![player(Some(600.0), 0.0)]));
        let reporter = CollectingReporter::default();
        let _handle = spawn(&page, &reporter);
        settle().await;
        assert_eq!(reporter.count(), 1);

        page.replace(page_with(URL, vec![player(None, 0.0)]));
        tokio::time::sleep(Duration::from_millis(15_100)).await;
        settle().await;
        assert_eq!(reporter.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn navigation_stops_reporting_and_reresolves_after_grace() {
        let page = SharedPage::new(page_with(URL, vec![player(Some(600.0), 0.0)]));
        let reporter = CollectingReporter::default();
        let handle = spawn(&page, &reporter);
        settle().await;
        assert_eq!(reporter.count(), 1);

        page.replace(page_with(NEXT_URL, vec![player(None, 0.0)]));
        handle.signal(PageSignal::NavigateFinished {
            url: NEXT_URL.into(),
        });
        // The redundant history signal for the same address is ignored.
        handle.signal(PageSignal::HistoryChanged {
            url: NEXT_URL.into(),
        });
        settle().await;

        tokio::time::sleep(Duration::from_millis(900)).await;
        page.replace(page_with(NEXT_URL, vec![player(Some(120.0), 5.0)]));
        tokio::time::sleep(Duration::from_millis(200)).await;
        settle().await;

        assert_eq!(reporter.count(), 2);
        let last = reporter.last().unwrap();
        assert_eq!(last.url, NEXT_URL);
        assert_eq!(last.duration_seconds, 120.0);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_page_data_after_navigation_is_not_reported() {
        let page = SharedPage::new(page_with(URL, vec![player(Some(600.0), 0.0)]));
        let reporter = CollectingReporter::default();
        let handle = spawn(&page, &reporter);
        settle().await;
        assert_eq!(reporter.count(), 1);

        // The navigation signal arrives before the new page data.
        handle.signal(PageSignal::NavigateFinished {
            url: NEXT_URL.into(),
        });
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        settle().await;
        assert_eq!(reporter.count(), 1);

        let pulled = handle.pull().await.unwrap();
        assert!(pulled.is_loading);
        assert_eq!(pulled.url, NEXT_URL);

        // Still the old page: a mutation does not revive it.
        handle.signal(PageSignal::DomMutated);
        settle().await;
        assert_eq!(reporter.count(), 1);

        page.replace(page_with(NEXT_URL, vec![player(Some(240.0), 10.0)]));
        handle.signal(PageSignal::DomMutated);
        settle().await;
        assert_eq!(reporter.count(), 2);
        let last = reporter.last().unwrap();
        assert_eq!(last.url, NEXT_URL);
        assert_eq!(last.duration_seconds, 240.0);
    }

    #[tokio::test(start_paused = true)]
    async fn navigation_to_unresolved_page_goes_quiet() {
        let page = SharedPage::new(page_with(URL, vec![player(Some(600.0), 0.0)]));
        let reporter = CollectingReporter::default();
        let handle = spawn(&page, &reporter);
        settle().await;

        page.replace(PageSnapshot::empty(NEXT_URL));
        handle.signal(PageSignal::HistoryChanged {
            url: NEXT_URL.into(),
        });
        tokio::time::sleep(Duration::from_secs(20)).await;
        settle().await;

        assert_eq!(reporter.count(), 1);
        let pulled = handle.pull().await.unwrap();
        assert!(pulled.is_loading);
        assert_eq!(pulled.url, NEXT_URL);
    }

    #[tokio::test(start_paused = true)]
    async fn pull_answers_in_every_phase() {
        let page = SharedPage::new(PageSnapshot::empty(URL));
        let reporter = CollectingReporter::default();
        let handle = spawn(&page, &reporter);

        let pulled = handle.pull().await.unwrap();
        assert!(pulled.is_loading);
        assert_eq!(pulled.duration_seconds, 0.0);

        // Fresh data is visible to a pull before the agent re-resolves.
        page.replace(page_with(URL, vec![player(Some(90.0), 30.0)]));
        let pulled = handle.pull().await.unwrap();
        assert!(!pulled.is_loading);
        assert_eq!(pulled.current_time_seconds, 30.0);
        assert_eq!(reporter.count(), 0);
    }
}
