//! Synchronization controller.
//!
//! One cycle is: pick a fetch plan from the panel's link count, fetch that
//! page, merge it into the index, and regroup the panel. The change feed is
//! disconnected for the duration of a cycle, and only one cycle can be in
//! flight at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Local;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use threadline_auth::CredentialProvider;

use crate::feed::ChangeFeed;
use crate::grouping::{reconcile, ReconcileReport};
use crate::index::{LocalIndex, MergeStats};
use crate::panel::{separator_css, Panel, PanelLayout, SEPARATOR_STYLE_ID};
use crate::remote::ConversationClient;
use crate::strategy::{FetchIntent, FetchPlan, FetchStrategy};
use crate::{Record, SyncConfig};

/// Mutable state for one session, owned by a single controller.
#[derive(Debug, Default)]
pub struct SessionContext {
    pub index: LocalIndex,
    /// Link count observed after the last completed cycle.
    pub last_count: Option<usize>,
    cycle_in_progress: Arc<AtomicBool>,
}

impl SessionContext {
    /// Claim the cycle slot. `None` if a cycle is already running.
    ///
    /// A controller's own cycles are already serialized by `&mut self`. The
    /// slot matters when something else holds the session while a cycle is
    /// requested, such as a panel callback re-entering the controller.
    pub fn begin_cycle(&self) -> Option<CycleGuard> {
        self.cycle_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CycleGuard(self.cycle_in_progress.clone()))
    }

    pub fn is_cycle_in_progress(&self) -> bool {
        self.cycle_in_progress.load(Ordering::Acquire)
    }
}

/// Releases the cycle slot when dropped.
#[derive(Debug)]
pub struct CycleGuard(Arc<AtomicBool>);

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub plan: FetchPlan,
    pub fetched: usize,
    pub merge: MergeStats,
    /// `None` when the panel was not mounted at reconcile time.
    pub reconcile: Option<ReconcileReport>,
}

pub struct SyncController<P: Panel> {
    config: SyncConfig,
    layout: PanelLayout,
    strategy: FetchStrategy,
    client: ConversationClient,
    credentials: Arc<CredentialProvider>,
    panel: P,
    session: SessionContext,
}

impl<P: Panel> SyncController<P> {
    pub fn new(
        config: SyncConfig,
        client: ConversationClient,
        credentials: Arc<CredentialProvider>,
        panel: P,
    ) -> Self {
        Self {
            layout: config.layout(),
            strategy: FetchStrategy::new(config.limits()),
            config,
            client,
            credentials,
            panel,
            session: SessionContext::default(),
        }
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn panel(&self) -> &P {
        &self.panel
    }

    pub fn panel_mut(&mut self) -> &mut P {
        &mut self.panel
    }

    pub fn strategy(&self) -> &FetchStrategy {
        &self.strategy
    }

    /// Poll for the panel container, `mount_attempts` times at most.
    pub async fn wait_for_mount(&self) -> bool {
        for attempt in 0..self.config.mount_attempts {
            if self.panel.is_mounted() {
                return true;
            }
            debug!(attempt, "panel not mounted yet");
            tokio::time::sleep(self.config.mount_interval()).await;
        }
        self.panel.is_mounted()
    }

    pub fn install_styles(&mut self) {
        let css = separator_css(&self.layout.separator_class);
        if self.panel.inject_style(SEPARATOR_STYLE_ID, &css) {
            debug!("separator style injected");
        }
    }

    /// First cycle of a session.
    pub async fn initial_sync(&mut self) -> Option<CycleReport> {
        let intent = if self.config.legacy_full_reload {
            FetchIntent::FetchAll
        } else {
            FetchIntent::Initial
        };
        let plan = self.strategy.plan_for(intent, None);
        self.run_cycle(plan).await
    }

    /// React to a structural change in the panel.
    pub async fn handle_change(&mut self) -> Option<CycleReport> {
        if !self.panel.is_mounted() {
            debug!("panel not mounted, skipping change");
            return None;
        }
        let current = self.conversation_count();
        let plan = if self.config.legacy_full_reload {
            self.strategy
                .plan_for(FetchIntent::FetchAll, self.session.last_count)
        } else {
            self.strategy.plan(self.session.last_count, current)
        };
        debug!(
            previous = ?self.session.last_count,
            current,
            intent = plan.intent.as_str(),
            "classified panel change"
        );
        self.run_cycle(plan).await
    }

    /// Handle a change with the feed disconnected, so this cycle's own
    /// panel writes are not observed.
    pub async fn handle_change_guarded(&mut self, feed: &mut ChangeFeed) -> Option<CycleReport> {
        feed.disconnect();
        let report = self.handle_change().await;
        feed.reconnect();
        report
    }

    /// Fetch, merge and regroup according to `plan`.
    ///
    /// Remote failures count as zero records; the panel is still regrouped
    /// from whatever is already indexed.
    pub async fn run_cycle(&mut self, plan: FetchPlan) -> Option<CycleReport> {
        let Some(_guard) = self.session.begin_cycle() else {
            warn!(intent = plan.intent.as_str(), "cycle already in progress, skipping");
            return None;
        };

        let records = self.fetch(&plan).await;
        let fetched = records.len();
        let merge = self.session.index.merge(records);
        let reconcile = self.reconcile_now();
        self.session.last_count = Some(self.conversation_count());

        info!(
            intent = plan.intent.as_str(),
            offset = plan.offset,
            limit = plan.limit,
            fetched,
            inserted = merge.inserted,
            indexed = self.session.index.len(),
            separators = reconcile.as_ref().map(|r| r.separators.len()),
            "sync cycle complete"
        );

        Some(CycleReport {
            plan,
            fetched,
            merge,
            reconcile,
        })
    }

    /// Fetch the records `plan` asks for. Never fails: errors are logged and
    /// yield nothing.
    pub async fn fetch(&self, plan: &FetchPlan) -> Vec<Record> {
        let credential = self.credentials.current();
        let result = match plan.intent {
            FetchIntent::FetchAll => {
                self.client
                    .fetch_all(credential.as_ref(), plan.limit, self.config.safety_cap)
                    .await
            }
            _ => self
                .client
                .fetch_page(credential.as_ref(), plan.offset, plan.limit)
                .await
                .map(|page| page.records),
        };

        match result {
            Ok(records) => records,
            Err(err) => {
                warn!(intent = plan.intent.as_str(), "fetch failed: {}", err);
                Vec::new()
            }
        }
    }

    /// Merge records obtained elsewhere.
    pub fn merge_records(&mut self, records: Vec<Record>) -> MergeStats {
        self.session.index.merge(records)
    }

    fn conversation_count(&self) -> usize {
        self.panel.conversation_count(&self.layout.link_marker)
    }

    /// Regroup the panel against the current index, in local time.
    pub fn reconcile_now(&mut self) -> Option<ReconcileReport> {
        reconcile(&self.session.index, &mut self.panel, &Local::now(), &self.layout)
    }

    /// Drive the session: wait for a credential and for the panel, run the
    /// initial cycle, then one cycle per change. Returns when `shutdown` is
    /// cancelled or the feed closes. A cycle already under way is finished
    /// first.
    pub async fn run(&mut self, mut feed: ChangeFeed, shutdown: CancellationToken) {
        let mut credential = self.credentials.subscribe();
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("shutdown before a credential arrived");
                return;
            }
            found = credential.wait() => {
                if found.is_none() {
                    warn!("credential provider went away before a credential arrived");
                    return;
                }
            }
        }

        let mounted = tokio::select! {
            _ = shutdown.cancelled() => return,
            mounted = self.wait_for_mount() => mounted,
        };
        if !mounted {
            warn!(
                attempts = self.config.mount_attempts,
                "panel never mounted, not starting"
            );
            return;
        }
        self.install_styles();

        feed.disconnect();
        self.initial_sync().await;
        feed.reconnect();

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!("sync loop shut down");
                    break;
                }
                event = feed.next() => {
                    if event.is_none() {
                        debug!("change feed closed");
                        break;
                    }
                    self.handle_change_guarded(&mut feed).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::change_feed;
    use crate::panel::MemoryPanel;
    use chrono::Utc;
    use std::time::Duration;
    use threadline_auth::CaptureSource;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        server: MockServer,
        _dir: tempfile::TempDir,
        credentials: Arc<CredentialProvider>,
    }

    impl Fixture {
        async fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let credentials =
                Arc::new(CredentialProvider::load(&dir.path().join("storage.json")).unwrap());
            Self {
                server: MockServer::start().await,
                _dir: dir,
                credentials,
            }
        }

        fn authorize(&self) {
            self.credentials
                .observe_authorization("Bearer test-token", CaptureSource::Manual);
        }

        fn config(&self) -> SyncConfig {
            SyncConfig {
                list_endpoint: format!("{}/backend-api/conversations", self.server.uri()),
                mount_attempts: 3,
                mount_interval_ms: 5,
                ..SyncConfig::default()
            }
        }

        fn controller(&self, panel: MemoryPanel) -> SyncController<MemoryPanel> {
            self.controller_with(self.config(), panel)
        }

        fn controller_with(
            &self,
            config: SyncConfig,
            panel: MemoryPanel,
        ) -> SyncController<MemoryPanel> {
            let client = ConversationClient::new(&config.list_endpoint).unwrap();
            SyncController::new(config, client, self.credentials.clone(), panel)
        }

        async fn serve(&self, offset: usize, limit: usize, ids: &[&str]) {
            let items: Vec<serde_json::Value> = ids
                .iter()
                .map(|id| {
                    serde_json::json!({
                        "id": id,
                        "title": id,
                        "update_time": Utc::now().to_rfc3339()
                    })
                })
                .collect();
            Mock::given(method("GET"))
                .and(query_param("offset", offset.to_string()))
                .and(query_param("limit", limit.to_string()))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(serde_json::json!({ "items": items, "total": 500 })),
                )
                .mount(&self.server)
                .await;
        }
    }

    fn panel_with(ids: &[&str]) -> MemoryPanel {
        let panel = MemoryPanel::new();
        for id in ids {
            panel.push_link(&format!("/c/{id}"), id);
        }
        panel
    }

    #[tokio::test]
    async fn test_initial_sync_indexes_and_groups() {
        let fx = Fixture::new().await;
        fx.authorize();
        fx.serve(0, 50, &["a", "b", "c"]).await;

        let mut controller = fx.controller(panel_with(&["a", "b", "c"]));
        let report = controller.initial_sync().await.unwrap();

        assert_eq!(report.plan.intent, FetchIntent::Initial);
        assert_eq!(report.fetched, 3);
        assert_eq!(report.merge.inserted, 3);
        assert_eq!(report.reconcile.unwrap().bound, 3);
        assert_eq!(controller.session().last_count, Some(3));
        assert_eq!(controller.panel().separator_labels().len(), 1);
    }

    #[tokio::test]
    async fn test_new_chat_fetches_small_page_from_top() {
        let fx = Fixture::new().await;
        fx.authorize();
        fx.serve(0, 50, &["a", "b"]).await;
        fx.serve(0, 5, &["new", "a"]).await;

        let panel = panel_with(&["a", "b"]);
        let mut controller = fx.controller(panel.clone());
        controller.initial_sync().await.unwrap();

        panel.prepend_link("/c/new", "new");
        let report = controller.handle_change().await.unwrap();
        assert_eq!(report.plan.intent, FetchIntent::NewChat);
        assert_eq!(report.plan.offset, 0);
        assert_eq!(report.merge.inserted, 1);
        assert!(controller.session().index.contains("new"));
        assert_eq!(controller.session().last_count, Some(3));
    }

    #[tokio::test]
    async fn test_scroll_fetches_after_previous_count() {
        let fx = Fixture::new().await;
        fx.authorize();
        fx.serve(0, 50, &["a", "b"]).await;
        fx.serve(2, 28, &["c", "d", "e"]).await;

        let panel = panel_with(&["a", "b"]);
        let mut controller = fx.controller(panel.clone());
        controller.initial_sync().await.unwrap();

        for id in ["c", "d", "e"] {
            panel.push_link(&format!("/c/{id}"), id);
        }
        let report = controller.handle_change().await.unwrap();
        assert_eq!(report.plan.intent, FetchIntent::Scroll);
        assert_eq!(report.plan.offset, 2);
        assert_eq!(controller.session().index.len(), 5);
        assert_eq!(report.reconcile.unwrap().bound, 5);
    }

    #[tokio::test]
    async fn test_rejected_fetch_keeps_index_and_still_regroups() {
        let fx = Fixture::new().await;
        fx.authorize();
        fx.serve(0, 50, &["a", "b"]).await;

        let panel = panel_with(&["a", "b"]);
        let mut controller = fx.controller(panel.clone());
        controller.initial_sync().await.unwrap();

        fx.server.reset().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&fx.server)
            .await;

        let report = controller.handle_change().await.unwrap();
        assert_eq!(report.fetched, 0);
        assert_eq!(report.merge, MergeStats::default());
        assert_eq!(controller.session().index.len(), 2);
        assert_eq!(report.reconcile.unwrap().bound, 2);
        assert_eq!(panel.separator_labels().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_credential_degrades_to_empty_cycle() {
        let fx = Fixture::new().await;
        let mut controller = fx.controller(panel_with(&["a"]));

        let report = controller.initial_sync().await.unwrap();
        assert_eq!(report.fetched, 0);
        assert!(controller.session().index.is_empty());
        assert!(fx.server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unmounted_panel_skips_change() {
        let fx = Fixture::new().await;
        fx.authorize();
        let mut controller = fx.controller(MemoryPanel::unmounted());

        assert!(controller.handle_change().await.is_none());
        assert!(!controller.wait_for_mount().await);
        assert!(fx.server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_cycle_is_refused_while_one_runs() {
        let fx = Fixture::new().await;
        fx.authorize();
        let mut controller = fx.controller(panel_with(&["a"]));

        let guard = controller.session().begin_cycle().unwrap();
        assert!(controller.session().is_cycle_in_progress());
        let plan = controller.strategy().plan(None, 1);
        assert!(controller.run_cycle(plan).await.is_none());

        drop(guard);
        assert!(!controller.session().is_cycle_in_progress());
        assert!(controller.run_cycle(plan).await.is_some());
        assert!(!controller.session().is_cycle_in_progress());
    }

    #[tokio::test]
    async fn test_own_writes_do_not_retrigger() {
        let fx = Fixture::new().await;
        fx.authorize();
        fx.serve(0, 50, &["a", "b"]).await;

        let (mut feed, notifier) = change_feed();
        let panel = panel_with(&["a", "b"]).with_notifier(notifier);
        let mut controller = fx.controller(panel);

        let report = controller.handle_change_guarded(&mut feed).await.unwrap();
        assert!(!report.reconcile.unwrap().separators.is_empty());
        assert!(feed.is_connected());
        assert!(!feed.try_next());
    }

    #[tokio::test]
    async fn test_legacy_mode_crawls_everything() {
        let fx = Fixture::new().await;
        fx.authorize();
        fx.serve(0, 2, &["a", "b"]).await;
        fx.serve(2, 2, &["c"]).await;

        let config = SyncConfig {
            default_limit: 2,
            legacy_full_reload: true,
            ..fx.config()
        };
        let mut controller = fx.controller_with(config, panel_with(&["a", "b", "c"]));
        let report = controller.initial_sync().await.unwrap();

        assert_eq!(report.plan.intent, FetchIntent::FetchAll);
        assert_eq!(report.fetched, 3);
    }

    #[tokio::test]
    async fn test_non_conversation_link_is_not_a_new_chat() {
        let fx = Fixture::new().await;
        fx.authorize();
        fx.serve(0, 50, &["a", "b"]).await;

        let panel = panel_with(&["a", "b"]);
        let mut controller = fx.controller(panel.clone());
        controller.initial_sync().await.unwrap();
        assert_eq!(controller.session().last_count, Some(2));

        panel.push_link("/settings", "Settings");
        let report = controller.handle_change().await.unwrap();
        assert_eq!(report.plan.intent, FetchIntent::Initial);
        assert_eq!(report.plan.limit, 50);
        assert_eq!(controller.session().last_count, Some(2));
        assert_eq!(report.reconcile.unwrap().unbound, 1);
    }

    /// Poll until the mock server has seen `count` requests.
    async fn wait_for_requests(server: &MockServer, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while server.received_requests().await.unwrap().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("requests never arrived");
    }

    #[tokio::test]
    async fn test_run_waits_for_credential_then_follows_feed() {
        let fx = Fixture::new().await;
        fx.serve(0, 50, &["a", "b"]).await;
        fx.serve(0, 5, &["new"]).await;

        let (feed, notifier) = change_feed();
        let panel = panel_with(&["a", "b"]).with_notifier(notifier.clone());
        let mut controller = fx.controller(panel.clone());
        let shutdown = CancellationToken::new();

        let task = tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                controller.run(feed, shutdown).await;
                controller
            }
        });

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(fx.server.received_requests().await.unwrap().is_empty());

        fx.authorize();
        wait_for_requests(&fx.server, 1).await;
        tokio::time::timeout(Duration::from_secs(5), async {
            while panel.separator_labels().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("initial cycle never regrouped the panel");

        panel.prepend_link("/c/new", "new");
        wait_for_requests(&fx.server, 2).await;
        shutdown.cancel();

        let controller = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("run did not return after shutdown")
            .unwrap();
        assert_eq!(controller.session().index.len(), 3);
        assert_eq!(controller.session().last_count, Some(3));
        assert!(panel.has_style(SEPARATOR_STYLE_ID));
        drop(notifier);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_while_panel_holds_notifier() {
        let fx = Fixture::new().await;
        fx.authorize();
        fx.serve(0, 50, &["a"]).await;

        let (feed, notifier) = change_feed();
        let panel = panel_with(&["a"]).with_notifier(notifier);
        let mut controller = fx.controller(panel);
        let shutdown = CancellationToken::new();

        let stop = shutdown.clone();
        let run = controller.run(feed, shutdown);
        let cancel = async move {
            wait_for_requests(&fx.server, 1).await;
            stop.cancel();
        };
        let finished = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(run, cancel);
        })
        .await;
        assert!(finished.is_ok());
    }

    #[tokio::test]
    async fn test_run_returns_early_when_cancelled_before_credential() {
        let fx = Fixture::new().await;
        let (feed, _notifier) = change_feed();
        let mut controller = fx.controller(panel_with(&["a"]));
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        controller.run(feed, shutdown).await;
        assert!(controller.session().last_count.is_none());
        assert!(fx.server.received_requests().await.unwrap().is_empty());
    }
}
