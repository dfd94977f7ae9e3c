//! The live map: store, filter, clusterer and renderer wired to the change
//! feed, user controls and the relevance tick.
//!
//! Every state change goes through `recompute_and_render`, which takes a
//! snapshot of the store, filters it against the current clock and window,
//! clusters it for the current viewport and redraws. Nothing else draws.

use crate::cluster::cluster;
use crate::config::MapSettings;
use crate::error::{LoadError, LocationError};
use crate::feed::{Subscription, ingest_new};
use crate::filter::{TimeWindow, filter};
use crate::geo::{LngLat, Viewport};
use crate::i18n::Locale;
use crate::record::{SightingId, sightings_from_records};
use crate::render::{
    Banner, MapRenderer, MapSurface, RenderContext, RenderStats, TranslationRequest,
    TranslationTicket, USER_ZOOM,
};
use crate::storage::SightingStore;
use crate::store::LiveViewStore;
use crate::translate::{CachedTranslator, Translator};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};

/// Anything that can change what the map shows.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    /// The change feed reported an insert.
    DataArrived,
    WindowChanged(TimeWindow),
    LocaleChanged(Locale),
    ViewportChanged(Viewport),
    /// Periodic re-evaluation so sightings age out of the window.
    Tick,
    ConnectivityChanged { online: bool },
    UserLocated(Result<LngLat, LocationError>),
    PopupOpened(SightingId),
    PopupClosed,
}

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct LiveMap<S, T, M> {
    store: LiveViewStore,
    storage: Arc<S>,
    translator: Arc<CachedTranslator<T>>,
    renderer: MapRenderer<M>,
    window: TimeWindow,
    viewport: Viewport,
    threshold_px: f64,
    tick: Duration,
    clock: Clock,
    translated_tx: mpsc::UnboundedSender<(TranslationTicket, String)>,
    translated_rx: mpsc::UnboundedReceiver<(TranslationTicket, String)>,
    renders: usize,
}

impl<S, T, M> LiveMap<S, T, M>
where
    S: SightingStore + 'static,
    T: Translator + 'static,
    M: MapSurface,
{
    pub fn new(
        storage: Arc<S>,
        translator: Arc<CachedTranslator<T>>,
        surface: M,
        settings: &MapSettings,
        locale: Locale,
    ) -> Self {
        let (translated_tx, translated_rx) = mpsc::unbounded_channel();
        Self {
            store: LiveViewStore::new(),
            storage,
            translator,
            renderer: MapRenderer::new(surface, locale),
            window: settings.window,
            viewport: settings.viewport(),
            threshold_px: settings.threshold_px,
            tick: settings.tick(),
            clock: Box::new(Utc::now),
            translated_tx,
            translated_rx,
            renders: 0,
        }
    }

    /// Replaces the wall clock, mostly for tests.
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Box::new(clock);
        self
    }

    pub fn renderer(&self) -> &MapRenderer<M> {
        &self.renderer
    }

    pub fn store(&self) -> &LiveViewStore {
        &self.store
    }

    pub fn window(&self) -> TimeWindow {
        self.window
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    /// Number of full draw passes so far.
    pub fn render_count(&self) -> usize {
        self.renders
    }

    /// Mounts the map, performs the initial bulk load and draws the first
    /// frame. A failed load still draws (with the failure banner) before the
    /// error is returned.
    pub async fn start(&mut self) -> Result<RenderStats, LoadError> {
        self.renderer.begin_loading();
        let loaded = self.load_initial().await;
        self.renderer.mark_ready();
        let stats = self.recompute_and_render();
        loaded.map(|_| stats)
    }

    /// Fetches every live sighting into the store.
    pub async fn load_initial(&mut self) -> Result<usize, LoadError> {
        match self.storage.fetch_recent().await {
            Ok(records) => {
                self.store.load_all(sightings_from_records(records));
                Ok(self.store.len())
            }
            Err(e) => {
                warn!("Initial load failed: {}", e);
                self.store.mark_failed();
                Err(LoadError::DataLoadFailed(e))
            }
        }
    }

    /// Fetches the sightings created since the newest one held after a
    /// change notification. Redraws only when the store actually changed.
    pub async fn ingest_notification(&mut self) -> bool {
        let changed = self.apply(Trigger::DataArrived).await;
        if changed {
            self.recompute_and_render();
        }
        changed
    }

    pub fn recompute_and_render(&mut self) -> RenderStats {
        let now = (self.clock)();
        let snapshot = self.store.snapshot();
        let visible = filter(&snapshot, now, self.window);
        let viewport = self.viewport;
        let clusters = cluster(&visible, |p| viewport.project(p), self.threshold_px);
        let ctx = RenderContext {
            now,
            window: self.window,
            viewport: &viewport,
            load_state: self.store.load_state(),
            total_sightings: snapshot.len(),
        };
        let stats = self.renderer.draw(&clusters, &ctx);
        self.renders += 1;
        debug!(
            "Rendered {} clusters ({} of {} sightings visible)",
            stats.clusters,
            stats.visible_sightings,
            snapshot.len()
        );
        stats
    }

    /// Applies a trigger and redraws if it changed anything visible.
    pub async fn handle(&mut self, trigger: Trigger) {
        if self.apply(trigger).await {
            self.recompute_and_render();
        }
    }

    /// Updates state for one trigger. Returns whether a redraw is due.
    async fn apply(&mut self, trigger: Trigger) -> bool {
        match trigger {
            Trigger::DataArrived => {
                match ingest_new(self.storage.as_ref(), &mut self.store).await {
                    Ok(inserted) => inserted > 0,
                    Err(e) => {
                        warn!("Could not fetch new sightings: {}", e);
                        false
                    }
                }
            }
            Trigger::WindowChanged(window) => {
                info!("Time window set to {}", window);
                self.window = window;
                true
            }
            Trigger::LocaleChanged(locale) => {
                if let Some(request) = self.renderer.set_locale(locale) {
                    self.spawn_translation(request);
                }
                true
            }
            Trigger::ViewportChanged(viewport) => {
                self.viewport = viewport;
                true
            }
            Trigger::Tick => true,
            Trigger::ConnectivityChanged { online } => {
                info!("Connectivity changed, online: {}", online);
                self.renderer.set_banner(Banner::Offline, !online);
                false
            }
            Trigger::UserLocated(Ok(position)) => {
                self.renderer.set_banner(Banner::LocationDenied, false);
                self.renderer.set_user_location(Some(position));
                self.viewport = self.viewport.with_center(position, USER_ZOOM);
                self.renderer.move_camera(self.viewport);
                true
            }
            Trigger::UserLocated(Err(LocationError::Denied)) => {
                self.renderer.set_banner(Banner::LocationDenied, true);
                false
            }
            Trigger::UserLocated(Err(e)) => {
                warn!("No user location: {}", e);
                false
            }
            Trigger::PopupOpened(id) => {
                if let Some(request) = self.renderer.open_popup(&id) {
                    self.spawn_translation(request);
                }
                false
            }
            Trigger::PopupClosed => {
                self.renderer.close_popup();
                false
            }
        }
    }

    fn spawn_translation(&self, request: TranslationRequest) {
        let translator = Arc::clone(&self.translator);
        let tx = self.translated_tx.clone();
        tokio::spawn(async move {
            let text = translator
                .translate(&request.text, Locale::SOURCE, request.ticket.locale)
                .await;
            // The map may be gone by now.
            let _ = tx.send((request.ticket, text));
        });
    }

    /// Waits for the next finished translation and applies it if it is
    /// still current. Returns whether it was applied.
    pub async fn apply_next_translation(&mut self) -> bool {
        match self.translated_rx.recv().await {
            Some((ticket, text)) => self.renderer.apply_translation(&ticket, text),
            None => false,
        }
    }

    /// Drives the map until the control channel closes. Feed notifications,
    /// control triggers, the relevance tick and translation results are
    /// handled one at a time, so the store has a single writer. Returns the
    /// surface after teardown.
    pub async fn run(mut self, mut feed: Subscription, mut control: mpsc::Receiver<Trigger>) -> M {
        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;
        let mut feed_open = true;

        loop {
            tokio::select! {
                notification = feed.recv(), if feed_open => match notification {
                    Some(n) => {
                        debug!("Change notification {:?}", n.id);
                        self.ingest_notification().await;
                    }
                    None => {
                        warn!("Change feed closed");
                        feed_open = false;
                    }
                },
                trigger = control.recv() => {
                    let Some(first) = trigger else {
                        break;
                    };
                    let mut dirty = self.apply(first).await;
                    // Coalesce whatever else is already queued into one redraw.
                    while let Ok(next) = control.try_recv() {
                        dirty |= self.apply(next).await;
                    }
                    if dirty {
                        self.recompute_and_render();
                    }
                }
                _ = ticker.tick() => {
                    self.recompute_and_render();
                }
                Some((ticket, text)) = self.translated_rx.recv() => {
                    self.renderer.apply_translation(&ticket, text);
                }
            }
        }

        feed.unsubscribe();
        self.destroy();
        self.renderer.into_surface()
    }

    pub fn destroy(&mut self) {
        if self.renderer.destroy() {
            info!("Live map torn down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{ChangeFeed, ChangeNotification, ChannelFeed};
    use crate::render::MarkerKind;
    use crate::store::LoadState;
    use crate::testing::{MemoryStorage, RecordingSurface, ScriptedTranslator, base_time, record_aged};
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::Ordering;

    type TestMap = LiveMap<MemoryStorage, ScriptedTranslator, RecordingSurface>;

    fn map_with(storage: Arc<MemoryStorage>, translator: ScriptedTranslator, locale: Locale) -> TestMap {
        let translator = Arc::new(CachedTranslator::new(translator, 16));
        LiveMap::new(storage, translator, RecordingSurface::default(), &MapSettings::default(), locale)
            .with_clock(base_time)
    }

    #[tokio::test]
    async fn test_start_draws_initial_load() {
        let storage = Arc::new(MemoryStorage::with_records(vec![
            record_aged("a", base_time(), 5),
            record_aged("b", base_time(), 90),
        ]));
        let mut map = map_with(storage, ScriptedTranslator::by_locale(), Locale::En);
        let stats = map.start().await.unwrap();
        assert_eq!(stats.visible_sightings, 2);
        assert_eq!(map.store().load_state(), LoadState::Loaded);
        assert_eq!(map.render_count(), 1);
    }

    #[tokio::test]
    async fn test_load_failure_shows_banner() {
        let storage = Arc::new(MemoryStorage::default());
        storage.fail_fetch.store(true, Ordering::SeqCst);
        let mut map = map_with(Arc::clone(&storage), ScriptedTranslator::by_locale(), Locale::En);

        assert!(matches!(map.start().await, Err(LoadError::DataLoadFailed(_))));
        assert!(map.renderer().banner_visible(Banner::LoadFailed));
        assert!(map.renderer().surface().markers.is_empty());

        // Reconnecting does not retry the bulk load.
        storage.fail_fetch.store(false, Ordering::SeqCst);
        storage.push(record_aged("old", base_time(), 20));
        storage.push(record_aged("a", base_time(), 1));
        map.handle(Trigger::ConnectivityChanged { online: true }).await;
        assert_eq!(map.store().load_state(), LoadState::Failed);
        assert!(map.store().is_empty());
        assert!(map.renderer().banner_visible(Banner::LoadFailed));

        // A live insert does recover the view.
        assert!(map.ingest_notification().await);
        assert!(!map.renderer().banner_visible(Banner::LoadFailed));
        assert_eq!(map.renderer().surface().single_ids(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_rows_inserted_between_notifications_all_arrive() {
        let storage = Arc::new(MemoryStorage::with_records(vec![record_aged("a", base_time(), 30)]));
        let mut map = map_with(Arc::clone(&storage), ScriptedTranslator::by_locale(), Locale::En);
        map.start().await.unwrap();

        storage.push(record_aged("b", base_time(), 2));
        storage.push(record_aged("c", base_time(), 1));
        assert!(map.ingest_notification().await);
        assert!(!map.ingest_notification().await);
        for id in ["a", "b", "c"] {
            assert!(map.store().contains(&SightingId::from(id)));
        }
        assert_eq!(map.render_count(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_notification_does_not_redraw() {
        let storage = Arc::new(MemoryStorage::with_records(vec![record_aged("a", base_time(), 5)]));
        let mut map = map_with(Arc::clone(&storage), ScriptedTranslator::by_locale(), Locale::En);
        map.start().await.unwrap();

        storage.push(record_aged("x", base_time(), 0));
        assert!(map.ingest_notification().await);
        assert_eq!(map.render_count(), 2);

        // Same row delivered again.
        assert!(!map.ingest_notification().await);
        assert_eq!(map.render_count(), 2);
        assert_eq!(map.store().len(), 2);
        assert_eq!(map.renderer().surface().markers.len(), 1);
    }

    #[tokio::test]
    async fn test_window_change_filters() {
        let storage = Arc::new(MemoryStorage::with_records(vec![
            record_aged("fresh", base_time(), 10),
            record_aged("old", base_time(), 100),
        ]));
        let mut map = map_with(storage, ScriptedTranslator::by_locale(), Locale::En);
        map.start().await.unwrap();

        map.handle(Trigger::WindowChanged(TimeWindow::OneHour)).await;
        assert_eq!(map.window(), TimeWindow::OneHour);
        let visible: usize = map
            .renderer()
            .surface()
            .markers
            .values()
            .map(|m| match m.kind {
                MarkerKind::Badge { count, .. } => count,
                MarkerKind::Single { .. } => 1,
                MarkerKind::UserLocation => 0,
            })
            .sum();
        assert_eq!(visible, 1);

        map.handle(Trigger::WindowChanged(TimeWindow::ThirtyMinutes)).await;
        map.handle(Trigger::ViewportChanged(Viewport {
            zoom: 16.0,
            ..*map.viewport()
        }))
        .await;
        assert_eq!(map.renderer().surface().single_ids(), vec!["fresh"]);
    }

    #[tokio::test]
    async fn test_tick_ages_out_sightings() {
        let storage = Arc::new(MemoryStorage::with_records(vec![record_aged("a", base_time(), 25)]));
        let translator = Arc::new(CachedTranslator::new(ScriptedTranslator::by_locale(), 4));
        let settings = MapSettings { window: TimeWindow::ThirtyMinutes, ..MapSettings::default() };
        let clock_start = base_time();
        let elapsed = Arc::new(std::sync::atomic::AtomicI64::new(0));
        let minutes = Arc::clone(&elapsed);
        let mut map = LiveMap::new(storage, translator, RecordingSurface::default(), &settings, Locale::En)
            .with_clock(move || clock_start + ChronoDuration::minutes(minutes.load(Ordering::SeqCst)));
        map.start().await.unwrap();
        assert_eq!(map.renderer().surface().single_ids(), vec!["a"]);

        elapsed.store(6, Ordering::SeqCst);
        map.handle(Trigger::Tick).await;
        assert!(map.renderer().surface().markers.is_empty());
        assert!(map.renderer().banner_visible(Banner::NoSightingsInWindow));
    }

    #[tokio::test]
    async fn test_user_location_and_denial() {
        let storage = Arc::new(MemoryStorage::default());
        let mut map = map_with(storage, ScriptedTranslator::by_locale(), Locale::En);
        map.start().await.unwrap();

        map.handle(Trigger::UserLocated(Err(LocationError::Denied))).await;
        assert!(map.renderer().banner_visible(Banner::LocationDenied));

        let here = LngLat::new(-87.6, 41.9);
        map.handle(Trigger::UserLocated(Ok(here))).await;
        assert!(!map.renderer().banner_visible(Banner::LocationDenied));
        assert_eq!(map.viewport().center, here);
        assert_eq!(map.viewport().zoom, USER_ZOOM);
        assert_eq!(map.renderer().surface().camera.map(|v| v.center), Some(here));
        assert!(
            map.renderer()
                .surface()
                .markers
                .values()
                .any(|m| m.kind == MarkerKind::UserLocation)
        );
    }

    #[tokio::test]
    async fn test_offline_banner() {
        let storage = Arc::new(MemoryStorage::default());
        let mut map = map_with(storage, ScriptedTranslator::by_locale(), Locale::En);
        map.start().await.unwrap();
        map.handle(Trigger::ConnectivityChanged { online: false }).await;
        assert!(map.renderer().banner_visible(Banner::Offline));
        map.handle(Trigger::ConnectivityChanged { online: true }).await;
        assert!(!map.renderer().banner_visible(Banner::Offline));
    }

    #[tokio::test]
    async fn test_popup_translation_is_applied() {
        let storage = Arc::new(MemoryStorage::with_records(vec![record_aged("a", base_time(), 3)]));
        let mut map = map_with(storage, ScriptedTranslator::by_locale(), Locale::Es);
        map.start().await.unwrap();

        map.handle(Trigger::PopupOpened("a".into())).await;
        assert!(map.apply_next_translation().await);
        let popup = map.renderer().surface().popup_for("a").unwrap();
        assert_eq!(popup.description.as_deref(), Some("es:report a"));
    }

    #[tokio::test]
    async fn test_late_translation_after_locale_switch_is_discarded() {
        let storage = Arc::new(MemoryStorage::with_records(vec![record_aged("a", base_time(), 3)]));
        let translator = ScriptedTranslator::by_locale().with_delay(Locale::Es, Duration::from_millis(30));
        let mut map = map_with(storage, translator, Locale::Es);
        map.start().await.unwrap();

        map.handle(Trigger::PopupOpened("a".into())).await;
        map.handle(Trigger::LocaleChanged(Locale::En)).await;

        assert!(!map.apply_next_translation().await);
        let popup = map.renderer().surface().popup_for("a").unwrap();
        assert_eq!(popup.description.as_deref(), Some("report a"));
        assert_eq!(popup.title, "ICE Sighting");
    }

    #[tokio::test]
    async fn test_run_ingests_feed_and_tears_down() {
        let storage = Arc::new(MemoryStorage::with_records(vec![record_aged("a", base_time(), 3)]));
        let mut map = map_with(Arc::clone(&storage), ScriptedTranslator::by_locale(), Locale::En);
        map.start().await.unwrap();

        let feed = ChannelFeed::new();
        let subscription = feed.subscribe();
        let (control, control_rx) = mpsc::channel(8);
        let handle = tokio::spawn(map.run(subscription, control_rx));

        storage.push(record_aged("b", base_time(), 0));
        assert_eq!(feed.notify(ChangeNotification { id: Some("b".into()) }), 1);
        control.send(Trigger::ViewportChanged(Viewport { zoom: 17.0, ..Viewport::default() })).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(control);

        let surface = handle.await.unwrap();
        assert!(surface.markers.is_empty());
        assert!(surface.removed >= 1);
        assert_eq!(feed.active_subscribers(), 0);
    }
}
