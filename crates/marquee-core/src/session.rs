//! Player session - main orchestrator for one player instance
//!
//! Wires the store, source resolver, engine manager, ad scheduler,
//! playback coordinator, episode navigator, and view tracker together and
//! exposes the control surface the UI calls. Each session owns its state
//! completely; two sessions on one page share nothing.
//!
//! Source changes rebuild everything tied to the previous source in a
//! fixed order: scheduler teardown, coordinator release, engine teardown,
//! store session reset, then the new activation. Continuations from the
//! old source die against the generation counters of their owners.

use crate::ads::AdScheduler;
use crate::config::PlayerConfig;
use crate::coordinator::PlaybackCoordinator;
use crate::engine::{EngineFactory, EngineManager};
use crate::episodes::EpisodeNavigator;
use crate::media::{MediaElement, MediaEvent};
use crate::source::resolve_stream_type;
use crate::store::{PlayerStore, StoreSnapshot};
use crate::tracking::{ViewTracker, WatchTimeStore};
use crate::types::{ErrorState, QualitySelection, SessionId};
use crate::Result;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Seek jumps and source changes produce deltas that are not watch time
const MAX_WATCH_DELTA_SECS: f64 = 2.0;

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct SessionInner {
    id: SessionId,
    config: PlayerConfig,
    store: Arc<PlayerStore>,
    main: Arc<dyn MediaElement>,
    manager: EngineManager,
    coordinator: Arc<PlaybackCoordinator>,
    scheduler: AdScheduler,
    episodes: EpisodeNavigator,
    tracker: ViewTracker,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        for task in locked(&self.tasks).drain(..) {
            task.abort();
        }
    }
}

/// One player instance
pub struct PlayerSession {
    inner: Arc<SessionInner>,
}

impl PlayerSession {
    /// Assemble a session around the two media surfaces
    ///
    /// `main` renders the content, `ad` renders creatives; they must be
    /// distinct so an ad break never clobbers main-content position.
    pub fn new(
        config: PlayerConfig,
        main: Arc<dyn MediaElement>,
        ad: Arc<dyn MediaElement>,
        factory: Arc<dyn EngineFactory>,
        watch_store: Box<dyn WatchTimeStore>,
    ) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(PlayerStore::new());
        let coordinator = Arc::new(PlaybackCoordinator::new(store.clone(), main.clone()));
        let scheduler = AdScheduler::new(
            store.clone(),
            coordinator.clone(),
            main.clone(),
            ad,
            config.ads.clone().unwrap_or_default(),
        );
        let (episodes, advance_rx) = EpisodeNavigator::new(store.clone(), config.next_episode);
        let tracker = ViewTracker::new(watch_store, config.tracking.clone());
        let manager = EngineManager::new(store.clone(), factory, config.engine);

        // Subscribe before anything can load so no event slips past.
        let media_events = main.subscribe();

        let inner = Arc::new(SessionInner {
            id: SessionId::new(),
            config,
            store,
            main,
            manager,
            coordinator,
            scheduler,
            episodes,
            tracker,
            tasks: Mutex::new(Vec::new()),
        });

        let pump = tokio::spawn(pump_media_events(Arc::downgrade(&inner), media_events));
        let advance = tokio::spawn(run_auto_advance(Arc::downgrade(&inner), advance_rx));
        {
            let mut tasks = locked(&inner.tasks);
            tasks.push(pump);
            tasks.push(advance);
        }

        info!(session_id = %inner.id, "player session created");
        Ok(Self { inner })
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        self.inner.store.snapshot().await
    }

    /// Observe every published state transition
    pub fn subscribe(&self) -> watch::Receiver<StoreSnapshot> {
        self.inner.store.subscribe()
    }

    /// Seed initial state and load the configured source
    #[instrument(skip(self), fields(session_id = %self.inner.id))]
    pub async fn load(&self) -> Result<()> {
        let inner = &self.inner;
        inner.main.set_volume(inner.config.initial_volume);
        inner.main.set_muted(inner.config.start_muted);
        inner.store.set_volume(inner.config.initial_volume).await;
        inner.store.set_muted(inner.config.start_muted).await;
        inner
            .store
            .set_subtitle_tracks(inner.config.subtitles.clone())
            .await;
        if let Some(episodes) = &inner.config.episodes {
            inner
                .episodes
                .install(episodes.list.clone(), episodes.current_index)
                .await;
        }
        let src = inner.config.src.clone();
        load_source(inner, &src).await
    }

    // ---- Playback controls ----

    pub async fn play(&self) {
        self.inner.coordinator.request_playback().await;
    }

    pub fn pause(&self) {
        self.inner.coordinator.pause();
    }

    pub fn seek(&self, seconds: f64) {
        self.inner.main.seek(seconds);
    }

    pub fn set_volume(&self, volume: f64) {
        self.inner.main.set_volume(volume.clamp(0.0, 1.0));
    }

    pub fn toggle_mute(&self) {
        let muted = self.inner.main.muted();
        self.inner.main.set_muted(!muted);
    }

    /// Ask the attached engine for a quality, remembering the choice
    pub async fn set_quality(&self, selection: QualitySelection) {
        self.inner.manager.apply_quality(selection).await;
    }

    pub async fn select_subtitle(&self, index: Option<usize>) -> Result<()> {
        self.inner.store.set_active_subtitle(index).await
    }

    /// Jump past the configured intro window
    pub async fn skip_intro(&self) {
        let Some(intro) = self.inner.config.intro else {
            return;
        };
        debug!(to = intro.end, "skipping intro");
        self.inner.main.seek(intro.end);
        self.inner.store.set_show_skip_intro(false).await;
    }

    // ---- Ad controls ----

    /// Skip the active ad break when its gate has unlocked
    pub async fn skip_ad(&self) -> bool {
        self.inner.scheduler.skip().await
    }

    /// Retry a creative that failed to load
    pub async fn retry_ad_load(&self) {
        self.inner.scheduler.retry_load().await;
    }

    /// The viewer tapped the ad overlay after an autoplay rejection
    pub async fn confirm_ad_playback(&self) {
        self.inner.scheduler.confirm_playback().await;
    }

    // ---- Episode controls ----

    pub async fn play_episode(&self, index: usize) -> Result<()> {
        let episode = self.inner.episodes.select(index).await?;
        load_source(&self.inner, &episode.url).await
    }

    pub async fn next_episode(&self) -> Result<()> {
        let episode = self.inner.episodes.next().await?;
        load_source(&self.inner, &episode.url).await
    }

    pub async fn previous_episode(&self) -> Result<()> {
        let episode = self.inner.episodes.previous().await?;
        load_source(&self.inner, &episode.url).await
    }

    pub async fn dismiss_next_episode(&self) {
        self.inner.episodes.dismiss().await;
    }

    // ---- Recovery and teardown ----

    /// Reload the current source from scratch after a fatal error
    pub async fn retry(&self) -> Result<()> {
        self.inner.store.clear_error().await;
        let current = self.inner.store.snapshot().await.stream.source_url;
        let src = if current.is_empty() {
            self.inner.config.src.clone()
        } else {
            current
        };
        info!(url = %src, "retrying source load");
        load_source(&self.inner, &src).await
    }

    /// Flush tracking and release every held resource
    ///
    /// Mirrors a page unload: safe to call more than once, and the
    /// element cleanup runs even when playback never started.
    pub async fn unload(&self) {
        info!(session_id = %self.inner.id, "session unloading");
        self.inner.tracker.flush();
        self.inner.scheduler.teardown();
        self.inner.episodes.teardown();
        self.inner.coordinator.release();
        self.inner.manager.teardown().await;
    }
}

/// Swap the session onto a new source
async fn load_source(inner: &Arc<SessionInner>, src: &str) -> Result<()> {
    let stream_type = resolve_stream_type(inner.config.stream_type_hint, src);
    info!(
        session_id = %inner.id,
        url = %src,
        stream_type = %stream_type,
        "loading source"
    );

    // Unwind the previous source completely before anything new starts.
    inner.scheduler.teardown();
    inner.coordinator.release();
    inner.manager.teardown().await;

    inner.store.begin_stream_session(src, stream_type).await;
    inner.scheduler.begin_source().await;
    inner
        .manager
        .activate(stream_type, src, inner.main.clone())
        .await?;

    if inner.config.autoplay {
        inner.coordinator.request_playback().await;
    }
    Ok(())
}

/// Forward main element events into the store and the collaborators
async fn pump_media_events(
    weak: Weak<SessionInner>,
    mut events: broadcast::Receiver<MediaEvent>,
) {
    let mut last_time = 0.0_f64;
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "media event stream lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let Some(inner) = weak.upgrade() else {
            break;
        };
        match event {
            MediaEvent::TimeUpdate { seconds } => {
                inner.store.set_current_time(seconds).await;
                let delta = seconds - last_time;
                last_time = seconds;
                if delta > 0.0 && delta <= MAX_WATCH_DELTA_SECS {
                    inner.tracker.add_watch_seconds(delta);
                }
                if let Some(intro) = inner.config.intro {
                    inner
                        .store
                        .set_show_skip_intro(seconds >= intro.start && seconds < intro.end)
                        .await;
                }
                inner.episodes.handle_time_update(seconds).await;
            }
            MediaEvent::LoadedMetadata { duration } => {
                inner.store.set_duration(duration).await;
                inner.scheduler.plan_mid_rolls(duration).await;
            }
            MediaEvent::CanPlay => {
                inner.store.set_buffering(false).await;
            }
            MediaEvent::Waiting => {
                inner.store.set_buffering(true).await;
            }
            MediaEvent::Playing => {
                inner.store.set_playing(true).await;
                inner.store.set_buffering(false).await;
                inner.tracker.note_playback_started();
            }
            MediaEvent::Pause => {
                inner.store.set_playing(false).await;
            }
            MediaEvent::Ended => {
                inner.store.set_playing(false).await;
                inner.scheduler.handle_main_ended().await;
                inner.episodes.handle_ended().await;
            }
            MediaEvent::VolumeChange { volume, muted } => {
                inner.store.set_volume(volume).await;
                inner.store.set_muted(muted).await;
            }
            MediaEvent::Progress { buffered_fraction } => {
                inner.store.set_buffered_fraction(buffered_fraction).await;
            }
            MediaEvent::Error { code, message } => {
                warn!(code, message = %message, "main element error");
                inner.store.set_playing(false).await;
                inner
                    .store
                    .set_error(ErrorState::from_media_error(code, message))
                    .await;
            }
        }
    }
}

/// Consume auto-advance requests from the episode countdown
async fn run_auto_advance(weak: Weak<SessionInner>, mut requests: mpsc::UnboundedReceiver<usize>) {
    while let Some(index) = requests.recv().await {
        let Some(inner) = weak.upgrade() else {
            break;
        };
        info!(index, "auto-advancing to the next episode");
        match inner.episodes.select(index).await {
            Ok(episode) => {
                if let Err(err) = load_source(&inner, &episode.url).await {
                    warn!(error = %err, "auto-advance load failed");
                }
            }
            Err(err) => warn!(error = %err, "auto-advance target out of range"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EpisodesConfig, IntroConfig};
    use crate::sim::{settle, SimEngineFactory, SimMediaElement};
    use crate::tracking::MemoryWatchTimeStore;
    use crate::types::{AttachmentKind, EpisodeInfo, StreamType};

    struct Harness {
        session: PlayerSession,
        main: Arc<SimMediaElement>,
        factory: Arc<SimEngineFactory>,
    }

    fn harness(config: PlayerConfig) -> Harness {
        let main = Arc::new(SimMediaElement::with_duration(100.0));
        let ad = Arc::new(SimMediaElement::with_duration(15.0));
        let factory = Arc::new(SimEngineFactory::new());
        let session = PlayerSession::new(
            config,
            main.clone(),
            ad,
            factory.clone(),
            Box::new(MemoryWatchTimeStore::new()),
        )
        .unwrap();
        Harness {
            session,
            main,
            factory,
        }
    }

    #[tokio::test]
    async fn load_attaches_the_right_engine_and_autoplays() {
        let h = harness(PlayerConfig::new("https://cdn.example.com/show.m3u8"));
        h.session.load().await.unwrap();
        settle().await;

        let snap = h.session.snapshot().await;
        assert_eq!(snap.stream.stream_type, Some(StreamType::Hls));
        assert_eq!(snap.stream.attachment, AttachmentKind::Hls);
        assert!(h.main.is_playing());
        assert!(snap.playback.is_playing);
        assert_eq!(h.factory.created_hls().len(), 1);
    }

    #[tokio::test]
    async fn time_updates_flow_into_the_store() {
        let h = harness(PlayerConfig::new("https://cdn.example.com/clip.mp4"));
        h.session.load().await.unwrap();
        settle().await;

        h.main.advance(5.0);
        settle().await;

        let snap = h.session.snapshot().await;
        assert_eq!(snap.playback.current_time, 5.0);
        assert_eq!(snap.playback.duration, 100.0);
    }

    #[tokio::test]
    async fn intro_window_toggles_the_skip_affordance() {
        let mut config = PlayerConfig::new("https://cdn.example.com/show.mp4");
        config.intro = Some(IntroConfig {
            start: 2.0,
            end: 8.0,
        });
        let h = harness(config);
        h.session.load().await.unwrap();
        settle().await;

        h.main.advance(3.0);
        settle().await;
        assert!(h.session.snapshot().await.ui.show_skip_intro);

        h.session.skip_intro().await;
        settle().await;
        let snap = h.session.snapshot().await;
        assert!(!snap.ui.show_skip_intro);
        assert_eq!(h.main.current_time(), 8.0);
    }

    #[tokio::test]
    async fn source_change_rebuilds_the_stream_session() {
        let mut config = PlayerConfig::new("https://cdn.example.com/s1e1.m3u8");
        config.episodes = Some(EpisodesConfig {
            list: vec![
                EpisodeInfo::new("s1e1", "Pilot", "https://cdn.example.com/s1e1.m3u8"),
                EpisodeInfo::new("s1e2", "Fallout", "https://cdn.example.com/s1e2.mpd"),
            ],
            current_index: 0,
        });
        let h = harness(config);
        h.session.load().await.unwrap();
        settle().await;

        h.main.advance(10.0);
        settle().await;
        h.session.next_episode().await.unwrap();
        settle().await;

        let snap = h.session.snapshot().await;
        assert_eq!(snap.stream.stream_type, Some(StreamType::Dash));
        assert_eq!(snap.episodes.current_index, 1);
        assert_eq!(snap.playback.current_time, 0.0);
        // The previous engine was disposed, not leaked.
        assert!(h.factory.created_hls()[0].destroyed());
    }

    #[tokio::test]
    async fn media_errors_surface_as_error_state() {
        let h = harness(PlayerConfig::new("https://cdn.example.com/clip.mp4"));
        h.session.load().await.unwrap();
        settle().await;

        h.main.fail(2, "segment fetch failed");
        settle().await;

        let snap = h.session.snapshot().await;
        let error = snap.error.unwrap();
        assert_eq!(error.code, 2);
        assert!(!snap.playback.is_playing);

        // The explicit retry reloads from scratch and clears the error.
        h.session.retry().await.unwrap();
        settle().await;
        let snap = h.session.snapshot().await;
        assert!(snap.error.is_none());
        assert!(h.main.is_playing());
    }

    #[tokio::test]
    async fn unload_releases_the_element_even_without_playback() {
        let mut config = PlayerConfig::new("https://cdn.example.com/clip.mp4");
        config.autoplay = false;
        let h = harness(config);
        h.session.load().await.unwrap();
        settle().await;
        assert!(!h.main.is_playing());

        h.session.unload().await;
        assert!(h.main.src().is_none());
    }

    #[tokio::test]
    async fn volume_controls_round_trip_through_the_element() {
        let h = harness(PlayerConfig::new("https://cdn.example.com/clip.mp4"));
        h.session.load().await.unwrap();
        settle().await;

        h.session.set_volume(0.25);
        h.session.toggle_mute();
        settle().await;

        let snap = h.session.snapshot().await;
        assert_eq!(snap.playback.volume, 0.25);
        assert!(snap.playback.is_muted);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_at_construction() {
        let mut config = PlayerConfig::new("clip.mp4");
        config.initial_volume = 7.0;
        let main: Arc<dyn MediaElement> = Arc::new(SimMediaElement::new());
        let ad: Arc<dyn MediaElement> = Arc::new(SimMediaElement::new());
        let result = PlayerSession::new(
            config,
            main,
            ad,
            Arc::new(SimEngineFactory::new()),
            Box::new(MemoryWatchTimeStore::new()),
        );
        assert!(result.is_err());
    }
}
