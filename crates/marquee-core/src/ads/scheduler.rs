//! Ad break scheduling and playback
//!
//! Drives the pre/mid/post-roll state machine against a secondary ad
//! media element. One 1-second poll task per source load watches the main
//! element's clock for due mid-rolls; one pump task forwards ad element
//! events into skip gating and completion handling. Both carry the
//! session generation and exit when a new source load bumps it.
//!
//! Hook discipline: `on_ad_start` fires on activation, `on_ad_end` on
//! natural completion, `on_ad_skip` on user skip (which suppresses
//! `on_ad_end`), `on_ad_error` on load timeout or playback failure. Each
//! fires at most once per break id per source load because activation is
//! claimed through the store's played-id set.

use super::placement;
use crate::config::AdsConfig;
use crate::coordinator::PlaybackCoordinator;
use crate::media::{MediaElement, MediaEvent, PlayError};
use crate::store::PlayerStore;
use crate::types::{AdBreak, AdBreakKind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// How the active break ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AdExit {
    Completed,
    Skipped,
}

struct SchedulerInner {
    store: Arc<PlayerStore>,
    coordinator: Arc<PlaybackCoordinator>,
    main: Arc<dyn MediaElement>,
    ad: Arc<dyn MediaElement>,
    config: AdsConfig,
    /// Bumped per source load; stale tasks compare and exit
    generation: AtomicU64,
    post_roll: Mutex<Option<AdBreak>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Schedules and plays ad breaks for one player session
pub struct AdScheduler {
    inner: Arc<SchedulerInner>,
}

impl AdScheduler {
    pub fn new(
        store: Arc<PlayerStore>,
        coordinator: Arc<PlaybackCoordinator>,
        main: Arc<dyn MediaElement>,
        ad: Arc<dyn MediaElement>,
        config: AdsConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                store,
                coordinator,
                main,
                ad,
                config,
                generation: AtomicU64::new(0),
                post_roll: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Start an ad session for a fresh source load
    ///
    /// Tears down whatever the previous load left running, materializes
    /// the pre- and post-roll spots, starts the pump and poll tasks, and
    /// activates the pre-roll immediately when one is configured.
    #[instrument(skip(self))]
    pub async fn begin_source(&self) {
        self.teardown();
        let generation = self.inner.generation.load(Ordering::SeqCst);

        let pre_roll = self
            .inner
            .config
            .pre_roll
            .as_ref()
            .map(|spot| placement::materialize(spot, AdBreakKind::PreRoll));
        *locked(&self.inner.post_roll) = self
            .inner
            .config
            .post_roll
            .as_ref()
            .map(|spot| placement::materialize(spot, AdBreakKind::PostRoll));

        self.inner.store.set_pre_roll_pending(pre_roll.is_some()).await;

        let pump = tokio::spawn(pump_ad_events(
            self.inner.clone(),
            generation,
            self.inner.ad.subscribe(),
        ));
        let poll = tokio::spawn(poll_mid_rolls(self.inner.clone(), generation));
        {
            let mut tasks = locked(&self.inner.tasks);
            tasks.push(pump);
            tasks.push(poll);
        }

        if let Some(brk) = pre_roll {
            activate(&self.inner, generation, brk).await;
        }
    }

    /// Build the mid-roll queue once the content duration is known
    pub async fn plan_mid_rolls(&self, duration: f64) {
        let plan = placement::plan_mid_rolls(
            &self.inner.config.mid_rolls,
            duration,
            self.inner.config.smart_placement.as_ref(),
        );
        info!(
            configured = self.inner.config.mid_rolls.len(),
            surviving = plan.len(),
            duration,
            "mid-roll queue planned"
        );
        self.inner.store.set_pending_mid_rolls(plan).await;
    }

    /// The main content ended; run the post-roll if one is still owed
    pub async fn handle_main_ended(&self) {
        let generation = self.inner.generation.load(Ordering::SeqCst);
        let Some(brk) = locked(&self.inner.post_roll).take() else {
            return;
        };
        activate(&self.inner, generation, brk).await;
    }

    /// Skip the active break
    ///
    /// Permitted only while the break is skippable and the gate has
    /// unlocked; returns whether a skip actually happened. A skip fires
    /// `on_ad_skip` and suppresses `on_ad_end`.
    pub async fn skip(&self) -> bool {
        let snap = self.inner.store.snapshot().await;
        let Some(brk) = &snap.ads.active_break else {
            return false;
        };
        if !brk.skippable || !snap.ads.can_skip {
            debug!(id = %brk.id, "skip refused, gate still locked");
            return false;
        }
        complete(&self.inner, AdExit::Skipped).await;
        true
    }

    /// Retry the active break's creative after a load failure
    pub async fn retry_load(&self) {
        let snap = self.inner.store.snapshot().await;
        let Some(brk) = snap.ads.active_break.clone() else {
            return;
        };
        let generation = self.inner.generation.load(Ordering::SeqCst);
        info!(id = %brk.id, "retrying ad creative load");
        self.inner.store.set_ad_load_error(false).await;
        start_creative(&self.inner, generation, &brk).await;
    }

    /// The viewer tapped the ad overlay; retry playback with the gesture
    pub async fn confirm_playback(&self) {
        let snap = self.inner.store.snapshot().await;
        let Some(brk) = snap.ads.active_break.clone() else {
            return;
        };
        self.inner.store.set_ad_waiting_for_gesture(false).await;
        if let Err(err) = self.inner.ad.play().await {
            warn!(id = %brk.id, error = %err, "ad playback failed after gesture");
            fail_active(&self.inner, &brk, &err.to_string()).await;
        }
    }

    /// Stop everything the current source load owns
    ///
    /// The generation bump invalidates in-flight continuations before the
    /// tasks are aborted, so none can fire into the next load's state.
    pub fn teardown(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        for task in locked(&self.inner.tasks).drain(..) {
            task.abort();
        }
        locked(&self.inner.post_roll).take();
        self.inner.ad.pause();
        self.inner.ad.set_src(None);
    }
}

impl Drop for AdScheduler {
    fn drop(&mut self) {
        for task in locked(&self.inner.tasks).drain(..) {
            task.abort();
        }
    }
}

/// Watch the main clock for the head of the mid-roll queue coming due
async fn poll_mid_rolls(inner: Arc<SchedulerInner>, generation: u64) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if inner.generation.load(Ordering::SeqCst) != generation {
            break;
        }
        let position = inner.main.current_time();
        if let Some(brk) = inner.store.take_due_mid_roll(position).await {
            activate(&inner, generation, brk).await;
        }
    }
}

/// Forward ad element events into gating and completion
async fn pump_ad_events(
    inner: Arc<SchedulerInner>,
    generation: u64,
    mut events: broadcast::Receiver<MediaEvent>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "ad event stream lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        if inner.generation.load(Ordering::SeqCst) != generation {
            break;
        }
        match event {
            MediaEvent::TimeUpdate { seconds } => {
                inner
                    .store
                    .update_ad_progress(seconds, inner.ad.duration())
                    .await;
            }
            MediaEvent::Ended => {
                complete(&inner, AdExit::Completed).await;
            }
            MediaEvent::Error { message, .. } => {
                let snap = inner.store.snapshot().await;
                if let Some(brk) = snap.ads.active_break.clone() {
                    fail_active(&inner, &brk, &message).await;
                }
            }
            _ => {}
        }
    }
}

/// Claim a break through the store and start its creative
async fn activate(inner: &Arc<SchedulerInner>, generation: u64, brk: AdBreak) {
    let claimed = match inner.store.activate_ad_break(&brk).await {
        Ok(claimed) => claimed,
        Err(err) => {
            warn!(id = %brk.id, error = %err, "ad break activation rejected");
            return;
        }
    };
    if !claimed {
        debug!(id = %brk.id, "break already played or another break active");
        return;
    }
    info!(id = %brk.id, kind = %brk.kind, "ad break activated");

    inner.coordinator.hold_for_ad();
    if let Some(hook) = &inner.config.hooks.on_ad_start {
        hook(&brk);
    }

    // The ad surface inherits the viewer's audio preferences.
    inner.ad.set_muted(inner.main.muted());
    inner.ad.set_volume(inner.main.volume());

    start_creative(inner, generation, &brk).await;
}

/// Load the creative, bound the wait for playability, then play
async fn start_creative(inner: &Arc<SchedulerInner>, generation: u64, brk: &AdBreak) {
    inner.ad.set_src(Some(&brk.url));
    inner.ad.load();

    let playable = wait_until_playable(&inner.ad, inner.config.load_timeout()).await;
    if inner.generation.load(Ordering::SeqCst) != generation {
        return;
    }
    if !playable {
        warn!(id = %brk.id, url = %brk.url, "ad creative load timed out");
        inner.store.set_ad_load_error(true).await;
        if let Some(hook) = &inner.config.hooks.on_ad_error {
            hook(brk, "creative did not become playable in time");
        }
        return;
    }

    match inner.ad.play().await {
        Ok(()) => {}
        Err(PlayError::NotAllowed) => {
            info!(id = %brk.id, "ad autoplay rejected, waiting for a tap");
            inner.store.set_ad_waiting_for_gesture(true).await;
        }
        Err(err) => {
            warn!(id = %brk.id, error = %err, "ad playback failed");
            fail_active(inner, brk, &err.to_string()).await;
        }
    }
}

/// Wait for the ad element to reach a playable ready state
async fn wait_until_playable(element: &Arc<dyn MediaElement>, timeout: Duration) -> bool {
    let mut events = element.subscribe();
    if element.ready_state().can_play() {
        return true;
    }
    let waited = tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(MediaEvent::CanPlay) => break true,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    if element.ready_state().can_play() {
                        break true;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break false,
            }
        }
    })
    .await;
    matches!(waited, Ok(true))
}

/// Close the active break and hand control back to the main content
async fn complete(inner: &Arc<SchedulerInner>, exit: AdExit) {
    let finished = match inner.store.finish_ad_break().await {
        Ok(finished) => finished,
        Err(err) => {
            warn!(error = %err, "ad break completion rejected");
            return;
        }
    };
    let Some(brk) = finished else {
        return;
    };
    info!(id = %brk.id, kind = %brk.kind, exit = ?exit, "ad break finished");

    inner.ad.pause();
    inner.ad.set_src(None);
    inner.ad.load();

    match exit {
        AdExit::Completed => {
            if let Some(hook) = &inner.config.hooks.on_ad_end {
                hook(&brk);
            }
        }
        AdExit::Skipped => {
            if let Some(hook) = &inner.config.hooks.on_ad_skip {
                hook(&brk);
            }
        }
    }

    // Post-roll has no main content left to resume.
    if brk.kind != AdBreakKind::PostRoll {
        inner.coordinator.resume_after_ad().await;
    }
}

/// An isolated ad failure; main playback state is never touched
async fn fail_active(inner: &Arc<SchedulerInner>, brk: &AdBreak, reason: &str) {
    inner.store.set_ad_load_error(true).await;
    if let Some(hook) = &inner.config.hooks.on_ad_error {
        hook(brk, reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AdHooks, AdSpot, SmartPlacement};
    use crate::sim::{settle, SimMediaElement};
    use crate::types::AdPhase;
    use std::sync::atomic::AtomicUsize;

    struct Harness {
        store: Arc<PlayerStore>,
        main: Arc<SimMediaElement>,
        ad: Arc<SimMediaElement>,
        scheduler: AdScheduler,
    }

    fn harness(config: AdsConfig) -> Harness {
        let store = Arc::new(PlayerStore::new());
        let main = Arc::new(SimMediaElement::with_duration(100.0));
        let ad = Arc::new(SimMediaElement::with_duration(15.0));
        let coordinator = Arc::new(PlaybackCoordinator::new(store.clone(), main.clone()));
        let scheduler = AdScheduler::new(
            store.clone(),
            coordinator,
            main.clone(),
            ad.clone(),
            config,
        );
        Harness {
            store,
            main,
            ad,
            scheduler,
        }
    }

    async fn start_main(h: &Harness) {
        h.main.set_src(Some("https://cdn.example.com/show.mp4"));
        h.main.load();
        h.main.play().await.unwrap();
    }

    fn counted_hooks(starts: Arc<AtomicUsize>, ends: Arc<AtomicUsize>) -> AdHooks {
        AdHooks::default()
            .with_on_ad_start(move |_| {
                starts.fetch_add(1, Ordering::SeqCst);
            })
            .with_on_ad_end(move |_| {
                ends.fetch_add(1, Ordering::SeqCst);
            })
    }

    #[tokio::test(start_paused = true)]
    async fn pre_roll_pauses_main_and_completion_resumes_it() {
        let starts = Arc::new(AtomicUsize::new(0));
        let ends = Arc::new(AtomicUsize::new(0));
        let config = AdsConfig {
            pre_roll: Some(AdSpot::new("https://ads.example.com/pre.mp4").with_id("pre")),
            hooks: counted_hooks(starts.clone(), ends.clone()),
            ..AdsConfig::default()
        };
        let h = harness(config);
        start_main(&h).await;

        h.scheduler.begin_source().await;
        settle().await;

        let snap = h.store.snapshot().await;
        assert_eq!(snap.ads.phase, AdPhase::PreRoll);
        assert!(!h.main.is_playing());
        assert!(h.ad.is_playing());
        assert_eq!(starts.load(Ordering::SeqCst), 1);

        // Run the creative to its end.
        h.ad.advance(20.0);
        settle().await;

        let snap = h.store.snapshot().await;
        assert_eq!(snap.ads.phase, AdPhase::Idle);
        assert!(snap.ads.active_break.is_none());
        assert_eq!(ends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn due_mid_roll_triggers_exactly_once() {
        let starts = Arc::new(AtomicUsize::new(0));
        let ends = Arc::new(AtomicUsize::new(0));
        let config = AdsConfig {
            mid_rolls: vec![AdSpot::new("https://ads.example.com/mid.mp4")
                .at(40.0)
                .with_id("mid-1")],
            hooks: counted_hooks(starts.clone(), ends.clone()),
            ..AdsConfig::default()
        };
        let h = harness(config);
        start_main(&h).await;
        h.scheduler.begin_source().await;
        h.scheduler.plan_mid_rolls(100.0).await;
        settle().await;

        h.main.advance(41.0);
        tokio::time::advance(Duration::from_millis(1100)).await;
        settle().await;

        assert_eq!(h.store.snapshot().await.ads.phase, AdPhase::MidRoll);
        assert_eq!(starts.load(Ordering::SeqCst), 1);

        // Finish the break, then keep polling past the trigger time; the
        // played id must never re-activate.
        h.ad.advance(20.0);
        settle().await;
        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(1)).await;
            settle().await;
        }
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        let snap = h.store.snapshot().await;
        assert_eq!(snap.ads.phase, AdPhase::Idle);
        assert!(snap.ads.played_break_ids.contains("mid-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn smart_placement_prunes_the_configured_list() {
        let config = AdsConfig {
            mid_rolls: vec![
                AdSpot::new("https://ads.example.com/a.mp4").at(5.0).with_id("a"),
                AdSpot::new("https://ads.example.com/b.mp4").at(40.0).with_id("b"),
                AdSpot::new("https://ads.example.com/c.mp4").at(70.0).with_id("c"),
                AdSpot::new("https://ads.example.com/d.mp4").at(95.0).with_id("d"),
            ],
            smart_placement: Some(SmartPlacement::default()),
            ..AdsConfig::default()
        };
        let h = harness(config);
        h.scheduler.begin_source().await;
        h.scheduler.plan_mid_rolls(100.0).await;

        let pending = h.store.snapshot().await.ads.pending_mid_rolls;
        let ids: Vec<&str> = pending.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn skip_respects_the_gate_and_suppresses_on_ad_end() {
        let ends = Arc::new(AtomicUsize::new(0));
        let skips = Arc::new(AtomicUsize::new(0));
        let ends_hook = ends.clone();
        let skips_hook = skips.clone();
        let config = AdsConfig {
            pre_roll: Some(
                AdSpot::new("https://ads.example.com/pre.mp4")
                    .with_id("pre")
                    .skippable_after(5.0),
            ),
            hooks: AdHooks::default()
                .with_on_ad_end(move |_| {
                    ends_hook.fetch_add(1, Ordering::SeqCst);
                })
                .with_on_ad_skip(move |_| {
                    skips_hook.fetch_add(1, Ordering::SeqCst);
                }),
            ..AdsConfig::default()
        };
        let h = harness(config);
        start_main(&h).await;
        h.scheduler.begin_source().await;
        settle().await;

        // Two seconds in: gate still locked.
        h.ad.advance(2.0);
        settle().await;
        assert!(!h.scheduler.skip().await);
        assert_eq!(h.store.snapshot().await.ads.phase, AdPhase::PreRoll);

        // Past the threshold: skip goes through.
        h.ad.advance(3.5);
        settle().await;
        assert!(h.scheduler.skip().await);
        settle().await;
        assert_eq!(h.store.snapshot().await.ads.phase, AdPhase::Idle);
        assert_eq!(skips.load(Ordering::SeqCst), 1);
        assert_eq!(ends.load(Ordering::SeqCst), 0);
        // The main content got control back.
        assert!(h.main.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn post_roll_runs_on_main_ended_and_does_not_resume_main() {
        let config = AdsConfig {
            post_roll: Some(AdSpot::new("https://ads.example.com/post.mp4").with_id("post")),
            ..AdsConfig::default()
        };
        let h = harness(config);
        start_main(&h).await;
        h.scheduler.begin_source().await;
        settle().await;

        h.scheduler.handle_main_ended().await;
        settle().await;
        assert_eq!(h.store.snapshot().await.ads.phase, AdPhase::PostRoll);

        h.ad.advance(20.0);
        settle().await;
        let snap = h.store.snapshot().await;
        assert_eq!(snap.ads.phase, AdPhase::Ended);
        assert!(!h.main.is_playing());

        // A second ended event must not replay the post-roll.
        h.scheduler.handle_main_ended().await;
        settle().await;
        assert_eq!(h.store.snapshot().await.ads.phase, AdPhase::Ended);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_creative_surfaces_a_load_error_and_retry_recovers() {
        let errors = Arc::new(AtomicUsize::new(0));
        let errors_hook = errors.clone();
        let config = AdsConfig {
            pre_roll: Some(AdSpot::new("https://ads.example.com/pre.mp4").with_id("pre")),
            load_timeout_ms: 2000,
            hooks: AdHooks::default().with_on_ad_error(move |_, _| {
                errors_hook.fetch_add(1, Ordering::SeqCst);
            }),
            ..AdsConfig::default()
        };
        let h = harness(config);
        h.ad.stall_loading(true);
        start_main(&h).await;

        // The creative never reaches a playable state; the bounded wait
        // expires and the retry affordance appears.
        h.scheduler.begin_source().await;
        settle().await;

        let snap = h.store.snapshot().await;
        assert!(snap.ads.load_error);
        assert_eq!(snap.ads.phase, AdPhase::PreRoll);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert!(!h.ad.is_playing());
        // An ad failure never corrupts main playback state.
        assert!(h.store.snapshot().await.error.is_none());

        h.ad.stall_loading(false);
        h.scheduler.retry_load().await;
        settle().await;
        assert!(h.ad.is_playing());
        assert!(!h.store.snapshot().await.ads.load_error);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_ad_autoplay_waits_for_a_gesture() {
        let config = AdsConfig {
            pre_roll: Some(AdSpot::new("https://ads.example.com/pre.mp4").with_id("pre")),
            ..AdsConfig::default()
        };
        let h = harness(config);
        h.ad.reject_unmuted_play(true);
        start_main(&h).await;
        h.scheduler.begin_source().await;
        settle().await;

        let snap = h.store.snapshot().await;
        assert!(snap.ads.waiting_for_gesture);
        assert!(!h.ad.is_playing());

        // The tap carries a gesture; the sim models that by lifting the policy.
        h.ad.reject_unmuted_play(false);
        h.scheduler.confirm_playback().await;
        settle().await;
        assert!(h.ad.is_playing());
        assert!(!h.store.snapshot().await.ads.waiting_for_gesture);
    }

    #[tokio::test(start_paused = true)]
    async fn ad_volume_follows_the_main_element() {
        let config = AdsConfig {
            pre_roll: Some(AdSpot::new("https://ads.example.com/pre.mp4").with_id("pre")),
            ..AdsConfig::default()
        };
        let h = harness(config);
        h.main.set_volume(0.3);
        h.main.set_muted(true);
        start_main(&h).await;
        h.scheduler.begin_source().await;
        settle().await;

        assert_eq!(h.ad.volume(), 0.3);
        assert!(h.ad.muted());
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_stops_polling_and_releases_the_ad_element() {
        let starts = Arc::new(AtomicUsize::new(0));
        let config = AdsConfig {
            mid_rolls: vec![AdSpot::new("https://ads.example.com/mid.mp4")
                .at(10.0)
                .with_id("mid")],
            hooks: counted_hooks(starts.clone(), Arc::new(AtomicUsize::new(0))),
            ..AdsConfig::default()
        };
        let h = harness(config);
        start_main(&h).await;
        h.scheduler.begin_source().await;
        h.scheduler.plan_mid_rolls(100.0).await;
        settle().await;

        h.scheduler.teardown();
        h.main.advance(15.0);
        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(1)).await;
            settle().await;
        }
        assert_eq!(starts.load(Ordering::SeqCst), 0);
        assert!(h.ad.src().is_none());
    }
}
