//! Reactive player state store
//!
//! Single owned source of truth per player session. Every mutation goes
//! through a named setter that takes the write lock, applies the change,
//! and publishes a fresh snapshot on a watch channel. Writes that do not
//! change anything publish nothing, so subscribers only wake for real
//! transitions and redundant event bursts collapse to a single
//! notification.

use crate::types::{
    AdBreak, AdBreakKind, AdPhase, AttachmentKind, EpisodeInfo, ErrorState, QualityLevel,
    QualitySelection, StreamType, SubtitleTrack,
};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::sync::{watch, RwLock};

/// Transport and element state for the main content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    pub is_playing: bool,
    pub is_buffering: bool,
    pub is_muted: bool,
    /// Volume in [0.0, 1.0]
    pub volume: f64,
    pub current_time: f64,
    /// 0.0 until metadata arrives
    pub duration: f64,
    /// Fraction of the content buffered, in [0.0, 1.0]
    pub buffered_fraction: f64,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            is_playing: false,
            is_buffering: false,
            is_muted: false,
            volume: 1.0,
            current_time: 0.0,
            duration: 0.0,
            buffered_fraction: 0.0,
        }
    }
}

/// The currently loaded source and whatever is attached for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StreamState {
    pub source_url: String,
    pub stream_type: Option<StreamType>,
    pub attachment: AttachmentKind,
    /// Quality ladder reported by the attached engine
    pub levels: Vec<QualityLevel>,
    /// The user's choice; survives source changes
    pub selected_quality: QualitySelection,
    /// What the engine last confirmed
    pub applied_quality: QualitySelection,
}

/// Ad scheduler state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AdState {
    pub phase: AdPhase,
    pub active_break: Option<AdBreak>,
    /// Seconds into the active creative
    pub elapsed: f64,
    /// Creative duration, 0.0 until metadata arrives
    pub ad_duration: f64,
    pub can_skip: bool,
    /// Seconds until skip unlocks, 0 once it has
    pub skip_countdown: u32,
    /// Mid-roll queue, ascending by trigger time
    pub pending_mid_rolls: Vec<AdBreak>,
    /// Break ids already activated this source load
    pub played_break_ids: HashSet<String>,
    /// A configured pre-roll has not finished yet
    pub pre_roll_pending: bool,
    /// Creative failed to load; retry affordance is showing
    pub load_error: bool,
    /// Unmuted ad autoplay was rejected; tap-to-play is showing
    pub waiting_for_gesture: bool,
}

/// Episode list and the next-episode countdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeState {
    pub list: Vec<EpisodeInfo>,
    pub current_index: usize,
    pub countdown_visible: bool,
    pub countdown_seconds: u32,
    /// Cleared when the viewer dismisses the countdown
    pub auto_advance_armed: bool,
}

impl Default for EpisodeState {
    fn default() -> Self {
        Self {
            list: Vec::new(),
            current_index: 0,
            countdown_visible: false,
            countdown_seconds: 0,
            auto_advance_armed: true,
        }
    }
}

impl EpisodeState {
    pub fn has_next(&self) -> bool {
        self.current_index + 1 < self.list.len()
    }

    pub fn current(&self) -> Option<&EpisodeInfo> {
        self.list.get(self.current_index)
    }
}

/// Sidecar subtitle tracks and the active selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SubtitleState {
    pub tracks: Vec<SubtitleTrack>,
    /// Index into `tracks`, or None for subtitles off
    pub active: Option<usize>,
}

/// Overlay visibility driven by playback position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiState {
    pub controls_visible: bool,
    pub show_skip_intro: bool,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            controls_visible: true,
            show_skip_intro: false,
        }
    }
}

/// Complete store contents at one revision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StoreSnapshot {
    /// Bumped on every published change
    pub revision: u64,
    pub playback: PlaybackState,
    pub stream: StreamState,
    pub ads: AdState,
    pub episodes: EpisodeState,
    pub subtitles: SubtitleState,
    pub ui: UiState,
    pub error: Option<ErrorState>,
}

/// Write a value into a slot, reporting whether anything changed
fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

/// Owned reactive store for one player session
pub struct PlayerStore {
    inner: RwLock<StoreSnapshot>,
    tx: watch::Sender<StoreSnapshot>,
}

impl PlayerStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(StoreSnapshot::default());
        Self {
            inner: RwLock::new(StoreSnapshot::default()),
            tx,
        }
    }

    /// Subscribe to published snapshots
    pub fn subscribe(&self) -> watch::Receiver<StoreSnapshot> {
        self.tx.subscribe()
    }

    /// Read the current state
    pub async fn snapshot(&self) -> StoreSnapshot {
        self.inner.read().await.clone()
    }

    /// Apply a mutation and publish if it changed anything
    async fn update<T>(&self, f: impl FnOnce(&mut StoreSnapshot) -> (bool, T)) -> T {
        let mut state = self.inner.write().await;
        let (changed, out) = f(&mut state);
        if changed {
            state.revision += 1;
            let snapshot = state.clone();
            drop(state);
            let _ = self.tx.send_replace(snapshot);
        }
        out
    }

    async fn set(&self, f: impl FnOnce(&mut StoreSnapshot) -> bool) {
        self.update(|s| (f(s), ())).await
    }

    // ---- Playback ----

    pub async fn set_playing(&self, playing: bool) {
        self.set(|s| replace(&mut s.playback.is_playing, playing)).await
    }

    pub async fn set_buffering(&self, buffering: bool) {
        self.set(|s| replace(&mut s.playback.is_buffering, buffering)).await
    }

    pub async fn set_muted(&self, muted: bool) {
        self.set(|s| replace(&mut s.playback.is_muted, muted)).await
    }

    pub async fn set_volume(&self, volume: f64) {
        self.set(|s| replace(&mut s.playback.volume, volume.clamp(0.0, 1.0))).await
    }

    pub async fn set_current_time(&self, seconds: f64) {
        self.set(|s| replace(&mut s.playback.current_time, seconds)).await
    }

    pub async fn set_duration(&self, seconds: f64) {
        self.set(|s| replace(&mut s.playback.duration, seconds)).await
    }

    pub async fn set_buffered_fraction(&self, fraction: f64) {
        self.set(|s| replace(&mut s.playback.buffered_fraction, fraction.clamp(0.0, 1.0))).await
    }

    // ---- Stream lifecycle ----

    /// Reset state for a fresh source
    ///
    /// Volume, mute, the quality preference, and the episode list survive.
    /// Everything tied to the previous source, including the ad session and
    /// any terminal error, is rebuilt from scratch.
    pub async fn begin_stream_session(&self, source_url: &str, stream_type: StreamType) {
        self.set(|s| {
            s.playback.is_playing = false;
            s.playback.is_buffering = false;
            s.playback.current_time = 0.0;
            s.playback.duration = 0.0;
            s.playback.buffered_fraction = 0.0;

            s.stream.source_url = source_url.to_string();
            s.stream.stream_type = Some(stream_type);
            s.stream.attachment = AttachmentKind::None;
            s.stream.levels.clear();
            s.stream.applied_quality = QualitySelection::Auto;

            s.ads = AdState::default();

            s.episodes.countdown_visible = false;
            s.episodes.countdown_seconds = 0;
            s.episodes.auto_advance_armed = true;

            s.ui.show_skip_intro = false;
            s.error = None;
            true
        })
        .await
    }

    pub async fn set_attachment(&self, kind: AttachmentKind) {
        self.set(|s| replace(&mut s.stream.attachment, kind)).await
    }

    pub async fn set_levels(&self, levels: Vec<QualityLevel>) {
        self.set(|s| replace(&mut s.stream.levels, levels)).await
    }

    pub async fn set_selected_quality(&self, selection: QualitySelection) {
        self.set(|s| replace(&mut s.stream.selected_quality, selection)).await
    }

    pub async fn set_applied_quality(&self, selection: QualitySelection) {
        self.set(|s| replace(&mut s.stream.applied_quality, selection)).await
    }

    /// Drop everything the torn-down engine owned
    pub async fn clear_engine_binding(&self) {
        self.set(|s| {
            let mut changed = replace(&mut s.stream.attachment, AttachmentKind::None);
            changed |= replace(&mut s.stream.levels, Vec::new());
            changed |= replace(&mut s.stream.applied_quality, QualitySelection::Auto);
            changed
        })
        .await
    }

    // ---- Errors ----

    pub async fn set_error(&self, error: ErrorState) {
        self.set(|s| replace(&mut s.error, Some(error))).await
    }

    pub async fn clear_error(&self) {
        self.set(|s| replace(&mut s.error, None)).await
    }

    // ---- Ads ----

    pub async fn set_pre_roll_pending(&self, pending: bool) {
        self.set(|s| replace(&mut s.ads.pre_roll_pending, pending)).await
    }

    pub async fn set_pending_mid_rolls(&self, breaks: Vec<AdBreak>) {
        self.set(|s| replace(&mut s.ads.pending_mid_rolls, breaks)).await
    }

    /// Pop the head of the mid-roll queue if playback has reached it
    ///
    /// Returns nothing while a break is active or outside the Idle phase.
    pub async fn take_due_mid_roll(&self, current_time: f64) -> Option<AdBreak> {
        self.update(|s| {
            if s.ads.active_break.is_some() || s.ads.phase != AdPhase::Idle {
                return (false, None);
            }
            let due = s
                .ads
                .pending_mid_rolls
                .first()
                .map(|b| b.trigger_time.map_or(false, |t| t <= current_time))
                .unwrap_or(false);
            if due {
                let brk = s.ads.pending_mid_rolls.remove(0);
                (true, Some(brk))
            } else {
                (false, None)
            }
        })
        .await
    }

    /// Claim and activate an ad break
    ///
    /// Returns `Ok(false)` without touching anything when the break id was
    /// already played this source load or another break is active, so a
    /// double-scheduled id activates at most once.
    pub async fn activate_ad_break(&self, brk: &AdBreak) -> Result<bool> {
        let target = match brk.kind {
            AdBreakKind::PreRoll => AdPhase::PreRoll,
            AdBreakKind::MidRoll => AdPhase::MidRoll,
            AdBreakKind::PostRoll => AdPhase::PostRoll,
        };
        self.update(|s| {
            if s.ads.played_break_ids.contains(&brk.id) || s.ads.active_break.is_some() {
                return (false, Ok(false));
            }
            if !s.ads.phase.can_transition_to(target) {
                return (
                    false,
                    Err(Error::InvalidAdTransition {
                        from: s.ads.phase.to_string(),
                        to: target.to_string(),
                    }),
                );
            }
            s.ads.phase = target;
            s.ads.active_break = Some(brk.clone());
            s.ads.elapsed = 0.0;
            s.ads.ad_duration = 0.0;
            s.ads.can_skip = false;
            s.ads.skip_countdown = if brk.skippable {
                brk.skip_after.max(0.0).ceil() as u32
            } else {
                0
            };
            s.ads.load_error = false;
            s.ads.waiting_for_gesture = false;
            s.ads.played_break_ids.insert(brk.id.clone());
            if brk.kind == AdBreakKind::PreRoll {
                s.ads.pre_roll_pending = false;
            }
            (true, Ok(true))
        })
        .await
    }

    /// Update skip gating from ad element progress
    ///
    /// The skip threshold is clamped to the creative duration once known,
    /// and `can_skip` never reverts while the same break is active.
    pub async fn update_ad_progress(&self, elapsed: f64, ad_duration: f64) {
        self.set(|s| {
            let Some(brk) = &s.ads.active_break else {
                return false;
            };
            let mut threshold = brk.skip_after.max(0.0);
            if ad_duration > 0.0 {
                threshold = threshold.min(ad_duration);
            }
            let unlocked = brk.skippable && elapsed >= threshold;
            let can_skip = s.ads.can_skip || unlocked;
            let countdown = if !brk.skippable || can_skip {
                0
            } else {
                (threshold - elapsed).max(0.0).ceil() as u32
            };

            let mut changed = replace(&mut s.ads.elapsed, elapsed);
            changed |= replace(&mut s.ads.ad_duration, ad_duration);
            changed |= replace(&mut s.ads.can_skip, can_skip);
            changed |= replace(&mut s.ads.skip_countdown, countdown);
            changed
        })
        .await
    }

    pub async fn set_ad_load_error(&self, failed: bool) {
        self.set(|s| replace(&mut s.ads.load_error, failed)).await
    }

    pub async fn set_ad_waiting_for_gesture(&self, waiting: bool) {
        self.set(|s| replace(&mut s.ads.waiting_for_gesture, waiting)).await
    }

    /// Close the active break, returning it for hook dispatch
    ///
    /// Pre- and mid-rolls return the phase to Idle; a post-roll moves it
    /// to Ended since there is no main content left to resume.
    pub async fn finish_ad_break(&self) -> Result<Option<AdBreak>> {
        self.update(|s| {
            let Some(brk) = s.ads.active_break.clone() else {
                return (false, Ok(None));
            };
            let target = match brk.kind {
                AdBreakKind::PostRoll => AdPhase::Ended,
                _ => AdPhase::Idle,
            };
            if !s.ads.phase.can_transition_to(target) {
                return (
                    false,
                    Err(Error::InvalidAdTransition {
                        from: s.ads.phase.to_string(),
                        to: target.to_string(),
                    }),
                );
            }
            s.ads.phase = target;
            s.ads.active_break = None;
            s.ads.elapsed = 0.0;
            s.ads.ad_duration = 0.0;
            s.ads.can_skip = false;
            s.ads.skip_countdown = 0;
            s.ads.load_error = false;
            s.ads.waiting_for_gesture = false;
            (true, Ok(Some(brk)))
        })
        .await
    }

    // ---- Episodes ----

    pub async fn set_episode_list(&self, list: Vec<EpisodeInfo>, current_index: usize) {
        self.set(|s| {
            let mut changed = replace(&mut s.episodes.list, list);
            changed |= replace(&mut s.episodes.current_index, current_index);
            changed
        })
        .await
    }

    pub async fn set_current_episode(&self, index: usize) -> Result<()> {
        self.update(|s| {
            if index >= s.episodes.list.len() {
                return (
                    false,
                    Err(Error::EpisodeOutOfRange {
                        index,
                        count: s.episodes.list.len(),
                    }),
                );
            }
            (replace(&mut s.episodes.current_index, index), Ok(()))
        })
        .await
    }

    pub async fn show_episode_countdown(&self, seconds: u32) {
        self.set(|s| {
            let mut changed = replace(&mut s.episodes.countdown_visible, true);
            changed |= replace(&mut s.episodes.countdown_seconds, seconds);
            changed
        })
        .await
    }

    /// Decrement the countdown, returning the seconds now remaining
    pub async fn tick_episode_countdown(&self) -> u32 {
        self.update(|s| {
            if !s.episodes.countdown_visible || s.episodes.countdown_seconds == 0 {
                return (false, 0);
            }
            s.episodes.countdown_seconds -= 1;
            (true, s.episodes.countdown_seconds)
        })
        .await
    }

    pub async fn hide_episode_countdown(&self) {
        self.set(|s| {
            let mut changed = replace(&mut s.episodes.countdown_visible, false);
            changed |= replace(&mut s.episodes.countdown_seconds, 0);
            changed
        })
        .await
    }

    pub async fn set_auto_advance_armed(&self, armed: bool) {
        self.set(|s| replace(&mut s.episodes.auto_advance_armed, armed)).await
    }

    // ---- Subtitles ----

    pub async fn set_subtitle_tracks(&self, tracks: Vec<SubtitleTrack>) {
        self.set(|s| {
            let mut changed = replace(&mut s.subtitles.tracks, tracks);
            if s.subtitles.active.map_or(false, |i| i >= s.subtitles.tracks.len()) {
                changed |= replace(&mut s.subtitles.active, None);
            }
            changed
        })
        .await
    }

    pub async fn set_active_subtitle(&self, index: Option<usize>) -> Result<()> {
        self.update(|s| {
            if let Some(i) = index {
                if i >= s.subtitles.tracks.len() {
                    return (
                        false,
                        Err(Error::InvalidConfig(format!(
                            "subtitle index {} out of range ({} tracks)",
                            i,
                            s.subtitles.tracks.len()
                        ))),
                    );
                }
            }
            (replace(&mut s.subtitles.active, index), Ok(()))
        })
        .await
    }

    // ---- UI ----

    pub async fn set_controls_visible(&self, visible: bool) {
        self.set(|s| replace(&mut s.ui.controls_visible, visible)).await
    }

    pub async fn set_show_skip_intro(&self, show: bool) {
        self.set(|s| replace(&mut s.ui.show_skip_intro, show)).await
    }
}

impl Default for PlayerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AdBreakKind;

    fn mid_roll(id: &str, at: f64) -> AdBreak {
        AdBreak {
            id: id.to_string(),
            kind: AdBreakKind::MidRoll,
            trigger_time: Some(at),
            url: format!("https://ads.example.com/{id}.mp4"),
            skippable: true,
            skip_after: 5.0,
            sponsored_url: None,
        }
    }

    #[tokio::test]
    async fn redundant_writes_publish_nothing() {
        let store = PlayerStore::new();
        let mut rx = store.subscribe();

        store.set_current_time(12.0).await;
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        store.set_current_time(12.0).await;
        assert!(!rx.has_changed().unwrap());

        let before = store.snapshot().await.revision;
        store.set_playing(false).await;
        assert_eq!(store.snapshot().await.revision, before);
    }

    #[tokio::test]
    async fn begin_stream_session_keeps_user_preferences() {
        let store = PlayerStore::new();
        store.set_muted(true).await;
        store.set_volume(0.4).await;
        store.set_selected_quality(QualitySelection::Level(2)).await;
        store.set_current_time(300.0).await;
        store
            .set_error(ErrorState::new(0, crate::types::ErrorCategory::Network, "stall"))
            .await;

        store.begin_stream_session("https://cdn.example.com/next.m3u8", StreamType::Hls).await;

        let snap = store.snapshot().await;
        assert!(snap.playback.is_muted);
        assert_eq!(snap.playback.volume, 0.4);
        assert_eq!(snap.stream.selected_quality, QualitySelection::Level(2));
        assert_eq!(snap.playback.current_time, 0.0);
        assert!(snap.error.is_none());
        assert_eq!(snap.ads, AdState::default());
    }

    #[tokio::test]
    async fn activate_ad_break_is_idempotent_per_id() {
        let store = PlayerStore::new();
        let brk = mid_roll("promo-1", 40.0);

        assert!(store.activate_ad_break(&brk).await.unwrap());
        assert!(store.finish_ad_break().await.unwrap().is_some());

        // Same id scheduled again this source load: skipped entirely.
        assert!(!store.activate_ad_break(&brk).await.unwrap());
        let snap = store.snapshot().await;
        assert_eq!(snap.ads.phase, AdPhase::Idle);
        assert_eq!(snap.ads.played_break_ids.len(), 1);
    }

    #[tokio::test]
    async fn take_due_mid_roll_respects_order_and_active_break() {
        let store = PlayerStore::new();
        store
            .set_pending_mid_rolls(vec![mid_roll("a", 40.0), mid_roll("b", 70.0)])
            .await;

        assert!(store.take_due_mid_roll(39.0).await.is_none());
        let first = store.take_due_mid_roll(41.0).await.unwrap();
        assert_eq!(first.id, "a");

        store.activate_ad_break(&first).await.unwrap();
        // Queue head is due but another break is active.
        assert!(store.take_due_mid_roll(80.0).await.is_none());

        store.finish_ad_break().await.unwrap();
        assert_eq!(store.take_due_mid_roll(80.0).await.unwrap().id, "b");
    }

    #[tokio::test]
    async fn skip_gate_is_monotone_and_clamped() {
        let store = PlayerStore::new();
        let brk = mid_roll("clip", 10.0);
        store.activate_ad_break(&brk).await.unwrap();

        store.update_ad_progress(2.0, 30.0).await;
        let snap = store.snapshot().await;
        assert!(!snap.ads.can_skip);
        assert_eq!(snap.ads.skip_countdown, 3);

        store.update_ad_progress(5.0, 30.0).await;
        assert!(store.snapshot().await.ads.can_skip);

        // Progress jitter backwards must not re-lock the gate.
        store.update_ad_progress(4.5, 30.0).await;
        let snap = store.snapshot().await;
        assert!(snap.ads.can_skip);
        assert_eq!(snap.ads.skip_countdown, 0);
    }

    #[tokio::test]
    async fn skip_threshold_clamps_to_short_creatives() {
        let store = PlayerStore::new();
        let mut brk = mid_roll("short", 10.0);
        brk.skip_after = 30.0;
        store.activate_ad_break(&brk).await.unwrap();

        // Creative is only 6 seconds long, so the gate unlocks at 6.
        store.update_ad_progress(6.0, 6.0).await;
        assert!(store.snapshot().await.ads.can_skip);
    }

    #[tokio::test]
    async fn post_roll_completion_moves_phase_to_ended() {
        let store = PlayerStore::new();
        let brk = AdBreak {
            id: "post".into(),
            kind: AdBreakKind::PostRoll,
            trigger_time: None,
            url: "https://ads.example.com/post.mp4".into(),
            skippable: false,
            skip_after: 0.0,
            sponsored_url: None,
        };
        store.activate_ad_break(&brk).await.unwrap();
        assert_eq!(store.snapshot().await.ads.phase, AdPhase::PostRoll);

        store.finish_ad_break().await.unwrap();
        assert_eq!(store.snapshot().await.ads.phase, AdPhase::Ended);
    }

    #[tokio::test]
    async fn episode_countdown_ticks_to_zero() {
        let store = PlayerStore::new();
        store.show_episode_countdown(3).await;
        assert_eq!(store.tick_episode_countdown().await, 2);
        assert_eq!(store.tick_episode_countdown().await, 1);
        assert_eq!(store.tick_episode_countdown().await, 0);
        // Already at zero, further ticks publish nothing.
        let before = store.snapshot().await.revision;
        assert_eq!(store.tick_episode_countdown().await, 0);
        assert_eq!(store.snapshot().await.revision, before);
    }

    #[tokio::test]
    async fn subtitle_selection_is_bounds_checked() {
        let store = PlayerStore::new();
        store
            .set_subtitle_tracks(vec![SubtitleTrack::new("en", "English", "https://cdn.example.com/en.vtt")])
            .await;
        assert!(store.set_active_subtitle(Some(0)).await.is_ok());
        assert!(store.set_active_subtitle(Some(3)).await.is_err());
        assert!(store.set_active_subtitle(None).await.is_ok());
    }

    #[tokio::test]
    async fn clear_engine_binding_preserves_selected_quality() {
        let store = PlayerStore::new();
        store.set_levels(vec![QualityLevel::new(0, 1280, 720, 2_500_000)]).await;
        store.set_selected_quality(QualitySelection::Level(0)).await;
        store.set_applied_quality(QualitySelection::Level(0)).await;
        store.set_attachment(AttachmentKind::Hls).await;

        store.clear_engine_binding().await;

        let snap = store.snapshot().await;
        assert_eq!(snap.stream.attachment, AttachmentKind::None);
        assert!(snap.stream.levels.is_empty());
        assert_eq!(snap.stream.applied_quality, QualitySelection::Auto);
        assert_eq!(snap.stream.selected_quality, QualitySelection::Level(0));
    }
}
