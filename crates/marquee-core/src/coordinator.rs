//! Primary playback lifecycle coordination
//!
//! Gates the main media element's autoplay behind the pre-roll state and
//! degrades gracefully when the surface rejects playback: a policy
//! rejection while unmuted gets exactly one mute-and-retry, anything
//! further is left to user interaction. Release always pauses, clears the
//! source, and reloads the element so underlying buffers are freed even
//! when playback was never attempted.

use crate::media::{MediaElement, MediaEvent, PlayError};
use crate::store::PlayerStore;
use crate::types::{ErrorCategory, ErrorState};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

struct CoordinatorInner {
    store: Arc<PlayerStore>,
    element: Arc<dyn MediaElement>,
    /// Bumped on release; stale attempts compare and drop themselves
    generation: AtomicU64,
    /// A play request arrived while the pre-roll gate was closed
    deferred: AtomicBool,
}

/// Decides when the main element is allowed to play
pub struct PlaybackCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl PlaybackCoordinator {
    pub fn new(store: Arc<PlayerStore>, element: Arc<dyn MediaElement>) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                store,
                element,
                generation: AtomicU64::new(0),
                deferred: AtomicBool::new(false),
            }),
        }
    }

    /// Request main playback, deferring while an ad break holds the gate
    #[instrument(skip(self))]
    pub async fn request_playback(&self) {
        self.inner.deferred.store(true, Ordering::SeqCst);
        if !self.gate_open().await {
            debug!("ad break holds the playback gate, deferring");
            return;
        }
        self.spawn_attempt();
    }

    /// Pause the main element for an ad break
    ///
    /// Records whether content was actually playing so the break's end
    /// hands control back even when playback started outside
    /// `request_playback`.
    pub fn hold_for_ad(&self) {
        if !self.inner.element.paused() {
            self.inner.deferred.store(true, Ordering::SeqCst);
        }
        self.inner.element.pause();
    }

    /// An ad break finished; resume main playback if one was wanted
    pub async fn resume_after_ad(&self) {
        if !self.inner.deferred.load(Ordering::SeqCst) {
            return;
        }
        if self.gate_open().await {
            self.spawn_attempt();
        }
    }

    pub fn pause(&self) {
        self.inner.deferred.store(false, Ordering::SeqCst);
        self.inner.element.pause();
    }

    /// Release the element's resources
    ///
    /// Runs on unmount and on every source change, whether or not playback
    /// was ever attempted. Clearing the src and forcing a reload is what
    /// actually drops the decoder buffers.
    pub fn release(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.deferred.store(false, Ordering::SeqCst);
        self.inner.element.pause();
        self.inner.element.set_src(None);
        self.inner.element.load();
        debug!("main element released");
    }

    async fn gate_open(&self) -> bool {
        let snap = self.inner.store.snapshot().await;
        !snap.ads.pre_roll_pending && snap.ads.active_break.is_none()
    }

    /// Run the play attempt off the caller's stack
    ///
    /// Waiting for readiness can take arbitrarily long; the spawned task
    /// checks the generation after every await so a source change or
    /// release invalidates it.
    fn spawn_attempt(&self) {
        let inner = self.inner.clone();
        let generation = inner.generation.load(Ordering::SeqCst);
        tokio::spawn(async move {
            attempt_playback(inner, generation).await;
        });
    }
}

async fn attempt_playback(inner: Arc<CoordinatorInner>, generation: u64) {
    if !inner.element.ready_state().can_play() {
        if !wait_for_readiness(&inner, generation).await {
            return;
        }
    }
    if inner.generation.load(Ordering::SeqCst) != generation {
        return;
    }

    match inner.element.play().await {
        Ok(()) => {
            debug!("main playback started");
        }
        Err(PlayError::NotAllowed) if !inner.element.muted() => {
            info!("autoplay rejected by policy, muting and retrying once");
            inner.element.set_muted(true);
            inner.store.set_muted(true).await;
            if inner.generation.load(Ordering::SeqCst) != generation {
                return;
            }
            if let Err(err) = inner.element.play().await {
                warn!(error = %err, "muted retry also rejected, waiting for user");
                inner.store.set_playing(false).await;
            }
        }
        Err(PlayError::NotSupported) => {
            inner
                .store
                .set_error(ErrorState::new(
                    0,
                    ErrorCategory::Src,
                    "source not supported by the media element",
                ))
                .await;
        }
        Err(err) => {
            warn!(error = %err, "playback attempt failed");
            inner.store.set_playing(false).await;
        }
    }
}

/// Block until the element reports it can play, once
async fn wait_for_readiness(inner: &Arc<CoordinatorInner>, generation: u64) -> bool {
    let mut events = inner.element.subscribe();
    // The ready state may have flipped between the caller's check and the
    // subscription above.
    if inner.element.ready_state().can_play() {
        return true;
    }
    loop {
        match events.recv().await {
            Ok(MediaEvent::CanPlay) => return true,
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => {
                if inner.element.ready_state().can_play() {
                    return true;
                }
            }
            Err(broadcast::error::RecvError::Closed) => return false,
        }
        if inner.generation.load(Ordering::SeqCst) != generation {
            return false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{settle, SimMediaElement};

    fn ready_element() -> Arc<SimMediaElement> {
        let element = Arc::new(SimMediaElement::new());
        element.set_src(Some("https://cdn.example.com/clip.mp4"));
        element.load();
        element
    }

    #[tokio::test]
    async fn plays_immediately_when_ready_and_gate_open() {
        let store = Arc::new(PlayerStore::new());
        let element = ready_element();
        let coordinator = PlaybackCoordinator::new(store, element.clone());

        coordinator.request_playback().await;
        settle().await;
        assert!(element.is_playing());
    }

    #[tokio::test]
    async fn defers_while_pre_roll_is_pending_and_resumes_after() {
        let store = Arc::new(PlayerStore::new());
        store.set_pre_roll_pending(true).await;
        let element = ready_element();
        let coordinator = PlaybackCoordinator::new(store.clone(), element.clone());

        coordinator.request_playback().await;
        settle().await;
        assert!(!element.is_playing());

        store.set_pre_roll_pending(false).await;
        coordinator.resume_after_ad().await;
        settle().await;
        assert!(element.is_playing());
    }

    #[tokio::test]
    async fn hold_remembers_running_playback_for_resume() {
        let store = Arc::new(PlayerStore::new());
        let element = ready_element();
        // Playback started directly on the element, not through
        // request_playback.
        element.play().await.unwrap();
        let coordinator = PlaybackCoordinator::new(store, element.clone());

        coordinator.hold_for_ad();
        assert!(!element.is_playing());

        coordinator.resume_after_ad().await;
        settle().await;
        assert!(element.is_playing());
    }

    #[tokio::test]
    async fn hold_does_not_resume_content_that_was_paused() {
        let store = Arc::new(PlayerStore::new());
        let element = ready_element();
        let coordinator = PlaybackCoordinator::new(store, element.clone());

        coordinator.hold_for_ad();
        coordinator.resume_after_ad().await;
        settle().await;
        // Nothing was playing when the break started; nothing resumes.
        assert!(!element.is_playing());
    }

    #[tokio::test]
    async fn policy_rejection_mutes_and_retries_once() {
        let store = Arc::new(PlayerStore::new());
        let element = ready_element();
        element.reject_unmuted_play(true);
        let coordinator = PlaybackCoordinator::new(store.clone(), element.clone());

        coordinator.request_playback().await;
        settle().await;

        assert!(element.is_playing());
        assert!(element.muted());
        assert!(store.snapshot().await.playback.is_muted);
        assert_eq!(element.play_attempts(), 2);
    }

    #[tokio::test]
    async fn second_rejection_gives_up_without_looping() {
        let store = Arc::new(PlayerStore::new());
        let element = ready_element();
        element.reject_unmuted_play(true);
        // The muted retry is also scripted to fail.
        element.script_play_failure(PlayError::NotAllowed);
        element.script_play_failure(PlayError::NotAllowed);
        let coordinator = PlaybackCoordinator::new(store.clone(), element.clone());

        coordinator.request_playback().await;
        settle().await;

        assert!(!element.is_playing());
        assert!(!store.snapshot().await.playback.is_playing);
        assert_eq!(element.play_attempts(), 2);
    }

    #[tokio::test]
    async fn unsupported_source_surfaces_an_error_state() {
        let store = Arc::new(PlayerStore::new());
        let element = ready_element();
        element.script_play_failure(PlayError::NotSupported);
        let coordinator = PlaybackCoordinator::new(store.clone(), element.clone());

        coordinator.request_playback().await;
        settle().await;

        let error = store.snapshot().await.error.unwrap();
        assert_eq!(error.category, ErrorCategory::Src);
    }

    #[tokio::test]
    async fn release_clears_source_and_cancels_deferred_play() {
        let store = Arc::new(PlayerStore::new());
        store.set_pre_roll_pending(true).await;
        let element = ready_element();
        let coordinator = PlaybackCoordinator::new(store.clone(), element.clone());

        coordinator.request_playback().await;
        coordinator.release();
        settle().await;

        assert!(element.src().is_none());
        assert!(!element.is_playing());

        store.set_pre_roll_pending(false).await;
        coordinator.resume_after_ad().await;
        settle().await;
        // The deferred request died with the release.
        assert!(!element.is_playing());
    }
}
