//! Episode navigation and auto-advance
//!
//! Bounds-checked navigation over the configured episode list plus the
//! next-episode countdown card: it appears at a configured content time
//! or when the content ends, ticks once per second, and requests an
//! advance when it reaches zero. Dismissing the card disarms auto-advance
//! for the rest of the source load. The navigator never loads sources
//! itself; it hands the target index to the session over a channel.

use crate::config::NextEpisodeConfig;
use crate::store::PlayerStore;
use crate::types::EpisodeInfo;
use crate::{Error, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct NavigatorInner {
    store: Arc<PlayerStore>,
    config: Option<NextEpisodeConfig>,
    advance_tx: mpsc::UnboundedSender<usize>,
    /// Bumped on teardown and dismissal; a stale countdown exits quietly
    generation: AtomicU64,
    countdown: Mutex<Option<JoinHandle<()>>>,
}

/// Episode list navigation for one player session
pub struct EpisodeNavigator {
    inner: Arc<NavigatorInner>,
}

impl EpisodeNavigator {
    /// Create the navigator and the channel auto-advance requests land on
    pub fn new(
        store: Arc<PlayerStore>,
        config: Option<NextEpisodeConfig>,
    ) -> (Self, mpsc::UnboundedReceiver<usize>) {
        let (advance_tx, advance_rx) = mpsc::unbounded_channel();
        (
            Self {
                inner: Arc::new(NavigatorInner {
                    store,
                    config,
                    advance_tx,
                    generation: AtomicU64::new(0),
                    countdown: Mutex::new(None),
                }),
            },
            advance_rx,
        )
    }

    pub async fn install(&self, list: Vec<EpisodeInfo>, current_index: usize) {
        self.inner.store.set_episode_list(list, current_index).await;
    }

    /// Resolve the episode at an index and mark it current
    pub async fn select(&self, index: usize) -> Result<EpisodeInfo> {
        let snap = self.inner.store.snapshot().await;
        let episode = snap
            .episodes
            .list
            .get(index)
            .cloned()
            .ok_or(Error::EpisodeOutOfRange {
                index,
                count: snap.episodes.list.len(),
            })?;
        self.inner.store.set_current_episode(index).await?;
        self.cancel_countdown().await;
        info!(index, id = %episode.id, "episode selected");
        Ok(episode)
    }

    /// The episode after the current one, if any
    pub async fn next(&self) -> Result<EpisodeInfo> {
        let snap = self.inner.store.snapshot().await;
        self.select(snap.episodes.current_index + 1).await
    }

    /// The episode before the current one, if any
    pub async fn previous(&self) -> Result<EpisodeInfo> {
        let snap = self.inner.store.snapshot().await;
        let index = snap
            .episodes
            .current_index
            .checked_sub(1)
            .ok_or(Error::EpisodeOutOfRange {
                index: 0,
                count: snap.episodes.list.len(),
            })?;
        self.select(index).await
    }

    /// Playback position moved; maybe surface the countdown card
    pub async fn handle_time_update(&self, position: f64) {
        let Some(config) = &self.inner.config else {
            return;
        };
        let Some(show_at) = config.show_at_time else {
            return;
        };
        if position >= show_at {
            self.maybe_start_countdown(config.countdown_seconds).await;
        }
    }

    /// The main content ended; maybe surface the countdown card
    pub async fn handle_ended(&self) {
        let Some(config) = &self.inner.config else {
            return;
        };
        if config.show_at_end {
            self.maybe_start_countdown(config.countdown_seconds).await;
        }
    }

    /// Hide the card and disarm auto-advance for this source load
    pub async fn dismiss(&self) {
        self.cancel_countdown().await;
        self.inner.store.set_auto_advance_armed(false).await;
        debug!("next-episode countdown dismissed");
    }

    pub fn teardown(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = locked(&self.inner.countdown).take() {
            task.abort();
        }
    }

    async fn maybe_start_countdown(&self, seconds: u32) {
        let snap = self.inner.store.snapshot().await;
        if snap.episodes.countdown_visible
            || !snap.episodes.auto_advance_armed
            || !snap.episodes.has_next()
            || snap.ads.active_break.is_some()
        {
            return;
        }
        let target = snap.episodes.current_index + 1;
        self.inner.store.show_episode_countdown(seconds).await;
        info!(seconds, target, "next-episode countdown started");

        let inner = self.inner.clone();
        let generation = inner.generation.load(Ordering::SeqCst);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            // The first tick completes immediately; the countdown starts
            // a full second later.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if inner.generation.load(Ordering::SeqCst) != generation {
                    return;
                }
                let remaining = inner.store.tick_episode_countdown().await;
                if remaining == 0 {
                    break;
                }
            }
            // Distinguish "counted down to zero" from "card was hidden".
            let snap = inner.store.snapshot().await;
            if snap.episodes.countdown_visible && snap.episodes.auto_advance_armed {
                inner.store.hide_episode_countdown().await;
                let _ = inner.advance_tx.send(target);
            }
        });
        if let Some(stale) = locked(&self.inner.countdown).replace(task) {
            stale.abort();
        }
    }

    async fn cancel_countdown(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = locked(&self.inner.countdown).take() {
            task.abort();
        }
        self.inner.store.hide_episode_countdown().await;
    }
}

impl Drop for EpisodeNavigator {
    fn drop(&mut self) {
        if let Some(task) = locked(&self.inner.countdown).take() {
            task.abort();
        }
    }
}
