//! View tracking
//!
//! Accumulates watched seconds into a durable key-value store so the
//! counter survives a reload that skipped the unload flush, fires
//! `on_viewed` once per session on the first play, and reports the
//! accumulated total through `on_watch_time_updated` at unload when it
//! clears the configured threshold. The counter resets to zero after
//! every flush; it is a reporting aid, never playback resume state.

use crate::config::TrackingConfig;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Durable storage for the watched-seconds counter
pub trait WatchTimeStore: Send + Sync {
    fn load(&self) -> Result<f64>;

    fn save(&self, seconds: f64) -> Result<()>;
}

/// In-memory store, for tests and headless runs
#[derive(Default)]
pub struct MemoryWatchTimeStore {
    seconds: Mutex<f64>,
}

impl MemoryWatchTimeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WatchTimeStore for MemoryWatchTimeStore {
    fn load(&self) -> Result<f64> {
        Ok(*locked(&self.seconds))
    }

    fn save(&self, seconds: f64) -> Result<()> {
        *locked(&self.seconds) = seconds;
        Ok(())
    }
}

/// On-disk record behind [`JsonWatchTimeStore`]
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WatchTimeRecord {
    seconds: f64,
    updated_at: DateTime<Utc>,
}

/// JSON-file-backed store
pub struct JsonWatchTimeStore {
    path: PathBuf,
}

impl JsonWatchTimeStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl WatchTimeStore for JsonWatchTimeStore {
    fn load(&self) -> Result<f64> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => {
                let record: WatchTimeRecord = serde_json::from_str(&raw)?;
                Ok(record.seconds.max(0.0))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(0.0),
            Err(err) => Err(Error::WatchTimeStore(err.to_string())),
        }
    }

    fn save(&self, seconds: f64) -> Result<()> {
        let record = WatchTimeRecord {
            seconds,
            updated_at: Utc::now(),
        };
        let raw = serde_json::to_string_pretty(&record)?;
        std::fs::write(&self.path, raw).map_err(|err| Error::WatchTimeStore(err.to_string()))
    }
}

/// Session-scoped view tracking
pub struct ViewTracker {
    store: Box<dyn WatchTimeStore>,
    config: TrackingConfig,
    accumulated: Mutex<f64>,
    viewed_fired: AtomicBool,
}

impl ViewTracker {
    /// Resume accumulation from whatever the store survived with
    pub fn new(store: Box<dyn WatchTimeStore>, config: TrackingConfig) -> Self {
        let initial = store.load().unwrap_or_else(|err| {
            warn!(error = %err, "watch-time store unreadable, starting from zero");
            0.0
        });
        if initial > 0.0 {
            debug!(seconds = initial, "resuming persisted watch time");
        }
        Self {
            store,
            config,
            accumulated: Mutex::new(initial),
            viewed_fired: AtomicBool::new(false),
        }
    }

    /// First play of the session fires `on_viewed` exactly once
    pub fn note_playback_started(&self) {
        if self.viewed_fired.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("first play of the session");
        if let Some(hook) = &self.config.hooks.on_viewed {
            hook();
        }
    }

    /// Record seconds actually watched since the last report
    pub fn add_watch_seconds(&self, delta: f64) {
        if delta <= 0.0 {
            return;
        }
        let total = {
            let mut acc = locked(&self.accumulated);
            *acc += delta;
            *acc
        };
        if let Err(err) = self.store.save(total) {
            warn!(error = %err, "watch-time persistence failed");
        }
    }

    pub fn accumulated(&self) -> f64 {
        *locked(&self.accumulated)
    }

    /// Unload flush: report past the threshold, then reset to zero
    pub fn flush(&self) {
        let total = {
            let mut acc = locked(&self.accumulated);
            std::mem::take(&mut *acc)
        };
        if total >= self.config.flush_threshold_seconds {
            info!(watch_time = total, "watch-time threshold reached, reporting");
            if let Some(hook) = &self.config.hooks.on_watch_time_updated {
                hook(total);
            }
        } else {
            debug!(watch_time = total, "below threshold, nothing reported");
        }
        if let Err(err) = self.store.save(0.0) {
            warn!(error = %err, "watch-time reset failed");
        }
    }
}
