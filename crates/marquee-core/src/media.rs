//! Media element abstraction
//!
//! The narrow seam between the orchestration engine and whatever actually
//! renders frames. Implementations forward state reads synchronously and
//! emit [`MediaEvent`]s on a broadcast channel; `play` is async because
//! real surfaces resolve it against an autoplay policy.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Identity of one media surface
///
/// Engine bindings are keyed on this, so swapping surfaces forces a
/// teardown and reattach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaElementId(pub Uuid);

impl MediaElementId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MediaElementId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MediaElementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How much of the current source the surface can render
///
/// Mirrors the HTMLMediaElement readyState ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub enum ReadyState {
    #[default]
    HaveNothing,
    HaveMetadata,
    HaveCurrentData,
    HaveFutureData,
    HaveEnoughData,
}

impl ReadyState {
    /// Enough data to start or resume playback
    pub fn can_play(self) -> bool {
        self >= ReadyState::HaveFutureData
    }
}

/// Why a play attempt was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlayError {
    /// Autoplay policy refused; retrying muted usually succeeds
    #[error("playback not allowed without a user gesture")]
    NotAllowed,
    /// The source cannot be played at all
    #[error("source not supported")]
    NotSupported,
    /// The attempt was interrupted, e.g. by a source change
    #[error("play attempt aborted")]
    Aborted,
    #[error("play failed: {0}")]
    Other(String),
}

/// Events a media surface publishes
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    /// Position moved during playback
    TimeUpdate { seconds: f64 },
    /// Duration became known
    LoadedMetadata { duration: f64 },
    /// Enough data buffered to play
    CanPlay,
    /// Playback stalled waiting for data
    Waiting,
    /// Playback started or resumed
    Playing,
    /// Playback paused
    Pause,
    /// Playback reached the end of the source
    Ended,
    /// Volume or mute flag changed
    VolumeChange { volume: f64, muted: bool },
    /// Buffered ranges grew
    Progress { buffered_fraction: f64 },
    /// The surface hit an unrecoverable error (MediaError numbering)
    Error { code: i32, message: String },
}

/// A surface that renders media
///
/// One instance backs the main content and a second one backs ad
/// creatives, so an ad never clobbers main-content position. Setters are
/// fire-and-forget; the surface confirms through events.
#[async_trait]
pub trait MediaElement: Send + Sync {
    fn id(&self) -> MediaElementId;

    /// Assign or clear the source; `None` detaches
    fn set_src(&self, src: Option<&str>);

    fn src(&self) -> Option<String>;

    /// Re-run resource selection after a src change
    fn load(&self);

    /// Attempt playback, resolving the surface's autoplay policy
    async fn play(&self) -> std::result::Result<(), PlayError>;

    fn pause(&self);

    /// True when playback is not in progress
    fn paused(&self) -> bool;

    fn current_time(&self) -> f64;

    fn seek(&self, seconds: f64);

    fn duration(&self) -> f64;

    fn ready_state(&self) -> ReadyState;

    fn muted(&self) -> bool;

    fn set_muted(&self, muted: bool);

    fn volume(&self) -> f64;

    fn set_volume(&self, volume: f64);

    /// Subscribe to surface events
    fn subscribe(&self) -> broadcast::Receiver<MediaEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_state_playable_threshold() {
        assert!(!ReadyState::HaveNothing.can_play());
        assert!(!ReadyState::HaveMetadata.can_play());
        assert!(!ReadyState::HaveCurrentData.can_play());
        assert!(ReadyState::HaveFutureData.can_play());
        assert!(ReadyState::HaveEnoughData.can_play());
    }
}
