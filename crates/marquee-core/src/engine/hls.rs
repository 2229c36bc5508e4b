//! HLS engine trait
//!
//! The control surface follows the hls.js model: levels are addressed by
//! ladder index and `-1` means automatic.

use super::EngineEvent;
use crate::media::MediaElement;
use crate::types::QualityLevel;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

/// An HLS playback engine bound to one media element
#[async_trait]
pub trait HlsEngine: Send + Sync {
    /// Attach to the element and start loading the manifest
    ///
    /// Emits [`EngineEvent::ManifestLoaded`] once the ladder is known.
    async fn load(&self, src: &str, element: Arc<dyn MediaElement>) -> Result<()>;

    /// Tear everything down; the instance is dead afterwards
    fn destroy(&self);

    /// Quality ladder from the master playlist
    fn levels(&self) -> Vec<QualityLevel>;

    /// Index currently playing, -1 while automatic
    fn current_level(&self) -> i32;

    /// Pin a ladder index immediately, flushing the buffer
    fn set_current_level(&self, level: i32);

    /// Pin a ladder index at the next fragment boundary
    fn set_next_level(&self, level: i32);

    /// Cap automatic selection at a ladder index, -1 to clear
    fn set_autolevel_cap(&self, level: i32);

    /// Resume loading after a stop or a transport failure
    fn start_load(&self);

    /// Try to recover from a media error without reattaching
    fn recover_media_error(&self);

    /// Subscribe to engine events
    fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;
}
