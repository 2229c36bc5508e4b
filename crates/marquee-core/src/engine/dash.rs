//! DASH engine trait
//!
//! The control surface follows the dash.js model: representations are
//! addressed by id, and pinning one implies disabling automatic switching
//! first.

use super::EngineEvent;
use crate::media::MediaElement;
use crate::types::QualityLevel;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

/// A DASH playback engine bound to one media element
#[async_trait]
pub trait DashEngine: Send + Sync {
    /// Attach to the element and start loading the MPD
    ///
    /// Emits [`EngineEvent::ManifestLoaded`] once representations are known.
    async fn initialize(&self, src: &str, element: Arc<dyn MediaElement>) -> Result<()>;

    /// Tear everything down; the instance is dead afterwards
    fn reset(&self);

    /// Video representations from the MPD, each carrying its id
    fn representations(&self) -> Vec<QualityLevel>;

    /// Enable or disable automatic bitrate switching
    fn set_auto_switch(&self, enabled: bool);

    /// Pin a representation by id; false when the id is unknown
    fn select_representation(&self, id: &str) -> bool;

    /// Reload the source after a transport failure
    fn reload(&self);

    /// Try to recover from a media error without reattaching
    fn recover(&self);

    /// Subscribe to engine events
    fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;
}
