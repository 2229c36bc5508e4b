//! Adaptive streaming engines
//!
//! Protocol-specific engines (HLS, DASH) attach to a media element and
//! translate manifests into playable streams. The session never talks to
//! a concrete engine type; it goes through [`EngineFactory`] to probe
//! capability and create instances, and holds whatever came back as an
//! [`Attachment`].

mod dash;
mod hls;
pub mod manager;

pub use dash::DashEngine;
pub use hls::HlsEngine;
pub use manager::EngineManager;

use crate::types::{AttachmentKind, QualityLevel, QualitySelection};
use crate::Result;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Adaptive protocols an engine can drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineProtocol {
    Hls,
    Dash,
}

impl std::fmt::Display for EngineProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineProtocol::Hls => write!(f, "hls"),
            EngineProtocol::Dash => write!(f, "dash"),
        }
    }
}

/// What a factory can do for a protocol on the current surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineSupport {
    /// An engine instance is available
    Full,
    /// No engine, but the element plays the protocol natively
    NativePlayback,
    /// Neither; fall back to direct src assignment
    Unsupported,
}

/// How badly an engine error hurts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorClass {
    /// Transport failure; worth restarting with backoff
    Network,
    /// Decode or buffer corruption; one in-place recovery attempt
    Media,
    /// Unrecoverable; tear down and surface to the UI
    Fatal,
}

impl std::fmt::Display for EngineErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineErrorClass::Network => write!(f, "network"),
            EngineErrorClass::Media => write!(f, "media"),
            EngineErrorClass::Fatal => write!(f, "fatal"),
        }
    }
}

/// An error event raised by an engine
#[derive(Debug, Clone, PartialEq)]
pub struct EngineError {
    pub class: EngineErrorClass,
    /// Engine-specific detail code, 0 when not applicable
    pub code: i32,
    pub message: String,
}

impl EngineError {
    pub fn new(class: EngineErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            code: 0,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} error: {}", self.class, self.message)
    }
}

/// Events an attached engine publishes
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Manifest parsed; the quality ladder is known
    ManifestLoaded { levels: Vec<QualityLevel> },
    /// The ladder changed mid-stream
    LevelsUpdated { levels: Vec<QualityLevel> },
    /// The engine switched to a concrete level
    LevelSwitched { selection: QualitySelection },
    Error(EngineError),
}

/// Creates engines and reports what the current surface supports
pub trait EngineFactory: Send + Sync {
    fn support(&self, protocol: EngineProtocol) -> EngineSupport;

    fn create_hls(&self) -> Result<Arc<dyn HlsEngine>>;

    fn create_dash(&self) -> Result<Arc<dyn DashEngine>>;
}

/// Whatever is currently bound to the media element
///
/// Exactly one attachment exists per element at any time; the manager
/// guarantees the previous one is fully disposed before creating the next.
#[derive(Clone)]
pub enum Attachment {
    Hls(Arc<dyn HlsEngine>),
    Dash(Arc<dyn DashEngine>),
    /// Native protocol playback, plain src assignment
    Native,
    /// Progressive or unknown source, plain src assignment
    Direct,
}

impl Attachment {
    pub fn kind(&self) -> AttachmentKind {
        match self {
            Attachment::Hls(_) => AttachmentKind::Hls,
            Attachment::Dash(_) => AttachmentKind::Dash,
            Attachment::Native => AttachmentKind::Native,
            Attachment::Direct => AttachmentKind::Direct,
        }
    }

    /// Release everything the engine holds
    pub fn dispose(&self) {
        match self {
            Attachment::Hls(engine) => engine.destroy(),
            Attachment::Dash(engine) => engine.reset(),
            Attachment::Native | Attachment::Direct => {}
        }
    }

    /// Kick loading again after a transport failure
    pub fn restart(&self) {
        match self {
            Attachment::Hls(engine) => engine.start_load(),
            Attachment::Dash(engine) => engine.reload(),
            Attachment::Native | Attachment::Direct => {}
        }
    }

    /// Attempt in-place recovery from a media error
    pub fn recover_media(&self) {
        match self {
            Attachment::Hls(engine) => engine.recover_media_error(),
            Attachment::Dash(engine) => engine.recover(),
            Attachment::Native | Attachment::Direct => {}
        }
    }

    /// Event stream, when an engine is driving
    pub fn subscribe(&self) -> Option<broadcast::Receiver<EngineEvent>> {
        match self {
            Attachment::Hls(engine) => Some(engine.subscribe()),
            Attachment::Dash(engine) => Some(engine.subscribe()),
            Attachment::Native | Attachment::Direct => None,
        }
    }
}

impl std::fmt::Debug for Attachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Attachment::{}", self.kind())
    }
}
