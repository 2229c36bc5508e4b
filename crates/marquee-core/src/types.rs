//! Core types for Marquee

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resolved delivery protocol for a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamType {
    /// HTTP Live Streaming (.m3u8)
    Hls,
    /// MPEG-DASH (.mpd)
    Dash,
    /// Progressive MP4 (.mp4, .m4v)
    Mp4,
    /// Anything else, handed to the media element as-is
    Other,
}

impl std::fmt::Display for StreamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamType::Hls => write!(f, "hls"),
            StreamType::Dash => write!(f, "dash"),
            StreamType::Mp4 => write!(f, "mp4"),
            StreamType::Other => write!(f, "other"),
        }
    }
}

/// Caller-supplied hint about the source protocol
///
/// A hint always wins over extension detection. `Youtube` collapses to
/// [`StreamType::Other`] since embedded players manage their own delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamHint {
    Hls,
    Dash,
    Mp4,
    Youtube,
    Other,
}

impl std::str::FromStr for StreamHint {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hls" => Ok(StreamHint::Hls),
            "dash" => Ok(StreamHint::Dash),
            "mp4" => Ok(StreamHint::Mp4),
            "youtube" => Ok(StreamHint::Youtube),
            "other" => Ok(StreamHint::Other),
            other => Err(format!("unknown stream hint: {other}")),
        }
    }
}

impl std::fmt::Display for StreamHint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamHint::Hls => write!(f, "hls"),
            StreamHint::Dash => write!(f, "dash"),
            StreamHint::Mp4 => write!(f, "mp4"),
            StreamHint::Youtube => write!(f, "youtube"),
            StreamHint::Other => write!(f, "other"),
        }
    }
}

/// What is currently bound to the media element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    /// Nothing bound
    #[default]
    None,
    /// An HLS engine owns the element
    Hls,
    /// A DASH engine owns the element
    Dash,
    /// The element plays the protocol natively, plain src assignment
    Native,
    /// Progressive or unknown source, plain src assignment
    Direct,
}

impl std::fmt::Display for AttachmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttachmentKind::None => write!(f, "none"),
            AttachmentKind::Hls => write!(f, "hls"),
            AttachmentKind::Dash => write!(f, "dash"),
            AttachmentKind::Native => write!(f, "native"),
            AttachmentKind::Direct => write!(f, "direct"),
        }
    }
}

/// One entry in the quality ladder reported by an engine
///
/// For HLS the ladder is indexed positionally. For DASH each entry also
/// carries the representation id the engine selects by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityLevel {
    /// Position in the ladder as reported by the engine
    pub index: usize,
    pub width: u32,
    pub height: u32,
    /// Bandwidth in bits per second
    pub bitrate: u64,
    /// Representation id (DASH only)
    pub id: Option<String>,
}

impl QualityLevel {
    pub fn new(index: usize, width: u32, height: u32, bitrate: u64) -> Self {
        Self {
            index,
            width,
            height,
            bitrate,
            id: None,
        }
    }

    /// Attach a DASH representation id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Returns quality tier name
    pub fn tier_name(&self) -> &'static str {
        match self.height {
            0..=240 => "240p",
            241..=360 => "360p",
            361..=480 => "480p",
            481..=720 => "720p",
            721..=1080 => "1080p",
            1081..=1440 => "1440p",
            _ => "4K",
        }
    }
}

impl std::fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{} ({}x{}, {})", id, self.width, self.height, self.bitrate),
            None => write!(f, "#{} ({}x{}, {})", self.index, self.width, self.height, self.bitrate),
        }
    }
}

/// A user's quality choice
///
/// `Level` addresses the ladder positionally (the HLS convention, also
/// accepted for DASH where it resolves through the ladder to an id).
/// `Representation` addresses a DASH representation by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QualitySelection {
    /// Adaptive selection, no pin and no cap
    #[default]
    Auto,
    /// Pin a ladder index
    Level(usize),
    /// Pin a DASH representation id
    Representation(String),
}

impl QualitySelection {
    pub fn is_auto(&self) -> bool {
        matches!(self, QualitySelection::Auto)
    }
}

impl std::fmt::Display for QualitySelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QualitySelection::Auto => write!(f, "auto"),
            QualitySelection::Level(idx) => write!(f, "level {idx}"),
            QualitySelection::Representation(id) => write!(f, "rep {id}"),
        }
    }
}

/// Where an ad break sits relative to the main content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdBreakKind {
    PreRoll,
    MidRoll,
    PostRoll,
}

impl std::fmt::Display for AdBreakKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdBreakKind::PreRoll => write!(f, "pre-roll"),
            AdBreakKind::MidRoll => write!(f, "mid-roll"),
            AdBreakKind::PostRoll => write!(f, "post-roll"),
        }
    }
}

/// A fully materialized ad break, immutable once scheduled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdBreak {
    /// Stable id, generated when the configuration omits one
    pub id: String,
    pub kind: AdBreakKind,
    /// Main-content time that triggers the break (mid-roll only)
    pub trigger_time: Option<f64>,
    /// Creative URL handed to the ad element
    pub url: String,
    pub skippable: bool,
    /// Seconds of ad playback before skip unlocks
    pub skip_after: f64,
    /// Click-through destination for the sponsor overlay
    pub sponsored_url: Option<String>,
}

impl AdBreak {
    pub fn is_mid_roll(&self) -> bool {
        self.kind == AdBreakKind::MidRoll
    }
}

/// Ad break state machine phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AdPhase {
    /// Main content (or nothing) is in control
    #[default]
    Idle,
    PreRoll,
    MidRoll,
    PostRoll,
    /// Post-roll finished, nothing further is scheduled
    Ended,
}

impl AdPhase {
    /// Check if transition to target phase is valid
    pub fn can_transition_to(&self, target: AdPhase) -> bool {
        use AdPhase::*;
        matches!(
            (self, target),
            // Break activation
            (Idle, PreRoll) | (Idle, MidRoll) | (Idle, PostRoll) |
            // Back to main content on completion or skip
            (PreRoll, Idle) | (MidRoll, Idle) |
            // Post-roll has no main content to return to
            (PostRoll, Ended)
        )
    }
}

impl std::fmt::Display for AdPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdPhase::Idle => write!(f, "idle"),
            AdPhase::PreRoll => write!(f, "pre-roll"),
            AdPhase::MidRoll => write!(f, "mid-roll"),
            AdPhase::PostRoll => write!(f, "post-roll"),
            AdPhase::Ended => write!(f, "ended"),
        }
    }
}

/// Broad classification of a playback failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Transport failure, typically retryable
    Network,
    /// Corrupt or undecodable media
    Decode,
    /// The source itself cannot be played
    Src,
    Unknown,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::Decode => write!(f, "decode"),
            ErrorCategory::Src => write!(f, "src"),
            ErrorCategory::Unknown => write!(f, "unknown"),
        }
    }
}

/// Terminal error surfaced to the UI, cleared only by a fresh load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorState {
    /// Raw code from the element or engine, 0 when synthetic
    pub code: i32,
    pub category: ErrorCategory,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl ErrorState {
    pub fn new(code: i32, category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            code,
            category,
            message: message.into(),
            occurred_at: Utc::now(),
        }
    }

    /// Classify a media element error code (MediaError numbering)
    pub fn from_media_error(code: i32, message: impl Into<String>) -> Self {
        let category = match code {
            2 => ErrorCategory::Network,
            3 => ErrorCategory::Decode,
            4 => ErrorCategory::Src,
            _ => ErrorCategory::Unknown,
        };
        Self::new(code, category, message)
    }
}

/// One entry in an episode list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeInfo {
    pub id: String,
    pub title: String,
    /// Source URL loaded when this episode is selected
    pub url: String,
}

impl EpisodeInfo {
    pub fn new(id: impl Into<String>, title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            url: url.into(),
        }
    }
}

/// A sidecar subtitle track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleTrack {
    /// BCP-47 language code (e.g. "en", "es")
    pub lang: String,
    /// Human-readable label (e.g. "English")
    pub label: String,
    /// URL to the track file
    pub url: String,
}

impl SubtitleTrack {
    pub fn new(lang: impl Into<String>, label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            lang: lang.into(),
            label: label.into(),
            url: url.into(),
        }
    }
}
