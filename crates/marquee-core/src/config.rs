//! Player configuration
//!
//! Everything a session needs up front: the source, ad breaks, episode
//! context, tracking hooks, and engine recovery knobs. The whole surface
//! deserializes from JSON except the callback hooks, which are runtime-only.

use crate::error::{Error, Result};
use crate::types::{AdBreak, EpisodeInfo, StreamHint, SubtitleTrack};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Callback invoked with the break that started, ended, or was skipped
pub type AdCallback = Arc<dyn Fn(&AdBreak) + Send + Sync>;
/// Callback invoked with the break that failed and a short reason
pub type AdErrorCallback = Arc<dyn Fn(&AdBreak, &str) + Send + Sync>;
/// Callback invoked once per source load when playback first starts
pub type ViewedCallback = Arc<dyn Fn() + Send + Sync>;
/// Callback invoked with accumulated watch seconds at unload flush
pub type WatchTimeCallback = Arc<dyn Fn(f64) + Send + Sync>;

/// External notification hooks for the ad scheduler
///
/// Each hook fires at most once per break id per source load.
#[derive(Clone, Default)]
pub struct AdHooks {
    pub on_ad_start: Option<AdCallback>,
    pub on_ad_end: Option<AdCallback>,
    pub on_ad_skip: Option<AdCallback>,
    pub on_ad_error: Option<AdErrorCallback>,
}

impl AdHooks {
    pub fn with_on_ad_start(mut self, f: impl Fn(&AdBreak) + Send + Sync + 'static) -> Self {
        self.on_ad_start = Some(Arc::new(f));
        self
    }

    pub fn with_on_ad_end(mut self, f: impl Fn(&AdBreak) + Send + Sync + 'static) -> Self {
        self.on_ad_end = Some(Arc::new(f));
        self
    }

    pub fn with_on_ad_skip(mut self, f: impl Fn(&AdBreak) + Send + Sync + 'static) -> Self {
        self.on_ad_skip = Some(Arc::new(f));
        self
    }

    pub fn with_on_ad_error(mut self, f: impl Fn(&AdBreak, &str) + Send + Sync + 'static) -> Self {
        self.on_ad_error = Some(Arc::new(f));
        self
    }
}

impl std::fmt::Debug for AdHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdHooks")
            .field("on_ad_start", &self.on_ad_start.is_some())
            .field("on_ad_end", &self.on_ad_end.is_some())
            .field("on_ad_skip", &self.on_ad_skip.is_some())
            .field("on_ad_error", &self.on_ad_error.is_some())
            .finish()
    }
}

/// External notification hooks for view tracking
#[derive(Clone, Default)]
pub struct TrackingHooks {
    pub on_viewed: Option<ViewedCallback>,
    pub on_watch_time_updated: Option<WatchTimeCallback>,
}

impl TrackingHooks {
    pub fn with_on_viewed(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_viewed = Some(Arc::new(f));
        self
    }

    pub fn with_on_watch_time_updated(mut self, f: impl Fn(f64) + Send + Sync + 'static) -> Self {
        self.on_watch_time_updated = Some(Arc::new(f));
        self
    }
}

impl std::fmt::Debug for TrackingHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingHooks")
            .field("on_viewed", &self.on_viewed.is_some())
            .field("on_watch_time_updated", &self.on_watch_time_updated.is_some())
            .finish()
    }
}

/// One configured ad break before scheduling materializes it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdSpot {
    /// Stable id; a UUID is generated per source load when omitted
    pub id: Option<String>,
    /// Creative URL
    pub url: String,
    /// Main-content trigger time in seconds (mid-roll lists only)
    pub time: Option<f64>,
    pub skippable: bool,
    /// Seconds of ad playback before skip unlocks
    pub skip_after: f64,
    /// Click-through destination for the sponsor overlay
    pub sponsored_url: Option<String>,
}

impl Default for AdSpot {
    fn default() -> Self {
        Self {
            id: None,
            url: String::new(),
            time: None,
            skippable: false,
            skip_after: 5.0,
            sponsored_url: None,
        }
    }
}

impl AdSpot {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Set the mid-roll trigger time
    pub fn at(mut self, time: f64) -> Self {
        self.time = Some(time);
        self
    }

    pub fn skippable_after(mut self, seconds: f64) -> Self {
        self.skippable = true;
        self.skip_after = seconds;
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Heuristic filter applied to configured mid-roll times
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmartPlacement {
    pub enabled: bool,
    /// Videos shorter than this get no mid-rolls at all (seconds)
    pub min_video_duration: f64,
    /// Minimum spacing between surviving breaks, also from video start (seconds)
    pub min_gap_between_ads: f64,
    /// Keep-out zone before the end of the video (seconds)
    pub avoid_near_end: f64,
}

impl Default for SmartPlacement {
    fn default() -> Self {
        Self {
            enabled: true,
            min_video_duration: 60.0,
            min_gap_between_ads: 30.0,
            avoid_near_end: 10.0,
        }
    }
}

/// Ad break configuration for one player
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdsConfig {
    pub pre_roll: Option<AdSpot>,
    pub mid_rolls: Vec<AdSpot>,
    pub post_roll: Option<AdSpot>,
    /// When set, mid-roll times are filtered; when absent they play verbatim
    pub smart_placement: Option<SmartPlacement>,
    /// How long an ad creative may take to reach a playable state
    pub load_timeout_ms: u64,
    #[serde(skip)]
    pub hooks: AdHooks,
}

impl Default for AdsConfig {
    fn default() -> Self {
        Self {
            pre_roll: None,
            mid_rolls: Vec::new(),
            post_roll: None,
            smart_placement: None,
            load_timeout_ms: 8000,
            hooks: AdHooks::default(),
        }
    }
}

impl AdsConfig {
    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }
}

/// A skippable intro window in the main content
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntroConfig {
    /// Window start in seconds
    pub start: f64,
    /// Seek target when the viewer skips
    pub end: f64,
}

/// Episode list plus the entry currently playing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EpisodesConfig {
    pub list: Vec<EpisodeInfo>,
    pub current_index: usize,
}

/// When and how the next-episode countdown appears
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NextEpisodeConfig {
    /// Absolute content time at which the countdown card appears
    pub show_at_time: Option<f64>,
    /// Show the countdown when the content ends
    pub show_at_end: bool,
    /// Seconds counted down before auto-advance
    pub countdown_seconds: u32,
}

impl Default for NextEpisodeConfig {
    fn default() -> Self {
        Self {
            show_at_time: None,
            show_at_end: true,
            countdown_seconds: 10,
        }
    }
}

/// View tracking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Minimum accumulated seconds before an unload flush reports anything
    pub flush_threshold_seconds: f64,
    #[serde(skip)]
    pub hooks: TrackingHooks,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            flush_threshold_seconds: 30.0,
            hooks: TrackingHooks::default(),
        }
    }
}

/// Engine recovery knobs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Network-error restarts allowed per attachment
    pub max_restart_attempts: u32,
    /// Backoff before the first restart
    pub restart_backoff_ms: u64,
    /// Backoff ceiling
    pub restart_backoff_cap_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_restart_attempts: 3,
            restart_backoff_ms: 1000,
            restart_backoff_cap_ms: 8000,
        }
    }
}

impl EngineConfig {
    /// Backoff delay for a 1-based restart attempt, doubling up to the cap
    pub fn restart_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self
            .restart_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.restart_backoff_cap_ms);
        Duration::from_millis(delay)
    }
}

/// Player configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Initial source URL
    pub src: String,
    /// Protocol hint; wins over extension detection
    pub stream_type_hint: Option<StreamHint>,
    /// Attempt playback as soon as the pre-roll gate clears
    pub autoplay: bool,
    pub start_muted: bool,
    /// Initial volume in [0.0, 1.0]
    pub initial_volume: f64,
    pub ads: Option<AdsConfig>,
    pub subtitles: Vec<SubtitleTrack>,
    pub episodes: Option<EpisodesConfig>,
    pub intro: Option<IntroConfig>,
    pub next_episode: Option<NextEpisodeConfig>,
    pub tracking: TrackingConfig,
    pub engine: EngineConfig,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            src: String::new(),
            stream_type_hint: None,
            autoplay: true,
            start_muted: false,
            initial_volume: 1.0,
            ads: None,
            subtitles: Vec::new(),
            episodes: None,
            intro: None,
            next_episode: None,
            tracking: TrackingConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl PlayerConfig {
    pub fn new(src: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            ..Self::default()
        }
    }

    /// Check the configuration for values the session cannot work with
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.initial_volume) {
            return Err(Error::InvalidConfig(format!(
                "initial_volume {} outside [0.0, 1.0]",
                self.initial_volume
            )));
        }
        if let Some(intro) = &self.intro {
            if intro.end <= intro.start {
                return Err(Error::InvalidConfig(format!(
                    "intro window end {} must be after start {}",
                    intro.end, intro.start
                )));
            }
        }
        if let Some(episodes) = &self.episodes {
            if !episodes.list.is_empty() && episodes.current_index >= episodes.list.len() {
                return Err(Error::InvalidConfig(format!(
                    "episode index {} out of range ({} episodes)",
                    episodes.current_index,
                    episodes.list.len()
                )));
            }
        }
        if let Some(ads) = &self.ads {
            for spot in &ads.mid_rolls {
                if spot.time.is_none() {
                    return Err(Error::InvalidConfig(format!(
                        "mid-roll spot {} has no trigger time",
                        spot.id.as_deref().unwrap_or(&spot.url)
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_delay_doubles_and_caps() {
        let config = EngineConfig::default();
        assert_eq!(config.restart_delay(1), Duration::from_millis(1000));
        assert_eq!(config.restart_delay(2), Duration::from_millis(2000));
        assert_eq!(config.restart_delay(3), Duration::from_millis(4000));
        assert_eq!(config.restart_delay(4), Duration::from_millis(8000));
        assert_eq!(config.restart_delay(10), Duration::from_millis(8000));
    }

    #[test]
    fn validate_rejects_out_of_range_volume() {
        let mut config = PlayerConfig::new("https://cdn.example.com/video.m3u8");
        config.initial_volume = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_inverted_intro_window() {
        let mut config = PlayerConfig::new("video.mp4");
        config.intro = Some(IntroConfig { start: 30.0, end: 10.0 });
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_mid_roll_without_time() {
        let mut config = PlayerConfig::new("video.m3u8");
        config.ads = Some(AdsConfig {
            mid_rolls: vec![AdSpot::new("https://ads.example.com/a.mp4")],
            ..AdsConfig::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_round_trips_through_json_without_hooks() {
        let config = PlayerConfig {
            src: "https://cdn.example.com/show.m3u8".into(),
            stream_type_hint: Some(StreamHint::Hls),
            ads: Some(AdsConfig {
                pre_roll: Some(AdSpot::new("https://ads.example.com/pre.mp4")),
                mid_rolls: vec![AdSpot::new("https://ads.example.com/mid.mp4").at(40.0)],
                smart_placement: Some(SmartPlacement::default()),
                ..AdsConfig::default()
            }),
            ..PlayerConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: PlayerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.src, config.src);
        assert_eq!(parsed.stream_type_hint, Some(StreamHint::Hls));
        assert_eq!(parsed.ads.unwrap().mid_rolls.len(), 1);
    }
}
