//! Simulated playback surfaces
//!
//! In-memory [`MediaElement`] and engine implementations with scripted
//! behavior: autoplay policies, one-shot play failures, manual clock
//! advancement, and synthetic engine errors. Tests and the demo CLI
//! drive these instead of a real renderer; everything observable flows
//! through the same events and store writes as production surfaces.

use crate::engine::{
    DashEngine, EngineError, EngineErrorClass, EngineEvent, EngineFactory, EngineProtocol,
    EngineSupport, HlsEngine,
};
use crate::media::{MediaElement, MediaElementId, MediaEvent, PlayError, ReadyState};
use crate::types::{QualityLevel, QualitySelection};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

/// Lock a sim mutex, surviving poisoning from a panicked test
fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Yield repeatedly so background pumps drain their queued events
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

// ---- Media element ----

struct ElementState {
    src: Option<String>,
    current_time: f64,
    duration: f64,
    metadata_duration: f64,
    ready: ReadyState,
    playing: bool,
    muted: bool,
    volume: f64,
    reject_unmuted_play: bool,
    stall_loading: bool,
    play_failures: VecDeque<PlayError>,
    play_attempts: u32,
}

/// A scripted media surface
///
/// `load` immediately reports metadata and readiness; the clock only
/// moves through [`SimMediaElement::advance`].
pub struct SimMediaElement {
    id: MediaElementId,
    state: Mutex<ElementState>,
    tx: broadcast::Sender<MediaEvent>,
}

impl SimMediaElement {
    pub fn new() -> Self {
        Self::with_duration(120.0)
    }

    /// A surface whose sources report the given duration on load
    pub fn with_duration(metadata_duration: f64) -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CAPACITY);
        Self {
            id: MediaElementId::new(),
            state: Mutex::new(ElementState {
                src: None,
                current_time: 0.0,
                duration: 0.0,
                metadata_duration,
                ready: ReadyState::HaveNothing,
                playing: false,
                muted: false,
                volume: 1.0,
                reject_unmuted_play: false,
                stall_loading: false,
                play_failures: VecDeque::new(),
                play_attempts: 0,
            }),
            tx,
        }
    }

    /// Duration the next load will report
    pub fn set_metadata_duration(&self, seconds: f64) {
        locked(&self.state).metadata_duration = seconds;
    }

    /// Simulate an autoplay policy that rejects unmuted playback
    pub fn reject_unmuted_play(&self, enabled: bool) {
        locked(&self.state).reject_unmuted_play = enabled;
    }

    /// Make loads hang at HaveNothing instead of reporting readiness
    pub fn stall_loading(&self, enabled: bool) {
        locked(&self.state).stall_loading = enabled;
    }

    /// Queue a one-shot failure for the next play attempt
    pub fn script_play_failure(&self, error: PlayError) {
        locked(&self.state).play_failures.push_back(error);
    }

    pub fn play_attempts(&self) -> u32 {
        locked(&self.state).play_attempts
    }

    pub fn is_playing(&self) -> bool {
        locked(&self.state).playing
    }

    /// Move the clock forward while playing, one second at a time
    ///
    /// Emits a TimeUpdate per step and Ended when the duration is reached.
    pub fn advance(&self, seconds: f64) {
        let mut remaining = seconds;
        while remaining > 0.0 {
            let step = remaining.min(1.0);
            remaining -= step;
            let mut events = Vec::new();
            {
                let mut state = locked(&self.state);
                if !state.playing {
                    break;
                }
                let target = if state.duration > 0.0 {
                    (state.current_time + step).min(state.duration)
                } else {
                    state.current_time + step
                };
                state.current_time = target;
                events.push(MediaEvent::TimeUpdate { seconds: target });
                if state.duration > 0.0 && target >= state.duration {
                    state.playing = false;
                    events.push(MediaEvent::Ended);
                }
            }
            for event in events {
                let _ = self.tx.send(event);
            }
        }
    }

    /// Report buffered progress
    pub fn set_buffered(&self, fraction: f64) {
        let _ = self.tx.send(MediaEvent::Progress {
            buffered_fraction: fraction.clamp(0.0, 1.0),
        });
    }

    /// Simulate a buffering stall and recovery
    pub fn stall(&self) {
        let _ = self.tx.send(MediaEvent::Waiting);
    }

    /// Surface a media error (MediaError numbering)
    pub fn fail(&self, code: i32, message: &str) {
        {
            let mut state = locked(&self.state);
            state.playing = false;
        }
        let _ = self.tx.send(MediaEvent::Error {
            code,
            message: message.to_string(),
        });
    }

    /// Raw event escape hatch for edge cases
    pub fn emit(&self, event: MediaEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for SimMediaElement {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaElement for SimMediaElement {
    fn id(&self) -> MediaElementId {
        self.id
    }

    fn set_src(&self, src: Option<&str>) {
        let mut state = locked(&self.state);
        state.src = src.map(str::to_string);
        state.current_time = 0.0;
        state.duration = 0.0;
        state.ready = ReadyState::HaveNothing;
        state.playing = false;
    }

    fn src(&self) -> Option<String> {
        locked(&self.state).src.clone()
    }

    fn load(&self) {
        let events = {
            let mut state = locked(&self.state);
            if state.src.is_none() || state.stall_loading {
                state.ready = ReadyState::HaveNothing;
                Vec::new()
            } else {
                state.duration = state.metadata_duration;
                state.ready = ReadyState::HaveEnoughData;
                vec![
                    MediaEvent::LoadedMetadata {
                        duration: state.duration,
                    },
                    MediaEvent::CanPlay,
                ]
            }
        };
        for event in events {
            let _ = self.tx.send(event);
        }
    }

    async fn play(&self) -> std::result::Result<(), PlayError> {
        let outcome = {
            let mut state = locked(&self.state);
            state.play_attempts += 1;
            if state.src.is_none() {
                Err(PlayError::NotSupported)
            } else if let Some(scripted) = state.play_failures.pop_front() {
                Err(scripted)
            } else if state.reject_unmuted_play && !state.muted {
                Err(PlayError::NotAllowed)
            } else if state.playing {
                Ok(false)
            } else {
                state.playing = true;
                Ok(true)
            }
        };
        match outcome {
            Ok(started) => {
                if started {
                    let _ = self.tx.send(MediaEvent::Playing);
                }
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn pause(&self) {
        let was_playing = {
            let mut state = locked(&self.state);
            let was = state.playing;
            state.playing = false;
            was
        };
        if was_playing {
            let _ = self.tx.send(MediaEvent::Pause);
        }
    }

    fn paused(&self) -> bool {
        !locked(&self.state).playing
    }

    fn current_time(&self) -> f64 {
        locked(&self.state).current_time
    }

    fn seek(&self, seconds: f64) {
        let target = {
            let mut state = locked(&self.state);
            let target = if state.duration > 0.0 {
                seconds.clamp(0.0, state.duration)
            } else {
                seconds.max(0.0)
            };
            state.current_time = target;
            target
        };
        let _ = self.tx.send(MediaEvent::TimeUpdate { seconds: target });
    }

    fn duration(&self) -> f64 {
        locked(&self.state).duration
    }

    fn ready_state(&self) -> ReadyState {
        locked(&self.state).ready
    }

    fn muted(&self) -> bool {
        locked(&self.state).muted
    }

    fn set_muted(&self, muted: bool) {
        let changed = {
            let mut state = locked(&self.state);
            let changed = state.muted != muted;
            state.muted = muted;
            changed
        };
        if changed {
            let state = locked(&self.state);
            let _ = self.tx.send(MediaEvent::VolumeChange {
                volume: state.volume,
                muted: state.muted,
            });
        }
    }

    fn volume(&self) -> f64 {
        locked(&self.state).volume
    }

    fn set_volume(&self, volume: f64) {
        let changed = {
            let mut state = locked(&self.state);
            let clamped = volume.clamp(0.0, 1.0);
            let changed = state.volume != clamped;
            state.volume = clamped;
            changed
        };
        if changed {
            let state = locked(&self.state);
            let _ = self.tx.send(MediaEvent::VolumeChange {
                volume: state.volume,
                muted: state.muted,
            });
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<MediaEvent> {
        self.tx.subscribe()
    }
}

// ---- HLS engine ----

struct HlsState {
    ladder: Vec<QualityLevel>,
    src: Option<String>,
    current_level: i32,
    next_level: i32,
    autolevel_cap: i32,
    destroyed: bool,
    start_load_calls: u32,
    recover_calls: u32,
    fail_load: Option<String>,
}

/// A scripted HLS engine
pub struct SimHlsEngine {
    state: Mutex<HlsState>,
    tx: broadcast::Sender<EngineEvent>,
}

impl SimHlsEngine {
    pub fn new() -> Self {
        Self::with_ladder(Vec::new())
    }

    pub fn with_ladder(ladder: Vec<QualityLevel>) -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Mutex::new(HlsState {
                ladder,
                src: None,
                current_level: -1,
                next_level: -1,
                autolevel_cap: -1,
                destroyed: false,
                start_load_calls: 0,
                recover_calls: 0,
                fail_load: None,
            }),
            tx,
        }
    }

    /// Make the next load call fail
    pub fn fail_next_load(&self, message: &str) {
        locked(&self.state).fail_load = Some(message.to_string());
    }

    pub fn loaded_src(&self) -> Option<String> {
        locked(&self.state).src.clone()
    }

    pub fn current_level_pin(&self) -> i32 {
        locked(&self.state).current_level
    }

    pub fn next_level_pin(&self) -> i32 {
        locked(&self.state).next_level
    }

    pub fn autolevel_cap(&self) -> i32 {
        locked(&self.state).autolevel_cap
    }

    pub fn destroyed(&self) -> bool {
        locked(&self.state).destroyed
    }

    pub fn start_load_calls(&self) -> u32 {
        locked(&self.state).start_load_calls
    }

    pub fn recover_calls(&self) -> u32 {
        locked(&self.state).recover_calls
    }

    /// Emit a raw engine event, even after destroy
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    /// Emit a classified engine error
    pub fn emit_error(&self, class: EngineErrorClass, message: &str) {
        self.emit(EngineEvent::Error(EngineError::new(class, message)));
    }
}

impl Default for SimHlsEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HlsEngine for SimHlsEngine {
    async fn load(&self, src: &str, element: Arc<dyn MediaElement>) -> Result<()> {
        let ladder = {
            let mut state = locked(&self.state);
            if let Some(message) = state.fail_load.take() {
                return Err(Error::SourceNotPlayable(message));
            }
            state.src = Some(src.to_string());
            state.ladder.clone()
        };
        element.set_src(Some(src));
        element.load();
        self.emit(EngineEvent::ManifestLoaded { levels: ladder });
        Ok(())
    }

    fn destroy(&self) {
        locked(&self.state).destroyed = true;
    }

    fn levels(&self) -> Vec<QualityLevel> {
        locked(&self.state).ladder.clone()
    }

    fn current_level(&self) -> i32 {
        locked(&self.state).current_level
    }

    fn set_current_level(&self, level: i32) {
        locked(&self.state).current_level = level;
        if level >= 0 {
            self.emit(EngineEvent::LevelSwitched {
                selection: QualitySelection::Level(level as usize),
            });
        }
    }

    fn set_next_level(&self, level: i32) {
        locked(&self.state).next_level = level;
    }

    fn set_autolevel_cap(&self, level: i32) {
        locked(&self.state).autolevel_cap = level;
    }

    fn start_load(&self) {
        locked(&self.state).start_load_calls += 1;
    }

    fn recover_media_error(&self) {
        locked(&self.state).recover_calls += 1;
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

// ---- DASH engine ----

struct DashState {
    representations: Vec<QualityLevel>,
    src: Option<String>,
    auto_switch: bool,
    selected: Option<String>,
    was_reset: bool,
    reload_calls: u32,
    recover_calls: u32,
    fail_init: Option<String>,
}

/// A scripted DASH engine
pub struct SimDashEngine {
    state: Mutex<DashState>,
    tx: broadcast::Sender<EngineEvent>,
}

impl SimDashEngine {
    pub fn new() -> Self {
        Self::with_representations(Vec::new())
    }

    pub fn with_representations(representations: Vec<QualityLevel>) -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Mutex::new(DashState {
                representations,
                src: None,
                auto_switch: true,
                selected: None,
                was_reset: false,
                reload_calls: 0,
                recover_calls: 0,
                fail_init: None,
            }),
            tx,
        }
    }

    /// Make the next initialize call fail
    pub fn fail_next_initialize(&self, message: &str) {
        locked(&self.state).fail_init = Some(message.to_string());
    }

    pub fn loaded_src(&self) -> Option<String> {
        locked(&self.state).src.clone()
    }

    pub fn auto_switch_enabled(&self) -> bool {
        locked(&self.state).auto_switch
    }

    pub fn selected_representation(&self) -> Option<String> {
        locked(&self.state).selected.clone()
    }

    pub fn was_reset(&self) -> bool {
        locked(&self.state).was_reset
    }

    pub fn reload_calls(&self) -> u32 {
        locked(&self.state).reload_calls
    }

    pub fn recover_calls(&self) -> u32 {
        locked(&self.state).recover_calls
    }

    /// Emit a raw engine event, even after reset
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    /// Emit a classified engine error
    pub fn emit_error(&self, class: EngineErrorClass, message: &str) {
        self.emit(EngineEvent::Error(EngineError::new(class, message)));
    }
}

impl Default for SimDashEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DashEngine for SimDashEngine {
    async fn initialize(&self, src: &str, element: Arc<dyn MediaElement>) -> Result<()> {
        let representations = {
            let mut state = locked(&self.state);
            if let Some(message) = state.fail_init.take() {
                return Err(Error::SourceNotPlayable(message));
            }
            state.src = Some(src.to_string());
            state.representations.clone()
        };
        element.set_src(Some(src));
        element.load();
        self.emit(EngineEvent::ManifestLoaded {
            levels: representations,
        });
        Ok(())
    }

    fn reset(&self) {
        locked(&self.state).was_reset = true;
    }

    fn representations(&self) -> Vec<QualityLevel> {
        locked(&self.state).representations.clone()
    }

    fn set_auto_switch(&self, enabled: bool) {
        locked(&self.state).auto_switch = enabled;
    }

    fn select_representation(&self, id: &str) -> bool {
        let known = {
            let state = locked(&self.state);
            state
                .representations
                .iter()
                .any(|r| r.id.as_deref() == Some(id))
        };
        if known {
            locked(&self.state).selected = Some(id.to_string());
            self.emit(EngineEvent::LevelSwitched {
                selection: QualitySelection::Representation(id.to_string()),
            });
        }
        known
    }

    fn reload(&self) {
        locked(&self.state).reload_calls += 1;
    }

    fn recover(&self) {
        locked(&self.state).recover_calls += 1;
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

// ---- Factory ----

/// Hands out scripted engines and records every instance it created
pub struct SimEngineFactory {
    hls_support: EngineSupport,
    dash_support: EngineSupport,
    hls_ladder: Vec<QualityLevel>,
    dash_representations: Vec<QualityLevel>,
    created_hls: Mutex<Vec<Arc<SimHlsEngine>>>,
    created_dash: Mutex<Vec<Arc<SimDashEngine>>>,
}

impl SimEngineFactory {
    pub fn new() -> Self {
        Self {
            hls_support: EngineSupport::Full,
            dash_support: EngineSupport::Full,
            hls_ladder: default_hls_ladder(),
            dash_representations: default_dash_representations(),
            created_hls: Mutex::new(Vec::new()),
            created_dash: Mutex::new(Vec::new()),
        }
    }

    pub fn with_hls_support(mut self, support: EngineSupport) -> Self {
        self.hls_support = support;
        self
    }

    pub fn with_dash_support(mut self, support: EngineSupport) -> Self {
        self.dash_support = support;
        self
    }

    pub fn with_hls_ladder(mut self, ladder: Vec<QualityLevel>) -> Self {
        self.hls_ladder = ladder;
        self
    }

    pub fn with_dash_representations(mut self, representations: Vec<QualityLevel>) -> Self {
        self.dash_representations = representations;
        self
    }

    /// Every HLS engine created so far, oldest first
    pub fn created_hls(&self) -> Vec<Arc<SimHlsEngine>> {
        locked(&self.created_hls).clone()
    }

    /// Every DASH engine created so far, oldest first
    pub fn created_dash(&self) -> Vec<Arc<SimDashEngine>> {
        locked(&self.created_dash).clone()
    }

    pub fn last_hls(&self) -> Option<Arc<SimHlsEngine>> {
        locked(&self.created_hls).last().cloned()
    }

    pub fn last_dash(&self) -> Option<Arc<SimDashEngine>> {
        locked(&self.created_dash).last().cloned()
    }
}

impl Default for SimEngineFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineFactory for SimEngineFactory {
    fn support(&self, protocol: EngineProtocol) -> EngineSupport {
        match protocol {
            EngineProtocol::Hls => self.hls_support,
            EngineProtocol::Dash => self.dash_support,
        }
    }

    fn create_hls(&self) -> Result<Arc<dyn HlsEngine>> {
        let engine = Arc::new(SimHlsEngine::with_ladder(self.hls_ladder.clone()));
        locked(&self.created_hls).push(engine.clone());
        Ok(engine)
    }

    fn create_dash(&self) -> Result<Arc<dyn DashEngine>> {
        let engine = Arc::new(SimDashEngine::with_representations(
            self.dash_representations.clone(),
        ));
        locked(&self.created_dash).push(engine.clone());
        Ok(engine)
    }
}

fn default_hls_ladder() -> Vec<QualityLevel> {
    vec![
        QualityLevel::new(0, 640, 360, 800_000),
        QualityLevel::new(1, 1280, 720, 2_500_000),
        QualityLevel::new(2, 1920, 1080, 5_000_000),
    ]
}

fn default_dash_representations() -> Vec<QualityLevel> {
    vec![
        QualityLevel::new(0, 640, 360, 800_000).with_id("video=800k"),
        QualityLevel::new(1, 1280, 720, 2_500_000).with_id("video=2500k"),
        QualityLevel::new(2, 1920, 1080, 5_000_000).with_id("video=5000k"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn element_reports_metadata_on_load() {
        let element = SimMediaElement::with_duration(300.0);
        let mut rx = element.subscribe();
        element.set_src(Some("https://cdn.example.com/clip.mp4"));
        element.load();

        assert_eq!(
            rx.recv().await.unwrap(),
            MediaEvent::LoadedMetadata { duration: 300.0 }
        );
        assert_eq!(rx.recv().await.unwrap(), MediaEvent::CanPlay);
        assert!(element.ready_state().can_play());
    }

    #[tokio::test]
    async fn element_rejects_unmuted_play_under_policy() {
        let element = SimMediaElement::new();
        element.reject_unmuted_play(true);
        element.set_src(Some("clip.mp4"));
        element.load();

        assert_eq!(element.play().await, Err(PlayError::NotAllowed));
        element.set_muted(true);
        assert!(element.play().await.is_ok());
        assert!(element.is_playing());
    }

    #[tokio::test]
    async fn element_ends_at_duration() {
        let element = SimMediaElement::with_duration(3.0);
        element.set_src(Some("clip.mp4"));
        element.load();
        element.play().await.unwrap();

        let mut rx = element.subscribe();
        element.advance(5.0);

        let mut saw_ended = false;
        while let Ok(event) = rx.try_recv() {
            if event == MediaEvent::Ended {
                saw_ended = true;
            }
        }
        assert!(saw_ended);
        assert!(!element.is_playing());
        assert_eq!(element.current_time(), 3.0);
    }

    #[tokio::test]
    async fn hls_engine_emits_manifest_on_load() {
        let engine = SimHlsEngine::with_ladder(default_hls_ladder());
        let element: Arc<dyn MediaElement> = Arc::new(SimMediaElement::new());
        let mut rx = engine.subscribe();

        engine.load("https://cdn.example.com/master.m3u8", element.clone()).await.unwrap();

        match rx.recv().await.unwrap() {
            EngineEvent::ManifestLoaded { levels } => assert_eq!(levels.len(), 3),
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(element.src().as_deref(), Some("https://cdn.example.com/master.m3u8"));
    }

    #[tokio::test]
    async fn dash_engine_rejects_unknown_representation() {
        let engine = SimDashEngine::with_representations(default_dash_representations());
        assert!(engine.select_representation("video=2500k"));
        assert!(!engine.select_representation("video=999k"));
        assert_eq!(engine.selected_representation().as_deref(), Some("video=2500k"));
    }
}
